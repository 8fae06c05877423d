//! Engine-intrinsic node behaviors
//!
//! These node types need scheduler or run-context support (graph interface,
//! sub-graphs, loops, races, aborts, events, globals, user input) and ship
//! with the engine. Generic value nodes live in the `dataflow-nodes` crate.
//!
//! Every behavior is registered through `inventory`, so
//! `NodeRegistry::with_builtins()` picks them up without a manual list.

pub mod control;
pub mod graph_io;
pub mod loop_controller;
pub mod state;
pub mod subgraph;
pub mod user_input;

pub use control::{AbortGraphNode, CoalesceNode, IfNode, PassthroughNode, RaceInputsNode};
pub use graph_io::{GraphInputNode, GraphOutputNode};
pub use loop_controller::LoopControllerNode;
pub use state::{GetGlobalNode, RaiseEventNode, SetGlobalNode, WaitForEventNode};
pub use subgraph::SubGraphNode;
pub use user_input::UserInputNode;

use crate::types::{Inputs, PortDefinition};
use crate::value::{DataType, DataValue};

/// `<prefix>1 ..= <prefix><count>` optional ports
pub fn variadic_ports(prefix: &str, title: &str, count: usize, data_type: DataType) -> Vec<PortDefinition> {
    (1..=count)
        .map(|n| PortDefinition::optional(format!("{}{}", prefix, n), format!("{} {}", title, n), data_type))
        .collect()
}

/// Values of `<prefix>N` inputs ordered by N
pub fn indexed_values<'a>(inputs: &'a Inputs, prefix: &str) -> Vec<(usize, &'a DataValue)> {
    let mut values: Vec<(usize, &DataValue)> = inputs
        .iter()
        .filter_map(|(port, value)| {
            let n = port.strip_prefix(prefix)?.parse::<usize>().ok()?;
            Some((n, value))
        })
        .collect();
    values.sort_by_key(|(n, _)| *n);
    values
}

/// The null `any` value nodes output when they have nothing to say
pub fn null_value() -> DataValue {
    DataValue::Any(serde_json::Value::Null)
}
