//! Loop controller
//!
//! The controller sits on a cycle of the graph. Each run it decides whether
//! the loop continues: while it does, `break` carries the loop-not-broken
//! exclusion (which keeps downstream consumers of `break` waiting) and the
//! scheduler clears the loop body and runs it again with the values the
//! controller forwards on `outputN`. When the loop stops, `break` carries
//! the final input values and every `outputN` is excluded.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use super::indexed_values;
use crate::behavior::{FlowRole, NodeBehavior, NodeOutput, PortContext};
use crate::coerce::to_bool;
use crate::context::NodeContext;
use crate::descriptor::{NodeDescriptor, NodeMetadata};
use crate::error::{EngineError, Result};
use crate::types::{GraphNode, Inputs, NodeCategory, Outputs, PortDefinition};
use crate::value::{DataType, DataValue};

/// Iteration ceiling of a controller without its own `maxIterations`
pub const DEFAULT_MAX_ITERATIONS: u32 = 100;

/// What happens when the iteration ceiling is reached
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum AtMaxIterations {
    #[default]
    Error,
    Break,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct LoopControllerConfig {
    pub max_iterations: Option<u32>,
    pub at_max_iterations_action: AtMaxIterations,
}

#[derive(Default)]
pub struct LoopControllerNode;

impl LoopControllerNode {
    pub const PORT_CONTINUE: &'static str = "continue";
    pub const PORT_INPUT_PREFIX: &'static str = "input";
    pub const PORT_OUTPUT_PREFIX: &'static str = "output";
    pub const PORT_BREAK: &'static str = "break";
    const DEFAULT_SUFFIX: &'static str = "Default";

    /// Number of input/default pairs, one more than the highest connected
    fn pair_count(node: &GraphNode, ports: &PortContext<'_>) -> usize {
        ports
            .incoming(&node.id)
            .filter_map(|c| c.input_id.strip_prefix(Self::PORT_INPUT_PREFIX))
            .filter_map(|n| n.trim_end_matches(Self::DEFAULT_SUFFIX).parse::<usize>().ok())
            .max()
            .map(|n| n + 1)
            .unwrap_or(1)
    }

    fn default_port(n: usize) -> String {
        format!("{}{}{}", Self::PORT_INPUT_PREFIX, n, Self::DEFAULT_SUFFIX)
    }
}

impl NodeDescriptor for LoopControllerNode {
    fn descriptor() -> NodeMetadata {
        NodeMetadata::new("loopController", NodeCategory::Control, "Loop Controller")
            .with_description("Re-runs the nodes of its cycle until `continue` is false")
    }
}

inventory::submit!(crate::descriptor::BehaviorFn(crate::descriptor::shared::<LoopControllerNode>));

#[async_trait]
impl NodeBehavior for LoopControllerNode {
    fn metadata(&self) -> NodeMetadata {
        Self::descriptor()
    }

    fn input_ports(&self, node: &GraphNode, ports: &PortContext<'_>) -> Vec<PortDefinition> {
        let mut inputs = vec![PortDefinition::optional(Self::PORT_CONTINUE, "Continue", DataType::BOOLEAN)
            .with_description("Keeps looping while true; absent counts as true")];
        for n in 1..=Self::pair_count(node, ports) {
            inputs.push(PortDefinition::optional(
                format!("{}{}", Self::PORT_INPUT_PREFIX, n),
                format!("Input {}", n),
                DataType::ANY,
            ));
            inputs.push(
                PortDefinition::optional(Self::default_port(n), format!("Input {} Default", n), DataType::ANY)
                    .with_description("Value used on the first iteration"),
            );
        }
        inputs
    }

    fn output_ports(&self, node: &GraphNode, ports: &PortContext<'_>) -> Vec<PortDefinition> {
        let mut outputs = vec![PortDefinition::optional(Self::PORT_BREAK, "Break", DataType::ANY_ARRAY)];
        for n in 1..=Self::pair_count(node, ports) {
            outputs.push(PortDefinition::optional(
                format!("{}{}", Self::PORT_OUTPUT_PREFIX, n),
                format!("Output {}", n),
                DataType::ANY,
            ));
        }
        outputs
    }

    fn flow_role(&self) -> FlowRole {
        FlowRole::LoopController
    }

    async fn process(&self, node: &GraphNode, inputs: Inputs, context: &NodeContext) -> Result<NodeOutput> {
        let config: LoopControllerConfig = node.config()?;
        let max_iterations = config.max_iterations.unwrap_or(DEFAULT_MAX_ITERATIONS);

        let count = indexed_values(&inputs, Self::PORT_INPUT_PREFIX)
            .last()
            .map(|(n, _)| *n)
            .into_iter()
            .chain(inputs.keys().filter_map(|k| {
                k.strip_prefix(Self::PORT_INPUT_PREFIX)?
                    .strip_suffix(Self::DEFAULT_SUFFIX)?
                    .parse::<usize>()
                    .ok()
            }))
            .max()
            .unwrap_or(0);

        let output_port = |n: usize| format!("{}{}", Self::PORT_OUTPUT_PREFIX, n);
        let mut outputs = Outputs::new();

        // An excluded default means the loop itself sits on an untaken branch
        let excluded_default = (1..=count).any(|n| {
            inputs
                .get(&Self::default_port(n))
                .map(DataValue::is_excluded)
                .unwrap_or(false)
        });
        if excluded_default {
            for n in 1..=count {
                outputs.insert(output_port(n), DataValue::excluded());
            }
            outputs.insert(Self::PORT_BREAK.to_string(), DataValue::excluded());
            return Ok(outputs.into());
        }

        let mut continuing = match inputs.get(Self::PORT_CONTINUE) {
            None => true,
            Some(value) if value.is_excluded() => false,
            Some(value) => to_bool(Some(value)),
        };

        if continuing && context.iteration() >= max_iterations {
            match config.at_max_iterations_action {
                AtMaxIterations::Break => {
                    log::debug!("Loop controller {} breaking at max iterations", node.title);
                    continuing = false;
                }
                AtMaxIterations::Error => {
                    return Err(EngineError::failed(format!(
                        "Loop controller {} has exceeded max iterations of {}",
                        node.title, max_iterations
                    )));
                }
            }
        }

        let values: Vec<DataValue> = (1..=count)
            .map(|n| {
                inputs
                    .get(&format!("{}{}", Self::PORT_INPUT_PREFIX, n))
                    .or_else(|| inputs.get(&Self::default_port(n)))
                    .cloned()
                    .unwrap_or_else(super::null_value)
            })
            .collect();

        if continuing {
            outputs.insert(Self::PORT_BREAK.to_string(), DataValue::loop_not_broken());
            for (i, value) in values.into_iter().enumerate() {
                outputs.insert(output_port(i + 1), value);
            }
        } else {
            outputs.insert(
                Self::PORT_BREAK.to_string(),
                DataValue::AnyArray(values.iter().map(DataValue::to_json).collect()),
            );
            for n in 1..=count {
                outputs.insert(output_port(n), DataValue::excluded());
            }
        }

        Ok(outputs.into())
    }
}
