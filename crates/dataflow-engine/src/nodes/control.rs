//! Control-flow nodes
//!
//! Branching in a dataflow graph is done with excluded values: `if` emits an
//! excluded value on the branch not taken, `coalesce` and `raceInputs` pick
//! the first branch that produced something real.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use super::{indexed_values, null_value, variadic_ports};
use crate::behavior::{FlowRole, NodeBehavior, NodeOutput, PortContext};
use crate::coerce::{to_bool, to_string};
use crate::context::NodeContext;
use crate::descriptor::{NodeDescriptor, NodeMetadata};
use crate::error::Result;
use crate::types::{GraphNode, Inputs, NodeCategory, Outputs, PortDefinition};
use crate::value::{DataType, DataValue};

/// Routes a value to `output` or `falseOutput` depending on a condition
///
/// # Inputs
/// - `if` (required) - condition, read for truthiness
/// - `value` - value to route; null when unconnected
///
/// # Outputs
/// - `output` - the value when the condition holds, excluded otherwise
/// - `falseOutput` - the value when it does not, excluded otherwise
#[derive(Default)]
pub struct IfNode;

impl IfNode {
    pub const PORT_IF: &'static str = "if";
    pub const PORT_VALUE: &'static str = "value";
    pub const PORT_OUTPUT: &'static str = "output";
    pub const PORT_FALSE_OUTPUT: &'static str = "falseOutput";
}

impl NodeDescriptor for IfNode {
    fn descriptor() -> NodeMetadata {
        NodeMetadata::new("if", NodeCategory::Control, "If")
            .with_description("Passes the value through one of two branches")
    }
}

inventory::submit!(crate::descriptor::BehaviorFn(crate::descriptor::shared::<IfNode>));

#[async_trait]
impl NodeBehavior for IfNode {
    fn metadata(&self) -> NodeMetadata {
        Self::descriptor()
    }

    fn input_ports(&self, _node: &GraphNode, _ports: &PortContext<'_>) -> Vec<PortDefinition> {
        vec![
            PortDefinition::required(Self::PORT_IF, "If", DataType::ANY),
            PortDefinition::optional(Self::PORT_VALUE, "Value", DataType::ANY),
        ]
    }

    fn output_ports(&self, _node: &GraphNode, _ports: &PortContext<'_>) -> Vec<PortDefinition> {
        vec![
            PortDefinition::optional(Self::PORT_OUTPUT, "True", DataType::ANY),
            PortDefinition::optional(Self::PORT_FALSE_OUTPUT, "False", DataType::ANY),
        ]
    }

    async fn process(&self, _node: &GraphNode, inputs: Inputs, _context: &NodeContext) -> Result<NodeOutput> {
        let condition = to_bool(inputs.get(Self::PORT_IF));
        let value = inputs.get(Self::PORT_VALUE).cloned().unwrap_or_else(null_value);

        let (taken, other) = if condition {
            (Self::PORT_OUTPUT, Self::PORT_FALSE_OUTPUT)
        } else {
            (Self::PORT_FALSE_OUTPUT, Self::PORT_OUTPUT)
        };

        let mut outputs = Outputs::new();
        outputs.insert(taken.to_string(), value);
        outputs.insert(other.to_string(), DataValue::excluded());
        Ok(outputs.into())
    }
}

/// Outputs the first input that carries a real value
///
/// An optional `conditional` input gates the whole node: when it is false or
/// excluded the output is excluded.
#[derive(Default)]
pub struct CoalesceNode;

impl CoalesceNode {
    pub const PORT_CONDITIONAL: &'static str = "conditional";
    pub const PORT_INPUT_PREFIX: &'static str = "input";
    pub const PORT_OUTPUT: &'static str = "output";
}

impl NodeDescriptor for CoalesceNode {
    fn descriptor() -> NodeMetadata {
        NodeMetadata::new("coalesce", NodeCategory::Control, "Coalesce")
            .with_description("Outputs the first non-excluded, non-null input")
    }
}

inventory::submit!(crate::descriptor::BehaviorFn(crate::descriptor::shared::<CoalesceNode>));

#[async_trait]
impl NodeBehavior for CoalesceNode {
    fn metadata(&self) -> NodeMetadata {
        Self::descriptor()
    }

    fn input_ports(&self, node: &GraphNode, ports: &PortContext<'_>) -> Vec<PortDefinition> {
        let count = ports.variadic_count(&node.id, Self::PORT_INPUT_PREFIX);
        let mut inputs = vec![PortDefinition::optional(Self::PORT_CONDITIONAL, "Conditional", DataType::BOOLEAN)];
        inputs.extend(variadic_ports(Self::PORT_INPUT_PREFIX, "Input", count, DataType::ANY));
        inputs
    }

    fn output_ports(&self, _node: &GraphNode, _ports: &PortContext<'_>) -> Vec<PortDefinition> {
        vec![PortDefinition::optional(Self::PORT_OUTPUT, "Output", DataType::ANY)]
    }

    fn flow_role(&self) -> FlowRole {
        FlowRole::ExcludedConsumer
    }

    async fn process(&self, _node: &GraphNode, inputs: Inputs, _context: &NodeContext) -> Result<NodeOutput> {
        let gated = inputs
            .get(Self::PORT_CONDITIONAL)
            .map(|c| c.is_excluded() || !to_bool(Some(c)))
            .unwrap_or(false);

        let value = if gated {
            None
        } else {
            indexed_values(&inputs, Self::PORT_INPUT_PREFIX)
                .into_iter()
                .map(|(_, v)| v)
                .find(|v| !v.is_excluded() && !v.to_json().is_null())
                .cloned()
        };

        let mut outputs = Outputs::new();
        outputs.insert(Self::PORT_OUTPUT.to_string(), value.unwrap_or_else(DataValue::excluded));
        Ok(outputs.into())
    }
}

/// Forwards every `inputN` to `outputN` unchanged
#[derive(Default)]
pub struct PassthroughNode;

impl PassthroughNode {
    pub const PORT_INPUT_PREFIX: &'static str = "input";
    pub const PORT_OUTPUT_PREFIX: &'static str = "output";
}

impl NodeDescriptor for PassthroughNode {
    fn descriptor() -> NodeMetadata {
        NodeMetadata::new("passthrough", NodeCategory::Control, "Passthrough")
            .with_description("Forwards its inputs unchanged")
    }
}

inventory::submit!(crate::descriptor::BehaviorFn(crate::descriptor::shared::<PassthroughNode>));

#[async_trait]
impl NodeBehavior for PassthroughNode {
    fn metadata(&self) -> NodeMetadata {
        Self::descriptor()
    }

    fn input_ports(&self, node: &GraphNode, ports: &PortContext<'_>) -> Vec<PortDefinition> {
        let count = ports.variadic_count(&node.id, Self::PORT_INPUT_PREFIX);
        variadic_ports(Self::PORT_INPUT_PREFIX, "Input", count, DataType::ANY)
    }

    fn output_ports(&self, node: &GraphNode, ports: &PortContext<'_>) -> Vec<PortDefinition> {
        let count = ports.variadic_count(&node.id, Self::PORT_INPUT_PREFIX);
        // The last input is always the free one, so it has no output
        variadic_ports(Self::PORT_OUTPUT_PREFIX, "Output", count.saturating_sub(1).max(1), DataType::ANY)
    }

    async fn process(&self, _node: &GraphNode, inputs: Inputs, _context: &NodeContext) -> Result<NodeOutput> {
        let outputs: Outputs = indexed_values(&inputs, Self::PORT_INPUT_PREFIX)
            .into_iter()
            .map(|(n, v)| (format!("{}{}", Self::PORT_OUTPUT_PREFIX, n), v.clone()))
            .collect();
        Ok(outputs.into())
    }
}

/// Resolves with whichever input produces a value first
///
/// The scheduler runs this node as soon as one input holds a real value and
/// cancels the inputs that are still running. Errors of the losing inputs
/// do not fail the graph.
#[derive(Default)]
pub struct RaceInputsNode;

impl RaceInputsNode {
    pub const PORT_INPUT_PREFIX: &'static str = "input";
    pub const PORT_RESULT: &'static str = "result";
}

impl NodeDescriptor for RaceInputsNode {
    fn descriptor() -> NodeMetadata {
        NodeMetadata::new("raceInputs", NodeCategory::Control, "Race Inputs")
            .with_description("Takes the first input to produce a value and cancels the rest")
    }
}

inventory::submit!(crate::descriptor::BehaviorFn(crate::descriptor::shared::<RaceInputsNode>));

#[async_trait]
impl NodeBehavior for RaceInputsNode {
    fn metadata(&self) -> NodeMetadata {
        Self::descriptor()
    }

    fn input_ports(&self, node: &GraphNode, ports: &PortContext<'_>) -> Vec<PortDefinition> {
        let count = ports.variadic_count(&node.id, Self::PORT_INPUT_PREFIX);
        variadic_ports(Self::PORT_INPUT_PREFIX, "Input", count, DataType::ANY)
    }

    fn output_ports(&self, _node: &GraphNode, _ports: &PortContext<'_>) -> Vec<PortDefinition> {
        vec![PortDefinition::optional(Self::PORT_RESULT, "Result", DataType::ANY)]
    }

    fn flow_role(&self) -> FlowRole {
        FlowRole::Race
    }

    async fn process(&self, _node: &GraphNode, inputs: Inputs, context: &NodeContext) -> Result<NodeOutput> {
        let winner = indexed_values(&inputs, Self::PORT_INPUT_PREFIX)
            .into_iter()
            .find(|(_, v)| !v.is_excluded());

        let result = match winner {
            Some((n, value)) => {
                log::debug!("Race {} won by input {}", context.node_id(), n);
                value.clone()
            }
            None => DataValue::excluded(),
        };

        let mut outputs = Outputs::new();
        outputs.insert(Self::PORT_RESULT.to_string(), result);
        Ok(outputs.into())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct AbortGraphConfig {
    pub successfully: bool,
    pub use_successfully_input: bool,
    pub error_message: String,
}

impl Default for AbortGraphConfig {
    fn default() -> Self {
        Self {
            successfully: true,
            use_successfully_input: false,
            error_message: String::new(),
        }
    }
}

/// Stops the graph it runs in, successfully or with an error
///
/// `data` is required so the abort only fires when the branch feeding it
/// is taken.
#[derive(Default)]
pub struct AbortGraphNode;

impl AbortGraphNode {
    pub const PORT_DATA: &'static str = "data";
    pub const PORT_SUCCESSFULLY: &'static str = "successfully";
    pub const DEFAULT_ERROR: &'static str = "Graph aborted with error";
}

impl NodeDescriptor for AbortGraphNode {
    fn descriptor() -> NodeMetadata {
        NodeMetadata::new("abortGraph", NodeCategory::Control, "Abort Graph")
            .with_description("Stops the graph, either as an early successful exit or with an error")
    }
}

inventory::submit!(crate::descriptor::BehaviorFn(crate::descriptor::shared::<AbortGraphNode>));

#[async_trait]
impl NodeBehavior for AbortGraphNode {
    fn metadata(&self) -> NodeMetadata {
        Self::descriptor()
    }

    fn input_ports(&self, node: &GraphNode, _ports: &PortContext<'_>) -> Vec<PortDefinition> {
        let config: AbortGraphConfig = node.config().unwrap_or_default();
        let mut inputs = vec![PortDefinition::required(Self::PORT_DATA, "Data", DataType::ANY).with_default(null_value())];
        if config.use_successfully_input {
            inputs.push(PortDefinition::optional(
                Self::PORT_SUCCESSFULLY,
                "Successfully",
                DataType::BOOLEAN,
            ));
        }
        inputs
    }

    fn output_ports(&self, _node: &GraphNode, _ports: &PortContext<'_>) -> Vec<PortDefinition> {
        Vec::new()
    }

    async fn process(&self, node: &GraphNode, inputs: Inputs, context: &NodeContext) -> Result<NodeOutput> {
        let config: AbortGraphConfig = node.config()?;
        let successfully = match inputs.get(Self::PORT_SUCCESSFULLY) {
            Some(value) if config.use_successfully_input => to_bool(Some(value)),
            _ => config.successfully,
        };

        if successfully {
            context.abort_graph(None);
        } else {
            let message = Some(config.error_message)
                .filter(|m| !m.is_empty())
                .or_else(|| to_string(inputs.get(Self::PORT_DATA)).filter(|m| !m.is_empty()))
                .unwrap_or_else(|| Self::DEFAULT_ERROR.to_string());
            context.abort_graph(Some(message));
        }

        Ok(Outputs::new().into())
    }
}
