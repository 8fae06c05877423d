//! Delay Node
//!
//! Waits for a fixed time, then passes its inputs through. The wait ends
//! early when the run is aborted.

use std::time::Duration;

use async_trait::async_trait;
use dataflow_engine::nodes::{indexed_values, variadic_ports};
use dataflow_engine::{
    DataType, EngineError, GraphNode, Inputs, NodeBehavior, NodeCategory, NodeContext, NodeDescriptor,
    NodeMetadata, NodeOutput, Outputs, PortContext, PortDefinition, Result,
};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct DelayConfig {
    /// Milliseconds
    pub delay: u64,
}

/// Delays values
///
/// # Inputs
/// - `input1..inputN`
///
/// # Outputs
/// - `output1..outputN` - the matching inputs, unchanged
#[derive(Default)]
pub struct DelayNode;

impl DelayNode {
    pub const PORT_INPUT_PREFIX: &'static str = "input";
    pub const PORT_OUTPUT_PREFIX: &'static str = "output";
}

impl NodeDescriptor for DelayNode {
    fn descriptor() -> NodeMetadata {
        NodeMetadata::new("delay", NodeCategory::Control, "Delay")
            .with_description("Waits before passing its inputs through")
    }
}

inventory::submit!(dataflow_engine::BehaviorFn(dataflow_engine::shared::<DelayNode>));

#[async_trait]
impl NodeBehavior for DelayNode {
    fn metadata(&self) -> NodeMetadata {
        Self::descriptor()
    }

    fn input_ports(&self, node: &GraphNode, ports: &PortContext<'_>) -> Vec<PortDefinition> {
        let count = ports.variadic_count(&node.id, Self::PORT_INPUT_PREFIX);
        variadic_ports(Self::PORT_INPUT_PREFIX, "Input", count, DataType::ANY)
    }

    fn output_ports(&self, node: &GraphNode, ports: &PortContext<'_>) -> Vec<PortDefinition> {
        let count = ports.variadic_count(&node.id, Self::PORT_INPUT_PREFIX);
        variadic_ports(Self::PORT_OUTPUT_PREFIX, "Output", count.saturating_sub(1).max(1), DataType::ANY)
    }

    async fn process(&self, node: &GraphNode, inputs: Inputs, context: &NodeContext) -> Result<NodeOutput> {
        let config: DelayConfig = node.config()?;
        log::debug!("Delaying node {} for {}ms", node.id, config.delay);

        tokio::select! {
            _ = tokio::time::sleep(Duration::from_millis(config.delay)) => {}
            _ = context.signal().cancelled() => return Err(EngineError::Cancelled),
        }

        let outputs: Outputs = indexed_values(&inputs, Self::PORT_INPUT_PREFIX)
            .into_iter()
            .map(|(n, v)| (format!("{}{}", Self::PORT_OUTPUT_PREFIX, n), v.clone()))
            .collect();
        Ok(outputs.into())
    }
}
