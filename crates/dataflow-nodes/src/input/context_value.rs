//! Context Node
//!
//! Reads a value the host passed as `context_values` when starting the run.

use async_trait::async_trait;
use dataflow_engine::coerce::coerce_optional;
use dataflow_engine::{
    DataType, DataValue, GraphNode, Inputs, NodeBehavior, NodeCategory, NodeContext, NodeDescriptor,
    NodeMetadata, NodeOutput, Outputs, PortContext, PortDefinition, Result,
};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ContextConfig {
    pub id: String,
    pub data_type: DataType,
    pub use_default_value_input: bool,
}

impl Default for ContextConfig {
    fn default() -> Self {
        Self {
            id: "input".to_string(),
            data_type: DataType::STRING,
            use_default_value_input: false,
        }
    }
}

/// A run-wide context value
///
/// # Inputs
/// - `default` - only when `useDefaultValueInput` is set
///
/// # Outputs
/// - `data` - the context value, else the default input, else the type's default
#[derive(Default)]
pub struct ContextNode;

impl ContextNode {
    pub const PORT_DEFAULT: &'static str = "default";
    pub const PORT_DATA: &'static str = "data";
}

impl NodeDescriptor for ContextNode {
    fn descriptor() -> NodeMetadata {
        NodeMetadata::new("context", NodeCategory::Input, "Context")
            .with_description("Reads a context value supplied when the run started")
    }
}

inventory::submit!(dataflow_engine::BehaviorFn(dataflow_engine::shared::<ContextNode>));

#[async_trait]
impl NodeBehavior for ContextNode {
    fn metadata(&self) -> NodeMetadata {
        Self::descriptor()
    }

    fn input_ports(&self, node: &GraphNode, _ports: &PortContext<'_>) -> Vec<PortDefinition> {
        let config: ContextConfig = node.config().unwrap_or_default();
        if config.use_default_value_input {
            vec![PortDefinition::optional(Self::PORT_DEFAULT, "Default Value", config.data_type)]
        } else {
            Vec::new()
        }
    }

    fn output_ports(&self, node: &GraphNode, _ports: &PortContext<'_>) -> Vec<PortDefinition> {
        let config: ContextConfig = node.config().unwrap_or_default();
        vec![PortDefinition::optional(Self::PORT_DATA, config.id, config.data_type)]
    }

    async fn process(&self, node: &GraphNode, inputs: Inputs, context: &NodeContext) -> Result<NodeOutput> {
        let config: ContextConfig = node.config()?;

        let value = context
            .context_value(&config.id)
            .or_else(|| inputs.get(Self::PORT_DEFAULT).cloned());
        let value = value
            .as_ref()
            .and_then(|v| coerce_optional(Some(v), config.data_type))
            .unwrap_or_else(|| DataValue::default_for(config.data_type));

        let mut outputs = Outputs::new();
        outputs.insert(Self::PORT_DATA.to_string(), value);
        Ok(outputs.into())
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::sync::Arc;

    use dataflow_engine::{GraphBuilder, GraphProcessor, NodeRegistry, ProcessContext, ProjectBuilder};

    use super::*;

    async fn run_with(context_values: HashMap<String, DataValue>) -> DataValue {
        crate::testing::init();
        let graph = GraphBuilder::new("main", "Main")
            .add_node("ctx", "context")
            .with_data(serde_json::json!({ "id": "user", "dataType": "string" }))
            .add_node("out", "graphOutput")
            .with_data(serde_json::json!({ "id": "user", "dataType": "string" }))
            .connect("ctx", "data", "out", "value")
            .build();
        let project = ProjectBuilder::new("p", "P").graph(graph).build();
        let processor =
            GraphProcessor::new(Arc::new(project), None, Arc::new(NodeRegistry::with_builtins())).unwrap();

        let outputs = processor
            .process_graph(ProcessContext::new(), HashMap::new(), context_values)
            .await
            .unwrap();
        outputs["user"].clone()
    }

    #[tokio::test]
    async fn test_reads_context_value() {
        let mut values = HashMap::new();
        values.insert("user".to_string(), DataValue::Number(12.0));
        assert_eq!(run_with(values).await, DataValue::string("12"));
    }

    #[tokio::test]
    async fn test_missing_context_value_uses_type_default() {
        assert_eq!(run_with(HashMap::new()).await, DataValue::string(""));
    }
}
