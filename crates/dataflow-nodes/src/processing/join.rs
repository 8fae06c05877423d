//! Join Node
//!
//! Joins its inputs into one string. Array inputs contribute each element.

use async_trait::async_trait;
use dataflow_engine::coerce::to_string;
use dataflow_engine::nodes::{indexed_values, variadic_ports};
use dataflow_engine::{
    DataType, DataValue, GraphNode, Inputs, NodeBehavior, NodeCategory, NodeContext, NodeDescriptor,
    NodeMetadata, NodeOutput, Outputs, PortContext, PortDefinition, Result,
};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct JoinConfig {
    pub join_string: String,
    pub use_join_string_input: bool,
}

impl Default for JoinConfig {
    fn default() -> Self {
        Self {
            join_string: "\n".to_string(),
            use_join_string_input: false,
        }
    }
}

/// Joins values with a separator
///
/// # Inputs
/// - `input1..inputN` - values or arrays of values
/// - `joinString` - only when `useJoinStringInput` is set
///
/// # Outputs
/// - `output` - the joined string
#[derive(Default)]
pub struct JoinNode;

impl JoinNode {
    pub const PORT_INPUT_PREFIX: &'static str = "input";
    pub const PORT_JOIN_STRING: &'static str = "joinString";
    pub const PORT_OUTPUT: &'static str = "output";
}

impl NodeDescriptor for JoinNode {
    fn descriptor() -> NodeMetadata {
        NodeMetadata::new("join", NodeCategory::Processing, "Join")
            .with_description("Joins values into a single string")
    }
}

inventory::submit!(dataflow_engine::BehaviorFn(dataflow_engine::shared::<JoinNode>));

/// Flatten `values` and join their string forms; nulls are skipped
pub fn join_values<'a>(values: impl IntoIterator<Item = &'a DataValue>, separator: &str) -> String {
    values
        .into_iter()
        .flat_map(DataValue::elements)
        .filter_map(|v| to_string(Some(&v)))
        .collect::<Vec<_>>()
        .join(separator)
}

#[async_trait]
impl NodeBehavior for JoinNode {
    fn metadata(&self) -> NodeMetadata {
        Self::descriptor()
    }

    fn input_ports(&self, node: &GraphNode, ports: &PortContext<'_>) -> Vec<PortDefinition> {
        let config: JoinConfig = node.config().unwrap_or_default();
        let count = ports.variadic_count(&node.id, Self::PORT_INPUT_PREFIX);
        let mut inputs = variadic_ports(Self::PORT_INPUT_PREFIX, "Input", count, DataType::ANY);
        if config.use_join_string_input {
            inputs.push(PortDefinition::optional(Self::PORT_JOIN_STRING, "Join String", DataType::STRING));
        }
        inputs
    }

    fn output_ports(&self, _node: &GraphNode, _ports: &PortContext<'_>) -> Vec<PortDefinition> {
        vec![PortDefinition::optional(Self::PORT_OUTPUT, "Output", DataType::STRING)]
    }

    async fn process(&self, node: &GraphNode, inputs: Inputs, _context: &NodeContext) -> Result<NodeOutput> {
        let config: JoinConfig = node.config()?;
        let separator = match inputs.get(Self::PORT_JOIN_STRING) {
            Some(value) if config.use_join_string_input => to_string(Some(value)).unwrap_or_default(),
            _ => config.join_string,
        };

        let values = indexed_values(&inputs, Self::PORT_INPUT_PREFIX);
        let joined = join_values(values.into_iter().map(|(_, v)| v), &separator);

        let mut outputs = Outputs::new();
        outputs.insert(Self::PORT_OUTPUT.to_string(), DataValue::String(joined));
        Ok(outputs.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::run_node;

    #[test]
    fn test_join_flattens_arrays() {
        let values = vec![
            DataValue::StringArray(vec!["a".into(), "b".into()]),
            DataValue::Number(3.0),
            DataValue::Any(serde_json::Value::Null),
        ];
        assert_eq!(join_values(&values, ", "), "a, b, 3");
    }

    #[tokio::test]
    async fn test_join_node_in_graph() {
        let outputs = run_node(
            "join",
            serde_json::json!({ "joinString": "-" }),
            vec![
                ("input1", DataValue::string("x")),
                ("input2", DataValue::NumberArray(vec![1.0, 2.0])),
            ],
            &["output"],
        )
        .await
        .unwrap();
        assert_eq!(outputs["output"], DataValue::string("x-1-2"));
    }
}
