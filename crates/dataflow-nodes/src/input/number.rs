//! Number and Boolean Nodes
//!
//! Constants configured on the node, optionally overridden by an input.

use async_trait::async_trait;
use dataflow_engine::coerce::{to_bool, to_number};
use dataflow_engine::{
    DataType, DataValue, GraphNode, Inputs, NodeBehavior, NodeCategory, NodeContext, NodeDescriptor,
    NodeMetadata, NodeOutput, Outputs, PortContext, PortDefinition, Result,
};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct NumberConfig {
    pub value: f64,
    pub use_value_input: bool,
}

/// A number constant
///
/// # Inputs
/// - `input` - only when `useValueInput` is set; overrides the configured value
///
/// # Outputs
/// - `value` - the input read as a number, else the configured value
#[derive(Default)]
pub struct NumberNode;

impl NumberNode {
    pub const PORT_INPUT: &'static str = "input";
    pub const PORT_VALUE: &'static str = "value";
}

impl NodeDescriptor for NumberNode {
    fn descriptor() -> NodeMetadata {
        NodeMetadata::new("number", NodeCategory::Input, "Number").with_description("A number constant")
    }
}

inventory::submit!(dataflow_engine::BehaviorFn(dataflow_engine::shared::<NumberNode>));

#[async_trait]
impl NodeBehavior for NumberNode {
    fn metadata(&self) -> NodeMetadata {
        Self::descriptor()
    }

    fn input_ports(&self, node: &GraphNode, _ports: &PortContext<'_>) -> Vec<PortDefinition> {
        let config: NumberConfig = node.config().unwrap_or_default();
        if config.use_value_input {
            vec![PortDefinition::optional(Self::PORT_INPUT, "Value", DataType::NUMBER).or_type(DataType::STRING)]
        } else {
            Vec::new()
        }
    }

    fn output_ports(&self, _node: &GraphNode, _ports: &PortContext<'_>) -> Vec<PortDefinition> {
        vec![PortDefinition::optional(Self::PORT_VALUE, "Value", DataType::NUMBER)]
    }

    async fn process(&self, node: &GraphNode, inputs: Inputs, _context: &NodeContext) -> Result<NodeOutput> {
        let config: NumberConfig = node.config()?;
        let value = if config.use_value_input {
            to_number(inputs.get(Self::PORT_INPUT)).unwrap_or(config.value)
        } else {
            config.value
        };

        let mut outputs = Outputs::new();
        outputs.insert(Self::PORT_VALUE.to_string(), DataValue::Number(value));
        Ok(outputs.into())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct BooleanConfig {
    pub value: bool,
    pub use_value_input: bool,
}

/// A boolean constant
///
/// # Inputs
/// - `input` - only when `useValueInput` is set; read for truthiness
///
/// # Outputs
/// - `value`
#[derive(Default)]
pub struct BooleanNode;

impl BooleanNode {
    pub const PORT_INPUT: &'static str = "input";
    pub const PORT_VALUE: &'static str = "value";
}

impl NodeDescriptor for BooleanNode {
    fn descriptor() -> NodeMetadata {
        NodeMetadata::new("boolean", NodeCategory::Input, "Bool").with_description("A boolean constant")
    }
}

inventory::submit!(dataflow_engine::BehaviorFn(dataflow_engine::shared::<BooleanNode>));

#[async_trait]
impl NodeBehavior for BooleanNode {
    fn metadata(&self) -> NodeMetadata {
        Self::descriptor()
    }

    fn input_ports(&self, node: &GraphNode, _ports: &PortContext<'_>) -> Vec<PortDefinition> {
        let config: BooleanConfig = node.config().unwrap_or_default();
        if config.use_value_input {
            vec![PortDefinition::optional(Self::PORT_INPUT, "Value", DataType::ANY)]
        } else {
            Vec::new()
        }
    }

    fn output_ports(&self, _node: &GraphNode, _ports: &PortContext<'_>) -> Vec<PortDefinition> {
        vec![PortDefinition::optional(Self::PORT_VALUE, "Value", DataType::BOOLEAN)]
    }

    async fn process(&self, node: &GraphNode, inputs: Inputs, _context: &NodeContext) -> Result<NodeOutput> {
        let config: BooleanConfig = node.config()?;
        let value = match inputs.get(Self::PORT_INPUT) {
            Some(input) if config.use_value_input => to_bool(Some(input)),
            _ => config.value,
        };

        let mut outputs = Outputs::new();
        outputs.insert(Self::PORT_VALUE.to_string(), DataValue::Boolean(value));
        Ok(outputs.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::run_node;

    #[tokio::test]
    async fn test_number_constant() {
        let outputs = run_node("number", serde_json::json!({ "value": 7.5 }), vec![], &["value"])
            .await
            .unwrap();
        assert_eq!(outputs["value"], DataValue::Number(7.5));
    }

    #[tokio::test]
    async fn test_number_input_falls_back_on_parse_failure() {
        let data = serde_json::json!({ "value": 2, "useValueInput": true });

        let parsed = run_node("number", data.clone(), vec![("input", DataValue::string("41.5kg"))], &["value"])
            .await
            .unwrap();
        assert_eq!(parsed["value"], DataValue::Number(41.5));

        let fallback = run_node("number", data, vec![("input", DataValue::string("n/a"))], &["value"])
            .await
            .unwrap();
        assert_eq!(fallback["value"], DataValue::Number(2.0));
    }

    #[tokio::test]
    async fn test_boolean_input_truthiness() {
        let data = serde_json::json!({ "value": true, "useValueInput": true });
        let outputs = run_node("boolean", data, vec![("input", DataValue::string("false"))], &["value"])
            .await
            .unwrap();
        assert_eq!(outputs["value"], DataValue::Boolean(false));
    }
}
