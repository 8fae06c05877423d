//! External Call Node
//!
//! Calls a function the host registered with
//! `GraphProcessor::set_external_function`.

use async_trait::async_trait;
use dataflow_engine::coerce::to_string;
use dataflow_engine::{
    DataType, DataValue, EngineError, GraphNode, Inputs, NodeBehavior, NodeCategory, NodeContext,
    NodeDescriptor, NodeMetadata, NodeOutput, Outputs, PortContext, PortDefinition, Result,
};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ExternalCallConfig {
    pub function_name: String,
    pub use_function_name_input: bool,
    pub use_error_output: bool,
}

/// Calls a host function
///
/// # Inputs
/// - `functionName` - only when `useFunctionNameInput` is set
/// - `arguments` - a single argument, or an array spread into several
///
/// # Outputs
/// - `result` - the function's return value; excluded on error with `useErrorOutput`
/// - `error` - only when `useErrorOutput` is set; the error message, excluded on success
#[derive(Default)]
pub struct ExternalCallNode;

impl ExternalCallNode {
    pub const PORT_FUNCTION_NAME: &'static str = "functionName";
    pub const PORT_ARGUMENTS: &'static str = "arguments";
    pub const PORT_RESULT: &'static str = "result";
    pub const PORT_ERROR: &'static str = "error";
}

impl NodeDescriptor for ExternalCallNode {
    fn descriptor() -> NodeMetadata {
        NodeMetadata::new("externalCall", NodeCategory::Host, "External Call")
            .with_description("Calls a function provided by the host")
    }
}

inventory::submit!(dataflow_engine::BehaviorFn(dataflow_engine::shared::<ExternalCallNode>));

fn arguments(value: Option<&DataValue>) -> Vec<DataValue> {
    match value {
        None => Vec::new(),
        Some(DataValue::Any(serde_json::Value::Null)) => Vec::new(),
        Some(value) if value.is_array() => value.elements(),
        Some(value) => vec![value.clone()],
    }
}

#[async_trait]
impl NodeBehavior for ExternalCallNode {
    fn metadata(&self) -> NodeMetadata {
        Self::descriptor()
    }

    fn input_ports(&self, node: &GraphNode, _ports: &PortContext<'_>) -> Vec<PortDefinition> {
        let config: ExternalCallConfig = node.config().unwrap_or_default();
        let mut inputs = Vec::new();
        if config.use_function_name_input {
            inputs.push(PortDefinition::required(Self::PORT_FUNCTION_NAME, "Function Name", DataType::STRING));
        }
        inputs.push(PortDefinition::optional(Self::PORT_ARGUMENTS, "Arguments", DataType::ANY));
        inputs
    }

    fn output_ports(&self, node: &GraphNode, _ports: &PortContext<'_>) -> Vec<PortDefinition> {
        let config: ExternalCallConfig = node.config().unwrap_or_default();
        let mut outputs = vec![PortDefinition::optional(Self::PORT_RESULT, "Result", DataType::ANY)];
        if config.use_error_output {
            outputs.push(PortDefinition::optional(Self::PORT_ERROR, "Error", DataType::STRING));
        }
        outputs
    }

    async fn process(&self, node: &GraphNode, inputs: Inputs, context: &NodeContext) -> Result<NodeOutput> {
        let config: ExternalCallConfig = node.config()?;
        let name = if config.use_function_name_input {
            to_string(inputs.get(Self::PORT_FUNCTION_NAME)).unwrap_or_default()
        } else {
            config.function_name.clone()
        };
        if name.is_empty() {
            return Err(EngineError::failed("Function name is required"));
        }

        let args = arguments(inputs.get(Self::PORT_ARGUMENTS));
        log::debug!("Node {} calling external function {} with {} args", node.id, name, args.len());

        let mut outputs = Outputs::new();
        match context.call_external(&name, args).await {
            Ok(value) => {
                outputs.insert(Self::PORT_RESULT.to_string(), value);
                if config.use_error_output {
                    outputs.insert(Self::PORT_ERROR.to_string(), DataValue::excluded());
                }
            }
            Err(EngineError::Cancelled) => return Err(EngineError::Cancelled),
            Err(e) if config.use_error_output => {
                log::warn!("External function {} failed: {}", name, e);
                outputs.insert(Self::PORT_RESULT.to_string(), DataValue::excluded());
                outputs.insert(Self::PORT_ERROR.to_string(), DataValue::String(e.to_string()));
            }
            Err(e) => return Err(e),
        }
        Ok(outputs.into())
    }
}

#[cfg(test)]
mod tests {
    use dataflow_engine::external_function;
    use tokio_test::{assert_err, assert_ok};

    use super::*;
    use crate::testing::{run_node, run_node_with};

    #[test]
    fn test_array_arguments_are_spread() {
        let args = arguments(Some(&DataValue::NumberArray(vec![1.0, 2.0])));
        assert_eq!(args, vec![DataValue::Number(1.0), DataValue::Number(2.0)]);
        assert!(arguments(None).is_empty());
    }

    #[tokio::test]
    async fn test_calls_registered_function() {
        let outputs = run_node_with(
            "externalCall",
            serde_json::json!({ "functionName": "sum" }),
            vec![("arguments", DataValue::NumberArray(vec![1.0, 2.0, 3.5]))],
            &["result"],
            |processor| {
                processor.set_external_function(
                    "sum",
                    external_function(|args| async move {
                        let total: f64 = args
                            .iter()
                            .filter_map(|v| dataflow_engine::coerce::to_number(Some(v)))
                            .sum();
                        Ok(DataValue::Number(total))
                    }),
                );
                processor
            },
        )
        .await
        .unwrap();

        assert_eq!(outputs["result"], DataValue::Number(6.5));
    }

    #[tokio::test]
    async fn test_builtin_echo() {
        let outputs = assert_ok!(
            run_node(
                "externalCall",
                serde_json::json!({ "functionName": "echo" }),
                vec![("arguments", DataValue::string("ping"))],
                &["result"],
            )
            .await
        );
        assert_eq!(outputs["result"], DataValue::string("ping"));
    }

    #[tokio::test]
    async fn test_unknown_function_routes_to_error_output() {
        let outputs = run_node(
            "externalCall",
            serde_json::json!({ "functionName": "missing", "useErrorOutput": true }),
            vec![],
            &["error"],
        )
        .await
        .unwrap();
        assert_eq!(
            outputs["error"],
            DataValue::string("External function 'missing' is not registered")
        );
    }

    #[tokio::test]
    async fn test_unknown_function_fails_node() {
        let err = assert_err!(
            run_node(
                "externalCall",
                serde_json::json!({ "functionName": "missing" }),
                vec![],
                &["result"],
            )
            .await
        );
        assert!(err.to_string().contains("is not registered"));
    }
}
