//! Graph interface nodes
//!
//! `graphInput` and `graphOutput` nodes declare a graph's inputs and outputs.
//! A sub-graph node derives its ports from them.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::behavior::{FlowRole, GraphInterfacePort, NodeBehavior, NodeOutput, PortContext};
use crate::coerce::coerce_optional;
use crate::context::NodeContext;
use crate::descriptor::{NodeDescriptor, NodeMetadata};
use crate::error::Result;
use crate::types::{GraphNode, Inputs, NodeCategory, Outputs, PortDefinition};
use crate::value::{DataType, DataValue};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct GraphInputConfig {
    pub id: String,
    pub data_type: DataType,
    /// Raw JSON, coerced to `data_type`
    pub default_value: Option<serde_json::Value>,
    pub use_default_value_input: bool,
}

impl Default for GraphInputConfig {
    fn default() -> Self {
        Self {
            id: "input".to_string(),
            data_type: DataType::STRING,
            default_value: None,
            use_default_value_input: false,
        }
    }
}

impl GraphInputConfig {
    fn default_value(&self) -> Option<DataValue> {
        let raw = DataValue::infer(self.default_value.clone()?);
        Some(coerce_optional(Some(&raw), self.data_type).unwrap_or(raw))
    }
}

/// Reads one input of the graph it lives in
#[derive(Default)]
pub struct GraphInputNode;

impl GraphInputNode {
    pub const PORT_DEFAULT: &'static str = "default";
    pub const PORT_DATA: &'static str = "data";
}

impl NodeDescriptor for GraphInputNode {
    fn descriptor() -> NodeMetadata {
        NodeMetadata::new("graphInput", NodeCategory::Input, "Graph Input")
            .with_description("Input value of the graph, with an optional default")
    }
}

inventory::submit!(crate::descriptor::BehaviorFn(crate::descriptor::shared::<GraphInputNode>));

#[async_trait]
impl NodeBehavior for GraphInputNode {
    fn metadata(&self) -> NodeMetadata {
        Self::descriptor()
    }

    fn input_ports(&self, node: &GraphNode, _ports: &PortContext<'_>) -> Vec<PortDefinition> {
        let config: GraphInputConfig = node.config().unwrap_or_default();
        if config.use_default_value_input {
            vec![PortDefinition::optional(Self::PORT_DEFAULT, "Default Value", config.data_type)]
        } else {
            Vec::new()
        }
    }

    fn output_ports(&self, node: &GraphNode, _ports: &PortContext<'_>) -> Vec<PortDefinition> {
        let config: GraphInputConfig = node.config().unwrap_or_default();
        vec![PortDefinition::optional(Self::PORT_DATA, config.id, config.data_type)]
    }

    fn graph_interface(&self, node: &GraphNode) -> Option<GraphInterfacePort> {
        let config: GraphInputConfig = node.config().ok()?;
        Some(GraphInterfacePort::Input {
            default_value: config.default_value(),
            id: config.id,
            data_type: config.data_type,
        })
    }

    async fn process(&self, node: &GraphNode, inputs: Inputs, context: &NodeContext) -> Result<NodeOutput> {
        let config: GraphInputConfig = node.config()?;

        let value = context
            .graph_inputs()
            .get(&config.id)
            .cloned()
            .or_else(|| inputs.get(Self::PORT_DEFAULT).cloned())
            .or_else(|| config.default_value());

        let value = match value {
            Some(value) => coerce_optional(Some(&value), config.data_type).unwrap_or(value),
            None => DataValue::default_for(config.data_type),
        };

        let mut outputs = Outputs::new();
        outputs.insert(Self::PORT_DATA.to_string(), value);
        Ok(outputs.into())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct GraphOutputConfig {
    pub id: String,
    pub data_type: DataType,
}

impl Default for GraphOutputConfig {
    fn default() -> Self {
        Self {
            id: "output".to_string(),
            data_type: DataType::STRING,
        }
    }
}

/// Writes one output of the graph it lives in
///
/// Several output nodes may share an id (one per branch); an excluded value
/// is only written when no branch has produced the output yet.
#[derive(Default)]
pub struct GraphOutputNode;

impl GraphOutputNode {
    pub const PORT_VALUE: &'static str = "value";
    pub const PORT_VALUE_OUTPUT: &'static str = "valueOutput";
}

impl NodeDescriptor for GraphOutputNode {
    fn descriptor() -> NodeMetadata {
        NodeMetadata::new("graphOutput", NodeCategory::Output, "Graph Output")
            .with_description("Output value of the graph")
    }
}

inventory::submit!(crate::descriptor::BehaviorFn(crate::descriptor::shared::<GraphOutputNode>));

#[async_trait]
impl NodeBehavior for GraphOutputNode {
    fn metadata(&self) -> NodeMetadata {
        Self::descriptor()
    }

    fn input_ports(&self, node: &GraphNode, _ports: &PortContext<'_>) -> Vec<PortDefinition> {
        let config: GraphOutputConfig = node.config().unwrap_or_default();
        vec![PortDefinition::required(Self::PORT_VALUE, config.id, config.data_type)]
    }

    fn output_ports(&self, node: &GraphNode, _ports: &PortContext<'_>) -> Vec<PortDefinition> {
        let config: GraphOutputConfig = node.config().unwrap_or_default();
        vec![PortDefinition::optional(Self::PORT_VALUE_OUTPUT, config.id, config.data_type)]
    }

    fn flow_role(&self) -> FlowRole {
        FlowRole::ExcludedConsumer
    }

    fn graph_interface(&self, node: &GraphNode) -> Option<GraphInterfacePort> {
        let config: GraphOutputConfig = node.config().ok()?;
        Some(GraphInterfacePort::Output {
            id: config.id,
            data_type: config.data_type,
        })
    }

    async fn process(&self, node: &GraphNode, inputs: Inputs, context: &NodeContext) -> Result<NodeOutput> {
        let config: GraphOutputConfig = node.config()?;
        let value = inputs
            .get(Self::PORT_VALUE)
            .cloned()
            .unwrap_or_else(DataValue::excluded);

        let value = if value.is_excluded() {
            value
        } else {
            coerce_optional(Some(&value), config.data_type).unwrap_or(value)
        };

        if !value.is_excluded() || context.graph_output(&config.id).is_none() {
            context.set_graph_output(&config.id, value.clone());
        }

        let mut outputs = Outputs::new();
        outputs.insert(Self::PORT_VALUE_OUTPUT.to_string(), value);
        Ok(outputs.into())
    }
}
