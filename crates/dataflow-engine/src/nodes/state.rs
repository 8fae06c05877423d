//! Run-wide state: user events and global variables
//!
//! Events and globals are shared by every graph of a run, including
//! sub-graphs, which makes them the way for parallel branches to talk.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use super::null_value;
use crate::behavior::{NodeBehavior, NodeOutput, PortContext};
use crate::coerce::{coerce_optional, to_string};
use crate::context::NodeContext;
use crate::descriptor::{NodeDescriptor, NodeMetadata};
use crate::error::{EngineError, Result};
use crate::types::{GraphNode, Inputs, NodeCategory, Outputs, PortDefinition};
use crate::value::{DataType, DataValue};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct EventConfig {
    pub event_name: String,
    pub use_event_name_input: bool,
}

impl Default for EventConfig {
    fn default() -> Self {
        Self {
            event_name: "continue".to_string(),
            use_event_name_input: false,
        }
    }
}

impl EventConfig {
    const PORT_EVENT_NAME: &'static str = "eventName";

    fn name_port(&self) -> Option<PortDefinition> {
        self.use_event_name_input
            .then(|| PortDefinition::required(Self::PORT_EVENT_NAME, "Event Name", DataType::STRING))
    }

    fn resolve_name(&self, inputs: &Inputs) -> String {
        if self.use_event_name_input {
            if let Some(name) = to_string(inputs.get(Self::PORT_EVENT_NAME)) {
                return name;
            }
        }
        self.event_name.clone()
    }
}

/// Suspends until a named user event is raised
///
/// Only this node's task waits; the rest of the graph keeps running.
#[derive(Default)]
pub struct WaitForEventNode;

impl WaitForEventNode {
    pub const PORT_INPUT_DATA: &'static str = "inputData";
    pub const PORT_OUTPUT_DATA: &'static str = "outputData";
    pub const PORT_EVENT_DATA: &'static str = "eventData";
}

impl NodeDescriptor for WaitForEventNode {
    fn descriptor() -> NodeMetadata {
        NodeMetadata::new("waitForEvent", NodeCategory::State, "Wait For Event")
            .with_description("Waits until a named event is raised, then passes its input through")
    }
}

inventory::submit!(crate::descriptor::BehaviorFn(crate::descriptor::shared::<WaitForEventNode>));

#[async_trait]
impl NodeBehavior for WaitForEventNode {
    fn metadata(&self) -> NodeMetadata {
        Self::descriptor()
    }

    fn input_ports(&self, node: &GraphNode, _ports: &PortContext<'_>) -> Vec<PortDefinition> {
        let config: EventConfig = node.config().unwrap_or_default();
        let mut inputs = vec![PortDefinition::optional(Self::PORT_INPUT_DATA, "Data", DataType::ANY)];
        inputs.extend(config.name_port());
        inputs
    }

    fn output_ports(&self, _node: &GraphNode, _ports: &PortContext<'_>) -> Vec<PortDefinition> {
        vec![
            PortDefinition::optional(Self::PORT_OUTPUT_DATA, "Data", DataType::ANY),
            PortDefinition::optional(Self::PORT_EVENT_DATA, "Event Data", DataType::ANY),
        ]
    }

    async fn process(&self, node: &GraphNode, inputs: Inputs, context: &NodeContext) -> Result<NodeOutput> {
        let config: EventConfig = node.config()?;
        let name = config.resolve_name(&inputs);

        log::debug!("Node {} waiting for event '{}'", context.node_id(), name);
        let event_data = context.wait_event(&name).await?;

        let mut outputs = Outputs::new();
        outputs.insert(
            Self::PORT_OUTPUT_DATA.to_string(),
            inputs.get(Self::PORT_INPUT_DATA).cloned().unwrap_or_else(null_value),
        );
        outputs.insert(Self::PORT_EVENT_DATA.to_string(), event_data.unwrap_or_else(null_value));
        Ok(outputs.into())
    }
}

/// Raises a named user event for every waiting node of the run
#[derive(Default)]
pub struct RaiseEventNode;

impl RaiseEventNode {
    pub const PORT_DATA: &'static str = "data";
    pub const PORT_RESULT: &'static str = "result";
}

impl NodeDescriptor for RaiseEventNode {
    fn descriptor() -> NodeMetadata {
        NodeMetadata::new("raiseEvent", NodeCategory::State, "Raise Event")
            .with_description("Raises a named event carrying its input")
    }
}

inventory::submit!(crate::descriptor::BehaviorFn(crate::descriptor::shared::<RaiseEventNode>));

#[async_trait]
impl NodeBehavior for RaiseEventNode {
    fn metadata(&self) -> NodeMetadata {
        Self::descriptor()
    }

    fn input_ports(&self, node: &GraphNode, _ports: &PortContext<'_>) -> Vec<PortDefinition> {
        let config: EventConfig = node.config().unwrap_or_default();
        let mut inputs = vec![PortDefinition::optional(Self::PORT_DATA, "Data", DataType::ANY)];
        inputs.extend(config.name_port());
        inputs
    }

    fn output_ports(&self, _node: &GraphNode, _ports: &PortContext<'_>) -> Vec<PortDefinition> {
        vec![PortDefinition::optional(Self::PORT_RESULT, "Result", DataType::ANY)]
    }

    async fn process(&self, node: &GraphNode, inputs: Inputs, context: &NodeContext) -> Result<NodeOutput> {
        let config: EventConfig = node.config()?;
        let name = config.resolve_name(&inputs);
        let data = inputs.get(Self::PORT_DATA).cloned();

        context.raise_event(&name, data.clone());

        let mut outputs = Outputs::new();
        outputs.insert(Self::PORT_RESULT.to_string(), data.unwrap_or_else(null_value));
        Ok(outputs.into())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct GlobalConfig {
    pub id: String,
    pub data_type: DataType,
    /// Suspend until the global is set instead of reading a default
    pub wait: bool,
    pub use_id_input: bool,
}

impl Default for GlobalConfig {
    fn default() -> Self {
        Self {
            id: "variable".to_string(),
            data_type: DataType::STRING,
            wait: false,
            use_id_input: false,
        }
    }
}

impl GlobalConfig {
    const PORT_ID: &'static str = "id";

    fn id_port(&self) -> Option<PortDefinition> {
        self.use_id_input
            .then(|| PortDefinition::required(Self::PORT_ID, "Variable ID", DataType::STRING))
    }

    fn resolve_id(&self, inputs: &Inputs) -> Result<String> {
        let id = if self.use_id_input {
            to_string(inputs.get(Self::PORT_ID)).unwrap_or_default()
        } else {
            self.id.clone()
        };
        if id.is_empty() {
            return Err(EngineError::failed("Variable ID is required"));
        }
        Ok(id)
    }
}

/// Reads a global variable
#[derive(Default)]
pub struct GetGlobalNode;

impl GetGlobalNode {
    pub const PORT_VALUE: &'static str = "value";
}

impl NodeDescriptor for GetGlobalNode {
    fn descriptor() -> NodeMetadata {
        NodeMetadata::new("getGlobal", NodeCategory::State, "Get Global")
            .with_description("Reads a global variable, optionally waiting until it is set")
    }
}

inventory::submit!(crate::descriptor::BehaviorFn(crate::descriptor::shared::<GetGlobalNode>));

#[async_trait]
impl NodeBehavior for GetGlobalNode {
    fn metadata(&self) -> NodeMetadata {
        Self::descriptor()
    }

    fn input_ports(&self, node: &GraphNode, _ports: &PortContext<'_>) -> Vec<PortDefinition> {
        let config: GlobalConfig = node.config().unwrap_or_default();
        config.id_port().into_iter().collect()
    }

    fn output_ports(&self, node: &GraphNode, _ports: &PortContext<'_>) -> Vec<PortDefinition> {
        let config: GlobalConfig = node.config().unwrap_or_default();
        vec![PortDefinition::optional(Self::PORT_VALUE, "Value", config.data_type)]
    }

    async fn process(&self, node: &GraphNode, inputs: Inputs, context: &NodeContext) -> Result<NodeOutput> {
        let config: GlobalConfig = node.config()?;
        let id = config.resolve_id(&inputs)?;

        let value = if config.wait {
            context.wait_for_global(&id).await?
        } else {
            context
                .get_global(&id)
                .unwrap_or_else(|| DataValue::default_for(config.data_type))
        };
        let value = coerce_optional(Some(&value), config.data_type).unwrap_or(value);

        let mut outputs = Outputs::new();
        outputs.insert(Self::PORT_VALUE.to_string(), value);
        Ok(outputs.into())
    }
}

/// Writes a global variable (last write wins)
#[derive(Default)]
pub struct SetGlobalNode;

impl SetGlobalNode {
    pub const PORT_VALUE: &'static str = "value";
    pub const PORT_SAVED_VALUE: &'static str = "saved-value";
    pub const PORT_PREVIOUS_VALUE: &'static str = "previous-value";
    pub const PORT_VARIABLE_ID: &'static str = "variable_id_out";
}

impl NodeDescriptor for SetGlobalNode {
    fn descriptor() -> NodeMetadata {
        NodeMetadata::new("setGlobal", NodeCategory::State, "Set Global")
            .with_description("Stores a value in a global variable")
    }
}

inventory::submit!(crate::descriptor::BehaviorFn(crate::descriptor::shared::<SetGlobalNode>));

#[async_trait]
impl NodeBehavior for SetGlobalNode {
    fn metadata(&self) -> NodeMetadata {
        Self::descriptor()
    }

    fn input_ports(&self, node: &GraphNode, _ports: &PortContext<'_>) -> Vec<PortDefinition> {
        let config: GlobalConfig = node.config().unwrap_or_default();
        let mut inputs = vec![PortDefinition::required(Self::PORT_VALUE, "Value", config.data_type)];
        inputs.extend(config.id_port());
        inputs
    }

    fn output_ports(&self, node: &GraphNode, _ports: &PortContext<'_>) -> Vec<PortDefinition> {
        let config: GlobalConfig = node.config().unwrap_or_default();
        vec![
            PortDefinition::optional(Self::PORT_SAVED_VALUE, "Saved Value", config.data_type),
            PortDefinition::optional(Self::PORT_PREVIOUS_VALUE, "Previous Value", config.data_type),
            PortDefinition::optional(Self::PORT_VARIABLE_ID, "Variable ID", DataType::STRING),
        ]
    }

    async fn process(&self, node: &GraphNode, inputs: Inputs, context: &NodeContext) -> Result<NodeOutput> {
        let config: GlobalConfig = node.config()?;
        let id = config.resolve_id(&inputs)?;
        let value = inputs.get(Self::PORT_VALUE).cloned().unwrap_or_else(null_value);
        let value = coerce_optional(Some(&value), config.data_type).unwrap_or(value);

        let previous = context
            .set_global(&id, value.clone())
            .unwrap_or_else(|| DataValue::default_for(config.data_type));

        let mut outputs = Outputs::new();
        outputs.insert(Self::PORT_SAVED_VALUE.to_string(), value);
        outputs.insert(Self::PORT_PREVIOUS_VALUE.to_string(), previous);
        outputs.insert(Self::PORT_VARIABLE_ID.to_string(), DataValue::String(id));
        Ok(outputs.into())
    }
}
