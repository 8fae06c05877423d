//! Asks the host for input and suspends until it answers

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::behavior::{NodeBehavior, NodeOutput, PortContext};
use crate::coerce::coerce_optional;
use crate::context::NodeContext;
use crate::descriptor::{NodeDescriptor, NodeMetadata};
use crate::error::Result;
use crate::types::{GraphNode, Inputs, NodeCategory, Outputs, PortDefinition};
use crate::value::{DataType, DataValue};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct UserInputConfig {
    pub prompt: String,
    /// Take the questions from the `questions` input instead of the prompt
    pub use_input: bool,
}

/// Emits a `userInput` event and waits for `GraphProcessor::user_input`
#[derive(Default)]
pub struct UserInputNode;

impl UserInputNode {
    pub const PORT_QUESTIONS: &'static str = "questions";
    pub const PORT_OUTPUT: &'static str = "output";
}

impl NodeDescriptor for UserInputNode {
    fn descriptor() -> NodeMetadata {
        NodeMetadata::new("userInput", NodeCategory::Input, "User Input")
            .with_description("Pauses this branch until the user answers")
    }
}

inventory::submit!(crate::descriptor::BehaviorFn(crate::descriptor::shared::<UserInputNode>));

#[async_trait]
impl NodeBehavior for UserInputNode {
    fn metadata(&self) -> NodeMetadata {
        Self::descriptor()
    }

    fn input_ports(&self, node: &GraphNode, _ports: &PortContext<'_>) -> Vec<PortDefinition> {
        let config: UserInputConfig = node.config().unwrap_or_default();
        if config.use_input {
            vec![PortDefinition::required(Self::PORT_QUESTIONS, "Questions", DataType::STRING_ARRAY)]
        } else {
            Vec::new()
        }
    }

    fn output_ports(&self, _node: &GraphNode, _ports: &PortContext<'_>) -> Vec<PortDefinition> {
        vec![PortDefinition::optional(Self::PORT_OUTPUT, "Answers", DataType::STRING_ARRAY)]
    }

    async fn process(&self, node: &GraphNode, inputs: Inputs, context: &NodeContext) -> Result<NodeOutput> {
        let config: UserInputConfig = node.config()?;

        let mut request = Inputs::new();
        if config.use_input {
            if let Some(questions) = coerce_optional(inputs.get(Self::PORT_QUESTIONS), DataType::STRING_ARRAY) {
                request.insert(Self::PORT_QUESTIONS.to_string(), questions);
            }
        }
        let prompt = Some(config.prompt).filter(|p| !p.is_empty());

        let answers = context.request_user_input(request, prompt).await?;

        let mut outputs = Outputs::new();
        outputs.insert(Self::PORT_OUTPUT.to_string(), DataValue::StringArray(answers));
        Ok(outputs.into())
    }
}
