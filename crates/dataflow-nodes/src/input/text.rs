//! Text Node
//!
//! A text template. Every `{{name}}` token in the template becomes an
//! optional string input, and the node outputs the template with each token
//! replaced by its input.

use async_trait::async_trait;
use dataflow_engine::coerce::to_string;
use dataflow_engine::{
    GraphNode, Inputs, NodeBehavior, NodeCategory, NodeContext, NodeDescriptor, NodeMetadata, NodeOutput,
    Outputs, PortContext, PortDefinition, Result,
};
use dataflow_engine::{DataType, DataValue};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct TextConfig {
    pub text: String,
}

impl Default for TextConfig {
    fn default() -> Self {
        Self {
            text: "{{input}}".to_string(),
        }
    }
}

/// Interpolated text
///
/// # Inputs
/// - one optional string input per distinct `{{name}}` token
///
/// # Outputs
/// - `output` - the template with tokens replaced; unconnected tokens become empty
#[derive(Default)]
pub struct TextNode;

impl TextNode {
    pub const PORT_OUTPUT: &'static str = "output";
}

impl NodeDescriptor for TextNode {
    fn descriptor() -> NodeMetadata {
        NodeMetadata::new("text", NodeCategory::Input, "Text")
            .with_description("Text with {{input}} placeholders filled from its inputs")
    }
}

inventory::submit!(dataflow_engine::BehaviorFn(dataflow_engine::shared::<TextNode>));

/// Byte ranges and trimmed names of the `{{name}}` tokens in a template
fn tokens(template: &str) -> Vec<(usize, usize, &str)> {
    let mut found = Vec::new();
    let mut offset = 0;
    while let Some(start) = template[offset..].find("{{") {
        let start = offset + start;
        let Some(len) = template[start + 2..].find("}}") else {
            break;
        };
        let end = start + 2 + len + 2;
        let name = template[start + 2..end - 2].trim();
        if !name.is_empty() && !name.contains('{') {
            found.push((start, end, name));
            offset = end;
        } else {
            offset = start + 2;
        }
    }
    found
}

/// Distinct token names in order of first appearance
pub fn template_inputs(template: &str) -> Vec<String> {
    let mut names: Vec<String> = Vec::new();
    for (_, _, name) in tokens(template) {
        if !names.iter().any(|n| n == name) {
            names.push(name.to_string());
        }
    }
    names
}

/// Replace every token with its value; missing values become empty
pub fn interpolate(template: &str, inputs: &Inputs) -> String {
    let mut result = String::with_capacity(template.len());
    let mut last = 0;
    for (start, end, name) in tokens(template) {
        result.push_str(&template[last..start]);
        if let Some(value) = to_string(inputs.get(name)) {
            result.push_str(&value);
        }
        last = end;
    }
    result.push_str(&template[last..]);
    result
}

#[async_trait]
impl NodeBehavior for TextNode {
    fn metadata(&self) -> NodeMetadata {
        Self::descriptor()
    }

    fn input_ports(&self, node: &GraphNode, _ports: &PortContext<'_>) -> Vec<PortDefinition> {
        let config: TextConfig = node.config().unwrap_or_default();
        template_inputs(&config.text)
            .into_iter()
            .map(|name| PortDefinition::optional(name.clone(), name, DataType::STRING))
            .collect()
    }

    fn output_ports(&self, _node: &GraphNode, _ports: &PortContext<'_>) -> Vec<PortDefinition> {
        vec![PortDefinition::optional(Self::PORT_OUTPUT, "Output", DataType::STRING)]
    }

    async fn process(&self, node: &GraphNode, inputs: Inputs, _context: &NodeContext) -> Result<NodeOutput> {
        let config: TextConfig = node.config()?;
        let text = interpolate(&config.text, &inputs);
        log::trace!("Text node {} produced {} bytes", node.id, text.len());

        let mut outputs = Outputs::new();
        outputs.insert(Self::PORT_OUTPUT.to_string(), DataValue::String(text));
        Ok(outputs.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::run_node;

    #[test]
    fn test_template_inputs_are_distinct_and_trimmed() {
        assert_eq!(
            template_inputs("{{ name }} and {{other}} and {{name}}"),
            vec!["name".to_string(), "other".to_string()]
        );
        assert!(template_inputs("no tokens {{}} here").is_empty());
    }

    #[test]
    fn test_interpolate_missing_becomes_empty() {
        let mut inputs = Inputs::new();
        inputs.insert("name".into(), DataValue::string("Ada"));
        inputs.insert("count".into(), DataValue::Number(3.0));

        assert_eq!(interpolate("Hi {{name}}, {{count}} {{missing}}!", &inputs), "Hi Ada, 3 !");
    }

    #[tokio::test]
    async fn test_text_node_in_graph() {
        let outputs = run_node(
            "text",
            serde_json::json!({ "text": "Hello, {{name}}!" }),
            vec![("name", DataValue::string("world"))],
            &["output"],
        )
        .await
        .unwrap();

        assert_eq!(outputs["output"], DataValue::string("Hello, world!"));
    }
}
