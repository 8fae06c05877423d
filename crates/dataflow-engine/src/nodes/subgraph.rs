//! Sub-graph delegation
//!
//! A `subGraph` node runs another graph of the project with its own node
//! state table. Ports mirror the target graph's `graphInput` and
//! `graphOutput` nodes.

use std::collections::HashMap;
use std::time::Instant;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::behavior::{NodeBehavior, NodeOutput, PortContext};
use crate::coerce::coerce_optional;
use crate::context::NodeContext;
use crate::descriptor::{NodeDescriptor, NodeMetadata};
use crate::error::{EngineError, Result};
use crate::types::{GraphInputs, GraphNode, Inputs, NodeCategory, Outputs, PortDefinition};
use crate::value::{DataType, DataValue};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct SubGraphConfig {
    pub graph_id: String,
    /// Report failures on the `error` output instead of failing the node
    pub use_error_output: bool,
    /// Values for unconnected inputs, keyed by graph input id
    pub input_data: HashMap<String, serde_json::Value>,
}

#[derive(Default)]
pub struct SubGraphNode;

impl SubGraphNode {
    pub const PORT_DURATION: &'static str = "duration";
    pub const PORT_ERROR: &'static str = "error";
}

impl NodeDescriptor for SubGraphNode {
    fn descriptor() -> NodeMetadata {
        NodeMetadata::new("subGraph", NodeCategory::Control, "Subgraph")
            .with_description("Runs another graph and returns its outputs")
    }
}

inventory::submit!(crate::descriptor::BehaviorFn(crate::descriptor::shared::<SubGraphNode>));

#[async_trait]
impl NodeBehavior for SubGraphNode {
    fn metadata(&self) -> NodeMetadata {
        Self::descriptor()
    }

    fn input_ports(&self, node: &GraphNode, ports: &PortContext<'_>) -> Vec<PortDefinition> {
        let config: SubGraphConfig = node.config().unwrap_or_default();
        let Some(graph) = ports.project.graph(&config.graph_id) else {
            return Vec::new();
        };
        ports
            .registry
            .graph_inputs(graph)
            .into_iter()
            .map(|(id, data_type, _)| PortDefinition::optional(id.clone(), id, data_type))
            .collect()
    }

    fn output_ports(&self, node: &GraphNode, ports: &PortContext<'_>) -> Vec<PortDefinition> {
        let config: SubGraphConfig = node.config().unwrap_or_default();
        let mut outputs: Vec<PortDefinition> = ports
            .project
            .graph(&config.graph_id)
            .map(|graph| ports.registry.graph_outputs(graph))
            .unwrap_or_default()
            .into_iter()
            .map(|(id, data_type)| PortDefinition::optional(id.clone(), id, data_type))
            .collect();

        outputs.push(
            PortDefinition::optional(Self::PORT_DURATION, "Duration", DataType::NUMBER)
                .with_description("Time the sub-graph took, in milliseconds"),
        );
        if config.use_error_output {
            outputs.push(PortDefinition::optional(Self::PORT_ERROR, "Error", DataType::STRING));
        }
        outputs
    }

    async fn process(&self, node: &GraphNode, inputs: Inputs, context: &NodeContext) -> Result<NodeOutput> {
        let config: SubGraphConfig = node.config()?;
        if config.graph_id.is_empty() {
            return Err(EngineError::failed("No graph selected for subgraph"));
        }
        let graph = context
            .project()
            .graph(&config.graph_id)
            .ok_or_else(|| EngineError::GraphNotFound(config.graph_id.clone()))?;

        let interface_inputs = context.registry().graph_inputs(graph);
        let interface_outputs = context.registry().graph_outputs(graph);

        let mut graph_inputs = GraphInputs::new();
        for (id, data_type, _) in &interface_inputs {
            let value = inputs.get(id).cloned().or_else(|| {
                let raw = DataValue::infer(config.input_data.get(id)?.clone());
                Some(coerce_optional(Some(&raw), *data_type).unwrap_or(raw))
            });
            if let Some(value) = value {
                graph_inputs.insert(id.clone(), value);
            }
        }

        log::debug!("Node {} running subgraph '{}'", context.node_id(), config.graph_id);
        let started = Instant::now();
        let result = context
            .create_sub_processor(&config.graph_id)?
            .process_graph(context.process_context(), graph_inputs, HashMap::new())
            .await;
        let duration = DataValue::Number(started.elapsed().as_millis() as f64);

        let mut outputs = Outputs::new();
        match result {
            Ok(mut results) => {
                for (id, _) in &interface_outputs {
                    let value = results.remove(id).unwrap_or_else(DataValue::excluded);
                    outputs.insert(id.clone(), value);
                }
                if config.use_error_output {
                    outputs.insert(Self::PORT_ERROR.to_string(), DataValue::excluded());
                }
            }
            Err(EngineError::Cancelled) => return Err(EngineError::Cancelled),
            Err(e) if config.use_error_output => {
                log::debug!("Subgraph '{}' failed: {}", config.graph_id, e);
                for (id, _) in &interface_outputs {
                    outputs.insert(id.clone(), DataValue::excluded());
                }
                outputs.insert(Self::PORT_ERROR.to_string(), DataValue::String(e.to_string()));
            }
            Err(e) => return Err(e),
        }
        outputs.insert(Self::PORT_DURATION.to_string(), duration);

        Ok(outputs.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::NodeRegistry;
    use crate::types::{NodeGraph, Project};

    fn project() -> Project {
        let mut inner = NodeGraph::new("inner", "Inner");
        let mut input = GraphNode::new("in", "graphInput");
        input.data = serde_json::json!({ "id": "name", "dataType": "string" });
        let mut output = GraphNode::new("out", "graphOutput");
        output.data = serde_json::json!({ "id": "greeting", "dataType": "string" });
        inner.nodes = vec![input, output];
        Project::new("p", "Project").with_graph(inner)
    }

    #[test]
    fn test_ports_mirror_target_graph() {
        let project = project();
        let registry = NodeRegistry::with_builtins();
        let ports = PortContext::new(&[], &project, &registry);

        let mut node = GraphNode::new("sub", "subGraph");
        node.data = serde_json::json!({ "graphId": "inner", "useErrorOutput": true });

        let inputs = SubGraphNode.input_ports(&node, &ports);
        assert_eq!(inputs.len(), 1);
        assert_eq!(inputs[0].id, "name");
        assert!(!inputs[0].required);

        let outputs: Vec<String> = SubGraphNode
            .output_ports(&node, &ports)
            .into_iter()
            .map(|p| p.id)
            .collect();
        assert_eq!(outputs, vec!["greeting", "duration", "error"]);
    }

    #[test]
    fn test_unknown_graph_has_only_duration() {
        let project = project();
        let registry = NodeRegistry::with_builtins();
        let ports = PortContext::new(&[], &project, &registry);

        let mut node = GraphNode::new("sub", "subGraph");
        node.data = serde_json::json!({ "graphId": "missing" });

        assert!(SubGraphNode.input_ports(&node, &ports).is_empty());
        assert_eq!(SubGraphNode.output_ports(&node, &ports).len(), 1);
    }
}
