//! Node type registry for dynamic node resolution
//!
//! Maps node type strings to shared behaviors. The processor resolves every
//! node of a graph through the registry when it is constructed, so an
//! unknown type is a configuration error before anything runs.
//!
//! # Usage
//!
//! ```ignore
//! use dataflow_engine::NodeRegistry;
//!
//! let mut registry = NodeRegistry::with_builtins();
//! registry.register(Arc::new(MyBehavior));
//! ```

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use futures_util::future::BoxFuture;

use crate::behavior::{FlowRole, GraphInterfacePort, NodeBehavior, NodeOutput, PortContext};
use crate::context::NodeContext;
use crate::descriptor::{BehaviorFn, NodeMetadata};
use crate::error::Result;
use crate::types::{GraphNode, Inputs, NodeCategory, NodeGraph, Outputs, PortDefinition};
use crate::value::{DataType, DataValue};

/// Registry of node types with their behaviors
///
/// # Composability
///
/// Registries can be composed by merging:
/// ```ignore
/// let mut registry = NodeRegistry::with_builtins();
/// registry.merge(plugin_registry); // Add plugin nodes
/// ```
pub struct NodeRegistry {
    entries: HashMap<String, Arc<dyn NodeBehavior>>,
}

impl NodeRegistry {
    /// Create a new empty registry
    pub fn new() -> Self {
        Self {
            entries: HashMap::new(),
        }
    }

    /// Create a registry holding every behavior submitted through `inventory`
    ///
    /// This includes the engine's own control-flow nodes plus any linked
    /// catalog crate.
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        for behavior_fn in inventory::iter::<BehaviorFn> {
            registry.register((behavior_fn.0)());
        }
        log::debug!("Registered {} built-in node types", registry.entries.len());
        registry
    }

    /// Register a behavior under its metadata's node type
    pub fn register(&mut self, behavior: Arc<dyn NodeBehavior>) {
        let node_type = behavior.metadata().node_type;
        if self.entries.insert(node_type.clone(), behavior).is_some() {
            log::debug!("Replaced behavior for node type '{}'", node_type);
        }
    }

    /// Register a node type backed by an async callback
    ///
    /// The callback receives the resolved inputs and the node's context and
    /// returns outputs. Ports are static.
    pub fn register_callback<F, Fut>(
        &mut self,
        metadata: NodeMetadata,
        inputs: Vec<PortDefinition>,
        outputs: Vec<PortDefinition>,
        callback: F,
    ) where
        F: Fn(Inputs, NodeContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Outputs>> + Send + 'static,
    {
        self.register(Arc::new(CallbackBehavior::new(metadata, inputs, outputs, callback)));
    }

    /// Register a node type backed by a synchronous callback
    pub fn register_sync<F>(
        &mut self,
        metadata: NodeMetadata,
        inputs: Vec<PortDefinition>,
        outputs: Vec<PortDefinition>,
        callback: F,
    ) where
        F: Fn(Inputs) -> Result<Outputs> + Send + Sync + 'static,
    {
        let callback = Arc::new(callback);
        self.register_callback(metadata, inputs, outputs, move |inputs, _context| {
            let callback = callback.clone();
            async move { callback(inputs) }
        });
    }

    /// Get the behavior for a node type
    pub fn get(&self, node_type: &str) -> Option<Arc<dyn NodeBehavior>> {
        self.entries.get(node_type).cloned()
    }

    /// Check if a node type is registered
    pub fn has_node_type(&self, node_type: &str) -> bool {
        self.entries.contains_key(node_type)
    }

    /// List all registered node type strings
    pub fn node_types(&self) -> Vec<&str> {
        self.entries.keys().map(|s| s.as_str()).collect()
    }

    /// Get all registered metadata
    pub fn all_metadata(&self) -> Vec<NodeMetadata> {
        self.entries.values().map(|b| b.metadata()).collect()
    }

    /// Get metadata grouped by category
    pub fn metadata_by_category(&self) -> HashMap<NodeCategory, Vec<NodeMetadata>> {
        let mut grouped: HashMap<NodeCategory, Vec<NodeMetadata>> = HashMap::new();
        for behavior in self.entries.values() {
            let metadata = behavior.metadata();
            grouped.entry(metadata.category).or_default().push(metadata);
        }
        grouped
    }

    /// Merge another registry into this one
    ///
    /// Entries from `other` override entries in `self` if they share the same node_type.
    pub fn merge(&mut self, other: NodeRegistry) {
        self.entries.extend(other.entries);
    }

    /// Graph-level inputs declared by a graph's interface nodes, sorted by id
    pub fn graph_inputs(&self, graph: &NodeGraph) -> Vec<(String, DataType, Option<DataValue>)> {
        let mut inputs: Vec<(String, DataType, Option<DataValue>)> = Vec::new();
        for port in self.graph_interface(graph) {
            if let GraphInterfacePort::Input {
                id,
                data_type,
                default_value,
            } = port
            {
                if !inputs.iter().any(|(existing, _, _)| *existing == id) {
                    inputs.push((id, data_type, default_value));
                }
            }
        }
        inputs.sort_by(|a, b| a.0.cmp(&b.0));
        inputs
    }

    /// Graph-level outputs declared by a graph's interface nodes, sorted by id
    pub fn graph_outputs(&self, graph: &NodeGraph) -> Vec<(String, DataType)> {
        let mut outputs: Vec<(String, DataType)> = Vec::new();
        for port in self.graph_interface(graph) {
            if let GraphInterfacePort::Output { id, data_type } = port {
                if !outputs.iter().any(|(existing, _)| *existing == id) {
                    outputs.push((id, data_type));
                }
            }
        }
        outputs.sort_by(|a, b| a.0.cmp(&b.0));
        outputs
    }

    fn graph_interface(&self, graph: &NodeGraph) -> Vec<GraphInterfacePort> {
        graph
            .nodes
            .iter()
            .filter_map(|node| self.get(&node.node_type)?.graph_interface(node))
            .collect()
    }
}

impl Default for NodeRegistry {
    fn default() -> Self {
        Self::new()
    }
}

type Callback = Box<dyn Fn(Inputs, NodeContext) -> BoxFuture<'static, Result<Outputs>> + Send + Sync>;

/// Closure-backed behavior with static ports
///
/// Lets hosts bridge node types implemented elsewhere (another runtime, a
/// remote service) without writing a behavior struct.
pub struct CallbackBehavior {
    metadata: NodeMetadata,
    inputs: Vec<PortDefinition>,
    outputs: Vec<PortDefinition>,
    role: FlowRole,
    callback: Callback,
}

impl CallbackBehavior {
    pub fn new<F, Fut>(
        metadata: NodeMetadata,
        inputs: Vec<PortDefinition>,
        outputs: Vec<PortDefinition>,
        callback: F,
    ) -> Self
    where
        F: Fn(Inputs, NodeContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Outputs>> + Send + 'static,
    {
        Self {
            metadata,
            inputs,
            outputs,
            role: FlowRole::Standard,
            callback: Box::new(move |inputs, context| -> BoxFuture<'static, Result<Outputs>> {
                Box::pin(callback(inputs, context))
            }),
        }
    }

    /// Schedule this node with a non-standard role
    pub fn with_role(mut self, role: FlowRole) -> Self {
        self.role = role;
        self
    }
}

#[async_trait]
impl NodeBehavior for CallbackBehavior {
    fn metadata(&self) -> NodeMetadata {
        self.metadata.clone()
    }

    fn input_ports(&self, _node: &GraphNode, _ports: &PortContext<'_>) -> Vec<PortDefinition> {
        self.inputs.clone()
    }

    fn output_ports(&self, _node: &GraphNode, _ports: &PortContext<'_>) -> Vec<PortDefinition> {
        self.outputs.clone()
    }

    fn flow_role(&self) -> FlowRole {
        self.role
    }

    async fn process(&self, _node: &GraphNode, inputs: Inputs, context: &NodeContext) -> Result<NodeOutput> {
        let outputs = (self.callback)(inputs, context.clone()).await?;
        Ok(NodeOutput::Ready(outputs))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::EngineError;

    fn test_metadata(node_type: &str) -> NodeMetadata {
        NodeMetadata::new(node_type, NodeCategory::Processing, format!("Test {}", node_type))
    }

    fn register_test(registry: &mut NodeRegistry, node_type: &str) {
        registry.register_sync(
            test_metadata(node_type),
            vec![PortDefinition::optional("input", "Input", DataType::STRING)],
            vec![PortDefinition::optional("output", "Output", DataType::STRING)],
            |inputs| Ok(inputs),
        );
    }

    #[test]
    fn test_register_and_lookup() {
        let mut registry = NodeRegistry::new();
        register_test(&mut registry, "test-node");

        assert!(registry.has_node_type("test-node"));
        assert!(!registry.has_node_type("unknown"));

        let behavior = registry.get("test-node").unwrap();
        assert_eq!(behavior.metadata().label, "Test test-node");
        assert_eq!(behavior.create_default().title, "Test test-node");
    }

    #[test]
    fn test_merge_override() {
        let mut registry1 = NodeRegistry::new();
        register_test(&mut registry1, "node-a");

        let mut registry2 = NodeRegistry::new();
        registry2.register_sync(
            NodeMetadata::new("node-a", NodeCategory::Processing, "Override"),
            vec![],
            vec![],
            |_| Err(EngineError::failed("unused")),
        );
        register_test(&mut registry2, "node-b");

        registry1.merge(registry2);
        assert_eq!(registry1.all_metadata().len(), 2);
        assert_eq!(registry1.get("node-a").unwrap().metadata().label, "Override");
    }

    #[test]
    fn test_metadata_by_category() {
        let registry = NodeRegistry::with_builtins();
        let grouped = registry.metadata_by_category();

        let control = grouped.get(&NodeCategory::Control).unwrap();
        assert!(control.iter().any(|m| m.node_type == "if"));
        assert!(grouped
            .get(&NodeCategory::Input)
            .unwrap()
            .iter()
            .any(|m| m.node_type == "graphInput"));
    }

    #[test]
    fn test_graph_interface_listing() {
        let registry = NodeRegistry::with_builtins();
        let mut graph = NodeGraph::new("g", "G");

        let mut input_b = GraphNode::new("in-b", "graphInput");
        input_b.data = serde_json::json!({ "id": "b", "dataType": "number" });
        let mut input_a = GraphNode::new("in-a", "graphInput");
        input_a.data = serde_json::json!({ "id": "a", "dataType": "string", "defaultValue": "x" });
        let mut output = GraphNode::new("out", "graphOutput");
        output.data = serde_json::json!({ "id": "result", "dataType": "string" });
        graph.nodes = vec![input_b, input_a, output];

        let inputs = registry.graph_inputs(&graph);
        assert_eq!(inputs.len(), 2);
        assert_eq!(inputs[0].0, "a");
        assert_eq!(inputs[0].2, Some(DataValue::string("x")));
        assert_eq!(inputs[1].1, DataType::NUMBER);

        assert_eq!(
            registry.graph_outputs(&graph),
            vec![("result".to_string(), DataType::STRING)]
        );
    }
}
