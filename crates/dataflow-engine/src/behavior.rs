//! The node behavior contract
//!
//! A behavior is the pluggable unit of computation behind a node type. The
//! processor only talks to nodes through this trait: it asks for the port
//! sets of a configured node, its role in scheduling, and finally calls
//! `process` with the resolved inputs.

use async_trait::async_trait;
use futures_util::stream::BoxStream;

use crate::context::NodeContext;
use crate::descriptor::NodeMetadata;
use crate::error::Result;
use crate::registry::NodeRegistry;
use crate::types::{Connection, GraphNode, Inputs, Outputs, PortDefinition, Project};
use crate::value::{DataType, DataValue};

/// How the scheduler treats a node beyond plain data dependencies
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FlowRole {
    #[default]
    Standard,
    /// Runs even when inputs are excluded and decides itself what to do
    ExcludedConsumer,
    /// Drives a loop; may run before the rest of its cycle has been visited.
    /// Sees excluded inputs like `ExcludedConsumer`
    LoopController,
    /// Ready as soon as any input is available; cancels the losing inputs
    Race,
}

impl FlowRole {
    /// Whether excluded inputs are handed to `process` instead of excluding the node
    pub fn consumes_excluded(&self) -> bool {
        matches!(self, Self::ExcludedConsumer | Self::LoopController | Self::Race)
    }
}

/// A graph-level port contributed by an interface node
#[derive(Debug, Clone, PartialEq)]
pub enum GraphInterfacePort {
    Input {
        id: String,
        data_type: DataType,
        default_value: Option<DataValue>,
    },
    Output {
        id: String,
        data_type: DataType,
    },
}

/// One item of a streaming node's output
#[derive(Debug, Clone, PartialEq)]
pub enum ProcessUpdate {
    /// Intermediate outputs, reported to observers only
    Partial(Outputs),
    /// The node's final outputs
    Final(Outputs),
}

/// Result of `NodeBehavior::process`
pub enum NodeOutput {
    Ready(Outputs),
    /// Partial outputs followed by a final one; a stream ending without
    /// `Final` makes the last partial the final value
    Stream(BoxStream<'static, Result<ProcessUpdate>>),
}

impl From<Outputs> for NodeOutput {
    fn from(outputs: Outputs) -> Self {
        Self::Ready(outputs)
    }
}

impl std::fmt::Debug for NodeOutput {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Ready(outputs) => f.debug_tuple("Ready").field(outputs).finish(),
            Self::Stream(_) => f.write_str("Stream(..)"),
        }
    }
}

/// What a behavior may look at when computing its port set
pub struct PortContext<'a> {
    /// Connections of the graph the node lives in
    pub connections: &'a [Connection],
    pub project: &'a Project,
    pub registry: &'a NodeRegistry,
}

impl<'a> PortContext<'a> {
    pub fn new(connections: &'a [Connection], project: &'a Project, registry: &'a NodeRegistry) -> Self {
        Self {
            connections,
            project,
            registry,
        }
    }

    /// Connections feeding the given node
    pub fn incoming<'s>(&'s self, node_id: &'s str) -> impl Iterator<Item = &'a Connection> + 's {
        self.connections.iter().filter(move |c| c.input_node_id == node_id)
    }

    /// Number of `<prefix>N` ports a variadic node exposes
    ///
    /// One more than the highest connected index, so there is always a free
    /// port to connect to.
    pub fn variadic_count(&self, node_id: &str, prefix: &str) -> usize {
        self.connections
            .iter()
            .filter(|c| c.input_node_id == node_id)
            .filter_map(|c| c.input_id.strip_prefix(prefix))
            .filter_map(|n| n.parse::<usize>().ok())
            .max()
            .map(|n| n + 1)
            .unwrap_or(1)
    }
}

/// Per-node-type behavior
#[async_trait]
pub trait NodeBehavior: Send + Sync {
    /// Catalog metadata for this node type
    fn metadata(&self) -> NodeMetadata;

    /// A fresh node of this type with default configuration
    fn create_default(&self) -> GraphNode {
        let metadata = self.metadata();
        let mut node = GraphNode::new(uuid::Uuid::new_v4().to_string(), metadata.node_type);
        node.title = metadata.label;
        node
    }

    /// Input ports of a configured node
    fn input_ports(&self, node: &GraphNode, ports: &PortContext<'_>) -> Vec<PortDefinition>;

    /// Output ports of a configured node
    fn output_ports(&self, node: &GraphNode, ports: &PortContext<'_>) -> Vec<PortDefinition>;

    fn flow_role(&self) -> FlowRole {
        FlowRole::Standard
    }

    /// Graph-level input or output this node declares, if any
    fn graph_interface(&self, _node: &GraphNode) -> Option<GraphInterfacePort> {
        None
    }

    /// Run the node with its resolved inputs
    async fn process(&self, node: &GraphNode, inputs: Inputs, context: &NodeContext) -> Result<NodeOutput>;
}
