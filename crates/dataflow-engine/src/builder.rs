//! Fluent builders for graphs and projects
//!
//! Provides a fluent API for constructing graphs programmatically, mostly
//! used by hosts that generate graphs and by tests.

use crate::types::{Connection, GraphNode, NodeGraph, Project};

/// Fluent builder for constructing node graphs
///
/// # Example
///
/// ```ignore
/// let graph = GraphBuilder::new("main", "Main")
///     .add_node("greeting", "text")
///     .with_data(serde_json::json!({ "text": "Hello {{name}}" }))
///     .add_node("out", "graphOutput")
///     .with_data(serde_json::json!({ "id": "result", "dataType": "string" }))
///     .connect("greeting", "output", "out", "value")
///     .build();
/// ```
pub struct GraphBuilder {
    graph: NodeGraph,
}

impl GraphBuilder {
    /// Create a new graph builder
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            graph: NodeGraph::new(id, name),
        }
    }

    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.graph.metadata.description = Some(description.into());
        self
    }

    /// Add a node to the graph
    pub fn add_node(mut self, id: impl Into<String>, node_type: impl Into<String>) -> Self {
        self.graph.nodes.push(GraphNode::new(id, node_type));
        self
    }

    /// Add a fully constructed node
    pub fn node(mut self, node: GraphNode) -> Self {
        self.graph.nodes.push(node);
        self
    }

    /// Set the title of the most recently added node
    pub fn titled(mut self, title: impl Into<String>) -> Self {
        if let Some(node) = self.graph.nodes.last_mut() {
            node.title = title.into();
        }
        self
    }

    /// Set data on the most recently added node
    ///
    /// Must be called immediately after `add_node`.
    pub fn with_data(mut self, data: serde_json::Value) -> Self {
        if let Some(node) = self.graph.nodes.last_mut() {
            node.data = data;
        }
        self
    }

    /// Mark the most recently added node as split-run
    pub fn split_run(mut self, max: Option<usize>) -> Self {
        if let Some(node) = self.graph.nodes.last_mut() {
            node.is_split_run = true;
            node.split_run_max = max;
        }
        self
    }

    /// Connect an output port to an input port
    pub fn connect(
        mut self,
        output_node: impl Into<String>,
        output_port: impl Into<String>,
        input_node: impl Into<String>,
        input_port: impl Into<String>,
    ) -> Self {
        self.graph.connections.push(Connection {
            output_node_id: output_node.into(),
            output_id: output_port.into(),
            input_node_id: input_node.into(),
            input_id: input_port.into(),
        });
        self
    }

    /// Build the graph without validation
    pub fn build(self) -> NodeGraph {
        self.graph
    }
}

/// Fluent builder for projects
pub struct ProjectBuilder {
    project: Project,
}

impl ProjectBuilder {
    pub fn new(id: impl Into<String>, title: impl Into<String>) -> Self {
        Self {
            project: Project::new(id, title),
        }
    }

    /// Add a graph; the first graph added is the main graph
    pub fn graph(mut self, graph: NodeGraph) -> Self {
        self.project = self.project.with_graph(graph);
        self
    }

    pub fn main_graph(mut self, graph_id: impl Into<String>) -> Self {
        self.project.main_graph_id = Some(graph_id.into());
        self
    }

    pub fn build(self) -> Project {
        self.project
    }
}
