//! Core types for dataflow graphs
//!
//! These types describe the read-only structure a processor executes:
//! nodes, the connections between their ports, graphs and projects
//! holding several graphs (sub-graphs are referenced by id).

use std::collections::HashMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::value::{DataType, DataValue};

/// Unique identifier for a node
pub type NodeId = String;

/// Unique identifier for a port
pub type PortId = String;

/// Unique identifier for a graph within a project
pub type GraphId = String;

/// Values keyed by input port
pub type Inputs = HashMap<PortId, DataValue>;

/// Values keyed by output port
pub type Outputs = HashMap<PortId, DataValue>;

/// Graph-level inputs keyed by graph input id
pub type GraphInputs = HashMap<String, DataValue>;

/// Graph-level outputs keyed by graph output id
pub type GraphOutputs = HashMap<String, DataValue>;

/// Identifies one concrete execution attempt of a node
///
/// Nodes re-run by a loop get a fresh ProcessId per attempt, suffixed with
/// the loop iteration (`<uuid>@<iteration>`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ProcessId(String);

impl ProcessId {
    /// Allocate a new ProcessId
    pub fn new() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    /// Allocate a new ProcessId tagged with a loop iteration
    pub fn for_iteration(iteration: u32) -> Self {
        Self(format!("{}@{}", uuid::Uuid::new_v4(), iteration))
    }

    /// The loop iteration this attempt belongs to, if any
    pub fn iteration(&self) -> Option<u32> {
        self.0.rsplit_once('@').and_then(|(_, it)| it.parse().ok())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for ProcessId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ProcessId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ProcessId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

/// Definition of a port (input or output)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PortDefinition {
    /// Unique identifier for this port on its node
    pub id: PortId,
    /// Human-readable title
    pub title: String,
    /// Accepted data types; the first is the preferred one
    pub data_type: Vec<DataType>,
    /// Whether the node cannot run without a value on this port
    pub required: bool,
    /// Value used when the port is not connected
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_value: Option<DataValue>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

impl PortDefinition {
    /// Create a required port
    pub fn required(id: impl Into<String>, title: impl Into<String>, data_type: DataType) -> Self {
        Self {
            id: id.into(),
            title: title.into(),
            data_type: vec![data_type],
            required: true,
            default_value: None,
            description: None,
        }
    }

    /// Create an optional port
    pub fn optional(id: impl Into<String>, title: impl Into<String>, data_type: DataType) -> Self {
        Self {
            required: false,
            ..Self::required(id, title, data_type)
        }
    }

    /// Accept an additional data type on this port
    pub fn or_type(mut self, data_type: DataType) -> Self {
        self.data_type.push(data_type);
        self
    }

    /// Set a default value used when the port is unconnected
    pub fn with_default(mut self, value: DataValue) -> Self {
        self.default_value = Some(value);
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// Preferred data type of the port
    pub fn primary_type(&self) -> DataType {
        self.data_type.first().copied().unwrap_or(DataType::ANY)
    }
}

/// Category of a node behavior, used for catalog grouping
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeCategory {
    /// Graph inputs, user input, constants
    Input,
    /// Graph outputs
    Output,
    /// Value transformation
    Processing,
    /// Control flow (gates, loops, races, aborts)
    Control,
    /// Globals and events shared across the run
    State,
    /// Calls into the host
    Host,
}

/// Editor placement of a node; carried through but never interpreted
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VisualData {
    pub x: f64,
    pub y: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub width: Option<f64>,
}

/// A node instance in a graph
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GraphNode {
    /// Unique identifier for this node instance
    pub id: NodeId,
    /// Node type, resolved through the registry
    #[serde(rename = "type")]
    pub node_type: String,
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Behavior-specific configuration
    #[serde(default)]
    pub data: serde_json::Value,
    #[serde(default)]
    pub visual_data: VisualData,
    /// Run once per element of array inputs
    #[serde(default)]
    pub is_split_run: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub split_run_max: Option<usize>,
}

impl GraphNode {
    /// Create a node with empty configuration
    pub fn new(id: impl Into<String>, node_type: impl Into<String>) -> Self {
        let node_type = node_type.into();
        Self {
            id: id.into(),
            title: node_type.clone(),
            node_type,
            description: None,
            data: serde_json::Value::Null,
            visual_data: VisualData::default(),
            is_split_run: false,
            split_run_max: None,
        }
    }

    /// Parse the node configuration into a typed struct
    ///
    /// A null configuration yields the struct's default.
    pub fn config<T>(&self) -> crate::error::Result<T>
    where
        T: serde::de::DeserializeOwned + Default,
    {
        if self.data.is_null() {
            return Ok(T::default());
        }
        Ok(serde_json::from_value(self.data.clone())?)
    }
}

/// A directed edge from an output port to an input port
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Connection {
    pub output_node_id: NodeId,
    pub output_id: PortId,
    pub input_node_id: NodeId,
    pub input_id: PortId,
}

/// Descriptive metadata for a graph
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GraphMetadata {
    pub id: GraphId,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

/// A complete dataflow graph
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeGraph {
    pub metadata: GraphMetadata,
    pub nodes: Vec<GraphNode>,
    pub connections: Vec<Connection>,
}

impl NodeGraph {
    /// Create a new empty graph
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            metadata: GraphMetadata {
                id: id.into(),
                name: name.into(),
                description: None,
            },
            nodes: Vec::new(),
            connections: Vec::new(),
        }
    }

    pub fn id(&self) -> &str {
        &self.metadata.id
    }

    /// Find a node by ID
    pub fn find_node(&self, id: &str) -> Option<&GraphNode> {
        self.nodes.iter().find(|n| n.id == id)
    }

    /// Connections feeding a node
    pub fn incoming<'a>(&'a self, node_id: &'a str) -> impl Iterator<Item = &'a Connection> + 'a {
        self.connections.iter().filter(move |c| c.input_node_id == node_id)
    }

    /// Connections leaving a node
    pub fn outgoing<'a>(&'a self, node_id: &'a str) -> impl Iterator<Item = &'a Connection> + 'a {
        self.connections.iter().filter(move |c| c.output_node_id == node_id)
    }

    /// Connections touching a node on either side
    pub fn connections_of(&self, node_id: &str) -> Vec<Connection> {
        self.connections
            .iter()
            .filter(|c| c.input_node_id == node_id || c.output_node_id == node_id)
            .cloned()
            .collect()
    }

    /// IDs of upstream nodes, deduplicated, in connection order
    pub fn dependencies(&self, node_id: &str) -> Vec<NodeId> {
        let mut ids: Vec<NodeId> = Vec::new();
        for c in self.incoming(node_id) {
            if !ids.contains(&c.output_node_id) {
                ids.push(c.output_node_id.clone());
            }
        }
        ids
    }

    /// IDs of downstream nodes, deduplicated, in connection order
    pub fn dependents(&self, node_id: &str) -> Vec<NodeId> {
        let mut ids: Vec<NodeId> = Vec::new();
        for c in self.outgoing(node_id) {
            if !ids.contains(&c.input_node_id) {
                ids.push(c.input_node_id.clone());
            }
        }
        ids
    }
}

/// Descriptive metadata for a project
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProjectMetadata {
    pub id: String,
    pub title: String,
}

/// A set of graphs that may reference each other as sub-graphs
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Project {
    pub metadata: ProjectMetadata,
    pub graphs: HashMap<GraphId, NodeGraph>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub main_graph_id: Option<GraphId>,
}

impl Project {
    pub fn new(id: impl Into<String>, title: impl Into<String>) -> Self {
        Self {
            metadata: ProjectMetadata {
                id: id.into(),
                title: title.into(),
            },
            graphs: HashMap::new(),
            main_graph_id: None,
        }
    }

    /// Add a graph; the first graph added becomes the main graph
    pub fn with_graph(mut self, graph: NodeGraph) -> Self {
        if self.main_graph_id.is_none() {
            self.main_graph_id = Some(graph.metadata.id.clone());
        }
        self.graphs.insert(graph.metadata.id.clone(), graph);
        self
    }

    pub fn graph(&self, id: &str) -> Option<&NodeGraph> {
        self.graphs.get(id)
    }

    /// Find a node in any graph of the project
    pub fn find_node(&self, node_id: &str) -> Option<&GraphNode> {
        self.graphs.values().find_map(|g| g.find_node(node_id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_process_id_iteration_suffix() {
        let plain = ProcessId::new();
        assert_eq!(plain.iteration(), None);

        let looped = ProcessId::for_iteration(3);
        assert_eq!(looped.iteration(), Some(3));
        assert_ne!(ProcessId::for_iteration(3), looped);
    }

    #[test]
    fn test_graph_connections() {
        let mut graph = NodeGraph::new("test", "Test Graph");
        graph.nodes.push(GraphNode::new("node1", "text"));
        graph.nodes.push(GraphNode::new("node2", "passthrough"));
        graph.connections.push(Connection {
            output_node_id: "node1".into(),
            output_id: "output".into(),
            input_node_id: "node2".into(),
            input_id: "input1".into(),
        });
        graph.connections.push(Connection {
            output_node_id: "node1".into(),
            output_id: "output".into(),
            input_node_id: "node2".into(),
            input_id: "input2".into(),
        });

        assert_eq!(graph.dependencies("node2"), vec!["node1"]);
        assert_eq!(graph.dependents("node1"), vec!["node2"]);
        assert_eq!(graph.connections_of("node2").len(), 2);
    }

    #[test]
    fn test_node_config_parsing() {
        #[derive(Debug, Default, Deserialize, PartialEq)]
        #[serde(default, rename_all = "camelCase")]
        struct Cfg {
            max_iterations: Option<u32>,
        }

        let mut node = GraphNode::new("n", "loopController");
        assert_eq!(node.config::<Cfg>().unwrap(), Cfg::default());

        node.data = serde_json::json!({ "maxIterations": 5 });
        assert_eq!(node.config::<Cfg>().unwrap().max_iterations, Some(5));
    }

    #[test]
    fn test_node_serializes_type_field() {
        let node = GraphNode::new("a", "text");
        let json = serde_json::to_value(&node).unwrap();
        assert_eq!(json["type"], "text");
        let back: GraphNode = serde_json::from_value(json).unwrap();
        assert_eq!(back, node);
    }
}
