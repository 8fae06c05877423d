//! Graph validation
//!
//! Validates graph structure, port references and types, required inputs,
//! and detects cycles that do not pass through a loop controller. The
//! structural subset is fatal: `GraphProcessor::new` refuses such graphs.

use std::collections::{HashMap, HashSet};

use crate::behavior::{FlowRole, PortContext};
use crate::coerce::port_accepts;
use crate::error::EngineError;
use crate::registry::NodeRegistry;
use crate::types::{NodeGraph, PortDefinition, Project};

/// Validation error with location context
#[derive(Debug, Clone, PartialEq)]
pub enum ValidationError {
    /// A node has an unknown type (not in registry)
    UnknownNodeType { node_id: String, node_type: String },
    /// Two nodes share an id
    DuplicateNodeId { node_id: String },
    /// A connection references a non-existent node
    DanglingConnection {
        from: String,
        to: String,
        node_id: String,
    },
    /// An input port has more than one incoming connection
    DuplicateInputConnection { node_id: String, port_id: String },
    /// A connection references a port the node does not expose
    UnknownPort { node_id: String, port_id: String },
    /// A required input port is not connected and has no default
    UnconnectedRequiredInput { node_id: String, port_id: String },
    /// A connection joins incompatible port types
    IncompatiblePortTypes {
        from: String,
        to: String,
        source_type: String,
        target_type: String,
    },
    /// A cycle that no loop controller is part of
    CycleWithoutLoopController { node_ids: Vec<String> },
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::UnknownNodeType { node_id, node_type } => {
                write!(f, "Unknown node type '{}' for node '{}'", node_type, node_id)
            }
            Self::DuplicateNodeId { node_id } => write!(f, "Duplicate node id '{}'", node_id),
            Self::DanglingConnection { from, to, node_id } => {
                write!(f, "Connection {} -> {} references unknown node '{}'", from, to, node_id)
            }
            Self::DuplicateInputConnection { node_id, port_id } => {
                write!(
                    f,
                    "Input '{}' on node '{}' has more than one connection",
                    port_id, node_id
                )
            }
            Self::UnknownPort { node_id, port_id } => {
                write!(f, "Node '{}' has no port '{}'", node_id, port_id)
            }
            Self::UnconnectedRequiredInput { node_id, port_id } => {
                write!(
                    f,
                    "Required input '{}' on node '{}' is not connected",
                    port_id, node_id
                )
            }
            Self::IncompatiblePortTypes {
                from,
                to,
                source_type,
                target_type,
            } => {
                write!(
                    f,
                    "Connection {} -> {} joins incompatible types: {} -> {}",
                    from, to, source_type, target_type
                )
            }
            Self::CycleWithoutLoopController { node_ids } => {
                write!(
                    f,
                    "Cycle without a loop controller through nodes: {}",
                    node_ids.join(", ")
                )
            }
        }
    }
}

impl std::error::Error for ValidationError {}

impl ValidationError {
    /// Whether the graph cannot be executed at all
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::UnknownNodeType { .. }
                | Self::DuplicateNodeId { .. }
                | Self::DanglingConnection { .. }
                | Self::DuplicateInputConnection { .. }
        )
    }

    /// The configuration error for a fatal validation error
    pub fn into_engine_error(self) -> Option<EngineError> {
        match self {
            Self::UnknownNodeType { node_id, node_type } => {
                Some(EngineError::UnknownNodeType { node_id, node_type })
            }
            Self::DuplicateNodeId { node_id } => Some(EngineError::DuplicateNodeId(node_id)),
            Self::DanglingConnection { from, to, node_id } => {
                Some(EngineError::DanglingConnection { from, to, node_id })
            }
            Self::DuplicateInputConnection { node_id, port_id } => {
                Some(EngineError::DuplicateInputConnection { node_id, port_id })
            }
            _ => None,
        }
    }
}

/// Validate one graph of a project
///
/// Returns all validation errors found (not just the first).
pub fn validate_graph(project: &Project, graph: &NodeGraph, registry: &NodeRegistry) -> Vec<ValidationError> {
    let mut errors = Vec::new();

    validate_node_ids(graph, &mut errors);
    validate_node_types(graph, registry, &mut errors);
    validate_connection_references(graph, &mut errors);
    validate_ports(project, graph, registry, &mut errors);
    detect_cycles(graph, registry, &mut errors);

    errors
}

/// Validate every graph of a project, keyed by graph id
pub fn validate_project(project: &Project, registry: &NodeRegistry) -> HashMap<String, Vec<ValidationError>> {
    project
        .graphs
        .iter()
        .map(|(id, graph)| (id.clone(), validate_graph(project, graph, registry)))
        .filter(|(_, errors)| !errors.is_empty())
        .collect()
}

fn validate_node_ids(graph: &NodeGraph, errors: &mut Vec<ValidationError>) {
    let mut seen: HashSet<&str> = HashSet::new();
    for node in &graph.nodes {
        if !seen.insert(&node.id) {
            errors.push(ValidationError::DuplicateNodeId {
                node_id: node.id.clone(),
            });
        }
    }
}

/// Check that all nodes have known types in the registry
fn validate_node_types(graph: &NodeGraph, registry: &NodeRegistry, errors: &mut Vec<ValidationError>) {
    for node in &graph.nodes {
        if !registry.has_node_type(&node.node_type) {
            errors.push(ValidationError::UnknownNodeType {
                node_id: node.id.clone(),
                node_type: node.node_type.clone(),
            });
        }
    }
}

/// Check that connections reference existing nodes and inputs are fed once
fn validate_connection_references(graph: &NodeGraph, errors: &mut Vec<ValidationError>) {
    let node_ids: HashSet<&str> = graph.nodes.iter().map(|n| n.id.as_str()).collect();
    let mut fed_inputs: HashSet<(&str, &str)> = HashSet::new();

    for c in &graph.connections {
        let from = format!("{}.{}", c.output_node_id, c.output_id);
        let to = format!("{}.{}", c.input_node_id, c.input_id);
        for node_id in [&c.output_node_id, &c.input_node_id] {
            if !node_ids.contains(node_id.as_str()) {
                errors.push(ValidationError::DanglingConnection {
                    from: from.clone(),
                    to: to.clone(),
                    node_id: node_id.clone(),
                });
            }
        }
        if !fed_inputs.insert((&c.input_node_id, &c.input_id)) {
            errors.push(ValidationError::DuplicateInputConnection {
                node_id: c.input_node_id.clone(),
                port_id: c.input_id.clone(),
            });
        }
    }
}

/// Check port references, port types and required inputs
fn validate_ports(project: &Project, graph: &NodeGraph, registry: &NodeRegistry, errors: &mut Vec<ValidationError>) {
    let port_context = PortContext::new(&graph.connections, project, registry);
    let mut inputs: HashMap<&str, Vec<PortDefinition>> = HashMap::new();
    let mut outputs: HashMap<&str, Vec<PortDefinition>> = HashMap::new();

    for node in &graph.nodes {
        if let Some(behavior) = registry.get(&node.node_type) {
            inputs.insert(&node.id, behavior.input_ports(node, &port_context));
            outputs.insert(&node.id, behavior.output_ports(node, &port_context));
        }
    }

    for c in &graph.connections {
        let source = outputs
            .get(c.output_node_id.as_str())
            .map(|ports| ports.iter().find(|p| p.id == c.output_id));
        let target = inputs
            .get(c.input_node_id.as_str())
            .map(|ports| ports.iter().find(|p| p.id == c.input_id));

        if let Some(None) = source {
            errors.push(ValidationError::UnknownPort {
                node_id: c.output_node_id.clone(),
                port_id: c.output_id.clone(),
            });
        }
        if let Some(None) = target {
            errors.push(ValidationError::UnknownPort {
                node_id: c.input_node_id.clone(),
                port_id: c.input_id.clone(),
            });
        }

        if let (Some(Some(source)), Some(Some(target))) = (source, target) {
            if !source.data_type.iter().any(|t| port_accepts(target, *t)) {
                errors.push(ValidationError::IncompatiblePortTypes {
                    from: format!("{}.{}", c.output_node_id, c.output_id),
                    to: format!("{}.{}", c.input_node_id, c.input_id),
                    source_type: source.primary_type().to_string(),
                    target_type: target.primary_type().to_string(),
                });
            }
        }
    }

    let connected: HashSet<(&str, &str)> = graph
        .connections
        .iter()
        .map(|c| (c.input_node_id.as_str(), c.input_id.as_str()))
        .collect();

    for node in &graph.nodes {
        for port in inputs.get(node.id.as_str()).into_iter().flatten() {
            if port.required && port.default_value.is_none() && !connected.contains(&(node.id.as_str(), port.id.as_str())) {
                errors.push(ValidationError::UnconnectedRequiredInput {
                    node_id: node.id.clone(),
                    port_id: port.id.clone(),
                });
            }
        }
    }
}

/// Report every cycle no loop controller takes part in
fn detect_cycles(graph: &NodeGraph, registry: &NodeRegistry, errors: &mut Vec<ValidationError>) {
    let index: HashMap<&str, usize> = graph
        .nodes
        .iter()
        .enumerate()
        .map(|(i, n)| (n.id.as_str(), i))
        .collect();

    let mut adjacency = vec![Vec::new(); graph.nodes.len()];
    let mut self_loops = HashSet::new();
    for c in &graph.connections {
        if let (Some(&from), Some(&to)) = (index.get(c.output_node_id.as_str()), index.get(c.input_node_id.as_str())) {
            adjacency[from].push(to);
            if from == to {
                self_loops.insert(from);
            }
        }
    }

    let components = strongly_connected_components(&adjacency);
    let mut members: HashMap<usize, Vec<usize>> = HashMap::new();
    for (node, component) in components.iter().enumerate() {
        members.entry(*component).or_default().push(node);
    }

    let mut cycles: Vec<Vec<usize>> = members
        .into_values()
        .filter(|nodes| nodes.len() > 1 || self_loops.contains(&nodes[0]))
        .collect();
    cycles.sort();

    for nodes in cycles {
        let has_controller = nodes.iter().any(|&i| {
            registry
                .get(&graph.nodes[i].node_type)
                .map(|b| b.flow_role() == FlowRole::LoopController)
                .unwrap_or(false)
        });
        if !has_controller {
            errors.push(ValidationError::CycleWithoutLoopController {
                node_ids: nodes.iter().map(|&i| graph.nodes[i].id.clone()).collect(),
            });
        }
    }
}

/// Tarjan's algorithm; returns the component id of every node
///
/// Iterative so deep graphs cannot overflow the stack.
pub(crate) fn strongly_connected_components(adjacency: &[Vec<usize>]) -> Vec<usize> {
    const UNVISITED: usize = usize::MAX;

    let n = adjacency.len();
    let mut index = vec![UNVISITED; n];
    let mut lowlink = vec![0; n];
    let mut on_stack = vec![false; n];
    let mut component = vec![UNVISITED; n];
    let mut stack: Vec<usize> = Vec::new();
    let mut next_index = 0;
    let mut next_component = 0;

    for root in 0..n {
        if index[root] != UNVISITED {
            continue;
        }

        index[root] = next_index;
        lowlink[root] = next_index;
        next_index += 1;
        stack.push(root);
        on_stack[root] = true;
        let mut call: Vec<(usize, usize)> = vec![(root, 0)];

        while let Some(frame) = call.last_mut() {
            let v = frame.0;
            if frame.1 < adjacency[v].len() {
                let w = adjacency[v][frame.1];
                frame.1 += 1;
                if index[w] == UNVISITED {
                    index[w] = next_index;
                    lowlink[w] = next_index;
                    next_index += 1;
                    stack.push(w);
                    on_stack[w] = true;
                    call.push((w, 0));
                } else if on_stack[w] {
                    lowlink[v] = lowlink[v].min(index[w]);
                }
                continue;
            }

            call.pop();
            if let Some(&(parent, _)) = call.last() {
                lowlink[parent] = lowlink[parent].min(lowlink[v]);
            }
            if lowlink[v] == index[v] {
                while let Some(w) = stack.pop() {
                    on_stack[w] = false;
                    component[w] = next_component;
                    if w == v {
                        break;
                    }
                }
                next_component += 1;
            }
        }
    }

    component
}
