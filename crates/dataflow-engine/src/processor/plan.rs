//! Static execution plan of one graph
//!
//! Everything the scheduler needs that does not change during a run: the
//! resolved behavior and port sets of each node, adjacency by index, the
//! strongly-connected components used for loops and race membership.

use std::collections::HashMap;
use std::sync::Arc;

use crate::behavior::{FlowRole, NodeBehavior, PortContext};
use crate::error::{EngineError, Result};
use crate::registry::NodeRegistry;
use crate::types::{Connection, GraphId, GraphNode, PortDefinition, Project};
use crate::validation::{strongly_connected_components, validate_graph};
use crate::value::DataType;

pub(crate) struct PlannedNode {
    pub node: GraphNode,
    pub behavior: Arc<dyn NodeBehavior>,
    pub role: FlowRole,
    pub inputs: Vec<PortDefinition>,
    pub outputs: Vec<PortDefinition>,
    /// Connections feeding this node
    pub incoming: Vec<Connection>,
    /// Distinct upstream node indices
    pub sources: Vec<usize>,
    /// Distinct downstream node indices
    pub dependents: Vec<usize>,
    pub component: usize,
}

impl PlannedNode {
    /// `<title> (<id>)`, the form used in error messages
    pub fn label(&self) -> String {
        format!("{} ({})", self.node.title, self.node.id)
    }
}

pub(crate) struct GraphPlan {
    pub graph_id: GraphId,
    pub name: String,
    pub nodes: Vec<PlannedNode>,
    pub index: HashMap<String, usize>,
    component_sizes: Vec<usize>,
    /// For each node, the race nodes it feeds directly
    pub races: Vec<Vec<usize>>,
    /// Declared graph outputs
    pub outputs: Vec<(String, DataType)>,
}

impl GraphPlan {
    pub fn build(project: &Project, graph_id: &str, registry: &NodeRegistry) -> Result<Self> {
        let graph = project
            .graph(graph_id)
            .ok_or_else(|| EngineError::GraphNotFound(graph_id.to_string()))?;

        for error in validate_graph(project, graph, registry) {
            if let Some(fatal) = error.clone().into_engine_error() {
                return Err(fatal);
            }
            log::warn!("Graph '{}': {}", graph_id, error);
        }

        let index: HashMap<String, usize> = graph
            .nodes
            .iter()
            .enumerate()
            .map(|(i, n)| (n.id.clone(), i))
            .collect();
        let port_context = PortContext::new(&graph.connections, project, registry);

        let mut nodes = Vec::with_capacity(graph.nodes.len());
        for node in &graph.nodes {
            let behavior = registry
                .get(&node.node_type)
                .ok_or_else(|| EngineError::UnknownNodeType {
                    node_id: node.id.clone(),
                    node_type: node.node_type.clone(),
                })?;
            let incoming: Vec<Connection> = graph.incoming(&node.id).cloned().collect();
            let mut sources: Vec<usize> = Vec::new();
            for c in &incoming {
                if let Some(&s) = index.get(&c.output_node_id) {
                    if !sources.contains(&s) {
                        sources.push(s);
                    }
                }
            }

            nodes.push(PlannedNode {
                role: behavior.flow_role(),
                inputs: behavior.input_ports(node, &port_context),
                outputs: behavior.output_ports(node, &port_context),
                behavior,
                node: node.clone(),
                incoming,
                sources,
                dependents: Vec::new(),
                component: 0,
            });
        }

        let adjacency: Vec<Vec<usize>> = graph
            .nodes
            .iter()
            .map(|n| {
                graph
                    .dependents(&n.id)
                    .iter()
                    .filter_map(|d| index.get(d).copied())
                    .collect()
            })
            .collect();
        let components = strongly_connected_components(&adjacency);
        let mut component_sizes = vec![0; graph.nodes.len()];
        for &c in &components {
            component_sizes[c] += 1;
        }

        let mut races = vec![Vec::new(); nodes.len()];
        for (i, planned) in nodes.iter_mut().enumerate() {
            planned.dependents = adjacency[i].clone();
            planned.component = components[i];
        }
        for (i, planned) in nodes.iter().enumerate() {
            if planned.role == FlowRole::Race {
                for &s in &planned.sources {
                    races[s].push(i);
                }
            }
        }

        Ok(Self {
            graph_id: graph_id.to_string(),
            name: graph.metadata.name.clone(),
            nodes,
            index,
            component_sizes,
            races,
            outputs: registry.graph_outputs(graph),
        })
    }

    /// Whether two nodes lie on a common cycle
    pub fn same_cycle(&self, a: usize, b: usize) -> bool {
        let component = self.nodes[a].component;
        component == self.nodes[b].component && self.component_sizes[component] > 1
    }

    /// `<name> (<id>)` of the graph
    pub fn label(&self) -> String {
        format!("{} ({})", self.name, self.graph_id)
    }
}
