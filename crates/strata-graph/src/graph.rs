use std::collections::{HashMap, HashSet};

use petgraph::algo::{is_cyclic_directed, toposort};
use petgraph::graphmap::DiGraphMap;
use petgraph::Direction;
use serde::{Deserialize, Serialize};

use crate::{EdgeDocument, GraphDocument, GraphError, NodeDocument, NodeId, NodeSpec, OutputRef};

/// Port-level connection
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Edge {
    pub source: OutputRef,
    pub target: NodeId,
    pub port: String,
}

/// Graph size at one point of a build, see [`WorkflowGraph::rollback_to`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Checkpoint {
    nodes: usize,
    edges: usize,
}

/// Graph being assembled for one build
///
/// Node names are unique and every input port accepts a single
/// connection; both are reported as [`GraphError::DuplicateConstruction`].
/// Edges that would close a cycle are rejected and leave the graph
/// unchanged.
#[derive(Debug, Clone)]
pub struct WorkflowGraph {
    name: String,
    nodes: Vec<NodeSpec>,
    by_name: HashMap<String, NodeId>,
    edges: Vec<Edge>,
    wired: HashSet<(NodeId, String)>,
    topology: DiGraphMap<NodeId, ()>,
}

impl WorkflowGraph {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            nodes: Vec::new(),
            by_name: HashMap::new(),
            edges: Vec::new(),
            wired: HashSet::new(),
            topology: DiGraphMap::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn add_node(&mut self, spec: NodeSpec) -> Result<NodeId, GraphError> {
        if self.by_name.contains_key(&spec.name) {
            return Err(GraphError::duplicate(format!(
                "node '{}' already exists in graph '{}'",
                spec.name, self.name
            )));
        }
        let id = NodeId::new(self.nodes.len());
        self.by_name.insert(spec.name.clone(), id);
        self.topology.add_node(id);
        tracing::trace!(node = %spec.name, kind = %spec.kind, "added node");
        self.nodes.push(spec);
        Ok(id)
    }

    /// Wire `source` into input `port` of `target`
    pub fn connect(
        &mut self,
        source: &OutputRef,
        target: NodeId,
        port: impl Into<String>,
    ) -> Result<(), GraphError> {
        let port = port.into();
        let target_name = self.require(target)?.name.clone();
        self.require(source.node)?;

        if source.node == target {
            return Err(GraphError::SelfLoop(target));
        }
        if self.wired.contains(&(target, port.clone())) {
            return Err(GraphError::duplicate(format!(
                "input '{port}' of node '{target_name}' is already connected"
            )));
        }

        let existed = self.topology.contains_edge(source.node, target);
        self.topology.add_edge(source.node, target, ());
        if !existed && is_cyclic_directed(&self.topology) {
            self.topology.remove_edge(source.node, target);
            return Err(GraphError::CycleDetected {
                from: source.node,
                to: target,
            });
        }

        self.wired.insert((target, port.clone()));
        self.edges.push(Edge {
            source: source.clone(),
            target,
            port,
        });
        Ok(())
    }

    pub fn set_param(
        &mut self,
        node: NodeId,
        key: impl Into<String>,
        value: impl Into<serde_json::Value>,
    ) -> Result<(), GraphError> {
        let spec = self
            .nodes
            .get_mut(node.index())
            .ok_or(GraphError::NodeNotFound(node))?;
        spec.params.insert(key.into(), value.into());
        Ok(())
    }

    pub fn node(&self, id: NodeId) -> Option<&NodeSpec> {
        self.nodes.get(id.index())
    }

    pub fn find(&self, name: &str) -> Option<NodeId> {
        self.by_name.get(name).copied()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.by_name.contains_key(name)
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    pub fn edge_count(&self) -> usize {
        self.edges.len()
    }

    pub fn edges(&self) -> &[Edge] {
        &self.edges
    }

    /// Edges feeding `node`, in connection order
    pub fn inputs_of(&self, node: NodeId) -> impl Iterator<Item = &Edge> {
        self.edges.iter().filter(move |e| e.target == node)
    }

    pub fn validate(&self) -> Result<(), GraphError> {
        toposort(&self.topology, None)
            .map(|_| ())
            .map_err(|cycle| GraphError::CycleDetected {
                from: cycle.node_id(),
                to: cycle.node_id(),
            })
    }

    /// Nodes in dependency order
    pub fn topological_order(&self) -> Result<Vec<NodeId>, GraphError> {
        toposort(&self.topology, None).map_err(|cycle| GraphError::CycleDetected {
            from: cycle.node_id(),
            to: cycle.node_id(),
        })
    }

    pub fn entry_nodes(&self) -> Vec<NodeId> {
        self.topology
            .nodes()
            .filter(|n| {
                self.topology
                    .neighbors_directed(*n, Direction::Incoming)
                    .next()
                    .is_none()
            })
            .collect()
    }

    pub fn exit_nodes(&self) -> Vec<NodeId> {
        self.topology
            .nodes()
            .filter(|n| {
                self.topology
                    .neighbors_directed(*n, Direction::Outgoing)
                    .next()
                    .is_none()
            })
            .collect()
    }

    /// Serializable snapshot for the execution engine
    pub fn to_document(&self) -> GraphDocument {
        let name_of = |id: NodeId| {
            self.node(id)
                .map_or_else(|| id.to_string(), |spec| spec.name.clone())
        };
        GraphDocument {
            name: self.name.clone(),
            nodes: self
                .nodes
                .iter()
                .enumerate()
                .map(|(index, spec)| NodeDocument {
                    id: NodeId::new(index),
                    name: spec.name.clone(),
                    kind: spec.kind.clone(),
                    params: spec.params.clone(),
                })
                .collect(),
            edges: self
                .edges
                .iter()
                .map(|edge| EdgeDocument {
                    source: name_of(edge.source.node),
                    source_port: edge.source.port.clone(),
                    target: name_of(edge.target),
                    target_port: edge.port.clone(),
                })
                .collect(),
        }
    }

    pub fn checkpoint(&self) -> Checkpoint {
        Checkpoint {
            nodes: self.nodes.len(),
            edges: self.edges.len(),
        }
    }

    /// Drop every node and edge added since `checkpoint`
    pub fn rollback_to(&mut self, checkpoint: Checkpoint) {
        let removed = self.edges.split_off(checkpoint.edges.min(self.edges.len()));
        for edge in &removed {
            self.wired.remove(&(edge.target, edge.port.clone()));
            let pair_kept = self
                .edges
                .iter()
                .any(|e| e.source.node == edge.source.node && e.target == edge.target);
            if !pair_kept {
                self.topology.remove_edge(edge.source.node, edge.target);
            }
        }

        // newest first, so the topology keeps its insertion order
        let mut nodes = 0;
        while self.nodes.len() > checkpoint.nodes {
            let Some(spec) = self.nodes.pop() else {
                break;
            };
            self.by_name.remove(&spec.name);
            self.topology.remove_node(NodeId::new(self.nodes.len()));
            nodes += 1;
        }
        if nodes > 0 || !removed.is_empty() {
            tracing::trace!(graph = %self.name, nodes, edges = removed.len(), "rolled back");
        }
    }

    fn require(&self, id: NodeId) -> Result<&NodeSpec, GraphError> {
        self.node(id).ok_or(GraphError::NodeNotFound(id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn graph_with(names: &[&str]) -> (WorkflowGraph, Vec<NodeId>) {
        let mut graph = WorkflowGraph::new("test");
        let ids = names
            .iter()
            .map(|n| graph.add_node(NodeSpec::new(*n, "step")).unwrap())
            .collect();
        (graph, ids)
    }

    #[test]
    fn duplicate_node_name_is_rejected() {
        let (mut graph, _) = graph_with(&["a"]);
        let err = graph.add_node(NodeSpec::new("a", "step")).unwrap_err();
        assert!(err.is_duplicate());
        assert_eq!(graph.node_count(), 1);
    }

    #[test]
    fn input_port_accepts_one_connection() {
        let (mut graph, ids) = graph_with(&["a", "b", "c"]);
        graph.connect(&ids[0].output("out"), ids[2], "in").unwrap();
        let err = graph.connect(&ids[1].output("out"), ids[2], "in").unwrap_err();
        assert!(err.is_duplicate());
        graph.connect(&ids[1].output("out"), ids[2], "other").unwrap();
        assert_eq!(graph.edge_count(), 2);
    }

    #[test]
    fn cycle_is_rejected_and_rolled_back() {
        let (mut graph, ids) = graph_with(&["a", "b"]);
        graph.connect(&ids[0].output("out"), ids[1], "in").unwrap();
        let err = graph.connect(&ids[1].output("out"), ids[0], "in").unwrap_err();
        assert!(matches!(err, GraphError::CycleDetected { .. }));
        assert!(graph.validate().is_ok());
        assert_eq!(graph.edge_count(), 1);
    }

    #[test]
    fn parallel_edges_between_same_nodes_are_kept() {
        let (mut graph, ids) = graph_with(&["a", "b"]);
        graph.connect(&ids[0].output("x"), ids[1], "in_x").unwrap();
        graph.connect(&ids[0].output("y"), ids[1], "in_y").unwrap();
        assert_eq!(graph.inputs_of(ids[1]).count(), 2);
        assert_eq!(graph.topological_order().unwrap(), vec![ids[0], ids[1]]);
    }

    #[test]
    fn self_loop_is_rejected() {
        let (mut graph, ids) = graph_with(&["a"]);
        assert_eq!(
            graph.connect(&ids[0].output("out"), ids[0], "in"),
            Err(GraphError::SelfLoop(ids[0]))
        );
    }

    #[test]
    fn rollback_restores_checkpoint() {
        let (mut graph, ids) = graph_with(&["a", "b"]);
        graph.connect(&ids[0].output("out"), ids[1], "in").unwrap();
        let checkpoint = graph.checkpoint();

        let c = graph.add_node(NodeSpec::new("c", "step")).unwrap();
        graph.connect(&ids[1].output("out"), c, "in").unwrap();
        graph.connect(&ids[0].output("extra"), ids[1], "extra").unwrap();
        graph.rollback_to(checkpoint);

        assert_eq!(graph.checkpoint(), checkpoint);
        assert!(!graph.contains("c"));
        assert_eq!(graph.inputs_of(ids[1]).count(), 1);
        let again = graph.add_node(NodeSpec::new("c", "step")).unwrap();
        assert_eq!(again, c);
        graph.connect(&ids[0].output("extra"), ids[1], "extra").unwrap();
        assert_eq!(graph.topological_order().unwrap().len(), 3);
    }

    #[test]
    fn entry_and_exit_nodes() {
        let (mut graph, ids) = graph_with(&["a", "b", "c"]);
        graph.connect(&ids[0].output("out"), ids[1], "in").unwrap();
        assert_eq!(graph.exit_nodes().len(), 2);
        assert!(graph.entry_nodes().contains(&ids[0]));
        assert!(graph.entry_nodes().contains(&ids[2]));
    }
}
