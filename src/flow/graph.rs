//! In-memory flow graph with DAG enforcement at edit time
//!
//! Every edge insertion is checked by [`would_create_cycle`] before it is
//! accepted, so a [`FlowGraph`] is acyclic by construction and the execution
//! engine never has to repair it.

use crate::flow::types::{Edge, InstructionData, Node, NodeKind, NodeType, Position};
use chrono::{DateTime, Utc};
use std::collections::{HashMap, HashSet};
use thiserror::Error;

/// Graph integrity violations
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GraphError {
    #[error("edge {0} -> {0} would connect a node to itself")]
    SelfLoop(String),
    #[error("edge {from} -> {to} would close a cycle")]
    Cycle { from: String, to: String },
    #[error("unknown node: {0}")]
    UnknownNode(String),
    #[error("node {0} does not accept this edit")]
    KindMismatch(String),
    #[error("execution order consumed {ordered} of {total} nodes; graph is not acyclic")]
    IncompleteOrder { ordered: usize, total: usize },
}

/// Would adding `source -> target` break the DAG invariant?
///
/// Rejects self-loops outright, otherwise searches from `target` along the
/// existing edges; reaching `source` means the new edge closes a cycle.
pub fn would_create_cycle(source: &str, target: &str, edges: &[Edge]) -> bool {
    if source == target {
        return true;
    }
    let mut adjacency: HashMap<&str, Vec<&str>> = HashMap::new();
    for edge in edges {
        adjacency
            .entry(edge.source.as_str())
            .or_default()
            .push(edge.target.as_str());
    }
    let mut visited = HashSet::new();
    reaches(&adjacency, target, source, &mut visited)
}

/// Iterative DFS from `from`; each node is expanded at most once.
fn reaches<'a>(
    adjacency: &HashMap<&'a str, Vec<&'a str>>,
    from: &'a str,
    goal: &str,
    visited: &mut HashSet<&'a str>,
) -> bool {
    let mut stack = vec![from];
    while let Some(current) = stack.pop() {
        if current == goal {
            return true;
        }
        if !visited.insert(current) {
            continue;
        }
        if let Some(next) = adjacency.get(current) {
            stack.extend(next.iter().copied().filter(|n| !visited.contains(n)));
        }
    }
    false
}

/// Read-only copy of the graph handed to the execution engine
#[derive(Debug, Clone, Default)]
pub struct GraphSnapshot {
    pub nodes: Vec<Node>,
    pub edges: Vec<Edge>,
}

/// Node and edge set of one flow
#[derive(Debug, Clone, Default)]
pub struct FlowGraph {
    nodes: Vec<Node>,
    edges: Vec<Edge>,
}

impl FlowGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuild a graph from persisted parts
    ///
    /// Edges are replayed through [`FlowGraph::add_edge`]; any edge that would
    /// violate the DAG invariant or names a missing node is dropped and
    /// reported back to the caller.
    pub fn from_parts(nodes: Vec<Node>, edges: Vec<Edge>) -> (Self, Vec<(Edge, GraphError)>) {
        let mut seen = HashSet::new();
        let nodes: Vec<Node> = nodes
            .into_iter()
            .filter(|node| seen.insert(node.id.clone()))
            .collect();
        let mut graph = Self {
            nodes,
            edges: Vec::new(),
        };
        let mut rejected = Vec::new();
        for edge in edges {
            if let Err(e) = graph.add_edge(&edge.source, &edge.target) {
                rejected.push((edge, e));
            }
        }
        (graph, rejected)
    }

    pub fn nodes(&self) -> &[Node] {
        &self.nodes
    }

    pub fn edges(&self) -> &[Edge] {
        &self.edges
    }

    pub fn node(&self, id: &str) -> Option<&Node> {
        self.nodes.iter().find(|node| node.id == id)
    }

    fn node_mut(&mut self, id: &str) -> Option<&mut Node> {
        self.nodes.iter_mut().find(|node| node.id == id)
    }

    /// Create a node with a fresh UUID and an empty payload
    pub fn add_node(&mut self, node_type: NodeType, position: Option<Position>) -> Node {
        let node = Node {
            id: uuid::Uuid::new_v4().to_string(),
            kind: node_type.empty_kind(),
            position,
        };
        self.nodes.push(node.clone());
        node
    }

    /// Remove a node and every edge touching it. Unknown ids are ignored.
    pub fn remove_node(&mut self, id: &str) {
        self.nodes.retain(|node| node.id != id);
        self.edges.retain(|edge| edge.source != id && edge.target != id);
    }

    /// Insert `source -> target` if it keeps the graph a DAG
    ///
    /// Re-adding an existing edge is accepted without duplicating it.
    pub fn add_edge(&mut self, source: &str, target: &str) -> Result<Edge, GraphError> {
        for id in [source, target] {
            if self.node(id).is_none() {
                return Err(GraphError::UnknownNode(id.to_string()));
            }
        }
        if source == target {
            return Err(GraphError::SelfLoop(source.to_string()));
        }
        let edge = Edge::new(source, target);
        if self.edges.contains(&edge) {
            return Ok(edge);
        }
        if would_create_cycle(source, target, &self.edges) {
            return Err(GraphError::Cycle {
                from: source.to_string(),
                to: target.to_string(),
            });
        }
        self.edges.push(edge.clone());
        Ok(edge)
    }

    /// Remove `source -> target`; returns whether an edge was removed
    pub fn remove_edge(&mut self, source: &str, target: &str) -> bool {
        let before = self.edges.len();
        self.edges
            .retain(|edge| !(edge.source == source && edge.target == target));
        self.edges.len() != before
    }

    /// Replace an instruction node's command
    pub fn set_command(&mut self, id: &str, command: &str) -> Result<&Node, GraphError> {
        let node = self
            .node_mut(id)
            .ok_or_else(|| GraphError::UnknownNode(id.to_string()))?;
        match &mut node.kind {
            NodeKind::Instruction(data) => data.command = command.to_string(),
            NodeKind::Note(_) => return Err(GraphError::KindMismatch(id.to_string())),
        }
        Ok(node)
    }

    /// Replace a note node's text
    pub fn set_note_text(&mut self, id: &str, text: &str) -> Result<&Node, GraphError> {
        let node = self
            .node_mut(id)
            .ok_or_else(|| GraphError::UnknownNode(id.to_string()))?;
        match &mut node.kind {
            NodeKind::Note(data) => data.text = text.to_string(),
            NodeKind::Instruction(_) => return Err(GraphError::KindMismatch(id.to_string())),
        }
        Ok(node)
    }

    /// Copy of the current nodes and edges
    pub fn snapshot(&self) -> GraphSnapshot {
        GraphSnapshot {
            nodes: self.nodes.clone(),
            edges: self.edges.clone(),
        }
    }

    /// Write run results back into instruction payloads
    ///
    /// Nodes deleted while the run was in flight are skipped.
    pub fn apply_results<'a>(
        &mut self,
        results: impl IntoIterator<Item = (&'a str, String)>,
        finished_at: DateTime<Utc>,
    ) {
        for (id, text) in results {
            if let Some(Node {
                kind: NodeKind::Instruction(InstructionData {
                    last_run, result, ..
                }),
                ..
            }) = self.node_mut(id)
            {
                *result = Some(text);
                *last_run = Some(finished_at);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn graph_with(n: usize) -> (FlowGraph, Vec<String>) {
        let mut graph = FlowGraph::new();
        let ids = (0..n)
            .map(|_| graph.add_node(NodeType::Instruction, None).id)
            .collect();
        (graph, ids)
    }

    fn is_acyclic(graph: &FlowGraph) -> bool {
        graph
            .edges()
            .iter()
            .all(|e| e.source != e.target)
            && graph.edges().iter().enumerate().all(|(i, e)| {
                let mut others = graph.edges().to_vec();
                others.remove(i);
                !would_create_cycle(&e.source, &e.target, &others)
            })
    }

    #[test]
    fn self_loop_is_rejected() {
        assert!(would_create_cycle("a", "a", &[]));
        let (mut graph, ids) = graph_with(1);
        assert_eq!(
            graph.add_edge(&ids[0], &ids[0]),
            Err(GraphError::SelfLoop(ids[0].clone()))
        );
        assert!(graph.edges().is_empty());
    }

    #[test]
    fn closing_edge_is_rejected_and_edges_unchanged() {
        let (mut graph, ids) = graph_with(3);
        graph.add_edge(&ids[0], &ids[1]).unwrap();
        graph.add_edge(&ids[1], &ids[2]).unwrap();
        let before = graph.edges().to_vec();

        let err = graph.add_edge(&ids[2], &ids[0]).unwrap_err();
        assert!(matches!(err, GraphError::Cycle { .. }));
        assert_eq!(graph.edges(), before.as_slice());
    }

    #[test]
    fn diamond_allows_shared_descendants() {
        let (mut graph, ids) = graph_with(4);
        graph.add_edge(&ids[0], &ids[1]).unwrap();
        graph.add_edge(&ids[0], &ids[2]).unwrap();
        graph.add_edge(&ids[1], &ids[3]).unwrap();
        graph.add_edge(&ids[2], &ids[3]).unwrap();
        assert!(graph.add_edge(&ids[3], &ids[0]).is_err());
        assert!(graph.add_edge(&ids[1], &ids[2]).is_ok());
    }

    #[test]
    fn wide_layered_graph_terminates() {
        // Every node of layer k points at every node of layer k+1.
        let layers = 12;
        let width = 4;
        let mut edges = Vec::new();
        for layer in 0..layers - 1 {
            for a in 0..width {
                for b in 0..width {
                    edges.push(Edge::new(
                        format!("{}-{}", layer, a),
                        format!("{}-{}", layer + 1, b),
                    ));
                }
            }
        }
        assert!(!would_create_cycle("0-0", "11-0", &edges));
        assert!(would_create_cycle("11-0", "0-0", &edges));
    }

    #[test]
    fn unknown_endpoints_are_rejected() {
        let (mut graph, ids) = graph_with(1);
        assert_eq!(
            graph.add_edge(&ids[0], "ghost"),
            Err(GraphError::UnknownNode("ghost".to_string()))
        );
    }

    #[test]
    fn duplicate_edge_is_a_noop() {
        let (mut graph, ids) = graph_with(2);
        graph.add_edge(&ids[0], &ids[1]).unwrap();
        graph.add_edge(&ids[0], &ids[1]).unwrap();
        assert_eq!(graph.edges().len(), 1);
    }

    #[test]
    fn remove_node_drops_incident_edges() {
        let (mut graph, ids) = graph_with(3);
        graph.add_edge(&ids[0], &ids[1]).unwrap();
        graph.add_edge(&ids[1], &ids[2]).unwrap();
        graph.remove_node(&ids[1]);
        assert_eq!(graph.nodes().len(), 2);
        assert!(graph.edges().is_empty());
        graph.remove_node("never-existed");
        assert_eq!(graph.nodes().len(), 2);
    }

    #[test]
    fn arbitrary_edit_sequence_stays_acyclic() {
        let (mut graph, ids) = graph_with(6);
        // Try every ordered pair, in two passes, interleaving removals.
        for pass in 0..2 {
            for (i, a) in ids.iter().enumerate() {
                for (j, b) in ids.iter().enumerate() {
                    let _ = graph.add_edge(a, b);
                    if pass == 1 && (i + j) % 5 == 0 {
                        graph.remove_edge(a, b);
                    }
                }
            }
            assert!(is_acyclic(&graph));
        }
    }

    #[test]
    fn from_parts_drops_offending_edges() {
        let mut source = FlowGraph::new();
        let a = source.add_node(NodeType::Instruction, None);
        let b = source.add_node(NodeType::Note, None);
        let edges = vec![
            Edge::new(&a.id, &b.id),
            Edge::new(&b.id, &a.id),
            Edge::new(&a.id, "missing"),
        ];
        let (graph, rejected) = FlowGraph::from_parts(source.nodes().to_vec(), edges);
        assert_eq!(graph.edges(), &[Edge::new(&a.id, &b.id)]);
        assert_eq!(rejected.len(), 2);
    }

    #[test]
    fn payload_edits_respect_kind() {
        let mut graph = FlowGraph::new();
        let cmd = graph.add_node(NodeType::Instruction, None);
        let note = graph.add_node(NodeType::Note, None);
        graph.set_command(&cmd.id, "echo hi").unwrap();
        graph.set_note_text(&note.id, "remember").unwrap();
        assert!(graph.set_command(&note.id, "ls").is_err());
        assert!(graph.set_note_text(&cmd.id, "x").is_err());
        match &graph.node(&cmd.id).unwrap().kind {
            NodeKind::Instruction(data) => assert_eq!(data.command, "echo hi"),
            other => panic!("unexpected kind {:?}", other),
        }
    }

    #[test]
    fn apply_results_touches_only_instructions() {
        let mut graph = FlowGraph::new();
        let cmd = graph.add_node(NodeType::Instruction, None);
        let note = graph.add_node(NodeType::Note, None);
        let now = Utc::now();
        graph.apply_results(
            [(cmd.id.as_str(), "ok".to_string()), (note.id.as_str(), "x".to_string())],
            now,
        );
        match &graph.node(&cmd.id).unwrap().kind {
            NodeKind::Instruction(data) => {
                assert_eq!(data.result.as_deref(), Some("ok"));
                assert_eq!(data.last_run, Some(now));
            }
            other => panic!("unexpected kind {:?}", other),
        }
        assert_eq!(graph.node(&note.id).unwrap(), &note);
    }
}
