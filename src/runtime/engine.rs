//! Petgraph-based flow execution engine
//!
//! Turns a graph snapshot into a linear order with Kahn's algorithm and runs
//! the instruction nodes one after another.

use crate::flow::graph::{GraphError, GraphSnapshot};
use crate::flow::types::{Node, RunResult};
use crate::runtime::executor::NodeExecutor;
use chrono::{DateTime, Utc};
use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::visit::EdgeRef;
use petgraph::Direction;
use serde::Serialize;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

/// Result of one node inside a run
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeRunRecord {
    pub node_id: String,
    pub result: RunResult,
}

/// Aggregate outcome of a run
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RunReport {
    /// Node ids in the order they were considered
    pub order: Vec<String>,
    /// One record per node that actually executed, in execution order
    pub results: Vec<NodeRunRecord>,
    /// True if any executed node failed
    pub has_errors: bool,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

impl RunReport {
    pub fn result_for(&self, node_id: &str) -> Option<&RunResult> {
        self.results
            .iter()
            .find(|record| record.node_id == node_id)
            .map(|record| &record.result)
    }
}

/// Sequential execution engine
#[derive(Debug)]
pub struct ExecutionEngine {
    /// Node executor for handling individual node execution
    executor: Arc<NodeExecutor>,
}

impl ExecutionEngine {
    /// Create new execution engine with node executor
    pub fn new(executor: Arc<NodeExecutor>) -> Self {
        Self { executor }
    }

    /// Compute a topological order with Kahn's algorithm
    ///
    /// Ties are broken deterministically: the ready queue is seeded in node
    /// list order, and a node's successors are released in edge list order.
    /// If the queue drains before every node is placed the graph had a cycle,
    /// which is reported as an integrity error instead of a truncated order.
    pub fn compute_order(snapshot: &GraphSnapshot) -> Result<Vec<String>, GraphError> {
        let mut graph: DiGraph<&str, ()> = DiGraph::new();
        let mut node_id_to_index: HashMap<&str, NodeIndex> = HashMap::new();

        for node in &snapshot.nodes {
            let index = graph.add_node(node.id.as_str());
            node_id_to_index.insert(node.id.as_str(), index);
        }
        for edge in &snapshot.edges {
            let from = node_id_to_index
                .get(edge.source.as_str())
                .ok_or_else(|| GraphError::UnknownNode(edge.source.clone()))?;
            let to = node_id_to_index
                .get(edge.target.as_str())
                .ok_or_else(|| GraphError::UnknownNode(edge.target.clone()))?;
            graph.add_edge(*from, *to, ());
        }

        let mut in_degree: Vec<usize> = graph
            .node_indices()
            .map(|index| graph.edges_directed(index, Direction::Incoming).count())
            .collect();

        let mut queue: VecDeque<NodeIndex> = graph
            .node_indices()
            .filter(|index| in_degree[index.index()] == 0)
            .collect();

        let mut order = Vec::with_capacity(graph.node_count());
        while let Some(current) = queue.pop_front() {
            order.push(graph[current].to_string());

            // petgraph walks adjacency newest-first; restore insertion order.
            let mut outgoing: Vec<_> = graph
                .edges_directed(current, Direction::Outgoing)
                .map(|edge| (edge.id(), edge.target()))
                .collect();
            outgoing.sort_by_key(|(edge_id, _)| edge_id.index());

            for (_, target) in outgoing {
                let degree = &mut in_degree[target.index()];
                *degree -= 1;
                if *degree == 0 {
                    queue.push_back(target);
                }
            }
        }

        if order.len() != graph.node_count() {
            tracing::error!(
                "❌ Execution order covers {} of {} nodes - graph contains a cycle",
                order.len(),
                graph.node_count()
            );
            return Err(GraphError::IncompleteOrder {
                ordered: order.len(),
                total: graph.node_count(),
            });
        }

        tracing::debug!("📋 Execution order: {:?}", order);
        Ok(order)
    }

    /// Run the nodes of `order` strictly one at a time
    ///
    /// A failed node does not stop the run; later nodes still execute and
    /// the failure is folded into `has_errors`.
    pub async fn execute(&self, order: &[String], nodes: &[Node]) -> RunReport {
        let started_at = Utc::now();
        let by_id: HashMap<&str, &Node> = nodes.iter().map(|n| (n.id.as_str(), n)).collect();
        let mut results = Vec::new();
        let mut has_errors = false;

        for (step, node_id) in order.iter().enumerate() {
            let Some(node) = by_id.get(node_id.as_str()) else {
                tracing::warn!("⚠️ Node '{}' in order but not in snapshot, skipping", node_id);
                continue;
            };
            tracing::debug!("📍 Step {}/{}: node '{}'", step + 1, order.len(), node_id);

            if let Some(result) = self.executor.execute_node(node).await {
                has_errors |= !result.success;
                results.push(NodeRunRecord {
                    node_id: node_id.clone(),
                    result,
                });
            }
        }

        RunReport {
            order: order.to_vec(),
            results,
            has_errors,
            started_at,
            finished_at: Utc::now(),
        }
    }

    /// Order and execute a snapshot
    pub async fn run(&self, snapshot: &GraphSnapshot) -> Result<RunReport, GraphError> {
        let run_start = std::time::Instant::now();
        tracing::info!(
            "🚀 Starting run: {} nodes, {} edges",
            snapshot.nodes.len(),
            snapshot.edges.len()
        );

        let order = Self::compute_order(snapshot)?;
        let report = self.execute(&order, &snapshot.nodes).await;

        tracing::info!(
            "🎉 Run finished in {:?}: {} executed, errors: {}",
            run_start.elapsed(),
            report.results.len(),
            report.has_errors
        );
        Ok(report)
    }
}
