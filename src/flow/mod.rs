//! Flow model layer
//!
//! Node/edge types, the DAG-preserving graph model, persistence and the
//! registry of open flows.

// Node, edge and document types
pub mod types;

// Graph model and cycle guard
pub mod graph;

// SQLite persistence for flow documents
pub mod storage;

// Open flows keyed by id
pub mod registry;

pub use graph::{FlowGraph, GraphError, GraphSnapshot};
pub use registry::FlowRegistry;
pub use storage::{FlowStore, MemoryFlowStore, SqliteFlowStore};
pub use types::{Edge, FlowDocument, Node, NodeKind, NodeType, Position, RunResult};
