//! cmdflow: shell-command flows with topological execution and
//! natural-language scheduling
//!
//! A flow is a DAG of instruction nodes (shell commands) and note nodes. Runs
//! execute instructions one at a time in dependency order; a flow can also be
//! scheduled once with text such as "tomorrow 3pm".

// Core configuration and setup
pub mod config;

// Flow model layer - types, DAG-enforcing graph, storage and open-flow registry
pub mod flow;

// Runtime - ordering, execution, scheduling and notifications
pub mod runtime;

// HTTP API layer
pub mod api;

// Server setup and initialization
pub mod server;

pub use flow::{Edge, FlowDocument, FlowGraph, GraphError, Node, NodeKind, NodeType};
pub use runtime::{ExecutionEngine, FlowSession, RunReport};
pub use server::start_server;
