//! HTTP API layer
//!
//! REST endpoints over per-flow operations: graph edits, ordering, runs,
//! scheduling and persistence.

// Per-flow endpoints under /api/flows/{id}
pub mod flows;

pub use flows::{create_flow_routes, AppState};
