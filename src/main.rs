//! cmdflow: compose shell commands into a DAG and run them now or later
//!
//! Main entry point. Reads configuration from the environment and starts the
//! HTTP server.

use cmdflow::{config::Config, server::start_server};

/// Application entry point
///
/// The server provides:
/// - Flow editing, runs and scheduling at /api/flows/{id}/*
/// - Health check at /healthz
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = Config::default();
    start_server(config).await
}
