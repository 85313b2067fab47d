//! Server setup and initialization
//!
//! Wires together storage, the command runner, the execution engine, the
//! notifier and the open-flow registry, then mounts the HTTP routes.

use crate::{
    api::{create_flow_routes, AppState},
    config::Config,
    flow::{registry::FlowRegistry, storage::SqliteFlowStore},
    runtime::{
        engine::ExecutionEngine,
        executor::{NodeExecutor, ShellCommandRunner},
        notifier::{LogSink, NotificationSink, ResultNotifier, WebhookSink},
        session::SessionDeps,
        timeparse::NaturalDateParser,
    },
};
use anyhow::Result;
use axum::{routing::get, Router};
use std::{path::PathBuf, sync::Arc};
use tokio::net::TcpListener;

/// Build the shared services and the registry they feed
pub async fn create_registry(config: &Config) -> Result<Arc<FlowRegistry>> {
    tracing::info!("📁 Ensuring data directory exists: {}", config.storage.data_dir);
    std::fs::create_dir_all(&config.storage.data_dir)
        .map_err(|e| anyhow::anyhow!("Failed to create data directory: {}", e))?;

    let store = SqliteFlowStore::open(config.storage.database_path())
        .await
        .map_err(|e| anyhow::anyhow!("Failed to open flow database: {}", e))?;

    tracing::info!("⚙️ Commands run with '{} -c'", config.runtime.shell);
    let runner = ShellCommandRunner::new(
        config.runtime.shell.clone(),
        config.runtime.working_dir.as_ref().map(PathBuf::from),
    );
    let engine = ExecutionEngine::new(Arc::new(NodeExecutor::new(Arc::new(runner))));

    let sink: Arc<dyn NotificationSink> = match &config.notify.webhook_url {
        Some(url) => {
            tracing::info!("🔔 Notifications go to {}", url);
            Arc::new(WebhookSink::new(url.clone()))
        }
        None => Arc::new(LogSink),
    };

    Ok(Arc::new(FlowRegistry::new(SessionDeps {
        engine: Arc::new(engine),
        store: Arc::new(store),
        notifier: ResultNotifier::new(sink),
        parser: Arc::new(NaturalDateParser),
        debounce: config.runtime.schedule_debounce(),
    })))
}

/// Create the main Axum application
pub fn create_app(registry: Arc<FlowRegistry>) -> Router {
    Router::new()
        .route("/healthz", get(health_check))
        .merge(create_flow_routes().with_state(AppState { registry }))
}

/// Start the HTTP server with the given configuration
///
/// Runs until Ctrl-C, then closes every open flow so no timer outlives the
/// process.
pub async fn start_server(config: Config) -> Result<()> {
    tracing_subscriber::fmt()
        .with_target(false)
        .with_thread_ids(true)
        .with_level(true)
        .init();

    tracing::info!("Starting cmdflow server...");

    let registry = create_registry(&config).await?;
    let app = create_app(Arc::clone(&registry));

    let bind_addr = format!("{}:{}", config.server.host, config.server.port);
    let listener = TcpListener::bind(&bind_addr).await?;
    tracing::info!("Server listening on http://{}", bind_addr);

    axum::serve(listener, app.into_make_service())
        .with_graceful_shutdown(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::error!("❌ Failed to listen for shutdown signal: {}", e);
            }
        })
        .await?;

    registry.close_all().await;
    tracing::info!("👋 Server stopped");
    Ok(())
}

/// Health check endpoint handler
async fn health_check() -> &'static str {
    "ok"
}
