//! Run completion notifications
//!
//! Delivery is best-effort and happens off the run path: a slow or failing
//! sink never delays or changes a run's results.

use anyhow::Result;
use async_trait::async_trait;
use serde_json::json;
use std::sync::Arc;
use tokio::task::JoinHandle;

/// Notification sink collaborator
#[async_trait]
pub trait NotificationSink: Send + Sync {
    async fn send(&self, title: &str, body: &str) -> Result<()>;
}

/// Writes notifications to the log
#[derive(Debug, Default)]
pub struct LogSink;

#[async_trait]
impl NotificationSink for LogSink {
    async fn send(&self, title: &str, body: &str) -> Result<()> {
        tracing::info!("🔔 {} - {}", title, body);
        Ok(())
    }
}

/// POSTs `{ "title": ..., "body": ... }` to a webhook URL
#[derive(Debug, Clone)]
pub struct WebhookSink {
    client: reqwest::Client,
    url: String,
}

impl WebhookSink {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            url: url.into(),
        }
    }
}

#[async_trait]
impl NotificationSink for WebhookSink {
    async fn send(&self, title: &str, body: &str) -> Result<()> {
        self.client
            .post(&self.url)
            .json(&json!({ "title": title, "body": body }))
            .timeout(std::time::Duration::from_secs(10))
            .send()
            .await?
            .error_for_status()?;
        Ok(())
    }
}

/// Formats and dispatches completion signals
#[derive(Clone)]
pub struct ResultNotifier {
    sink: Arc<dyn NotificationSink>,
}

impl std::fmt::Debug for ResultNotifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResultNotifier").finish_non_exhaustive()
    }
}

impl ResultNotifier {
    pub fn new(sink: Arc<dyn NotificationSink>) -> Self {
        Self { sink }
    }

    pub fn title(flow_name: &str) -> String {
        format!("{} - Run Complete", flow_name)
    }

    pub fn body(has_errors: bool) -> &'static str {
        if has_errors {
            "Commands finished with errors"
        } else {
            "All commands finished successfully"
        }
    }

    /// Send the completion signal in the background
    ///
    /// Returns immediately. Delivery failures are logged and swallowed.
    pub fn notify(&self, flow_name: &str, has_errors: bool) -> JoinHandle<()> {
        let sink = Arc::clone(&self.sink);
        let title = Self::title(flow_name);
        let body = Self::body(has_errors);
        tokio::spawn(async move {
            if let Err(e) = sink.send(&title, body).await {
                tracing::warn!("⚠️ Notification '{}' not delivered: {}", title, e);
            }
        })
    }
}
