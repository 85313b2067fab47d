//! SQLite persistence layer for flow documents
//!
//! Each flow is stored as one JSON document keyed by flow id. The engine only
//! needs `load` and `save`; everything else about the storage is private.

use crate::flow::types::FlowDocument;
use anyhow::Result;
use async_trait::async_trait;
use sqlx::{
    sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions},
    Row,
};
use std::{collections::HashMap, path::Path, sync::Mutex};

/// Flow persistence collaborator
#[async_trait]
pub trait FlowStore: Send + Sync {
    /// Load a flow document; `Ok(None)` when no document exists
    async fn load(&self, flow_id: &str) -> Result<Option<FlowDocument>>;

    /// Store a flow document, replacing any previous version
    async fn save(&self, flow_id: &str, document: &FlowDocument) -> Result<()>;
}

/// SQLite-based flow storage
///
/// Documents live in a JSON column; `created_at`/`updated_at` are maintained
/// by the database.
#[derive(Debug, Clone)]
pub struct SqliteFlowStore {
    /// SQLite connection pool for the flows database
    pool: SqlitePool,
}

impl SqliteFlowStore {
    /// Wrap an existing pool. Call [`SqliteFlowStore::init_schema`] before use.
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Open (creating if missing) the database file at `path` and prepare the schema
    pub async fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        tracing::info!("🗄️ Opening flow database: {}", path.display());
        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true);
        let pool = SqlitePool::connect_with(options).await?;
        let store = Self::new(pool);
        store.init_schema().await?;
        Ok(store)
    }

    /// Private in-memory database, mostly for tests
    ///
    /// The pool is pinned to a single long-lived connection because every
    /// SQLite memory connection is its own database.
    pub async fn in_memory() -> Result<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect("sqlite::memory:")
            .await?;
        let store = Self::new(pool);
        store.init_schema().await?;
        Ok(store)
    }

    /// Create the flows table. Safe to call repeatedly.
    pub async fn init_schema(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS flows (
                id TEXT PRIMARY KEY,
                definition JSON NOT NULL,
                created_at TIMESTAMP DEFAULT CURRENT_TIMESTAMP,
                updated_at TIMESTAMP DEFAULT CURRENT_TIMESTAMP
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}

#[async_trait]
impl FlowStore for SqliteFlowStore {
    async fn load(&self, flow_id: &str) -> Result<Option<FlowDocument>> {
        let row = sqlx::query("SELECT definition FROM flows WHERE id = ?")
            .bind(flow_id)
            .fetch_optional(&self.pool)
            .await?;

        match row {
            Some(row) => {
                let definition_json: String = row.get("definition");
                let document: FlowDocument = serde_json::from_str(&definition_json)?;
                Ok(Some(document))
            }
            None => Ok(None),
        }
    }

    /// Uses UPSERT so create and update share one statement.
    async fn save(&self, flow_id: &str, document: &FlowDocument) -> Result<()> {
        let definition_json = serde_json::to_string(document)?;

        sqlx::query(
            r#"
            INSERT INTO flows (id, definition, updated_at)
            VALUES (?, ?, CURRENT_TIMESTAMP)
            ON CONFLICT(id) DO UPDATE SET
                definition = excluded.definition,
                updated_at = CURRENT_TIMESTAMP
            "#,
        )
        .bind(flow_id)
        .bind(&definition_json)
        .execute(&self.pool)
        .await?;

        tracing::debug!("💾 Saved flow '{}' ({} bytes)", flow_id, definition_json.len());
        Ok(())
    }
}

/// Process-local store, for tests and embedders that persist elsewhere
#[derive(Debug, Default)]
pub struct MemoryFlowStore {
    documents: Mutex<HashMap<String, FlowDocument>>,
}

#[async_trait]
impl FlowStore for MemoryFlowStore {
    async fn load(&self, flow_id: &str) -> Result<Option<FlowDocument>> {
        let documents = self
            .documents
            .lock()
            .map_err(|_| anyhow::anyhow!("flow store lock poisoned"))?;
        Ok(documents.get(flow_id).cloned())
    }

    async fn save(&self, flow_id: &str, document: &FlowDocument) -> Result<()> {
        self.documents
            .lock()
            .map_err(|_| anyhow::anyhow!("flow store lock poisoned"))?
            .insert(flow_id.to_string(), document.clone());
        Ok(())
    }
}
