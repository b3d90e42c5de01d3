//! Cost store — the narrow persistence interface for cost entries.
//!
//! The core only ever inserts. Two implementations ship: an in-memory
//! store for tests and embedded runs, and a Postgres store whose DDL keeps
//! ten fractional digits on `cost_usd` and carries the query-path indexes
//! the host UI needs.

use std::sync::Mutex;

use async_trait::async_trait;
use serde_json::Value;
use tokio_postgres::NoTls;
use tracing::{error, info};
use uuid::Uuid;

use super::CostEntry;

/// Store failures. The recorder logs them; they never reach a consensus
/// result.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("connection failed: {0}")]
    Connection(String),

    #[error("insert failed: {0}")]
    Insert(String),

    #[error("invalid entry: {0}")]
    InvalidEntry(String),
}

/// Result type for store operations.
pub type StoreResult<T> = Result<T, StoreError>;

/// Narrow recording interface; writes are independent per entry.
#[async_trait]
pub trait CostStore: Send + Sync {
    async fn insert(&self, entry: &CostEntry) -> StoreResult<()>;
}

/// In-memory store used by tests and embedded runs.
#[derive(Debug, Default)]
pub struct MemoryCostStore {
    entries: Mutex<Vec<CostEntry>>,
}

impl MemoryCostStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Copy of everything inserted so far, in insertion order.
    pub fn snapshot(&self) -> Vec<CostEntry> {
        self.entries.lock().expect("store poisoned").clone()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().expect("store poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl CostStore for MemoryCostStore {
    async fn insert(&self, entry: &CostEntry) -> StoreResult<()> {
        self.entries
            .lock()
            .map_err(|e| StoreError::Insert(e.to_string()))?
            .push(entry.clone());
        Ok(())
    }
}

/// Table and index definitions for the Postgres store.
///
/// `task_id` cascades with its task; `cost_usd` is NUMERIC(18,10) so
/// sub-micro-dollar embedding prices survive; metadata is JSONB with a GIN
/// index for provider-data queries.
pub const SCHEMA_SQL: &str = "\
CREATE TABLE IF NOT EXISTS cost_entries (
    id          UUID PRIMARY KEY,
    agent_id    TEXT NOT NULL,
    task_id     UUID NOT NULL REFERENCES tasks (id) ON DELETE CASCADE,
    cost_type   TEXT NOT NULL CHECK (cost_type IN (
        'llm_consensus',
        'llm_embedding',
        'llm_answer',
        'llm_summarization',
        'child_budget_absorbed'
    )),
    cost_usd    NUMERIC(18, 10),
    metadata    JSONB NOT NULL DEFAULT '{}'::jsonb,
    inserted_at TIMESTAMPTZ NOT NULL DEFAULT now()
);
CREATE INDEX IF NOT EXISTS cost_entries_task_inserted_idx
    ON cost_entries (task_id, inserted_at);
CREATE INDEX IF NOT EXISTS cost_entries_agent_inserted_idx
    ON cost_entries (agent_id, inserted_at);
CREATE INDEX IF NOT EXISTS cost_entries_task_type_idx
    ON cost_entries (task_id, cost_type);
CREATE INDEX IF NOT EXISTS cost_entries_agent_type_idx
    ON cost_entries (agent_id, cost_type);
CREATE INDEX IF NOT EXISTS cost_entries_metadata_idx
    ON cost_entries USING GIN (metadata);
";

const INSERT_SQL: &str = "\
INSERT INTO cost_entries (id, agent_id, task_id, cost_type, cost_usd, metadata, inserted_at)
VALUES ($1, $2, $3, $4, $5, $6, $7)";

/// Postgres-backed cost store.
pub struct PostgresCostStore {
    client: tokio_postgres::Client,
}

impl PostgresCostStore {
    /// Connect and spawn the connection driver task.
    pub async fn connect(config: &str) -> StoreResult<Self> {
        let (client, connection) = tokio_postgres::connect(config, NoTls)
            .await
            .map_err(|e| StoreError::Connection(e.to_string()))?;
        tokio::spawn(async move {
            if let Err(e) = connection.await {
                error!(error = %e, "cost store connection closed");
            }
        });
        info!("cost store connected");
        Ok(Self { client })
    }

    /// Create the table and indexes if they do not exist.
    pub async fn ensure_schema(&self) -> StoreResult<()> {
        self.client
            .batch_execute(SCHEMA_SQL)
            .await
            .map_err(|e| StoreError::Connection(e.to_string()))
    }
}

#[async_trait]
impl CostStore for PostgresCostStore {
    async fn insert(&self, entry: &CostEntry) -> StoreResult<()> {
        let task_id = Uuid::parse_str(&entry.task_id)
            .map_err(|e| StoreError::InvalidEntry(format!("task_id: {e}")))?;
        let metadata = Value::Object(entry.metadata.clone());
        self.client
            .execute(
                INSERT_SQL,
                &[
                    &entry.id,
                    &entry.agent_id,
                    &task_id,
                    &entry.cost_type.as_str(),
                    &entry.cost_usd,
                    &metadata,
                    &entry.recorded_at,
                ],
            )
            .await
            .map_err(|e| StoreError::Insert(e.to_string()))?;
        Ok(())
    }
}
