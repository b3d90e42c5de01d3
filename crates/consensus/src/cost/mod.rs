//! Cost accounting — entries, the append-only accumulator, the store, and
//! the recorder that flushes a run's accumulated entries.

pub mod accumulator;
pub mod recorder;
pub mod store;

pub use accumulator::CostAccumulator;
pub use recorder::{CostRecorder, FlushReport};
pub use store::{CostStore, MemoryCostStore, PostgresCostStore, StoreError, StoreResult};

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

/// What a cost entry paid for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CostType {
    /// A model call made during consensus deliberation.
    LlmConsensus,
    /// An embedding lookup for semantic similarity.
    LlmEmbedding,
    /// A direct answer call outside deliberation.
    LlmAnswer,
    /// A history summarization call.
    LlmSummarization,
    /// Budget absorbed from a completed child agent.
    ChildBudgetAbsorbed,
}

impl CostType {
    pub fn as_str(self) -> &'static str {
        match self {
            CostType::LlmConsensus => "llm_consensus",
            CostType::LlmEmbedding => "llm_embedding",
            CostType::LlmAnswer => "llm_answer",
            CostType::LlmSummarization => "llm_summarization",
            CostType::ChildBudgetAbsorbed => "child_budget_absorbed",
        }
    }
}

impl std::fmt::Display for CostType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One immutable cost record.
///
/// `cost_usd` is a decimal (10 fractional digits survive persistence) and
/// may be absent when the provider did not report a price.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CostEntry {
    pub id: Uuid,
    pub agent_id: String,
    pub task_id: String,
    pub cost_type: CostType,
    pub cost_usd: Option<Decimal>,
    /// Free-form provider data: model identifier, token counts, latencies.
    pub metadata: Map<String, Value>,
    pub recorded_at: DateTime<Utc>,
}

impl CostEntry {
    pub fn new(agent_id: impl Into<String>, task_id: impl Into<String>, cost_type: CostType) -> Self {
        Self {
            id: Uuid::new_v4(),
            agent_id: agent_id.into(),
            task_id: task_id.into(),
            cost_type,
            cost_usd: None,
            metadata: Map::new(),
            recorded_at: Utc::now(),
        }
    }

    pub fn with_cost(mut self, cost_usd: Decimal) -> Self {
        self.cost_usd = Some(cost_usd);
        self
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: Value) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }

    /// The model identifier recorded in metadata, if any.
    pub fn model_spec(&self) -> Option<&str> {
        self.metadata.get("model").and_then(Value::as_str)
    }
}
