//! Model seam — the injected query function and its wire shapes.
//!
//! The core never owns an HTTP client. The runtime injects a [`ModelClient`]
//! and the round controller fans one `complete` call out per model in the
//! pool. Implementations report any provider cost on the reply; the
//! controller folds those entries into the run's accumulator in pool order
//! so accounting stays deterministic.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::cost::CostEntry;

/// Model identifier, e.g. `openai:gpt-4o` or `anthropic:claude-sonnet`.
pub type ModelId = String;

/// Chat role.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    System,
    User,
    Assistant,
}

/// One message in the shared deliberation history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }
}

/// Per-call options handed to the injected client.
#[derive(Debug, Clone)]
pub struct CallOptions {
    /// 1-based round index.
    pub round: u32,
    /// Sampling temperature selected by the schedule for this model/round.
    pub temperature: f64,
    pub agent_id: String,
    pub task_id: String,
    /// Per-call deadline the client is expected to honour itself.
    pub timeout: Duration,
}

/// A successful model reply.
#[derive(Debug, Clone)]
pub struct ModelReply {
    pub model: ModelId,
    /// Raw reply text; the action parser extracts the payload.
    pub text: String,
    /// Provider costs incurred by this call, in occurrence order. The
    /// controller appends these to the run accumulator; losing them is a
    /// cost-accounting bug.
    pub costs: Vec<CostEntry>,
}

/// A model that produced no usable reply this round.
#[derive(Debug, Clone)]
pub struct ModelFailure {
    pub model: ModelId,
    pub reason: String,
}

/// Outcome of one round's parallel dispatch, in pool order.
#[derive(Debug, Clone, Default)]
pub struct RoundOutcome {
    pub successful: Vec<ModelReply>,
    pub failed: Vec<ModelFailure>,
}

/// Query failures surfaced by the injected client.
#[derive(Debug, Clone, thiserror::Error)]
pub enum QueryError {
    #[error("model {model} timed out after {after:?}")]
    Timeout { model: ModelId, after: Duration },

    #[error("model {model} failed: {message}")]
    Provider { model: ModelId, message: String },
}

/// Injected model-query function.
///
/// One call is one serial conversation turn for one model; the round
/// controller owns parallelism across the pool.
#[async_trait]
pub trait ModelClient: Send + Sync {
    async fn complete(
        &self,
        model: &str,
        messages: &[ChatMessage],
        opts: &CallOptions,
    ) -> Result<ModelReply, QueryError>;
}
