//! Consensus core for a multi-model agent runtime.
//!
//! A tree of agents collaborates on a task; whenever an agent needs to act,
//! it queries a pool of independent models in parallel and derives exactly
//! one next action from their replies. This crate is that derivation:
//!
//! - **Parsing**: extract one structured action from each noisy reply.
//! - **Clustering**: group proposals that mean the same thing, using exact
//!   field identity and embedding similarity.
//! - **Deliberation**: when no round reaches its threshold, feed every
//!   proposal back to every model — unattributed — at descending sampling
//!   temperatures, bounded by a round budget.
//! - **Merging**: collapse the winning cluster field by field under
//!   per-field rules.
//! - **Tie-breaking**: when the budget runs out, force the most
//!   conservative viable proposal deterministically.
//! - **Cost accounting**: every model and embedding call lands in an
//!   append-only accumulator, flushed once per run to the cost store and
//!   announced on per-task and per-agent topics.
//!
//! The model client, the embedding function, and the cost store are all
//! injected traits; this crate owns the reasoning between them, not the
//! I/O behind them.

pub mod action;
pub mod aggregator;
pub mod cluster;
pub mod context;
pub mod cost;
pub mod embedding;
pub mod events;
pub mod fingerprint;
pub mod merge;
pub mod model;
pub mod parser;
pub mod prompts;
pub mod runner;
pub mod schema;
pub mod temperature;
pub mod tiebreak;

// Re-export the types a host agent needs to drive a run.
pub use action::{Action, WaitPosture};
pub use cluster::{Cluster, Clusterer};
pub use context::{ResponseRecord, RoundContext};
pub use cost::{
    CostAccumulator, CostEntry, CostRecorder, CostStore, CostType, FlushReport, MemoryCostStore,
    PostgresCostStore,
};
pub use embedding::{cosine_similarity, Embedder, EmbeddingError};
pub use events::{EventBus, RuntimeEvent, SharedEventBus};
pub use merge::{MergeError, ParamMerger};
pub use model::{CallOptions, ChatMessage, ModelClient, ModelId, ModelReply, QueryError, Role};
pub use parser::{parse_reply, ParseError, ParseOptions};
pub use prompts::AgentProfile;
pub use runner::{
    confidence, ConsensusOutcome, ConsensusRequest, ConsensusRunner, ConsensusStatus,
    RunnerConfig, RunnerError,
};
pub use schema::{ActionType, DEFAULT_MAX_ROUNDS};
pub use temperature::TemperatureSchedule;
