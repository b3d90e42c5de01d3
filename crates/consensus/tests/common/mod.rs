//! Shared fakes for integration tests: a scripted model pool and a
//! deterministic, cost-billing embedder.
#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, Once};

use async_trait::async_trait;
use serde_json::json;

use quorum_consensus::cost::{CostAccumulator, CostEntry, CostType};
use quorum_consensus::embedding::{EmbedResult, Embedder, EmbeddingError};
use quorum_consensus::model::{CallOptions, ChatMessage, ModelClient, ModelReply, QueryError, Role};

/// Install a tracing subscriber once so `RUST_LOG=debug cargo test` shows
/// the core's phase transitions and fallback warnings during test runs.
pub fn init_tracing() {
    static INIT: Once = Once::new();
    INIT.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();
    });
}

/// One recorded model call.
#[derive(Debug, Clone)]
pub struct RecordedCall {
    pub model: String,
    pub round: u32,
    pub temperature: f64,
    /// Content of the last user message the model saw.
    pub last_user_message: String,
}

/// Model client that replays scripted replies per model per round and
/// bills one consensus cost entry per call.
#[derive(Default)]
pub struct ScriptedClient {
    scripts: HashMap<String, Vec<String>>,
    calls: Mutex<Vec<RecordedCall>>,
}

impl ScriptedClient {
    pub fn new() -> Self {
        Self::default()
    }

    /// Script one model's reply for each round, in order.
    pub fn script(mut self, model: &str, replies: &[&str]) -> Self {
        self.scripts
            .insert(model.to_string(), replies.iter().map(|r| r.to_string()).collect());
        self
    }

    pub fn calls(&self) -> Vec<RecordedCall> {
        self.calls.lock().unwrap().clone()
    }

    pub fn total_calls(&self) -> usize {
        self.calls.lock().unwrap().len()
    }
}

#[async_trait]
impl ModelClient for ScriptedClient {
    async fn complete(
        &self,
        model: &str,
        messages: &[ChatMessage],
        opts: &CallOptions,
    ) -> Result<ModelReply, QueryError> {
        let last_user_message = messages
            .iter()
            .rev()
            .find(|m| m.role == Role::User)
            .map(|m| m.content.clone())
            .unwrap_or_default();
        self.calls.lock().unwrap().push(RecordedCall {
            model: model.to_string(),
            round: opts.round,
            temperature: opts.temperature,
            last_user_message,
        });

        let text = self
            .scripts
            .get(model)
            .and_then(|replies| replies.get((opts.round - 1) as usize))
            .cloned()
            .ok_or_else(|| QueryError::Provider {
                model: model.to_string(),
                message: format!("no scripted reply for round {}", opts.round),
            })?;

        let cost = CostEntry::new(opts.agent_id.clone(), opts.task_id.clone(), CostType::LlmConsensus)
            .with_metadata("model", json!(model))
            .with_metadata("round", json!(opts.round));
        Ok(ModelReply {
            model: model.to_string(),
            text,
            costs: vec![cost],
        })
    }
}

/// Embedder that maps a phrase's first word onto a fixed axis, bills one
/// embedding entry per call, and counts its calls.
#[derive(Default)]
pub struct CountingEmbedder {
    calls: AtomicUsize,
}

impl CountingEmbedder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl Embedder for CountingEmbedder {
    fn embed(&self, text: &str) -> EmbedResult {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if text.contains("unembeddable") {
            return Err(EmbeddingError("service offline".to_string()));
        }
        let axis = match text.split_whitespace().next().unwrap_or("") {
            "alpha" => [1.0, 0.0, 0.0],
            "beta" => [0.0, 1.0, 0.0],
            "mixed" => [0.7, 0.7, 0.0],
            _ => [0.0, 0.0, 1.0],
        };
        Ok(axis.to_vec())
    }

    fn embed_accounted(&self, text: &str, acc: CostAccumulator) -> (EmbedResult, CostAccumulator) {
        let entry = CostEntry::new("agent", "task", CostType::LlmEmbedding)
            .with_metadata("text", json!(text));
        (self.embed(text), acc.add(entry))
    }
}

/// A reply proposing `orient` with the given situation.
pub fn orient_reply(situation: &str) -> String {
    format!(
        r#"{{"action":"orient","params":{{"current_situation":"{situation}"}},"reasoning":"take stock first"}}"#
    )
}

/// A reply proposing `spawn_child` with the given description.
pub fn spawn_reply(description: &str) -> String {
    format!(
        r#"{{"action":"spawn_child","params":{{"task_description":"{description}"}},"reasoning":"delegate"}}"#
    )
}

/// A reply proposing `file_read` of the given path.
pub fn file_read_reply(path: &str) -> String {
    format!(r#"{{"action":"file_read","params":{{"path":"{path}"}}}}"#)
}
