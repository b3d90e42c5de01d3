//! Round context — the mutable-by-replacement container threaded through a
//! consensus run.
//!
//! Owned exclusively by the round controller. The reasoning window keeps
//! only the last two rounds of response records; older rounds are evicted.
//! The per-round proposal audit trail keeps everything.

use std::collections::VecDeque;
use std::time::Instant;

use serde_json::{Map, Value};

use crate::action::Action;
use crate::model::ChatMessage;
use crate::schema::DEFAULT_MAX_ROUNDS;

/// How many rounds of response records the refinement prompt may quote.
pub const REASONING_WINDOW_ROUNDS: usize = 2;

/// One model's response as remembered for refinement prompts.
///
/// `action` keeps the raw action name so replies that failed validation
/// still contribute their reasoning; a missing action or params is stored
/// as `None`/empty rather than dropping the record.
#[derive(Debug, Clone, PartialEq)]
pub struct ResponseRecord {
    pub action: Option<String>,
    pub params: Map<String, Value>,
    pub reasoning: String,
}

impl ResponseRecord {
    pub fn from_action(action: &Action) -> Self {
        Self {
            action: Some(action.action_type.as_str().to_string()),
            params: action.params.clone(),
            reasoning: action.reasoning.clone(),
        }
    }
}

/// Records of one completed round.
#[derive(Debug, Clone)]
pub struct RoundRecords {
    pub round: u32,
    pub records: Vec<ResponseRecord>,
}

/// State threaded through all rounds of one consensus run.
#[derive(Debug)]
pub struct RoundContext {
    /// The task the agents are deliberating over.
    pub task_prompt: String,
    /// Rolling conversation shared by every model in the pool.
    pub history: Vec<ChatMessage>,
    /// Sliding window of the last [`REASONING_WINDOW_ROUNDS`] rounds.
    window: VecDeque<RoundRecords>,
    /// Full per-round proposal audit trail.
    pub proposals: Vec<(u32, Vec<Action>)>,
    /// Monotonic start of the run.
    pub started_at: Instant,
    /// Round budget; the tie-breaker forces a decision past it.
    pub max_rounds: u32,
    /// Optional lesson/state payload injected into the system prompt.
    pub lesson: Option<Value>,
}

impl RoundContext {
    pub fn new(task_prompt: impl Into<String>) -> Self {
        Self {
            task_prompt: task_prompt.into(),
            history: Vec::new(),
            window: VecDeque::new(),
            proposals: Vec::new(),
            started_at: Instant::now(),
            max_rounds: DEFAULT_MAX_ROUNDS,
            lesson: None,
        }
    }

    pub fn with_max_rounds(mut self, max_rounds: u32) -> Self {
        self.max_rounds = max_rounds.max(1);
        self
    }

    pub fn with_lesson(mut self, lesson: Value) -> Self {
        self.lesson = Some(lesson);
        self
    }

    /// Append a message to the shared history.
    pub fn push_message(&mut self, message: ChatMessage) {
        self.history.push(message);
    }

    /// Store one completed round's records and proposals, evicting window
    /// entries older than the last two rounds.
    pub fn record_round(
        &mut self,
        round: u32,
        records: Vec<ResponseRecord>,
        proposals: Vec<Action>,
    ) {
        self.window.push_back(RoundRecords { round, records });
        while self.window.len() > REASONING_WINDOW_ROUNDS {
            self.window.pop_front();
        }
        self.proposals.push((round, proposals));
    }

    /// The retained rounds, oldest first.
    pub fn recent_rounds(&self) -> impl Iterator<Item = &RoundRecords> {
        self.window.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(reasoning: &str) -> ResponseRecord {
        ResponseRecord {
            action: None,
            params: Map::new(),
            reasoning: reasoning.to_string(),
        }
    }

    #[test]
    fn test_window_keeps_last_two_rounds() {
        let mut ctx = RoundContext::new("task");
        ctx.record_round(1, vec![record("r1")], Vec::new());
        ctx.record_round(2, vec![record("r2")], Vec::new());
        ctx.record_round(3, vec![record("r3")], Vec::new());

        let rounds: Vec<u32> = ctx.recent_rounds().map(|r| r.round).collect();
        assert_eq!(rounds, vec![2, 3]);
    }

    #[test]
    fn test_audit_trail_keeps_everything() {
        let mut ctx = RoundContext::new("task");
        for round in 1..=5 {
            ctx.record_round(round, Vec::new(), Vec::new());
        }
        assert_eq!(ctx.proposals.len(), 5);
    }

    #[test]
    fn test_records_survive_with_missing_action() {
        let mut ctx = RoundContext::new("task");
        ctx.record_round(1, vec![record("kept anyway")], Vec::new());
        let first = ctx.recent_rounds().next().unwrap();
        assert_eq!(first.records[0].action, None);
        assert!(first.records[0].params.is_empty());
        assert_eq!(first.records[0].reasoning, "kept anyway");
    }

    #[test]
    fn test_default_budget_is_shared_constant() {
        let ctx = RoundContext::new("task");
        assert_eq!(ctx.max_rounds, DEFAULT_MAX_ROUNDS);
    }

    #[test]
    fn test_budget_floor_is_one() {
        let ctx = RoundContext::new("task").with_max_rounds(0);
        assert_eq!(ctx.max_rounds, 1);
    }
}
