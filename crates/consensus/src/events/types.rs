//! Event types published by the consensus core.
//!
//! Cost events go out once per flushed entry on both the per-task and the
//! per-agent cost topic. Round-lifecycle events go out on the per-task
//! event topic so a host UI can watch a deliberation progress.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::cost::CostType;
use crate::model::ModelId;

/// Per-task cost topic: one message per flushed cost entry.
pub fn task_costs_topic(task_id: &str) -> String {
    format!("tasks:{task_id}:costs")
}

/// Per-agent cost topic: one message per flushed cost entry.
pub fn agent_costs_topic(agent_id: &str) -> String {
    format!("agents:{agent_id}:costs")
}

/// Per-task lifecycle topic: round starts and final decisions.
pub fn task_events_topic(task_id: &str) -> String {
    format!("tasks:{task_id}:events")
}

/// All events the consensus core publishes.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RuntimeEvent {
    /// A cost entry was written to the store.
    CostRecorded {
        id: Uuid,
        agent_id: String,
        task_id: String,
        cost_type: CostType,
        /// Preserved verbatim; `None` stays `None`.
        cost_usd: Option<Decimal>,
        model_spec: Option<String>,
        timestamp: DateTime<Utc>,
    },

    /// A deliberation round was dispatched to the pool.
    RoundStarted {
        agent_id: String,
        task_id: String,
        round: u32,
        models: Vec<ModelId>,
        timestamp: DateTime<Utc>,
    },

    /// A round reached the consensus threshold.
    ConsensusReached {
        agent_id: String,
        task_id: String,
        action_type: String,
        confidence: f64,
        round: u32,
        timestamp: DateTime<Utc>,
    },

    /// The budget ran out and the tie-breaker forced a decision.
    DecisionForced {
        agent_id: String,
        task_id: String,
        action_type: String,
        confidence: f64,
        round: u32,
        timestamp: DateTime<Utc>,
    },
}

impl RuntimeEvent {
    /// Snake-case event type tag.
    pub fn event_type(&self) -> &'static str {
        match self {
            RuntimeEvent::CostRecorded { .. } => "cost_recorded",
            RuntimeEvent::RoundStarted { .. } => "round_started",
            RuntimeEvent::ConsensusReached { .. } => "consensus_reached",
            RuntimeEvent::DecisionForced { .. } => "decision_forced",
        }
    }

    pub fn task_id(&self) -> &str {
        match self {
            RuntimeEvent::CostRecorded { task_id, .. } => task_id,
            RuntimeEvent::RoundStarted { task_id, .. } => task_id,
            RuntimeEvent::ConsensusReached { task_id, .. } => task_id,
            RuntimeEvent::DecisionForced { task_id, .. } => task_id,
        }
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        match self {
            RuntimeEvent::CostRecorded { timestamp, .. } => *timestamp,
            RuntimeEvent::RoundStarted { timestamp, .. } => *timestamp,
            RuntimeEvent::ConsensusReached { timestamp, .. } => *timestamp,
            RuntimeEvent::DecisionForced { timestamp, .. } => *timestamp,
        }
    }
}

/// A published event together with the topic it went out on.
#[derive(Debug, Clone)]
pub struct Envelope {
    pub topic: String,
    pub event: RuntimeEvent,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_topic_naming() {
        assert_eq!(task_costs_topic("t-1"), "tasks:t-1:costs");
        assert_eq!(agent_costs_topic("a-1"), "agents:a-1:costs");
        assert_eq!(task_events_topic("t-1"), "tasks:t-1:events");
    }

    #[test]
    fn test_event_type_tags() {
        let event = RuntimeEvent::RoundStarted {
            agent_id: "a".to_string(),
            task_id: "t".to_string(),
            round: 1,
            models: vec!["m1".to_string()],
            timestamp: Utc::now(),
        };
        assert_eq!(event.event_type(), "round_started");
        assert_eq!(event.task_id(), "t");
    }

    #[test]
    fn test_null_cost_survives_serde() {
        let event = RuntimeEvent::CostRecorded {
            id: Uuid::new_v4(),
            agent_id: "a".to_string(),
            task_id: "t".to_string(),
            cost_type: CostType::LlmConsensus,
            cost_usd: None,
            model_spec: None,
            timestamp: Utc::now(),
        };
        let json = serde_json::to_value(&event).unwrap();
        assert!(json["cost_usd"].is_null());
        assert_eq!(json["type"], "cost_recorded");
    }
}
