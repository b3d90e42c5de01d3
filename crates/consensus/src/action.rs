//! Action values — one structured proposal from one model in one round.
//!
//! Actions are immutable value data: created by the parser, freely cloned,
//! never shared-mutated. Batch containers carry their validated inner
//! actions in `inner`; scalar actions leave it empty.

use serde_json::{Map, Value};

use crate::schema::{self, ActionType};

/// Maximum length of a compact action summary, in characters.
const SUMMARY_MAX_CHARS: usize = 100;

/// Continuation hint attached to a proposal.
///
/// Absent (`Option::None` on the action) is distinct from an explicit `No`:
/// tie-breaking scores them differently.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WaitPosture {
    /// Do not wait; the agent loop continues immediately.
    No,
    /// Await continuation indefinitely.
    Await,
    /// Wait this many seconds.
    Seconds(u64),
}

impl WaitPosture {
    /// Wire rendering: `false`, `true`, or the number of seconds.
    pub fn to_value(self) -> Value {
        match self {
            WaitPosture::No => Value::Bool(false),
            WaitPosture::Await => Value::Bool(true),
            WaitPosture::Seconds(n) => Value::from(n),
        }
    }

    /// Decode a wire value. Only `false`, `true`, and non-negative integers
    /// are recognized; everything else is treated as absent. Zero means
    /// "do not wait".
    pub fn from_value(value: &Value) -> Option<WaitPosture> {
        match value {
            Value::Bool(false) => Some(WaitPosture::No),
            Value::Bool(true) => Some(WaitPosture::Await),
            Value::Number(n) => match n.as_u64() {
                Some(0) => Some(WaitPosture::No),
                Some(secs) => Some(WaitPosture::Seconds(secs)),
                None => None,
            },
            _ => None,
        }
    }
}

/// A parsed, validated proposal.
#[derive(Debug, Clone, PartialEq)]
pub struct Action {
    pub action_type: ActionType,
    /// Canonical string-keyed parameters.
    pub params: Map<String, Value>,
    /// Validated inner actions for batch containers; empty otherwise.
    pub inner: Vec<Action>,
    pub reasoning: String,
    /// `None` when the reply carried no recognizable `wait` field.
    pub wait: Option<WaitPosture>,
    /// `None` when absent; never set on `todo` actions.
    pub auto_complete: Option<bool>,
    /// History-condensation request: strictly positive when present.
    pub condense: Option<u32>,
}

/// Dual-key tolerant parameter lookup.
///
/// Models sometimes emit symbol-style `":name"` keys instead of plain
/// `"name"`. The parser canonicalizes at the decode boundary, but every
/// seam that reads params accepts either form so hand-built or partially
/// normalized maps behave identically.
pub fn get_param<'a>(params: &'a Map<String, Value>, name: &str) -> Option<&'a Value> {
    params
        .get(name)
        .or_else(|| params.get(format!(":{name}").as_str()))
}

impl Action {
    /// Dual-key tolerant lookup of one of this action's parameters.
    pub fn param(&self, name: &str) -> Option<&Value> {
        get_param(&self.params, name)
    }

    /// Build a bare action of the given type.
    pub fn new(action_type: ActionType) -> Self {
        Self {
            action_type,
            params: Map::new(),
            inner: Vec::new(),
            reasoning: String::new(),
            wait: None,
            auto_complete: None,
            condense: None,
        }
    }

    /// Types of the inner actions, in the order provided.
    pub fn inner_types(&self) -> Vec<ActionType> {
        self.inner.iter().map(|a| a.action_type).collect()
    }

    /// Compact, brackets-delimited render used in deliberation prompts.
    ///
    /// `[execute_shell: git status]`, `[batch_async: [file_read, orient]]`
    /// (batch_async sorts its contents). Truncated to 100 characters.
    pub fn summary(&self) -> String {
        let body = match self.action_type {
            ActionType::BatchSync => Some(render_batch(&self.inner_types(), false)),
            ActionType::BatchAsync => Some(render_batch(&self.inner_types(), true)),
            ty => schema::spec(ty)
                .summary_param
                .and_then(|name| self.param(name))
                .map(render_scalar),
        };

        let full = match body {
            Some(detail) if !detail.is_empty() => {
                format!("[{}: {}]", self.action_type, detail)
            }
            _ => format!("[{}]", self.action_type),
        };
        truncate_chars(&full, SUMMARY_MAX_CHARS)
    }

    /// Wire-shaped JSON object for prompt rendering and result emission.
    ///
    /// Reasoning is included when non-empty; sibling fields never appear.
    pub fn to_value(&self) -> Value {
        let mut obj = Map::new();
        obj.insert(
            "action".to_string(),
            Value::String(self.action_type.as_str().to_string()),
        );

        let mut params = self.params.clone();
        if self.action_type.is_batch() {
            params.insert(
                "actions".to_string(),
                Value::Array(self.inner.iter().map(Action::to_value).collect()),
            );
        }
        if !params.is_empty() {
            obj.insert("params".to_string(), Value::Object(params));
        }
        if !self.reasoning.is_empty() {
            obj.insert(
                "reasoning".to_string(),
                Value::String(self.reasoning.clone()),
            );
        }
        if let Some(wait) = self.wait {
            obj.insert("wait".to_string(), wait.to_value());
        }
        if let Some(auto) = self.auto_complete {
            obj.insert("auto_complete_todo".to_string(), Value::Bool(auto));
        }
        Value::Object(obj)
    }
}

fn render_batch(types: &[ActionType], sorted: bool) -> String {
    let mut names: Vec<&str> = types.iter().map(|t| t.as_str()).collect();
    if sorted {
        names.sort_unstable();
    }
    format!("[{}]", names.join(", "))
}

fn render_scalar(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn truncate_chars(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        return s.to_string();
    }
    let mut out: String = s.chars().take(max.saturating_sub(1)).collect();
    out.push('…');
    out
}
