//! Action catalog — the closed set of action types and their metadata.
//!
//! Everything the rest of the core needs to know about an action type lives
//! in one data table: numeric priority, parameter specs, per-field merge
//! rules, and per-field matching rules. Components look the table up instead
//! of branching on action names, so adding an action type is a table edit.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Round budget shared by the temperature schedule and the round controller.
///
/// There is exactly one default in the system; every component that needs a
/// round budget is configured with the same value.
pub const DEFAULT_MAX_ROUNDS: u32 = 4;

/// Sentinel priority for batches with no inner actions. Loses to any real
/// action during tie-breaking.
pub const EMPTY_BATCH_PRIORITY: u16 = 999;

/// Default cosine-similarity threshold for semantic field matching.
pub const DEFAULT_SEMANTIC_THRESHOLD: f64 = 0.8;

/// The closed set of action types models may propose.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionType {
    /// Re-assess the current situation before committing to anything.
    Orient,
    /// Pause, either indefinitely or for a bounded number of seconds.
    Wait,
    /// Update the task's todo list.
    Todo,
    /// Read a file.
    FileRead,
    /// Write a file.
    FileWrite,
    /// Run a shell command.
    ExecuteShell,
    /// Call an external HTTP API.
    CallApi,
    /// Send a message to another agent or the user.
    SendMessage,
    /// Declare the task complete.
    CompleteTask,
    /// Spawn a child agent with a delegated sub-task.
    SpawnChild,
    /// Ordered batch: inner actions run in sequence.
    BatchSync,
    /// Unordered batch: inner actions run concurrently.
    BatchAsync,
}

impl ActionType {
    /// All concrete (non-batch) types, in priority order.
    pub const SCALAR: &'static [ActionType] = &[
        ActionType::Orient,
        ActionType::Wait,
        ActionType::Todo,
        ActionType::FileRead,
        ActionType::FileWrite,
        ActionType::ExecuteShell,
        ActionType::CallApi,
        ActionType::SendMessage,
        ActionType::CompleteTask,
        ActionType::SpawnChild,
    ];

    /// Parse an action name as emitted by a model.
    pub fn from_name(name: &str) -> Option<ActionType> {
        match name {
            "orient" => Some(ActionType::Orient),
            "wait" => Some(ActionType::Wait),
            "todo" => Some(ActionType::Todo),
            "file_read" => Some(ActionType::FileRead),
            "file_write" => Some(ActionType::FileWrite),
            "execute_shell" => Some(ActionType::ExecuteShell),
            "call_api" => Some(ActionType::CallApi),
            "send_message" => Some(ActionType::SendMessage),
            "complete_task" => Some(ActionType::CompleteTask),
            "spawn_child" => Some(ActionType::SpawnChild),
            "batch_sync" => Some(ActionType::BatchSync),
            "batch_async" => Some(ActionType::BatchAsync),
            _ => None,
        }
    }

    /// The wire name of this action type.
    pub fn as_str(self) -> &'static str {
        match self {
            ActionType::Orient => "orient",
            ActionType::Wait => "wait",
            ActionType::Todo => "todo",
            ActionType::FileRead => "file_read",
            ActionType::FileWrite => "file_write",
            ActionType::ExecuteShell => "execute_shell",
            ActionType::CallApi => "call_api",
            ActionType::SendMessage => "send_message",
            ActionType::CompleteTask => "complete_task",
            ActionType::SpawnChild => "spawn_child",
            ActionType::BatchSync => "batch_sync",
            ActionType::BatchAsync => "batch_async",
        }
    }

    /// Whether this type is a batch container.
    pub fn is_batch(self) -> bool {
        matches!(self, ActionType::BatchSync | ActionType::BatchAsync)
    }

    /// Declared priority. Lower is more conservative and wins ties.
    ///
    /// Batch containers report the sentinel; their effective priority is the
    /// maximum of their inner actions (see `tiebreak`).
    pub fn priority(self) -> u16 {
        spec(self).priority
    }
}

impl fmt::Display for ActionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Parameter value types accepted by the validator.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ParamType {
    /// UTF-8 string, preserved byte-for-byte.
    Text,
    /// Whole number (i64 range).
    Integer,
    /// Any JSON number.
    Number,
    /// Strict boolean.
    Boolean,
    /// JSON array.
    List,
    /// Nested object. A non-empty spec list is validated recursively; an
    /// empty list means free-form.
    Object(&'static [ParamSpec]),
    /// String restricted to a closed set of values.
    Enum(&'static [&'static str]),
}

impl ParamType {
    /// Human-readable name used in validation errors and prompt rendering.
    pub fn name(&self) -> &'static str {
        match self {
            ParamType::Text => "string",
            ParamType::Integer => "integer",
            ParamType::Number => "number",
            ParamType::Boolean => "boolean",
            ParamType::List => "list",
            ParamType::Object(_) => "object",
            ParamType::Enum(_) => "enum",
        }
    }
}

/// How a field participates in cluster identity.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum MatchRule {
    /// Literal value must be identical for two actions to cluster.
    Exact,
    /// Values cluster when embedding cosine similarity meets the threshold.
    Semantic { threshold: f64 },
}

/// How a field is merged across a cluster's contributors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergeRule {
    /// Most frequent value; ties broken by first occurrence.
    Mode,
    /// Numeric median; even counts take the lower median.
    Median,
    /// Medoid by average cosine similarity; falls back to mode on failure.
    Semantic,
    /// All contributors must agree or the merge fails.
    ExactRequired,
    /// Concatenate lists, deduplicating in first-seen order.
    UnionList,
}

/// Specification of one parameter of an action type.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ParamSpec {
    pub name: &'static str,
    pub ty: ParamType,
    pub required: bool,
    pub merge: MergeRule,
    /// `None` means the field is not identity-bearing: it never contributes
    /// to the fingerprint.
    pub matching: Option<MatchRule>,
}

/// Full specification of one action type.
#[derive(Debug, Clone, Copy)]
pub struct ActionSpec {
    pub action_type: ActionType,
    pub priority: u16,
    pub params: &'static [ParamSpec],
    /// Parameter quoted in compact action summaries, if any.
    pub summary_param: Option<&'static str>,
}

const SEMANTIC: Option<MatchRule> = Some(MatchRule::Semantic {
    threshold: DEFAULT_SEMANTIC_THRESHOLD,
});
const EXACT: Option<MatchRule> = Some(MatchRule::Exact);

const ORIENT_PARAMS: &[ParamSpec] = &[
    ParamSpec {
        name: "current_situation",
        ty: ParamType::Text,
        required: true,
        merge: MergeRule::Semantic,
        matching: SEMANTIC,
    },
    ParamSpec {
        name: "focus",
        ty: ParamType::Enum(&["progress", "blockers", "plan", "context"]),
        required: false,
        merge: MergeRule::Mode,
        matching: None,
    },
];

const WAIT_PARAMS: &[ParamSpec] = &[ParamSpec {
    name: "duration_seconds",
    ty: ParamType::Integer,
    required: false,
    merge: MergeRule::Median,
    matching: None,
}];

const TODO_PARAMS: &[ParamSpec] = &[ParamSpec {
    name: "items",
    ty: ParamType::List,
    required: true,
    merge: MergeRule::UnionList,
    matching: None,
}];

const FILE_READ_PARAMS: &[ParamSpec] = &[ParamSpec {
    name: "path",
    ty: ParamType::Text,
    required: true,
    merge: MergeRule::ExactRequired,
    matching: EXACT,
}];

const FILE_WRITE_PARAMS: &[ParamSpec] = &[
    ParamSpec {
        name: "path",
        ty: ParamType::Text,
        required: true,
        merge: MergeRule::ExactRequired,
        matching: EXACT,
    },
    ParamSpec {
        name: "content",
        ty: ParamType::Text,
        required: true,
        merge: MergeRule::Semantic,
        matching: SEMANTIC,
    },
];

const EXECUTE_SHELL_PARAMS: &[ParamSpec] = &[
    ParamSpec {
        name: "command",
        ty: ParamType::Text,
        required: true,
        merge: MergeRule::ExactRequired,
        matching: EXACT,
    },
    ParamSpec {
        name: "working_dir",
        ty: ParamType::Text,
        required: false,
        merge: MergeRule::Mode,
        matching: None,
    },
    ParamSpec {
        name: "timeout_seconds",
        ty: ParamType::Integer,
        required: false,
        merge: MergeRule::Median,
        matching: None,
    },
];

const CALL_API_RETRY_PARAMS: &[ParamSpec] = &[
    ParamSpec {
        name: "max_attempts",
        ty: ParamType::Integer,
        required: true,
        merge: MergeRule::Median,
        matching: None,
    },
    ParamSpec {
        name: "backoff_seconds",
        ty: ParamType::Integer,
        required: false,
        merge: MergeRule::Median,
        matching: None,
    },
];

const CALL_API_PARAMS: &[ParamSpec] = &[
    ParamSpec {
        name: "endpoint",
        ty: ParamType::Text,
        required: true,
        merge: MergeRule::ExactRequired,
        matching: EXACT,
    },
    ParamSpec {
        name: "method",
        ty: ParamType::Enum(&["GET", "POST", "PUT", "PATCH", "DELETE"]),
        required: false,
        merge: MergeRule::Mode,
        matching: EXACT,
    },
    ParamSpec {
        name: "payload",
        ty: ParamType::Object(&[]),
        required: false,
        merge: MergeRule::Mode,
        matching: None,
    },
    ParamSpec {
        name: "retry",
        ty: ParamType::Object(CALL_API_RETRY_PARAMS),
        required: false,
        merge: MergeRule::Mode,
        matching: None,
    },
];

const SEND_MESSAGE_PARAMS: &[ParamSpec] = &[
    ParamSpec {
        name: "recipient",
        ty: ParamType::Text,
        required: true,
        merge: MergeRule::ExactRequired,
        matching: EXACT,
    },
    ParamSpec {
        name: "content",
        ty: ParamType::Text,
        required: true,
        merge: MergeRule::Semantic,
        matching: SEMANTIC,
    },
];

const COMPLETE_TASK_PARAMS: &[ParamSpec] = &[
    ParamSpec {
        name: "summary",
        ty: ParamType::Text,
        required: true,
        merge: MergeRule::Semantic,
        matching: None,
    },
    ParamSpec {
        name: "artifacts",
        ty: ParamType::List,
        required: false,
        merge: MergeRule::UnionList,
        matching: None,
    },
];

const SPAWN_CHILD_PARAMS: &[ParamSpec] = &[
    ParamSpec {
        name: "task_description",
        ty: ParamType::Text,
        required: true,
        merge: MergeRule::Semantic,
        matching: SEMANTIC,
    },
    ParamSpec {
        name: "model_pool",
        ty: ParamType::List,
        required: false,
        merge: MergeRule::UnionList,
        matching: None,
    },
    ParamSpec {
        name: "budget_usd",
        ty: ParamType::Number,
        required: false,
        merge: MergeRule::Median,
        matching: None,
    },
];

const BATCH_PARAMS: &[ParamSpec] = &[ParamSpec {
    name: "actions",
    ty: ParamType::List,
    required: true,
    merge: MergeRule::Mode,
    matching: None,
}];

const ORIENT: ActionSpec = ActionSpec {
    action_type: ActionType::Orient,
    priority: 1,
    params: ORIENT_PARAMS,
    summary_param: Some("current_situation"),
};
const WAIT: ActionSpec = ActionSpec {
    action_type: ActionType::Wait,
    priority: 2,
    params: WAIT_PARAMS,
    summary_param: Some("duration_seconds"),
};
const TODO: ActionSpec = ActionSpec {
    action_type: ActionType::Todo,
    priority: 3,
    params: TODO_PARAMS,
    summary_param: None,
};
const FILE_READ: ActionSpec = ActionSpec {
    action_type: ActionType::FileRead,
    priority: 4,
    params: FILE_READ_PARAMS,
    summary_param: Some("path"),
};
const FILE_WRITE: ActionSpec = ActionSpec {
    action_type: ActionType::FileWrite,
    priority: 5,
    params: FILE_WRITE_PARAMS,
    summary_param: Some("path"),
};
const EXECUTE_SHELL: ActionSpec = ActionSpec {
    action_type: ActionType::ExecuteShell,
    priority: 6,
    params: EXECUTE_SHELL_PARAMS,
    summary_param: Some("command"),
};
const CALL_API: ActionSpec = ActionSpec {
    action_type: ActionType::CallApi,
    priority: 7,
    params: CALL_API_PARAMS,
    summary_param: Some("endpoint"),
};
const SEND_MESSAGE: ActionSpec = ActionSpec {
    action_type: ActionType::SendMessage,
    priority: 8,
    params: SEND_MESSAGE_PARAMS,
    summary_param: Some("recipient"),
};
const COMPLETE_TASK: ActionSpec = ActionSpec {
    action_type: ActionType::CompleteTask,
    priority: 9,
    params: COMPLETE_TASK_PARAMS,
    summary_param: Some("summary"),
};
const SPAWN_CHILD: ActionSpec = ActionSpec {
    action_type: ActionType::SpawnChild,
    priority: 10,
    params: SPAWN_CHILD_PARAMS,
    summary_param: Some("task_description"),
};
const BATCH_SYNC: ActionSpec = ActionSpec {
    action_type: ActionType::BatchSync,
    priority: EMPTY_BATCH_PRIORITY,
    params: BATCH_PARAMS,
    summary_param: None,
};
const BATCH_ASYNC: ActionSpec = ActionSpec {
    action_type: ActionType::BatchAsync,
    priority: EMPTY_BATCH_PRIORITY,
    params: BATCH_PARAMS,
    summary_param: None,
};

/// Look up the specification for an action type.
pub fn spec(action_type: ActionType) -> &'static ActionSpec {
    match action_type {
        ActionType::Orient => &ORIENT,
        ActionType::Wait => &WAIT,
        ActionType::Todo => &TODO,
        ActionType::FileRead => &FILE_READ,
        ActionType::FileWrite => &FILE_WRITE,
        ActionType::ExecuteShell => &EXECUTE_SHELL,
        ActionType::CallApi => &CALL_API,
        ActionType::SendMessage => &SEND_MESSAGE,
        ActionType::CompleteTask => &COMPLETE_TASK,
        ActionType::SpawnChild => &SPAWN_CHILD,
        ActionType::BatchSync => &BATCH_SYNC,
        ActionType::BatchAsync => &BATCH_ASYNC,
    }
}

/// Look up the spec for one parameter of an action type.
pub fn param_spec(action_type: ActionType, name: &str) -> Option<&'static ParamSpec> {
    spec(action_type).params.iter().find(|p| p.name == name)
}
