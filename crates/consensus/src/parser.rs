//! Action parser — extracts one well-formed action from a raw model reply.
//!
//! Replies arrive as free-form prose that usually contains a JSON object
//! somewhere inside it: fenced in a ```json block, pasted bare, or preceded
//! by worked examples. Extraction is "last wins" — models routinely
//! illustrate an example object before giving the real answer, so the last
//! complete candidate is the authoritative one.
//!
//! Brace scanning walks `char_indices` so every candidate span is sliced on
//! byte-accurate boundaries. Smart quotes, em-dashes, and emoji in the
//! preamble are all multi-byte; an off-by-one there would hand the decoder
//! a torn slice.

use std::io::Write as _;
use std::path::{Path, PathBuf};

use regex::Regex;
use serde_json::{Map, Value};
use tracing::warn;

use crate::action::{Action, WaitPosture};
use crate::schema::{self, ActionType, ParamSpec, ParamType};

/// Typed parse failures. The offending reply is dropped from the round.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ParseError {
    #[error("no decodable JSON object in reply")]
    InvalidJson,

    #[error("unknown action: {0}")]
    UnknownAction(String),

    #[error("missing required param {param} for {action}")]
    MissingRequiredParam { action: String, param: String },

    #[error("invalid type for param {param} of {action}: expected {expected}")]
    InvalidParamType {
        action: String,
        param: String,
        expected: &'static str,
    },
}

/// Result type for parser operations.
pub type ParseResult<T> = Result<T, ParseError>;

/// Caller-supplied knobs for a parse pass.
#[derive(Debug, Clone, Default)]
pub struct ParseOptions {
    /// Side-channel log file for `bug_report` fields. Reports are appended
    /// here and never enter the parsed action.
    pub bug_report_log: Option<PathBuf>,
}

/// Parse one raw model reply into a validated [`Action`].
pub fn parse_reply(raw: &str, opts: &ParseOptions) -> ParseResult<Action> {
    let object = decode_reply(raw)?;
    build_action(object, opts)
}

/// Extract and decode the reply's JSON object without schema validation.
///
/// Keys are canonicalized to plain string form. The round controller uses
/// this directly to salvage reasoning from replies whose action fails
/// validation.
pub fn decode_reply(raw: &str) -> ParseResult<Map<String, Value>> {
    if let Some(block) = last_fenced_json_block(raw) {
        return match serde_json::from_str::<Value>(block.trim()) {
            Ok(Value::Object(map)) => Ok(canonicalize_keys(map)),
            _ => Err(ParseError::InvalidJson),
        };
    }

    // No fence: walk balanced top-level spans from the back until one
    // decodes. Stray balanced braces in trailing prose are skipped.
    for span in balanced_object_spans(raw).into_iter().rev() {
        if let Ok(Value::Object(map)) = serde_json::from_str::<Value>(span) {
            return Ok(canonicalize_keys(map));
        }
    }
    Err(ParseError::InvalidJson)
}

/// The contents of the last ```json fence, if any.
fn last_fenced_json_block(raw: &str) -> Option<&str> {
    // Compiled per call; parsing happens a handful of times per round.
    let fence = Regex::new(r"(?si)```json\s*(.*?)```").ok()?;
    fence
        .captures_iter(raw)
        .last()
        .and_then(|c| c.get(1))
        .map(|m| m.as_str())
}

/// Byte-accurate slices of every complete top-level `{…}` span.
fn balanced_object_spans(raw: &str) -> Vec<&str> {
    let mut spans = Vec::new();
    let mut depth: u32 = 0;
    let mut start = 0usize;
    let mut in_string = false;
    let mut escaped = false;

    for (offset, ch) in raw.char_indices() {
        if in_string {
            if escaped {
                escaped = false;
            } else if ch == '\\' {
                escaped = true;
            } else if ch == '"' {
                in_string = false;
            }
            continue;
        }
        match ch {
            '"' if depth > 0 => in_string = true,
            '{' => {
                if depth == 0 {
                    start = offset;
                }
                depth += 1;
            }
            '}' => {
                if depth > 0 {
                    depth -= 1;
                    if depth == 0 {
                        // '}' is ASCII: one byte past its offset.
                        spans.push(&raw[start..=offset]);
                    }
                }
            }
            _ => {}
        }
    }
    spans
}

/// Rebuild maps with canonical plain-string keys, recursively.
///
/// Models mix `"action"` and symbol-style `":action"` key forms; the core
/// only ever sees the former.
fn canonicalize_keys(map: Map<String, Value>) -> Map<String, Value> {
    map.into_iter()
        .map(|(k, v)| {
            let key = k.strip_prefix(':').unwrap_or(&k).to_string();
            (key, canonicalize_value(v))
        })
        .collect()
}

fn canonicalize_value(value: Value) -> Value {
    match value {
        Value::Object(map) => Value::Object(canonicalize_keys(map)),
        Value::Array(items) => {
            Value::Array(items.into_iter().map(canonicalize_value).collect())
        }
        other => other,
    }
}

fn build_action(mut object: Map<String, Value>, opts: &ParseOptions) -> ParseResult<Action> {
    let action_type = match object.get("action") {
        Some(Value::String(name)) => ActionType::from_name(name)
            .ok_or_else(|| ParseError::UnknownAction(name.clone()))?,
        Some(other) => return Err(ParseError::UnknownAction(other.to_string())),
        None => return Err(ParseError::UnknownAction("(absent)".to_string())),
    };

    let params = match object.remove("params") {
        Some(Value::Object(map)) => map,
        None | Some(Value::Null) => Map::new(),
        Some(_) => {
            return Err(ParseError::InvalidParamType {
                action: action_type.to_string(),
                param: "params".to_string(),
                expected: "object",
            })
        }
    };

    let reasoning = match object.get("reasoning") {
        Some(Value::String(s)) => s.clone(),
        _ => String::new(),
    };

    let wait = object.get("wait").and_then(WaitPosture::from_value);

    // Strict boolean only, and never meaningful on `todo` itself.
    let auto_complete = match object.get("auto_complete_todo") {
        Some(Value::Bool(b)) if action_type != ActionType::Todo => Some(*b),
        _ => None,
    };

    let condense = object.get("condense").and_then(positive_u32);

    if let Some(Value::String(report)) = object.get("bug_report") {
        if !report.is_empty() {
            if let Some(path) = &opts.bug_report_log {
                append_bug_report(path, report);
            }
        }
    }

    let (params, inner) = validate_params(action_type, params)?;

    Ok(Action {
        action_type,
        params,
        inner,
        reasoning,
        wait,
        auto_complete,
        condense,
    })
}

/// Strictly positive integer; floats (including `5.0`), zero, negatives,
/// and non-scalars are rejected.
fn positive_u32(value: &Value) -> Option<u32> {
    match value {
        Value::Number(n) => match n.as_u64() {
            Some(v) if v > 0 => u32::try_from(v).ok(),
            _ => None,
        },
        _ => None,
    }
}

fn append_bug_report(path: &Path, report: &str) {
    let result = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .and_then(|mut f| writeln!(f, "{report}"));
    if let Err(e) = result {
        warn!(path = %path.display(), error = %e, "failed to append bug report");
    }
}

/// Validate params against the action's schema; for batch containers, also
/// parse and validate the inner actions.
fn validate_params(
    action_type: ActionType,
    mut params: Map<String, Value>,
) -> ParseResult<(Map<String, Value>, Vec<Action>)> {
    if action_type.is_batch() {
        let inner = match params.remove("actions") {
            Some(Value::Array(items)) => parse_inner_actions(action_type, items)?,
            None => {
                return Err(ParseError::MissingRequiredParam {
                    action: action_type.to_string(),
                    param: "actions".to_string(),
                })
            }
            Some(_) => {
                return Err(ParseError::InvalidParamType {
                    action: action_type.to_string(),
                    param: "actions".to_string(),
                    expected: "list",
                })
            }
        };
        return Ok((params, inner));
    }

    check_object_fields(&action_type.to_string(), schema::spec(action_type).params, &params)?;
    Ok((params, Vec::new()))
}

fn parse_inner_actions(batch: ActionType, items: Vec<Value>) -> ParseResult<Vec<Action>> {
    let mut inner = Vec::with_capacity(items.len());
    for item in items {
        let object = match item {
            Value::Object(map) => map,
            _ => {
                return Err(ParseError::InvalidParamType {
                    action: batch.to_string(),
                    param: "actions".to_string(),
                    expected: "object",
                })
            }
        };
        let action = build_action(object, &ParseOptions::default())?;
        // Batches do not nest.
        if action.action_type.is_batch() {
            return Err(ParseError::InvalidParamType {
                action: batch.to_string(),
                param: "actions".to_string(),
                expected: "non-batch action",
            });
        }
        inner.push(action);
    }
    Ok(inner)
}

fn check_object_fields(
    action: &str,
    specs: &'static [ParamSpec],
    fields: &Map<String, Value>,
) -> ParseResult<()> {
    for spec in specs {
        match fields.get(spec.name) {
            Some(value) => check_type(action, spec, value)?,
            None if spec.required => {
                return Err(ParseError::MissingRequiredParam {
                    action: action.to_string(),
                    param: spec.name.to_string(),
                })
            }
            None => {}
        }
    }
    // Fields without a spec are tolerated here; the merger drops them.
    Ok(())
}

fn check_type(action: &str, spec: &ParamSpec, value: &Value) -> ParseResult<()> {
    let ok = match spec.ty {
        ParamType::Text => value.is_string(),
        ParamType::Integer => value.as_i64().is_some(),
        ParamType::Number => value.is_number(),
        ParamType::Boolean => value.is_boolean(),
        ParamType::List => value.is_array(),
        ParamType::Object(nested) => match value {
            Value::Object(map) => {
                if !nested.is_empty() {
                    check_object_fields(action, nested, map)?;
                }
                true
            }
            _ => false,
        },
        ParamType::Enum(allowed) => value
            .as_str()
            .map(|s| allowed.contains(&s))
            .unwrap_or(false),
    };

    if ok {
        Ok(())
    } else {
        Err(ParseError::InvalidParamType {
            action: action.to_string(),
            param: spec.name.to_string(),
            expected: spec.ty.name(),
        })
    }
}
