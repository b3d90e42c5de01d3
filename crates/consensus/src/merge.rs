//! Parameter merger — collapses a cluster of same-fingerprint actions into
//! one action, field by field, under the rules the schema declares.
//!
//! The merger threads the cost accumulator through every similarity-based
//! rule and returns it from the entry point alongside the merged action;
//! embedding spend incurred mid-merge is part of the run's bill.

use std::sync::Arc;

use serde_json::{Map, Value};
use tracing::debug;

use crate::action::{Action, WaitPosture};
use crate::cluster::Cluster;
use crate::cost::CostAccumulator;
use crate::embedding::{cosine_similarity, Embedder, Embedding};
use crate::schema::{self, ActionType, MergeRule};

/// Merge failures. A failing cluster cannot win the round; the controller
/// falls back to the next-best cluster under the tie-breaker.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum MergeError {
    #[error("inconsistent values for param {param} of {action}")]
    InconsistentParams { action: String, param: String },

    #[error("batch length mismatch: expected {expected}, got {got}")]
    SequenceLengthMismatch { expected: usize, got: usize },

    #[error("batch type mismatch at position {position}: expected {expected}, got {got}")]
    SequenceMismatch {
        position: usize,
        expected: String,
        got: String,
    },
}

/// Result type for merge operations.
pub type MergeResult<T> = Result<T, MergeError>;

/// Field-by-field cluster merger.
pub struct ParamMerger {
    embedder: Arc<dyn Embedder>,
}

impl ParamMerger {
    pub fn new(embedder: Arc<dyn Embedder>) -> Self {
        Self { embedder }
    }

    /// Merge a cluster into one action.
    ///
    /// Returns the accumulator in every case — including failures — so
    /// embedding costs incurred before the failing field are preserved.
    pub fn merge_cluster(
        &self,
        cluster: &Cluster,
        acc: CostAccumulator,
    ) -> (MergeResult<Action>, CostAccumulator) {
        let contributors: Vec<&Action> = cluster.actions.iter().collect();
        match cluster.action_type() {
            ActionType::BatchSync => self.merge_batch(&contributors, false, acc),
            ActionType::BatchAsync => self.merge_batch(&contributors, true, acc),
            action_type => self.merge_scalar(action_type, &contributors, acc),
        }
    }

    fn merge_scalar(
        &self,
        action_type: ActionType,
        contributors: &[&Action],
        mut acc: CostAccumulator,
    ) -> (MergeResult<Action>, CostAccumulator) {
        let mut params = Map::new();
        for spec in schema::spec(action_type).params {
            let values: Vec<Value> = contributors
                .iter()
                .filter_map(|a| a.param(spec.name))
                .cloned()
                .collect();
            if values.is_empty() {
                continue;
            }

            let merged = match spec.merge {
                MergeRule::Mode => mode_value(&values),
                MergeRule::Median => median_value(&values),
                MergeRule::ExactRequired => {
                    if values.iter().all(|v| v == &values[0]) {
                        values[0].clone()
                    } else {
                        return (
                            Err(MergeError::InconsistentParams {
                                action: action_type.to_string(),
                                param: spec.name.to_string(),
                            }),
                            acc,
                        );
                    }
                }
                MergeRule::UnionList => union_list(&values),
                MergeRule::Semantic => {
                    let (value, next) = self.semantic_medoid(&values, acc);
                    acc = next;
                    value
                }
            };
            params.insert(spec.name.to_string(), merged);
        }

        let mut merged = Action::new(action_type);
        merged.params = params;
        merged.wait = Some(merge_wait(contributors));
        merged.auto_complete = merge_auto_complete(contributors);
        merged.condense = contributors.iter().find_map(|a| a.condense);
        merged.reasoning = merge_reasoning(contributors);
        (Ok(merged), acc)
    }

    fn merge_batch(
        &self,
        contributors: &[&Action],
        unordered: bool,
        mut acc: CostAccumulator,
    ) -> (MergeResult<Action>, CostAccumulator) {
        let batch_type = contributors[0].action_type;
        let expected = contributors[0].inner.len();
        for other in &contributors[1..] {
            if other.inner.len() != expected {
                return (
                    Err(MergeError::SequenceLengthMismatch {
                        expected,
                        got: other.inner.len(),
                    }),
                    acc,
                );
            }
        }

        // batch_async aligns on the sorted type key; batch_sync merges
        // position by position as provided.
        let aligned: Vec<Vec<&Action>> = contributors
            .iter()
            .map(|a| {
                let mut inner: Vec<&Action> = a.inner.iter().collect();
                if unordered {
                    inner.sort_by_key(|x| x.action_type.as_str());
                }
                inner
            })
            .collect();

        let mut merged_inner = Vec::with_capacity(expected);
        for position in 0..expected {
            let slot: Vec<&Action> = aligned.iter().map(|inner| inner[position]).collect();
            let slot_type = slot[0].action_type;
            if let Some(divergent) = slot.iter().find(|a| a.action_type != slot_type) {
                return (
                    Err(MergeError::SequenceMismatch {
                        position,
                        expected: slot_type.to_string(),
                        got: divergent.action_type.to_string(),
                    }),
                    acc,
                );
            }
            let (result, next) = self.merge_scalar(slot_type, &slot, acc);
            acc = next;
            match result {
                Ok(mut inner) => {
                    // Inner continuation hints stay with the batch container.
                    inner.wait = None;
                    merged_inner.push(inner);
                }
                Err(e) => return (Err(e), acc),
            }
        }

        let mut merged = Action::new(batch_type);
        merged.inner = merged_inner;
        merged.wait = Some(merge_wait(contributors));
        merged.auto_complete = merge_auto_complete(contributors);
        merged.condense = contributors.iter().find_map(|a| a.condense);
        merged.reasoning = merge_reasoning(contributors);
        (Ok(merged), acc)
    }

    /// Medoid of the values by average cosine similarity.
    ///
    /// On any embedding failure — or when every candidate scores the same —
    /// the mode rule is the canonical fallback.
    fn semantic_medoid(
        &self,
        values: &[Value],
        mut acc: CostAccumulator,
    ) -> (Value, CostAccumulator) {
        let texts: Option<Vec<&str>> = values.iter().map(Value::as_str).collect();
        let Some(texts) = texts else {
            return (mode_value(values), acc);
        };
        let distinct: Vec<&str> = {
            let mut seen = Vec::new();
            for t in &texts {
                if !seen.contains(t) {
                    seen.push(*t);
                }
            }
            seen
        };
        if distinct.len() <= 1 {
            return (values[0].clone(), acc);
        }

        let mut embeddings: Vec<Embedding> = Vec::with_capacity(distinct.len());
        for text in &distinct {
            let (result, next) = self.embedder.embed_accounted(text, acc);
            acc = next;
            match result {
                Ok(embedding) => embeddings.push(embedding),
                Err(e) => {
                    debug!(error = %e, "medoid selection degraded to mode");
                    return (mode_value(values), acc);
                }
            }
        }

        // Map every occurrence back to its distinct embedding so duplicate
        // values weight the scores.
        let occurrence: Vec<usize> = texts
            .iter()
            .map(|t| distinct.iter().position(|d| d == t).unwrap_or(0))
            .collect();

        let mut best: Option<(usize, f64)> = None;
        let mut all_equal = true;
        for (i, &mine) in occurrence.iter().enumerate() {
            let mut total = 0.0;
            for (j, &other) in occurrence.iter().enumerate() {
                if i != j {
                    total += cosine_similarity(&embeddings[mine], &embeddings[other]);
                }
            }
            let score = total / (texts.len() - 1) as f64;
            match best {
                None => best = Some((i, score)),
                Some((_, top)) => {
                    if (score - top).abs() > 1e-9 {
                        all_equal = false;
                    }
                    if score > top + 1e-9 {
                        best = Some((i, score));
                    }
                }
            }
        }

        if all_equal {
            return (mode_value(values), acc);
        }
        let (idx, _) = best.unwrap_or((0, 0.0));
        (values[idx].clone(), acc)
    }
}

/// Most frequent value; ties broken by first occurrence.
fn mode_value(values: &[Value]) -> Value {
    let mut tallies: Vec<(String, usize, usize)> = Vec::new();
    for (idx, value) in values.iter().enumerate() {
        let key = render(value);
        match tallies.iter_mut().find(|(k, _, _)| *k == key) {
            Some((_, count, _)) => *count += 1,
            None => tallies.push((key, 1, idx)),
        }
    }
    let (_, _, idx) = tallies
        .iter()
        .max_by(|a, b| a.1.cmp(&b.1).then(b.2.cmp(&a.2)))
        .cloned()
        .unwrap_or((String::new(), 0, 0));
    values[idx].clone()
}

/// Numeric median; even counts take the lower median. Integer inputs stay
/// integers.
fn median_value(values: &[Value]) -> Value {
    let ints: Option<Vec<i64>> = values.iter().map(Value::as_i64).collect();
    if let Some(mut ints) = ints {
        ints.sort_unstable();
        return Value::from(ints[(ints.len() - 1) / 2]);
    }
    let mut floats: Vec<f64> = values.iter().filter_map(Value::as_f64).collect();
    if floats.is_empty() {
        return mode_value(values);
    }
    floats.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
    Value::from(floats[(floats.len() - 1) / 2])
}

/// Concatenate lists, deduplicating while preserving first-seen order.
fn union_list(values: &[Value]) -> Value {
    let mut seen: Vec<String> = Vec::new();
    let mut items: Vec<Value> = Vec::new();
    for value in values {
        let Some(list) = value.as_array() else { continue };
        for item in list {
            let key = render(item);
            if !seen.contains(&key) {
                seen.push(key);
                items.push(item.clone());
            }
        }
    }
    Value::Array(items)
}

/// The default wait-consensus rule.
///
/// Absent values are filtered out first; all-absent means `false`. Finite
/// waits merge numerically (lower median); any categorical disagreement
/// (`false` vs `true` vs numbers) falls back to mode, with `false` and
/// `true` as distinct values.
fn merge_wait(contributors: &[&Action]) -> WaitPosture {
    let present: Vec<WaitPosture> = contributors.iter().filter_map(|a| a.wait).collect();
    if present.is_empty() {
        return WaitPosture::No;
    }

    let seconds: Option<Vec<u64>> = present
        .iter()
        .map(|w| match w {
            WaitPosture::Seconds(n) => Some(*n),
            _ => None,
        })
        .collect();
    if let Some(mut seconds) = seconds {
        seconds.sort_unstable();
        return WaitPosture::Seconds(seconds[(seconds.len() - 1) / 2]);
    }

    // Mixed categories: mode with first-occurrence tie-breaking.
    let mut tallies: Vec<(WaitPosture, usize)> = Vec::new();
    for w in &present {
        match tallies.iter_mut().find(|(p, _)| p == w) {
            Some((_, count)) => *count += 1,
            None => tallies.push((*w, 1)),
        }
    }
    tallies
        .iter()
        .max_by_key(|(_, count)| *count)
        .map(|(w, _)| *w)
        .unwrap_or(WaitPosture::No)
}

fn merge_auto_complete(contributors: &[&Action]) -> Option<bool> {
    let present: Vec<bool> = contributors.iter().filter_map(|a| a.auto_complete).collect();
    if present.is_empty() {
        return None;
    }
    let yes = present.iter().filter(|b| **b).count();
    let no = present.len() - yes;
    // Ties go to the first-observed value.
    if yes == no {
        return Some(present[0]);
    }
    Some(yes > no)
}

/// Concatenate non-empty reasonings, first occurrence winning duplicates;
/// all-blank clusters keep the representative's (blank) reasoning.
fn merge_reasoning(contributors: &[&Action]) -> String {
    let mut seen: Vec<&str> = Vec::new();
    for action in contributors {
        let r = action.reasoning.trim();
        if !r.is_empty() && !seen.contains(&r) {
            seen.push(r);
        }
    }
    if seen.is_empty() {
        return contributors[0].reasoning.clone();
    }
    seen.join("\n\n")
}

fn render(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cost::{CostEntry, CostType};
    use crate::embedding::EmbedResult;
    use crate::fingerprint::Fingerprint;
    use serde_json::json;

    /// Axis embedder that also bills one entry per call.
    struct CountingEmbedder;
    impl Embedder for CountingEmbedder {
        fn embed(&self, text: &str) -> EmbedResult {
            if text.contains("fail") {
                return Err(crate::embedding::EmbeddingError("down".to_string()));
            }
            let axis = match text.split_whitespace().next().unwrap_or("") {
                "alpha" => [1.0, 0.0, 0.0],
                "beta" => [0.0, 1.0, 0.0],
                "mixed" => [0.7, 0.7, 0.0],
                _ => [0.0, 0.0, 1.0],
            };
            Ok(axis.to_vec())
        }

        fn embed_accounted(
            &self,
            text: &str,
            acc: CostAccumulator,
        ) -> (EmbedResult, CostAccumulator) {
            let entry = CostEntry::new("agent-1", "task-1", CostType::LlmEmbedding)
                .with_metadata("text", json!(text));
            (self.embed(text), acc.add(entry))
        }
    }

    fn merger() -> ParamMerger {
        ParamMerger::new(Arc::new(CountingEmbedder))
    }

    fn cluster_of(actions: Vec<Action>) -> Cluster {
        Cluster {
            fingerprint: Fingerprint::Action {
                action_type: actions[0].action_type,
                signature: Vec::new(),
            },
            actions,
        }
    }

    fn shell(cmd: &str, timeout: Option<i64>) -> Action {
        let mut a = Action::new(ActionType::ExecuteShell);
        a.params.insert("command".to_string(), json!(cmd));
        if let Some(t) = timeout {
            a.params.insert("timeout_seconds".to_string(), json!(t));
        }
        a
    }

    #[test]
    fn test_mode_ties_break_by_first_occurrence() {
        let v = vec![json!("a"), json!("b"), json!("b"), json!("a")];
        assert_eq!(mode_value(&v), json!("a"));
        let v2 = vec![json!("b"), json!("a"), json!("a"), json!("b")];
        assert_eq!(mode_value(&v2), json!("b"));
    }

    #[test]
    fn test_median_takes_lower_on_even_count() {
        assert_eq!(median_value(&[json!(10), json!(30)]), json!(10));
        assert_eq!(median_value(&[json!(30), json!(10), json!(20)]), json!(20));
        // Integers stay integers.
        assert_eq!(median_value(&[json!(5), json!(7), json!(6)]), json!(6));
        // Floats supported.
        assert_eq!(median_value(&[json!(1.5), json!(0.5)]), json!(0.5));
    }

    #[test]
    fn test_union_list_dedups_in_first_seen_order() {
        let merged = union_list(&[json!(["a", "b"]), json!(["b", "c"]), json!(["a"])]);
        assert_eq!(merged, json!(["a", "b", "c"]));
    }

    #[test]
    fn test_exact_required_divergence_fails() {
        let cluster = cluster_of(vec![shell("ls", None), shell("pwd", None)]);
        let (result, _) = merger().merge_cluster(&cluster, CostAccumulator::new());
        assert_eq!(
            result,
            Err(MergeError::InconsistentParams {
                action: "execute_shell".to_string(),
                param: "command".to_string(),
            })
        );
    }

    #[test]
    fn test_median_merges_optional_numeric_param() {
        let cluster = cluster_of(vec![
            shell("ls", Some(10)),
            shell("ls", Some(60)),
            shell("ls", Some(30)),
        ]);
        let (result, _) = merger().merge_cluster(&cluster, CostAccumulator::new());
        assert_eq!(result.unwrap().params["timeout_seconds"], json!(30));
    }

    #[test]
    fn test_semantic_medoid_picks_central_value() {
        let orient = |s: &str| {
            let mut a = Action::new(ActionType::Orient);
            a.params.insert("current_situation".to_string(), json!(s));
            a
        };
        let cluster = cluster_of(vec![
            orient("alpha reading the logs"),
            orient("beta reading the logs"),
            orient("mixed reading both"),
        ]);
        let (result, acc) = merger().merge_cluster(&cluster, CostAccumulator::new());
        // "mixed" sits between the two axes and wins on average similarity.
        assert_eq!(
            result.unwrap().params["current_situation"],
            json!("mixed reading both")
        );
        // One embedding entry per distinct value.
        assert_eq!(acc.len(), 3);
    }

    #[test]
    fn test_semantic_failure_falls_back_to_mode() {
        let orient = |s: &str| {
            let mut a = Action::new(ActionType::Orient);
            a.params.insert("current_situation".to_string(), json!(s));
            a
        };
        let cluster = cluster_of(vec![
            orient("fail one"),
            orient("fail two"),
            orient("fail two"),
        ]);
        let (result, _) = merger().merge_cluster(&cluster, CostAccumulator::new());
        assert_eq!(
            result.unwrap().params["current_situation"],
            json!("fail two")
        );
    }

    #[test]
    fn test_all_equal_scores_fall_back_to_mode() {
        let orient = |s: &str| {
            let mut a = Action::new(ActionType::Orient);
            a.params.insert("current_situation".to_string(), json!(s));
            a
        };
        // Two values on the same axis: symmetric scores.
        let cluster = cluster_of(vec![orient("alpha one"), orient("alpha two")]);
        let (result, _) = merger().merge_cluster(&cluster, CostAccumulator::new());
        assert_eq!(result.unwrap().params["current_situation"], json!("alpha one"));
    }

    #[test]
    fn test_wait_all_absent_defaults_to_false() {
        let cluster = cluster_of(vec![shell("ls", None), shell("ls", None)]);
        let (result, _) = merger().merge_cluster(&cluster, CostAccumulator::new());
        assert_eq!(result.unwrap().wait, Some(WaitPosture::No));
    }

    #[test]
    fn test_wait_absent_values_filtered_before_merge() {
        let mut a = shell("ls", None);
        a.wait = Some(WaitPosture::Seconds(10));
        let b = shell("ls", None); // absent
        let mut c = shell("ls", None);
        c.wait = Some(WaitPosture::Seconds(30));
        let cluster = cluster_of(vec![a, b, c]);
        let (result, _) = merger().merge_cluster(&cluster, CostAccumulator::new());
        // Even count after filtering: lower median.
        assert_eq!(result.unwrap().wait, Some(WaitPosture::Seconds(10)));
    }

    #[test]
    fn test_wait_true_and_false_are_distinct_categories() {
        let mut a = shell("ls", None);
        a.wait = Some(WaitPosture::Await);
        let mut b = shell("ls", None);
        b.wait = Some(WaitPosture::No);
        let mut c = shell("ls", None);
        c.wait = Some(WaitPosture::Await);
        let cluster = cluster_of(vec![a, b, c]);
        let (result, _) = merger().merge_cluster(&cluster, CostAccumulator::new());
        assert_eq!(result.unwrap().wait, Some(WaitPosture::Await));
    }

    #[test]
    fn test_reasoning_concatenates_and_dedups() {
        let mut a = shell("ls", None);
        a.reasoning = "check the directory".to_string();
        let mut b = shell("ls", None);
        b.reasoning = "check the directory".to_string();
        let mut c = shell("ls", None);
        c.reasoning = "need a listing".to_string();
        let cluster = cluster_of(vec![a, b, c]);
        let (result, _) = merger().merge_cluster(&cluster, CostAccumulator::new());
        assert_eq!(
            result.unwrap().reasoning,
            "check the directory\n\nneed a listing"
        );
    }

    #[test]
    fn test_sequence_length_mismatch() {
        let mut a = Action::new(ActionType::BatchSync);
        a.inner = vec![Action::new(ActionType::Todo)];
        let mut b = Action::new(ActionType::BatchSync);
        b.inner = vec![Action::new(ActionType::Todo), Action::new(ActionType::Wait)];
        let cluster = cluster_of(vec![a, b]);
        let (result, _) = merger().merge_cluster(&cluster, CostAccumulator::new());
        assert_eq!(
            result,
            Err(MergeError::SequenceLengthMismatch {
                expected: 1,
                got: 2
            })
        );
    }

    #[test]
    fn test_sequence_type_mismatch() {
        let mut a = Action::new(ActionType::BatchSync);
        a.inner = vec![Action::new(ActionType::Todo), Action::new(ActionType::Wait)];
        let mut b = Action::new(ActionType::BatchSync);
        b.inner = vec![Action::new(ActionType::Wait), Action::new(ActionType::Todo)];
        let cluster = cluster_of(vec![a, b]);
        let (result, _) = merger().merge_cluster(&cluster, CostAccumulator::new());
        assert!(matches!(
            result,
            Err(MergeError::SequenceMismatch { position: 0, .. })
        ));
    }

    #[test]
    fn test_batch_sync_merges_position_by_position() {
        let read = |path: &str| {
            let mut a = Action::new(ActionType::FileRead);
            a.params.insert("path".to_string(), json!(path));
            a
        };
        let mut a = Action::new(ActionType::BatchSync);
        a.inner = vec![read("x.txt"), shell("ls", Some(10))];
        let mut b = Action::new(ActionType::BatchSync);
        b.inner = vec![read("x.txt"), shell("ls", Some(30))];

        let cluster = cluster_of(vec![a, b]);
        let (result, _) = merger().merge_cluster(&cluster, CostAccumulator::new());
        let merged = result.unwrap();
        assert_eq!(merged.inner.len(), 2);
        assert_eq!(merged.inner[0].params["path"], json!("x.txt"));
        assert_eq!(merged.inner[1].params["timeout_seconds"], json!(10));
    }

    #[test]
    fn test_batch_async_aligns_on_sorted_type_key() {
        let read = |path: &str| {
            let mut a = Action::new(ActionType::FileRead);
            a.params.insert("path".to_string(), json!(path));
            a
        };
        let todo = |item: &str| {
            let mut a = Action::new(ActionType::Todo);
            a.params.insert("items".to_string(), json!([item]));
            a
        };
        // Reversed provider order: alignment is by sorted type name.
        let mut a = Action::new(ActionType::BatchAsync);
        a.inner = vec![todo("first"), read("x.txt")];
        let mut b = Action::new(ActionType::BatchAsync);
        b.inner = vec![read("x.txt"), todo("second")];

        let cluster = cluster_of(vec![a, b]);
        let (result, _) = merger().merge_cluster(&cluster, CostAccumulator::new());
        let merged = result.unwrap();
        assert_eq!(merged.inner[0].action_type, ActionType::FileRead);
        assert_eq!(merged.inner[1].action_type, ActionType::Todo);
        assert_eq!(merged.inner[1].params["items"], json!(["first", "second"]));
    }

    #[test]
    fn test_merge_threads_costs_for_every_semantic_param() {
        let spawn = |desc: &str, content: &str| {
            let mut a = Action::new(ActionType::SpawnChild);
            a.params.insert("task_description".to_string(), json!(desc));
            a.params.insert("model_pool".to_string(), json!([content]));
            a
        };
        let cluster = cluster_of(vec![
            spawn("alpha build the index", "m1"),
            spawn("beta build the index", "m2"),
        ]);
        let (result, acc) = merger().merge_cluster(&cluster, CostAccumulator::new());
        assert!(result.is_ok());
        // Two distinct task descriptions embedded.
        assert_eq!(acc.len(), 2);
        assert!(acc
            .entries()
            .iter()
            .all(|e| e.cost_type == CostType::LlmEmbedding));
    }
}
