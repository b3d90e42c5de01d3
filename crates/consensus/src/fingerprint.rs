//! Fingerprints — the deterministic tuples that partition actions into
//! clusters.
//!
//! A fingerprint is derived solely from an action: its type plus the
//! identity-bearing fields the schema declares for that type. Exact-match
//! fields contribute their literal rendering; semantic fields contribute a
//! bucket index assigned by first-representative cosine matching. Batch
//! containers fingerprint on their inner type sequence — ordered for
//! `batch_sync`, sorted for `batch_async` — and the two variants can never
//! collide because they are distinct enum arms.

use std::collections::HashMap;
use std::sync::Arc;

use serde_json::Value;
use tracing::debug;

use crate::action::Action;
use crate::cost::CostAccumulator;
use crate::embedding::{cosine_similarity, Embedder, Embedding};
use crate::schema::{self, ActionType, MatchRule};

/// One identity-bearing field's contribution to a signature.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum SignatureValue {
    /// Literal canonical rendering of an exact-match field.
    Exact(String),
    /// Semantic bucket index for a free-text field.
    Bucket(usize),
    /// The field was not provided.
    Absent,
}

/// Deterministic cluster identity of an action.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Fingerprint {
    /// Non-batch action: type plus identity-bearing field signature.
    Action {
        action_type: ActionType,
        signature: Vec<(String, SignatureValue)>,
    },
    /// Ordered batch: the inner type sequence as provided.
    OrderedBatch { types: Vec<ActionType> },
    /// Unordered batch: the inner type sequence sorted by name.
    UnorderedBatch { types: Vec<ActionType> },
}

struct BucketRep {
    text: String,
    /// Lazily computed; `None` until first needed, `Some(None)` after a
    /// failed embedding attempt (degraded to exact matching).
    embedding: Option<Option<Embedding>>,
}

/// Per-round semantic bucket state.
///
/// The first value observed for a `(action_type, field)` pair becomes
/// bucket 0's representative; later values join the first bucket whose
/// representative they clear the similarity threshold against, in creation
/// order. There is no transitive-closure pass, so assignment is stable in
/// observation order. State is scoped to a single round.
pub struct SemanticBuckets {
    embedder: Arc<dyn Embedder>,
    buckets: HashMap<(ActionType, String), Vec<BucketRep>>,
}

impl SemanticBuckets {
    pub fn new(embedder: Arc<dyn Embedder>) -> Self {
        Self {
            embedder,
            buckets: HashMap::new(),
        }
    }

    /// Assign `text` to a bucket for the given field, threading embedding
    /// costs through the accumulator.
    pub fn assign(
        &mut self,
        action_type: ActionType,
        field: &str,
        text: &str,
        threshold: f64,
        mut acc: CostAccumulator,
    ) -> (usize, CostAccumulator) {
        let reps = self
            .buckets
            .entry((action_type, field.to_string()))
            .or_default();

        // Identical text never needs an embedding call.
        if let Some(idx) = reps.iter().position(|r| r.text == text) {
            return (idx, acc);
        }

        let mut candidate: Option<Option<Embedding>> = None;
        for (idx, rep) in reps.iter_mut().enumerate() {
            let rep_embedding = match &rep.embedding {
                Some(cached) => cached.clone(),
                None => {
                    let (result, next) = Self::try_embed(&*self.embedder, &rep.text, acc);
                    acc = next;
                    rep.embedding = Some(result.clone());
                    result
                }
            };
            let Some(rep_embedding) = rep_embedding else {
                // Degraded representative: exact equality already failed.
                continue;
            };

            let cand_embedding = match &candidate {
                Some(cached) => cached.clone(),
                None => {
                    let (result, next) = Self::try_embed(&*self.embedder, text, acc);
                    acc = next;
                    candidate = Some(result.clone());
                    result
                }
            };
            let Some(cand_embedding) = cand_embedding else {
                break;
            };

            if cosine_similarity(&rep_embedding, &cand_embedding) >= threshold {
                return (idx, acc);
            }
        }

        reps.push(BucketRep {
            text: text.to_string(),
            embedding: candidate,
        });
        (reps.len() - 1, acc)
    }

    fn try_embed(
        embedder: &dyn Embedder,
        text: &str,
        acc: CostAccumulator,
    ) -> (Option<Embedding>, CostAccumulator) {
        let (result, acc) = embedder.embed_accounted(text, acc);
        match result {
            Ok(embedding) => (Some(embedding), acc),
            Err(e) => {
                debug!(error = %e, "embedding unavailable, bucket falls back to exact match");
                (None, acc)
            }
        }
    }
}

/// Compute the fingerprint of an action.
pub fn fingerprint(
    action: &Action,
    buckets: &mut SemanticBuckets,
    mut acc: CostAccumulator,
) -> (Fingerprint, CostAccumulator) {
    match action.action_type {
        ActionType::BatchSync => (
            Fingerprint::OrderedBatch {
                types: action.inner_types(),
            },
            acc,
        ),
        ActionType::BatchAsync => {
            let mut types = action.inner_types();
            types.sort_unstable_by_key(|t| t.as_str());
            (Fingerprint::UnorderedBatch { types }, acc)
        }
        action_type => {
            let mut signature = Vec::new();
            for spec in schema::spec(action_type).params {
                let Some(rule) = spec.matching else { continue };
                let entry = match action.param(spec.name) {
                    None => SignatureValue::Absent,
                    Some(value) => match rule {
                        MatchRule::Exact => SignatureValue::Exact(canonical_render(value)),
                        MatchRule::Semantic { threshold } => match value.as_str() {
                            Some(text) => {
                                let (idx, next) =
                                    buckets.assign(action_type, spec.name, text, threshold, acc);
                                acc = next;
                                SignatureValue::Bucket(idx)
                            }
                            // Non-string value in a semantic slot: degrade
                            // to literal identity.
                            None => SignatureValue::Exact(canonical_render(value)),
                        },
                    },
                };
                signature.push((spec.name.to_string(), entry));
            }
            (
                Fingerprint::Action {
                    action_type,
                    signature,
                },
                acc,
            )
        }
    }
}

/// Deterministic literal rendering for exact-match signature entries.
fn canonical_render(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}
