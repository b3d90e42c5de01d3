//! Clusterer — groups one round's actions into "same proposal" clusters.
//!
//! Clustering is a stable single pass: each action lands in the first
//! cluster whose fingerprint it shares, or opens a new one. Input order is
//! preserved both across clusters and within each cluster's action list,
//! which keeps every downstream step (majority detection, merging,
//! tie-breaking) deterministic for a given set of replies.

use std::sync::Arc;

use crate::action::Action;
use crate::cost::CostAccumulator;
use crate::embedding::Embedder;
use crate::fingerprint::{fingerprint, Fingerprint, SemanticBuckets};
use crate::schema::ActionType;

/// A non-empty group of actions sharing one fingerprint.
#[derive(Debug, Clone)]
pub struct Cluster {
    pub fingerprint: Fingerprint,
    pub actions: Vec<Action>,
}

impl Cluster {
    /// Number of contributing actions.
    pub fn count(&self) -> usize {
        self.actions.len()
    }

    /// The first-observed action, used when no merging is performed.
    pub fn representative(&self) -> &Action {
        &self.actions[0]
    }

    pub fn action_type(&self) -> ActionType {
        self.representative().action_type
    }
}

/// Single-round clusterer with per-round semantic bucket state.
///
/// Build a fresh one per round: bucket representatives are first-observed
/// within a round, and reusing them across rounds would leak one round's
/// observation order into the next.
pub struct Clusterer {
    buckets: SemanticBuckets,
}

impl Clusterer {
    pub fn new(embedder: Arc<dyn Embedder>) -> Self {
        Self {
            buckets: SemanticBuckets::new(embedder),
        }
    }

    /// Partition `actions` into clusters, threading embedding costs.
    ///
    /// Empty input yields the empty list.
    pub fn cluster(
        &mut self,
        actions: Vec<Action>,
        mut acc: CostAccumulator,
    ) -> (Vec<Cluster>, CostAccumulator) {
        let mut clusters: Vec<Cluster> = Vec::new();
        for action in actions {
            let (fp, next) = fingerprint(&action, &mut self.buckets, acc);
            acc = next;
            match clusters.iter_mut().find(|c| c.fingerprint == fp) {
                Some(cluster) => cluster.actions.push(action),
                None => clusters.push(Cluster {
                    fingerprint: fp,
                    actions: vec![action],
                }),
            }
        }
        (clusters, acc)
    }

    /// Whether two actions would land in the same cluster.
    pub fn matches(
        &mut self,
        a: &Action,
        b: &Action,
        acc: CostAccumulator,
    ) -> (bool, CostAccumulator) {
        if a.action_type != b.action_type {
            return (false, acc);
        }
        let (fa, acc) = fingerprint(a, &mut self.buckets, acc);
        let (fb, acc) = fingerprint(b, &mut self.buckets, acc);
        (fa == fb, acc)
    }
}
