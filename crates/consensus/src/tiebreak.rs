//! Tie-breaker — deterministic winner selection when no cluster holds a
//! majority.
//!
//! The comparator is a fixed lexicographic chain: action priority, then
//! wait-posture score, then auto-complete score, then input position. It is
//! total and referentially transparent: shuffling the cluster list never
//! changes the winner as long as the winner is unique under the chain.

use std::cmp::Ordering;

use crate::action::{Action, WaitPosture};
use crate::cluster::Cluster;
use crate::schema::{ActionType, EMPTY_BATCH_PRIORITY};

/// Effective priority of one action.
///
/// Batch containers take the maximum priority of their inner actions, so a
/// batch smuggling in a costly action loses to a cheaper single action.
/// Empty batches use the sentinel and lose to everything real.
pub fn effective_priority(action: &Action) -> u16 {
    if action.action_type.is_batch() {
        return action
            .inner
            .iter()
            .map(|a| a.action_type.priority())
            .max()
            .unwrap_or(EMPTY_BATCH_PRIORITY);
    }
    action.action_type.priority()
}

/// Priority of a cluster: its actions share a type (and for batches a type
/// sequence), so the representative decides.
pub fn cluster_priority(cluster: &Cluster) -> u16 {
    effective_priority(cluster.representative())
}

/// Wait-posture score of one action, smaller-is-better in lex order.
///
/// Models that prefer to continue outrank models that prefer to halt, and
/// shorter finite waits outrank longer ones.
fn wait_score(action: &Action) -> (u64, u64) {
    match action.wait {
        Some(WaitPosture::Await) => (0, 0),
        Some(WaitPosture::Seconds(n)) => (0, 1 + n),
        None => (0, 1),
        Some(WaitPosture::No) => (1, 0),
    }
}

/// Component-wise sum of wait scores across a cluster.
pub fn cluster_wait_score(cluster: &Cluster) -> (u64, u64) {
    cluster
        .actions
        .iter()
        .map(wait_score)
        .fold((0, 0), |(a, b), (x, y)| (a + x, b + y))
}

fn auto_complete_score(action: &Action) -> (u64, u64) {
    match action.auto_complete {
        Some(false) => (0, 0),
        None => (0, 1),
        Some(true) => (1, 0),
    }
}

/// Component-wise sum of auto-complete scores across a cluster.
pub fn cluster_auto_complete_score(cluster: &Cluster) -> (u64, u64) {
    cluster
        .actions
        .iter()
        .map(auto_complete_score)
        .fold((0, 0), |(a, b), (x, y)| (a + x, b + y))
}

/// The lexicographic comparator. `Ordering::Less` means `a` wins.
pub fn compare(a: &Cluster, b: &Cluster) -> Ordering {
    cluster_priority(a)
        .cmp(&cluster_priority(b))
        .then_with(|| cluster_wait_score(a).cmp(&cluster_wait_score(b)))
        .then_with(|| cluster_auto_complete_score(a).cmp(&cluster_auto_complete_score(b)))
}

/// Pick the winning cluster; the first cluster in input order wins exact
/// ties. Returns `None` only for an empty list.
pub fn break_tie(clusters: &[Cluster]) -> Option<&Cluster> {
    let mut winner: Option<&Cluster> = None;
    for cluster in clusters {
        match winner {
            None => winner = Some(cluster),
            Some(best) => {
                if compare(cluster, best) == Ordering::Less {
                    winner = Some(cluster);
                }
            }
        }
    }
    winner
}
