//! Aggregator — majority detection and the per-round refinement prompt.
//!
//! The deliberation is framed to the models as independent contexts
//! converging on one action. Proposals are shown verbatim but never
//! attributed, and no percentages or tallies appear anywhere in the prompt:
//! a model that knows it is in the minority anchors on the majority instead
//! of re-reasoning.

use std::fmt::Write as _;

use crate::action::Action;
use crate::cluster::Cluster;
use crate::context::RoundContext;

/// Maximum response records quoted per round in refinement prompts.
const MAX_RECORDS_PER_ROUND: usize = 3;

/// Find the cluster holding this round's threshold, if any.
///
/// Round 1 demands unanimity: even full agreement on a first guess gets one
/// refinement pass where models see each other's reasoning before the run
/// can lock in. Rounds 2 and later accept a strict majority; an exact
/// two-way 50% split is no majority.
pub fn majority_cluster<'a>(
    clusters: &'a [Cluster],
    n_total: usize,
    round: u32,
) -> Option<&'a Cluster> {
    if n_total == 0 {
        return None;
    }
    if round <= 1 {
        clusters.iter().find(|c| c.count() == n_total)
    } else {
        clusters.iter().find(|c| 2 * c.count() > n_total)
    }
}

/// Build the refinement prompt for the upcoming round.
///
/// `proposals` are the parsed actions of the round that just failed to
/// reach the threshold; `round` is the round this prompt will be answered
/// in. The prompt restates the goal, lists the proposals as unattributed
/// JSON, quotes the retained reasoning window, and marks the final round
/// when the budget is about to run out.
pub fn build_refinement_prompt(proposals: &[Action], round: u32, ctx: &RoundContext) -> String {
    let mut prompt = String::new();

    prompt.push_str(
        "You are taking part in a multi-model deliberation. Several models are \
         reasoning about the same task in fully independent contexts, and no \
         single proposal below is authoritative.\n\n",
    );

    prompt.push_str("## Task\n");
    prompt.push_str(&ctx.task_prompt);
    prompt.push_str("\n\n");

    prompt.push_str("## Proposals under consideration\n");
    if proposals.is_empty() {
        prompt.push_str("No valid proposals were produced last round.\n");
    } else {
        for action in proposals {
            let rendered = serde_json::to_string_pretty(&action.to_value())
                .unwrap_or_else(|_| action.summary());
            prompt.push_str("```json\n");
            prompt.push_str(&rendered);
            prompt.push_str("\n```\n");
        }
    }
    prompt.push('\n');

    let mut wrote_header = false;
    for round_records in ctx.recent_rounds() {
        if round_records.records.is_empty() {
            continue;
        }
        if !wrote_header {
            prompt.push_str("## Reasoning so far\n");
            wrote_header = true;
        }
        let _ = writeln!(prompt, "Round {}:", round_records.round);
        for record in round_records.records.iter().take(MAX_RECORDS_PER_ROUND) {
            let summary = record_summary(record);
            let reasoning = if record.reasoning.is_empty() {
                "(no reasoning given)"
            } else {
                record.reasoning.as_str()
            };
            let _ = writeln!(prompt, "- {summary}: {reasoning}");
        }
    }
    if wrote_header {
        prompt.push('\n');
    }

    if round >= ctx.max_rounds {
        prompt.push_str(
            "This is the final round of deliberation. Converge on the single \
             best action now; if the proposals conflict, prefer the most \
             conservative one.\n\n",
        );
    } else {
        prompt.push_str(
            "Reconsider your position in light of the proposals above. Keep \
             what is right, discard what is wrong, and do not defer to any \
             proposal merely because it appears.\n\n",
        );
    }

    prompt.push_str(
        "Reply with a single JSON object: {\"action\": ..., \"params\": {...}, \
         \"reasoning\": \"...\", \"wait\": false}.",
    );
    prompt
}

/// Compact summary of a remembered response, in the same bracket form the
/// proposals use. Batch records list their inner action names from the raw
/// params; unknown actions fall back to the bare name.
fn record_summary(record: &crate::context::ResponseRecord) -> String {
    use crate::schema::ActionType;

    let Some(name) = record.action.as_deref() else {
        return "[no action]".to_string();
    };
    match ActionType::from_name(name) {
        Some(ty) if ty.is_batch() => {
            let mut names: Vec<&str> = record
                .params
                .get("actions")
                .and_then(|v| v.as_array())
                .map(|items| {
                    items
                        .iter()
                        .filter_map(|item| item.get("action").and_then(|a| a.as_str()))
                        .collect()
                })
                .unwrap_or_default();
            if ty == ActionType::BatchAsync {
                names.sort_unstable();
            }
            format!("[{name}: [{}]]", names.join(", "))
        }
        Some(ty) => {
            let mut action = Action::new(ty);
            action.params = record.params.clone();
            action.summary()
        }
        None => format!("[{name}]"),
    }
}

/// Refinement prompts quote model output but must never leak attribution
/// or tallies. Checked by tests and cheap enough to assert in debug runs.
pub fn prompt_is_unattributed(prompt: &str, model_ids: &[String]) -> bool {
    if prompt.contains('%') {
        return false;
    }
    !model_ids.iter().any(|m| {
        let family = m.split_once(':').map(|(_, rest)| rest).unwrap_or(m);
        prompt.contains(m.as_str()) || prompt.contains(family)
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::ResponseRecord;
    use crate::fingerprint::Fingerprint;
    use crate::schema::ActionType;
    use serde_json::{json, Map};

    fn cluster_of(n: usize, ty: ActionType) -> Cluster {
        Cluster {
            fingerprint: Fingerprint::Action {
                action_type: ty,
                signature: Vec::new(),
            },
            actions: (0..n).map(|_| Action::new(ty)).collect(),
        }
    }

    #[test]
    fn test_round_one_requires_unanimity() {
        let clusters = vec![cluster_of(3, ActionType::Orient)];
        assert!(majority_cluster(&clusters, 3, 1).is_some());

        let split = vec![
            cluster_of(2, ActionType::Orient),
            cluster_of(1, ActionType::Wait),
        ];
        assert!(majority_cluster(&split, 3, 1).is_none());
    }

    #[test]
    fn test_later_rounds_accept_strict_majority() {
        let split = vec![
            cluster_of(2, ActionType::Orient),
            cluster_of(1, ActionType::Wait),
        ];
        assert!(majority_cluster(&split, 3, 2).is_some());
        assert_eq!(
            majority_cluster(&split, 3, 2).unwrap().action_type(),
            ActionType::Orient
        );
    }

    #[test]
    fn test_exact_fifty_percent_is_no_majority() {
        let split = vec![
            cluster_of(2, ActionType::Orient),
            cluster_of(2, ActionType::Wait),
        ];
        assert!(majority_cluster(&split, 4, 2).is_none());
        assert!(majority_cluster(&split, 4, 3).is_none());
    }

    #[test]
    fn test_empty_pool_has_no_majority() {
        assert!(majority_cluster(&[], 0, 1).is_none());
    }

    fn sample_ctx() -> RoundContext {
        let mut ctx = RoundContext::new("Investigate the failing deploy").with_max_rounds(4);
        let record = |name: &str, reasoning: &str| ResponseRecord {
            action: Some(name.to_string()),
            params: Map::new(),
            reasoning: reasoning.to_string(),
        };
        ctx.record_round(
            1,
            vec![
                record("orient", "need situational awareness first"),
                record("execute_shell", "logs will say more"),
                record("orient", "still unclear what broke"),
                record("wait", "give the deploy time"),
            ],
            Vec::new(),
        );
        ctx
    }

    fn sample_proposals() -> Vec<Action> {
        let mut orient = Action::new(ActionType::Orient);
        orient
            .params
            .insert("current_situation".to_string(), json!("deploy is red"));
        orient.reasoning = "look before acting".to_string();
        let shell = {
            let mut a = Action::new(ActionType::ExecuteShell);
            a.params.insert("command".to_string(), json!("kubectl logs"));
            a
        };
        vec![orient, shell]
    }

    #[test]
    fn test_prompt_restates_task_and_lists_proposals() {
        let ctx = sample_ctx();
        let prompt = build_refinement_prompt(&sample_proposals(), 2, &ctx);
        assert!(prompt.contains("Investigate the failing deploy"));
        assert!(prompt.contains("\"action\": \"orient\""));
        assert!(prompt.contains("kubectl logs"));
        assert!(prompt.contains("deliberation"));
        assert!(!prompt.to_lowercase().contains("voting"));
    }

    #[test]
    fn test_prompt_hides_attribution_and_tallies() {
        let ctx = sample_ctx();
        let prompt = build_refinement_prompt(&sample_proposals(), 2, &ctx);
        let models = vec![
            "openai:gpt-4o".to_string(),
            "anthropic:claude-sonnet".to_string(),
            "google:gemini-pro".to_string(),
        ];
        assert!(prompt_is_unattributed(&prompt, &models));
        assert!(!prompt.contains('%'));
    }

    #[test]
    fn test_prompt_caps_records_per_round() {
        let ctx = sample_ctx();
        let prompt = build_refinement_prompt(&sample_proposals(), 2, &ctx);
        // Four records stored, only three quoted.
        assert!(prompt.contains("situational awareness"));
        assert!(prompt.contains("logs will say more"));
        assert!(prompt.contains("still unclear"));
        assert!(!prompt.contains("give the deploy time"));
    }

    #[test]
    fn test_prompt_groups_by_round_headers() {
        let mut ctx = sample_ctx();
        ctx.record_round(
            2,
            vec![ResponseRecord {
                action: Some("orient".to_string()),
                params: Map::new(),
                reasoning: "second look".to_string(),
            }],
            Vec::new(),
        );
        let prompt = build_refinement_prompt(&sample_proposals(), 3, &ctx);
        assert!(prompt.contains("Round 1:"));
        assert!(prompt.contains("Round 2:"));
    }

    #[test]
    fn test_final_round_marker() {
        let ctx = sample_ctx();
        let not_final = build_refinement_prompt(&sample_proposals(), 3, &ctx);
        assert!(!not_final.contains("final round"));

        let final_round = build_refinement_prompt(&sample_proposals(), 4, &ctx);
        assert!(final_round.contains("final round"));
    }

    #[test]
    fn test_empty_proposals_still_produce_a_prompt() {
        let ctx = RoundContext::new("task");
        let prompt = build_refinement_prompt(&[], 2, &ctx);
        assert!(prompt.contains("No valid proposals"));
    }
}
