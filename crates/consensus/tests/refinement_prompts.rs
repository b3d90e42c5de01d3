//! Round-bound and prompt-hiding properties: the budget is always honored,
//! refinement prompts carry no attribution or tallies, and temperatures
//! descend across rounds.

mod common;

use std::sync::Arc;

use common::{file_read_reply, CountingEmbedder, RecordedCall, ScriptedClient};
use quorum_consensus::{
    ActionType, ConsensusRequest, ConsensusRunner, ConsensusStatus, RunnerConfig,
};

const MODELS: &[&str] = &["openai:gpt-4o", "anthropic:claude-sonnet", "google:gemini-pro"];

/// A pool that never agrees: each model reads a different file every round.
fn disagreeing_client(rounds: usize) -> ScriptedClient {
    let mut client = ScriptedClient::new();
    for (model, path) in MODELS.iter().zip(["a.txt", "b.txt", "c.txt"]) {
        let replies: Vec<String> = (0..rounds).map(|_| file_read_reply(path)).collect();
        let refs: Vec<&str> = replies.iter().map(String::as_str).collect();
        client = client.script(model, &refs);
    }
    client
}

fn runner_for(
    client: ScriptedClient,
    max_rounds: u32,
) -> (ConsensusRunner, Arc<ScriptedClient>) {
    common::init_tracing();
    let client = Arc::new(client);
    let runner = ConsensusRunner::new(
        client.clone(),
        Arc::new(CountingEmbedder::new()),
        MODELS.iter().map(|m| m.to_string()).collect(),
        RunnerConfig::new("agent-1", "task-1").with_max_rounds(max_rounds),
    );
    (runner, client)
}

fn round_calls(calls: &[RecordedCall], round: u32) -> Vec<&RecordedCall> {
    calls.iter().filter(|c| c.round == round).collect()
}

#[tokio::test]
async fn budget_bounds_the_run_and_forces_a_decision() {
    for budget in [1u32, 2, 3] {
        let (runner, client) = runner_for(disagreeing_client(budget as usize), budget);
        let outcome = runner
            .run(ConsensusRequest::new("Pick a file"))
            .await
            .unwrap();

        assert_eq!(outcome.status, ConsensusStatus::ForcedDecision);
        assert_eq!(outcome.rounds, budget);
        assert_eq!(client.total_calls(), (budget as usize) * MODELS.len());
        assert_eq!(outcome.action.action_type, ActionType::FileRead);
        assert!(outcome.confidence >= 0.1 && outcome.confidence <= 1.0);
    }
}

#[tokio::test]
async fn forced_decision_is_stable_across_equal_clusters() {
    // All clusters are singletons with identical priority and postures:
    // the first model in pool order wins.
    let (runner, _) = runner_for(disagreeing_client(2), 2);
    let outcome = runner
        .run(ConsensusRequest::new("Pick a file"))
        .await
        .unwrap();
    assert_eq!(
        outcome.action.params["path"],
        serde_json::json!("a.txt")
    );
}

#[tokio::test]
async fn refinement_prompt_hides_attribution_and_tallies() {
    let (runner, client) = runner_for(disagreeing_client(2), 2);
    runner
        .run(ConsensusRequest::new("Pick a file"))
        .await
        .unwrap();

    let calls = client.calls();
    let second_round = round_calls(&calls, 2);
    assert_eq!(second_round.len(), MODELS.len());

    for call in second_round {
        let prompt = &call.last_user_message;
        // Quotes every proposal...
        assert!(prompt.contains("a.txt"));
        assert!(prompt.contains("b.txt"));
        assert!(prompt.contains("c.txt"));
        // ...but never who proposed it, and never a tally.
        assert!(!prompt.contains("gpt"));
        assert!(!prompt.contains("claude"));
        assert!(!prompt.contains("gemini"));
        assert!(!prompt.contains('%'));
        assert!(!prompt.to_lowercase().contains("voting"));
        assert!(prompt.contains("deliberation"));
        // Prior-round reasoning is grouped under a round header.
        assert!(prompt.contains("Round 1:"));
    }
}

#[tokio::test]
async fn final_round_is_marked_only_at_the_budget() {
    let (runner, client) = runner_for(disagreeing_client(3), 3);
    runner
        .run(ConsensusRequest::new("Pick a file"))
        .await
        .unwrap();

    let calls = client.calls();
    let round2 = round_calls(&calls, 2);
    let round3 = round_calls(&calls, 3);

    assert!(!round2[0].last_user_message.contains("final round"));
    assert!(round3[0].last_user_message.contains("final round"));
}

#[tokio::test]
async fn temperatures_descend_per_family() {
    let (runner, client) = runner_for(disagreeing_client(3), 3);
    runner
        .run(ConsensusRequest::new("Pick a file"))
        .await
        .unwrap();

    let calls = client.calls();
    let temp = |model: &str, round: u32| {
        calls
            .iter()
            .find(|c| c.model == model && c.round == round)
            .map(|c| c.temperature)
            .unwrap()
    };

    // Round 1 starts at the family maximum.
    assert_eq!(temp("openai:gpt-4o", 1), 2.0);
    assert_eq!(temp("google:gemini-pro", 1), 2.0);
    assert_eq!(temp("anthropic:claude-sonnet", 1), 1.0);

    // The final budgeted round lands on the family floor.
    assert_eq!(temp("openai:gpt-4o", 3), 0.4);
    assert_eq!(temp("anthropic:claude-sonnet", 3), 0.2);

    // Monotone descent in between.
    for model in MODELS {
        assert!(temp(model, 2) < temp(model, 1));
        assert!(temp(model, 3) < temp(model, 2));
    }
}

#[tokio::test]
async fn reasoning_window_quotes_at_most_two_rounds() {
    // Four rounds of disagreement: the round-4 prompt may quote rounds 2
    // and 3 but not round 1.
    let a = file_read_reply("a.txt");
    let b = file_read_reply("b.txt");
    let c = file_read_reply("c.txt");
    let mut client = ScriptedClient::new();
    for (model, path) in MODELS.iter().zip([&a, &b, &c]) {
        client = client.script(model, &[path, path, path, path]);
    }
    let (runner, client) = runner_for(client, 4);
    runner
        .run(ConsensusRequest::new("Pick a file"))
        .await
        .unwrap();

    let calls = client.calls();
    let round4 = round_calls(&calls, 4);
    let prompt = &round4[0].last_user_message;
    assert!(prompt.contains("Round 2:"));
    assert!(prompt.contains("Round 3:"));
    assert!(!prompt.contains("Round 1:"));
}
