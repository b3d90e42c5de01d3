//! Cost-preservation properties: every model and embedding call made during
//! a run must surface in the final accumulator, and flushing must announce
//! each entry on both cost topics.

mod common;

use std::sync::Arc;

use common::{spawn_reply, CountingEmbedder, ScriptedClient};
use quorum_consensus::cost::{CostRecorder, CostType, MemoryCostStore};
use quorum_consensus::events::{agent_costs_topic, task_costs_topic, EventBus};
use quorum_consensus::{ConsensusRequest, ConsensusRunner, ConsensusStatus, RunnerConfig};

#[tokio::test]
async fn accumulator_holds_one_entry_per_model_and_embedding_call() {
    common::init_tracing();
    // Five models, five distinct (but similar) task descriptions: the
    // clusterer buckets them and the merger picks a medoid, both through
    // the embedder.
    let client = ScriptedClient::new()
        .script("m1", &[&spawn_reply("alpha index the sources")])
        .script("m2", &[&spawn_reply("alpha index all source files")])
        .script("m3", &[&spawn_reply("alpha build a source index")])
        .script("m4", &[&spawn_reply("alpha index every source tree")])
        .script("m5", &[&spawn_reply("alpha index the code")]);
    let client = Arc::new(client);
    let embedder = Arc::new(CountingEmbedder::new());

    let runner = ConsensusRunner::new(
        client.clone(),
        embedder.clone(),
        vec!["m1".into(), "m2".into(), "m3".into(), "m4".into(), "m5".into()],
        RunnerConfig::new("agent-1", "task-1"),
    );

    let outcome = runner
        .run(ConsensusRequest::new("Index the repository"))
        .await
        .unwrap();

    assert_eq!(outcome.status, ConsensusStatus::Consensus);

    let model_calls = client.total_calls();
    let embedding_calls = embedder.call_count();
    assert_eq!(model_calls, 5);
    // Clustering embeds each new value against the bucket representative
    // and the merger embeds all five distinct values for the medoid.
    assert!(embedding_calls >= 5);

    // One accumulator entry per call, none lost at any seam.
    assert_eq!(outcome.accumulator.len(), model_calls + embedding_calls);

    let embedding_entries = outcome
        .accumulator
        .entries()
        .iter()
        .filter(|e| e.cost_type == CostType::LlmEmbedding)
        .count();
    assert_eq!(embedding_entries, embedding_calls);

    let consensus_entries = outcome
        .accumulator
        .entries()
        .iter()
        .filter(|e| e.cost_type == CostType::LlmConsensus)
        .count();
    assert_eq!(consensus_entries, model_calls);
}

#[tokio::test]
async fn costs_survive_multiple_rounds() {
    common::init_tracing();
    let split_a = spawn_reply("alpha restructure the cache");
    let split_b = spawn_reply("beta rewrite the parser");
    let client = ScriptedClient::new()
        .script("m1", &[&split_a, &split_a])
        .script("m2", &[&split_a, &split_a])
        .script("m3", &[&split_b, &split_b]);
    let client = Arc::new(client);
    let embedder = Arc::new(CountingEmbedder::new());

    let runner = ConsensusRunner::new(
        client.clone(),
        embedder.clone(),
        vec!["m1".into(), "m2".into(), "m3".into()],
        RunnerConfig::new("agent-1", "task-1"),
    );

    let outcome = runner
        .run(ConsensusRequest::new("Improve throughput"))
        .await
        .unwrap();

    assert_eq!(outcome.rounds, 2);
    // Entries from round 1 are still present after round 2's work.
    assert_eq!(
        outcome.accumulator.len(),
        client.total_calls() + embedder.call_count()
    );
}

#[tokio::test]
async fn flush_writes_the_store_and_announces_on_both_topics() -> anyhow::Result<()> {
    common::init_tracing();
    let reply = spawn_reply("alpha archive old runs");
    let client = Arc::new(
        ScriptedClient::new()
            .script("m1", &[&reply])
            .script("m2", &[&reply]),
    );
    let embedder = Arc::new(CountingEmbedder::new());
    let store = Arc::new(MemoryCostStore::new());
    let bus = EventBus::new().shared();

    let mut task_rx = bus.subscribe_topic(task_costs_topic("task-9"));
    let mut agent_rx = bus.subscribe_topic(agent_costs_topic("agent-7"));

    let recorder = Arc::new(CostRecorder::new(store.clone()).with_bus(bus.clone()));
    let runner = ConsensusRunner::new(
        client,
        embedder,
        vec!["m1".into(), "m2".into()],
        RunnerConfig::new("agent-7", "task-9"),
    )
    .with_recorder(recorder)
    .with_bus(bus.clone());

    let outcome = runner
        .run(ConsensusRequest::new("Archive old runs"))
        .await?;

    // Every accumulated entry was persisted.
    assert_eq!(store.len(), outcome.accumulator.len());

    // And announced once per entry on each topic.
    for _ in 0..outcome.accumulator.len() {
        let event = task_rx.recv().await?;
        assert_eq!(event.event_type(), "cost_recorded");
    }
    for _ in 0..outcome.accumulator.len() {
        let event = agent_rx.recv().await?;
        assert_eq!(event.event_type(), "cost_recorded");
    }
    Ok(())
}
