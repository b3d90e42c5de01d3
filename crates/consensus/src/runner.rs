//! Round controller — the consensus state machine.
//!
//! One run walks `Querying → Parsing → Clustering → Deciding` per round,
//! looping through `Refining` until a round reaches its threshold or the
//! budget runs out, then lands in `Emitting`. Model queries fan out one
//! task per model and are awaited as a batch under per-model and per-round
//! deadlines; every downstream computation consumes the replies in pool
//! order so a given set of replies always produces the same decision.
//!
//! The cost accumulator is threaded through every seam and flushed exactly
//! once, best-effort, on the way out — on error paths too.

use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde_json::{Map, Value};
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use crate::action::{Action, WaitPosture};
use crate::aggregator;
use crate::cluster::{Cluster, Clusterer};
use crate::context::{ResponseRecord, RoundContext};
use crate::cost::{CostAccumulator, CostRecorder};
use crate::embedding::Embedder;
use crate::events::{task_events_topic, RuntimeEvent, SharedEventBus};
use crate::merge::ParamMerger;
use crate::model::{CallOptions, ChatMessage, ModelClient, ModelFailure, ModelId, ModelReply, RoundOutcome};
use crate::parser::{self, ParseOptions};
use crate::prompts::{self, AgentProfile};
use crate::schema::DEFAULT_MAX_ROUNDS;
use crate::temperature::TemperatureSchedule;
use crate::tiebreak;

/// Phases of the consensus state machine, logged per transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunnerPhase {
    Querying,
    Parsing,
    Clustering,
    Deciding,
    Refining,
    Emitting,
}

impl fmt::Display for RunnerPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Querying => write!(f, "querying"),
            Self::Parsing => write!(f, "parsing"),
            Self::Clustering => write!(f, "clustering"),
            Self::Deciding => write!(f, "deciding"),
            Self::Refining => write!(f, "refining"),
            Self::Emitting => write!(f, "emitting"),
        }
    }
}

/// How the emitted action was reached.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConsensusStatus {
    /// A round reached its threshold.
    Consensus,
    /// The tie-breaker decided after the budget ran out.
    ForcedDecision,
}

impl fmt::Display for ConsensusStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Consensus => write!(f, "consensus"),
            Self::ForcedDecision => write!(f, "forced_decision"),
        }
    }
}

/// Result of one consensus run.
#[derive(Debug)]
pub struct ConsensusOutcome {
    pub status: ConsensusStatus,
    /// The merged action. Always carries a `wait` field.
    pub action: Action,
    /// Clamped to `[0.1, 1.0]`.
    pub confidence: f64,
    /// Rounds of model calls actually made.
    pub rounds: u32,
    /// Every cost entry incurred during the run, already flushed.
    pub accumulator: CostAccumulator,
    /// Phase transition audit trail, `(round, phase)` in order.
    pub phases: Vec<(u32, RunnerPhase)>,
}

/// Unrecoverable run failures. Everything locally recoverable is recovered
/// silently; these mean no action could be produced at all.
#[derive(Debug, thiserror::Error)]
pub enum RunnerError {
    #[error("no models configured")]
    NoModels,

    #[error("no viable action: no round produced a mergeable proposal")]
    NoViableAction,
}

/// Result type for runner operations.
pub type RunnerResult<T> = Result<T, RunnerError>;

/// Static configuration of one runner.
#[derive(Debug, Clone)]
pub struct RunnerConfig {
    pub agent_id: String,
    pub task_id: String,
    /// Round budget; the single default is [`DEFAULT_MAX_ROUNDS`].
    pub max_rounds: u32,
    /// Per-model call deadline.
    pub model_timeout: Duration,
    /// Whole-round deadline for the parallel dispatch.
    pub round_timeout: Duration,
    /// Side-channel log for `bug_report` fields in replies.
    pub bug_report_log: Option<PathBuf>,
}

impl RunnerConfig {
    pub fn new(agent_id: impl Into<String>, task_id: impl Into<String>) -> Self {
        Self {
            agent_id: agent_id.into(),
            task_id: task_id.into(),
            max_rounds: DEFAULT_MAX_ROUNDS,
            model_timeout: Duration::from_secs(120),
            round_timeout: Duration::from_secs(300),
            bug_report_log: None,
        }
    }

    pub fn with_max_rounds(mut self, max_rounds: u32) -> Self {
        self.max_rounds = max_rounds.max(1);
        self
    }
}

/// The request a host agent hands to the runner.
#[derive(Debug, Clone, Default)]
pub struct ConsensusRequest {
    pub task_prompt: String,
    pub profile: AgentProfile,
    /// Optional lesson/state payload for prompt priming.
    pub lesson: Option<Value>,
}

impl ConsensusRequest {
    pub fn new(task_prompt: impl Into<String>) -> Self {
        Self {
            task_prompt: task_prompt.into(),
            profile: AgentProfile::default(),
            lesson: None,
        }
    }
}

/// Confidence of an emitted decision.
///
/// `base + majority_bonus − round_penalty`, clamped to `[0.1, 1.0]`. The
/// penalty only applies past the configured budget, and it is computed
/// from that same configured budget on every path — the fallback paths
/// included.
pub fn confidence(winning: usize, n_total: usize, round: u32, max_rounds: u32) -> f64 {
    let base = if n_total == 0 {
        0.0
    } else {
        winning as f64 / n_total as f64
    };
    let bonus = if base > 0.6 { 0.10 } else { 0.0 };
    let penalty = f64::from(round.saturating_sub(max_rounds)) * 0.10;
    (base + bonus - penalty).clamp(0.1, 1.0)
}

/// Drives a pool of models to one action per request.
pub struct ConsensusRunner {
    client: Arc<dyn ModelClient>,
    embedder: Arc<dyn Embedder>,
    merger: ParamMerger,
    models: Vec<ModelId>,
    schedule: TemperatureSchedule,
    config: RunnerConfig,
    recorder: Option<Arc<CostRecorder>>,
    bus: Option<SharedEventBus>,
}

impl ConsensusRunner {
    pub fn new(
        client: Arc<dyn ModelClient>,
        embedder: Arc<dyn Embedder>,
        models: Vec<ModelId>,
        config: RunnerConfig,
    ) -> Self {
        let schedule = TemperatureSchedule::new(config.max_rounds);
        let merger = ParamMerger::new(embedder.clone());
        Self {
            client,
            embedder,
            merger,
            models,
            schedule,
            config,
            recorder: None,
            bus: None,
        }
    }

    /// Attach a cost recorder, flushed once per run.
    pub fn with_recorder(mut self, recorder: Arc<CostRecorder>) -> Self {
        self.recorder = Some(recorder);
        self
    }

    /// Attach an event bus for round-lifecycle events.
    pub fn with_bus(mut self, bus: SharedEventBus) -> Self {
        self.bus = Some(bus);
        self
    }

    /// Run the full deliberation for one request.
    pub async fn run(&self, request: ConsensusRequest) -> RunnerResult<ConsensusOutcome> {
        if self.models.is_empty() {
            return Err(RunnerError::NoModels);
        }

        let mut ctx = RoundContext::new(request.task_prompt.clone())
            .with_max_rounds(self.config.max_rounds);
        if let Some(lesson) = request.lesson.clone() {
            ctx = ctx.with_lesson(lesson);
        }

        let system = prompts::build_system_prompt(&request.profile, ctx.lesson.as_ref());
        ctx.push_message(ChatMessage::system(system));
        ctx.push_message(ChatMessage::user(request.task_prompt));

        let max_rounds = self.config.max_rounds;
        let mut acc = CostAccumulator::new();
        let mut phases: Vec<(u32, RunnerPhase)> = Vec::new();
        let mut prev_clusters: Vec<Cluster> = Vec::new();
        let mut prev_n_total = 0usize;

        for round in 1..=max_rounds {
            self.enter_phase(&mut phases, round, RunnerPhase::Querying);
            self.publish(RuntimeEvent::RoundStarted {
                agent_id: self.config.agent_id.clone(),
                task_id: self.config.task_id.clone(),
                round,
                models: self.models.clone(),
                timestamp: Utc::now(),
            });

            let outcome = self.dispatch_round(&ctx.history, round).await;
            for reply in &outcome.successful {
                acc = acc.extend(reply.costs.iter().cloned());
            }
            for failure in &outcome.failed {
                warn!(model = %failure.model, round, reason = %failure.reason, "model failed");
            }

            self.enter_phase(&mut phases, round, RunnerPhase::Parsing);
            let (actions, records) = self.parse_round(&outcome);
            let n_total = actions.len();

            if actions.is_empty() {
                ctx.record_round(round, records, Vec::new());
                if !prev_clusters.is_empty() {
                    // Total failure of a refinement round: force a decision
                    // from what the previous round produced.
                    warn!(round, "refinement round produced nothing, forcing decision");
                    self.enter_phase(&mut phases, round, RunnerPhase::Deciding);
                    let (chosen, next) = self.merge_best(&prev_clusters, None, acc);
                    acc = next;
                    let Some((action, winning)) = chosen else {
                        return self.bail(acc).await;
                    };
                    let score = confidence(winning, prev_n_total, round, max_rounds);
                    return Ok(self
                        .emit(
                            ConsensusStatus::ForcedDecision,
                            action,
                            score,
                            round,
                            acc,
                            phases,
                        )
                        .await);
                }
                if round >= max_rounds {
                    return self.bail(acc).await;
                }
                self.enter_phase(&mut phases, round + 1, RunnerPhase::Refining);
                let prompt = aggregator::build_refinement_prompt(&[], round + 1, &ctx);
                ctx.push_message(ChatMessage::user(prompt));
                continue;
            }

            self.enter_phase(&mut phases, round, RunnerPhase::Clustering);
            let mut clusterer = Clusterer::new(self.embedder.clone());
            let (clusters, next) = clusterer.cluster(actions.clone(), acc);
            acc = next;
            ctx.record_round(round, records, actions.clone());
            debug!(round, clusters = clusters.len(), proposals = n_total, "round clustered");

            self.enter_phase(&mut phases, round, RunnerPhase::Deciding);
            if let Some(majority) = aggregator::majority_cluster(&clusters, n_total, round) {
                let winning = majority.count();
                let (result, next) = self.merger.merge_cluster(majority, acc);
                acc = next;
                match result {
                    Ok(action) => {
                        let score = confidence(winning, n_total, round, max_rounds);
                        return Ok(self
                            .emit(ConsensusStatus::Consensus, action, score, round, acc, phases)
                            .await);
                    }
                    Err(e) => {
                        // The majority cluster cannot win; fall back to the
                        // next-best cluster under the tie-breaker.
                        warn!(round, error = %e, "majority cluster failed to merge");
                        let (chosen, next) =
                            self.merge_best(&clusters, Some(&majority.fingerprint.clone()), acc);
                        acc = next;
                        if let Some((action, count)) = chosen {
                            let score = confidence(count, n_total, round, max_rounds);
                            return Ok(self
                                .emit(
                                    ConsensusStatus::ForcedDecision,
                                    action,
                                    score,
                                    round,
                                    acc,
                                    phases,
                                )
                                .await);
                        }
                        if round >= max_rounds {
                            return self.bail(acc).await;
                        }
                    }
                }
            } else if round >= max_rounds {
                let (chosen, next) = self.merge_best(&clusters, None, acc);
                acc = next;
                let Some((action, winning)) = chosen else {
                    return self.bail(acc).await;
                };
                let score = confidence(winning, n_total, round, max_rounds);
                return Ok(self
                    .emit(
                        ConsensusStatus::ForcedDecision,
                        action,
                        score,
                        round,
                        acc,
                        phases,
                    )
                    .await);
            }

            self.enter_phase(&mut phases, round + 1, RunnerPhase::Refining);
            let prompt = aggregator::build_refinement_prompt(&actions, round + 1, &ctx);
            ctx.push_message(ChatMessage::user(prompt));
            prev_clusters = clusters;
            prev_n_total = n_total;
        }

        // The loop always emits or bails before falling through.
        self.bail(acc).await
    }

    /// Fan one query task out per model and await the batch under the
    /// round deadline. Results are reassembled in pool order.
    async fn dispatch_round(&self, history: &[ChatMessage], round: u32) -> RoundOutcome {
        let mut join_set: JoinSet<(usize, ModelId, Result<ModelReply, String>)> = JoinSet::new();

        for (position, model) in self.models.iter().enumerate() {
            let client = self.client.clone();
            let model = model.clone();
            let messages: Vec<ChatMessage> = history.to_vec();
            let opts = CallOptions {
                round,
                temperature: self.schedule.temperature(&model, round),
                agent_id: self.config.agent_id.clone(),
                task_id: self.config.task_id.clone(),
                timeout: self.config.model_timeout,
            };

            join_set.spawn(async move {
                let result =
                    tokio::time::timeout(opts.timeout, client.complete(&model, &messages, &opts))
                        .await;
                let outcome = match result {
                    Ok(Ok(reply)) => Ok(reply),
                    Ok(Err(e)) => Err(e.to_string()),
                    Err(_) => Err(format!("timed out after {:?}", opts.timeout)),
                };
                (position, model, outcome)
            });
        }

        let mut collected: Vec<(usize, ModelId, Result<ModelReply, String>)> = Vec::new();
        let deadline = tokio::time::sleep(self.config.round_timeout);
        tokio::pin!(deadline);

        loop {
            tokio::select! {
                joined = join_set.join_next() => match joined {
                    Some(Ok(item)) => collected.push(item),
                    Some(Err(e)) => warn!(error = %e, "model query task panicked"),
                    None => break,
                },
                _ = &mut deadline => {
                    warn!(round, "round deadline elapsed, aborting pending queries");
                    join_set.abort_all();
                    while let Some(joined) = join_set.join_next().await {
                        if let Ok(item) = joined {
                            collected.push(item);
                        }
                    }
                    break;
                }
            }
        }

        let mut outcome = RoundOutcome::default();
        for (position, model) in self.models.iter().enumerate() {
            match collected.iter().find(|(p, _, _)| *p == position) {
                Some((_, _, Ok(reply))) => outcome.successful.push(reply.clone()),
                Some((_, m, Err(reason))) => outcome.failed.push(ModelFailure {
                    model: m.clone(),
                    reason: reason.clone(),
                }),
                None => outcome.failed.push(ModelFailure {
                    model: model.clone(),
                    reason: "round deadline elapsed".to_string(),
                }),
            }
        }
        outcome
    }

    /// Parse every successful reply; failures are dropped from the round
    /// but their reasoning is salvaged for the refinement window whenever
    /// the reply at least decoded.
    fn parse_round(&self, outcome: &RoundOutcome) -> (Vec<Action>, Vec<ResponseRecord>) {
        let opts = ParseOptions {
            bug_report_log: self.config.bug_report_log.clone(),
        };
        let mut actions = Vec::new();
        let mut records = Vec::new();

        for reply in &outcome.successful {
            match parser::parse_reply(&reply.text, &opts) {
                Ok(action) => {
                    records.push(ResponseRecord::from_action(&action));
                    actions.push(action);
                }
                Err(e) => {
                    warn!(model = %reply.model, error = %e, "dropping unparseable reply");
                    if let Ok(map) = parser::decode_reply(&reply.text) {
                        records.push(salvaged_record(&map));
                    }
                }
            }
        }
        (actions, records)
    }

    /// Merge the best-ranked cluster under the tie-breaker, skipping any
    /// cluster that fails to merge, in comparator order.
    fn merge_best(
        &self,
        clusters: &[Cluster],
        skip: Option<&crate::fingerprint::Fingerprint>,
        mut acc: CostAccumulator,
    ) -> (Option<(Action, usize)>, CostAccumulator) {
        let mut ordered: Vec<&Cluster> = clusters
            .iter()
            .filter(|c| skip.map_or(true, |fp| &c.fingerprint != fp))
            .collect();
        ordered.sort_by(|a, b| tiebreak::compare(a, b));

        for cluster in ordered {
            let (result, next) = self.merger.merge_cluster(cluster, acc);
            acc = next;
            match result {
                Ok(action) => return (Some((action, cluster.count())), acc),
                Err(e) => {
                    warn!(error = %e, "cluster failed to merge, trying next-best");
                }
            }
        }
        (None, acc)
    }

    /// Finish the run: default the wait posture, flush costs once, publish
    /// the decision event, and assemble the outcome.
    async fn emit(
        &self,
        status: ConsensusStatus,
        mut action: Action,
        confidence: f64,
        round: u32,
        acc: CostAccumulator,
        mut phases: Vec<(u32, RunnerPhase)>,
    ) -> ConsensusOutcome {
        self.enter_phase(&mut phases, round, RunnerPhase::Emitting);

        // The external agent loop stalls on an absent wait.
        action.wait.get_or_insert(WaitPosture::No);

        self.flush(&acc).await;

        let event = match status {
            ConsensusStatus::Consensus => RuntimeEvent::ConsensusReached {
                agent_id: self.config.agent_id.clone(),
                task_id: self.config.task_id.clone(),
                action_type: action.action_type.to_string(),
                confidence,
                round,
                timestamp: Utc::now(),
            },
            ConsensusStatus::ForcedDecision => RuntimeEvent::DecisionForced {
                agent_id: self.config.agent_id.clone(),
                task_id: self.config.task_id.clone(),
                action_type: action.action_type.to_string(),
                confidence,
                round,
                timestamp: Utc::now(),
            },
        };
        self.publish(event);

        info!(
            status = %status,
            action = %action.action_type,
            confidence,
            round,
            entries = acc.len(),
            "consensus run complete"
        );

        ConsensusOutcome {
            status,
            action,
            confidence,
            rounds: round,
            accumulator: acc,
            phases,
        }
    }

    /// Error exit that still flushes whatever costs were incurred.
    async fn bail(&self, acc: CostAccumulator) -> RunnerResult<ConsensusOutcome> {
        self.flush(&acc).await;
        Err(RunnerError::NoViableAction)
    }

    async fn flush(&self, acc: &CostAccumulator) {
        if let Some(recorder) = &self.recorder {
            let report = recorder.flush(acc).await;
            if report.failed > 0 {
                warn!(failed = report.failed, "some cost entries were not persisted");
            }
        }
    }

    fn enter_phase(&self, phases: &mut Vec<(u32, RunnerPhase)>, round: u32, phase: RunnerPhase) {
        debug!(round, phase = %phase, "phase transition");
        phases.push((round, phase));
    }

    fn publish(&self, event: RuntimeEvent) {
        if let Some(bus) = &self.bus {
            bus.publish(&task_events_topic(&self.config.task_id), event);
        }
    }
}

/// Build a window record from a reply that decoded but failed validation:
/// the action name and params are kept as-is, missing pieces stored as
/// `None`/empty rather than dropping the record.
fn salvaged_record(map: &Map<String, Value>) -> ResponseRecord {
    ResponseRecord {
        action: map
            .get("action")
            .and_then(Value::as_str)
            .map(str::to_string),
        params: match map.get("params") {
            Some(Value::Object(params)) => params.clone(),
            _ => Map::new(),
        },
        reasoning: map
            .get("reasoning")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string(),
    }
}
