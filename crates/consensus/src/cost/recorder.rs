//! Cost recorder — flushes a run's accumulator to the store and publishes
//! one event per entry on the per-task and per-agent cost topics.
//!
//! Flushing is best-effort end to end: a failed insert is logged and
//! skipped, a missing subscriber is not an error, and nothing here can
//! mask the consensus result the caller is about to return.

use std::sync::Arc;

use tracing::{debug, warn};

use crate::events::{agent_costs_topic, task_costs_topic, RuntimeEvent, SharedEventBus};

use super::{CostAccumulator, CostEntry, CostStore};

/// Outcome of one flush, for observability only.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FlushReport {
    /// Entries written to the store.
    pub recorded: usize,
    /// Events published (two per recorded entry when a bus is attached).
    pub published: usize,
    /// Entries that failed to persist.
    pub failed: usize,
}

/// Writes accumulated cost entries and announces them.
pub struct CostRecorder {
    store: Arc<dyn CostStore>,
    bus: Option<SharedEventBus>,
}

impl CostRecorder {
    pub fn new(store: Arc<dyn CostStore>) -> Self {
        Self { store, bus: None }
    }

    pub fn with_bus(mut self, bus: SharedEventBus) -> Self {
        self.bus = Some(bus);
        self
    }

    /// Flush every entry in the accumulator.
    ///
    /// Store writes are independent per entry; a broadcast problem never
    /// rolls back an insert, and an insert problem only skips that entry's
    /// events.
    pub async fn flush(&self, acc: &CostAccumulator) -> FlushReport {
        let mut report = FlushReport::default();
        for entry in acc.entries() {
            match self.store.insert(entry).await {
                Ok(()) => {
                    report.recorded += 1;
                    report.published += self.announce(entry);
                }
                Err(e) => {
                    warn!(
                        entry_id = %entry.id,
                        cost_type = %entry.cost_type,
                        error = %e,
                        "failed to persist cost entry"
                    );
                    report.failed += 1;
                }
            }
        }
        debug!(
            recorded = report.recorded,
            published = report.published,
            failed = report.failed,
            "cost flush complete"
        );
        report
    }

    fn announce(&self, entry: &CostEntry) -> usize {
        let Some(bus) = &self.bus else { return 0 };
        let event = RuntimeEvent::CostRecorded {
            id: entry.id,
            agent_id: entry.agent_id.clone(),
            task_id: entry.task_id.clone(),
            cost_type: entry.cost_type,
            cost_usd: entry.cost_usd,
            model_spec: entry.model_spec().map(str::to_string),
            timestamp: entry.recorded_at,
        };
        bus.publish(&task_costs_topic(&entry.task_id), event.clone());
        bus.publish(&agent_costs_topic(&entry.agent_id), event);
        2
    }
}
