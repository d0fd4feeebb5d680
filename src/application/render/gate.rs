use std::{
    sync::Mutex,
    time::{Duration, Instant},
};

use metrics::histogram;
use serde::Serialize;
use tracing::{error, info};

use crate::cache::lock::mutex_lock;
use crate::domain::{error::JobError, types::DocumentId};

use super::runtime::DocumentRegistry;

const SOURCE: &str = "application::render::gate";
const METRIC_BATCH_MS: &str = "mathmark_render_batch_ms";

/// Outcome counts for one finished batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct BatchSummary {
    pub total: usize,
    pub succeeded: usize,
    pub failed: usize,
    #[serde(serialize_with = "serialize_millis")]
    pub elapsed: Duration,
}

fn serialize_millis<S: serde::Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_u64(value.as_millis() as u64)
}

/// What a single `arrive` call did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Arrival {
    Counted,
    Completed,
    /// More arrivals than jobs; the call was ignored.
    Overflow,
}

type Completion = Box<dyn FnOnce(BatchSummary) + Send>;

struct GateState {
    arrived: usize,
    failed: usize,
    on_complete: Option<Completion>,
}

/// Counts job results for one batch and fires its callback exactly once,
/// after the last result has been recorded.
pub struct CompletionGate {
    document: DocumentId,
    registry: DocumentRegistry,
    total: usize,
    started_at: Instant,
    state: Mutex<GateState>,
}

impl CompletionGate {
    /// Build a gate expecting `total` arrivals. An empty batch completes
    /// before this returns.
    pub fn new<F>(
        document: DocumentId,
        registry: DocumentRegistry,
        total: usize,
        on_complete: F,
    ) -> Self
    where
        F: FnOnce(BatchSummary) + Send + 'static,
    {
        let gate = Self {
            document,
            registry,
            total,
            started_at: Instant::now(),
            state: Mutex::new(GateState {
                arrived: 0,
                failed: 0,
                on_complete: Some(Box::new(on_complete)),
            }),
        };

        if total == 0 {
            let mut state = mutex_lock(&gate.state, SOURCE, "new");
            gate.complete(&mut state);
        }
        gate
    }

    pub fn total(&self) -> usize {
        self.total
    }

    pub fn arrived(&self) -> usize {
        mutex_lock(&self.state, SOURCE, "arrived").arrived
    }

    /// Record one job's outcome against `location` and count it.
    pub fn arrive(&self, location: &str, outcome: Option<JobError>) -> Arrival {
        let mut state = mutex_lock(&self.state, SOURCE, "arrive");
        if state.arrived >= self.total {
            error!(
                target = "application::render::gate",
                op = "arrive",
                result = "overflow",
                document = %self.document,
                location,
                total = self.total,
                "Completion gate received more arrivals than jobs"
            );
            return Arrival::Overflow;
        }

        if outcome.is_some() {
            state.failed += 1;
        }
        self.registry.record(self.document, location, outcome);
        state.arrived += 1;

        if state.arrived == self.total {
            self.complete(&mut state);
            Arrival::Completed
        } else {
            Arrival::Counted
        }
    }

    fn complete(&self, state: &mut GateState) {
        let Some(on_complete) = state.on_complete.take() else {
            return;
        };
        let summary = BatchSummary {
            total: self.total,
            succeeded: state.arrived - state.failed,
            failed: state.failed,
            elapsed: self.started_at.elapsed(),
        };
        histogram!(METRIC_BATCH_MS).record(summary.elapsed.as_secs_f64() * 1000.0);
        info!(
            target = "application::render::gate",
            op = "complete",
            result = if summary.failed == 0 { "ok" } else { "partial" },
            document = %self.document,
            total = summary.total,
            failed = summary.failed,
            elapsed_ms = summary.elapsed.as_millis() as u64,
            "Render batch completed"
        );
        on_complete(summary);
    }
}
