//! Dispatch loop for one stage.
//!
//! The scheduler drains its poller's queue and spawns one execution per
//! milestone. With `max_in_flight` set, a semaphore caps concurrent
//! executions and the drain loop waits for a permit; without it every
//! item is dispatched immediately.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::{mpsc, Semaphore};
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

use crate::metrics::MetricsCollector;
use crate::milestone::Milestone;
use crate::pipeline::{PipelineConfig, Stage, StageProcessor};

use super::outcome::DispatchOutcome;

/// Snapshot of one stage scheduler's counters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SchedulerStats {
    pub stage: Stage,
    /// Executions spawned.
    pub dispatched: u64,
    /// Executions currently running.
    pub in_flight: u64,
    pub completed: u64,
    pub claim_lost: u64,
    /// Execution failures, dead-lettered ones included.
    pub failed: u64,
    pub dead_lettered: u64,
    /// Claim or record attempts abandoned on infrastructure errors.
    pub errors: u64,
    /// Average duration of finished executions.
    pub average_duration: Duration,
}

impl SchedulerStats {
    /// Executions that reached a terminal outcome.
    pub fn total_finished(&self) -> u64 {
        self.completed + self.claim_lost + self.failed + self.errors
    }
}

/// Shared counters updated by dispatched executions.
#[derive(Debug, Default)]
pub(crate) struct SharedSchedulerStats {
    dispatched: AtomicU64,
    in_flight: AtomicU64,
    completed: AtomicU64,
    claim_lost: AtomicU64,
    failed: AtomicU64,
    dead_lettered: AtomicU64,
    errors: AtomicU64,
    total_duration_ms: AtomicU64,
}

impl SharedSchedulerStats {
    fn record_dispatch(&self) {
        self.dispatched.fetch_add(1, Ordering::SeqCst);
        self.in_flight.fetch_add(1, Ordering::SeqCst);
    }

    fn record_outcome(&self, outcome: &DispatchOutcome, duration: Duration) {
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        self.total_duration_ms
            .fetch_add(duration.as_millis() as u64, Ordering::SeqCst);

        let counter = match outcome {
            DispatchOutcome::Completed => &self.completed,
            DispatchOutcome::ClaimLost => &self.claim_lost,
            DispatchOutcome::ExecutionFailed { dead_lettered, .. } => {
                if *dead_lettered {
                    self.dead_lettered.fetch_add(1, Ordering::SeqCst);
                }
                &self.failed
            }
            DispatchOutcome::InfrastructureError(_) => &self.errors,
        };
        counter.fetch_add(1, Ordering::SeqCst);
    }

    fn snapshot(&self, stage: Stage) -> SchedulerStats {
        let mut stats = SchedulerStats {
            stage,
            dispatched: self.dispatched.load(Ordering::SeqCst),
            in_flight: self.in_flight.load(Ordering::SeqCst),
            completed: self.completed.load(Ordering::SeqCst),
            claim_lost: self.claim_lost.load(Ordering::SeqCst),
            failed: self.failed.load(Ordering::SeqCst),
            dead_lettered: self.dead_lettered.load(Ordering::SeqCst),
            errors: self.errors.load(Ordering::SeqCst),
            average_duration: Duration::ZERO,
        };

        let finished = stats.total_finished();
        if finished > 0 {
            stats.average_duration =
                Duration::from_millis(self.total_duration_ms.load(Ordering::SeqCst) / finished);
        }
        stats
    }
}

/// Fans out one execution per queued milestone for a single stage.
pub struct StageScheduler {
    processor: Arc<StageProcessor>,
    limit: Option<Arc<Semaphore>>,
    stats: Arc<SharedSchedulerStats>,
    metrics: MetricsCollector,
}

impl StageScheduler {
    pub fn new(processor: Arc<StageProcessor>, config: &PipelineConfig) -> Self {
        Self {
            processor,
            limit: config
                .max_in_flight
                .map(|permits| Arc::new(Semaphore::new(permits))),
            stats: Arc::new(SharedSchedulerStats::default()),
            metrics: MetricsCollector::new(),
        }
    }

    pub fn stage(&self) -> Stage {
        self.processor.stage()
    }

    pub fn processor(&self) -> &Arc<StageProcessor> {
        &self.processor
    }

    pub fn stats(&self) -> SchedulerStats {
        self.stats.snapshot(self.stage())
    }

    /// Drains `queue` until it closes, then waits for every in-flight
    /// execution to finish.
    pub async fn run(&self, mut queue: mpsc::Receiver<Milestone>) {
        let stage = self.stage();
        let mut in_flight = JoinSet::new();
        info!(stage = %stage, limit = ?self.limit.as_ref().map(|s| s.available_permits()), "Scheduler started");

        while let Some(milestone) = queue.recv().await {
            let permit = match &self.limit {
                Some(semaphore) => match Arc::clone(semaphore).acquire_owned().await {
                    Ok(permit) => Some(permit),
                    Err(_) => break,
                },
                None => None,
            };

            while let Some(joined) = in_flight.try_join_next() {
                log_join_error(stage, joined);
            }

            let processor = Arc::clone(&self.processor);
            let stats = Arc::clone(&self.stats);
            let metrics = self.metrics.clone();
            in_flight.spawn(async move {
                let _permit = permit;
                dispatch(&processor, milestone, &stats, &metrics).await
            });
        }

        if !in_flight.is_empty() {
            info!(
                stage = %stage,
                in_flight = in_flight.len(),
                "Work queue closed, waiting for in-flight executions"
            );
        }
        while let Some(joined) = in_flight.join_next().await {
            log_join_error(stage, joined);
        }

        info!(stage = %stage, "Scheduler stopped");
    }
}

/// Runs the full lifecycle for one milestone and logs its outcome.
async fn dispatch(
    processor: &StageProcessor,
    milestone: Milestone,
    stats: &SharedSchedulerStats,
    metrics: &MetricsCollector,
) -> DispatchOutcome {
    let stage = processor.stage();
    let milestone_id = milestone.id.clone();
    let started = Instant::now();

    stats.record_dispatch();
    metrics.inc_in_flight(stage);

    let outcome = DispatchOutcome::from(processor.process(milestone).await);
    let duration = started.elapsed();

    metrics.dec_in_flight(stage);
    metrics.record_dispatch(stage, outcome.label());
    if outcome.executed() {
        metrics.record_execution(stage, duration.as_secs_f64());
    }
    stats.record_outcome(&outcome, duration);

    match &outcome {
        DispatchOutcome::Completed => {
            info!(stage = %stage, milestone_id = %milestone_id, duration_ms = duration.as_millis(), "Stage completed");
        }
        DispatchOutcome::ClaimLost => {
            debug!(stage = %stage, milestone_id = %milestone_id, "Claim lost");
        }
        DispatchOutcome::ExecutionFailed { error, .. } => {
            warn!(stage = %stage, milestone_id = %milestone_id, error = %error, "Stage execution failed");
        }
        DispatchOutcome::InfrastructureError(error) => {
            error!(stage = %stage, milestone_id = %milestone_id, error = %error, "Attempt abandoned");
        }
    }

    outcome
}

fn log_join_error(stage: Stage, joined: Result<DispatchOutcome, tokio::task::JoinError>) {
    if let Err(e) = joined {
        error!(stage = %stage, error = %e, "Dispatched execution panicked");
    }
}
