//! Per-stage discovery loop.
//!
//! Each cycle sleeps the poll interval, runs the stage's eligibility query
//! against the next read replica, decodes the rows and publishes them on a
//! bounded queue. Replica reads may be stale; the claim re-checks
//! eligibility on the primary, so a falsely surfaced milestone just loses
//! its claim.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::metrics::MetricsCollector;
use crate::milestone::{FromRowValues, Milestone};
use crate::pipeline::{EligibilityQuery, PipelineConfig, Stage};
use crate::storage::{MilestoneStore, StoreError};

/// Polls the store for milestones eligible for one stage.
pub struct Poller {
    query: EligibilityQuery,
    store: Arc<dyn MilestoneStore>,
    poll_interval: Duration,
    poll_timeout: Duration,
    metrics: MetricsCollector,
}

impl Poller {
    pub fn new(
        query: EligibilityQuery,
        store: Arc<dyn MilestoneStore>,
        config: &PipelineConfig,
    ) -> Self {
        Self {
            query,
            store,
            poll_interval: config.poll_interval,
            poll_timeout: config.poll_timeout,
            metrics: MetricsCollector::new(),
        }
    }

    pub fn stage(&self) -> Stage {
        self.query.stage()
    }

    /// Spawns the loop and returns the receiving end of its queue.
    ///
    /// The queue closes once `cancel` fires and the current cycle is done.
    pub fn spawn(
        self,
        capacity: usize,
        cancel: CancellationToken,
    ) -> (JoinHandle<()>, mpsc::Receiver<Milestone>) {
        let (tx, rx) = mpsc::channel(capacity);
        let handle = tokio::spawn(self.run(tx, cancel));
        (handle, rx)
    }

    /// Runs until `cancel` fires or the receiver is dropped.
    pub async fn run(self, tx: mpsc::Sender<Milestone>, cancel: CancellationToken) {
        let stage = self.stage();
        info!(stage = %stage, interval = ?self.poll_interval, "Poller started");

        'cycles: loop {
            if !sleep_unless_cancelled(self.poll_interval, &cancel).await {
                break;
            }

            match self.poll_once().await {
                Ok(batch) => {
                    if !batch.is_empty() {
                        debug!(stage = %stage, rows = batch.len(), "Publishing eligible milestones");
                    }
                    for milestone in batch {
                        if tx.send(milestone).await.is_err() {
                            warn!(stage = %stage, "Work queue receiver dropped");
                            break 'cycles;
                        }
                    }
                }
                Err(StoreError::Timeout(limit)) => {
                    self.metrics.record_poll_error(stage);
                    warn!(stage = %stage, timeout = ?limit, "Poll timed out, backing off");
                    if !sleep_unless_cancelled(self.poll_interval, &cancel).await {
                        break;
                    }
                }
                Err(e) => {
                    self.metrics.record_poll_error(stage);
                    error!(stage = %stage, error = %e, "Poll failed");
                }
            }
        }

        info!(stage = %stage, "Poller stopped, closing work queue");
    }

    /// Runs one eligibility query and decodes the result.
    ///
    /// Rows that fail to decode are logged and skipped.
    pub async fn poll_once(&self) -> Result<Vec<Milestone>, StoreError> {
        let stage = self.stage();
        let rows = tokio::time::timeout(self.poll_timeout, self.store.eligible_rows(&self.query))
            .await
            .map_err(|_| StoreError::Timeout(self.poll_timeout))??;

        self.metrics.record_poll(stage, rows.len());

        let mut batch = Vec::with_capacity(rows.len());
        for row in rows {
            match Milestone::from_row_values(&row) {
                Ok(milestone) => batch.push(milestone),
                Err(e) => {
                    self.metrics.record_decode_error(stage);
                    warn!(stage = %stage, error = %e, "Skipping undecodable row");
                }
            }
        }
        Ok(batch)
    }
}

/// Returns false if cancelled before the sleep finished.
async fn sleep_unless_cancelled(duration: Duration, cancel: &CancellationToken) -> bool {
    tokio::select! {
        _ = cancel.cancelled() => false,
        _ = tokio::time::sleep(duration) => true,
    }
}
