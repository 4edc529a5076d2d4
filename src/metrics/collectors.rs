//! Metric recording facade for the pipeline.
//!
//! The `MetricsCollector` struct wraps the raw Prometheus metrics and
//! provides one method per event the pollers and schedulers report.
//! Recording before `init_metrics()` is a silent no-op.

use crate::pipeline::Stage;

use super::prometheus::{
    DECODE_ERRORS_TOTAL, DISPATCH_TOTAL, EXECUTION_SECONDS, IN_FLIGHT, POLL_ERRORS_TOTAL,
    POLL_ROWS_TOTAL,
};

/// Metrics collector for recording pipeline operational metrics.
///
/// # Example
///
/// ```ignore
/// use milestone_flow::metrics::{init_metrics, MetricsCollector};
/// use milestone_flow::pipeline::Stage;
///
/// init_metrics().expect("Failed to init metrics");
/// let collector = MetricsCollector::new();
///
/// collector.record_poll(Stage::Ingest, 12);
/// collector.record_dispatch(Stage::Ingest, "completed");
/// collector.record_execution(Stage::Ingest, 1.4);
/// ```
#[derive(Debug, Clone, Default)]
pub struct MetricsCollector;

impl MetricsCollector {
    pub fn new() -> Self {
        Self
    }

    /// Record a successful polling query and the number of rows it returned.
    pub fn record_poll(&self, stage: Stage, rows: usize) {
        if let Some(poll_rows) = POLL_ROWS_TOTAL.get() {
            poll_rows
                .with_label_values(&[stage.as_str()])
                .inc_by(rows as f64);
        }

        tracing::trace!(stage = %stage, rows = rows, "Recorded poll metric");
    }

    /// Record a failed or timed-out polling query.
    pub fn record_poll_error(&self, stage: Stage) {
        if let Some(poll_errors) = POLL_ERRORS_TOTAL.get() {
            poll_errors.with_label_values(&[stage.as_str()]).inc();
        }
    }

    /// Record a polled row that was skipped because it could not be decoded.
    pub fn record_decode_error(&self, stage: Stage) {
        if let Some(decode_errors) = DECODE_ERRORS_TOTAL.get() {
            decode_errors.with_label_values(&[stage.as_str()]).inc();
        }
    }

    /// Record the terminal outcome of one dispatch.
    ///
    /// # Arguments
    ///
    /// * `stage` - Stage the dispatch ran for
    /// * `outcome` - Outcome label (e.g., "completed", "failed", "claim_lost")
    pub fn record_dispatch(&self, stage: Stage, outcome: &str) {
        if let Some(dispatch_total) = DISPATCH_TOTAL.get() {
            dispatch_total
                .with_label_values(&[stage.as_str(), outcome])
                .inc();
        }

        tracing::trace!(stage = %stage, outcome = outcome, "Recorded dispatch metric");
    }

    /// Record the duration of a dispatch whose stage work actually ran.
    pub fn record_execution(&self, stage: Stage, duration_secs: f64) {
        if let Some(execution_seconds) = EXECUTION_SECONDS.get() {
            execution_seconds
                .with_label_values(&[stage.as_str()])
                .observe(duration_secs);
        }
    }

    /// Increment the in-flight gauge for a stage by 1.
    pub fn inc_in_flight(&self, stage: Stage) {
        if let Some(in_flight) = IN_FLIGHT.get() {
            in_flight.with_label_values(&[stage.as_str()]).inc();
        }
    }

    /// Decrement the in-flight gauge for a stage by 1.
    pub fn dec_in_flight(&self, stage: Stage) {
        if let Some(in_flight) = IN_FLIGHT.get() {
            in_flight.with_label_values(&[stage.as_str()]).dec();
        }
    }
}
