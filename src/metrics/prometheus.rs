//! Prometheus metrics registration and export.
//!
//! This module defines all Prometheus metrics used by milestone_flow and
//! provides functions for initializing, registering, and exporting them.
//! Every metric is labeled by `stage`.

use prometheus::{CounterVec, Encoder, GaugeVec, HistogramOpts, HistogramVec, Opts, Registry, TextEncoder};
use std::sync::OnceLock;

/// Global Prometheus registry for all milestone_flow metrics.
pub static REGISTRY: OnceLock<Registry> = OnceLock::new();

/// Terminal dispatch outcomes, labeled by stage and outcome.
pub static DISPATCH_TOTAL: OnceLock<CounterVec> = OnceLock::new();

/// Rows returned by polling queries.
pub static POLL_ROWS_TOTAL: OnceLock<CounterVec> = OnceLock::new();

/// Polling queries that failed or timed out.
pub static POLL_ERRORS_TOTAL: OnceLock<CounterVec> = OnceLock::new();

/// Polled rows skipped because they could not be decoded.
pub static DECODE_ERRORS_TOTAL: OnceLock<CounterVec> = OnceLock::new();

/// Dispatches currently running.
pub static IN_FLIGHT: OnceLock<GaugeVec> = OnceLock::new();

/// Wall-clock duration of stage work.
pub static EXECUTION_SECONDS: OnceLock<HistogramVec> = OnceLock::new();

/// Initialize all metrics and register them with the registry.
///
/// Call once at startup. Later calls build a fresh registry but leave the
/// already-published statics in place.
///
/// # Errors
///
/// Returns a `prometheus::Error` if metric registration fails, typically due
/// to duplicate metric names.
pub fn init_metrics() -> Result<(), prometheus::Error> {
    let registry = Registry::new();

    let dispatch_total = CounterVec::new(
        Opts::new(
            "milestone_flow_dispatch_total",
            "Dispatched stage executions by outcome",
        ),
        &["stage", "outcome"],
    )?;

    let poll_rows_total = CounterVec::new(
        Opts::new(
            "milestone_flow_poll_rows_total",
            "Eligible rows returned by polling queries",
        ),
        &["stage"],
    )?;

    let poll_errors_total = CounterVec::new(
        Opts::new(
            "milestone_flow_poll_errors_total",
            "Polling queries that failed or timed out",
        ),
        &["stage"],
    )?;

    let decode_errors_total = CounterVec::new(
        Opts::new(
            "milestone_flow_decode_errors_total",
            "Polled rows skipped because they could not be decoded",
        ),
        &["stage"],
    )?;

    let in_flight = GaugeVec::new(
        Opts::new("milestone_flow_in_flight", "Stage executions currently running"),
        &["stage"],
    )?;

    let execution_seconds = HistogramVec::new(
        HistogramOpts::new(
            "milestone_flow_execution_seconds",
            "Duration of dispatches that ran stage work, claim and record included",
        )
        .buckets(vec![0.1, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0, 60.0]),
        &["stage"],
    )?;

    registry.register(Box::new(dispatch_total.clone()))?;
    registry.register(Box::new(poll_rows_total.clone()))?;
    registry.register(Box::new(poll_errors_total.clone()))?;
    registry.register(Box::new(decode_errors_total.clone()))?;
    registry.register(Box::new(in_flight.clone()))?;
    registry.register(Box::new(execution_seconds.clone()))?;

    // Already-set statics mean a previous call won; keep its handles.
    let _ = REGISTRY.set(registry);
    let _ = DISPATCH_TOTAL.set(dispatch_total);
    let _ = POLL_ROWS_TOTAL.set(poll_rows_total);
    let _ = POLL_ERRORS_TOTAL.set(poll_errors_total);
    let _ = DECODE_ERRORS_TOTAL.set(decode_errors_total);
    let _ = IN_FLIGHT.set(in_flight);
    let _ = EXECUTION_SECONDS.set(execution_seconds);

    tracing::info!("Prometheus metrics initialized successfully");

    Ok(())
}

/// Export all registered metrics in Prometheus text format.
///
/// Returns a comment line instead of failing when the registry has not been
/// initialized or encoding fails.
pub fn export_metrics() -> String {
    let Some(registry) = REGISTRY.get() else {
        return "# Metrics not initialized. Call init_metrics() first.\n".to_string();
    };

    let encoder = TextEncoder::new();
    let metric_families = registry.gather();

    let mut buffer = Vec::new();
    if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
        return format!("# Error encoding metrics: {}\n", e);
    }

    String::from_utf8(buffer)
        .unwrap_or_else(|e| format!("# Error converting metrics to UTF-8: {}\n", e))
}

/// HTTP handler for the /metrics endpoint.
pub async fn metrics_handler() -> String {
    export_metrics()
}
