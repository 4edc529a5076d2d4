//! Metrics module for Prometheus-based monitoring.
//!
//! Pollers and schedulers report through a [`MetricsCollector`]; the HTTP
//! server exposes the registry at `/metrics`.
//!
//! # Example
//!
//! ```ignore
//! use milestone_flow::metrics::{init_metrics, export_metrics, MetricsCollector};
//!
//! init_metrics().expect("Failed to initialize metrics");
//!
//! let collector = MetricsCollector::new();
//! collector.record_poll(Stage::Transcode, 4);
//!
//! let metrics_text = export_metrics();
//! ```

pub mod collectors;
pub mod prometheus;

pub use collectors::MetricsCollector;
pub use prometheus::{export_metrics, init_metrics, metrics_handler};

pub use prometheus::{
    DECODE_ERRORS_TOTAL, DISPATCH_TOTAL, EXECUTION_SECONDS, IN_FLIGHT, POLL_ERRORS_TOTAL,
    POLL_ROWS_TOTAL, REGISTRY,
};
