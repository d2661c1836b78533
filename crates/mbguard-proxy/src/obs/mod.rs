//! Lightweight in-process metrics.
//!
//! Counters are atomics keyed by label sets. They are rendered in Prometheus
//! text format and as a JSON stats snapshot for external polling.

pub mod metrics;

pub use metrics::{ProxyMetrics, StatsSnapshot};
