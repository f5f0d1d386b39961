//! Metrics for the prediction engine
//!
//! `Metrics` implements `MetricsSink`, turning engine events into Prometheus
//! counters, gauges and histograms. Nothing is served here; callers render the
//! registry in text format and ship it wherever they like.

pub mod metrics;

pub use metrics::Metrics;
