//! Observability for the consumption harness

pub mod metrics;

pub use metrics::{MetricsSink, NoopMetricsSink, PrometheusMetricsSink};
