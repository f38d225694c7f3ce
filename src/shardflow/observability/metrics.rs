//! Metrics sinks for harness diagnostics
//!
//! Sinks are fire-and-forget: every call is synchronous, infallible from the
//! caller's view, and must never block record processing. The Prometheus
//! sink is the production implementation; the no-op sink is the default and
//! what most tests use.

use crate::shardflow::stream::{SequenceNumber, ShardId};
use prometheus::{
    register_histogram_with_registry, register_int_counter_vec_with_registry, Encoder, Histogram,
    IntCounterVec, Registry, TextEncoder,
};
use std::time::Duration;

/// Per-event diagnostics receiver
pub trait MetricsSink: Send + Sync + 'static {
    /// A batch of `records` closed and committed for `shard` after `latency`
    /// from batch open
    fn record_batch(&self, shard_id: &ShardId, records: usize, latency: Duration);

    /// A checkpoint position was committed for `shard`
    fn record_checkpoint(&self, shard_id: &ShardId, sequence: SequenceNumber);

    /// The shard's lease was revoked
    fn record_lease_lost(&self, shard_id: &ShardId);

    /// The shard's processing terminated with a fatal error
    fn record_shard_failure(&self, shard_id: &ShardId);
}

/// Sink that drops every event
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopMetricsSink;

impl MetricsSink for NoopMetricsSink {
    fn record_batch(&self, _shard_id: &ShardId, _records: usize, _latency: Duration) {}
    fn record_checkpoint(&self, _shard_id: &ShardId, _sequence: SequenceNumber) {}
    fn record_lease_lost(&self, _shard_id: &ShardId) {}
    fn record_shard_failure(&self, _shard_id: &ShardId) {}
}

/// Prometheus-backed metrics sink
#[derive(Debug)]
pub struct PrometheusMetricsSink {
    registry: Registry,
    records_total: IntCounterVec,
    batches_total: IntCounterVec,
    checkpoints_total: IntCounterVec,
    lease_losses_total: IntCounterVec,
    shard_failures_total: IntCounterVec,
    batch_latency_seconds: Histogram,
}

impl PrometheusMetricsSink {
    pub fn new() -> Result<Self, prometheus::Error> {
        let registry = Registry::new();
        let records_total = register_int_counter_vec_with_registry!(
            "shardflow_records_total",
            "Records processed per shard",
            &["shard"],
            registry
        )?;
        let batches_total = register_int_counter_vec_with_registry!(
            "shardflow_batches_total",
            "Batches committed per shard",
            &["shard"],
            registry
        )?;
        let checkpoints_total = register_int_counter_vec_with_registry!(
            "shardflow_checkpoints_total",
            "Checkpoint commits per shard",
            &["shard"],
            registry
        )?;
        let lease_losses_total = register_int_counter_vec_with_registry!(
            "shardflow_lease_losses_total",
            "Lease revocations observed per shard",
            &["shard"],
            registry
        )?;
        let shard_failures_total = register_int_counter_vec_with_registry!(
            "shardflow_shard_failures_total",
            "Fatal per-shard processing failures",
            &["shard"],
            registry
        )?;
        let batch_latency_seconds = register_histogram_with_registry!(
            "shardflow_batch_latency_seconds",
            "Time from batch open to commit",
            vec![0.001, 0.01, 0.05, 0.1, 0.5, 1.0, 5.0, 10.0],
            registry
        )?;

        Ok(Self {
            registry,
            records_total,
            batches_total,
            checkpoints_total,
            lease_losses_total,
            shard_failures_total,
            batch_latency_seconds,
        })
    }

    /// Render the registry in the Prometheus text exposition format
    pub fn export(&self) -> Result<String, prometheus::Error> {
        let encoder = TextEncoder::new();
        let mut buffer = Vec::new();
        encoder.encode(&self.registry.gather(), &mut buffer)?;
        Ok(String::from_utf8_lossy(&buffer).into_owned())
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }
}

impl MetricsSink for PrometheusMetricsSink {
    fn record_batch(&self, shard_id: &ShardId, records: usize, latency: Duration) {
        self.records_total
            .with_label_values(&[shard_id.as_str()])
            .inc_by(records as u64);
        self.batches_total
            .with_label_values(&[shard_id.as_str()])
            .inc();
        self.batch_latency_seconds.observe(latency.as_secs_f64());
    }

    fn record_checkpoint(&self, shard_id: &ShardId, _sequence: SequenceNumber) {
        self.checkpoints_total
            .with_label_values(&[shard_id.as_str()])
            .inc();
    }

    fn record_lease_lost(&self, shard_id: &ShardId) {
        self.lease_losses_total
            .with_label_values(&[shard_id.as_str()])
            .inc();
    }

    fn record_shard_failure(&self, shard_id: &ShardId) {
        self.shard_failures_total
            .with_label_values(&[shard_id.as_str()])
            .inc();
    }
}
