//! Worker: concurrent shard fan-out under one consumer identity
//!
//! A worker subscribes to the shards assigned to its identity and runs one
//! shard processor per shard, one task each with no concurrency cap, so a
//! slow shard never blocks a fast one. Per-shard failures are isolated:
//! they land in the worker's stats and, only when fail-fast is enabled,
//! become the worker's own error after the remaining shards have drained.

pub mod shutdown;

pub use shutdown::{ShutdownSignal, ShutdownWatch};

use crate::shardflow::checkpoint::CheckpointStore;
use crate::shardflow::observability::{MetricsSink, NoopMetricsSink};
use crate::shardflow::processor::{
    noop_hook, BatchSummary, BatchingPolicy, RecordHook, ShardError, ShardOutcome, ShardProcessor,
};
use crate::shardflow::stream::{DeliveryMode, RecordStreamSource, ShardId, StreamPosition};
use log::{info, warn};
use serde::Serialize;
use std::collections::HashMap;
use std::error::Error;
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tokio::task::JoinSet;

/// How one shard's processing ended, as seen by its worker
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum ShardTermination {
    Completed,
    LeaseLost,
    Interrupted,
    Failed { cause: String },
}

/// Aggregate result of one worker's run
#[derive(Debug, Clone, Default, Serialize)]
pub struct WorkerStats {
    pub worker_id: String,
    pub records_processed: u64,
    pub records_failed: u64,
    pub batches_committed: u64,
    /// Terminal state per shard this worker ran
    pub shards: HashMap<ShardId, ShardTermination>,
    pub elapsed: Duration,
}

impl WorkerStats {
    pub fn records_per_second(&self) -> f64 {
        let secs = self.elapsed.as_secs_f64();
        if secs > 0.0 {
            self.records_processed as f64 / secs
        } else {
            0.0
        }
    }
}

/// Worker-level failure
#[derive(Debug)]
pub struct WorkerError {
    pub worker_id: String,
    pub kind: WorkerErrorKind,
}

#[derive(Debug)]
pub enum WorkerErrorKind {
    /// Shard discovery failed before any processor started
    Subscribe { message: String },
    /// First fatal shard error, surfaced because fail-fast is enabled
    Shard(ShardError),
}

impl fmt::Display for WorkerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.kind {
            WorkerErrorKind::Subscribe { message } => {
                write!(f, "Worker '{}' failed to subscribe: {}", self.worker_id, message)
            }
            WorkerErrorKind::Shard(err) => {
                write!(f, "Worker '{}' failed: {}", self.worker_id, err)
            }
        }
    }
}

impl Error for WorkerError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match &self.kind {
            WorkerErrorKind::Subscribe { .. } => None,
            WorkerErrorKind::Shard(err) => Some(err),
        }
    }
}

/// One logical consumer identity driving its assigned shards
pub struct Worker {
    id: String,
    index: usize,
    worker_count: usize,
    policy: BatchingPolicy,
    delivery: DeliveryMode,
    fail_fast: bool,
    source: Arc<dyn RecordStreamSource>,
    store: Arc<dyn CheckpointStore>,
    metrics: Arc<dyn MetricsSink>,
    hook: RecordHook,
    observer: Option<mpsc::UnboundedSender<BatchSummary>>,
    shutdown: ShutdownSignal,
}

impl Worker {
    /// Create worker `index` of `worker_count`. Shard assignment is the
    /// index-modulo slice of the stream's shard list, standing in for the
    /// external lease allocator.
    pub fn new(
        index: usize,
        worker_count: usize,
        source: Arc<dyn RecordStreamSource>,
        store: Arc<dyn CheckpointStore>,
    ) -> Self {
        Self {
            id: format!("worker-{}", index),
            index,
            worker_count: worker_count.max(1),
            policy: BatchingPolicy::default(),
            delivery: DeliveryMode::FanOut,
            fail_fast: false,
            source,
            store,
            metrics: Arc::new(NoopMetricsSink),
            hook: noop_hook(),
            observer: None,
            shutdown: ShutdownSignal::new(),
        }
    }

    pub fn with_policy(mut self, policy: BatchingPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn with_delivery(mut self, delivery: DeliveryMode) -> Self {
        self.delivery = delivery;
        self
    }

    /// Propagate the first fatal shard error as the worker's own failure
    pub fn with_fail_fast(mut self, fail_fast: bool) -> Self {
        self.fail_fast = fail_fast;
        self
    }

    pub fn with_metrics(mut self, metrics: Arc<dyn MetricsSink>) -> Self {
        self.metrics = metrics;
        self
    }

    pub fn with_hook(mut self, hook: RecordHook) -> Self {
        self.hook = hook;
        self
    }

    pub fn with_batch_observer(mut self, observer: mpsc::UnboundedSender<BatchSummary>) -> Self {
        self.observer = Some(observer);
        self
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    /// Handle for triggering this worker's shutdown externally
    pub fn shutdown_signal(&self) -> ShutdownSignal {
        self.shutdown.clone()
    }

    /// Run every assigned shard to a terminal state
    pub async fn run(self) -> Result<WorkerStats, WorkerError> {
        let started = Instant::now();
        let mut stats = WorkerStats {
            worker_id: self.id.clone(),
            ..Default::default()
        };

        let shards = self.source.list_shards().await.map_err(|err| WorkerError {
            worker_id: self.id.clone(),
            kind: WorkerErrorKind::Subscribe {
                message: err.to_string(),
            },
        })?;
        let assigned: Vec<ShardId> = shards
            .into_iter()
            .enumerate()
            .filter(|(i, _)| i % self.worker_count == self.index)
            .map(|(_, shard)| shard)
            .collect();

        info!(
            "Worker '{}' starting with {} assigned shard(s)",
            self.id,
            assigned.len()
        );

        let mut join_set: JoinSet<(ShardId, ShardOutcome)> = JoinSet::new();
        let mut first_fatal: Option<ShardError> = None;

        for shard_id in assigned {
            // A triggered shutdown stops new shard pick-up; in-flight
            // processors drain on their own.
            if self.shutdown.is_triggered() {
                info!(
                    "Worker '{}': shutdown triggered, not picking up shard '{}'",
                    self.id, shard_id
                );
                break;
            }

            let from = match self.store.get(&shard_id).await {
                Ok(Some(sequence)) => StreamPosition::After(sequence),
                Ok(None) => StreamPosition::TrimHorizon,
                Err(err) => {
                    warn!(
                        "Worker '{}': failed to read checkpoint for shard '{}': {}",
                        self.id, shard_id, err
                    );
                    self.metrics.record_shard_failure(&shard_id);
                    stats.shards.insert(
                        shard_id,
                        ShardTermination::Failed {
                            cause: err.to_string(),
                        },
                    );
                    if first_fatal.is_none() {
                        first_fatal = Some(ShardError::Checkpoint(err));
                    }
                    continue;
                }
            };

            let subscription = match self.source.subscribe(&shard_id, from, self.delivery).await {
                Ok(subscription) => subscription,
                Err(err) => {
                    warn!(
                        "Worker '{}': failed to subscribe to shard '{}': {}",
                        self.id, shard_id, err
                    );
                    self.metrics.record_shard_failure(&shard_id);
                    let cause = err.to_string();
                    if first_fatal.is_none() {
                        first_fatal = Some(ShardError::Stream {
                            shard_id: shard_id.clone(),
                            message: cause.clone(),
                        });
                    }
                    stats
                        .shards
                        .insert(shard_id, ShardTermination::Failed { cause });
                    continue;
                }
            };

            let mut processor = ShardProcessor::new(
                &self.id,
                shard_id.clone(),
                self.policy.clone(),
                Arc::clone(&self.store),
                self.shutdown.subscribe(),
            )
            .with_hook(Arc::clone(&self.hook))
            .with_metrics(Arc::clone(&self.metrics));
            if let Some(observer) = &self.observer {
                processor = processor.with_batch_observer(observer.clone());
            }

            join_set.spawn(async move { (shard_id, processor.run(subscription).await) });
        }

        while let Some(joined) = join_set.join_next().await {
            match joined {
                Ok((shard_id, outcome)) => {
                    let shard_stats = outcome.stats();
                    stats.records_processed += shard_stats.records_processed;
                    stats.records_failed += shard_stats.records_failed;
                    stats.batches_committed += shard_stats.batches_committed;

                    let termination = match outcome {
                        ShardOutcome::Completed(_) => ShardTermination::Completed,
                        ShardOutcome::LeaseLost(_) => ShardTermination::LeaseLost,
                        ShardOutcome::Interrupted(_) => ShardTermination::Interrupted,
                        ShardOutcome::Failed { error, .. } => {
                            let cause = error.to_string();
                            if first_fatal.is_none() {
                                first_fatal = Some(error);
                            }
                            if self.fail_fast {
                                // Drain the siblings at their next boundary
                                self.shutdown.trigger();
                            }
                            ShardTermination::Failed { cause }
                        }
                    };
                    stats.shards.insert(shard_id, termination);
                }
                Err(err) => {
                    warn!("Worker '{}': shard task ended abnormally: {}", self.id, err);
                }
            }
        }

        stats.elapsed = started.elapsed();
        info!(
            "Worker '{}' finished: {} records, {} batches across {} shard(s) in {:?}",
            self.id,
            stats.records_processed,
            stats.batches_committed,
            stats.shards.len(),
            stats.elapsed
        );

        if self.fail_fast {
            if let Some(error) = first_fatal {
                return Err(WorkerError {
                    worker_id: self.id,
                    kind: WorkerErrorKind::Shard(error),
                });
            }
        }
        Ok(stats)
    }
}
