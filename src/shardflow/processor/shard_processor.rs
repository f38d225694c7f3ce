//! Per-shard record processing
//!
//! A shard processor owns one shard's subscription and its checkpointer for
//! the lifetime of the lease. It pulls records in delivery order, stages each
//! one through the checkpointer after running the per-record hook, groups
//! staged records into batches under the size/time window, and commits one
//! checkpoint per closed batch.
//!
//! Terminal states are disjoint: a revoked lease ends the shard cleanly,
//! while stream and checkpoint failures are fatal for that shard and for
//! that shard only. The owning worker sees the outcome; sibling shards are
//! never disturbed.

use super::batch::{BatchBuffer, BatchCloseReason, BatchSummary, BatchingPolicy};
use crate::shardflow::checkpoint::{CheckpointError, CheckpointStore, ShardCheckpointer};
use crate::shardflow::observability::{MetricsSink, NoopMetricsSink};
use crate::shardflow::stream::{Record, RecordStream, ShardId};
use crate::shardflow::worker::shutdown::ShutdownWatch;
use futures::future::BoxFuture;
use futures::StreamExt;
use log::{error, info, warn};
use std::error::Error;
use std::fmt;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::time::{timeout_at, Instant};

/// Error returned by a per-record hook
pub type HookError = Box<dyn Error + Send + Sync>;

/// Caller-supplied per-record effect, run before the record is staged for
/// checkpointing. A failing hook leaves the record unstaged.
pub type RecordHook = Arc<dyn Fn(Record) -> BoxFuture<'static, Result<(), HookError>> + Send + Sync>;

/// Hook that accepts every record
pub fn noop_hook() -> RecordHook {
    Arc::new(|_| Box::pin(async { Ok(()) }))
}

/// Fatal per-shard error, distinct from a clean lease-lost termination
#[derive(Debug)]
pub enum ShardError {
    /// The shard's record stream failed
    Stream { shard_id: ShardId, message: String },
    /// A checkpoint commit was rejected by the store
    Checkpoint(CheckpointError),
}

impl fmt::Display for ShardError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ShardError::Stream { shard_id, message } => {
                write!(f, "Shard '{}' stream failure: {}", shard_id, message)
            }
            ShardError::Checkpoint(err) => write!(f, "{}", err),
        }
    }
}

impl Error for ShardError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            ShardError::Stream { .. } => None,
            ShardError::Checkpoint(err) => Some(err),
        }
    }
}

impl From<CheckpointError> for ShardError {
    fn from(err: CheckpointError) -> Self {
        ShardError::Checkpoint(err)
    }
}

/// Counters accumulated while processing one shard
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, serde::Serialize)]
pub struct ShardStats {
    pub records_processed: u64,
    pub records_failed: u64,
    pub batches_committed: u64,
}

/// Terminal state of one shard's processing
#[derive(Debug)]
pub enum ShardOutcome {
    /// The record stream ended naturally
    Completed(ShardStats),
    /// The shard's lease was revoked; terminated cleanly
    LeaseLost(ShardStats),
    /// The worker's shutdown signal was observed at a batch boundary
    Interrupted(ShardStats),
    /// Stream or checkpoint failure, fatal for this shard only
    Failed { stats: ShardStats, error: ShardError },
}

impl ShardOutcome {
    pub fn stats(&self) -> &ShardStats {
        match self {
            ShardOutcome::Completed(stats)
            | ShardOutcome::LeaseLost(stats)
            | ShardOutcome::Interrupted(stats) => stats,
            ShardOutcome::Failed { stats, .. } => stats,
        }
    }

    pub fn is_fatal(&self) -> bool {
        matches!(self, ShardOutcome::Failed { .. })
    }
}

enum Step {
    Item(Option<Result<Record, crate::shardflow::stream::ShardStreamError>>),
    WindowElapsed,
    Shutdown,
}

/// Consumes one shard's record stream into checkpointed batches
pub struct ShardProcessor {
    worker_id: String,
    shard_id: ShardId,
    policy: BatchingPolicy,
    checkpointer: ShardCheckpointer,
    hook: RecordHook,
    metrics: Arc<dyn MetricsSink>,
    observer: Option<mpsc::UnboundedSender<BatchSummary>>,
    shutdown: ShutdownWatch,
}

impl ShardProcessor {
    pub fn new(
        worker_id: impl Into<String>,
        shard_id: ShardId,
        policy: BatchingPolicy,
        store: Arc<dyn CheckpointStore>,
        shutdown: ShutdownWatch,
    ) -> Self {
        Self {
            worker_id: worker_id.into(),
            checkpointer: ShardCheckpointer::new(shard_id.clone(), store),
            shard_id,
            policy,
            hook: noop_hook(),
            metrics: Arc::new(NoopMetricsSink),
            observer: None,
            shutdown,
        }
    }

    pub fn with_hook(mut self, hook: RecordHook) -> Self {
        self.hook = hook;
        self
    }

    pub fn with_metrics(mut self, metrics: Arc<dyn MetricsSink>) -> Self {
        self.metrics = metrics;
        self
    }

    /// Attach an unbounded channel that receives a summary of every closed
    /// batch. Unbounded so emission never blocks processing.
    pub fn with_batch_observer(mut self, observer: mpsc::UnboundedSender<BatchSummary>) -> Self {
        self.observer = Some(observer);
        self
    }

    /// Drive the shard to a terminal state
    pub async fn run(mut self, mut stream: RecordStream) -> ShardOutcome {
        info!(
            "Worker '{}': shard '{}' processing started (batch size {}, window {:?})",
            self.worker_id, self.shard_id, self.policy.max_batch_size, self.policy.batch_window
        );
        let mut stats = ShardStats::default();
        let mut batch = BatchBuffer::new(self.policy.max_batch_size);

        loop {
            let step = match batch.deadline(self.policy.batch_window) {
                Some(deadline) => {
                    let deadline = Instant::from_std(deadline);
                    tokio::select! {
                        item = timeout_at(deadline, stream.next()) => match item {
                            Ok(item) => Step::Item(item),
                            Err(_) => Step::WindowElapsed,
                        },
                        _ = self.shutdown.triggered() => Step::Shutdown,
                    }
                }
                None => {
                    tokio::select! {
                        item = stream.next() => Step::Item(item),
                        _ = self.shutdown.triggered() => Step::Shutdown,
                    }
                }
            };

            match step {
                Step::Item(Some(Ok(record))) => {
                    let sequence = record.sequence;
                    let effect = (self.hook)(record.clone());
                    match self.checkpointer.stage_on_success(&record, effect).await {
                        Ok(()) => {
                            stats.records_processed += 1;
                            if batch.push(record) {
                                if let Err(err) = self
                                    .close_batch(&mut batch, &mut stats, BatchCloseReason::Size)
                                    .await
                                {
                                    return self.fail(stats, err);
                                }
                                if self.shutdown.is_triggered() {
                                    return self.interrupted(stats);
                                }
                            }
                        }
                        Err(err) => {
                            stats.records_failed += 1;
                            warn!(
                                "Worker '{}': record {} on shard '{}' failed processing, continuing: {}",
                                self.worker_id, sequence, self.shard_id, err
                            );
                        }
                    }
                }
                Step::WindowElapsed => {
                    if let Err(err) = self
                        .close_batch(&mut batch, &mut stats, BatchCloseReason::Window)
                        .await
                    {
                        return self.fail(stats, err);
                    }
                    if self.shutdown.is_triggered() {
                        return self.interrupted(stats);
                    }
                }
                Step::Shutdown => {
                    // Drain the open batch to its checkpoint, then stop.
                    if let Err(err) = self
                        .close_batch(&mut batch, &mut stats, BatchCloseReason::Shutdown)
                        .await
                    {
                        return self.fail(stats, err);
                    }
                    return self.interrupted(stats);
                }
                Step::Item(Some(Err(err))) if err.is_lease_lost() => {
                    warn!(
                        "Worker '{}': lease lost on shard '{}' after {} records, stopping cleanly",
                        self.worker_id, self.shard_id, stats.records_processed
                    );
                    self.metrics.record_lease_lost(&self.shard_id);
                    return ShardOutcome::LeaseLost(stats);
                }
                Step::Item(Some(Err(err))) => {
                    error!(
                        "Worker '{}': shard '{}' stream failed: {}",
                        self.worker_id, self.shard_id, err
                    );
                    self.metrics.record_shard_failure(&self.shard_id);
                    return ShardOutcome::Failed {
                        stats,
                        error: ShardError::Stream {
                            shard_id: self.shard_id.clone(),
                            message: err.to_string(),
                        },
                    };
                }
                Step::Item(None) => {
                    if let Err(err) = self
                        .close_batch(&mut batch, &mut stats, BatchCloseReason::EndOfStream)
                        .await
                    {
                        return self.fail(stats, err);
                    }
                    info!(
                        "Worker '{}': shard '{}' reached end of stream ({} records, {} batches)",
                        self.worker_id, self.shard_id, stats.records_processed, stats.batches_committed
                    );
                    return ShardOutcome::Completed(stats);
                }
            }
        }
    }

    /// Close the current batch: commit its checkpoint, then emit the summary
    async fn close_batch(
        &mut self,
        batch: &mut BatchBuffer,
        stats: &mut ShardStats,
        reason: BatchCloseReason,
    ) -> Result<(), CheckpointError> {
        if batch.is_empty() {
            return Ok(());
        }
        let (records, elapsed) = batch.drain();
        let committed = self.checkpointer.checkpoint().await?;
        stats.batches_committed += 1;

        if let Some(sequence) = committed {
            self.metrics.record_checkpoint(&self.shard_id, sequence);
        }
        self.metrics.record_batch(&self.shard_id, records.len(), elapsed);
        if let Some(observer) = &self.observer {
            let first_sequence = records.first().map(|r| r.sequence).unwrap_or_default();
            let last_sequence = records.last().map(|r| r.sequence).unwrap_or_default();
            let _ = observer.send(BatchSummary {
                shard_id: self.shard_id.clone(),
                records: records.len(),
                first_sequence,
                last_sequence,
                close_reason: reason,
                elapsed,
            });
        }
        Ok(())
    }

    fn fail(&self, stats: ShardStats, error: CheckpointError) -> ShardOutcome {
        error!(
            "Worker '{}': checkpoint failed on shard '{}': {}",
            self.worker_id, self.shard_id, error
        );
        self.metrics.record_shard_failure(&self.shard_id);
        ShardOutcome::Failed {
            stats,
            error: ShardError::Checkpoint(error),
        }
    }

    fn interrupted(&self, stats: ShardStats) -> ShardOutcome {
        info!(
            "Worker '{}': shard '{}' interrupted by shutdown after {} records",
            self.worker_id, self.shard_id, stats.records_processed
        );
        ShardOutcome::Interrupted(stats)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::shardflow::checkpoint::InMemoryCheckpointStore;
    use crate::shardflow::stream::{
        DeliveryMode, InMemoryStream, RecordStreamSource, StreamPosition,
    };
    use crate::shardflow::worker::shutdown::ShutdownSignal;
    use std::time::Duration;

    async fn subscribe(stream: &InMemoryStream, shard: &ShardId) -> RecordStream {
        stream
            .subscribe(shard, StreamPosition::TrimHorizon, DeliveryMode::FanOut)
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_full_batches_commit_by_size() {
        let stream = InMemoryStream::new("test", 1);
        let store = InMemoryCheckpointStore::new();
        let shard = ShardId::new("shard-0000");
        for i in 0..20u8 {
            stream.append(&shard, vec![i]).await.unwrap();
        }
        stream.close_shard(&shard).await.unwrap();

        let processor = ShardProcessor::new(
            "worker-0",
            shard.clone(),
            BatchingPolicy {
                max_batch_size: 10,
                batch_window: Duration::from_secs(5),
            },
            Arc::new(store.clone()),
            ShutdownSignal::new().subscribe(),
        );
        let outcome = processor.run(subscribe(&stream, &shard).await).await;

        match outcome {
            ShardOutcome::Completed(stats) => {
                assert_eq!(stats.records_processed, 20);
                assert_eq!(stats.batches_committed, 2);
            }
            other => panic!("unexpected outcome: {:?}", other),
        }
        assert_eq!(store.position(&shard).await, Some(20));
        // One commit per closed batch
        assert_eq!(store.history(&shard).await, vec![10, 20]);
    }

    #[tokio::test]
    async fn test_hook_failure_skips_record_and_continues() {
        let stream = InMemoryStream::new("test", 1);
        let store = InMemoryCheckpointStore::new();
        let shard = ShardId::new("shard-0000");
        for i in 0..5u8 {
            stream.append(&shard, vec![i]).await.unwrap();
        }
        stream.close_shard(&shard).await.unwrap();

        // Reject the record at sequence 3
        let hook: RecordHook = Arc::new(|record| {
            Box::pin(async move {
                if record.sequence == 3 {
                    Err("rejected".into())
                } else {
                    Ok(())
                }
            })
        });
        let processor = ShardProcessor::new(
            "worker-0",
            shard.clone(),
            BatchingPolicy::default(),
            Arc::new(store.clone()),
            ShutdownSignal::new().subscribe(),
        )
        .with_hook(hook);
        let outcome = processor.run(subscribe(&stream, &shard).await).await;

        match outcome {
            ShardOutcome::Completed(stats) => {
                assert_eq!(stats.records_processed, 4);
                assert_eq!(stats.records_failed, 1);
            }
            other => panic!("unexpected outcome: {:?}", other),
        }
        // Later successful records still advance the checkpoint
        assert_eq!(store.position(&shard).await, Some(5));
    }

    #[tokio::test]
    async fn test_lease_lost_terminates_cleanly() {
        let stream = InMemoryStream::new("test", 1);
        let store = InMemoryCheckpointStore::new();
        let shard = ShardId::new("shard-0000");
        for i in 0..10u8 {
            stream.append(&shard, vec![i]).await.unwrap();
        }
        stream.revoke_lease_after(&shard, 6).await.unwrap();

        let processor = ShardProcessor::new(
            "worker-0",
            shard.clone(),
            BatchingPolicy {
                max_batch_size: 3,
                batch_window: Duration::from_secs(5),
            },
            Arc::new(store.clone()),
            ShutdownSignal::new().subscribe(),
        );
        let outcome = processor.run(subscribe(&stream, &shard).await).await;

        match outcome {
            ShardOutcome::LeaseLost(stats) => {
                assert_eq!(stats.records_processed, 6);
                assert_eq!(stats.batches_committed, 2);
            }
            other => panic!("unexpected outcome: {:?}", other),
        }
        // Two full batches of 3 committed before the revocation surfaced;
        // no checkpoint attempt after the lease was lost.
        assert_eq!(store.position(&shard).await, Some(6));
    }

    #[tokio::test]
    async fn test_checkpoint_failure_is_fatal_and_distinct() {
        let stream = InMemoryStream::new("test", 1);
        let store = InMemoryCheckpointStore::new();
        let shard = ShardId::new("shard-0000");
        for i in 0..4u8 {
            stream.append(&shard, vec![i]).await.unwrap();
        }
        store.reject_shard(&shard, "lease taken over").await;

        let processor = ShardProcessor::new(
            "worker-0",
            shard.clone(),
            BatchingPolicy {
                max_batch_size: 2,
                batch_window: Duration::from_secs(5),
            },
            Arc::new(store.clone()),
            ShutdownSignal::new().subscribe(),
        );
        let outcome = processor.run(subscribe(&stream, &shard).await).await;

        match outcome {
            ShardOutcome::Failed {
                error: ShardError::Checkpoint(err),
                ..
            } => {
                assert_eq!(err.shard_id, shard);
            }
            other => panic!("unexpected outcome: {:?}", other),
        }
    }
}
