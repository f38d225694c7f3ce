//! # shardflow
//!
//! A concurrent consumption harness for partitioned append-only streams:
//! any number of independent workers, each driving its assigned shards in
//! parallel, batching records under a size/time window and committing a
//! durable checkpoint per batch, while tolerating shard-lease revocation
//! and fatal stream errors without taking down sibling shards or workers.
//!
//! ## Features
//!
//! - **Per-shard concurrency**: one task per shard inside each worker, no
//!   cap, so a slow shard never blocks a fast one
//! - **Stage/commit checkpointing**: records become checkpointable only
//!   after their per-record effect succeeds; cursors only move forward
//! - **Lease-loss recovery**: a revoked shard ends cleanly and is never
//!   escalated; stream and checkpoint failures stay scoped to their shard
//! - **Raced termination**: run-length timer vs. worker completion vs.
//!   producer termination, first one wins and drives graceful shutdown
//! - **One-shot resharding**: an independent delayed task requesting a
//!   stream capacity change, uncoupled from worker lifecycles
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use shardflow::{HarnessConfig, InMemoryCheckpointStore, InMemoryStream, StreamHarness};
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let stream = InMemoryStream::new("orders", 4);
//!     let store = InMemoryCheckpointStore::new();
//!
//!     let config = HarnessConfig::new()
//!         .with_worker_count(2)
//!         .with_batching(100, Duration::from_secs(1))
//!         .with_run_length(Duration::from_secs(30));
//!
//!     let harness = StreamHarness::new(config, Arc::new(stream.clone()), Arc::new(store))
//!         .with_capacity_api(Arc::new(stream));
//!     let report = harness.run().await?;
//!     println!("{}", report);
//!     Ok(())
//! }
//! ```

pub mod shardflow;

// Re-export the main API at the crate root for easy access
pub use shardflow::checkpoint::{
    CheckpointError, CheckpointStore, InMemoryCheckpointStore, ShardCheckpointer,
};
pub use shardflow::observability::{MetricsSink, NoopMetricsSink, PrometheusMetricsSink};
pub use shardflow::processor::{
    noop_hook, BatchCloseReason, BatchSummary, BatchingPolicy, RecordHook, ShardError,
    ShardOutcome, ShardProcessor, ShardStats,
};
pub use shardflow::server::{
    HarnessConfig, HarnessError, HarnessReport, ProducerHandle, ReshardingTrigger, StreamHarness,
    TerminationCause, WorkerReport, WorkerRunOutcome,
};
pub use shardflow::stream::{
    CapacityApi, CapacityError, DeliveryMode, InMemoryStream, Record, RecordStream,
    RecordStreamSource, ScalingMode, SequenceNumber, ShardId, ShardStreamError, StreamPosition,
};
pub use shardflow::worker::{
    ShardTermination, ShutdownSignal, ShutdownWatch, Worker, WorkerError, WorkerStats,
};
