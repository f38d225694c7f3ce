//! Generic record stream source abstraction
//!
//! Abstracts the partitioned log service the harness consumes from. An
//! implementation can wrap a managed streaming service client, a broker
//! client, or the in-memory stream used by tests and the demo binary.

use super::error::ShardStreamError;
use super::types::{Record, ShardId, StreamPosition};
use async_trait::async_trait;
use futures::stream::BoxStream;

/// How records are delivered to a shard subscription
///
/// Both modes yield the same records in the same order; they differ only in
/// how aggressively the transport pulls.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryMode {
    /// Push-based dedicated-throughput subscription
    FanOut,
    /// Pull-based polling, fetching up to `batch_size` records per request
    Polling { batch_size: usize },
}

/// Ordered stream of records for one shard. Ends when the shard is closed;
/// yields `ShardStreamError` items on lease revocation or stream failure.
pub type RecordStream = BoxStream<'static, Result<Record, ShardStreamError>>;

/// Core trait for partitioned record stream sources
///
/// Multiple subscriptions to the same shard are permitted at this layer;
/// exclusivity is the lease mechanism's concern and surfaces here only as
/// `ShardStreamError::LeaseLost`.
#[async_trait]
pub trait RecordStreamSource: Send + Sync + 'static {
    /// List the shards currently making up the stream
    async fn list_shards(&self) -> Result<Vec<ShardId>, ShardStreamError>;

    /// Open an ordered record subscription on one shard
    async fn subscribe(
        &self,
        shard_id: &ShardId,
        from: StreamPosition,
        mode: DeliveryMode,
    ) -> Result<RecordStream, ShardStreamError>;
}
