//! Core stream data types
//!
//! A stream is an ordered set of shards; each shard owns an append-only,
//! ordered sequence of records. Sequence numbers are assigned per shard and
//! only ever increase.

use serde::Serialize;
use std::fmt;

/// Position of a record within its shard. Starts at 1 and increases
/// monotonically; 0 is never assigned.
pub type SequenceNumber = u64;

/// Identifier of one shard of a stream
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct ShardId(String);

impl ShardId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ShardId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for ShardId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

impl From<String> for ShardId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

/// A single record pulled from a shard
///
/// The payload is opaque to the harness; only the shard identity and the
/// sequence position matter for ordering and checkpointing.
#[derive(Debug, Clone)]
pub struct Record {
    /// Shard this record belongs to
    pub shard_id: ShardId,
    /// Monotonically increasing position within the shard
    pub sequence: SequenceNumber,
    /// Opaque payload bytes
    pub payload: Vec<u8>,
    /// Arrival timestamp in epoch milliseconds
    pub timestamp: i64,
}

impl Record {
    pub fn new(
        shard_id: ShardId,
        sequence: SequenceNumber,
        payload: Vec<u8>,
        timestamp: i64,
    ) -> Self {
        Self {
            shard_id,
            sequence,
            payload,
            timestamp,
        }
    }
}

/// Where a shard subscription starts reading
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamPosition {
    /// Oldest retained record
    TrimHorizon,
    /// Records appended after the subscription is established
    Latest,
    /// Records after the given sequence number (exclusive). This is the
    /// resume position derived from a committed checkpoint.
    After(SequenceNumber),
}
