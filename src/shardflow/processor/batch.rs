//! Record batching with a size/time aggregation window
//!
//! A batch opens when its first record arrives and closes when it reaches
//! the configured maximum size or when the window elapses, whichever comes
//! first. The buffer itself only tracks records and the open timestamp; the
//! shard processor drives the closing decision.

use crate::shardflow::stream::{Record, SequenceNumber, ShardId};
use serde::Serialize;
use std::time::{Duration, Instant};

/// Size/time aggregation window policy
#[derive(Debug, Clone)]
pub struct BatchingPolicy {
    /// Close a batch once it holds this many records
    pub max_batch_size: usize,
    /// Close a non-empty batch this long after it opened
    pub batch_window: Duration,
}

impl Default for BatchingPolicy {
    fn default() -> Self {
        Self {
            max_batch_size: 100,
            batch_window: Duration::from_millis(1000),
        }
    }
}

/// Why a batch closed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum BatchCloseReason {
    /// Reached the configured maximum size
    Size,
    /// The aggregation window elapsed first
    Window,
    /// The shard's record stream ended
    EndOfStream,
    /// The worker's shutdown signal was observed
    Shutdown,
}

/// Summary of one closed batch, emitted downstream for observation
#[derive(Debug, Clone, Serialize)]
pub struct BatchSummary {
    pub shard_id: ShardId,
    pub records: usize,
    pub first_sequence: SequenceNumber,
    pub last_sequence: SequenceNumber,
    pub close_reason: BatchCloseReason,
    /// Time from batch open to close
    pub elapsed: Duration,
}

/// Accumulates records for one shard's current batch
pub struct BatchBuffer {
    records: Vec<Record>,
    capacity: usize,
    opened_at: Option<Instant>,
}

impl BatchBuffer {
    pub fn new(capacity: usize) -> Self {
        Self {
            records: Vec::with_capacity(capacity),
            capacity,
            opened_at: None,
        }
    }

    /// Push a record, opening the batch if it was empty. Returns `true`
    /// once the batch has reached capacity.
    pub fn push(&mut self, record: Record) -> bool {
        if self.records.is_empty() {
            self.opened_at = Some(Instant::now());
        }
        self.records.push(record);
        self.records.len() >= self.capacity
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Deadline at which the open batch must close, or `None` while empty
    pub fn deadline(&self, window: Duration) -> Option<Instant> {
        self.opened_at.map(|opened| opened + window)
    }

    /// Take the buffered records and the time the batch was open, resetting
    /// the buffer for the next batch without deallocating.
    pub fn drain(&mut self) -> (Vec<Record>, Duration) {
        let elapsed = self
            .opened_at
            .take()
            .map(|opened| opened.elapsed())
            .unwrap_or_default();
        (std::mem::take(&mut self.records), elapsed)
    }
}
