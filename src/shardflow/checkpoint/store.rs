//! Durable checkpoint storage abstraction
//!
//! A checkpoint store is a key-value mapping from shard to the last fully
//! processed sequence position. The store is expected to reject writes from
//! a consumer that no longer holds the shard's lease; that rejection is what
//! makes checkpoint failure fatal for the shard.

use crate::shardflow::stream::{SequenceNumber, ShardId};
use async_trait::async_trait;
use log::debug;
use std::collections::HashMap;
use std::error::Error;
use std::fmt;
use std::sync::Arc;
use tokio::sync::Mutex;

/// Error committing a checkpoint position
#[derive(Debug, Clone)]
pub struct CheckpointError {
    pub shard_id: ShardId,
    pub message: String,
}

impl CheckpointError {
    pub fn new(shard_id: ShardId, message: impl Into<String>) -> Self {
        Self {
            shard_id,
            message: message.into(),
        }
    }
}

impl fmt::Display for CheckpointError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Checkpoint commit failed for shard '{}': {}",
            self.shard_id, self.message
        )
    }
}

impl Error for CheckpointError {}

/// Durable per-shard cursor persistence
#[async_trait]
pub trait CheckpointStore: Send + Sync + 'static {
    /// Persist `sequence` as the shard's committed position. Committing a
    /// position at or below the current one must be accepted and ignored,
    /// so a retry of the same position is idempotent.
    async fn put(
        &self,
        shard_id: &ShardId,
        sequence: SequenceNumber,
    ) -> Result<(), CheckpointError>;

    /// Read the shard's committed position, if any
    async fn get(&self, shard_id: &ShardId) -> Result<Option<SequenceNumber>, CheckpointError>;
}

#[derive(Default)]
struct StoreInner {
    positions: HashMap<ShardId, SequenceNumber>,
    history: HashMap<ShardId, Vec<SequenceNumber>>,
    rejecting: HashMap<ShardId, String>,
}

/// In-memory checkpoint store for tests and demos
///
/// `reject_shard` simulates a store that refuses writes for a shard whose
/// lease has been taken over.
#[derive(Clone, Default)]
pub struct InMemoryCheckpointStore {
    inner: Arc<Mutex<StoreInner>>,
}

impl InMemoryCheckpointStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent `put` for the shard fail with the given reason
    pub async fn reject_shard(&self, shard_id: &ShardId, reason: impl Into<String>) {
        self.inner
            .lock()
            .await
            .rejecting
            .insert(shard_id.clone(), reason.into());
    }

    /// Committed position for a shard, if any
    pub async fn position(&self, shard_id: &ShardId) -> Option<SequenceNumber> {
        self.inner.lock().await.positions.get(shard_id).copied()
    }

    /// Every accepted commit for a shard, in commit order
    pub async fn history(&self, shard_id: &ShardId) -> Vec<SequenceNumber> {
        self.inner
            .lock()
            .await
            .history
            .get(shard_id)
            .cloned()
            .unwrap_or_default()
    }
}

#[async_trait]
impl CheckpointStore for InMemoryCheckpointStore {
    async fn put(
        &self,
        shard_id: &ShardId,
        sequence: SequenceNumber,
    ) -> Result<(), CheckpointError> {
        let mut inner = self.inner.lock().await;
        if let Some(reason) = inner.rejecting.get(shard_id) {
            return Err(CheckpointError::new(shard_id.clone(), reason.clone()));
        }
        let current = inner.positions.get(shard_id).copied().unwrap_or(0);
        if sequence > current {
            inner.positions.insert(shard_id.clone(), sequence);
        }
        inner
            .history
            .entry(shard_id.clone())
            .or_default()
            .push(sequence.max(current));
        debug!("Checkpoint store: shard '{}' at {}", shard_id, sequence);
        Ok(())
    }

    async fn get(&self, shard_id: &ShardId) -> Result<Option<SequenceNumber>, CheckpointError> {
        Ok(self.inner.lock().await.positions.get(shard_id).copied())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_put_and_get_roundtrip() {
        let store = InMemoryCheckpointStore::new();
        let shard = ShardId::new("shard-0000");
        assert_eq!(store.get(&shard).await.unwrap(), None);
        store.put(&shard, 10).await.unwrap();
        assert_eq!(store.get(&shard).await.unwrap(), Some(10));
    }

    #[tokio::test]
    async fn test_put_never_regresses() {
        let store = InMemoryCheckpointStore::new();
        let shard = ShardId::new("shard-0000");
        store.put(&shard, 10).await.unwrap();
        store.put(&shard, 5).await.unwrap();
        assert_eq!(store.get(&shard).await.unwrap(), Some(10));
    }

    #[tokio::test]
    async fn test_rejected_shard_fails_put() {
        let store = InMemoryCheckpointStore::new();
        let shard = ShardId::new("shard-0000");
        store.reject_shard(&shard, "lease taken over").await;
        let err = store.put(&shard, 1).await.unwrap_err();
        assert_eq!(err.shard_id, shard);
        assert!(err.to_string().contains("lease taken over"));
    }
}
