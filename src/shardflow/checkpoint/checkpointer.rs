//! Per-shard checkpoint staging and commit
//!
//! The checkpointer separates "this record was processed" (staging) from
//! "processing up to here is durable" (commit). A record is staged only after
//! its caller-supplied effect succeeds, and the staged cursor only ever moves
//! forward; a failed commit never advances the durable position.

use super::store::{CheckpointError, CheckpointStore};
use crate::shardflow::stream::{Record, SequenceNumber, ShardId};
use log::debug;
use std::future::Future;
use std::sync::Arc;

/// Per-shard cursor owned by exactly one shard processor at a time,
/// mirroring the shard lease.
pub struct ShardCheckpointer {
    shard_id: ShardId,
    store: Arc<dyn CheckpointStore>,
    staged: Option<SequenceNumber>,
    last_committed: Option<SequenceNumber>,
}

impl ShardCheckpointer {
    pub fn new(shard_id: ShardId, store: Arc<dyn CheckpointStore>) -> Self {
        Self {
            shard_id,
            store,
            staged: None,
            last_committed: None,
        }
    }

    /// Shard this checkpointer belongs to
    pub fn shard_id(&self) -> &ShardId {
        &self.shard_id
    }

    /// Highest staged (processed but not necessarily durable) position
    pub fn staged(&self) -> Option<SequenceNumber> {
        self.staged
    }

    /// Highest successfully committed position
    pub fn last_committed(&self) -> Option<SequenceNumber> {
        self.last_committed
    }

    /// Run `effect` for `record`; stage the record's position only if the
    /// effect completes without error. The effect's error is handed back to
    /// the caller untouched, and a failed record is never staged.
    pub async fn stage_on_success<E, Fut>(&mut self, record: &Record, effect: Fut) -> Result<(), E>
    where
        Fut: Future<Output = Result<(), E>>,
    {
        effect.await?;
        if self.staged.map_or(true, |s| record.sequence > s) {
            self.staged = Some(record.sequence);
        }
        Ok(())
    }

    /// Commit the highest staged position to the store
    ///
    /// Returns the committed position, or `None` when nothing has advanced
    /// since the last commit (a no-op). On store failure the durable cursor
    /// is left untouched and the error is propagated; the shard must stop.
    pub async fn checkpoint(&mut self) -> Result<Option<SequenceNumber>, CheckpointError> {
        let Some(staged) = self.staged else {
            return Ok(None);
        };
        if self.last_committed == Some(staged) {
            return Ok(None);
        }
        self.store.put(&self.shard_id, staged).await?;
        self.last_committed = Some(staged);
        debug!("Shard '{}': checkpoint committed at {}", self.shard_id, staged);
        Ok(Some(staged))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::shardflow::checkpoint::store::InMemoryCheckpointStore;
    use crate::shardflow::stream::Record;

    fn record(sequence: SequenceNumber) -> Record {
        Record::new(ShardId::new("shard-0000"), sequence, Vec::new(), 0)
    }

    fn checkpointer(store: &InMemoryCheckpointStore) -> ShardCheckpointer {
        ShardCheckpointer::new(ShardId::new("shard-0000"), Arc::new(store.clone()))
    }

    #[tokio::test]
    async fn test_stage_only_on_effect_success() {
        let store = InMemoryCheckpointStore::new();
        let mut cp = checkpointer(&store);

        cp.stage_on_success::<String, _>(&record(1), async { Ok(()) })
            .await
            .unwrap();
        assert_eq!(cp.staged(), Some(1));

        let err = cp
            .stage_on_success::<String, _>(&record(2), async { Err("boom".to_string()) })
            .await
            .unwrap_err();
        assert_eq!(err, "boom");
        // Failed record is not staged
        assert_eq!(cp.staged(), Some(1));
    }

    #[tokio::test]
    async fn test_staging_is_monotonic() {
        let store = InMemoryCheckpointStore::new();
        let mut cp = checkpointer(&store);
        cp.stage_on_success::<(), _>(&record(5), async { Ok(()) })
            .await
            .unwrap();
        cp.stage_on_success::<(), _>(&record(3), async { Ok(()) })
            .await
            .unwrap();
        assert_eq!(cp.staged(), Some(5));
    }

    #[tokio::test]
    async fn test_checkpoint_commits_staged_position() {
        let store = InMemoryCheckpointStore::new();
        let mut cp = checkpointer(&store);
        cp.stage_on_success::<(), _>(&record(7), async { Ok(()) })
            .await
            .unwrap();

        assert_eq!(cp.checkpoint().await.unwrap(), Some(7));
        assert_eq!(cp.last_committed(), Some(7));
        assert_eq!(store.position(&ShardId::new("shard-0000")).await, Some(7));

        // Nothing new staged: commit is a no-op
        assert_eq!(cp.checkpoint().await.unwrap(), None);
        assert_eq!(store.history(&ShardId::new("shard-0000")).await, vec![7]);
    }

    #[tokio::test]
    async fn test_checkpoint_with_nothing_staged_is_noop() {
        let store = InMemoryCheckpointStore::new();
        let mut cp = checkpointer(&store);
        assert_eq!(cp.checkpoint().await.unwrap(), None);
        assert_eq!(store.position(&ShardId::new("shard-0000")).await, None);
    }

    #[tokio::test]
    async fn test_failed_commit_does_not_advance_cursor() {
        let store = InMemoryCheckpointStore::new();
        let shard = ShardId::new("shard-0000");
        let mut cp = checkpointer(&store);

        cp.stage_on_success::<(), _>(&record(4), async { Ok(()) })
            .await
            .unwrap();
        store.reject_shard(&shard, "lease taken over").await;

        assert!(cp.checkpoint().await.is_err());
        assert_eq!(cp.last_committed(), None);
        assert_eq!(store.position(&shard).await, None);
    }
}
