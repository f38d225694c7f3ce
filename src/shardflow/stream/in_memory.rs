//! In-memory partitioned stream
//!
//! A complete in-process implementation of [`RecordStreamSource`] and
//! [`CapacityApi`], used by the test suite and the demo binary. Producers
//! append records per shard; subscriptions observe them in order. Lease
//! revocation and stream failures can be injected at a chosen sequence
//! position, which is how lease-loss and failure-isolation behavior is
//! exercised without a real stream service.

use super::capacity::{CapacityApi, CapacityError, ScalingMode};
use super::error::ShardStreamError;
use super::source::{DeliveryMode, RecordStream, RecordStreamSource};
use super::types::{Record, SequenceNumber, ShardId, StreamPosition};
use async_trait::async_trait;
use log::debug;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use tokio::sync::{Mutex, Notify};

/// A capacity-change request accepted by the in-memory stream
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CapacityRequest {
    pub target_shards: usize,
    pub mode: ScalingMode,
}

struct ShardState {
    records: Vec<Record>,
    next_sequence: SequenceNumber,
    closed: bool,
    /// Reads beyond this sequence surface `LeaseLost`
    revoke_after: Option<SequenceNumber>,
    /// Reads beyond this sequence surface a fatal stream error
    fail_after: Option<(SequenceNumber, String)>,
}

impl ShardState {
    fn new() -> Self {
        Self {
            records: Vec::new(),
            next_sequence: 1,
            closed: false,
            revoke_after: None,
            fail_after: None,
        }
    }
}

struct StreamInner {
    name: String,
    shards: Mutex<HashMap<ShardId, ShardState>>,
    capacity_requests: Mutex<Vec<CapacityRequest>>,
    notify: Notify,
}

/// In-memory partitioned append-only log
#[derive(Clone)]
pub struct InMemoryStream {
    inner: Arc<StreamInner>,
}

impl InMemoryStream {
    /// Create a stream with `shard_count` open shards named `shard-0000`,
    /// `shard-0001`, ...
    pub fn new(name: impl Into<String>, shard_count: usize) -> Self {
        let mut shards = HashMap::new();
        for i in 0..shard_count {
            shards.insert(ShardId::new(format!("shard-{:04}", i)), ShardState::new());
        }
        Self {
            inner: Arc::new(StreamInner {
                name: name.into(),
                shards: Mutex::new(shards),
                capacity_requests: Mutex::new(Vec::new()),
                notify: Notify::new(),
            }),
        }
    }

    /// Stream name
    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// Append one record to a shard, returning its assigned sequence number
    pub async fn append(
        &self,
        shard_id: &ShardId,
        payload: impl Into<Vec<u8>>,
    ) -> Result<SequenceNumber, ShardStreamError> {
        let mut shards = self.inner.shards.lock().await;
        let shard = shards
            .get_mut(shard_id)
            .ok_or_else(|| ShardStreamError::ShardNotFound {
                shard_id: shard_id.clone(),
            })?;
        if shard.closed {
            return Err(ShardStreamError::Stream {
                shard_id: shard_id.clone(),
                message: "shard is closed".to_string(),
            });
        }
        let sequence = shard.next_sequence;
        shard.next_sequence += 1;
        shard.records.push(Record::new(
            shard_id.clone(),
            sequence,
            payload.into(),
            chrono::Utc::now().timestamp_millis(),
        ));
        drop(shards);
        self.inner.notify.notify_waiters();
        Ok(sequence)
    }

    /// Close one shard; its subscriptions end after draining
    pub async fn close_shard(&self, shard_id: &ShardId) -> Result<(), ShardStreamError> {
        let mut shards = self.inner.shards.lock().await;
        let shard = shards
            .get_mut(shard_id)
            .ok_or_else(|| ShardStreamError::ShardNotFound {
                shard_id: shard_id.clone(),
            })?;
        shard.closed = true;
        drop(shards);
        self.inner.notify.notify_waiters();
        Ok(())
    }

    /// Close every shard
    pub async fn close_all(&self) {
        let mut shards = self.inner.shards.lock().await;
        for shard in shards.values_mut() {
            shard.closed = true;
        }
        drop(shards);
        self.inner.notify.notify_waiters();
    }

    /// Revoke the shard's lease immediately: every subsequent read fails
    /// with `LeaseLost`
    pub async fn revoke_lease(&self, shard_id: &ShardId) -> Result<(), ShardStreamError> {
        self.revoke_lease_after(shard_id, 0).await
    }

    /// Revoke the shard's lease after `sequence`: records up to and
    /// including it are still delivered, anything beyond surfaces `LeaseLost`
    pub async fn revoke_lease_after(
        &self,
        shard_id: &ShardId,
        sequence: SequenceNumber,
    ) -> Result<(), ShardStreamError> {
        let mut shards = self.inner.shards.lock().await;
        let shard = shards
            .get_mut(shard_id)
            .ok_or_else(|| ShardStreamError::ShardNotFound {
                shard_id: shard_id.clone(),
            })?;
        shard.revoke_after = Some(sequence);
        drop(shards);
        self.inner.notify.notify_waiters();
        Ok(())
    }

    /// Inject a fatal stream failure after `sequence`
    pub async fn inject_failure_after(
        &self,
        shard_id: &ShardId,
        sequence: SequenceNumber,
        message: impl Into<String>,
    ) -> Result<(), ShardStreamError> {
        let mut shards = self.inner.shards.lock().await;
        let shard = shards
            .get_mut(shard_id)
            .ok_or_else(|| ShardStreamError::ShardNotFound {
                shard_id: shard_id.clone(),
            })?;
        shard.fail_after = Some((sequence, message.into()));
        drop(shards);
        self.inner.notify.notify_waiters();
        Ok(())
    }

    /// Inject a fatal stream failure on the next read
    pub async fn inject_failure(
        &self,
        shard_id: &ShardId,
        message: impl Into<String>,
    ) -> Result<(), ShardStreamError> {
        self.inject_failure_after(shard_id, 0, message).await
    }

    /// Number of shards currently making up the stream
    pub async fn shard_count(&self) -> usize {
        self.inner.shards.lock().await.len()
    }

    /// Capacity-change requests accepted so far, in arrival order
    pub async fn capacity_requests(&self) -> Vec<CapacityRequest> {
        self.inner.capacity_requests.lock().await.clone()
    }
}

/// One shard subscription's pull state
struct Subscription {
    inner: Arc<StreamInner>,
    shard_id: ShardId,
    cursor: usize,
    pending: VecDeque<Result<Record, ShardStreamError>>,
    /// Max records buffered per refill (polling batch size; unbounded for fan-out)
    chunk: usize,
    terminated: bool,
}

enum Refill {
    Progress,
    Closed,
    Empty,
}

impl Subscription {
    /// Pull buffered records from the shard under the lock
    async fn refill(&mut self) -> Refill {
        let shards = self.inner.shards.lock().await;
        let shard = match shards.get(&self.shard_id) {
            Some(shard) => shard,
            None => {
                self.pending.push_back(Err(ShardStreamError::ShardNotFound {
                    shard_id: self.shard_id.clone(),
                }));
                return Refill::Progress;
            }
        };

        while self.pending.len() < self.chunk {
            let Some(record) = shard.records.get(self.cursor) else {
                break;
            };
            if let Some(cut) = shard.revoke_after {
                if record.sequence > cut {
                    self.pending.push_back(Err(ShardStreamError::LeaseLost {
                        shard_id: self.shard_id.clone(),
                    }));
                    return Refill::Progress;
                }
            }
            if let Some((cut, message)) = &shard.fail_after {
                if record.sequence > *cut {
                    self.pending.push_back(Err(ShardStreamError::Stream {
                        shard_id: self.shard_id.clone(),
                        message: message.clone(),
                    }));
                    return Refill::Progress;
                }
            }
            self.pending.push_back(Ok(record.clone()));
            self.cursor += 1;
        }

        if !self.pending.is_empty() {
            return Refill::Progress;
        }

        // Nothing buffered. The next read would be at sequence cursor + 1
        // (sequences are contiguous from 1), so an injected error whose cut
        // has been passed surfaces even while idle; a consumer waiting on a
        // stolen shard must not hang forever.
        let next_read = self.cursor as SequenceNumber + 1;
        if let Some(cut) = shard.revoke_after {
            if next_read > cut {
                self.pending.push_back(Err(ShardStreamError::LeaseLost {
                    shard_id: self.shard_id.clone(),
                }));
                return Refill::Progress;
            }
        }
        if let Some((cut, message)) = &shard.fail_after {
            if next_read > *cut {
                self.pending.push_back(Err(ShardStreamError::Stream {
                    shard_id: self.shard_id.clone(),
                    message: message.clone(),
                }));
                return Refill::Progress;
            }
        }

        if shard.closed {
            Refill::Closed
        } else {
            Refill::Empty
        }
    }

    async fn next_item(&mut self) -> Option<Result<Record, ShardStreamError>> {
        if self.terminated {
            return None;
        }
        loop {
            if let Some(item) = self.pending.pop_front() {
                // An error terminates the sequence; nothing follows it.
                if item.is_err() {
                    self.terminated = true;
                }
                return Some(item);
            }

            let inner = Arc::clone(&self.inner);
            let notified = inner.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            match self.refill().await {
                Refill::Progress => continue,
                Refill::Closed => {
                    self.terminated = true;
                    return None;
                }
                Refill::Empty => notified.await,
            }
        }
    }
}

#[async_trait]
impl RecordStreamSource for InMemoryStream {
    async fn list_shards(&self) -> Result<Vec<ShardId>, ShardStreamError> {
        let shards = self.inner.shards.lock().await;
        let mut ids: Vec<ShardId> = shards.keys().cloned().collect();
        ids.sort();
        Ok(ids)
    }

    async fn subscribe(
        &self,
        shard_id: &ShardId,
        from: StreamPosition,
        mode: DeliveryMode,
    ) -> Result<RecordStream, ShardStreamError> {
        let shards = self.inner.shards.lock().await;
        let shard = shards
            .get(shard_id)
            .ok_or_else(|| ShardStreamError::ShardNotFound {
                shard_id: shard_id.clone(),
            })?;
        let cursor = match from {
            StreamPosition::TrimHorizon => 0,
            StreamPosition::Latest => shard.records.len(),
            StreamPosition::After(sequence) => {
                shard.records.partition_point(|r| r.sequence <= sequence)
            }
        };
        drop(shards);

        let chunk = match mode {
            DeliveryMode::FanOut => usize::MAX,
            DeliveryMode::Polling { batch_size } => batch_size.max(1),
        };
        debug!(
            "Stream '{}': subscription opened on shard '{}' at {:?} ({:?})",
            self.inner.name, shard_id, from, mode
        );

        let subscription = Subscription {
            inner: Arc::clone(&self.inner),
            shard_id: shard_id.clone(),
            cursor,
            pending: VecDeque::new(),
            chunk,
            terminated: false,
        };
        let stream = futures::stream::unfold(subscription, |mut sub| async move {
            sub.next_item().await.map(|item| (item, sub))
        });
        Ok(Box::pin(stream))
    }
}

#[async_trait]
impl CapacityApi for InMemoryStream {
    async fn update_shard_count(
        &self,
        target_shards: usize,
        mode: ScalingMode,
    ) -> Result<(), CapacityError> {
        if target_shards == 0 {
            return Err(CapacityError::new("target shard count must be positive"));
        }
        let mut shards = self.inner.shards.lock().await;
        let current = shards.len();
        for i in current..target_shards {
            shards.insert(ShardId::new(format!("shard-{:04}", i)), ShardState::new());
        }
        drop(shards);
        self.inner
            .capacity_requests
            .lock()
            .await
            .push(CapacityRequest {
                target_shards,
                mode,
            });
        self.inner.notify.notify_waiters();
        debug!(
            "Stream '{}': capacity change accepted, {} -> {} shards",
            self.inner.name, current, target_shards
        );
        Ok(())
    }
}
