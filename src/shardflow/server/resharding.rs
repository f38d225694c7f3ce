//! Delayed one-shot stream resharding
//!
//! After a configured delay, issue exactly one capacity-change request:
//! the current shard count multiplied by the configured factor, rounded up.
//! The trigger runs as its own task, shares nothing with the workers, and
//! is never retried; a failed request is logged and forgotten.

use crate::shardflow::stream::{CapacityApi, RecordStreamSource, ScalingMode};
use log::{info, warn};
use std::sync::Arc;
use std::time::Duration;

/// One-shot capacity-change trigger
pub struct ReshardingTrigger {
    source: Arc<dyn RecordStreamSource>,
    capacity: Arc<dyn CapacityApi>,
    delay: Option<Duration>,
    factor: f64,
}

impl ReshardingTrigger {
    pub fn new(
        source: Arc<dyn RecordStreamSource>,
        capacity: Arc<dyn CapacityApi>,
        delay: Option<Duration>,
        factor: f64,
    ) -> Self {
        Self {
            source,
            capacity,
            delay,
            factor,
        }
    }

    /// Target shard count for `current` shards scaled by `factor`,
    /// rounded up to a whole shard
    pub fn target_shards(current: usize, factor: f64) -> usize {
        ((current as f64) * factor).ceil() as usize
    }

    /// Wait out the delay and issue the request. Returns the target shard
    /// count that was requested, or `None` when no delay is configured or
    /// the current shard count could not be determined.
    pub async fn run(self) -> Option<usize> {
        let delay = self.delay?;
        tokio::time::sleep(delay).await;

        let current = match self.source.list_shards().await {
            Ok(shards) => shards.len(),
            Err(err) => {
                warn!("Resharding skipped, could not list shards: {}", err);
                return None;
            }
        };
        let target = Self::target_shards(current, self.factor);
        info!(
            "Requesting capacity change: {} -> {} shards (factor {})",
            current, target, self.factor
        );
        if let Err(err) = self
            .capacity
            .update_shard_count(target, ScalingMode::UniformScaling)
            .await
        {
            warn!("Capacity change request failed: {}", err);
        }
        Some(target)
    }
}
