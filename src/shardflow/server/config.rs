//! Harness configuration
//!
//! Layered configuration in the usual order: defaults, then builder
//! overrides, then `SHARDFLOW_*` environment variables for deployment.

use crate::shardflow::processor::BatchingPolicy;
use crate::shardflow::stream::DeliveryMode;
use log::warn;
use std::env;
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

/// Invalid harness configuration
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("worker_count must be positive")]
    InvalidWorkerCount,
    #[error("max_batch_size must be positive")]
    InvalidBatchSize,
    #[error("batch_window must be positive")]
    InvalidBatchWindow,
    #[error("reshard_factor must be greater than zero")]
    InvalidReshardFactor,
}

/// Configuration for a harness run
///
/// ## Environment Variables
/// - `SHARDFLOW_WORKER_COUNT`: number of concurrent workers (default: 2)
/// - `SHARDFLOW_RUN_LENGTH_MS`: run-length timer; unset means run until the
///   workers or the producer finish
/// - `SHARDFLOW_MAX_BATCH_SIZE`: records per batch (default: 100)
/// - `SHARDFLOW_BATCH_WINDOW_MS`: batch aggregation window (default: 1000)
/// - `SHARDFLOW_ENHANCED_FAN_OUT`: push-based delivery (default: true)
/// - `SHARDFLOW_POLL_BATCH_SIZE`: fetch size in polling mode (default: 256)
/// - `SHARDFLOW_RESHARD_AFTER_MS`: delay before the one-shot capacity change
/// - `SHARDFLOW_RESHARD_FACTOR`: shard-count multiplier (default: 2.0)
/// - `SHARDFLOW_SHUTDOWN_GRACE_MS`: per-worker drain budget (default: 5000)
/// - `SHARDFLOW_FAIL_FAST`: workers propagate their first fatal shard error
#[derive(Debug, Clone)]
pub struct HarnessConfig {
    /// Number of workers started by the harness
    pub worker_count: usize,
    /// Overall run-length timer; `None` runs until completion
    pub run_length: Option<Duration>,
    /// Maximum records per batch
    pub max_batch_size: usize,
    /// Maximum time a non-empty batch stays open
    pub batch_window: Duration,
    /// Use push-based fan-out delivery instead of polling
    pub enhanced_fan_out: bool,
    /// Records fetched per request in polling mode
    pub poll_batch_size: usize,
    /// Delay before the one-shot resharding request; `None` disables it
    pub reshard_after: Option<Duration>,
    /// Multiplier applied to the shard count when resharding, rounded up
    pub reshard_factor: f64,
    /// How long a worker may drain after shutdown before it is aborted
    pub shutdown_grace: Duration,
    /// Workers propagate the first fatal shard error instead of reporting it
    pub fail_fast: bool,
    /// A producer failure aborts the whole run instead of just ending it
    pub fail_on_producer_error: bool,
}

impl Default for HarnessConfig {
    fn default() -> Self {
        Self {
            worker_count: 2,
            run_length: None,
            max_batch_size: 100,
            batch_window: Duration::from_millis(1000),
            enhanced_fan_out: true,
            poll_batch_size: 256,
            reshard_after: None,
            reshard_factor: 2.0,
            shutdown_grace: Duration::from_secs(5),
            fail_fast: false,
            fail_on_producer_error: false,
        }
    }
}

impl HarnessConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Defaults overridden by any `SHARDFLOW_*` environment variables
    pub fn from_env() -> Self {
        let mut config = Self::default();
        if let Some(count) = read_env::<usize>("SHARDFLOW_WORKER_COUNT") {
            config.worker_count = count;
        }
        if let Some(ms) = read_env::<u64>("SHARDFLOW_RUN_LENGTH_MS") {
            config.run_length = Some(Duration::from_millis(ms));
        }
        if let Some(size) = read_env::<usize>("SHARDFLOW_MAX_BATCH_SIZE") {
            config.max_batch_size = size;
        }
        if let Some(ms) = read_env::<u64>("SHARDFLOW_BATCH_WINDOW_MS") {
            config.batch_window = Duration::from_millis(ms);
        }
        if let Some(enabled) = read_env::<bool>("SHARDFLOW_ENHANCED_FAN_OUT") {
            config.enhanced_fan_out = enabled;
        }
        if let Some(size) = read_env::<usize>("SHARDFLOW_POLL_BATCH_SIZE") {
            config.poll_batch_size = size;
        }
        if let Some(ms) = read_env::<u64>("SHARDFLOW_RESHARD_AFTER_MS") {
            config.reshard_after = Some(Duration::from_millis(ms));
        }
        if let Some(factor) = read_env::<f64>("SHARDFLOW_RESHARD_FACTOR") {
            config.reshard_factor = factor;
        }
        if let Some(ms) = read_env::<u64>("SHARDFLOW_SHUTDOWN_GRACE_MS") {
            config.shutdown_grace = Duration::from_millis(ms);
        }
        if let Some(enabled) = read_env::<bool>("SHARDFLOW_FAIL_FAST") {
            config.fail_fast = enabled;
        }
        config
    }

    pub fn with_worker_count(mut self, worker_count: usize) -> Self {
        self.worker_count = worker_count;
        self
    }

    pub fn with_run_length(mut self, run_length: Duration) -> Self {
        self.run_length = Some(run_length);
        self
    }

    pub fn with_batching(mut self, max_batch_size: usize, batch_window: Duration) -> Self {
        self.max_batch_size = max_batch_size;
        self.batch_window = batch_window;
        self
    }

    pub fn with_enhanced_fan_out(mut self, enabled: bool) -> Self {
        self.enhanced_fan_out = enabled;
        self
    }

    pub fn with_resharding(mut self, after: Duration, factor: f64) -> Self {
        self.reshard_after = Some(after);
        self.reshard_factor = factor;
        self
    }

    pub fn with_shutdown_grace(mut self, grace: Duration) -> Self {
        self.shutdown_grace = grace;
        self
    }

    pub fn with_fail_fast(mut self, fail_fast: bool) -> Self {
        self.fail_fast = fail_fast;
        self
    }

    pub fn with_fail_on_producer_error(mut self, enabled: bool) -> Self {
        self.fail_on_producer_error = enabled;
        self
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.worker_count == 0 {
            return Err(ConfigError::InvalidWorkerCount);
        }
        if self.max_batch_size == 0 {
            return Err(ConfigError::InvalidBatchSize);
        }
        if self.batch_window.is_zero() {
            return Err(ConfigError::InvalidBatchWindow);
        }
        if self.reshard_factor <= 0.0 {
            return Err(ConfigError::InvalidReshardFactor);
        }
        Ok(())
    }

    /// Aggregation window handed to each shard processor
    pub fn batching_policy(&self) -> BatchingPolicy {
        BatchingPolicy {
            max_batch_size: self.max_batch_size,
            batch_window: self.batch_window,
        }
    }

    /// Delivery mode implied by `enhanced_fan_out`
    pub fn delivery_mode(&self) -> DeliveryMode {
        if self.enhanced_fan_out {
            DeliveryMode::FanOut
        } else {
            DeliveryMode::Polling {
                batch_size: self.poll_batch_size,
            }
        }
    }
}

fn read_env<T: FromStr>(name: &str) -> Option<T> {
    let value = env::var(name).ok()?;
    match value.parse() {
        Ok(parsed) => Some(parsed),
        Err(_) => {
            warn!("Ignoring invalid value '{}' for {}", value, name);
            None
        }
    }
}
