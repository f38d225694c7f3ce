//! Stream capacity management abstraction

use async_trait::async_trait;
use std::error::Error;
use std::fmt;

/// How the stream service redistributes data across the new shard set
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScalingMode {
    /// Split/merge shards so the keyspace is spread evenly
    UniformScaling,
}

impl fmt::Display for ScalingMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ScalingMode::UniformScaling => write!(f, "UNIFORM_SCALING"),
        }
    }
}

/// Error returned when a capacity-change request is refused
#[derive(Debug, Clone)]
pub struct CapacityError {
    pub message: String,
}

impl CapacityError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

impl fmt::Display for CapacityError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Capacity change rejected: {}", self.message)
    }
}

impl Error for CapacityError {}

/// Capacity-management API of the stream service
///
/// Touches only stream-level state; it shares nothing with the consuming
/// workers.
#[async_trait]
pub trait CapacityApi: Send + Sync + 'static {
    /// Request the stream be resized to `target_shards` shards
    async fn update_shard_count(
        &self,
        target_shards: usize,
        mode: ScalingMode,
    ) -> Result<(), CapacityError>;
}
