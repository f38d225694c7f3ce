//! Shard-level processing: batching, checkpointing, error classification

pub mod batch;
pub mod shard_processor;

pub use batch::{BatchBuffer, BatchCloseReason, BatchSummary, BatchingPolicy};
pub use shard_processor::{
    noop_hook, HookError, RecordHook, ShardError, ShardOutcome, ShardProcessor, ShardStats,
};
