//! Checkpoint staging and durable storage
//!
//! Checkpoints are per-shard cursors marking the last fully processed record
//! position. The invariant throughout this module: a checkpoint only moves
//! forward, and a failed commit never silently advances it.

pub mod checkpointer;
pub mod store;

pub use checkpointer::ShardCheckpointer;
pub use store::{CheckpointError, CheckpointStore, InMemoryCheckpointStore};
