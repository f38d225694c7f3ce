//! Concurrent shard-consumption harness
//!
//! Module map, leaves first:
//! - [`stream`]: record/shard data model and the collaborator traits
//!   (record source, capacity API), plus the in-memory stream
//! - [`checkpoint`]: durable per-shard cursors, store trait, staging
//!   checkpointer
//! - [`processor`]: per-shard batching, checkpoint commits, error
//!   classification
//! - [`worker`]: per-shard fan-out under one consumer identity, shutdown
//!   signalling
//! - [`server`]: harness configuration, the run orchestrator, the
//!   resharding trigger
//! - [`observability`]: fire-and-forget metrics sinks

pub mod checkpoint;
pub mod observability;
pub mod processor;
pub mod server;
pub mod stream;
pub mod worker;
