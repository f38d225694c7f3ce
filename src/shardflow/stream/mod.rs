//! Stream data model and collaborator abstractions
//!
//! Everything the harness needs from the partitioned log service: the record
//! and shard types, the subscription source trait, the capacity-management
//! trait, the error classification, and an in-memory implementation for
//! tests and demos.

pub mod capacity;
pub mod error;
pub mod in_memory;
pub mod source;
pub mod types;

pub use capacity::{CapacityApi, CapacityError, ScalingMode};
pub use error::ShardStreamError;
pub use in_memory::{CapacityRequest, InMemoryStream};
pub use source::{DeliveryMode, RecordStream, RecordStreamSource};
pub use types::{Record, SequenceNumber, ShardId, StreamPosition};
