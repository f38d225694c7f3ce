//! Run orchestration: configuration, the harness driver, and resharding

pub mod config;
pub mod harness;
pub mod resharding;

pub use config::{ConfigError, HarnessConfig};
pub use harness::{
    HarnessError, HarnessReport, ProducerHandle, StreamHarness, TerminationCause, WorkerReport,
    WorkerRunOutcome,
};
pub use resharding::ReshardingTrigger;
