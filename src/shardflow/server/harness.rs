//! Top-level run orchestration
//!
//! The harness provisions the run, starts the workers and the resharding
//! trigger as independent tasks, then races three terminating conditions:
//! the run-length timer, completion of every worker, and termination of the
//! upstream producer. Whichever fires first wins; the producer is
//! interrupted, every worker is asked to shut down, and each worker's
//! outcome is collected within a grace period. One worker's failure never
//! suppresses the others' results.

use super::config::{ConfigError, HarnessConfig};
use super::resharding::ReshardingTrigger;
use crate::shardflow::checkpoint::CheckpointStore;
use crate::shardflow::observability::{MetricsSink, NoopMetricsSink};
use crate::shardflow::processor::{noop_hook, BatchSummary, RecordHook};
use crate::shardflow::stream::{CapacityApi, RecordStreamSource};
use crate::shardflow::worker::{ShutdownSignal, Worker, WorkerError, WorkerStats};
use chrono::{DateTime, Utc};
use log::{error, info, warn};
use serde::Serialize;
use std::error::Error;
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tokio::task::{JoinError, JoinHandle};

/// Handle of the upstream record producer task, raced by the harness
pub type ProducerHandle = JoinHandle<Result<(), Box<dyn Error + Send + Sync>>>;

/// Whole-run failure
#[derive(Debug)]
pub enum HarnessError {
    /// Provisioning failed before any worker started
    Setup { message: String },
    /// The configuration is invalid
    Config(ConfigError),
    /// The producer failed and the run is configured to treat that as fatal
    Producer { cause: String },
}

impl fmt::Display for HarnessError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HarnessError::Setup { message } => write!(f, "Harness setup failed: {}", message),
            HarnessError::Config(err) => write!(f, "Invalid harness configuration: {}", err),
            HarnessError::Producer { cause } => write!(f, "Producer failed: {}", cause),
        }
    }
}

impl Error for HarnessError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            HarnessError::Config(err) => Some(err),
            _ => None,
        }
    }
}

impl From<ConfigError> for HarnessError {
    fn from(err: ConfigError) -> Self {
        HarnessError::Config(err)
    }
}

/// Which terminating condition won the race
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum TerminationCause {
    /// The configured run-length timer elapsed
    Timer,
    /// Every worker reached a terminal state
    WorkersCompleted,
    /// The upstream producer finished
    ProducerFinished,
    /// The upstream producer failed
    ProducerFailed { cause: String },
}

impl fmt::Display for TerminationCause {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TerminationCause::Timer => write!(f, "run-length timer elapsed"),
            TerminationCause::WorkersCompleted => write!(f, "all workers completed"),
            TerminationCause::ProducerFinished => write!(f, "producer finished"),
            TerminationCause::ProducerFailed { cause } => write!(f, "producer failed: {}", cause),
        }
    }
}

/// Terminal outcome of one worker as collected by the harness
#[derive(Debug, Clone, Serialize)]
pub enum WorkerRunOutcome {
    /// Finished (naturally or after shutdown) with its stats
    Completed(WorkerStats),
    /// Failed with the given cause
    Failed { cause: String },
    /// Did not drain within the grace period and was aborted
    ForceKilled,
}

/// Per-worker entry in the final report
#[derive(Debug, Clone, Serialize)]
pub struct WorkerReport {
    pub worker_id: String,
    pub outcome: WorkerRunOutcome,
}

/// Final result of a harness run
#[derive(Debug, Clone, Serialize)]
pub struct HarnessReport {
    pub started_at: DateTime<Utc>,
    pub termination: TerminationCause,
    pub workers: Vec<WorkerReport>,
    /// Target shard count requested by the resharding trigger, if it fired
    pub reshard_requested: Option<usize>,
    pub workers_stopped: usize,
    pub workers_force_killed: usize,
    pub elapsed: Duration,
}

impl HarnessReport {
    /// Records processed across all workers that reported stats
    pub fn total_records(&self) -> u64 {
        self.workers
            .iter()
            .map(|w| match &w.outcome {
                WorkerRunOutcome::Completed(stats) => stats.records_processed,
                _ => 0,
            })
            .sum()
    }

    /// True when every worker drained without being aborted
    pub fn all_graceful(&self) -> bool {
        self.workers_force_killed == 0
    }
}

impl fmt::Display for HarnessReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Run complete ({}): {} records across {} worker(s) in {:?}, {} stopped, {} force-killed",
            self.termination,
            self.total_records(),
            self.workers.len(),
            self.elapsed,
            self.workers_stopped,
            self.workers_force_killed
        )
    }
}

enum RaceWinner {
    Timer,
    Workers(Vec<Result<Result<WorkerStats, WorkerError>, JoinError>>),
    Producer(Result<Result<(), Box<dyn Error + Send + Sync>>, JoinError>),
}

/// Drives one complete consumption run
pub struct StreamHarness {
    config: HarnessConfig,
    source: Arc<dyn RecordStreamSource>,
    capacity: Option<Arc<dyn CapacityApi>>,
    store: Arc<dyn CheckpointStore>,
    metrics: Arc<dyn MetricsSink>,
    hook: RecordHook,
    batch_observer: Option<mpsc::UnboundedSender<BatchSummary>>,
}

impl StreamHarness {
    pub fn new(
        config: HarnessConfig,
        source: Arc<dyn RecordStreamSource>,
        store: Arc<dyn CheckpointStore>,
    ) -> Self {
        Self {
            config,
            source,
            capacity: None,
            store,
            metrics: Arc::new(NoopMetricsSink),
            hook: noop_hook(),
            batch_observer: None,
        }
    }

    /// Capacity API used by the resharding trigger; without it the trigger
    /// is a no-op regardless of configuration
    pub fn with_capacity_api(mut self, capacity: Arc<dyn CapacityApi>) -> Self {
        self.capacity = Some(capacity);
        self
    }

    pub fn with_metrics(mut self, metrics: Arc<dyn MetricsSink>) -> Self {
        self.metrics = metrics;
        self
    }

    pub fn with_record_hook(mut self, hook: RecordHook) -> Self {
        self.hook = hook;
        self
    }

    pub fn with_batch_observer(mut self, observer: mpsc::UnboundedSender<BatchSummary>) -> Self {
        self.batch_observer = Some(observer);
        self
    }

    /// Run without an attached producer: the race is timer vs. workers
    pub async fn run(&self) -> Result<HarnessReport, HarnessError> {
        self.run_with_producer(None).await
    }

    /// Run the harness to completion
    pub async fn run_with_producer(
        &self,
        producer: Option<ProducerHandle>,
    ) -> Result<HarnessReport, HarnessError> {
        let started_at = Utc::now();
        let started = Instant::now();
        self.config.validate()?;

        let shards = self
            .source
            .list_shards()
            .await
            .map_err(|err| HarnessError::Setup {
                message: format!("failed to list shards: {}", err),
            })?;
        if shards.is_empty() {
            return Err(HarnessError::Setup {
                message: "stream has no shards".to_string(),
            });
        }
        info!(
            "Harness starting: {} worker(s) over {} shard(s), run length {:?}",
            self.config.worker_count,
            shards.len(),
            self.config.run_length
        );

        let mut signals: Vec<ShutdownSignal> = Vec::new();
        let mut handles: Vec<(String, JoinHandle<Result<WorkerStats, WorkerError>>)> = Vec::new();
        for index in 0..self.config.worker_count {
            let mut worker = Worker::new(
                index,
                self.config.worker_count,
                Arc::clone(&self.source),
                Arc::clone(&self.store),
            )
            .with_policy(self.config.batching_policy())
            .with_delivery(self.config.delivery_mode())
            .with_fail_fast(self.config.fail_fast)
            .with_metrics(Arc::clone(&self.metrics))
            .with_hook(Arc::clone(&self.hook));
            if let Some(observer) = &self.batch_observer {
                worker = worker.with_batch_observer(observer.clone());
            }
            signals.push(worker.shutdown_signal());
            let worker_id = worker.id().to_string();
            handles.push((worker_id, tokio::spawn(worker.run())));
        }

        let reshard_handle: Option<JoinHandle<Option<usize>>> =
            match (&self.capacity, self.config.reshard_after) {
                (Some(capacity), Some(_)) => {
                    let trigger = ReshardingTrigger::new(
                        Arc::clone(&self.source),
                        Arc::clone(capacity),
                        self.config.reshard_after,
                        self.config.reshard_factor,
                    );
                    Some(tokio::spawn(trigger.run()))
                }
                _ => None,
            };

        let mut producer = producer;
        let winner = {
            let run_timer = async {
                match self.config.run_length {
                    Some(length) => tokio::time::sleep(length).await,
                    None => std::future::pending::<()>().await,
                }
            };
            let producer_done = async {
                match producer.as_mut() {
                    Some(handle) => handle.await,
                    None => std::future::pending().await,
                }
            };
            let workers_done =
                futures::future::join_all(handles.iter_mut().map(|(_, handle)| handle));
            tokio::select! {
                _ = run_timer => RaceWinner::Timer,
                results = workers_done => RaceWinner::Workers(results),
                result = producer_done => RaceWinner::Producer(result),
            }
        };

        // Interrupt the producer first, then the workers.
        if let Some(handle) = producer.take() {
            handle.abort();
        }

        let (termination, finished) = match winner {
            RaceWinner::Timer => (TerminationCause::Timer, None),
            RaceWinner::Workers(results) => (TerminationCause::WorkersCompleted, Some(results)),
            RaceWinner::Producer(result) => {
                let cause = match result {
                    Ok(Ok(())) => TerminationCause::ProducerFinished,
                    Ok(Err(err)) => TerminationCause::ProducerFailed {
                        cause: err.to_string(),
                    },
                    Err(err) => TerminationCause::ProducerFailed {
                        cause: format!("producer task ended abnormally: {}", err),
                    },
                };
                (cause, None)
            }
        };
        info!("Run terminating: {}", termination);

        let mut workers: Vec<WorkerReport> = Vec::new();
        let mut workers_stopped = 0;
        let mut workers_force_killed = 0;
        match finished {
            Some(results) => {
                for ((worker_id, _), joined) in handles.into_iter().zip(results) {
                    workers.push(worker_report(worker_id, joined));
                    workers_stopped += 1;
                }
            }
            None => {
                for signal in &signals {
                    signal.trigger();
                }
                for (worker_id, mut handle) in handles {
                    match tokio::time::timeout(self.config.shutdown_grace, &mut handle).await {
                        Ok(joined) => {
                            workers.push(worker_report(worker_id, joined));
                            workers_stopped += 1;
                        }
                        Err(_) => {
                            warn!(
                                "Worker '{}' did not drain within {:?}, aborting",
                                worker_id, self.config.shutdown_grace
                            );
                            handle.abort();
                            workers.push(WorkerReport {
                                worker_id,
                                outcome: WorkerRunOutcome::ForceKilled,
                            });
                            workers_force_killed += 1;
                        }
                    }
                }
            }
        }

        let reshard_requested = match reshard_handle {
            Some(handle) => {
                if handle.is_finished() {
                    handle.await.unwrap_or(None)
                } else {
                    handle.abort();
                    None
                }
            }
            None => None,
        };

        if self.config.fail_on_producer_error {
            if let TerminationCause::ProducerFailed { cause } = &termination {
                error!("Aborting run, producer failed: {}", cause);
                return Err(HarnessError::Producer {
                    cause: cause.clone(),
                });
            }
        }

        let report = HarnessReport {
            started_at,
            termination,
            workers,
            reshard_requested,
            workers_stopped,
            workers_force_killed,
            elapsed: started.elapsed(),
        };
        info!("{}", report);
        Ok(report)
    }
}

fn worker_report(
    worker_id: String,
    joined: Result<Result<WorkerStats, WorkerError>, JoinError>,
) -> WorkerReport {
    let outcome = match joined {
        Ok(Ok(stats)) => WorkerRunOutcome::Completed(stats),
        Ok(Err(err)) => WorkerRunOutcome::Failed {
            cause: err.to_string(),
        },
        Err(err) => WorkerRunOutcome::Failed {
            cause: format!("worker task ended abnormally: {}", err),
        },
    };
    WorkerReport { worker_id, outcome }
}
