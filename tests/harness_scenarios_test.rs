//! End-to-end harness scenarios: raced termination, resharding, shutdown

use shardflow::{
    HarnessConfig, InMemoryCheckpointStore, InMemoryStream, ProducerHandle, RecordStreamSource,
    StreamHarness, TerminationCause, WorkerRunOutcome,
};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// With workers that would run forever, the run-length timer wins the race
/// and the harness returns within a bounded grace period.
#[tokio::test]
async fn test_run_length_timer_terminates_idle_workers() {
    // Open shards, no records, no producer: workers wait indefinitely
    let stream = InMemoryStream::new("test", 3);
    let store = InMemoryCheckpointStore::new();

    let harness = StreamHarness::new(
        HarnessConfig::new()
            .with_worker_count(2)
            .with_run_length(Duration::from_millis(300))
            .with_shutdown_grace(Duration::from_secs(2)),
        Arc::new(stream),
        Arc::new(store),
    );

    let started = Instant::now();
    let report = harness.run().await.unwrap();
    let elapsed = started.elapsed();

    assert_eq!(report.termination, TerminationCause::Timer);
    assert!(elapsed >= Duration::from_millis(300));
    assert!(elapsed < Duration::from_secs(3));
    assert_eq!(report.workers.len(), 2);
    assert!(report.all_graceful());
    assert!(report
        .workers
        .iter()
        .all(|w| matches!(w.outcome, WorkerRunOutcome::Completed(_))));
}

/// Resharding configured at delay 200ms with factor 2 on a 2-shard stream:
/// exactly one capacity-change request for 4 shards, independent of worker
/// activity.
#[tokio::test]
async fn test_resharding_trigger_fires_once_during_run() {
    let stream = InMemoryStream::new("test", 2);
    let store = InMemoryCheckpointStore::new();

    let harness = StreamHarness::new(
        HarnessConfig::new()
            .with_worker_count(1)
            .with_run_length(Duration::from_millis(600))
            .with_resharding(Duration::from_millis(200), 2.0),
        Arc::new(stream.clone()),
        Arc::new(store),
    )
    .with_capacity_api(Arc::new(stream.clone()));

    let report = harness.run().await.unwrap();

    assert_eq!(report.reshard_requested, Some(4));
    let requests = stream.capacity_requests().await;
    assert_eq!(requests.len(), 1);
    assert_eq!(requests[0].target_shards, 4);
    assert_eq!(stream.shard_count().await, 4);
}

/// When the run ends before the resharding delay elapses, no capacity
/// change is ever requested.
#[tokio::test]
async fn test_resharding_cancelled_when_run_ends_first() {
    let stream = InMemoryStream::new("test", 2);
    let store = InMemoryCheckpointStore::new();

    let harness = StreamHarness::new(
        HarnessConfig::new()
            .with_worker_count(1)
            .with_run_length(Duration::from_millis(100))
            .with_resharding(Duration::from_millis(2000), 2.0),
        Arc::new(stream.clone()),
        Arc::new(store),
    )
    .with_capacity_api(Arc::new(stream.clone()));

    let report = harness.run().await.unwrap();

    assert_eq!(report.reshard_requested, None);
    assert!(stream.capacity_requests().await.is_empty());
    assert_eq!(stream.shard_count().await, 2);
}

/// Producer termination wins the race when workers would keep waiting, and
/// everything staged up to the shutdown boundary is checkpointed.
#[tokio::test]
async fn test_producer_completion_terminates_run() {
    let stream = InMemoryStream::new("test", 2);
    let store = InMemoryCheckpointStore::new();

    let producer_stream = stream.clone();
    let producer: ProducerHandle = tokio::spawn(async move {
        let shards = producer_stream.list_shards().await?;
        for i in 0..50u32 {
            let shard = &shards[(i as usize) % shards.len()];
            producer_stream
                .append(shard, i.to_be_bytes().to_vec())
                .await?;
        }
        // Leave the shards open so only the producer can end the race,
        // and give the consumers time to drain what was appended.
        tokio::time::sleep(Duration::from_millis(400)).await;
        Ok(())
    });

    let harness = StreamHarness::new(
        HarnessConfig::new()
            .with_worker_count(2)
            .with_batching(10, Duration::from_millis(50))
            .with_shutdown_grace(Duration::from_secs(2)),
        Arc::new(stream),
        Arc::new(store.clone()),
    );
    let report = harness.run_with_producer(Some(producer)).await.unwrap();

    assert_eq!(report.termination, TerminationCause::ProducerFinished);
    assert_eq!(report.total_records(), 50);
    assert!(report.all_graceful());
}

/// A failing producer ends the run and is reported as the cause, without
/// failing the run unless configured to.
#[tokio::test]
async fn test_producer_failure_reported_not_fatal_by_default() {
    let stream = InMemoryStream::new("test", 1);
    let store = InMemoryCheckpointStore::new();

    let producer: ProducerHandle = tokio::spawn(async {
        tokio::time::sleep(Duration::from_millis(50)).await;
        Err("upstream connection lost".to_string().into())
    });

    let harness = StreamHarness::new(
        HarnessConfig::new().with_worker_count(1),
        Arc::new(stream),
        Arc::new(store),
    );
    let report = harness.run_with_producer(Some(producer)).await.unwrap();

    match &report.termination {
        TerminationCause::ProducerFailed { cause } => {
            assert!(cause.contains("upstream connection lost"));
        }
        other => panic!("unexpected termination: {:?}", other),
    }
    assert_eq!(report.workers.len(), 1);
}

/// One worker failing never suppresses collection of the other workers'
/// outcomes.
#[tokio::test]
async fn test_worker_failure_does_not_suppress_sibling_outcomes() {
    let stream = InMemoryStream::new("test", 4);
    let store = InMemoryCheckpointStore::new();

    // Worker 1 owns shards 1 and 3 under index-modulo assignment; break
    // one of its shards and let everything else complete.
    let shards = stream.list_shards().await.unwrap();
    for (i, shard) in shards.iter().enumerate() {
        if i == 1 {
            stream
                .inject_failure(shard, "simulated outage")
                .await
                .unwrap();
        } else {
            for n in 0..10u32 {
                stream.append(shard, n.to_be_bytes().to_vec()).await.unwrap();
            }
        }
    }
    stream.close_all().await;

    let harness = StreamHarness::new(
        HarnessConfig::new().with_worker_count(2).with_fail_fast(true),
        Arc::new(stream),
        Arc::new(store),
    );
    let report = harness.run().await.unwrap();

    assert_eq!(report.termination, TerminationCause::WorkersCompleted);
    assert_eq!(report.workers.len(), 2);

    let worker_0 = report
        .workers
        .iter()
        .find(|w| w.worker_id == "worker-0")
        .unwrap();
    let worker_1 = report
        .workers
        .iter()
        .find(|w| w.worker_id == "worker-1")
        .unwrap();

    match &worker_0.outcome {
        WorkerRunOutcome::Completed(stats) => {
            assert_eq!(stats.records_processed, 20);
        }
        other => panic!("unexpected outcome for worker-0: {:?}", other),
    }
    match &worker_1.outcome {
        WorkerRunOutcome::Failed { cause } => {
            assert!(cause.contains("simulated outage"));
        }
        other => panic!("unexpected outcome for worker-1: {:?}", other),
    }
}
