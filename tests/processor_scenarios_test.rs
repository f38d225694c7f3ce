//! Shard processor aggregation-window and error-classification scenarios

use shardflow::{
    BatchCloseReason, BatchSummary, BatchingPolicy, DeliveryMode, InMemoryCheckpointStore,
    InMemoryStream, RecordStreamSource, ShardId, ShardOutcome, ShardProcessor, ShutdownSignal,
    StreamPosition,
};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

async fn subscribe(
    stream: &InMemoryStream,
    shard: &ShardId,
) -> shardflow::RecordStream {
    stream
        .subscribe(shard, StreamPosition::TrimHorizon, DeliveryMode::FanOut)
        .await
        .unwrap()
}

/// 250 steadily produced records with batch size 100: two full batches close
/// by size, the trailing 50 close when the window elapses, and exactly three
/// checkpoints are committed.
#[tokio::test]
async fn test_250_records_produce_exactly_three_commits() {
    let stream = InMemoryStream::new("test", 1);
    let store = InMemoryCheckpointStore::new();
    let shard = ShardId::new("shard-0000");
    for i in 0..250u32 {
        stream.append(&shard, i.to_be_bytes().to_vec()).await.unwrap();
    }

    let (observer, mut summaries) = mpsc::unbounded_channel::<BatchSummary>();
    let signal = ShutdownSignal::new();
    let processor = ShardProcessor::new(
        "worker-0",
        shard.clone(),
        BatchingPolicy {
            max_batch_size: 100,
            batch_window: Duration::from_millis(300),
        },
        Arc::new(store.clone()),
        signal.subscribe(),
    )
    .with_batch_observer(observer);

    let subscription = subscribe(&stream, &shard).await;
    let task = tokio::spawn(processor.run(subscription));

    // Give the window time to close the partial batch, then stop.
    tokio::time::sleep(Duration::from_millis(800)).await;
    signal.trigger();
    let outcome = tokio::time::timeout(Duration::from_secs(2), task)
        .await
        .expect("processor did not stop")
        .unwrap();

    match outcome {
        ShardOutcome::Interrupted(stats) => {
            assert_eq!(stats.records_processed, 250);
            assert_eq!(stats.batches_committed, 3);
        }
        other => panic!("unexpected outcome: {:?}", other),
    }

    // Exactly three commits, covering 100, 200 and 250
    assert_eq!(store.history(&shard).await, vec![100, 200, 250]);
    assert_eq!(store.position(&shard).await, Some(250));

    let mut batches = Vec::new();
    while let Ok(summary) = summaries.try_recv() {
        batches.push(summary);
    }
    assert_eq!(batches.len(), 3);
    assert_eq!(batches[0].records, 100);
    assert_eq!(batches[0].close_reason, BatchCloseReason::Size);
    assert_eq!(batches[1].records, 100);
    assert_eq!(batches[1].close_reason, BatchCloseReason::Size);
    assert_eq!(batches[2].records, 50);
    assert_eq!(batches[2].close_reason, BatchCloseReason::Window);
    // The window batch stayed open for at least the configured window
    assert!(batches[2].elapsed >= Duration::from_millis(250));
}

/// No batch ever exceeds the configured maximum size, and checkpoint
/// positions only move forward.
#[tokio::test]
async fn test_batch_bounds_and_checkpoint_monotonicity() {
    let stream = InMemoryStream::new("test", 1);
    let store = InMemoryCheckpointStore::new();
    let shard = ShardId::new("shard-0000");
    for i in 0..137u32 {
        stream.append(&shard, i.to_be_bytes().to_vec()).await.unwrap();
    }
    stream.close_shard(&shard).await.unwrap();

    let (observer, mut summaries) = mpsc::unbounded_channel::<BatchSummary>();
    let processor = ShardProcessor::new(
        "worker-0",
        shard.clone(),
        BatchingPolicy {
            max_batch_size: 25,
            batch_window: Duration::from_millis(100),
        },
        Arc::new(store.clone()),
        ShutdownSignal::new().subscribe(),
    )
    .with_batch_observer(observer);
    let outcome = processor.run(subscribe(&stream, &shard).await).await;
    assert!(matches!(outcome, ShardOutcome::Completed(_)));

    while let Ok(summary) = summaries.try_recv() {
        assert!(summary.records <= 25);
        assert!(summary.first_sequence <= summary.last_sequence);
    }
    let history = store.history(&shard).await;
    assert!(!history.is_empty());
    assert!(history.windows(2).all(|w| w[0] <= w[1]));
    assert_eq!(store.position(&shard).await, Some(137));
}

/// Lease revocation after 40 of 100 records: the checkpoint reflects the
/// staged position and the processor ends cleanly, not with an error.
#[tokio::test]
async fn test_lease_lost_after_40_of_100_records() {
    let stream = InMemoryStream::new("test", 1);
    let store = InMemoryCheckpointStore::new();
    let shard = ShardId::new("shard-0000");
    for i in 0..100u32 {
        stream.append(&shard, i.to_be_bytes().to_vec()).await.unwrap();
    }
    stream.revoke_lease_after(&shard, 40).await.unwrap();

    let processor = ShardProcessor::new(
        "worker-0",
        shard.clone(),
        BatchingPolicy {
            max_batch_size: 10,
            batch_window: Duration::from_secs(5),
        },
        Arc::new(store.clone()),
        ShutdownSignal::new().subscribe(),
    );
    let outcome = processor.run(subscribe(&stream, &shard).await).await;

    match outcome {
        ShardOutcome::LeaseLost(stats) => {
            assert_eq!(stats.records_processed, 40);
            assert_eq!(stats.batches_committed, 4);
        }
        other => panic!("unexpected outcome: {:?}", other),
    }
    assert_eq!(store.position(&shard).await, Some(40));
}

/// A checkpoint-store rejection surfaces as a failure, observably distinct
/// from a lease-lost termination.
#[tokio::test]
async fn test_checkpoint_failure_distinct_from_lease_lost() {
    let stream = InMemoryStream::new("test", 2);
    let store = InMemoryCheckpointStore::new();
    let revoked = ShardId::new("shard-0000");
    let rejected = ShardId::new("shard-0001");
    for shard in [&revoked, &rejected] {
        for i in 0..10u32 {
            stream.append(shard, i.to_be_bytes().to_vec()).await.unwrap();
        }
    }
    stream.revoke_lease(&revoked).await.unwrap();
    store.reject_shard(&rejected, "lease taken over").await;
    stream.close_all().await;

    let policy = BatchingPolicy {
        max_batch_size: 5,
        batch_window: Duration::from_millis(100),
    };

    let lease_outcome = ShardProcessor::new(
        "worker-0",
        revoked.clone(),
        policy.clone(),
        Arc::new(store.clone()),
        ShutdownSignal::new().subscribe(),
    )
    .run(subscribe(&stream, &revoked).await)
    .await;
    assert!(matches!(&lease_outcome, ShardOutcome::LeaseLost(_)));
    assert!(!lease_outcome.is_fatal());

    let checkpoint_outcome = ShardProcessor::new(
        "worker-0",
        rejected.clone(),
        policy,
        Arc::new(store.clone()),
        ShutdownSignal::new().subscribe(),
    )
    .run(subscribe(&stream, &rejected).await)
    .await;
    match checkpoint_outcome {
        ShardOutcome::Failed { error, .. } => {
            assert!(error.to_string().contains("Checkpoint commit failed"));
        }
        other => panic!("unexpected outcome: {:?}", other),
    }
}
