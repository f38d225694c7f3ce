//! Demo harness run against the in-memory stream
//!
//! Spins up an in-memory partitioned stream, a synthetic producer appending
//! records round-robin across the shards, and the consumption harness, then
//! prints the final report.

use clap::Parser;
use log::info;
use shardflow::{
    HarnessConfig, InMemoryCheckpointStore, InMemoryStream, PrometheusMetricsSink, ProducerHandle,
    RecordStreamSource, StreamHarness,
};
use std::sync::Arc;
use std::time::Duration;

#[derive(Parser)]
#[command(name = "shardflow-demo")]
#[command(about = "Run the shard-consumption harness against an in-memory stream")]
#[command(version = "0.1.0")]
struct Cli {
    /// Initial number of shards
    #[arg(long, default_value = "4")]
    shards: usize,

    /// Number of concurrent workers
    #[arg(long, default_value = "2")]
    workers: usize,

    /// Total records the producer appends before finishing
    #[arg(long, default_value = "1000")]
    records: u64,

    /// Pause between produced records, in milliseconds
    #[arg(long, default_value = "1")]
    produce_interval_ms: u64,

    /// Maximum records per batch
    #[arg(long, default_value = "100")]
    batch_size: usize,

    /// Batch aggregation window, in milliseconds
    #[arg(long, default_value = "1000")]
    batch_window_ms: u64,

    /// Overall run-length timer, in milliseconds
    #[arg(long)]
    run_length_ms: Option<u64>,

    /// Delay before the one-shot resharding request, in milliseconds
    #[arg(long)]
    reshard_after_ms: Option<u64>,

    /// Shard-count multiplier for the resharding request
    #[arg(long, default_value = "2.0")]
    reshard_factor: f64,

    /// Use pull-based polling delivery instead of fan-out
    #[arg(long)]
    polling: bool,

    /// Print the report as JSON instead of text
    #[arg(long)]
    json: bool,

    /// Print the Prometheus metrics after the run
    #[arg(long)]
    dump_metrics: bool,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let cli = Cli::parse();

    let stream = InMemoryStream::new("demo", cli.shards);
    let store = InMemoryCheckpointStore::new();
    let metrics = Arc::new(PrometheusMetricsSink::new()?);

    let mut config = HarnessConfig::new()
        .with_worker_count(cli.workers)
        .with_batching(cli.batch_size, Duration::from_millis(cli.batch_window_ms))
        .with_enhanced_fan_out(!cli.polling);
    if let Some(ms) = cli.run_length_ms {
        config = config.with_run_length(Duration::from_millis(ms));
    }
    if let Some(ms) = cli.reshard_after_ms {
        config = config.with_resharding(Duration::from_millis(ms), cli.reshard_factor);
    }

    let producer = spawn_producer(stream.clone(), cli.records, cli.produce_interval_ms);

    let harness = StreamHarness::new(config, Arc::new(stream.clone()), Arc::new(store))
        .with_capacity_api(Arc::new(stream))
        .with_metrics(metrics.clone());
    let report = harness.run_with_producer(Some(producer)).await?;

    if cli.json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        println!("{}", report);
    }
    if cli.dump_metrics {
        println!("{}", metrics.export()?);
    }
    Ok(())
}

/// Append `total` records round-robin across the stream's shards, then
/// close every shard so the consumers drain and finish.
fn spawn_producer(stream: InMemoryStream, total: u64, interval_ms: u64) -> ProducerHandle {
    tokio::spawn(async move {
        let shards = stream.list_shards().await?;
        info!(
            "Producer starting: {} records across {} shard(s)",
            total,
            shards.len()
        );
        for i in 0..total {
            let shard = &shards[(i as usize) % shards.len()];
            let payload = format!("record-{}", i).into_bytes();
            stream.append(shard, payload).await?;
            if interval_ms > 0 {
                tokio::time::sleep(Duration::from_millis(interval_ms)).await;
            }
        }
        stream.close_all().await;
        info!("Producer finished after {} records", total);
        Ok(())
    })
}
