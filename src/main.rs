
use crate::load_test::{LoadTestConfig, run_load_test};
use clap::Parser;
use std::error::Error;

/// Drive a concurrent acquire/release workload against an in-memory pool
#[derive(Parser, Debug)]
#[command(name = "lifopool", version, about)]
struct Args {
    /// How long to run, in seconds
    #[arg(long, default_value_t = 5)]
    duration_secs: u64,

    /// Number of concurrent workers
    #[arg(long, default_value_t = 16)]
    concurrency: usize,

    #[arg(long, default_value_t = 2)]
    min_connections: usize,

    #[arg(long, default_value_t = 8)]
    max_connections: usize,

    /// Idle timeout in milliseconds; omit to keep idle connections forever
    #[arg(long)]
    idle_timeout_ms: Option<u64>,

    /// Time each worker holds a connection, in milliseconds
    #[arg(long, default_value_t = 2)]
    hold_ms: u64,

    /// Percentage of checkouts closed before release, simulating server disconnects
    #[arg(long, default_value_t = 5, value_parser = clap::value_parser!(u8).range(0..=100))]
    close_ratio: u8,

    /// Maximum latency samples kept across all workers
    #[arg(long, default_value_t = 100_000)]
    sample_max: usize,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = Args::parse();
    run_load_test(LoadTestConfig {
        duration_secs: args.duration_secs,
        concurrency: args.concurrency,
        min_connections: args.min_connections,
        max_connections: args.max_connections,
        idle_timeout_ms: args.idle_timeout_ms,
        hold_ms: args.hold_ms,
        close_ratio: args.close_ratio,
        sample_max: args.sample_max,
    })
    .await
}
