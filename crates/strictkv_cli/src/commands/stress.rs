//! Stress command implementation.

use crate::error::{CliError, CliResult};
use crate::Format;
use std::time::Duration;
use strictkv_core::codes;
use strictkv_testkit::{
    stress_counter_contention, sum_counters, StressConfig, StressTestResult, TestDatabase,
};

/// Arguments for the stress command.
#[derive(Debug, Clone)]
pub struct StressArgs {
    /// Number of worker threads.
    pub threads: usize,
    /// Transactions per thread.
    pub increments: usize,
    /// Number of distinct counters.
    pub keys: usize,
    /// Threaded delivery delay, if any.
    pub delay_ms: Option<u64>,
    /// Conflicts to inject up front.
    pub conflicts: usize,
}

/// Runs the stress command.
pub fn run(args: &StressArgs, format: Format) -> CliResult<()> {
    if args.threads == 0 || args.keys == 0 {
        return Err(CliError::InvalidArgument(
            "threads and keys must be at least 1".to_string(),
        ));
    }

    let db = match args.delay_ms {
        Some(ms) => TestDatabase::threaded(Duration::from_millis(ms)),
        None => TestDatabase::memory(),
    };
    db.backend
        .fail_next_commits(std::iter::repeat(codes::NOT_COMMITTED).take(args.conflicts));

    let config = StressConfig {
        threads: args.threads,
        increments_per_thread: args.increments,
        keys: args.keys,
        ..Default::default()
    };
    tracing::info!(
        threads = config.threads,
        increments = config.increments_per_thread,
        keys = config.keys,
        "starting stress run"
    );

    let result = stress_counter_contention(&db, &config);
    let total = sum_counters(&db, &config)?;
    if total != result.successful_ops as u64 {
        tracing::error!(
            total,
            committed = result.successful_ops,
            "counter total does not match committed transactions"
        );
    }

    print(&result, total, format)
}

fn print(result: &StressTestResult, total: u64, format: Format) -> CliResult<()> {
    match format {
        Format::Json => println!("{}", result.to_json()?),
        Format::Text => {
            result.print_summary("Counter contention");
            println!("Counter total: {}", total);
        }
    }
    Ok(())
}
