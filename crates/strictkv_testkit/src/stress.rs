//! Contention stress runs.
//!
//! These runs hammer a handful of counter keys from several threads with
//! read-modify-write transactions, so most attempts conflict and the
//! retry loop does real work.

use crate::fixtures::{decode_u64, read_counter};
use rand::Rng;
use serde::Serialize;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread;
use std::time::{Duration, Instant};
use strictkv_core::{Database, Result};

/// Result of a stress test run.
#[derive(Debug, Clone, Serialize)]
pub struct StressTestResult {
    /// Total transactions run.
    pub total_ops: usize,
    /// Transactions that committed.
    pub successful_ops: usize,
    /// Transactions that returned an error.
    pub failed_ops: usize,
    /// Times the work closure ran, retries included.
    pub attempts: usize,
    /// Wall-clock duration in milliseconds.
    pub duration_ms: u128,
    /// Committed transactions per second.
    pub ops_per_second: f64,
}

impl StressTestResult {
    /// Creates a new result.
    pub fn new(successful: usize, failed: usize, attempts: usize, duration: Duration) -> Self {
        let ops_per_second = if duration.as_secs_f64() > 0.0 {
            successful as f64 / duration.as_secs_f64()
        } else {
            0.0
        };

        Self {
            total_ops: successful + failed,
            successful_ops: successful,
            failed_ops: failed,
            attempts,
            duration_ms: duration.as_millis(),
            ops_per_second,
        }
    }

    /// Attempts that were discarded and retried.
    pub fn retries(&self) -> usize {
        self.attempts.saturating_sub(self.total_ops)
    }

    /// Prints a summary of the test.
    pub fn print_summary(&self, name: &str) {
        println!("\n=== {} ===", name);
        println!("Transactions: {}", self.total_ops);
        println!("Committed: {}", self.successful_ops);
        println!("Failed: {}", self.failed_ops);
        println!("Attempts: {} ({} retries)", self.attempts, self.retries());
        println!("Duration: {} ms", self.duration_ms);
        println!("Throughput: {:.2} tx/sec", self.ops_per_second);
    }

    /// Serializes the result as pretty-printed JSON.
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }
}

/// Configuration for stress tests.
#[derive(Debug, Clone)]
pub struct StressConfig {
    /// Number of concurrent threads.
    pub threads: usize,
    /// Transactions per thread.
    pub increments_per_thread: usize,
    /// Number of distinct counter keys.
    pub keys: usize,
    /// Key prefix for the counters.
    pub prefix: String,
}

impl Default for StressConfig {
    fn default() -> Self {
        Self {
            threads: 4,
            increments_per_thread: 250,
            keys: 4,
            prefix: "stress/counter/".to_string(),
        }
    }
}

impl StressConfig {
    /// Key of counter `index`.
    pub fn counter_key(&self, index: usize) -> String {
        format!("{}{index:04}", self.prefix)
    }
}

/// Runs read-modify-write increments of random counters from every thread.
pub fn stress_counter_contention(db: &Database, config: &StressConfig) -> StressTestResult {
    let successful = AtomicUsize::new(0);
    let failed = AtomicUsize::new(0);
    let attempts = AtomicUsize::new(0);
    let start = Instant::now();

    thread::scope(|scope| {
        for _ in 0..config.threads {
            scope.spawn(|| {
                let mut rng = rand::thread_rng();
                for _ in 0..config.increments_per_thread {
                    let key = config.counter_key(rng.gen_range(0..config.keys.max(1)));
                    let outcome = db.transact(|tr| -> Result<()> {
                        attempts.fetch_add(1, Ordering::Relaxed);
                        let current = tr.get(&key).get()?.map_or(0, |v| decode_u64(&v));
                        tr.set(&key, (current + 1).to_le_bytes());
                        Ok(())
                    });
                    match outcome {
                        Ok(()) => successful.fetch_add(1, Ordering::Relaxed),
                        Err(err) => {
                            tracing::warn!(%err, "stress transaction failed");
                            failed.fetch_add(1, Ordering::Relaxed)
                        }
                    };
                }
            });
        }
    });

    StressTestResult::new(
        successful.into_inner(),
        failed.into_inner(),
        attempts.into_inner(),
        start.elapsed(),
    )
}

/// Sums every counter written by [`stress_counter_contention`].
pub fn sum_counters(db: &Database, config: &StressConfig) -> Result<u64> {
    (0..config.keys.max(1))
        .map(|i| read_counter(db, config.counter_key(i).as_bytes()))
        .sum()
}
