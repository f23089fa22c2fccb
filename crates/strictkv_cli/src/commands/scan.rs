//! Scan command implementation.

use crate::error::CliResult;
use crate::Format;
use serde::Serialize;
use strictkv_core::{prefix_range, KeyValue, RangeOptions, Result, StreamingMode};
use strictkv_testkit::TestDatabase;

/// Arguments for the scan command.
#[derive(Debug, Clone)]
pub struct ScanArgs {
    /// Rows to seed.
    pub rows: usize,
    /// Key prefix.
    pub prefix: String,
    /// Row limit (0 = unlimited).
    pub limit: usize,
    /// Streaming mode.
    pub mode: StreamingMode,
    /// Descending order.
    pub reverse: bool,
    /// Snapshot read.
    pub snapshot: bool,
}

/// One scanned row.
#[derive(Debug, Serialize)]
pub struct Row {
    /// Key, lossily decoded as UTF-8.
    pub key: String,
    /// Value length in bytes.
    pub value_len: usize,
}

/// Scan result.
#[derive(Debug, Serialize)]
pub struct ScanResult {
    /// Rows seeded before the scan.
    pub seeded: usize,
    /// Rows returned.
    pub returned: usize,
    /// Committed version after seeding.
    pub version: i64,
    /// The rows.
    pub rows: Vec<Row>,
}

/// Runs the scan command.
pub fn run(args: &ScanArgs, format: Format) -> CliResult<()> {
    let db = TestDatabase::memory();
    db.seed(&args.prefix, args.rows)?;

    let range = prefix_range(args.prefix.as_bytes())?;
    let options = RangeOptions::new()
        .limit(args.limit)
        .mode(args.mode)
        .reverse(args.reverse);
    let snapshot = args.snapshot;

    let rows = db.transact(|tr| -> Result<Vec<KeyValue>> {
        let result = if snapshot {
            tr.snapshot().get_range(range.clone(), options)
        } else {
            tr.get_range(range.clone(), options)
        };
        result.iter().collect()
    })?;

    let result = ScanResult {
        seeded: args.rows,
        returned: rows.len(),
        version: db.engine().committed_version(),
        rows: rows
            .into_iter()
            .map(|kv| Row {
                key: String::from_utf8_lossy(&kv.key).into_owned(),
                value_len: kv.value.len(),
            })
            .collect(),
    };

    match format {
        Format::Json => println!("{}", serde_json::to_string_pretty(&result)?),
        Format::Text => {
            println!("Seeded: {}", result.seeded);
            println!("Returned: {}", result.returned);
            println!("Version: {}", result.version);
            for row in &result.rows {
                println!("  {} ({} bytes)", row.key, row.value_len);
            }
        }
    }
    Ok(())
}
