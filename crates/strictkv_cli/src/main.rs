//! StrictKV CLI
//!
//! Command-line tools for exercising the StrictKV transaction engine.
//!
//! # Commands
//!
//! - `stress` - Run contended read-modify-write transactions
//! - `scan` - Seed rows and read them back with range options
//! - `version` - Show version information

mod commands;
mod error;

use clap::{Parser, Subcommand, ValueEnum};
use strictkv_core::StreamingMode;
use tracing_subscriber::EnvFilter;

/// StrictKV command-line tools.
#[derive(Parser)]
#[command(name = "strictkv")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(global = true, short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

/// Output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum Format {
    /// Human-readable text
    Text,
    /// Pretty-printed JSON
    Json,
}

/// Streaming mode names accepted on the command line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum Mode {
    /// Fetch everything in one chunk
    WantAll,
    /// Grow chunk sizes as the scan proceeds
    Iterator,
    /// Fetch exactly the limit
    Exact,
    /// Small chunks
    Small,
    /// Medium chunks
    Medium,
    /// Large chunks
    Large,
    /// Everything, fetched serially
    Serial,
}

impl From<Mode> for StreamingMode {
    fn from(mode: Mode) -> Self {
        match mode {
            Mode::WantAll => StreamingMode::WantAll,
            Mode::Iterator => StreamingMode::Iterator,
            Mode::Exact => StreamingMode::Exact,
            Mode::Small => StreamingMode::Small,
            Mode::Medium => StreamingMode::Medium,
            Mode::Large => StreamingMode::Large,
            Mode::Serial => StreamingMode::Serial,
        }
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Run contended read-modify-write transactions
    Stress {
        /// Number of worker threads
        #[arg(short, long, default_value = "4")]
        threads: usize,

        /// Transactions per thread
        #[arg(short, long, default_value = "250")]
        increments: usize,

        /// Number of distinct counter keys
        #[arg(short, long, default_value = "4")]
        keys: usize,

        /// Deliver completions from worker threads after this delay
        #[arg(long)]
        delay_ms: Option<u64>,

        /// Inject this many conflicts before the first commit lands
        #[arg(long, default_value = "0")]
        conflicts: usize,

        /// Output format
        #[arg(short, long, value_enum, default_value = "text")]
        format: Format,
    },

    /// Seed rows and read them back with range options
    Scan {
        /// Number of rows to seed
        #[arg(short, long, default_value = "100")]
        rows: usize,

        /// Key prefix for the seeded rows
        #[arg(short, long, default_value = "row/")]
        prefix: String,

        /// Maximum rows to return (0 = unlimited)
        #[arg(short, long, default_value = "0")]
        limit: usize,

        /// Streaming mode
        #[arg(short, long, value_enum, default_value = "iterator")]
        mode: Mode,

        /// Scan in descending key order
        #[arg(long)]
        reverse: bool,

        /// Use a snapshot read
        #[arg(long)]
        snapshot: bool,

        /// Output format
        #[arg(short, long, value_enum, default_value = "text")]
        format: Format,
    },

    /// Show version information
    Version,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    // Initialize logging
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        if cli.verbose {
            EnvFilter::new("debug")
        } else {
            EnvFilter::new("info")
        }
    });
    tracing_subscriber::fmt().with_env_filter(filter).init();

    match cli.command {
        Commands::Stress {
            threads,
            increments,
            keys,
            delay_ms,
            conflicts,
            format,
        } => {
            let args = commands::stress::StressArgs {
                threads,
                increments,
                keys,
                delay_ms,
                conflicts,
            };
            commands::stress::run(&args, format)?;
        }
        Commands::Scan {
            rows,
            prefix,
            limit,
            mode,
            reverse,
            snapshot,
            format,
        } => {
            let args = commands::scan::ScanArgs {
                rows,
                prefix,
                limit,
                mode: mode.into(),
                reverse,
                snapshot,
            };
            commands::scan::run(&args, format)?;
        }
        Commands::Version => {
            println!("StrictKV CLI v{}", env!("CARGO_PKG_VERSION"));
        }
    }

    Ok(())
}
