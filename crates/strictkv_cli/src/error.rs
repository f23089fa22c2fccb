//! CLI error type.

use thiserror::Error;

/// Errors reported by CLI commands.
#[derive(Debug, Error)]
pub enum CliError {
    /// Database operation failed.
    #[error("database error: {0}")]
    Database(#[from] strictkv_core::Error),

    /// Output could not be serialized.
    #[error("serialization error: {0}")]
    Json(#[from] serde_json::Error),

    /// Arguments were rejected.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
}

/// Result type for CLI commands.
pub type CliResult<T> = Result<T, CliError>;
