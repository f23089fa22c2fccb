//! Error types for the StrictKV client.

use strictkv_backend::{codes, BackendError};
use thiserror::Error;

/// Result type for client operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors surfaced by the client.
///
/// Only [`Error::Backend`] is ever handed to `on_error` by the retry loop.
/// The other variants are local and always terminal.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Error {
    /// A local precondition was violated (closed database, bad prefix, ...).
    #[error("invalid operation: {message}")]
    InvalidOperation {
        /// Why the call was rejected.
        message: String,
    },

    /// A nonzero code returned by the backend.
    #[error("backend error: {0}")]
    Backend(BackendError),

    /// A future was cancelled before it settled.
    #[error("operation cancelled")]
    OperationCancelled,
}

impl Error {
    /// Creates an invalid operation error.
    pub fn invalid_operation(message: impl Into<String>) -> Self {
        Self::InvalidOperation {
            message: message.into(),
        }
    }

    /// Creates a backend error from a native code.
    #[must_use]
    pub fn from_code(code: i32) -> Self {
        Self::from(BackendError::new(code))
    }

    /// Returns the native code this error corresponds to.
    #[must_use]
    pub fn code(&self) -> i32 {
        match self {
            Self::InvalidOperation { .. } => codes::CLIENT_INVALID_OPERATION,
            Self::Backend(err) => err.code(),
            Self::OperationCancelled => codes::OPERATION_CANCELLED,
        }
    }

    /// Returns true for `not_committed`, the usual optimistic conflict.
    #[must_use]
    pub fn is_conflict(&self) -> bool {
        matches!(self, Self::Backend(err) if err.code() == codes::NOT_COMMITTED)
    }
}

impl From<BackendError> for Error {
    fn from(err: BackendError) -> Self {
        if err.code() == codes::OPERATION_CANCELLED {
            Self::OperationCancelled
        } else {
            Self::Backend(err)
        }
    }
}

/// Error types that can flow through [`crate::Database::transact`].
///
/// The retry loop only needs two things from a caller's error type: a way
/// to wrap client errors, and a way to tell whether a value carries a
/// backend code worth handing to `on_error`. Values that carry none are
/// returned to the caller untouched on the first occurrence.
///
/// # Example
///
/// ```rust
/// use strictkv_core::{BackendError, Error, TransactError};
///
/// #[derive(Debug)]
/// enum AppError {
///     Db(Error),
///     Validation(String),
/// }
///
/// impl From<Error> for AppError {
///     fn from(err: Error) -> Self {
///         AppError::Db(err)
///     }
/// }
///
/// impl TransactError for AppError {
///     fn backend_error(&self) -> Option<BackendError> {
///         match self {
///             AppError::Db(err) => err.backend_error(),
///             AppError::Validation(_) => None,
///         }
///     }
/// }
/// ```
pub trait TransactError: From<Error> {
    /// The backend error carried by this value, if any.
    fn backend_error(&self) -> Option<BackendError>;
}

impl TransactError for Error {
    fn backend_error(&self) -> Option<BackendError> {
        match self {
            Self::Backend(err) => Some(*err),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cancellation_code_maps_to_variant() {
        let err = Error::from(BackendError::new(codes::OPERATION_CANCELLED));
        assert_eq!(err, Error::OperationCancelled);
        assert_eq!(err.code(), codes::OPERATION_CANCELLED);
        assert_eq!(err.backend_error(), None);
    }

    #[test]
    fn backend_errors_are_retry_candidates() {
        let err = Error::from_code(codes::NOT_COMMITTED);
        assert!(err.is_conflict());
        assert_eq!(err.backend_error().map(BackendError::code), Some(1020));
    }

    #[test]
    fn invalid_operation_is_local() {
        let err = Error::invalid_operation("database is closed");
        assert_eq!(err.code(), codes::CLIENT_INVALID_OPERATION);
        assert_eq!(err.backend_error(), None);
        assert_eq!(err.to_string(), "invalid operation: database is closed");
    }

    #[test]
    fn display_includes_description() {
        let err = Error::from_code(codes::NOT_COMMITTED);
        assert!(err.to_string().contains("1020"));
    }
}
