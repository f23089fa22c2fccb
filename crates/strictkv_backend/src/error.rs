//! Native error codes.
//!
//! The backend reports failures as small positive integers. Code `0` is
//! success and never appears inside a [`BackendError`].

use std::fmt;

/// Result type for backend calls that fail synchronously.
pub type NativeResult<T> = Result<T, BackendError>;

/// Raw native error code type.
pub type ErrorCode = i32;

/// Well-known native error codes.
pub mod codes {
    use super::ErrorCode;

    /// Operation timed out.
    pub const TIMED_OUT: ErrorCode = 1004;
    /// Read version is too old to serve reads.
    pub const TRANSACTION_TOO_OLD: ErrorCode = 1007;
    /// Requested read version is ahead of the storage servers.
    pub const FUTURE_VERSION: ErrorCode = 1009;
    /// Transaction conflicted with a concurrent commit.
    pub const NOT_COMMITTED: ErrorCode = 1020;
    /// Commit outcome could not be determined.
    pub const COMMIT_UNKNOWN_RESULT: ErrorCode = 1021;
    /// Transaction was cancelled.
    pub const TRANSACTION_CANCELLED: ErrorCode = 1025;
    /// Transaction exceeded its configured timeout.
    pub const TRANSACTION_TIMED_OUT: ErrorCode = 1031;
    /// Too many watches are outstanding.
    pub const TOO_MANY_WATCHES: ErrorCode = 1032;
    /// The writer side of a completion was dropped without settling it.
    pub const BROKEN_PROMISE: ErrorCode = 1100;
    /// Asynchronous operation was cancelled.
    pub const OPERATION_CANCELLED: ErrorCode = 1101;
    /// Invalid API call for the current handle state.
    pub const CLIENT_INVALID_OPERATION: ErrorCode = 2000;
    /// Key is outside the legal key range.
    pub const KEY_OUTSIDE_LEGAL_RANGE: ErrorCode = 2004;
    /// Range begin is greater than range end.
    pub const INVERTED_RANGE: ErrorCode = 2005;
    /// Option parameter has the wrong shape.
    pub const INVALID_OPTION_VALUE: ErrorCode = 2006;
    /// Option code is not recognised.
    pub const INVALID_OPTION: ErrorCode = 2007;
    /// Operation issued while a commit is outstanding.
    pub const USED_DURING_COMMIT: ErrorCode = 2017;
    /// Transaction exceeds the size limit.
    pub const TRANSACTION_TOO_LARGE: ErrorCode = 2101;
    /// Key exceeds the size limit.
    pub const KEY_TOO_LARGE: ErrorCode = 2102;
    /// Value exceeds the size limit.
    pub const VALUE_TOO_LARGE: ErrorCode = 2103;
    /// `Exact` streaming mode used without a row limit.
    pub const EXACT_MODE_WITHOUT_LIMITS: ErrorCode = 2210;
    /// Unknown error.
    pub const UNKNOWN_ERROR: ErrorCode = 4000;
    /// Internal invariant broken inside the backend.
    pub const INTERNAL_ERROR: ErrorCode = 4100;
}

const DESCRIPTIONS: &[(ErrorCode, &str)] = &[
    (codes::TIMED_OUT, "Operation timed out"),
    (codes::TRANSACTION_TOO_OLD, "Transaction is too old to perform reads or be committed"),
    (codes::FUTURE_VERSION, "Request for future version"),
    (codes::NOT_COMMITTED, "Transaction not committed due to conflict with another transaction"),
    (codes::COMMIT_UNKNOWN_RESULT, "Transaction may or may not have committed"),
    (codes::TRANSACTION_CANCELLED, "Operation aborted because the transaction was cancelled"),
    (codes::TRANSACTION_TIMED_OUT, "Operation aborted because the transaction timed out"),
    (codes::TOO_MANY_WATCHES, "Too many watches currently set"),
    (codes::BROKEN_PROMISE, "Broken promise"),
    (codes::OPERATION_CANCELLED, "Asynchronous operation cancelled"),
    (codes::CLIENT_INVALID_OPERATION, "Invalid API call"),
    (codes::KEY_OUTSIDE_LEGAL_RANGE, "Key outside legal range"),
    (codes::INVERTED_RANGE, "Range begin key larger than end key"),
    (codes::INVALID_OPTION_VALUE, "Option set with an invalid value"),
    (codes::INVALID_OPTION, "Option not valid in this context"),
    (codes::USED_DURING_COMMIT, "Operation issued while a commit was outstanding"),
    (codes::TRANSACTION_TOO_LARGE, "Transaction exceeds byte limit"),
    (codes::KEY_TOO_LARGE, "Key length exceeds limit"),
    (codes::VALUE_TOO_LARGE, "Value length exceeds limit"),
    (codes::EXACT_MODE_WITHOUT_LIMITS, "Exact streaming mode requires limits"),
    (codes::UNKNOWN_ERROR, "An unknown error occurred"),
    (codes::INTERNAL_ERROR, "An internal error occurred"),
];

/// A nonzero native error code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BackendError {
    code: ErrorCode,
}

impl BackendError {
    /// Wraps a native code.
    ///
    /// Code `0` means success on the native side; wrapping it is a caller bug
    /// and is mapped to [`codes::INTERNAL_ERROR`].
    #[must_use]
    pub const fn new(code: ErrorCode) -> Self {
        if code == 0 {
            Self {
                code: codes::INTERNAL_ERROR,
            }
        } else {
            Self { code }
        }
    }

    /// Converts a native status into a result (`0` is success).
    pub fn check(code: ErrorCode) -> NativeResult<()> {
        if code == 0 {
            Ok(())
        } else {
            Err(Self::new(code))
        }
    }

    /// Returns the raw code.
    #[must_use]
    pub const fn code(self) -> ErrorCode {
        self.code
    }

    /// Returns the human-readable description of the code.
    #[must_use]
    pub fn description(self) -> &'static str {
        DESCRIPTIONS
            .iter()
            .find(|(code, _)| *code == self.code)
            .map_or("Unrecognized error", |(_, desc)| desc)
    }

    /// Whether the backend would normally accept this code in `on_error`.
    ///
    /// Only used for diagnostics. Retry decisions are taken by the
    /// outcome of `on_error`, never by inspecting the code.
    #[must_use]
    pub fn is_retryable_hint(self) -> bool {
        matches!(
            self.code,
            codes::TIMED_OUT
                | codes::TRANSACTION_TOO_OLD
                | codes::FUTURE_VERSION
                | codes::NOT_COMMITTED
                | codes::COMMIT_UNKNOWN_RESULT
        )
    }
}

impl fmt::Display for BackendError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} (code {})", self.description(), self.code)
    }
}

impl std::error::Error for BackendError {}

impl From<BackendError> for ErrorCode {
    fn from(err: BackendError) -> Self {
        err.code
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn check_maps_zero_to_ok() {
        assert!(BackendError::check(0).is_ok());
        assert_eq!(
            BackendError::check(codes::NOT_COMMITTED).unwrap_err().code(),
            1020
        );
    }

    #[test]
    fn zero_is_never_wrapped() {
        assert_eq!(BackendError::new(0).code(), codes::INTERNAL_ERROR);
    }

    #[test]
    fn display_includes_description_and_code() {
        let err = BackendError::new(codes::NOT_COMMITTED);
        let text = err.to_string();
        assert!(text.contains("conflict"));
        assert!(text.contains("1020"));
        assert_eq!(BackendError::new(9999).description(), "Unrecognized error");
    }

    #[test]
    fn retryable_hint() {
        assert!(BackendError::new(codes::NOT_COMMITTED).is_retryable_hint());
        assert!(!BackendError::new(codes::CLIENT_INVALID_OPERATION).is_retryable_hint());
    }
}
