//! Opaque native handles.
//!
//! Handles are plain identifiers issued by a [`crate::Backend`]. They carry
//! no ownership; releasing them exactly once is the caller's job.

use std::fmt;

/// An opaque database handle.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct DatabaseHandle(u64);

impl DatabaseHandle {
    /// Wraps a raw handle value. Only backends should mint handles.
    #[must_use]
    pub const fn from_raw(raw: u64) -> Self {
        Self(raw)
    }

    /// Returns the raw handle value.
    #[must_use]
    pub const fn as_raw(self) -> u64 {
        self.0
    }
}

impl fmt::Debug for DatabaseHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "db#{}", self.0)
    }
}

/// An opaque transaction handle.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct TransactionHandle(u64);

impl TransactionHandle {
    /// Wraps a raw handle value. Only backends should mint handles.
    #[must_use]
    pub const fn from_raw(raw: u64) -> Self {
        Self(raw)
    }

    /// Returns the raw handle value.
    #[must_use]
    pub const fn as_raw(self) -> u64 {
        self.0
    }
}

impl fmt::Debug for TransactionHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "tr#{}", self.0)
    }
}
