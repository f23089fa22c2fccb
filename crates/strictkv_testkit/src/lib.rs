//! # StrictKV Testkit
//!
//! Test utilities for StrictKV.
//!
//! This crate provides:
//! - Test fixtures and database helpers
//! - A fault-injecting backend for driving the retry loop
//! - Property-based test generators using proptest
//! - Contention stress runs
//! - Test logging setup
//!
//! ## Usage
//!
//! ```rust
//! use strictkv_core::Result;
//! use strictkv_testkit::prelude::*;
//!
//! let db = TestDatabase::memory();
//! db.backend.fail_next_commits([strictkv_core::codes::NOT_COMMITTED]);
//!
//! let mut calls = 0;
//! db.transact(|tr| -> Result<()> {
//!     calls += 1;
//!     tr.set(b"k", b"v");
//!     Ok(())
//! })
//! .unwrap();
//! assert_eq!(calls, 2);
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod faults;
pub mod fixtures;
pub mod generators;
pub mod logging;
pub mod stress;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::faults::*;
    pub use crate::fixtures::*;
    pub use crate::generators::*;
    pub use crate::logging::*;
    pub use crate::stress::*;
}

pub use faults::*;
pub use fixtures::*;
pub use generators::*;
pub use logging::*;
pub use stress::*;
