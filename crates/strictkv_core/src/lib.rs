//! # StrictKV Core
//!
//! Client-side transaction engine for StrictKV.
//!
//! This crate turns a caller's unit of work into one logically atomic
//! transaction against a [`Backend`], retrying the work whenever the
//! backend reports an optimistic conflict or another retryable error.
//!
//! This crate provides:
//! - [`Database`] with the [`Database::transact`] retry loop
//! - [`Transaction`] reads, buffered writes, atomic mutations and watches
//! - [`Future`] values that can be pipelined and resolved later
//! - Range reads by [`KeySelector`] with lazy pagination
//! - Typed option tables for databases and transactions
//!
//! ## Example
//!
//! ```rust
//! use strictkv_core::{Database, RangeOptions, Result};
//!
//! let db = Database::open_in_memory().unwrap();
//!
//! db.transact(|tr| -> Result<()> {
//!     tr.set(b"user/1", b"ada");
//!     tr.set(b"user/2", b"grace");
//!     Ok(())
//! })
//! .unwrap();
//!
//! let users = db
//!     .get_range_starts_with(b"user/", RangeOptions::new())
//!     .unwrap();
//! assert_eq!(users.len(), 2);
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod config;
mod database;
mod error;
mod future;
mod handle;
mod options;
mod range;
mod transaction;

pub use config::DatabaseConfig;
pub use database::Database;
pub use error::{Error, Result, TransactError};
pub use future::{Future, FutureKey, FutureNil, FutureValue, FutureVersion};
pub use options::{
    DatabaseOption, DatabaseOptions, OptionSpec, ParamKind, TransactionOption,
    TransactionOptions,
};
pub use range::{
    prefix_range, strinc, KeyRange, RangeIterator, RangeOptions, RangeResult, SelectorRange,
};
pub use transaction::{Snapshot, Transaction};

pub use strictkv_backend::{
    codes, Backend, BackendError, InMemoryBackend, KeySelector, KeyValue, MutationType,
    StreamingMode,
};
