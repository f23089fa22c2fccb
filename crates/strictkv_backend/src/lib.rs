//! # StrictKV Backend
//!
//! The capability boundary between the StrictKV client and a transactional
//! key-value engine.
//!
//! The client never touches engine state directly. It holds opaque
//! handles, issues operations through the [`Backend`] trait, and receives
//! outcomes through single-assignment [`Completion`] cells or as native
//! error codes.
//!
//! ## Design Principles
//!
//! - Handles are plain identifiers; the backend owns everything behind them
//! - Errors are integer codes wrapped in [`BackendError`]
//! - Backends must be `Send + Sync` and may settle completions from any thread
//! - Retry classification belongs to the backend (`on_error`), never the client
//!
//! ## Available Backends
//!
//! - [`InMemoryBackend`] - Multi-version in-memory engine with optimistic
//!   conflict detection, used for tests, benchmarks and the CLI
//!
//! ## Example
//!
//! ```rust
//! use strictkv_backend::{Backend, InMemoryBackend, KeySelector};
//!
//! let backend = InMemoryBackend::new();
//! let db = backend.open_database().unwrap();
//! let tr = backend.create_transaction(db).unwrap();
//! backend.set(tr, b"a", b"1");
//! backend.set(tr, b"b", b"2");
//! let key = backend
//!     .get_key(tr, &KeySelector::first_greater_than(b"a"), false)
//!     .result()
//!     .unwrap();
//! assert_eq!(&key[..], b"b");
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod backend;
mod completion;
mod error;
mod handle;
mod memory;
mod types;

pub use backend::Backend;
pub use completion::{completion, Completer, Completion};
pub use error::{codes, BackendError, ErrorCode, NativeResult};
pub use handle::{DatabaseHandle, TransactionHandle};
pub use memory::{Delivery, InMemoryBackend};
pub use types::{
    KeySelector, KeyValue, MutationType, RangeChunk, RangeRequest, StreamingMode,
};
