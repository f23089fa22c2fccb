//! Backend capability trait definition.

use crate::completion::Completion;
use crate::error::NativeResult;
use crate::handle::{DatabaseHandle, TransactionHandle};
use crate::types::{KeySelector, RangeChunk, RangeRequest};
use bytes::Bytes;

/// The transactional key-value engine, seen through opaque handles.
///
/// Backends own persistence, versioning and conflict detection. Clients
/// hold handles, issue operations, and receive either a synchronous native
/// error or a [`Completion`] that the backend settles later, possibly from
/// one of its own threads.
///
/// # Invariants
///
/// - Mutations (`set`, `clear`, `clear_range`, `atomic_op`) are buffered in
///   call order and visible to later reads on the same handle. Errors they
///   cause surface from `commit`.
/// - `on_error` decides retryability. On success the handle has been reset
///   to a fresh read version; on failure the error is final.
/// - Destroying a transaction settles its outstanding completions, except
///   watches that were already registered by a successful commit.
/// - Destroyed handles are rejected with `client_invalid_operation`; they
///   never alias a live handle.
/// - Implementations must be `Send + Sync`.
pub trait Backend: Send + Sync {
    /// Opens a database connection handle.
    fn open_database(&self) -> NativeResult<DatabaseHandle>;

    /// Releases a database handle. Releasing twice is a no-op.
    fn destroy_database(&self, db: DatabaseHandle);

    /// Sets a database-scoped option. `param` is absent for flag options.
    fn set_database_option(
        &self,
        db: DatabaseHandle,
        code: i32,
        param: Option<&[u8]>,
    ) -> NativeResult<()>;

    /// Allocates a transaction handle.
    fn create_transaction(&self, db: DatabaseHandle) -> NativeResult<TransactionHandle>;

    /// Releases a transaction handle. Releasing twice is a no-op.
    fn destroy_transaction(&self, tr: TransactionHandle);

    /// Sets a transaction-scoped option.
    fn set_transaction_option(
        &self,
        tr: TransactionHandle,
        code: i32,
        param: Option<&[u8]>,
    ) -> NativeResult<()>;

    /// Reads one key. Settles with `None` if the key is absent.
    fn get(&self, tr: TransactionHandle, key: &[u8], snapshot: bool)
        -> Completion<Option<Bytes>>;

    /// Resolves a selector to a concrete key.
    fn get_key(
        &self,
        tr: TransactionHandle,
        selector: &KeySelector,
        snapshot: bool,
    ) -> Completion<Bytes>;

    /// Reads one chunk of a range.
    fn get_range(&self, tr: TransactionHandle, request: &RangeRequest) -> Completion<RangeChunk>;

    /// Buffers a write.
    fn set(&self, tr: TransactionHandle, key: &[u8], value: &[u8]);

    /// Buffers a single-key clear.
    fn clear(&self, tr: TransactionHandle, key: &[u8]);

    /// Buffers a clear of `[begin, end)`.
    fn clear_range(&self, tr: TransactionHandle, begin: &[u8], end: &[u8]);

    /// Buffers an atomic mutation identified by its native code.
    fn atomic_op(&self, tr: TransactionHandle, key: &[u8], param: &[u8], op: i32);

    /// Adds `[begin, end)` to the read (`write == false`) or write conflict set.
    fn add_conflict_range(
        &self,
        tr: TransactionHandle,
        begin: &[u8],
        end: &[u8],
        write: bool,
    ) -> NativeResult<()>;

    /// Returns the read version, fixing it if not yet chosen.
    fn get_read_version(&self, tr: TransactionHandle) -> Completion<i64>;

    /// Pins the read version before any read happens.
    fn set_read_version(&self, tr: TransactionHandle, version: i64);

    /// Version at which the transaction committed.
    fn get_committed_version(&self, tr: TransactionHandle) -> NativeResult<i64>;

    /// Attempts to commit buffered mutations.
    fn commit(&self, tr: TransactionHandle) -> Completion<()>;

    /// Classifies `code` and, when retryable, resets the handle.
    fn on_error(&self, tr: TransactionHandle, code: i32) -> Completion<()>;

    /// Watches `key` for a change after this transaction commits.
    ///
    /// The completion outlives the transaction handle.
    fn watch(&self, tr: TransactionHandle, key: &[u8]) -> Completion<()>;

    /// Drops buffered state and returns the handle to its initial state.
    fn reset(&self, tr: TransactionHandle);

    /// Aborts the attempt; every later operation fails with `transaction_cancelled`.
    fn cancel(&self, tr: TransactionHandle);
}
