//! Transactions.

use crate::error::{Error, Result};
use crate::future::{Future, FutureKey, FutureNil, FutureValue, FutureVersion};
use crate::handle::HandleGuard;
use crate::options::{TransactionOption, TransactionOptions};
use crate::range::{prefix_range, RangeOptions, RangeResult, SelectorRange};
use bytes::Bytes;
use parking_lot::Mutex;
use std::fmt;
use strictkv_backend::{
    codes, Backend, KeySelector, MutationType, RangeChunk, RangeRequest, TransactionHandle,
};

/// One attempt at a unit of work.
///
/// Reads return [`Future`]s and never block; writes are buffered and
/// visible to later reads in the same transaction. Nothing reaches the
/// database until [`commit`](Self::commit) succeeds.
///
/// Most code should not create transactions directly but run its work
/// through [`Database::transact`](crate::Database::transact), which creates
/// a fresh transaction for every attempt and retries conflicts.
///
/// Dropping a transaction releases its native handle. Futures it returned
/// (watches excepted) are no longer meaningful after that.
pub struct Transaction {
    guard: HandleGuard<TransactionHandle>,
    commit: Mutex<Option<FutureNil>>,
}

impl Transaction {
    pub(crate) fn new(guard: HandleGuard<TransactionHandle>) -> Self {
        Self {
            guard,
            commit: Mutex::new(None),
        }
    }

    fn backend(&self) -> &dyn Backend {
        self.guard.backend().as_ref()
    }

    fn handle(&self) -> TransactionHandle {
        self.guard.handle()
    }

    /// Typed option setters.
    #[must_use]
    pub fn options(&self) -> TransactionOptions<'_> {
        TransactionOptions::new(self)
    }

    /// Sets one option on this transaction.
    pub fn set_option(&self, option: TransactionOption) -> Result<()> {
        let param = option.encode_param();
        self.backend()
            .set_transaction_option(self.handle(), option.code(), param.as_deref())
            .map_err(Error::from)
    }

    /// A view of this transaction whose reads add no read conflict ranges.
    #[must_use]
    pub fn snapshot(&self) -> Snapshot<'_> {
        Snapshot { tr: self }
    }

    // ========================================================================
    // Reads
    // ========================================================================

    /// Reads the value of `key`.
    pub fn get(&self, key: impl AsRef<[u8]>) -> FutureValue {
        self.read_value(key.as_ref(), false)
    }

    /// Resolves a selector to a key.
    pub fn get_key(&self, selector: &KeySelector) -> FutureKey {
        self.read_key(selector, false)
    }

    /// Reads a range of rows.
    ///
    /// Accepts a [`KeyRange`](crate::KeyRange), a [`SelectorRange`] or a
    /// `(KeySelector, KeySelector)` pair.
    pub fn get_range(
        &self,
        range: impl Into<SelectorRange>,
        options: RangeOptions,
    ) -> RangeResult<'_> {
        RangeResult::new(self, range.into(), options, false)
    }

    /// Reads every row whose key starts with `prefix`.
    pub fn get_range_starts_with(
        &self,
        prefix: impl AsRef<[u8]>,
        options: RangeOptions,
    ) -> Result<RangeResult<'_>> {
        Ok(self.get_range(prefix_range(prefix.as_ref())?, options))
    }

    /// Returns the read version, choosing it if no read has happened yet.
    pub fn get_read_version(&self) -> FutureVersion {
        Future::from_completion(self.backend().get_read_version(self.handle()))
    }

    /// Pins the read version. Must be called before any read.
    pub fn set_read_version(&self, version: i64) {
        self.backend().set_read_version(self.handle(), version);
    }

    /// The version this transaction committed at, once `commit` succeeded.
    ///
    /// Read-only transactions report `-1`.
    pub fn get_committed_version(&self) -> Result<i64> {
        self.backend()
            .get_committed_version(self.handle())
            .map_err(Error::from)
    }

    fn read_value(&self, key: &[u8], snapshot: bool) -> FutureValue {
        Future::from_completion(self.backend().get(self.handle(), key, snapshot))
    }

    fn read_key(&self, selector: &KeySelector, snapshot: bool) -> FutureKey {
        Future::from_completion(self.backend().get_key(self.handle(), selector, snapshot))
    }

    pub(crate) fn range_chunk(&self, request: &RangeRequest) -> Future<RangeChunk> {
        Future::from_completion(self.backend().get_range(self.handle(), request))
    }

    // ========================================================================
    // Writes
    // ========================================================================

    /// Buffers a write of `value` to `key`.
    pub fn set(&self, key: impl AsRef<[u8]>, value: impl AsRef<[u8]>) {
        self.backend().set(self.handle(), key.as_ref(), value.as_ref());
    }

    /// Buffers a clear of `key`.
    pub fn clear(&self, key: impl AsRef<[u8]>) {
        self.backend().clear(self.handle(), key.as_ref());
    }

    /// Buffers a clear of every key in `[begin, end)`.
    pub fn clear_range(&self, begin: impl AsRef<[u8]>, end: impl AsRef<[u8]>) {
        self.backend()
            .clear_range(self.handle(), begin.as_ref(), end.as_ref());
    }

    /// Buffers a clear of every key starting with `prefix`.
    pub fn clear_range_starts_with(&self, prefix: impl AsRef<[u8]>) -> Result<()> {
        let range = prefix_range(prefix.as_ref())?;
        self.clear_range(&range.begin, &range.end);
        Ok(())
    }

    /// Buffers an atomic mutation.
    pub fn atomic_op(&self, key: impl AsRef<[u8]>, param: impl AsRef<[u8]>, op: MutationType) {
        self.backend()
            .atomic_op(self.handle(), key.as_ref(), param.as_ref(), op.code());
    }

    /// Adds `param` to the value of `key` as little-endian unsigned integers.
    pub fn add(&self, key: impl AsRef<[u8]>, param: impl AsRef<[u8]>) {
        self.atomic_op(key, param, MutationType::Add);
    }

    /// Bitwise AND of the value of `key` with `param`.
    pub fn bit_and(&self, key: impl AsRef<[u8]>, param: impl AsRef<[u8]>) {
        self.atomic_op(key, param, MutationType::BitAnd);
    }

    /// Bitwise OR of the value of `key` with `param`.
    pub fn bit_or(&self, key: impl AsRef<[u8]>, param: impl AsRef<[u8]>) {
        self.atomic_op(key, param, MutationType::BitOr);
    }

    /// Bitwise XOR of the value of `key` with `param`.
    pub fn bit_xor(&self, key: impl AsRef<[u8]>, param: impl AsRef<[u8]>) {
        self.atomic_op(key, param, MutationType::BitXor);
    }

    /// Appends `param` to the value of `key` if the result fits the value size limit.
    pub fn append_if_fits(&self, key: impl AsRef<[u8]>, param: impl AsRef<[u8]>) {
        self.atomic_op(key, param, MutationType::AppendIfFits);
    }

    /// Keeps the larger of the value of `key` and `param`, as little-endian integers.
    pub fn max(&self, key: impl AsRef<[u8]>, param: impl AsRef<[u8]>) {
        self.atomic_op(key, param, MutationType::Max);
    }

    /// Keeps the smaller of the value of `key` and `param`, as little-endian integers.
    pub fn min(&self, key: impl AsRef<[u8]>, param: impl AsRef<[u8]>) {
        self.atomic_op(key, param, MutationType::Min);
    }

    /// Writes `param` under a key with the commit versionstamp spliced in.
    ///
    /// The last four bytes of `key` hold the little-endian offset of the
    /// ten-byte placeholder.
    pub fn set_versionstamped_key(&self, key: impl AsRef<[u8]>, param: impl AsRef<[u8]>) {
        self.atomic_op(key, param, MutationType::SetVersionstampedKey);
    }

    /// Writes `param` to `key` with the commit versionstamp spliced in.
    pub fn set_versionstamped_value(&self, key: impl AsRef<[u8]>, param: impl AsRef<[u8]>) {
        self.atomic_op(key, param, MutationType::SetVersionstampedValue);
    }

    /// Keeps the lexicographically smaller of the value of `key` and `param`.
    pub fn byte_min(&self, key: impl AsRef<[u8]>, param: impl AsRef<[u8]>) {
        self.atomic_op(key, param, MutationType::ByteMin);
    }

    /// Keeps the lexicographically larger of the value of `key` and `param`.
    pub fn byte_max(&self, key: impl AsRef<[u8]>, param: impl AsRef<[u8]>) {
        self.atomic_op(key, param, MutationType::ByteMax);
    }

    /// Clears `key` if its value equals `param`.
    pub fn compare_and_clear(&self, key: impl AsRef<[u8]>, param: impl AsRef<[u8]>) {
        self.atomic_op(key, param, MutationType::CompareAndClear);
    }

    // ========================================================================
    // Conflict ranges
    // ========================================================================

    /// Adds `[begin, end)` to the read conflict set.
    pub fn add_read_conflict_range(
        &self,
        begin: impl AsRef<[u8]>,
        end: impl AsRef<[u8]>,
    ) -> Result<()> {
        self.backend()
            .add_conflict_range(self.handle(), begin.as_ref(), end.as_ref(), false)
            .map_err(Error::from)
    }

    /// Adds `[begin, end)` to the write conflict set.
    pub fn add_write_conflict_range(
        &self,
        begin: impl AsRef<[u8]>,
        end: impl AsRef<[u8]>,
    ) -> Result<()> {
        self.backend()
            .add_conflict_range(self.handle(), begin.as_ref(), end.as_ref(), true)
            .map_err(Error::from)
    }

    /// Adds the single key `key` to the read conflict set.
    pub fn add_read_conflict_key(&self, key: impl AsRef<[u8]>) -> Result<()> {
        let key = key.as_ref();
        self.add_read_conflict_range(key, key_after(key))
    }

    /// Adds the single key `key` to the write conflict set.
    pub fn add_write_conflict_key(&self, key: impl AsRef<[u8]>) -> Result<()> {
        let key = key.as_ref();
        self.add_write_conflict_range(key, key_after(key))
    }

    // ========================================================================
    // Lifecycle
    // ========================================================================

    /// Watches `key` for a change committed after this transaction.
    ///
    /// The watch is registered when this transaction commits and outlives
    /// it. If the transaction fails to commit, the watch fails with the
    /// commit error; if it is reset or dropped first, with
    /// `transaction_cancelled`.
    pub fn watch(&self, key: impl AsRef<[u8]>) -> FutureNil {
        Future::from_completion(self.backend().watch(self.handle(), key.as_ref()))
    }

    /// Attempts to commit buffered writes.
    ///
    /// Only one commit may be outstanding at a time; a second call while the
    /// first is still pending fails with `used_during_commit`.
    pub fn commit(&self) -> FutureNil {
        let mut outstanding = self.commit.lock();
        if outstanding.as_ref().is_some_and(|f| !f.is_ready()) {
            return Future::failed(Error::from_code(codes::USED_DURING_COMMIT));
        }
        let future = Future::from_completion(self.backend().commit(self.handle()));
        *outstanding = Some(future.clone());
        future
    }

    /// Asks the backend whether `err` is retryable.
    ///
    /// On success the transaction has been reset to a fresh read version
    /// with its options kept. On failure the error is final. Errors that
    /// carry no backend code are never retryable and fail immediately.
    pub fn on_error(&self, err: &Error) -> FutureNil {
        let Error::Backend(backend_error) = err else {
            return Future::failed(err.clone());
        };
        self.commit.lock().take();
        Future::from_completion(self.backend().on_error(self.handle(), backend_error.code()))
    }

    /// Drops buffered state and options, returning to a fresh transaction.
    pub fn reset(&self) {
        self.commit.lock().take();
        self.backend().reset(self.handle());
    }

    /// Aborts this attempt. Later operations fail with `transaction_cancelled`.
    pub fn cancel(&self) {
        self.backend().cancel(self.handle());
    }
}

impl fmt::Debug for Transaction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Transaction")
            .field("handle", &self.handle())
            .finish_non_exhaustive()
    }
}

/// Snapshot reads on a transaction.
///
/// Snapshot reads see the same data as ordinary reads but add no read
/// conflict ranges, so concurrent writes to what they read do not make the
/// commit fail.
#[derive(Debug, Clone, Copy)]
pub struct Snapshot<'a> {
    tr: &'a Transaction,
}

impl<'a> Snapshot<'a> {
    /// Reads the value of `key` without a read conflict.
    pub fn get(&self, key: impl AsRef<[u8]>) -> FutureValue {
        self.tr.read_value(key.as_ref(), true)
    }

    /// Resolves a selector without a read conflict.
    pub fn get_key(&self, selector: &KeySelector) -> FutureKey {
        self.tr.read_key(selector, true)
    }

    /// Reads a range without read conflicts.
    pub fn get_range(
        &self,
        range: impl Into<SelectorRange>,
        options: RangeOptions,
    ) -> RangeResult<'a> {
        RangeResult::new(self.tr, range.into(), options, true)
    }

    /// Reads every row starting with `prefix` without read conflicts.
    pub fn get_range_starts_with(
        &self,
        prefix: impl AsRef<[u8]>,
        options: RangeOptions,
    ) -> Result<RangeResult<'a>> {
        Ok(self.get_range(prefix_range(prefix.as_ref())?, options))
    }

    /// Returns the read version.
    pub fn get_read_version(&self) -> FutureVersion {
        self.tr.get_read_version()
    }
}

fn key_after(key: &[u8]) -> Bytes {
    let mut next = Vec::with_capacity(key.len() + 1);
    next.extend_from_slice(key);
    next.push(0);
    Bytes::from(next)
}
