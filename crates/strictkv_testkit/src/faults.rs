//! Fault injection.
//!
//! [`FaultInjectingBackend`] wraps an [`InMemoryBackend`] and lets a test
//! script the failures the retry loop has to cope with: commits that fail
//! with a given code, `on_error` verdicts that override the engine's own
//! classification, and transaction creation that fails outright. Every
//! call that matters to the retry loop is counted.

use bytes::Bytes;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use strictkv_backend::{
    codes, Backend, BackendError, Completion, DatabaseHandle, Delivery, InMemoryBackend,
    KeySelector, NativeResult, RangeChunk, RangeRequest, TransactionHandle,
};

/// Forced outcome of one `on_error` call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    /// Reset the transaction and report success.
    Retry,
    /// Fail with the given code.
    Fail(i32),
}

/// Snapshot of the call counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CallCounts {
    /// `create_transaction` calls, successful or not.
    pub create_transaction: usize,
    /// `destroy_transaction` calls.
    pub destroy_transaction: usize,
    /// `commit` calls.
    pub commit: usize,
    /// `on_error` calls.
    pub on_error: usize,
}

#[derive(Default)]
struct Counters {
    create_transaction: AtomicUsize,
    destroy_transaction: AtomicUsize,
    commit: AtomicUsize,
    on_error: AtomicUsize,
}

/// An in-memory backend with scripted faults.
pub struct FaultInjectingBackend {
    inner: InMemoryBackend,
    commit_faults: Mutex<VecDeque<i32>>,
    verdicts: Mutex<VecDeque<Verdict>>,
    create_fault: Mutex<Option<i32>>,
    counters: Counters,
}

impl Default for FaultInjectingBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl FaultInjectingBackend {
    /// Wraps a fresh in-memory backend with immediate delivery.
    #[must_use]
    pub fn new() -> Self {
        Self::wrap(InMemoryBackend::new())
    }

    /// Wraps a fresh in-memory backend with the given delivery mode.
    #[must_use]
    pub fn with_delivery(delivery: Delivery) -> Self {
        Self::wrap(InMemoryBackend::with_delivery(delivery))
    }

    fn wrap(inner: InMemoryBackend) -> Self {
        Self {
            inner,
            commit_faults: Mutex::new(VecDeque::new()),
            verdicts: Mutex::new(VecDeque::new()),
            create_fault: Mutex::new(None),
            counters: Counters::default(),
        }
    }

    /// The wrapped engine.
    #[must_use]
    pub fn inner(&self) -> &InMemoryBackend {
        &self.inner
    }

    /// The next commits fail with these codes, in order, without committing.
    pub fn fail_next_commits(&self, codes: impl IntoIterator<Item = i32>) {
        self.commit_faults.lock().extend(codes);
    }

    /// The next `on_error` calls return these verdicts, in order.
    pub fn force_on_error(&self, verdicts: impl IntoIterator<Item = Verdict>) {
        self.verdicts.lock().extend(verdicts);
    }

    /// Makes every `create_transaction` fail with `code` until cleared with `None`.
    pub fn fail_create_transaction(&self, code: Option<i32>) {
        *self.create_fault.lock() = code;
    }

    /// Current call counters.
    #[must_use]
    pub fn calls(&self) -> CallCounts {
        CallCounts {
            create_transaction: self.counters.create_transaction.load(Ordering::SeqCst),
            destroy_transaction: self.counters.destroy_transaction.load(Ordering::SeqCst),
            commit: self.counters.commit.load(Ordering::SeqCst),
            on_error: self.counters.on_error.load(Ordering::SeqCst),
        }
    }
}

impl std::fmt::Debug for FaultInjectingBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FaultInjectingBackend")
            .field("inner", &self.inner)
            .field("calls", &self.calls())
            .finish_non_exhaustive()
    }
}

impl Backend for FaultInjectingBackend {
    fn open_database(&self) -> NativeResult<DatabaseHandle> {
        self.inner.open_database()
    }

    fn destroy_database(&self, db: DatabaseHandle) {
        self.inner.destroy_database(db);
    }

    fn set_database_option(
        &self,
        db: DatabaseHandle,
        code: i32,
        param: Option<&[u8]>,
    ) -> NativeResult<()> {
        self.inner.set_database_option(db, code, param)
    }

    fn create_transaction(&self, db: DatabaseHandle) -> NativeResult<TransactionHandle> {
        self.counters.create_transaction.fetch_add(1, Ordering::SeqCst);
        if let Some(code) = *self.create_fault.lock() {
            return Err(BackendError::new(code));
        }
        self.inner.create_transaction(db)
    }

    fn destroy_transaction(&self, tr: TransactionHandle) {
        self.counters.destroy_transaction.fetch_add(1, Ordering::SeqCst);
        self.inner.destroy_transaction(tr);
    }

    fn set_transaction_option(
        &self,
        tr: TransactionHandle,
        code: i32,
        param: Option<&[u8]>,
    ) -> NativeResult<()> {
        self.inner.set_transaction_option(tr, code, param)
    }

    fn get(&self, tr: TransactionHandle, key: &[u8], snapshot: bool) -> Completion<Option<Bytes>> {
        self.inner.get(tr, key, snapshot)
    }

    fn get_key(
        &self,
        tr: TransactionHandle,
        selector: &KeySelector,
        snapshot: bool,
    ) -> Completion<Bytes> {
        self.inner.get_key(tr, selector, snapshot)
    }

    fn get_range(&self, tr: TransactionHandle, request: &RangeRequest) -> Completion<RangeChunk> {
        self.inner.get_range(tr, request)
    }

    fn set(&self, tr: TransactionHandle, key: &[u8], value: &[u8]) {
        self.inner.set(tr, key, value);
    }

    fn clear(&self, tr: TransactionHandle, key: &[u8]) {
        self.inner.clear(tr, key);
    }

    fn clear_range(&self, tr: TransactionHandle, begin: &[u8], end: &[u8]) {
        self.inner.clear_range(tr, begin, end);
    }

    fn atomic_op(&self, tr: TransactionHandle, key: &[u8], param: &[u8], op: i32) {
        self.inner.atomic_op(tr, key, param, op);
    }

    fn add_conflict_range(
        &self,
        tr: TransactionHandle,
        begin: &[u8],
        end: &[u8],
        write: bool,
    ) -> NativeResult<()> {
        self.inner.add_conflict_range(tr, begin, end, write)
    }

    fn get_read_version(&self, tr: TransactionHandle) -> Completion<i64> {
        self.inner.get_read_version(tr)
    }

    fn set_read_version(&self, tr: TransactionHandle, version: i64) {
        self.inner.set_read_version(tr, version);
    }

    fn get_committed_version(&self, tr: TransactionHandle) -> NativeResult<i64> {
        self.inner.get_committed_version(tr)
    }

    fn commit(&self, tr: TransactionHandle) -> Completion<()> {
        self.counters.commit.fetch_add(1, Ordering::SeqCst);
        let fault = self.commit_faults.lock().pop_front();
        match fault {
            Some(code) => {
                tracing::trace!(tr = ?tr, code, "injected commit failure");
                Completion::failed(BackendError::new(code))
            }
            None => self.inner.commit(tr),
        }
    }

    fn on_error(&self, tr: TransactionHandle, code: i32) -> Completion<()> {
        self.counters.on_error.fetch_add(1, Ordering::SeqCst);
        let verdict = self.verdicts.lock().pop_front();
        match verdict {
            Some(Verdict::Retry) => self.inner.on_error(tr, codes::NOT_COMMITTED),
            Some(Verdict::Fail(forced)) => Completion::failed(BackendError::new(forced)),
            None => self.inner.on_error(tr, code),
        }
    }

    fn watch(&self, tr: TransactionHandle, key: &[u8]) -> Completion<()> {
        self.inner.watch(tr, key)
    }

    fn reset(&self, tr: TransactionHandle) {
        self.inner.reset(tr);
    }

    fn cancel(&self, tr: TransactionHandle) {
        self.inner.cancel(tr);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scripted_commit_failures_are_consumed_in_order() {
        let backend = FaultInjectingBackend::new();
        backend.fail_next_commits([codes::NOT_COMMITTED, codes::TRANSACTION_TOO_OLD]);
        let db = backend.open_database().unwrap();
        let tr = backend.create_transaction(db).unwrap();

        let codes_seen: Vec<i32> = (0..3)
            .map(|_| backend.commit(tr).result().map_or_else(|e| e.code(), |()| 0))
            .collect();
        assert_eq!(codes_seen, vec![codes::NOT_COMMITTED, codes::TRANSACTION_TOO_OLD, 0]);
        assert_eq!(backend.calls().commit, 3);
    }

    #[test]
    fn forced_verdicts_override_classification() {
        let backend = FaultInjectingBackend::new();
        backend.force_on_error([Verdict::Fail(codes::TIMED_OUT), Verdict::Retry]);
        let db = backend.open_database().unwrap();
        let tr = backend.create_transaction(db).unwrap();

        let err = backend.on_error(tr, codes::NOT_COMMITTED).result().unwrap_err();
        assert_eq!(err.code(), codes::TIMED_OUT);
        backend.on_error(tr, codes::KEY_OUTSIDE_LEGAL_RANGE).result().unwrap();
        assert!(backend.on_error(tr, codes::KEY_OUTSIDE_LEGAL_RANGE).result().is_err());
    }

    #[test]
    fn create_failures_are_counted() {
        let backend = FaultInjectingBackend::new();
        let db = backend.open_database().unwrap();
        backend.fail_create_transaction(Some(codes::INTERNAL_ERROR));
        assert!(backend.create_transaction(db).is_err());
        backend.fail_create_transaction(None);
        assert!(backend.create_transaction(db).is_ok());
        assert_eq!(backend.calls().create_transaction, 2);
    }
}
