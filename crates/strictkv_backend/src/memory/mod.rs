//! In-memory reference backend.
//!
//! A small multi-version engine with optimistic conflict detection. It is
//! the backend used by tests, benchmarks and the CLI, and it follows the
//! behaviour the client layer relies on from a real engine:
//!
//! - reads see the transaction's own buffered writes unless
//!   `read_your_writes_disable` is set
//! - commits fail with `not_committed` when a newer commit wrote into any
//!   range the transaction read (snapshot reads are not tracked)
//! - `on_error` resets the handle for retryable codes and fails otherwise
//! - history older than every active read version is pruned after each
//!   commit; reads pinned below it fail with `transaction_too_old`
//! - watches register on commit and fire on a later commit that changes
//!   the key

mod mutation;
mod store;
mod txn;
mod watch;

use crate::backend::Backend;
use crate::completion::{completion, Completion};
use crate::error::{codes, BackendError, NativeResult};
use crate::handle::{DatabaseHandle, TransactionHandle};
use crate::types::{KeySelector, KeyValue, MutationType, RangeChunk, RangeRequest, StreamingMode};
use bytes::Bytes;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use store::VersionedStore;
use txn::{key_after, Mutation, TxnState, TxnStatus};
use watch::WatchRegistry;

/// Database option codes understood by the engine.
mod db_option {
    pub const LOCATION_CACHE_SIZE: i32 = 10;
    pub const MAX_WATCHES: i32 = 20;
    pub const MACHINE_ID: i32 = 21;
    pub const DATACENTER_ID: i32 = 22;
}

/// Transaction option codes understood by the engine.
mod tr_option {
    pub const NEXT_WRITE_NO_WRITE_CONFLICT_RANGE: i32 = 30;
    pub const READ_YOUR_WRITES_DISABLE: i32 = 51;
    pub const ACCESS_SYSTEM_KEYS: i32 = 301;
    pub const READ_SYSTEM_KEYS: i32 = 302;
    pub const DEBUG_RETRY_LOGGING: i32 = 401;
    pub const TRANSACTION_LOGGING_ENABLE: i32 = 402;
    pub const TIMEOUT: i32 = 500;
    pub const RETRY_LIMIT: i32 = 501;
    pub const MAX_RETRY_DELAY: i32 = 502;

    /// Flag options accepted without further effect.
    pub const FLAGS: &[i32] = &[
        10, 20, 21, 40, 50, 52, 110, 120, 200, 201, 300, 600, 601, 700,
    ];
}

const DEFAULT_MAX_WATCHES: usize = 10_000;

/// How completions reach the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Delivery {
    /// Completions are settled before the call returns (watches excepted).
    #[default]
    Immediate,
    /// Completions are settled from a worker thread after the given delay.
    Threaded(Duration),
}

struct DbState {
    max_watches: usize,
}

struct Engine {
    store: VersionedStore,
    databases: HashMap<u64, DbState>,
    txns: HashMap<u64, TxnState>,
    watches: WatchRegistry,
    next_handle: u64,
}

impl Engine {
    fn mint(&mut self) -> u64 {
        self.next_handle += 1;
        self.next_handle
    }
}

/// An in-memory transactional key-value engine.
///
/// # Thread Safety
///
/// All state sits behind one mutex; the backend can be shared freely.
///
/// # Example
///
/// ```rust
/// use strictkv_backend::{Backend, InMemoryBackend};
///
/// let backend = InMemoryBackend::new();
/// let db = backend.open_database().unwrap();
/// let tr = backend.create_transaction(db).unwrap();
/// backend.set(tr, b"hello", b"world");
/// backend.commit(tr).result().unwrap();
///
/// let tr2 = backend.create_transaction(db).unwrap();
/// let value = backend.get(tr2, b"hello", false).result().unwrap();
/// assert_eq!(value.as_deref(), Some(&b"world"[..]));
/// ```
pub struct InMemoryBackend {
    engine: Arc<Mutex<Engine>>,
    delivery: Delivery,
}

impl Default for InMemoryBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryBackend {
    /// Creates an empty engine with immediate delivery.
    #[must_use]
    pub fn new() -> Self {
        Self::with_delivery(Delivery::Immediate)
    }

    /// Creates an empty engine with the given delivery mode.
    #[must_use]
    pub fn with_delivery(delivery: Delivery) -> Self {
        Self {
            engine: Arc::new(Mutex::new(Engine {
                store: VersionedStore::new(),
                databases: HashMap::new(),
                txns: HashMap::new(),
                watches: WatchRegistry::default(),
                next_handle: 0,
            })),
            delivery,
        }
    }

    /// Latest committed version.
    #[must_use]
    pub fn committed_version(&self) -> i64 {
        self.engine.lock().store.committed_version()
    }

    /// Number of live transaction handles.
    #[must_use]
    pub fn open_transactions(&self) -> usize {
        self.engine.lock().txns.len()
    }

    /// Number of registered watches that can still fire.
    #[must_use]
    pub fn live_watches(&self) -> usize {
        self.engine.lock().watches.live_count()
    }

    fn deliver<T: Send + 'static>(
        &self,
        tr: TransactionHandle,
        generation: u64,
        result: Result<T, BackendError>,
    ) -> Completion<T> {
        match self.delivery {
            Delivery::Immediate => match result {
                Ok(value) => Completion::ready(value),
                Err(err) => Completion::failed(err),
            },
            Delivery::Threaded(delay) => {
                let (done, completion) = completion();
                let engine = Arc::clone(&self.engine);
                thread::spawn(move || {
                    thread::sleep(delay);
                    let live = engine
                        .lock()
                        .txns
                        .get(&tr.as_raw())
                        .is_some_and(|t| t.generation == generation);
                    if live {
                        done.complete(result);
                    } else {
                        done.fail(BackendError::new(codes::TRANSACTION_CANCELLED));
                    }
                });
                completion
            }
        }
    }

    /// Runs a read against a live, usable transaction and delivers the outcome.
    fn read<T: Send + 'static>(
        &self,
        tr: TransactionHandle,
        f: impl FnOnce(&mut TxnState, &VersionedStore) -> Result<T, BackendError>,
    ) -> Completion<T> {
        let mut guard = self.engine.lock();
        let engine = &mut *guard;
        let Some(txn) = engine.txns.get_mut(&tr.as_raw()) else {
            return Completion::failed(BackendError::new(codes::CLIENT_INVALID_OPERATION));
        };
        let result = txn.check_usable().and_then(|()| {
            let version = txn.read_version(&engine.store);
            if version > engine.store.committed_version() {
                return Err(BackendError::new(codes::FUTURE_VERSION));
            }
            if version < engine.store.horizon() {
                return Err(BackendError::new(codes::TRANSACTION_TOO_OLD));
            }
            f(txn, &engine.store)
        });
        let generation = txn.generation;
        drop(guard);
        self.deliver(tr, generation, result)
    }

    fn mutate(&self, tr: TransactionHandle, mutation: Mutation) {
        if let Some(txn) = self.engine.lock().txns.get_mut(&tr.as_raw()) {
            txn.push_mutation(mutation);
        }
    }
}

impl std::fmt::Debug for InMemoryBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let engine = self.engine.lock();
        f.debug_struct("InMemoryBackend")
            .field("committed_version", &engine.store.committed_version())
            .field("databases", &engine.databases.len())
            .field("transactions", &engine.txns.len())
            .field("delivery", &self.delivery)
            .finish_non_exhaustive()
    }
}

/// Resolves a selector against the handle's view of the key space.
fn resolve(txn: &TxnState, store: &VersionedStore, version: i64, selector: &KeySelector) -> Bytes {
    let max = txn.read_limit();
    let offset = selector.offset();
    if offset >= 1 {
        let start = if selector.or_equal() {
            key_after(selector.key())
        } else {
            Bytes::copy_from_slice(selector.key())
        };
        let rows = txn.view_range(store, version, &start, max);
        rows.into_iter()
            .nth((offset - 1) as usize)
            .map_or_else(|| Bytes::from_static(max), |(key, _)| key)
    } else {
        let end = if selector.or_equal() {
            key_after(selector.key())
        } else {
            Bytes::copy_from_slice(selector.key())
        };
        let end = if &end[..] > max {
            Bytes::from_static(max)
        } else {
            end
        };
        let rows = txn.view_range(store, version, b"", &end);
        rows.into_iter()
            .rev()
            .nth(offset.unsigned_abs() as usize)
            .map_or_else(Bytes::new, |(key, _)| key)
    }
}

/// Rows per chunk for a streaming mode.
fn chunk_rows(mode: StreamingMode, iteration: u32, limit: usize) -> usize {
    let rows = match mode {
        StreamingMode::WantAll | StreamingMode::Serial => usize::MAX,
        StreamingMode::Exact => limit,
        StreamingMode::Small => 8,
        StreamingMode::Medium => 32,
        StreamingMode::Large => 128,
        StreamingMode::Iterator => 4usize << iteration.saturating_sub(1).min(6),
    };
    if limit > 0 {
        rows.min(limit)
    } else {
        rows
    }
}

fn int_param(param: Option<&[u8]>) -> NativeResult<i64> {
    param
        .and_then(|p| <[u8; 8]>::try_from(p).ok())
        .map(i64::from_le_bytes)
        .ok_or(BackendError::new(codes::INVALID_OPTION_VALUE))
}

impl Backend for InMemoryBackend {
    fn open_database(&self) -> NativeResult<DatabaseHandle> {
        let mut engine = self.engine.lock();
        let raw = engine.mint();
        engine.databases.insert(
            raw,
            DbState {
                max_watches: DEFAULT_MAX_WATCHES,
            },
        );
        tracing::trace!(db = raw, "opened database handle");
        Ok(DatabaseHandle::from_raw(raw))
    }

    fn destroy_database(&self, db: DatabaseHandle) {
        if self.engine.lock().databases.remove(&db.as_raw()).is_some() {
            tracing::trace!(db = db.as_raw(), "destroyed database handle");
        }
    }

    fn set_database_option(
        &self,
        db: DatabaseHandle,
        code: i32,
        param: Option<&[u8]>,
    ) -> NativeResult<()> {
        let mut engine = self.engine.lock();
        let state = engine
            .databases
            .get_mut(&db.as_raw())
            .ok_or(BackendError::new(codes::CLIENT_INVALID_OPERATION))?;
        match code {
            db_option::MAX_WATCHES => {
                let max = int_param(param)?;
                state.max_watches = usize::try_from(max)
                    .map_err(|_| BackendError::new(codes::INVALID_OPTION_VALUE))?;
            }
            db_option::LOCATION_CACHE_SIZE => {
                int_param(param)?;
            }
            db_option::MACHINE_ID | db_option::DATACENTER_ID => {}
            _ => return Err(BackendError::new(codes::INVALID_OPTION)),
        }
        Ok(())
    }

    fn create_transaction(&self, db: DatabaseHandle) -> NativeResult<TransactionHandle> {
        let mut engine = self.engine.lock();
        if !engine.databases.contains_key(&db.as_raw()) {
            return Err(BackendError::new(codes::CLIENT_INVALID_OPERATION));
        }
        let raw = engine.mint();
        engine.txns.insert(raw, TxnState::new(db.as_raw()));
        Ok(TransactionHandle::from_raw(raw))
    }

    fn destroy_transaction(&self, tr: TransactionHandle) {
        let removed = self.engine.lock().txns.remove(&tr.as_raw());
        if let Some(mut txn) = removed {
            txn.fail_watches(BackendError::new(codes::TRANSACTION_CANCELLED));
        }
    }

    fn set_transaction_option(
        &self,
        tr: TransactionHandle,
        code: i32,
        param: Option<&[u8]>,
    ) -> NativeResult<()> {
        let mut engine = self.engine.lock();
        let txn = engine
            .txns
            .get_mut(&tr.as_raw())
            .ok_or(BackendError::new(codes::CLIENT_INVALID_OPERATION))?;
        let options = &mut txn.options;
        match code {
            tr_option::NEXT_WRITE_NO_WRITE_CONFLICT_RANGE => {
                options.next_write_no_write_conflict_range = true;
            }
            tr_option::READ_YOUR_WRITES_DISABLE => options.read_your_writes_disable = true,
            tr_option::ACCESS_SYSTEM_KEYS => options.access_system_keys = true,
            tr_option::READ_SYSTEM_KEYS => options.read_system_keys = true,
            tr_option::TIMEOUT => {
                let ms = int_param(param)?;
                let ms = u64::try_from(ms)
                    .map_err(|_| BackendError::new(codes::INVALID_OPTION_VALUE))?;
                options.timeout = (ms > 0).then(|| Duration::from_millis(ms));
            }
            tr_option::RETRY_LIMIT => {
                let limit = int_param(param)?;
                options.retry_limit = (limit >= 0).then_some(limit);
            }
            tr_option::MAX_RETRY_DELAY => {
                int_param(param)?;
            }
            tr_option::DEBUG_RETRY_LOGGING | tr_option::TRANSACTION_LOGGING_ENABLE => {
                if param.map_or(true, |p| std::str::from_utf8(p).is_err()) {
                    return Err(BackendError::new(codes::INVALID_OPTION_VALUE));
                }
            }
            code if tr_option::FLAGS.contains(&code) => {}
            _ => return Err(BackendError::new(codes::INVALID_OPTION)),
        }
        Ok(())
    }

    fn get(&self, tr: TransactionHandle, key: &[u8], snapshot: bool) -> Completion<Option<Bytes>> {
        self.read(tr, |txn, store| {
            if key >= txn.read_limit() {
                return Err(BackendError::new(codes::KEY_OUTSIDE_LEGAL_RANGE));
            }
            let version = txn.read_version(store);
            let value = txn.view(store, version, key);
            if !snapshot {
                txn.read_conflicts
                    .push((Bytes::copy_from_slice(key), key_after(key)));
            }
            Ok(value)
        })
    }

    fn get_key(
        &self,
        tr: TransactionHandle,
        selector: &KeySelector,
        snapshot: bool,
    ) -> Completion<Bytes> {
        self.read(tr, |txn, store| {
            let version = txn.read_version(store);
            let resolved = resolve(txn, store, version, selector);
            if !snapshot {
                let anchor = Bytes::copy_from_slice(selector.key());
                let (low, high) = if anchor <= resolved {
                    (anchor, resolved.clone())
                } else {
                    (resolved.clone(), anchor)
                };
                txn.read_conflicts.push((low, key_after(&high)));
            }
            Ok(resolved)
        })
    }

    fn get_range(&self, tr: TransactionHandle, request: &RangeRequest) -> Completion<RangeChunk> {
        self.read(tr, |txn, store| {
            if request.mode == StreamingMode::Exact && request.limit == 0 {
                return Err(BackendError::new(codes::EXACT_MODE_WITHOUT_LIMITS));
            }
            let version = txn.read_version(store);
            let begin = resolve(txn, store, version, &request.begin);
            let end = resolve(txn, store, version, &request.end);
            if begin >= end {
                return Ok(RangeChunk::default());
            }
            let mut rows = txn.view_range(store, version, &begin, &end);
            if request.reverse {
                rows.reverse();
            }
            let take = chunk_rows(request.mode, request.iteration, request.limit);
            let more = rows.len() > take;
            rows.truncate(take);

            if !request.snapshot {
                let conflict = match (more, rows.last(), request.reverse) {
                    (true, Some((last, _)), false) => (begin, key_after(last)),
                    (true, Some((last, _)), true) => (last.clone(), end),
                    _ => (begin, end),
                };
                txn.read_conflicts.push(conflict);
            }
            tracing::trace!(
                rows = rows.len(),
                more,
                iteration = request.iteration,
                "served range chunk"
            );
            Ok(RangeChunk {
                key_values: rows
                    .into_iter()
                    .map(|(key, value)| KeyValue { key, value })
                    .collect(),
                more,
            })
        })
    }

    fn set(&self, tr: TransactionHandle, key: &[u8], value: &[u8]) {
        self.mutate(
            tr,
            Mutation::Set(Bytes::copy_from_slice(key), Bytes::copy_from_slice(value)),
        );
    }

    fn clear(&self, tr: TransactionHandle, key: &[u8]) {
        self.mutate(tr, Mutation::Clear(Bytes::copy_from_slice(key)));
    }

    fn clear_range(&self, tr: TransactionHandle, begin: &[u8], end: &[u8]) {
        self.mutate(
            tr,
            Mutation::ClearRange(Bytes::copy_from_slice(begin), Bytes::copy_from_slice(end)),
        );
    }

    fn atomic_op(&self, tr: TransactionHandle, key: &[u8], param: &[u8], op: i32) {
        let mut engine = self.engine.lock();
        let Some(txn) = engine.txns.get_mut(&tr.as_raw()) else {
            return;
        };
        match MutationType::from_code(op) {
            Some(op) => txn.push_mutation(Mutation::Atomic(
                Bytes::copy_from_slice(key),
                Bytes::copy_from_slice(param),
                op,
            )),
            None => txn.defer(codes::CLIENT_INVALID_OPERATION),
        }
    }

    fn add_conflict_range(
        &self,
        tr: TransactionHandle,
        begin: &[u8],
        end: &[u8],
        write: bool,
    ) -> NativeResult<()> {
        let mut guard = self.engine.lock();
        let engine = &mut *guard;
        let txn = engine
            .txns
            .get_mut(&tr.as_raw())
            .ok_or(BackendError::new(codes::CLIENT_INVALID_OPERATION))?;
        txn.check_usable()?;
        if begin > end {
            return Err(BackendError::new(codes::INVERTED_RANGE));
        }
        let range = (Bytes::copy_from_slice(begin), Bytes::copy_from_slice(end));
        if write {
            txn.write_conflicts.push(range);
        } else {
            txn.read_version(&engine.store);
            txn.read_conflicts.push(range);
        }
        Ok(())
    }

    fn get_read_version(&self, tr: TransactionHandle) -> Completion<i64> {
        self.read(tr, |txn, store| Ok(txn.read_version(store)))
    }

    fn set_read_version(&self, tr: TransactionHandle, version: i64) {
        if let Some(txn) = self.engine.lock().txns.get_mut(&tr.as_raw()) {
            if txn.read_version.is_some() {
                txn.defer(codes::CLIENT_INVALID_OPERATION);
            } else {
                txn.read_version = Some(version);
            }
        }
    }

    fn get_committed_version(&self, tr: TransactionHandle) -> NativeResult<i64> {
        let engine = self.engine.lock();
        match engine.txns.get(&tr.as_raw()).map(|t| t.status) {
            Some(TxnStatus::Committed(version)) => Ok(version),
            _ => Err(BackendError::new(codes::CLIENT_INVALID_OPERATION)),
        }
    }

    fn commit(&self, tr: TransactionHandle) -> Completion<()> {
        let mut guard = self.engine.lock();
        let engine = &mut *guard;
        let Some(txn) = engine.txns.get_mut(&tr.as_raw()) else {
            return Completion::failed(BackendError::new(codes::CLIENT_INVALID_OPERATION));
        };

        let checked = txn
            .check_usable()
            .and_then(|()| txn.deferred.map_or(Ok(()), Err))
            .and_then(|()| {
                let read_version = txn
                    .read_version
                    .unwrap_or_else(|| engine.store.committed_version());
                if txn.read_conflicts.is_empty() {
                    return Ok(());
                }
                if read_version < engine.store.horizon() {
                    return Err(BackendError::new(codes::TRANSACTION_TOO_OLD));
                }
                if engine.store.conflicts(read_version, &txn.read_conflicts) {
                    tracing::trace!(tr = tr.as_raw(), read_version, "commit conflict");
                    return Err(BackendError::new(codes::NOT_COMMITTED));
                }
                Ok(())
            });
        if let Err(err) = checked {
            if txn.status == TxnStatus::Active {
                txn.fail_watches(err);
            }
            let generation = txn.generation;
            drop(guard);
            return self.deliver(tr, generation, Err(err));
        }

        let version = if txn.is_read_only() {
            -1
        } else {
            let next = engine.store.committed_version() + 1;
            let updates = txn.resolve_updates(&engine.store, next);
            let version = engine
                .store
                .commit(updates.clone(), txn.write_conflicts.clone());
            for (key, value) in &updates {
                engine.watches.notify(key, value);
            }
            version
        };
        for (key, done) in txn.pending_watches.drain(..) {
            let current = engine.store.latest(&key);
            engine.watches.register(key, current.clone(), current, done);
        }
        txn.status = TxnStatus::Committed(version);
        tracing::trace!(tr = tr.as_raw(), version, "committed");
        let generation = txn.generation;

        if version > 0 {
            let horizon = engine
                .txns
                .values()
                .filter(|t| t.status == TxnStatus::Active)
                .filter_map(|t| t.read_version)
                .min()
                .unwrap_or(version);
            engine.store.prune(horizon);
        }

        drop(guard);
        self.deliver(tr, generation, Ok(()))
    }

    fn on_error(&self, tr: TransactionHandle, code: i32) -> Completion<()> {
        let mut engine = self.engine.lock();
        let Some(txn) = engine.txns.get_mut(&tr.as_raw()) else {
            return Completion::failed(BackendError::new(codes::CLIENT_INVALID_OPERATION));
        };
        if txn.status == TxnStatus::Cancelled {
            return Completion::failed(BackendError::new(codes::TRANSACTION_CANCELLED));
        }
        let err = BackendError::new(code);
        let retryable = matches!(
            code,
            codes::TIMED_OUT
                | codes::TRANSACTION_TOO_OLD
                | codes::FUTURE_VERSION
                | codes::NOT_COMMITTED
                | codes::COMMIT_UNKNOWN_RESULT
        );
        let exhausted = txn
            .options
            .retry_limit
            .is_some_and(|limit| txn.retries >= limit);
        let result = if !retryable || exhausted {
            Err(err)
        } else if let Err(timed_out) = txn.check_timeout() {
            Err(timed_out)
        } else {
            txn.retries += 1;
            txn.reset(true);
            Ok(())
        };
        let generation = txn.generation;
        drop(engine);
        self.deliver(tr, generation, result)
    }

    fn watch(&self, tr: TransactionHandle, key: &[u8]) -> Completion<()> {
        let mut guard = self.engine.lock();
        let engine = &mut *guard;
        let Some(txn) = engine.txns.get_mut(&tr.as_raw()) else {
            return Completion::failed(BackendError::new(codes::CLIENT_INVALID_OPERATION));
        };
        if let Err(err) = txn.check_usable() {
            return Completion::failed(err);
        }
        if key >= txn.read_limit() {
            return Completion::failed(BackendError::new(codes::KEY_OUTSIDE_LEGAL_RANGE));
        }
        let max = engine
            .databases
            .get(&txn.db)
            .map_or(DEFAULT_MAX_WATCHES, |db| db.max_watches);
        if engine.watches.live_count() + txn.pending_watches.len() >= max {
            return Completion::failed(BackendError::new(codes::TOO_MANY_WATCHES));
        }
        let (done, completion) = completion();
        txn.pending_watches
            .push((Bytes::copy_from_slice(key), done));
        completion
    }

    fn reset(&self, tr: TransactionHandle) {
        if let Some(txn) = self.engine.lock().txns.get_mut(&tr.as_raw()) {
            txn.reset(false);
        }
    }

    fn cancel(&self, tr: TransactionHandle) {
        if let Some(txn) = self.engine.lock().txns.get_mut(&tr.as_raw()) {
            txn.fail_watches(BackendError::new(codes::TRANSACTION_CANCELLED));
            txn.status = TxnStatus::Cancelled;
            txn.generation += 1;
        }
    }
}

#[cfg(test)]
mod tests;
