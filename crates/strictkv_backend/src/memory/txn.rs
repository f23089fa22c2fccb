//! Per-handle transaction state inside the in-memory engine.

use super::mutation::{self, VALUE_SIZE_LIMIT};
use super::store::VersionedStore;
use crate::completion::Completer;
use crate::error::{codes, BackendError};
use crate::types::MutationType;
use bytes::Bytes;
use std::collections::{BTreeMap, BTreeSet};
use std::time::{Duration, Instant};

/// Maximum key size accepted by the engine.
pub(crate) const KEY_SIZE_LIMIT: usize = 10_000;

/// One buffered mutation, in call order.
#[derive(Debug, Clone)]
pub(crate) enum Mutation {
    Set(Bytes, Bytes),
    Clear(Bytes),
    ClearRange(Bytes, Bytes),
    Atomic(Bytes, Bytes, MutationType),
}

/// Lifecycle of a transaction handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum TxnStatus {
    Active,
    Committed(i64),
    Cancelled,
}

/// Options the engine interprets. Others are accepted and ignored.
#[derive(Debug, Clone, Default)]
pub(crate) struct TxnOptions {
    pub(crate) read_your_writes_disable: bool,
    pub(crate) next_write_no_write_conflict_range: bool,
    pub(crate) access_system_keys: bool,
    pub(crate) read_system_keys: bool,
    pub(crate) timeout: Option<Duration>,
    pub(crate) retry_limit: Option<i64>,
}

pub(crate) struct TxnState {
    pub(crate) db: u64,
    pub(crate) status: TxnStatus,
    pub(crate) read_version: Option<i64>,
    pub(crate) mutations: Vec<Mutation>,
    pub(crate) read_conflicts: Vec<(Bytes, Bytes)>,
    pub(crate) write_conflicts: Vec<(Bytes, Bytes)>,
    pub(crate) pending_watches: Vec<(Bytes, Completer<()>)>,
    pub(crate) deferred: Option<BackendError>,
    pub(crate) options: TxnOptions,
    pub(crate) retries: i64,
    pub(crate) started: Instant,
    /// Bumped whenever outstanding completions must no longer be delivered.
    pub(crate) generation: u64,
}

impl TxnState {
    pub(crate) fn new(db: u64) -> Self {
        Self {
            db,
            status: TxnStatus::Active,
            read_version: None,
            mutations: Vec::new(),
            read_conflicts: Vec::new(),
            write_conflicts: Vec::new(),
            pending_watches: Vec::new(),
            deferred: None,
            options: TxnOptions::default(),
            retries: 0,
            started: Instant::now(),
            generation: 0,
        }
    }

    /// Clears buffered state. `keep_options` distinguishes `on_error` from `reset`.
    pub(crate) fn reset(&mut self, keep_options: bool) {
        self.fail_watches(BackendError::new(codes::TRANSACTION_CANCELLED));
        self.status = TxnStatus::Active;
        self.read_version = None;
        self.mutations.clear();
        self.read_conflicts.clear();
        self.write_conflicts.clear();
        self.deferred = None;
        self.generation += 1;
        if !keep_options {
            self.options = TxnOptions::default();
            self.retries = 0;
            self.started = Instant::now();
        }
    }

    pub(crate) fn fail_watches(&mut self, err: BackendError) {
        for (_, done) in self.pending_watches.drain(..) {
            done.fail(err);
        }
    }

    /// Fails fast for cancelled, committed or timed-out handles.
    pub(crate) fn check_usable(&self) -> Result<(), BackendError> {
        match self.status {
            TxnStatus::Cancelled => Err(BackendError::new(codes::TRANSACTION_CANCELLED)),
            TxnStatus::Committed(_) => Err(BackendError::new(codes::USED_DURING_COMMIT)),
            TxnStatus::Active => self.check_timeout(),
        }
    }

    pub(crate) fn check_timeout(&self) -> Result<(), BackendError> {
        match self.options.timeout {
            Some(limit) if self.started.elapsed() >= limit => {
                Err(BackendError::new(codes::TRANSACTION_TIMED_OUT))
            }
            _ => Ok(()),
        }
    }

    /// Highest key this handle may read.
    pub(crate) fn read_limit(&self) -> &'static [u8] {
        if self.options.read_system_keys || self.options.access_system_keys {
            b"\xff\xff"
        } else {
            b"\xff"
        }
    }

    /// Highest key this handle may write.
    pub(crate) fn write_limit(&self) -> &'static [u8] {
        if self.options.access_system_keys {
            b"\xff\xff"
        } else {
            b"\xff"
        }
    }

    /// Read version, chosen from the store on first use.
    pub(crate) fn read_version(&mut self, store: &VersionedStore) -> i64 {
        *self
            .read_version
            .get_or_insert_with(|| store.committed_version())
    }

    /// Records a deferred error unless one is already pending.
    pub(crate) fn defer(&mut self, code: i32) {
        self.deferred.get_or_insert(BackendError::new(code));
    }

    /// Validates and buffers a mutation.
    pub(crate) fn push_mutation(&mut self, mutation: Mutation) {
        if let Err(err) = self.check_usable() {
            self.defer(err.code());
            return;
        }
        let limit = self.write_limit();
        let (conflict_begin, conflict_end) = match &mutation {
            Mutation::Set(key, value) => {
                if key.len() > KEY_SIZE_LIMIT {
                    return self.defer(codes::KEY_TOO_LARGE);
                }
                if value.len() > VALUE_SIZE_LIMIT {
                    return self.defer(codes::VALUE_TOO_LARGE);
                }
                if &key[..] >= limit {
                    return self.defer(codes::KEY_OUTSIDE_LEGAL_RANGE);
                }
                (key.clone(), key_after(key))
            }
            Mutation::Clear(key) => {
                if &key[..] >= limit {
                    return self.defer(codes::KEY_OUTSIDE_LEGAL_RANGE);
                }
                (key.clone(), key_after(key))
            }
            Mutation::ClearRange(begin, end) => {
                if begin > end {
                    return self.defer(codes::INVERTED_RANGE);
                }
                if &end[..] > limit {
                    return self.defer(codes::KEY_OUTSIDE_LEGAL_RANGE);
                }
                (begin.clone(), end.clone())
            }
            Mutation::Atomic(key, param, op) => {
                if key.len() > KEY_SIZE_LIMIT {
                    return self.defer(codes::KEY_TOO_LARGE);
                }
                if param.len() > VALUE_SIZE_LIMIT {
                    return self.defer(codes::VALUE_TOO_LARGE);
                }
                let template = match op {
                    MutationType::SetVersionstampedKey => Some(key),
                    MutationType::SetVersionstampedValue => Some(param),
                    _ => None,
                };
                if template.is_some_and(|t| !mutation::is_versionstamp_template(t)) {
                    return self.defer(codes::CLIENT_INVALID_OPERATION);
                }
                if *op != MutationType::SetVersionstampedKey && &key[..] >= limit {
                    return self.defer(codes::KEY_OUTSIDE_LEGAL_RANGE);
                }
                (key.clone(), key_after(key))
            }
        };
        if self.options.next_write_no_write_conflict_range {
            self.options.next_write_no_write_conflict_range = false;
        } else if !matches!(mutation, Mutation::Atomic(_, _, MutationType::SetVersionstampedKey)) {
            self.write_conflicts.push((conflict_begin, conflict_end));
        }
        self.mutations.push(mutation);
    }

    /// Value of `key` as this handle sees it.
    pub(crate) fn view(&self, store: &VersionedStore, version: i64, key: &[u8]) -> Option<Bytes> {
        let base = store.read_at(key, version);
        if self.options.read_your_writes_disable {
            return base;
        }
        self.mutations
            .iter()
            .fold(base, |value, m| apply_local(m, key, value))
    }

    /// Live rows in `[begin, end)` as this handle sees them, ascending.
    pub(crate) fn view_range(
        &self,
        store: &VersionedStore,
        version: i64,
        begin: &[u8],
        end: &[u8],
    ) -> Vec<(Bytes, Bytes)> {
        if begin >= end {
            return Vec::new();
        }
        if self.options.read_your_writes_disable || self.mutations.is_empty() {
            return store.range_at(begin, end, version);
        }
        let mut candidates: BTreeSet<Bytes> = store
            .range_at(begin, end, version)
            .into_iter()
            .map(|(key, _)| key)
            .collect();
        for m in &self.mutations {
            match m {
                Mutation::Set(key, _) | Mutation::Atomic(key, _, _) => {
                    if &key[..] >= begin && &key[..] < end {
                        candidates.insert(key.clone());
                    }
                }
                Mutation::Clear(_) | Mutation::ClearRange(_, _) => {}
            }
        }
        candidates
            .into_iter()
            .filter_map(|key| self.view(store, version, &key).map(|value| (key, value)))
            .collect()
    }

    /// Resolves buffered mutations into final key updates against the
    /// latest committed state, splicing versionstamps for `version`.
    pub(crate) fn resolve_updates(
        &self,
        store: &VersionedStore,
        version: i64,
    ) -> Vec<(Bytes, Option<Bytes>)> {
        let latest = store.committed_version();
        let stamp = mutation::versionstamp(version);
        let mut values: BTreeMap<Bytes, Option<Bytes>> = Default::default();

        let current = |values: &BTreeMap<Bytes, Option<Bytes>>, key: &Bytes| {
            values
                .get(key)
                .cloned()
                .unwrap_or_else(|| store.read_at(key, latest))
        };

        for m in &self.mutations {
            match m {
                Mutation::Set(key, value) => {
                    values.insert(key.clone(), Some(value.clone()));
                }
                Mutation::Clear(key) => {
                    values.insert(key.clone(), None);
                }
                Mutation::ClearRange(begin, end) => {
                    let mut keys = store.live_keys(begin, end, latest);
                    keys.extend(
                        values
                            .range(begin.clone()..end.clone())
                            .map(|(key, _)| key.clone()),
                    );
                    for key in keys {
                        values.insert(key, None);
                    }
                }
                Mutation::Atomic(key, param, MutationType::SetVersionstampedKey) => {
                    if let Some(key) = mutation::splice_versionstamp(key, &stamp) {
                        values.insert(key, Some(param.clone()));
                    }
                }
                Mutation::Atomic(key, param, MutationType::SetVersionstampedValue) => {
                    if let Some(value) = mutation::splice_versionstamp(param, &stamp) {
                        values.insert(key.clone(), Some(value));
                    }
                }
                Mutation::Atomic(key, param, op) => {
                    let existing = current(&values, key);
                    let next = mutation::apply(*op, existing.as_deref(), param);
                    values.insert(key.clone(), next);
                }
            }
        }
        values.into_iter().collect()
    }

    /// Whether the commit would write anything.
    pub(crate) fn is_read_only(&self) -> bool {
        self.mutations.is_empty() && self.write_conflicts.is_empty()
    }
}

/// Applies one buffered mutation to a locally viewed value.
fn apply_local(m: &Mutation, key: &[u8], value: Option<Bytes>) -> Option<Bytes> {
    match m {
        Mutation::Set(k, v) if &k[..] == key => Some(v.clone()),
        Mutation::Clear(k) if &k[..] == key => None,
        Mutation::ClearRange(b, e) if key >= &b[..] && key < &e[..] => None,
        Mutation::Atomic(_, _, MutationType::SetVersionstampedKey) => value,
        Mutation::Atomic(k, _, MutationType::SetVersionstampedValue) if &k[..] == key => value,
        Mutation::Atomic(k, param, op) if &k[..] == key => {
            mutation::apply(*op, value.as_deref(), param)
        }
        _ => value,
    }
}

/// The smallest key strictly greater than `key`.
pub(crate) fn key_after(key: &[u8]) -> Bytes {
    let mut next = Vec::with_capacity(key.len() + 1);
    next.extend_from_slice(key);
    next.push(0);
    Bytes::from(next)
}
