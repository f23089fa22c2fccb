//! Database handle and the transaction retry loop.

use crate::config::DatabaseConfig;
use crate::error::{Error, Result, TransactError};
use crate::future::FutureNil;
use crate::handle::HandleGuard;
use crate::options::{DatabaseOption, DatabaseOptions, TransactionOption};
use crate::range::{prefix_range, KeyRange, RangeOptions, SelectorRange};
use crate::transaction::Transaction;
use bytes::Bytes;
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};
use strictkv_backend::{codes, Backend, DatabaseHandle, InMemoryBackend, KeySelector, KeyValue};

/// A handle to a database.
///
/// `Database` is cheap to clone and safe to share between threads. All
/// clones refer to the same native handle, which is released when the last
/// clone is dropped or when [`close`](Self::close) is called.
///
/// # Running transactions
///
/// [`transact`](Self::transact) is the main entry point. It runs a closure
/// against a fresh [`Transaction`], commits, and retries the whole attempt
/// when the backend reports a retryable error:
///
/// ```rust
/// use strictkv_core::{Database, Result};
///
/// let db = Database::open_in_memory().unwrap();
/// db.transact(|tr| -> Result<()> {
///     tr.set(b"hello", b"world");
///     Ok(())
/// })
/// .unwrap();
///
/// assert_eq!(db.get(b"hello").unwrap().as_deref(), Some(&b"world"[..]));
/// ```
///
/// The closure may run more than once. It must not have effects outside
/// the transaction that would be wrong to repeat.
#[derive(Clone)]
pub struct Database {
    inner: Arc<DatabaseInner>,
}

struct DatabaseInner {
    guard: HandleGuard<DatabaseHandle>,
    config: DatabaseConfig,
}

impl Database {
    /// Opens a database on `backend` with the default configuration.
    pub fn open(backend: Arc<dyn Backend>) -> Result<Self> {
        Self::open_with_config(backend, DatabaseConfig::default())
    }

    /// Opens a database on `backend`.
    ///
    /// # Errors
    ///
    /// Returns the backend error if the handle cannot be opened or one of
    /// the configured database options is rejected.
    pub fn open_with_config(backend: Arc<dyn Backend>, config: DatabaseConfig) -> Result<Self> {
        let handle = backend.open_database()?;
        let db = Self {
            inner: Arc::new(DatabaseInner {
                guard: HandleGuard::new(backend, handle),
                config,
            }),
        };
        for option in &db.inner.config.database_options {
            db.set_option(option.clone())?;
        }
        tracing::info!(handle = ?handle, "database opened");
        Ok(db)
    }

    /// Opens a database on a fresh [`InMemoryBackend`].
    pub fn open_in_memory() -> Result<Self> {
        Self::open(Arc::new(InMemoryBackend::new()))
    }

    /// Releases the native handle. Later calls fail with `InvalidOperation`.
    ///
    /// Closing twice is a no-op.
    pub fn close(&self) {
        if self.inner.guard.release() {
            tracing::info!(handle = ?self.inner.guard.handle(), "database closed");
        }
    }

    /// Checks if the database is open.
    #[must_use]
    pub fn is_open(&self) -> bool {
        !self.inner.guard.is_released()
    }

    /// Returns the database configuration.
    #[must_use]
    pub fn config(&self) -> &DatabaseConfig {
        &self.inner.config
    }

    fn ensure_open(&self) -> Result<()> {
        if self.is_open() {
            Ok(())
        } else {
            Err(Error::invalid_operation("database is closed"))
        }
    }

    /// Typed option setters.
    #[must_use]
    pub fn options(&self) -> DatabaseOptions<'_> {
        DatabaseOptions::new(self)
    }

    /// Sets one option on the database handle.
    ///
    /// Options are not synchronized with concurrent transactions; set them
    /// before the database is shared.
    pub fn set_option(&self, option: DatabaseOption) -> Result<()> {
        self.ensure_open()?;
        let param = option.encode_param();
        self.inner
            .guard
            .backend()
            .set_database_option(self.inner.guard.handle(), option.code(), param.as_deref())
            .map_err(Error::from)
    }

    /// Creates a transaction with the configured default options applied.
    ///
    /// Most callers should use [`transact`](Self::transact) instead.
    pub fn create_transaction(&self) -> Result<Transaction> {
        self.ensure_open()?;
        let backend = Arc::clone(self.inner.guard.backend());
        let handle = backend.create_transaction(self.inner.guard.handle())?;
        let tr = Transaction::new(HandleGuard::new(backend, handle));
        for option in &self.inner.config.transaction_defaults {
            tr.set_option(option.clone())?;
        }
        Ok(tr)
    }

    /// Runs `work` in a transaction, retrying until it commits or fails
    /// with an error the backend will not retry.
    ///
    /// Each attempt gets a new transaction. If `work` returns `Ok`, the
    /// transaction is committed and the commit outcome decides the
    /// attempt. A failed attempt whose error carries a backend code is
    /// handed to `on_error` on the same transaction: if `on_error`
    /// succeeds the attempt is discarded and `work` runs again, otherwise
    /// the `on_error` failure is returned.
    ///
    /// Errors without a backend code are returned unchanged after the
    /// first occurrence. Panics inside `work` are not caught; they unwind
    /// through this call and release the attempt's transaction on the way.
    ///
    /// `Timeout` and `RetryLimit` among the configured transaction
    /// defaults bound the whole call, not each attempt. Every attempt after
    /// the first gets the time and retries still left, so `on_error` stops
    /// the loop once either runs out. With neither configured the loop
    /// retries until it commits.
    ///
    /// # Errors
    ///
    /// - `InvalidOperation` if the database is closed (no attempt is made)
    /// - the backend error if a transaction cannot be created
    /// - the terminal error of the last attempt otherwise
    pub fn transact<T, E, F>(&self, mut work: F) -> std::result::Result<T, E>
    where
        F: FnMut(&Transaction) -> std::result::Result<T, E>,
        E: TransactError,
    {
        self.ensure_open()?;
        let threshold = self.inner.config.retry_warn_threshold;
        let budget = RetryBudget::from_defaults(&self.inner.config.transaction_defaults);
        let started = Instant::now();
        let mut attempt: u32 = 0;
        loop {
            attempt = attempt.saturating_add(1);
            let tr = self.create_transaction()?;
            if attempt > 1 {
                budget.apply(&tr, started.elapsed(), attempt - 1)?;
            }

            let outcome = work(&tr).and_then(|value| {
                tr.commit().get()?;
                Ok(value)
            });
            let err = match outcome {
                Ok(value) => {
                    if attempt > 1 {
                        tracing::debug!(attempt, "transaction committed after retries");
                    }
                    return Ok(value);
                }
                Err(err) => err,
            };

            let Some(backend_error) = err.backend_error() else {
                return Err(err);
            };
            if let Err(terminal) = tr.on_error(&Error::Backend(backend_error)).get() {
                tracing::debug!(
                    attempt,
                    code = terminal.code(),
                    "transaction failed with a non-retryable error"
                );
                return Err(E::from(terminal));
            }

            tracing::debug!(attempt, code = backend_error.code(), "retrying transaction");
            if threshold > 0 && attempt == threshold {
                tracing::warn!(
                    attempt,
                    code = backend_error.code(),
                    error = %backend_error,
                    "transaction is still retrying"
                );
            }
        }
    }

    // ========================================================================
    // Single-operation transactions
    // ========================================================================

    /// Reads `key` in its own transaction.
    pub fn get(&self, key: impl AsRef<[u8]>) -> Result<Option<Bytes>> {
        self.ensure_open()?;
        let key = key.as_ref();
        self.transact(|tr| tr.get(key).get())
    }

    /// Resolves `selector` in its own transaction.
    pub fn get_key(&self, selector: &KeySelector) -> Result<Bytes> {
        self.ensure_open()?;
        self.transact(|tr| tr.get_key(selector).get())
    }

    /// Reads `[begin, end)` in its own transaction.
    pub fn get_range(
        &self,
        begin: impl AsRef<[u8]>,
        end: impl AsRef<[u8]>,
        options: RangeOptions,
    ) -> Result<Vec<KeyValue>> {
        self.ensure_open()?;
        let range = KeyRange::new(begin, end);
        self.transact(|tr| tr.get_range(range.clone(), options).get_slice())
    }

    /// Reads the range between two selectors in its own transaction.
    pub fn get_range_selector(
        &self,
        begin: &KeySelector,
        end: &KeySelector,
        options: RangeOptions,
    ) -> Result<Vec<KeyValue>> {
        self.ensure_open()?;
        let range = SelectorRange::new(begin.clone(), end.clone());
        self.transact(|tr| tr.get_range(range.clone(), options).get_slice())
    }

    /// Reads every row starting with `prefix` in its own transaction.
    pub fn get_range_starts_with(
        &self,
        prefix: impl AsRef<[u8]>,
        options: RangeOptions,
    ) -> Result<Vec<KeyValue>> {
        self.ensure_open()?;
        let range = prefix_range(prefix.as_ref())?;
        self.transact(|tr| tr.get_range(range.clone(), options).get_slice())
    }

    /// Writes `value` to `key` in its own transaction.
    pub fn set(&self, key: impl AsRef<[u8]>, value: impl AsRef<[u8]>) -> Result<()> {
        self.ensure_open()?;
        let (key, value) = (key.as_ref(), value.as_ref());
        self.transact(|tr| -> Result<()> {
            tr.set(key, value);
            Ok(())
        })
    }

    /// Clears `key` in its own transaction.
    pub fn clear(&self, key: impl AsRef<[u8]>) -> Result<()> {
        self.ensure_open()?;
        let key = key.as_ref();
        self.transact(|tr| -> Result<()> {
            tr.clear(key);
            Ok(())
        })
    }

    /// Clears `[begin, end)` in its own transaction.
    pub fn clear_range(&self, begin: impl AsRef<[u8]>, end: impl AsRef<[u8]>) -> Result<()> {
        self.ensure_open()?;
        let (begin, end) = (begin.as_ref(), end.as_ref());
        self.transact(|tr| -> Result<()> {
            tr.clear_range(begin, end);
            Ok(())
        })
    }

    /// Clears every key starting with `prefix` in its own transaction.
    pub fn clear_range_starts_with(&self, prefix: impl AsRef<[u8]>) -> Result<()> {
        self.ensure_open()?;
        let range = prefix_range(prefix.as_ref())?;
        self.transact(|tr| -> Result<()> {
            tr.clear_range(&range.begin, &range.end);
            Ok(())
        })
    }

    /// Reads `key` and watches it for the next change.
    ///
    /// Only the watch of the attempt that committed can fire. Watches from
    /// retried attempts are dropped with those attempts.
    pub fn get_and_watch(&self, key: impl AsRef<[u8]>) -> Result<(Option<Bytes>, FutureNil)> {
        self.ensure_open()?;
        let key = key.as_ref();
        self.transact(|tr| -> Result<_> {
            let value = tr.get(key).get()?;
            Ok((value, tr.watch(key)))
        })
    }

    /// Writes `value` to `key` and watches it for the next change.
    pub fn set_and_watch(
        &self,
        key: impl AsRef<[u8]>,
        value: impl AsRef<[u8]>,
    ) -> Result<FutureNil> {
        self.ensure_open()?;
        let (key, value) = (key.as_ref(), value.as_ref());
        self.transact(|tr| -> Result<_> {
            tr.set(key, value);
            Ok(tr.watch(key))
        })
    }

    /// Clears `key` and watches it for the next change.
    pub fn clear_and_watch(&self, key: impl AsRef<[u8]>) -> Result<FutureNil> {
        self.ensure_open()?;
        let key = key.as_ref();
        self.transact(|tr| -> Result<_> {
            tr.clear(key);
            Ok(tr.watch(key))
        })
    }
}

/// Time and retries a `transact` call may spend across all its attempts.
#[derive(Debug, Clone, Copy, Default)]
struct RetryBudget {
    timeout: Option<Duration>,
    retry_limit: Option<i64>,
}

impl RetryBudget {
    /// Takes the last `Timeout` and `RetryLimit` among `defaults`.
    fn from_defaults(defaults: &[TransactionOption]) -> Self {
        let mut budget = Self::default();
        for option in defaults {
            match option {
                TransactionOption::Timeout(ms) => {
                    budget.timeout = u64::try_from(*ms)
                        .ok()
                        .filter(|&ms| ms > 0)
                        .map(Duration::from_millis);
                }
                TransactionOption::RetryLimit(limit) => {
                    budget.retry_limit = (*limit >= 0).then_some(*limit);
                }
                _ => {}
            }
        }
        budget
    }

    /// Narrows the options of a retry attempt's fresh transaction to what
    /// is left after `elapsed` and `retries`.
    fn apply(&self, tr: &Transaction, elapsed: Duration, retries: u32) -> Result<()> {
        if let Some(timeout) = self.timeout {
            let remaining = timeout.saturating_sub(elapsed);
            if remaining.is_zero() {
                return Err(Error::from_code(codes::TRANSACTION_TIMED_OUT));
            }
            let ms = i64::try_from(remaining.as_millis()).unwrap_or(i64::MAX);
            tr.set_option(TransactionOption::Timeout(ms.max(1)))?;
        }
        if let Some(limit) = self.retry_limit {
            let left = limit.saturating_sub(i64::from(retries)).max(0);
            tr.set_option(TransactionOption::RetryLimit(left))?;
        }
        Ok(())
    }
}

impl fmt::Debug for Database {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Database")
            .field("handle", &self.inner.guard.handle())
            .field("is_open", &self.is_open())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::panic::{catch_unwind, AssertUnwindSafe};

    fn create_db() -> Database {
        Database::open_in_memory().unwrap()
    }

    #[test]
    fn open_in_memory() {
        let db = create_db();
        assert!(db.is_open());
    }

    #[test]
    fn single_attempt_runs_once() {
        let db = create_db();
        let mut calls = 0;
        let value = db
            .transact(|tr| -> Result<u32> {
                calls += 1;
                tr.set(b"a", b"1");
                Ok(42)
            })
            .unwrap();
        assert_eq!(value, 42);
        assert_eq!(calls, 1);
        assert_eq!(db.get(b"a").unwrap().as_deref(), Some(&b"1"[..]));
    }

    #[test]
    fn conflict_is_retried_with_a_new_transaction() {
        let db = create_db();
        db.set(b"k", b"0").unwrap();

        let mut calls = 0;
        let value = db
            .transact(|tr| -> Result<Option<Bytes>> {
                calls += 1;
                let seen = tr.get(b"k").get()?;
                if calls == 1 {
                    db.set(b"k", b"theirs")?;
                }
                tr.set(b"k", b"mine");
                Ok(seen)
            })
            .unwrap();

        assert_eq!(calls, 2);
        assert_eq!(value.as_deref(), Some(&b"theirs"[..]));
        assert_eq!(db.get(b"k").unwrap().as_deref(), Some(&b"mine"[..]));
    }

    #[test]
    fn failing_on_error_is_terminal() {
        let config = DatabaseConfig::new().transaction_default(TransactionOption::RetryLimit(0));
        let db = Database::open_with_config(Arc::new(InMemoryBackend::new()), config).unwrap();
        db.set(b"k", b"0").unwrap();

        let mut calls = 0;
        let err = db
            .transact(|tr| -> Result<()> {
                calls += 1;
                tr.get(b"k").get()?;
                db.set(b"k", b"other")?;
                tr.set(b"k", b"mine");
                Ok(())
            })
            .unwrap_err();
        assert!(err.is_conflict());
        assert_eq!(calls, 1);
    }

    #[test]
    fn retry_limit_covers_the_whole_call() {
        let config = DatabaseConfig::new().transaction_default(TransactionOption::RetryLimit(2));
        let db = Database::open_with_config(Arc::new(InMemoryBackend::new()), config).unwrap();
        db.set(b"k", b"0").unwrap();

        let mut calls = 0;
        let err = db
            .transact(|tr| -> Result<()> {
                calls += 1;
                tr.get(b"k").get()?;
                db.set(b"k", b"other")?;
                tr.set(b"k", b"mine");
                Ok(())
            })
            .unwrap_err();
        assert!(err.is_conflict());
        assert_eq!(calls, 3);
    }

    #[test]
    fn budget_takes_the_last_default() {
        let budget = RetryBudget::from_defaults(&[
            TransactionOption::Timeout(100),
            TransactionOption::RetryLimit(4),
            TransactionOption::Timeout(0),
            TransactionOption::RetryLimit(-1),
            TransactionOption::RetryLimit(7),
        ]);
        assert_eq!(budget.timeout, None);
        assert_eq!(budget.retry_limit, Some(7));

        let db = create_db();
        let tr = db.create_transaction().unwrap();
        let spent = RetryBudget {
            timeout: Some(Duration::from_millis(10)),
            retry_limit: None,
        };
        let err = spent.apply(&tr, Duration::from_millis(10), 1).unwrap_err();
        assert_eq!(err.code(), codes::TRANSACTION_TIMED_OUT);
    }

    #[test]
    fn non_retryable_backend_error_stops_the_loop() {
        let db = create_db();
        let mut calls = 0;
        let err = db
            .transact(|tr| -> Result<()> {
                calls += 1;
                tr.set(b"\xff/system", b"x");
                Ok(())
            })
            .unwrap_err();
        assert_eq!(err.code(), codes::KEY_OUTSIDE_LEGAL_RANGE);
        assert_eq!(calls, 1);
    }

    #[derive(Debug, PartialEq)]
    enum AppError {
        Db(Error),
        Rejected,
    }

    impl From<Error> for AppError {
        fn from(err: Error) -> Self {
            AppError::Db(err)
        }
    }

    impl TransactError for AppError {
        fn backend_error(&self) -> Option<strictkv_backend::BackendError> {
            match self {
                AppError::Db(err) => err.backend_error(),
                AppError::Rejected => None,
            }
        }
    }

    #[test]
    fn caller_errors_pass_through_untouched() {
        let db = create_db();
        let mut calls = 0;
        let err = db
            .transact(|tr| {
                calls += 1;
                tr.set(b"a", b"1");
                Err::<(), _>(AppError::Rejected)
            })
            .unwrap_err();
        assert_eq!(err, AppError::Rejected);
        assert_eq!(calls, 1);
        assert_eq!(db.get(b"a").unwrap(), None);
    }

    #[test]
    fn panics_propagate_unchanged() {
        let db = create_db();
        let mut calls = 0;
        let result = catch_unwind(AssertUnwindSafe(|| {
            db.transact(|_tr| -> Result<()> {
                calls += 1;
                panic!("logic fault");
            })
        }));
        let payload = result.unwrap_err();
        assert_eq!(payload.downcast_ref::<&str>(), Some(&"logic fault"));
        assert_eq!(calls, 1);
    }

    #[test]
    fn closed_database_short_circuits() {
        let memory = Arc::new(InMemoryBackend::new());
        let db = Database::open(memory.clone()).unwrap();
        db.close();
        db.close();
        assert!(!db.is_open());

        let mut calls = 0;
        let err = db
            .transact(|_tr| -> Result<()> {
                calls += 1;
                Ok(())
            })
            .unwrap_err();
        assert!(matches!(err, Error::InvalidOperation { .. }));
        assert_eq!(calls, 0);
        assert!(matches!(db.get(b"a"), Err(Error::InvalidOperation { .. })));
        assert!(matches!(db.set(b"a", b"1"), Err(Error::InvalidOperation { .. })));
        assert!(matches!(
            db.create_transaction(),
            Err(Error::InvalidOperation { .. })
        ));
        assert_eq!(memory.open_transactions(), 0);
    }

    #[test]
    fn defaults_apply_to_every_attempt() {
        let config = DatabaseConfig::new()
            .transaction_default(TransactionOption::ReadYourWritesDisable);
        let db = Database::open_with_config(Arc::new(InMemoryBackend::new()), config).unwrap();
        db.set(b"k", b"0").unwrap();

        let mut seen = Vec::new();
        db.transact(|tr| -> Result<()> {
            tr.set(b"mine", b"x");
            seen.push(tr.get(b"mine").get()?);
            tr.get(b"k").get()?;
            if seen.len() == 1 {
                db.set(b"k", b"other")?;
            }
            Ok(())
        })
        .unwrap();
        assert_eq!(seen, vec![None, None]);
    }

    #[test]
    fn transactions_are_released_after_each_attempt() {
        let memory = Arc::new(InMemoryBackend::new());
        let db = Database::open(memory.clone()).unwrap();
        db.set(b"k", b"0").unwrap();
        let mut calls = 0;
        db.transact(|tr| -> Result<()> {
            calls += 1;
            tr.get(b"k").get()?;
            if calls < 3 {
                db.set(b"k", format!("{calls}"))?;
            }
            tr.set(b"k", b"done");
            Ok(())
        })
        .unwrap();
        assert_eq!(calls, 3);
        assert_eq!(memory.open_transactions(), 0);
    }

    #[test]
    fn set_and_watch_fires_on_change() {
        let db = create_db();
        let watch = db.set_and_watch(b"w", b"1").unwrap();
        assert!(!watch.wait_timeout(Duration::from_millis(10)));
        db.set(b"w", b"2").unwrap();
        watch.get().unwrap();
    }

    #[test]
    fn get_and_watch_returns_value() {
        let db = create_db();
        db.set(b"w", b"1").unwrap();
        let (value, watch) = db.get_and_watch(b"w").unwrap();
        assert_eq!(value.as_deref(), Some(&b"1"[..]));
        db.clear(b"w").unwrap();
        watch.get().unwrap();
    }

    #[test]
    fn clear_and_watch_ignores_unchanged_writes() {
        let db = create_db();
        let watch = db.clear_and_watch(b"w").unwrap();
        db.clear(b"w").unwrap();
        assert!(!watch.is_ready());
        db.set(b"w", b"now").unwrap();
        watch.get().unwrap();
    }

    #[test]
    fn database_options() {
        let db = create_db();
        db.options().set_max_watches(1).unwrap();
        let _first = db.set_and_watch(b"a", b"1").unwrap();
        let second = db.set_and_watch(b"b", b"1").unwrap();
        assert_eq!(second.get().unwrap_err().code(), codes::TOO_MANY_WATCHES);
        assert_eq!(
            db.set_option(DatabaseOption::MaxWatches(-1)).unwrap_err().code(),
            codes::INVALID_OPTION_VALUE
        );
    }

    #[test]
    fn range_wrappers() {
        let db = create_db();
        for key in ["a", "b", "c", "d"] {
            db.set(key, key).unwrap();
        }
        let rows = db.get_range(b"b", b"d", RangeOptions::new()).unwrap();
        assert_eq!(rows.len(), 2);

        let rows = db
            .get_range_selector(
                &KeySelector::first_greater_than(b"a"),
                &KeySelector::first_greater_or_equal(b"\xff"),
                RangeOptions::new().limit(2),
            )
            .unwrap();
        assert_eq!(&rows[0].key[..], b"b");
        assert_eq!(rows.len(), 2);

        db.clear_range(b"a", b"c").unwrap();
        assert_eq!(
            &db.get_key(&KeySelector::first_greater_or_equal(b"")).unwrap()[..],
            b"c"
        );
    }
}
