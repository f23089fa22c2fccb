//! Futures returned by transaction operations.
//!
//! A [`Future`] is the reader end of one pending backend operation. Issuing
//! an operation never blocks; only [`Future::get`], [`Future::wait`] and
//! [`Future::wait_timeout`] do. Several reads can therefore be issued
//! back to back and resolved afterwards:
//!
//! ```rust
//! use strictkv_core::{Database, Result};
//!
//! let db = Database::open_in_memory().unwrap();
//! db.set(b"a", b"1").unwrap();
//! db.set(b"b", b"2").unwrap();
//!
//! let (a, b) = db
//!     .transact(|tr| -> Result<_> {
//!         let a = tr.get(b"a");
//!         let b = tr.get(b"b");
//!         Ok((a.get()?, b.get()?))
//!     })
//!     .unwrap();
//! assert_eq!(a.as_deref(), Some(&b"1"[..]));
//! assert_eq!(b.as_deref(), Some(&b"2"[..]));
//! ```
//!
//! Once settled, a future keeps its outcome: every later `get` returns the
//! same value or the same error without touching the backend again.

use crate::error::{Error, Result};
use bytes::Bytes;
use std::fmt;
use std::time::Duration;
use strictkv_backend::Completion;

enum State<T> {
    Pending(Completion<T>),
    Failed(Error),
}

/// A pending value of type `T`.
pub struct Future<T> {
    state: State<T>,
}

/// Future returned by point reads. `None` means the key is absent.
pub type FutureValue = Future<Option<Bytes>>;

/// Future returned by selector resolution.
pub type FutureKey = Future<Bytes>;

/// Future with no value: commits, `on_error`, watches.
pub type FutureNil = Future<()>;

/// Future returned by read-version queries.
pub type FutureVersion = Future<i64>;

impl<T> Future<T> {
    pub(crate) fn from_completion(completion: Completion<T>) -> Self {
        Self {
            state: State::Pending(completion),
        }
    }

    /// A future that is already settled with `value`.
    #[must_use]
    pub fn ready(value: T) -> Self {
        Self::from_completion(Completion::ready(value))
    }

    /// A future that is already settled with `err`.
    #[must_use]
    pub fn failed(err: Error) -> Self {
        Self {
            state: State::Failed(err),
        }
    }

    /// Returns true once the future has settled. Never blocks.
    #[must_use]
    pub fn is_ready(&self) -> bool {
        match &self.state {
            State::Pending(completion) => completion.is_ready(),
            State::Failed(_) => true,
        }
    }

    /// Blocks until the future settles.
    pub fn wait(&self) {
        if let State::Pending(completion) = &self.state {
            completion.wait();
        }
    }

    /// Blocks until the future settles or `timeout` elapses.
    ///
    /// Returns whether the future has settled.
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        match &self.state {
            State::Pending(completion) => completion.wait_timeout(timeout),
            State::Failed(_) => true,
        }
    }

    /// Requests cancellation.
    ///
    /// A future that has not settled yet settles with
    /// [`Error::OperationCancelled`]. A settled future is unaffected.
    pub fn cancel(&self) {
        if let State::Pending(completion) = &self.state {
            completion.cancel();
        }
    }
}

impl<T: Clone> Future<T> {
    /// Waits for the future and returns its value or error.
    pub fn get(&self) -> Result<T> {
        match &self.state {
            State::Pending(completion) => completion.result().map_err(Error::from),
            State::Failed(err) => Err(err.clone()),
        }
    }
}

impl<T> Clone for Future<T> {
    fn clone(&self) -> Self {
        let state = match &self.state {
            State::Pending(completion) => State::Pending(completion.clone()),
            State::Failed(err) => State::Failed(err.clone()),
        };
        Self { state }
    }
}

impl<T> fmt::Debug for Future<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Future")
            .field("ready", &self.is_ready())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;
    use strictkv_backend::{codes, completion, BackendError};

    #[test]
    fn repeated_get_is_stable() {
        let (done, completion) = completion::<i64>();
        let future = Future::from_completion(completion);
        assert!(!future.is_ready());
        done.fail(BackendError::new(codes::NOT_COMMITTED));

        let first = future.get();
        let second = future.get();
        assert_eq!(first, second);
        assert!(first.unwrap_err().is_conflict());
    }

    #[test]
    fn cancel_settles_with_operation_cancelled() {
        let (_done, completion) = completion::<()>();
        let future = Future::from_completion(completion);
        future.cancel();
        assert!(future.is_ready());
        assert_eq!(future.get(), Err(Error::OperationCancelled));
    }

    #[test]
    fn cancel_after_settle_keeps_value() {
        let future = Future::ready(7i64);
        future.cancel();
        assert_eq!(future.get(), Ok(7));
    }

    #[test]
    fn settles_from_another_thread() {
        let (done, completion) = completion::<Bytes>();
        let future = Future::from_completion(completion);
        let writer = thread::spawn(move || {
            thread::sleep(Duration::from_millis(10));
            done.succeed(Bytes::from_static(b"k"));
        });
        assert_eq!(future.get().unwrap(), Bytes::from_static(b"k"));
        writer.join().unwrap();
    }

    #[test]
    fn wait_timeout_reports_pending() {
        let (_done, completion) = completion::<()>();
        let future = Future::from_completion(completion);
        assert!(!future.wait_timeout(Duration::from_millis(5)));
        assert!(Future::<()>::failed(Error::invalid_operation("x")).wait_timeout(Duration::ZERO));
    }

    #[test]
    fn clones_share_the_outcome() {
        let (done, completion) = completion::<i64>();
        let future = Future::from_completion(completion);
        let clone = future.clone();
        done.succeed(3);
        assert_eq!(future.get(), Ok(3));
        assert_eq!(clone.get(), Ok(3));
    }
}
