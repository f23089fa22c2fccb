//! Single-assignment completion cells.
//!
//! Every asynchronous backend call hands back a [`Completion`] (the reader
//! end) and keeps the matching [`Completer`] (the writer end) until the
//! operation finishes, possibly on one of its own threads.
//!
//! ## Guarantees
//!
//! - A cell is settled at most once. Later attempts to settle are ignored.
//! - Readers block on a condition variable until the cell is settled, and
//!   every read after that observes the same outcome.
//! - Cancellation is a settlement with [`codes::OPERATION_CANCELLED`].
//! - Dropping an unsettled [`Completer`] settles the cell with
//!   [`codes::BROKEN_PROMISE`], so a reader can never wait forever on a
//!   writer that has gone away.

use crate::error::{codes, BackendError};
use parking_lot::{Condvar, Mutex};
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

struct Slot<T> {
    state: Mutex<Option<Result<T, BackendError>>>,
    settled: Condvar,
}

impl<T> Slot<T> {
    fn pending() -> Self {
        Self {
            state: Mutex::new(None),
            settled: Condvar::new(),
        }
    }

    fn settled_with(result: Result<T, BackendError>) -> Self {
        Self {
            state: Mutex::new(Some(result)),
            settled: Condvar::new(),
        }
    }

    /// Stores `result` if the slot is still pending. Returns whether it was stored.
    fn settle(&self, result: Result<T, BackendError>) -> bool {
        let mut state = self.state.lock();
        if state.is_some() {
            return false;
        }
        *state = Some(result);
        drop(state);
        self.settled.notify_all();
        true
    }
}

/// Creates a connected writer/reader pair.
#[must_use]
pub fn completion<T>() -> (Completer<T>, Completion<T>) {
    let slot = Arc::new(Slot::pending());
    (
        Completer {
            slot: Some(Arc::clone(&slot)),
        },
        Completion { slot },
    )
}

/// Reader end of a completion cell.
///
/// Cloning is cheap and every clone observes the same outcome.
pub struct Completion<T> {
    slot: Arc<Slot<T>>,
}

impl<T> Clone for Completion<T> {
    fn clone(&self) -> Self {
        Self {
            slot: Arc::clone(&self.slot),
        }
    }
}

impl<T> Completion<T> {
    /// A completion that is already settled with `value`.
    #[must_use]
    pub fn ready(value: T) -> Self {
        Self {
            slot: Arc::new(Slot::settled_with(Ok(value))),
        }
    }

    /// A completion that is already settled with `err`.
    #[must_use]
    pub fn failed(err: BackendError) -> Self {
        Self {
            slot: Arc::new(Slot::settled_with(Err(err))),
        }
    }

    /// Returns true once the cell is settled. Never blocks.
    #[must_use]
    pub fn is_ready(&self) -> bool {
        self.slot.state.lock().is_some()
    }

    /// Blocks the calling thread until the cell is settled.
    pub fn wait(&self) {
        let mut state = self.slot.state.lock();
        while state.is_none() {
            self.slot.settled.wait(&mut state);
        }
    }

    /// Blocks until the cell is settled or `timeout` elapses.
    ///
    /// Returns whether the cell is settled.
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut state = self.slot.state.lock();
        while state.is_none() {
            if self
                .slot
                .settled
                .wait_until(&mut state, deadline)
                .timed_out()
            {
                return state.is_some();
            }
        }
        true
    }

    /// Requests cancellation.
    ///
    /// A pending cell settles with `operation_cancelled`; a settled cell is
    /// left untouched.
    pub fn cancel(&self) {
        self.slot
            .settle(Err(BackendError::new(codes::OPERATION_CANCELLED)));
    }

    /// Waits for the cell, then runs `f` against the stored outcome.
    pub fn with_result<R>(&self, f: impl FnOnce(&Result<T, BackendError>) -> R) -> R {
        let mut state = self.slot.state.lock();
        loop {
            if let Some(result) = state.as_ref() {
                return f(result);
            }
            self.slot.settled.wait(&mut state);
        }
    }
}

impl<T: Clone> Completion<T> {
    /// Waits for the cell and returns a copy of the outcome.
    pub fn result(&self) -> Result<T, BackendError> {
        self.with_result(Clone::clone)
    }
}

impl<T> fmt::Debug for Completion<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Completion")
            .field("ready", &self.is_ready())
            .finish_non_exhaustive()
    }
}

/// Writer end of a completion cell.
pub struct Completer<T> {
    slot: Option<Arc<Slot<T>>>,
}

impl<T> Completer<T> {
    /// Settles the cell. Returns false if it had already been settled
    /// (for example by cancellation).
    pub fn complete(mut self, result: Result<T, BackendError>) -> bool {
        match self.slot.take() {
            Some(slot) => slot.settle(result),
            None => false,
        }
    }

    /// Settles the cell with a value.
    pub fn succeed(self, value: T) -> bool {
        self.complete(Ok(value))
    }

    /// Settles the cell with an error.
    pub fn fail(self, err: BackendError) -> bool {
        self.complete(Err(err))
    }

    /// Returns true if a reader already settled the cell by cancelling it.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.slot.as_ref().map_or(true, |slot| slot.state.lock().is_some())
    }

    /// Returns true if every reader end has been dropped.
    #[must_use]
    pub fn is_abandoned(&self) -> bool {
        self.slot
            .as_ref()
            .map_or(true, |slot| Arc::strong_count(slot) == 1)
    }
}

impl<T> Drop for Completer<T> {
    fn drop(&mut self) {
        if let Some(slot) = self.slot.take() {
            slot.settle(Err(BackendError::new(codes::BROKEN_PROMISE)));
        }
    }
}

impl<T> fmt::Debug for Completer<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Completer")
            .field("cancelled", &self.is_cancelled())
            .finish_non_exhaustive()
    }
}
