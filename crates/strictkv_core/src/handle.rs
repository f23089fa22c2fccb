//! Owning guards for native handles.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use strictkv_backend::{Backend, DatabaseHandle, TransactionHandle};

/// A native handle type and the backend call that releases it.
pub(crate) trait NativeHandle: Copy + fmt::Debug {
    fn release(self, backend: &dyn Backend);
}

impl NativeHandle for DatabaseHandle {
    fn release(self, backend: &dyn Backend) {
        backend.destroy_database(self);
    }
}

impl NativeHandle for TransactionHandle {
    fn release(self, backend: &dyn Backend) {
        backend.destroy_transaction(self);
    }
}

/// Owns one native handle and releases it exactly once, on [`release`]
/// or on drop, whichever comes first.
///
/// [`release`]: HandleGuard::release
pub(crate) struct HandleGuard<H: NativeHandle> {
    backend: Arc<dyn Backend>,
    handle: H,
    released: AtomicBool,
}

impl<H: NativeHandle> HandleGuard<H> {
    pub(crate) fn new(backend: Arc<dyn Backend>, handle: H) -> Self {
        Self {
            backend,
            handle,
            released: AtomicBool::new(false),
        }
    }

    pub(crate) fn handle(&self) -> H {
        self.handle
    }

    pub(crate) fn backend(&self) -> &Arc<dyn Backend> {
        &self.backend
    }

    pub(crate) fn is_released(&self) -> bool {
        self.released.load(Ordering::Acquire)
    }

    /// Releases the handle. Returns false if it was already released.
    pub(crate) fn release(&self) -> bool {
        if self.released.swap(true, Ordering::AcqRel) {
            return false;
        }
        self.handle.release(self.backend.as_ref());
        true
    }
}

impl<H: NativeHandle> Drop for HandleGuard<H> {
    fn drop(&mut self) {
        self.release();
    }
}

impl<H: NativeHandle> fmt::Debug for HandleGuard<H> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HandleGuard")
            .field("handle", &self.handle)
            .field("released", &self.is_released())
            .finish_non_exhaustive()
    }
}
