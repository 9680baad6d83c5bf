//! Concurrency primitives and shared handle types.
//!
//! - [`Semaphore`]: bounded FIFO admission with runtime-adjustable limit.
//! - [`AbortController`] / [`AbortSignal`]: cooperative cancellation threaded
//!   through fetch options.
//! - [`Subscription`]: handle returned by every `subscribe`/`on` call.

pub mod abort;
pub mod semaphore;

pub use abort::{AbortController, AbortSignal};
pub use semaphore::Semaphore;

use std::sync::{Mutex, MutexGuard};

use tracing::warn;

/// Handle that detaches a listener when [`unsubscribe`](Self::unsubscribe)
/// is called.
///
/// Dropping the handle without calling `unsubscribe` leaves the listener
/// registered.
#[must_use = "dropping a Subscription keeps the listener registered"]
pub struct Subscription {
    detach: Option<Box<dyn FnOnce() + Send + Sync>>,
}

impl Subscription {
    pub(crate) fn new(detach: impl FnOnce() + Send + Sync + 'static) -> Self {
        Self {
            detach: Some(Box::new(detach)),
        }
    }

    /// Remove the listener. Idempotent with respect to the owning registry:
    /// detaching a listener that is already gone is a no-op.
    pub fn unsubscribe(mut self) {
        if let Some(detach) = self.detach.take() {
            detach();
        }
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("active", &self.detach.is_some())
            .finish()
    }
}

/// Lock a mutex, recovering the guard if a panicking thread poisoned it.
pub(crate) fn mutex_lock<'a, T>(
    lock: &'a Mutex<T>,
    target: &'static str,
    op: &'static str,
) -> MutexGuard<'a, T> {
    match lock.lock() {
        Ok(guard) => guard,
        Err(poisoned) => {
            warn!(
                op,
                target_module = target,
                result = "poisoned_recovered",
                "recovered from poisoned lock"
            );
            poisoned.into_inner()
        }
    }
}
