//! Cooperative cancellation: shared one-shot tokens and a scoped deadline
//! guard.
//!
//! A [`CancelToken`] is a monotonic false-to-true flag with callback
//! fan-out. It is only ever *consulted*: nothing in this crate preempts
//! running work. Task bodies, async event handlers, and scoped
//! subscriptions all short-circuit by checking the token at their entry
//! points.

use crate::error::TaskError;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

mod timeout;
pub use timeout::TimeoutGuard;


/// Shared reference to a [`CancelToken`].
pub type CancelTokenRef = Arc<CancelToken>;

type CancelCallback = Box<dyn FnOnce() + Send + 'static>;

/// One-shot cooperative cancellation signal.
///
/// Shared among any number of tasks and handlers via [`CancelTokenRef`].
/// Cancellation is level-triggered and irrevocable.
pub struct CancelToken {
    cancelled: AtomicBool,
    callbacks: Mutex<Vec<CancelCallback>>,
}

impl CancelToken {
    pub fn new() -> CancelTokenRef {
        Arc::new(Self {
            cancelled: AtomicBool::new(false),
            callbacks: Mutex::new(Vec::new()),
        })
    }

    /// Transitions the token to cancelled.
    ///
    /// The thread that performs the transition invokes every retained
    /// callback once, in registration order, then clears the list.
    /// Re-entry is a no-op.
    pub fn cancel(&self) {
        if self.cancelled.swap(true, Ordering::AcqRel) {
            return;
        }

        let callbacks = std::mem::take(&mut *self.callbacks.lock());
        for callback in callbacks {
            callback();
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }

    /// Fails with [`TaskError::Cancelled`] once the token is set.
    pub fn check(&self) -> Result<(), TaskError> {
        if self.is_cancelled() {
            Err(TaskError::Cancelled)
        } else {
            Ok(())
        }
    }

    /// Registers a callback to run on cancellation.
    ///
    /// If the token is already cancelled the callback runs immediately on
    /// the registering thread; otherwise it is retained and will run
    /// exactly once on the thread that performs the cancel transition.
    pub fn on_cancel<F>(&self, callback: F)
    where
        F: FnOnce() + Send + 'static,
    {
        // The flag is read under the callback lock: a registration either
        // lands in the list before `cancel` drains it, or observes the flag
        // and runs here. Never both, never neither.
        let mut callbacks = self.callbacks.lock();
        if self.is_cancelled() {
            drop(callbacks);
            callback();
        } else {
            callbacks.push(Box::new(callback));
        }
    }
}

impl std::fmt::Debug for CancelToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CancelToken")
            .field("cancelled", &self.is_cancelled())
            .field("callbacks", &self.callbacks.lock().len())
            .finish()
    }
}
