use crate::cancel::CancelTokenRef;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

/// Upper bound on a single waiter sleep, so that dropping the guard
/// returns promptly instead of stalling until the deadline.
const POLL_INTERVAL: Duration = Duration::from_millis(10);

/// Scoped deadline companion to a [`CancelToken`](crate::cancel::CancelToken).
///
/// On creation, spawns a waiter thread that cancels the token once the
/// deadline elapses. Dropping the guard sets a stop flag and joins the
/// waiter; the join completes within roughly one poll interval.
///
/// If the deadline elapsed, the token is cancelled before the waiter
/// exits; if the guard is dropped first, the token is left untouched.
pub struct TimeoutGuard {
    stop: Arc<AtomicBool>,
    waiter: Option<thread::JoinHandle<()>>,
}

impl TimeoutGuard {
    pub fn new(token: CancelTokenRef, timeout: Duration) -> Self {
        let stop = Arc::new(AtomicBool::new(false));
        let waiter_stop = Arc::clone(&stop);

        let waiter = thread::Builder::new()
            .name("tasklace-timer".into())
            .spawn(move || {
                let deadline = Instant::now() + timeout;

                while !waiter_stop.load(Ordering::Acquire) {
                    let now = Instant::now();
                    if now >= deadline {
                        token.cancel();
                        return;
                    }

                    thread::sleep((deadline - now).min(POLL_INTERVAL));
                }
            })
            .expect("failed to spawn timer thread");

        Self {
            stop,
            waiter: Some(waiter),
        }
    }
}

impl Drop for TimeoutGuard {
    fn drop(&mut self) {
        self.stop.store(true, Ordering::Release);
        if let Some(waiter) = self.waiter.take() {
            let _ = waiter.join();
        }
    }
}
