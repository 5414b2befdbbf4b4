//! Value-bearing DAG tasks with dependency arithmetic and failure
//! forwarding.
//!
//! A [`Task<R>`] is a node in a directed acyclic graph, allocated as
//! `Arc<Task<R>>` and kept alive by its predecessors (until they notify)
//! and by any external waiter. Edges come in two kinds:
//!
//! - [`then`](Task::then) (conditional): the successor runs only if every
//!   conditional predecessor succeeded; a failure skips the successor's
//!   body and is forwarded further along its own conditional edges;
//! - [`finally`](Task::finally) (unconditional): the successor runs
//!   regardless of the predecessor's outcome, and failures are never
//!   forwarded.
//!
//! Both edge kinds bump the successor's predecessor count at registration;
//! the thread that observes the final decrement is solely responsible for
//! scheduling. Edges must be registered before the predecessor is
//! scheduled (checked by a debug assertion); the one sanctioned exception
//! is the [`TaskFuture`] adapter, which attaches through a race-free
//! internal path.
//!
//! A typed successor observes its predecessor's output by capturing the
//! predecessor `Arc` and calling [`Task::result`] inside its own body:
//! edges fire only after the predecessor is done, so the call never
//! blocks. The captured `Arc` forms a reference cycle with the
//! predecessor's successor list only until the body runs, at which point
//! the body (and its captures) are consumed.
//!
//! Per-task state machine: Pending -> Scheduled -> (Running | Skipped) ->
//! Done. Skipped is first-class: a task that inherits a failure before it
//! ever runs marks itself done without touching the pool and still
//! notifies its successors, so failed chains terminate deterministically.

use crate::error::{TaskError, TaskResult};
use crate::pool::PoolHandle;
use parking_lot::{Condvar, Mutex};
use smallvec::SmallVec;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Weak};
use tracing::trace;

mod combinators;
pub use combinators::{
    when_all, when_all_with_cancellation, with_cancellation, with_polling_cancellation,
    with_timeout,
};

mod future;
pub use future::TaskFuture;

#[cfg(test)]
mod tests;

/// A task producing no value.
pub type UnitTask = Task<()>;

type TaskBody<R> = Box<dyn FnOnce() -> TaskResult<R> + Send + 'static>;

/// Edge notification received by a successor when one of its predecessors
/// reaches Done. Implemented by every `Task<R>`; stored type-erased in the
/// predecessor's successor lists.
pub(crate) trait Successor: Send + Sync {
    /// Called once per registered edge. `inherited` carries the
    /// predecessor's failure on conditional edges and is always `None` on
    /// unconditional ones.
    fn on_predecessor_finished(&self, pool: &PoolHandle, inherited: Option<TaskError>);
}

enum EdgeKind {
    Conditional,
    Unconditional,
}

type EdgeList = SmallVec<[Arc<dyn Successor>; 2]>;

struct Successors {
    conditional: EdgeList,
    unconditional: EdgeList,
    /// Set once the owning task has drained the lists. A late edge (future
    /// adapter) that finds this set notifies its successor directly, so
    /// attachment and completion can never lose a notification between
    /// them.
    notified: bool,
}

/// A value-bearing node in the task graph.
///
/// The body runs at most once, on a pool worker (or never, if the task is
/// skipped by an inherited failure). Completion is observable through
/// [`wait`](Task::wait) / [`is_done`](Task::is_done) and consumable
/// through [`result`](Task::result).
pub struct Task<R> {
    /// Weak self-handle so `&self` methods can hand an owning reference to
    /// the pool (the original's `enable_shared_from_this`). Set once at
    /// construction, upgradable for as long as any caller holds the task.
    this: Weak<Task<R>>,
    body: Mutex<Option<TaskBody<R>>>,
    output: Mutex<Option<R>>,
    /// First failure wins: either the body's own error or the first one
    /// forwarded by a failed conditional predecessor.
    error: Mutex<Option<TaskError>>,
    pred_count: AtomicUsize,
    scheduled: AtomicBool,
    done: AtomicBool,
    done_lock: Mutex<bool>,
    done_cv: Condvar,
    successors: Mutex<Successors>,
}

impl<R: Send + 'static> Task<R> {
    pub fn new<F>(body: F) -> Arc<Self>
    where
        F: FnOnce() -> TaskResult<R> + Send + 'static,
    {
        Arc::new_cyclic(|this| Self {
            this: this.clone(),
            body: Mutex::new(Some(Box::new(body))),
            output: Mutex::new(None),
            error: Mutex::new(None),
            pred_count: AtomicUsize::new(0),
            scheduled: AtomicBool::new(false),
            done: AtomicBool::new(false),
            done_lock: Mutex::new(false),
            done_cv: Condvar::new(),
            successors: Mutex::new(Successors {
                conditional: SmallVec::new(),
                unconditional: SmallVec::new(),
                notified: false,
            }),
        })
    }

    /// Registers `next` as a conditional successor and returns it, so
    /// chains read `a.then(b).then(c)`.
    ///
    /// `next` runs only if this task (and every other conditional
    /// predecessor of `next`) succeeds; on failure `next` inherits the
    /// failure, skips its body, and forwards it along its own conditional
    /// edges.
    pub fn then<S: Send + 'static>(&self, next: Arc<Task<S>>) -> Arc<Task<S>> {
        self.add_edge(EdgeKind::Conditional, next)
    }

    /// Registers `next` as an unconditional successor and returns it.
    ///
    /// `next` runs regardless of this task's outcome; failures are never
    /// forwarded along this edge.
    pub fn finally<S: Send + 'static>(&self, next: Arc<Task<S>>) -> Arc<Task<S>> {
        self.add_edge(EdgeKind::Unconditional, next)
    }

    fn add_edge<S: Send + 'static>(&self, kind: EdgeKind, next: Arc<Task<S>>) -> Arc<Task<S>> {
        debug_assert!(
            !self.scheduled.load(Ordering::Acquire),
            "edges must be registered before the predecessor is scheduled"
        );

        next.pred_count.fetch_add(1, Ordering::Relaxed);

        let erased: Arc<dyn Successor> = Arc::clone(&next) as Arc<dyn Successor>;
        let mut successors = self.successors.lock();
        match kind {
            EdgeKind::Conditional => successors.conditional.push(erased),
            EdgeKind::Unconditional => successors.unconditional.push(erased),
        }

        next
    }

    /// Schedules the task if its fan-in is complete.
    ///
    /// Returns without effect while predecessors are outstanding or if the
    /// task was already scheduled; the one-shot `scheduled` swap guarantees
    /// a single winner under concurrent final decrements. A task that
    /// already inherited a failure is skipped on the calling thread: done
    /// is set and successors are notified, but the body never runs.
    pub fn try_schedule(&self, pool: &PoolHandle) {
        if self.pred_count.load(Ordering::Acquire) > 0 {
            return;
        }
        if self.scheduled.swap(true, Ordering::AcqRel) {
            return;
        }

        if self.error.lock().is_some() {
            trace!("skipping task: failure inherited before scheduling");
            self.finish(pool);
            return;
        }

        let this = self.this.upgrade().expect("task not held by an Arc");
        let worker_pool = pool.clone();
        pool.enqueue(move || this.run(&worker_pool));
    }

    fn run(&self, pool: &PoolHandle) {
        // Take the body out before invoking it, so no lock is held while
        // user code runs.
        let body = self.body.lock().take();
        if let Some(body) = body {
            match body() {
                Ok(value) => *self.output.lock() = Some(value),
                Err(err) => self.store_first_error(err),
            }
        }
        self.finish(pool);
    }

    /// Marks the task done, wakes waiters, and notifies successors.
    ///
    /// The successor lists are drained under their lock *after* the
    /// `notified` flag is set, which closes the attach-vs-complete window
    /// for late edges.
    fn finish(&self, pool: &PoolHandle) {
        *self.done_lock.lock() = true;
        self.done.store(true, Ordering::Release);
        self.done_cv.notify_all();

        let (conditional, unconditional) = {
            let mut successors = self.successors.lock();
            successors.notified = true;
            (
                std::mem::take(&mut successors.conditional),
                std::mem::take(&mut successors.unconditional),
            )
        };

        let error = self.error.lock().clone();
        for next in unconditional {
            next.on_predecessor_finished(pool, None);
        }
        for next in conditional {
            next.on_predecessor_finished(pool, error.clone());
        }
    }

    fn store_first_error(&self, err: TaskError) {
        let mut slot = self.error.lock();
        if slot.is_none() {
            *slot = Some(err);
        }
    }

    /// Unconditional edge registration that tolerates an already
    /// scheduled, running, or completed predecessor.
    ///
    /// Used by [`TaskFuture`]: the resumption successor must fire exactly
    /// once whether it is attached before, during, or after completion.
    pub(crate) fn attach_resumption(&self, pool: &PoolHandle, next: Arc<UnitTask>) {
        next.pred_count.fetch_add(1, Ordering::Relaxed);

        let mut successors = self.successors.lock();
        if successors.notified {
            drop(successors);
            next.on_predecessor_finished(pool, None);
        } else {
            successors.unconditional.push(next as Arc<dyn Successor>);
        }
    }

    /// Blocks until the task reaches Done. Never fails, even if the task
    /// did.
    pub fn wait(&self) {
        let mut done = self.done_lock.lock();
        while !*done {
            self.done_cv.wait(&mut done);
        }
    }

    pub fn is_done(&self) -> bool {
        self.done.load(Ordering::Acquire)
    }

    /// Blocks until Done, then yields the stored failure or moves the
    /// produced value out.
    ///
    /// The value moves out exactly once; taking it a second time panics.
    /// Failures clone, so any number of callers may observe an error.
    pub fn result(&self) -> TaskResult<R> {
        self.wait();
        if let Some(err) = self.error.lock().clone() {
            return Err(err);
        }
        Ok(self
            .output
            .lock()
            .take()
            .expect("task result already consumed"))
    }

    /// Snapshot of the task's failure slot, if any.
    pub fn error(&self) -> Option<TaskError> {
        self.error.lock().clone()
    }
}

impl<R: Send + 'static> Successor for Task<R> {
    fn on_predecessor_finished(&self, pool: &PoolHandle, inherited: Option<TaskError>) {
        if let Some(err) = inherited {
            // First forwarded failure wins; the slot mutex makes the
            // store-if-empty atomic under concurrent predecessor failures.
            self.store_first_error(err);
        }

        if self.pred_count.fetch_sub(1, Ordering::AcqRel) == 1 {
            self.try_schedule(pool);
        }
    }
}

/// Object-safe task surface for heterogeneous aggregation.
///
/// Every `Task<R>` implements this; [`when_all`] and friends accept
/// `Arc<dyn DagTask>` so tasks of different result types can feed a single
/// aggregate.
pub trait DagTask: Send + Sync {
    /// Type-erased [`Task::try_schedule`].
    fn schedule(&self, pool: &PoolHandle);

    /// Registers a conditional unit successor.
    fn then_unit(&self, next: Arc<UnitTask>);

    /// Registers an unconditional unit successor.
    fn finally_unit(&self, next: Arc<UnitTask>);

    /// Type-erased [`Task::wait`].
    fn wait(&self);

    /// Type-erased [`Task::is_done`].
    fn is_done(&self) -> bool;
}

impl<R: Send + 'static> DagTask for Task<R> {
    fn schedule(&self, pool: &PoolHandle) {
        self.try_schedule(pool);
    }

    fn then_unit(&self, next: Arc<UnitTask>) {
        self.add_edge(EdgeKind::Conditional, next);
    }

    fn finally_unit(&self, next: Arc<UnitTask>) {
        self.add_edge(EdgeKind::Unconditional, next);
    }

    fn wait(&self) {
        Task::wait(self);
    }

    fn is_done(&self) -> bool {
        Task::is_done(self)
    }
}
