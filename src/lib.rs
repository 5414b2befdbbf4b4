//! # tasklace
//!
//! A concurrency toolkit for building application-level asynchronous
//! logic on top of a fixed worker pool:
//!
//! - [`Task`]: value-bearing DAG nodes with conditional
//!   ([`then`](Task::then)) and unconditional ([`finally`](Task::finally))
//!   successor edges, failure forwarding, and blocking result retrieval;
//! - [`CancelToken`] / [`TimeoutGuard`]: shared one-shot cooperative
//!   cancellation with callback fan-out and scoped deadlines, plus
//!   adapters ([`with_cancellation`], [`with_timeout`], [`when_all`], ...)
//!   that wrap a unit of work to make it cancellable;
//! - [`EventBus`] / [`EventScope`]: typed pub/sub with broadcast and
//!   targeted dispatch, synchronous and asynchronous emission, and RAII
//!   scopes that keep asynchronous handlers from outliving their owner's
//!   state.
//!
//! ```
//! use tasklace::{Task, WorkerPool};
//!
//! let pool = WorkerPool::new(2);
//! let handle = pool.handle();
//!
//! let answer = Task::new(|| Ok(21 * 2));
//! let done = answer.then(Task::new(|| Ok(())));
//!
//! answer.try_schedule(&handle);
//! done.wait();
//! assert_eq!(answer.result().unwrap(), 42);
//! ```
//!
//! Everything runs on plain OS threads: task bodies and asynchronous
//! event handlers execute on pool workers, synchronous emission on the
//! caller. Cancellation is cooperative only; running work is never
//! preempted.

pub mod cancel;
mod error;
pub mod events;
pub mod pool;
pub mod task;
mod utils;

pub use cancel::{CancelToken, CancelTokenRef, TimeoutGuard};
pub use error::{TaskError, TaskResult};
pub use events::{Event, EventBus, EventHandle, EventScope, SubjectId};
pub use pool::{PoolBuilder, PoolHandle, WorkerPool};
pub use task::{
    when_all, when_all_with_cancellation, with_cancellation, with_polling_cancellation,
    with_timeout, DagTask, Task, TaskFuture, UnitTask,
};

#[cfg(test)]
pub(crate) mod test_utils;
