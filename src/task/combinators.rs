//! Adapters that compose tasks with cancellation, deadlines, and fan-in
//! aggregation.

use crate::cancel::{CancelToken, CancelTokenRef, TimeoutGuard};
use crate::error::{TaskError, TaskResult};
use crate::pool::PoolHandle;
use crate::task::{DagTask, Task, UnitTask};
use std::sync::Arc;
use std::time::Duration;

/// Wraps `work` in a task that checks the token once on entry.
///
/// Cancellation after entry is cooperative: the token is only consulted at
/// the check point. Use [`with_polling_cancellation`] for bodies that
/// should observe cancellation mid-flight.
pub fn with_cancellation<R, F>(work: F, token: CancelTokenRef) -> Arc<Task<R>>
where
    R: Send + 'static,
    F: FnOnce() -> TaskResult<R> + Send + 'static,
{
    Task::new(move || {
        token.check()?;
        work()
    })
}

/// Wraps `work` in a task that hands it the token; the body is expected to
/// poll.
pub fn with_polling_cancellation<R, F>(work: F, token: CancelTokenRef) -> Arc<Task<R>>
where
    R: Send + 'static,
    F: FnOnce(CancelTokenRef) -> TaskResult<R> + Send + 'static,
{
    Task::new(move || work(token))
}

/// Wraps `work` in a task bounded by a deadline.
///
/// A fresh token is returned alongside the task so callers can observe or
/// reinforce the cancellation. The body installs a [`TimeoutGuard`] for
/// `timeout`, checks the token, runs `work`, then re-checks: the task
/// either completes with `work`'s output (when it finishes before the
/// deadline) or fails with [`TaskError::Cancelled`]. The guard drops on
/// body exit, so the waiter thread always joins deterministically.
pub fn with_timeout<R, F>(work: F, timeout: Duration) -> (Arc<Task<R>>, CancelTokenRef)
where
    R: Send + 'static,
    F: FnOnce() -> TaskResult<R> + Send + 'static,
{
    let token = CancelToken::new();
    let body_token = Arc::clone(&token);

    let task = Task::new(move || {
        let _guard = TimeoutGuard::new(Arc::clone(&body_token), timeout);
        body_token.check()?;
        let value = work()?;
        body_token.check()?;
        Ok(value)
    });

    (task, token)
}

/// Aggregates `tasks` behind a unit task that fires once all of them have
/// finished.
///
/// Every input gains a conditional edge to the aggregate, then all inputs
/// are scheduled. The aggregate inherits the first failure observed among
/// them; with no inputs it completes immediately.
pub fn when_all(pool: &PoolHandle, tasks: Vec<Arc<dyn DagTask>>) -> Arc<UnitTask> {
    let aggregate = Task::new(|| Ok(()));

    if tasks.is_empty() {
        aggregate.try_schedule(pool);
        return aggregate;
    }

    for task in &tasks {
        task.then_unit(Arc::clone(&aggregate));
    }
    for task in tasks {
        task.schedule(pool);
    }

    aggregate
}

/// [`when_all`] with a cancellation escape hatch.
///
/// A token already cancelled at the call site yields an immediately
/// scheduled failing task and the inputs are never started. Otherwise the
/// aggregate's own body re-checks the token, so a cancel that lands while
/// the inputs run still fails the aggregate with
/// [`TaskError::Cancelled`].
pub fn when_all_with_cancellation(
    pool: &PoolHandle,
    tasks: Vec<Arc<dyn DagTask>>,
    token: CancelTokenRef,
) -> Arc<UnitTask> {
    if token.is_cancelled() {
        let cancelled = Task::new(|| Err(TaskError::Cancelled));
        cancelled.try_schedule(pool);
        return cancelled;
    }

    if tasks.is_empty() {
        let empty = Task::new(|| Ok(()));
        empty.try_schedule(pool);
        return empty;
    }

    let aggregate = Task::new(move || token.check());

    for task in &tasks {
        task.then_unit(Arc::clone(&aggregate));
    }
    for task in tasks {
        task.schedule(pool);
    }

    aggregate
}
