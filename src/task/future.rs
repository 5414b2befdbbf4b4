use crate::error::TaskResult;
use crate::pool::PoolHandle;
use crate::task::Task;
use futures::task::AtomicWaker;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

/// Adapter that lets a coroutine await a task.
///
/// Awaiting works by attaching a zero-work resumption successor to the
/// task: when the task completes, the successor runs on the pool and wakes
/// the stored waker. The edge is unconditional, so the waker fires whether
/// the task succeeded or failed; the outcome is then read through
/// [`Task::result`].
///
/// The first poll attaches the resumption and schedules the task if its
/// fan-in was already complete; an unscheduled task with outstanding
/// predecessors is simply awaited until its last predecessor schedules it.
pub struct TaskFuture<R> {
    task: Arc<Task<R>>,
    pool: PoolHandle,
    waker: Arc<AtomicWaker>,
    attached: bool,
}

impl<R: Send + 'static> TaskFuture<R> {
    pub fn new(task: Arc<Task<R>>, pool: PoolHandle) -> Self {
        Self {
            task,
            pool,
            waker: Arc::new(AtomicWaker::new()),
            attached: false,
        }
    }
}

impl<R: Send + 'static> Future for TaskFuture<R> {
    type Output = TaskResult<R>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();

        if this.task.is_done() {
            return Poll::Ready(this.task.result());
        }

        this.waker.register(cx.waker());

        if !this.attached {
            this.attached = true;

            let waker = Arc::clone(&this.waker);
            let resumption = Task::new(move || {
                waker.wake();
                Ok(())
            });

            this.task.attach_resumption(&this.pool, resumption);
            this.task.try_schedule(&this.pool);
        }

        // The task may have finished between the entry check and the waker
        // registration; the resumption also covers this window, but
        // resolving now saves a wake round-trip.
        if this.task.is_done() {
            return Poll::Ready(this.task.result());
        }

        Poll::Pending
    }
}
