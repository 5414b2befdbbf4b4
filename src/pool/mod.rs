//! Fixed-size worker pool with a single FIFO queue.
//!
//! The pool is deliberately simple: N OS threads block on one
//! condvar-guarded queue of opaque work items. There is no work-stealing
//! and no priority; fairness is whatever FIFO order gives you once several
//! workers race to pop.
//!
//! Ownership is split in two:
//! - [`WorkerPool`] owns the threads and tears them down on drop;
//! - [`PoolHandle`] is a cheap clonable enqueue-only handle.
//!
//! Work items (task bodies, async event handlers) capture a `PoolHandle`,
//! never the owning pool, so queued work can never keep the pool alive and
//! teardown can never run on a worker thread.

use crate::utils::thread::default_worker_count;
use parking_lot::{Condvar, Mutex};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use tracing::warn;


type Job = Box<dyn FnOnce() + Send + 'static>;

pub(crate) type ThreadNameFn = Arc<dyn Fn() -> String + Send + Sync + 'static>;

fn default_thread_name_fn() -> ThreadNameFn {
    let counter = Arc::new(AtomicUsize::new(0));

    Arc::new(move || {
        let prev = counter.fetch_add(1, Ordering::Relaxed);
        format!("tasklace-worker-{}", prev)
    })
}

struct QueueState {
    jobs: VecDeque<Job>,
    stop: bool,
}

struct Shared {
    queue: Mutex<QueueState>,
    work_available: Condvar,
}

impl Shared {
    fn enqueue(&self, job: Job) {
        {
            let mut queue = self.queue.lock();
            if queue.stop {
                drop(queue);
                warn!("enqueue on a stopped worker pool, dropping work item");
                return;
            }
            queue.jobs.push_back(job);
        }
        self.work_available.notify_one();
    }

    /// Blocks until a job is available or the pool is stopping.
    ///
    /// Returns `None` only once the pool is stopping *and* the queue has
    /// been fully drained, so pending work always completes before the
    /// worker exits.
    fn next_job(&self) -> Option<Job> {
        let mut queue = self.queue.lock();
        loop {
            if let Some(job) = queue.jobs.pop_front() {
                return Some(job);
            }
            if queue.stop {
                return None;
            }
            self.work_available.wait(&mut queue);
        }
    }
}

/// Fixed set of worker threads served by a single FIFO queue.
///
/// Dropping the pool signals stop, lets workers drain the remaining queue,
/// and joins them all.
pub struct WorkerPool {
    shared: Arc<Shared>,
    workers: Vec<thread::JoinHandle<()>>,
}

impl WorkerPool {
    /// Creates a pool with exactly `threads` workers.
    ///
    /// # Panics
    ///
    /// Panics if `threads` is zero.
    pub fn new(threads: usize) -> Self {
        Self::with_config(threads, default_thread_name_fn())
    }

    /// Returns a builder for configuring thread count and naming.
    pub fn builder() -> PoolBuilder {
        PoolBuilder::new()
    }

    fn with_config(threads: usize, thread_name: ThreadNameFn) -> Self {
        assert!(threads > 0, "worker threads cannot be set to 0");

        let shared = Arc::new(Shared {
            queue: Mutex::new(QueueState {
                jobs: VecDeque::new(),
                stop: false,
            }),
            work_available: Condvar::new(),
        });

        let workers = (0..threads)
            .map(|_| spawn_worker_thread(Arc::clone(&shared), &thread_name))
            .collect();

        Self { shared, workers }
    }

    /// Returns a clonable enqueue-only handle.
    pub fn handle(&self) -> PoolHandle {
        PoolHandle {
            shared: Arc::clone(&self.shared),
        }
    }

    /// Appends a work item to the shared FIFO.
    ///
    /// Exactly one worker runs any given item. Enqueue order is FIFO, but
    /// scheduling across workers may observe any interleaving.
    pub fn enqueue<F>(&self, work: F)
    where
        F: FnOnce() + Send + 'static,
    {
        self.shared.enqueue(Box::new(work));
    }

    pub fn worker_count(&self) -> usize {
        self.workers.len()
    }
}

impl Default for WorkerPool {
    /// One worker per core, minus one for the caller (at least one).
    fn default() -> Self {
        Self::new(default_worker_count())
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        self.shared.queue.lock().stop = true;
        self.shared.work_available.notify_all();

        for handle in self.workers.drain(..) {
            if handle.join().is_err() {
                warn!("worker thread panicked before teardown");
            }
        }
    }
}

fn spawn_worker_thread(shared: Arc<Shared>, thread_name: &ThreadNameFn) -> thread::JoinHandle<()> {
    thread::Builder::new()
        .name(thread_name())
        .spawn(move || {
            while let Some(job) = shared.next_job() {
                job();
            }
        })
        .expect("failed to spawn worker thread")
}

/// Cheap clonable handle for submitting work to a [`WorkerPool`].
///
/// Handles do not keep the pool's threads alive: once the owning pool is
/// dropped and its queue drained, enqueues through a surviving handle are
/// dropped with a warning.
#[derive(Clone)]
pub struct PoolHandle {
    shared: Arc<Shared>,
}

impl PoolHandle {
    /// See [`WorkerPool::enqueue`].
    pub fn enqueue<F>(&self, work: F)
    where
        F: FnOnce() + Send + 'static,
    {
        self.shared.enqueue(Box::new(work));
    }
}

/// Builder for [`WorkerPool`], modeled on the usual runtime-builder shape.
pub struct PoolBuilder {
    worker_threads: Option<usize>,
    thread_name: ThreadNameFn,
}

impl PoolBuilder {
    pub fn new() -> Self {
        Self {
            worker_threads: None,
            thread_name: default_thread_name_fn(),
        }
    }

    /// Sets the number of worker threads.
    ///
    /// Defaults to one per core, minus one for the caller.
    ///
    /// # Panics
    ///
    /// Panics if `val` is zero.
    pub fn worker_threads(&mut self, val: usize) -> &mut Self {
        assert!(val > 0, "worker threads cannot be set to 0");
        self.worker_threads = Some(val);
        self
    }

    /// Sets a fixed name for threads spawned by the pool.
    ///
    /// The default name is "tasklace-worker-{N}".
    pub fn thread_name(&mut self, val: impl Into<String>) -> &mut Self {
        let val = val.into();
        self.thread_name = Arc::new(move || val.clone());
        self
    }

    /// Sets a function used to generate names for threads spawned by the
    /// pool.
    ///
    /// The default name fn yields worker names with monotonically
    /// increasing N: "tasklace-worker-{N}".
    pub fn thread_name_fn<F>(&mut self, f: F) -> &mut Self
    where
        F: Fn() -> String + Send + Sync + 'static,
    {
        self.thread_name = Arc::new(f);
        self
    }

    /// Spawns the configured pool.
    pub fn build(&mut self) -> WorkerPool {
        let threads = self.worker_threads.unwrap_or_else(default_worker_count);
        WorkerPool::with_config(threads, Arc::clone(&self.thread_name))
    }
}

impl Default for PoolBuilder {
    fn default() -> Self {
        Self::new()
    }
}
