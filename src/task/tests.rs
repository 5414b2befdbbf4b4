use super::*;
use crate::cancel::{CancelToken, CancelTokenRef};
use crate::pool::WorkerPool;
use rstest::rstest;
use static_assertions::assert_impl_all;
use std::thread;
use std::time::Duration;

assert_impl_all!(Task<i32>: Send, Sync);
assert_impl_all!(TaskFuture<i32>: Send);

fn explode(msg: &'static str) -> TaskError {
    TaskError::failed(anyhow::anyhow!(msg))
}

#[test]
fn test_task_produces_result() {
    let pool = WorkerPool::new(2);

    let task = Task::new(|| Ok(41 + 1));
    task.try_schedule(&pool.handle());

    assert_eq!(task.result().unwrap(), 42);
}

#[test]
fn test_body_runs_once_under_racing_schedules() {
    let pool = WorkerPool::new(4);
    let handle = pool.handle();
    let count = Arc::new(AtomicUsize::new(0));

    let in_body = Arc::clone(&count);
    let task = Task::new(move || {
        in_body.fetch_add(1, Ordering::Relaxed);
        Ok(())
    });

    let racers: Vec<_> = (0..8)
        .map(|_| {
            let task = Arc::clone(&task);
            let handle = handle.clone();
            thread::spawn(move || task.try_schedule(&handle))
        })
        .collect();
    for racer in racers {
        racer.join().unwrap();
    }

    task.wait();
    assert_eq!(count.load(Ordering::Relaxed), 1);
}

#[test]
fn test_conditional_fan_in_inherits_failure() {
    let pool = WorkerPool::new(2);
    let handle = pool.handle();

    let a = Task::new(|| Ok(1));
    let b: Arc<Task<i32>> = Task::new(|| Err(explode("b exploded")));
    let c = Task::new(|| Ok(()));

    a.then(Arc::clone(&c));
    b.then(Arc::clone(&c));

    a.try_schedule(&handle);
    b.try_schedule(&handle);
    c.wait();

    let err = c.result().unwrap_err();
    assert!(err.to_string().contains("b exploded"), "got: {err}");
    assert_eq!(a.result().unwrap(), 1);
}

#[test]
fn test_failure_skips_rest_of_conditional_chain() {
    let pool = WorkerPool::new(2);
    let handle = pool.handle();
    let ran = Arc::new(AtomicUsize::new(0));

    let counted = |outcome: TaskResult<()>| {
        let ran = Arc::clone(&ran);
        Task::new(move || {
            ran.fetch_add(1, Ordering::Relaxed);
            outcome
        })
    };

    let a = counted(Ok(()));
    let b = counted(Err(explode("b exploded")));
    let c = counted(Ok(()));
    let d = counted(Ok(()));
    let e = counted(Ok(()));

    a.then(Arc::clone(&b));
    b.then(Arc::clone(&c));
    c.then(Arc::clone(&d));
    d.then(Arc::clone(&e));

    a.try_schedule(&handle);
    e.wait();

    // Only a and b ever ran; c, d, e were skipped but still reached Done.
    assert_eq!(ran.load(Ordering::Relaxed), 2);
    assert!(c.is_done() && d.is_done() && e.is_done());
    assert!(e
        .result()
        .unwrap_err()
        .to_string()
        .contains("b exploded"));
}

#[test]
fn test_finally_runs_after_predecessor_failure() {
    let pool = WorkerPool::new(2);
    let handle = pool.handle();
    let ran = Arc::new(AtomicUsize::new(0));

    let a: Arc<UnitTask> = Task::new(|| Err(explode("a exploded")));
    let in_b = Arc::clone(&ran);
    let b = Task::new(move || {
        in_b.fetch_add(1, Ordering::Relaxed);
        Ok(())
    });

    a.finally(Arc::clone(&b));
    a.try_schedule(&handle);
    b.wait();

    assert_eq!(ran.load(Ordering::Relaxed), 1);
    assert!(b.result().is_ok());
}

#[test]
fn test_failure_propagates_only_along_conditional_edges() {
    let pool = WorkerPool::new(2);
    let handle = pool.handle();
    let ran = Arc::new(AtomicUsize::new(0));

    let a: Arc<UnitTask> = Task::new(|| Err(explode("a exploded")));

    let in_finally = Arc::clone(&ran);
    let unconditional = Task::new(move || {
        in_finally.fetch_add(1, Ordering::Relaxed);
        Ok(())
    });
    let in_then = Arc::clone(&ran);
    let conditional = Task::new(move || {
        in_then.fetch_add(1, Ordering::Relaxed);
        Ok(())
    });

    a.finally(Arc::clone(&unconditional));
    a.then(Arc::clone(&conditional));
    a.try_schedule(&handle);

    unconditional.wait();
    conditional.wait();

    assert_eq!(ran.load(Ordering::Relaxed), 1);
    assert!(unconditional.result().is_ok());
    assert!(matches!(
        conditional.result(),
        Err(TaskError::Failed(_))
    ));
}

#[rstest]
#[case::two(2)]
#[case::five(5)]
#[case::sixteen(16)]
fn test_aggregate_fires_after_full_fan_in(#[case] preds: usize) {
    let pool = WorkerPool::new(4);
    let handle = pool.handle();
    let ran = Arc::new(AtomicUsize::new(0));

    let in_aggregate = Arc::clone(&ran);
    let aggregate = Task::new(move || {
        in_aggregate.fetch_add(1, Ordering::Relaxed);
        Ok(())
    });

    let inputs: Vec<Arc<UnitTask>> = (0..preds).map(|_| Task::new(|| Ok(()))).collect();
    for input in &inputs {
        input.then(Arc::clone(&aggregate));
    }
    for input in &inputs {
        input.try_schedule(&handle);
    }

    aggregate.wait();
    assert_eq!(ran.load(Ordering::Relaxed), 1);
    assert!(inputs.iter().all(|input| input.is_done()));
}

#[test]
fn test_successor_observes_predecessor_result() {
    let pool = WorkerPool::new(2);
    let handle = pool.handle();

    let a = Task::new(|| Ok(7));
    let a_for_b = Arc::clone(&a);
    let b = Task::new(move || Ok(a_for_b.result()? * 2));

    a.then(Arc::clone(&b));
    a.try_schedule(&handle);

    assert_eq!(b.result().unwrap(), 14);
}

#[test]
fn test_wait_returns_even_on_failure() {
    let pool = WorkerPool::new(1);

    let task: Arc<UnitTask> = Task::new(|| Err(explode("boom")));
    task.try_schedule(&pool.handle());
    task.wait();

    assert!(task.is_done());
    assert!(matches!(task.error(), Some(TaskError::Failed(_))));
}

#[cfg(debug_assertions)]
#[test]
#[should_panic(expected = "edges must be registered")]
fn test_edge_after_schedule_asserts() {
    let pool = WorkerPool::new(1);

    let a = Task::new(|| Ok(()));
    a.try_schedule(&pool.handle());
    a.then(Task::new(|| Ok(())));
}

#[test]
fn test_when_all_empty_completes_immediately() {
    let pool = WorkerPool::new(1);

    let aggregate = when_all(&pool.handle(), Vec::new());
    assert!(aggregate.result().is_ok());
}

#[test]
fn test_when_all_runs_every_input() {
    let pool = WorkerPool::new(4);
    let ran = Arc::new(AtomicUsize::new(0));

    let tasks: Vec<Arc<dyn DagTask>> = (0..8)
        .map(|_| {
            let ran = Arc::clone(&ran);
            Task::new(move || {
                ran.fetch_add(1, Ordering::Relaxed);
                Ok(())
            }) as Arc<dyn DagTask>
        })
        .collect();

    let aggregate = when_all(&pool.handle(), tasks);
    assert!(aggregate.result().is_ok());
    assert_eq!(ran.load(Ordering::Relaxed), 8);
}

#[test]
fn test_when_all_inherits_first_failure() {
    let pool = WorkerPool::new(2);

    let tasks: Vec<Arc<dyn DagTask>> = vec![
        Task::new(|| Ok(())) as Arc<dyn DagTask>,
        Task::<()>::new(|| Err(explode("input exploded"))) as Arc<dyn DagTask>,
        Task::new(|| Ok(())) as Arc<dyn DagTask>,
    ];

    let aggregate = when_all(&pool.handle(), tasks);
    assert!(aggregate
        .result()
        .unwrap_err()
        .to_string()
        .contains("input exploded"));
}

#[test]
fn test_when_all_with_cancellation_pre_cancelled() {
    let pool = WorkerPool::new(2);
    let ran = Arc::new(AtomicUsize::new(0));

    let token = CancelToken::new();
    token.cancel();

    let in_input = Arc::clone(&ran);
    let tasks: Vec<Arc<dyn DagTask>> = vec![Task::new(move || {
        in_input.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }) as Arc<dyn DagTask>];

    let aggregate = when_all_with_cancellation(&pool.handle(), tasks, token);
    assert!(matches!(aggregate.result(), Err(TaskError::Cancelled)));
    // The inputs are never started.
    assert_eq!(ran.load(Ordering::Relaxed), 0);
}

#[test]
fn test_when_all_with_cancellation_cancel_mid_flight() {
    let pool = WorkerPool::new(2);
    let token = CancelToken::new();

    let tasks: Vec<Arc<dyn DagTask>> = (0..2)
        .map(|_| {
            Task::new(|| {
                thread::sleep(Duration::from_millis(30));
                Ok(())
            }) as Arc<dyn DagTask>
        })
        .collect();

    let aggregate = when_all_with_cancellation(&pool.handle(), tasks, Arc::clone(&token));
    token.cancel();

    assert!(matches!(aggregate.result(), Err(TaskError::Cancelled)));
}

#[test]
fn test_with_cancellation_checks_on_entry() {
    let pool = WorkerPool::new(1);
    let ran = Arc::new(AtomicUsize::new(0));

    let token = CancelToken::new();
    token.cancel();

    let in_body = Arc::clone(&ran);
    let task = with_cancellation(
        move || {
            in_body.fetch_add(1, Ordering::Relaxed);
            Ok(())
        },
        token,
    );
    task.try_schedule(&pool.handle());

    assert!(matches!(task.result(), Err(TaskError::Cancelled)));
    assert_eq!(ran.load(Ordering::Relaxed), 0);
}

#[test]
fn test_with_cancellation_runs_when_token_clear() {
    let pool = WorkerPool::new(1);

    let task = with_cancellation(|| Ok(5), CancelToken::new());
    task.try_schedule(&pool.handle());

    assert_eq!(task.result().unwrap(), 5);
}

#[test]
fn test_with_polling_cancellation_observes_cancel_mid_body() {
    let pool = WorkerPool::new(1);
    let token = CancelToken::new();

    let task = with_polling_cancellation(
        |token: CancelTokenRef| -> TaskResult<()> {
            loop {
                token.check()?;
                thread::sleep(Duration::from_millis(1));
            }
        },
        Arc::clone(&token),
    );
    task.try_schedule(&pool.handle());

    thread::sleep(Duration::from_millis(10));
    token.cancel();

    assert!(matches!(task.result(), Err(TaskError::Cancelled)));
}

#[test]
fn test_with_timeout_completes_within_deadline() {
    let pool = WorkerPool::new(1);

    let (task, token) = with_timeout(
        || {
            thread::sleep(Duration::from_millis(20));
            Ok("ok")
        },
        Duration::from_secs(5),
    );
    task.try_schedule(&pool.handle());

    assert_eq!(task.result().unwrap(), "ok");
    assert!(!token.is_cancelled());
}

#[test]
fn test_with_timeout_expires_into_cancelled() {
    let pool = WorkerPool::new(1);

    let (task, token) = with_timeout(
        || {
            thread::sleep(Duration::from_millis(300));
            Ok("ok")
        },
        Duration::from_millis(30),
    );
    task.try_schedule(&pool.handle());

    assert!(matches!(task.result(), Err(TaskError::Cancelled)));
    assert!(token.is_cancelled());
}

#[test]
fn test_future_resolves_with_result() {
    let pool = WorkerPool::new(2);

    let task = Task::new(|| Ok(5));
    let value = futures::executor::block_on(TaskFuture::new(task, pool.handle()));

    assert_eq!(value.unwrap(), 5);
}

#[test]
fn test_future_surfaces_failure() {
    let pool = WorkerPool::new(2);

    let task: Arc<UnitTask> = Task::new(|| Err(explode("boom")));
    let outcome = futures::executor::block_on(TaskFuture::new(task, pool.handle()));

    assert!(outcome.unwrap_err().to_string().contains("boom"));
}

#[test]
fn test_future_on_already_completed_task() {
    let pool = WorkerPool::new(1);
    let handle = pool.handle();

    let task = Task::new(|| Ok(9));
    task.try_schedule(&handle);
    task.wait();

    let value = futures::executor::block_on(TaskFuture::new(task, handle));
    assert_eq!(value.unwrap(), 9);
}

#[test]
fn test_future_awaits_dag_aggregate() {
    let pool = WorkerPool::new(2);
    let handle = pool.handle();
    let ran = Arc::new(AtomicUsize::new(0));

    let tasks: Vec<Arc<dyn DagTask>> = (0..4)
        .map(|_| {
            let ran = Arc::clone(&ran);
            Task::new(move || {
                ran.fetch_add(1, Ordering::Relaxed);
                Ok(())
            }) as Arc<dyn DagTask>
        })
        .collect();

    let aggregate = when_all(&handle, tasks);
    let outcome = futures::executor::block_on(TaskFuture::new(aggregate, handle));

    assert!(outcome.is_ok());
    assert_eq!(ran.load(Ordering::Relaxed), 4);
}
