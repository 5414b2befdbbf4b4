use std::sync::Arc;

/// Result alias used by task bodies and event handlers.
pub type TaskResult<T> = Result<T, TaskError>;

/// A centralized error type for task and event-handler failures.
///
/// The enum is `Clone` because a single failure fans out along every
/// conditional edge of the task graph: each successor (and any number of
/// waiters calling [`Task::result`](crate::task::Task::result)) receives its
/// own copy. User failures are therefore held behind an `Arc`.
#[derive(Debug, Clone, thiserror::Error)]
pub enum TaskError {
    /// Cooperative cancellation was observed.
    ///
    /// Raised by [`CancelToken::check`](crate::cancel::CancelToken::check),
    /// by timeout expiry, and by cancellation-aware aggregates. This is not
    /// an error in the traditional sense, it signals intentional
    /// termination.
    #[error("task was cancelled")]
    Cancelled,

    /// A user body or event handler failed.
    #[error("task failed: {0}")]
    Failed(Arc<anyhow::Error>),
}

impl TaskError {
    /// Wraps an arbitrary user failure.
    pub fn failed(err: impl Into<anyhow::Error>) -> Self {
        TaskError::Failed(Arc::new(err.into()))
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, TaskError::Cancelled)
    }
}

impl From<anyhow::Error> for TaskError {
    fn from(err: anyhow::Error) -> Self {
        TaskError::Failed(Arc::new(err))
    }
}
