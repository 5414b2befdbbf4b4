use crate::cancel::{CancelToken, CancelTokenRef};
use crate::error::TaskResult;
use crate::events::{Event, EventBus, EventHandle, SubjectId};
use parking_lot::Mutex;
use std::sync::Arc;

/// RAII group of event subscriptions sharing one cancellation token.
///
/// Dropping the scope cancels the token *before* clearing the handles, so
/// an asynchronous handler that was already enqueued but has not yet
/// started observes the cancelled token on entry and returns. This is the
/// sole mechanism preventing use-after-free of state the handler
/// captures; a handler that is already executing is never interrupted and
/// must either be short or poll the token itself.
///
/// Handlers registered through [`subscribe_async`](EventScope::subscribe_async)
/// must own everything they touch (clone an `Arc` into the closure). Do
/// not capture raw references or pointers to the scope's owner: the
/// token gate keeps the handler from *starting* after teardown, nothing
/// more.
///
/// Subscribing from inside a handler is permitted; the scope's own lock
/// only guards the handle list and is never held across user callbacks.
pub struct EventScope {
    token: CancelTokenRef,
    handles: Mutex<Vec<EventHandle>>,
}

impl EventScope {
    pub fn new() -> Self {
        Self {
            token: CancelToken::new(),
            handles: Mutex::new(Vec::new()),
        }
    }

    /// Broadcast subscription owned by the scope.
    pub fn subscribe<E, F>(&self, bus: &EventBus, handler: F)
    where
        E: Event,
        F: Fn(&E) -> TaskResult<()> + Send + Sync + 'static,
    {
        let handle = bus.subscribe::<E, F>(handler);
        self.handles.lock().push(handle);
    }

    /// Targeted subscription owned by the scope.
    pub fn subscribe_targeted<E, F>(&self, bus: &EventBus, subject: SubjectId, handler: F)
    where
        E: Event,
        F: Fn(&E) -> TaskResult<()> + Send + Sync + 'static,
    {
        let handle = bus.subscribe_targeted::<E, F>(subject, handler);
        self.handles.lock().push(handle);
    }

    /// Broadcast subscription for handlers that may run asynchronously.
    ///
    /// The user handler is wrapped with a strong clone of the scope's
    /// token; once the scope is cancelled (or dropped) the inner handler
    /// is never entered again.
    pub fn subscribe_async<E, F>(&self, bus: &EventBus, handler: F)
    where
        E: Event,
        F: Fn(&E) -> TaskResult<()> + Send + Sync + 'static,
    {
        let handle = bus.subscribe::<E, _>(self.guard_handler(handler));
        self.handles.lock().push(handle);
    }

    /// Targeted variant of [`subscribe_async`](EventScope::subscribe_async).
    pub fn subscribe_targeted_async<E, F>(&self, bus: &EventBus, subject: SubjectId, handler: F)
    where
        E: Event,
        F: Fn(&E) -> TaskResult<()> + Send + Sync + 'static,
    {
        let handle = bus.subscribe_targeted::<E, _>(subject, self.guard_handler(handler));
        self.handles.lock().push(handle);
    }

    fn guard_handler<E, F>(&self, handler: F) -> impl Fn(&E) -> TaskResult<()> + Send + Sync + 'static
    where
        E: Event,
        F: Fn(&E) -> TaskResult<()> + Send + Sync + 'static,
    {
        let token = Arc::clone(&self.token);
        move |event: &E| {
            if token.is_cancelled() {
                return Ok(());
            }
            handler(event)
        }
    }

    /// Cancels the scope's token without dropping the subscriptions.
    pub fn cancel(&self) {
        self.token.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    /// The token shared by every subscription in this scope.
    pub fn token(&self) -> CancelTokenRef {
        Arc::clone(&self.token)
    }
}

impl Default for EventScope {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for EventScope {
    fn drop(&mut self) {
        // Cancel first: enqueued-but-not-started handlers must observe the
        // token before the subscriptions disappear.
        self.token.cancel();
        self.handles.lock().clear();
    }
}
