use crate::cancel::CancelTokenRef;
use crate::error::TaskResult;
use crate::events::{Event, SubjectId};
use crate::pool::PoolHandle;
use crate::task::{when_all, when_all_with_cancellation, DagTask, Task, UnitTask};
use parking_lot::Mutex;
use smallvec::SmallVec;
use std::any::{Any, TypeId};
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::{Arc, Weak};
use tracing::warn;

/// Handler with the payload type erased; downcasts back to `&E` on
/// invocation.
type ErasedHandler = Arc<dyn Fn(&dyn Any) -> TaskResult<()> + Send + Sync + 'static>;

/// Event moved behind a shared allocation so asynchronous handlers may
/// outlive the emitting call frame.
type SharedPayload = Arc<dyn Any + Send + Sync + 'static>;

/// Handlers of one event type (or one subject), keyed by their monotonic
/// id. A `BTreeMap` so that in-order iteration equals registration order,
/// which the snapshot dispatch contract relies on.
type HandlerMap = BTreeMap<u64, ErasedHandler>;

type Snapshot = SmallVec<[ErasedHandler; 4]>;

#[derive(Default)]
struct Registry {
    broadcast: HashMap<TypeId, HandlerMap>,
    targeted: HashMap<TypeId, HashMap<SubjectId, HandlerMap>>,
    next_handler_id: u64,
}

impl Registry {
    fn allocate_id(&mut self) -> u64 {
        let id = self.next_handler_id;
        self.next_handler_id += 1;
        id
    }
}

struct BusInner {
    pool: PoolHandle,
    registry: Mutex<Registry>,
}

/// Typed event bus dispatching over a [`WorkerPool`](crate::pool::WorkerPool).
///
/// Cheap to clone; all clones share one registry. Synchronous emission
/// runs handlers on the caller thread, asynchronous emission enqueues one
/// pool work item per handler. A single mutex serializes registry
/// mutation; handler invocation always happens outside it.
#[derive(Clone)]
pub struct EventBus {
    inner: Arc<BusInner>,
}

impl EventBus {
    pub fn new(pool: PoolHandle) -> Self {
        Self {
            inner: Arc::new(BusInner {
                pool,
                registry: Mutex::new(Registry::default()),
            }),
        }
    }

    /// Registers a broadcast handler for `E` and returns its RAII handle.
    ///
    /// Handlers for the same event type coexist independently; dropping
    /// the handle (or calling [`EventHandle::unsubscribe`]) removes only
    /// this registration.
    pub fn subscribe<E, F>(&self, handler: F) -> EventHandle
    where
        E: Event,
        F: Fn(&E) -> TaskResult<()> + Send + Sync + 'static,
    {
        let erased = erase_handler(handler);
        let mut registry = self.inner.registry.lock();
        let id = registry.allocate_id();
        registry
            .broadcast
            .entry(TypeId::of::<E>())
            .or_default()
            .insert(id, erased);

        self.handle_for::<E>(None, id)
    }

    /// Registers a handler for `E` limited to emissions targeted at
    /// `subject`.
    ///
    /// Targeted and broadcast registrations are disjoint: a targeted
    /// emission never reaches broadcast handlers of the same event type,
    /// and vice versa.
    pub fn subscribe_targeted<E, F>(&self, subject: SubjectId, handler: F) -> EventHandle
    where
        E: Event,
        F: Fn(&E) -> TaskResult<()> + Send + Sync + 'static,
    {
        let erased = erase_handler(handler);
        let mut registry = self.inner.registry.lock();
        let id = registry.allocate_id();
        registry
            .targeted
            .entry(TypeId::of::<E>())
            .or_default()
            .entry(subject)
            .or_default()
            .insert(id, erased);

        self.handle_for::<E>(Some(subject), id)
    }

    fn handle_for<E: Event>(&self, subject: Option<SubjectId>, id: u64) -> EventHandle {
        EventHandle {
            bus: Arc::downgrade(&self.inner),
            event: TypeId::of::<E>(),
            event_name: E::NAME,
            subject,
            id,
        }
    }

    /// Invokes every currently subscribed broadcast handler for `E` on the
    /// calling thread, in registration order.
    ///
    /// The handler map is snapshotted under the registry lock and the lock
    /// released before the first invocation, so handlers may re-entrantly
    /// subscribe or unsubscribe without deadlocking and without affecting
    /// the current emit. A failing handler is logged and never suppresses
    /// its peers.
    pub fn emit<E: Event>(&self, event: &E) {
        let snapshot = self.inner.broadcast_snapshot(TypeId::of::<E>());
        dispatch_on_caller(&snapshot, event, E::NAME);
    }

    /// Synchronous dispatch to the handlers targeted at `subject`.
    ///
    /// Emission to a subject with no subscribers is a no-op.
    pub fn emit_targeted<E: Event>(&self, event: &E, subject: SubjectId) {
        let snapshot = self.inner.targeted_snapshot(TypeId::of::<E>(), subject);
        dispatch_on_caller(&snapshot, event, E::NAME);
    }

    /// Enqueues one pool work item per broadcast handler of `E` and
    /// returns immediately.
    ///
    /// The event moves into a shared payload, so the caller's frame may
    /// unwind before handlers run. With a token: a token already cancelled
    /// returns without enqueuing anything, enqueues cease once
    /// cancellation is observed between handlers, and every enqueued item
    /// re-checks the token before invoking. Handler failures are logged
    /// and dropped inside each item.
    pub fn emit_async<E: Event>(&self, event: E, token: Option<CancelTokenRef>) {
        if token.as_ref().is_some_and(|t| t.is_cancelled()) {
            return;
        }

        let snapshot = self.inner.broadcast_snapshot(TypeId::of::<E>());
        self.inner
            .dispatch_on_pool(snapshot, Arc::new(event), token, E::NAME);
    }

    /// [`emit_async`](EventBus::emit_async) over the targeted index.
    pub fn emit_targeted_async<E: Event>(
        &self,
        event: E,
        subject: SubjectId,
        token: Option<CancelTokenRef>,
    ) {
        if token.as_ref().is_some_and(|t| t.is_cancelled()) {
            return;
        }

        let snapshot = self.inner.targeted_snapshot(TypeId::of::<E>(), subject);
        self.inner
            .dispatch_on_pool(snapshot, Arc::new(event), token, E::NAME);
    }

    /// Asynchronous broadcast whose completion is awaitable.
    ///
    /// Each handler invocation becomes a [`Task`] and the returned
    /// aggregate fires once all of them finish. Unlike
    /// [`emit_async`](EventBus::emit_async), handler failures are not
    /// dropped: the first one surfaces to the awaiter through the
    /// aggregate's failure slot. A set token fails the aggregate with
    /// [`TaskError::Cancelled`](crate::TaskError::Cancelled); with no
    /// subscribers the aggregate completes immediately.
    pub fn publish_async<E: Event>(
        &self,
        event: E,
        token: Option<CancelTokenRef>,
    ) -> Arc<UnitTask> {
        let snapshot = self.inner.broadcast_snapshot(TypeId::of::<E>());
        let payload: SharedPayload = Arc::new(event);

        let tasks: Vec<Arc<dyn DagTask>> = snapshot
            .into_iter()
            .map(|handler| {
                let payload = Arc::clone(&payload);
                let token = token.clone();
                let task: Arc<UnitTask> = Task::new(move || {
                    if let Some(token) = &token {
                        token.check()?;
                    }
                    handler(payload.as_ref())
                });
                task as Arc<dyn DagTask>
            })
            .collect();

        match token {
            Some(token) => when_all_with_cancellation(&self.inner.pool, tasks, token),
            None => when_all(&self.inner.pool, tasks),
        }
    }
}

impl BusInner {
    fn broadcast_snapshot(&self, event: TypeId) -> Snapshot {
        let registry = self.registry.lock();
        registry
            .broadcast
            .get(&event)
            .map(|handlers| handlers.values().cloned().collect())
            .unwrap_or_default()
    }

    fn targeted_snapshot(&self, event: TypeId, subject: SubjectId) -> Snapshot {
        let registry = self.registry.lock();
        registry
            .targeted
            .get(&event)
            .and_then(|subjects| subjects.get(&subject))
            .map(|handlers| handlers.values().cloned().collect())
            .unwrap_or_default()
    }

    fn dispatch_on_pool(
        &self,
        snapshot: Snapshot,
        payload: SharedPayload,
        token: Option<CancelTokenRef>,
        event_name: &'static str,
    ) {
        for handler in snapshot {
            if token.as_ref().is_some_and(|t| t.is_cancelled()) {
                return;
            }

            let payload = Arc::clone(&payload);
            let token = token.clone();
            self.pool.enqueue(move || {
                if token.is_some_and(|t| t.is_cancelled()) {
                    return;
                }
                if let Err(err) = handler(payload.as_ref()) {
                    warn!(event = event_name, error = %err, "async event handler failed");
                }
            });
        }
    }

    fn unsubscribe(&self, event: TypeId, subject: Option<SubjectId>, id: u64) {
        let mut registry = self.registry.lock();
        match subject {
            None => {
                if let Some(handlers) = registry.broadcast.get_mut(&event) {
                    handlers.remove(&id);
                    if handlers.is_empty() {
                        registry.broadcast.remove(&event);
                    }
                }
            }
            Some(subject) => {
                if let Some(subjects) = registry.targeted.get_mut(&event) {
                    if let Some(handlers) = subjects.get_mut(&subject) {
                        handlers.remove(&id);
                        if handlers.is_empty() {
                            subjects.remove(&subject);
                        }
                    }
                    if subjects.is_empty() {
                        registry.targeted.remove(&event);
                    }
                }
            }
        }
    }
}

fn erase_handler<E, F>(handler: F) -> ErasedHandler
where
    E: Event,
    F: Fn(&E) -> TaskResult<()> + Send + Sync + 'static,
{
    Arc::new(move |payload: &dyn Any| match payload.downcast_ref::<E>() {
        Some(event) => handler(event),
        None => {
            // Unreachable through the typed API: entries are keyed by the
            // payload's TypeId.
            warn!(event = E::NAME, "event payload type mismatch, handler skipped");
            Ok(())
        }
    })
}

fn dispatch_on_caller(snapshot: &[ErasedHandler], payload: &dyn Any, event_name: &'static str) {
    for handler in snapshot {
        if let Err(err) = handler(payload) {
            warn!(event = event_name, error = %err, "event handler failed");
        }
    }
}

/// RAII receipt for an event subscription.
///
/// Move-only. Dropping the handle unsubscribes; an explicit
/// [`unsubscribe`](EventHandle::unsubscribe) is idempotent. The handle
/// holds the bus weakly, so it never keeps a dropped bus alive.
pub struct EventHandle {
    bus: Weak<BusInner>,
    event: TypeId,
    event_name: &'static str,
    subject: Option<SubjectId>,
    id: u64,
}

impl EventHandle {
    /// Removes the subscription. Safe to call more than once.
    pub fn unsubscribe(&mut self) {
        if let Some(inner) = self.bus.upgrade() {
            inner.unsubscribe(self.event, self.subject, self.id);
        }
        self.bus = Weak::new();
    }

    /// Static name of the subscribed event type.
    pub fn event_name(&self) -> &'static str {
        self.event_name
    }
}

impl Drop for EventHandle {
    fn drop(&mut self) {
        self.unsubscribe();
    }
}

impl fmt::Debug for EventHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventHandle")
            .field("event", &self.event_name)
            .field("subject", &self.subject)
            .field("id", &self.id)
            .finish()
    }
}
