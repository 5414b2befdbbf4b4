//! Typed pub/sub: broadcast and targeted dispatch, synchronous and
//! asynchronous emission, and lifetime-safe subscription scopes.
//!
//! Every event type carries its own compile-time identity (the type
//! itself, keyed by `TypeId`) plus a static, purely informational name.
//! Handlers are registered per event type, either broadcast or targeted at
//! a [`SubjectId`], and invoked through the snapshot pattern: the handler
//! map is copied under the registry lock and the lock released before any
//! user code runs, so handlers may freely subscribe and unsubscribe
//! re-entrantly.

use std::fmt;

mod bus;
pub use bus::{EventBus, EventHandle};

mod scope;
pub use scope::EventScope;


/// Marker trait for event payloads.
///
/// ```
/// use tasklace::Event;
///
/// #[derive(Debug)]
/// struct PlayerDamaged {
///     player_id: u64,
///     damage: f32,
/// }
///
/// impl Event for PlayerDamaged {
///     const NAME: &'static str = "player.damaged";
/// }
/// ```
pub trait Event: Send + Sync + 'static {
    /// Static event name, used for logging only; the dispatch key is the
    /// type itself.
    const NAME: &'static str;
}

/// Opaque identifier for targeted dispatch.
///
/// A newtype rather than a bare `u64` so that subject ids cannot be mixed
/// up with other integers at API boundaries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubjectId(u64);

impl SubjectId {
    pub const fn new(value: u64) -> Self {
        Self(value)
    }

    pub const fn value(self) -> u64 {
        self.0
    }
}

impl fmt::Display for SubjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}
