//! Events: reference-counted, prioritized messages exchanged between threads.
//!
//! An [`Event`] is always handled through an [`EventRef`] (`Arc<Event>`). Every holder
//! (a queue, a timer entry, the sender, the receiving listener) owns one clone, and the
//! event is destroyed when the last clone is dropped.
//!
//! - [`queue`]: the two-class priority queue feeding every dispatcher
//! - [`agent`]: events carrying a deferred call instead of a payload
//! - [`sync`]: the wrapper used by synchronous sends

pub mod agent;
pub mod queue;
pub(crate) mod sync;

use crate::fatal::fatal;
use agent::Agent;
use sync::SyncEventHolder;

use std::any::Any;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU8, Ordering};

/// Identifier of an event. Negative values are reserved for the framework.
pub type EventId = i64;

/// Shared handle to an event.
pub type EventRef = Arc<Event>;

/// Delivery class of an event.
///
/// All queued `High` events are delivered before any `Normal` event; order within a
/// class is FIFO.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Priority {
    #[default]
    Normal,
    High,
}

impl Priority {
    fn from_u8(value: u8) -> Self {
        if value == 0 {
            Priority::Normal
        } else {
            Priority::High
        }
    }

    fn as_u8(self) -> u8 {
        match self {
            Priority::Normal => 0,
            Priority::High => 1,
        }
    }
}

pub(crate) enum EventKind {
    User(Option<Box<dyn Any + Send + Sync>>),
    Control,
    Sync(SyncEventHolder),
    Agent(Agent),
}

/// A message with an id, a priority and an optional payload.
pub struct Event {
    id: EventId,
    priority: AtomicU8,
    kind: EventKind,
}

impl Event {
    /// Matches no event; used as the "every event" listener filter.
    pub const INVALID: EventId = -1;
    pub const SHUTDOWN: EventId = -2;
    pub const SYNC: EventId = -3;
    pub const SELECTOR_UPDATE: EventId = -4;
    pub const AGENT: EventId = -5;

    /// Creates a user event with `Normal` priority.
    ///
    /// # Panics
    /// Aborts the process if `id` is negative: those ids belong to the framework.
    pub fn new(id: EventId) -> EventRef {
        Self::user(id, None)
    }

    /// Creates a user event carrying `payload`, readable later through [`Event::payload`].
    pub fn with_payload<T: Any + Send + Sync>(id: EventId, payload: T) -> EventRef {
        Self::user(id, Some(Box::new(payload)))
    }

    fn user(id: EventId, payload: Option<Box<dyn Any + Send + Sync>>) -> EventRef {
        if id < 0 {
            fatal!(event_id = id, "negative event ids are reserved for the framework");
        }

        Arc::new(Self::build(id, Priority::Normal, EventKind::User(payload)))
    }

    pub(crate) fn control(id: EventId, priority: Priority) -> EventRef {
        Arc::new(Self::build(id, priority, EventKind::Control))
    }

    pub(crate) fn sync(inner: &EventRef) -> EventRef {
        let priority = inner.priority();
        let holder = SyncEventHolder::new(inner.clone());

        Arc::new(Self::build(Self::SYNC, priority, EventKind::Sync(holder)))
    }

    pub(crate) fn agent(agent: Agent) -> EventRef {
        Arc::new(Self::build(Self::AGENT, Priority::Normal, EventKind::Agent(agent)))
    }

    fn build(id: EventId, priority: Priority, kind: EventKind) -> Self {
        Self {
            id,
            priority: AtomicU8::new(priority.as_u8()),
            kind,
        }
    }

    /// The id listeners are matched against.
    pub fn id(&self) -> EventId {
        self.id
    }

    pub fn priority(&self) -> Priority {
        Priority::from_u8(self.priority.load(Ordering::Acquire))
    }

    /// Changes the priority. Only affects queues the event is sent to afterwards.
    pub fn set_priority(&self, priority: Priority) {
        self.priority.store(priority.as_u8(), Ordering::Release);
    }

    /// Returns the payload if this is a user event carrying a `T`.
    pub fn payload<T: Any>(&self) -> Option<&T> {
        match &self.kind {
            EventKind::User(Some(payload)) => payload.downcast_ref::<T>(),
            _ => None,
        }
    }

    /// Whether this event carries an agent call rather than a user payload.
    pub fn is_agent(&self) -> bool {
        matches!(self.kind, EventKind::Agent(_))
    }

    pub(crate) fn kind(&self) -> &EventKind {
        &self.kind
    }

    pub(crate) fn as_agent(&self) -> Option<&Agent> {
        match &self.kind {
            EventKind::Agent(agent) => Some(agent),
            _ => None,
        }
    }

    pub(crate) fn as_sync(&self) -> Option<&SyncEventHolder> {
        match &self.kind {
            EventKind::Sync(holder) => Some(holder),
            _ => None,
        }
    }
}

impl fmt::Debug for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let kind = match &self.kind {
            EventKind::User(_) => "user",
            EventKind::Control => "control",
            EventKind::Sync(_) => "sync",
            EventKind::Agent(_) => "agent",
        };

        f.debug_struct("Event")
            .field("id", &self.id)
            .field("priority", &self.priority())
            .field("kind", &kind)
            .finish()
    }
}
