//! Agents: events that carry a deferred call.
//!
//! An agent is delivered by running its closure on the dispatcher's thread instead of
//! fanning out to listeners. This is how one thread runs code on another thread,
//! either fire-and-forget ([`AsyncEventAgent`]), blocking until the call ran
//! ([`SyncEventAgent`]) or blocking for its result ([`SyncRetEventAgent`]).
//!
//! Every agent names an [`AgentTarget`]: the object the call will touch. Before that
//! object is destroyed, `remove_agents_by_receiver(target)` on the dispatcher discards
//! every agent still queued or scheduled for it.
//!
//! # Example
//!
//! ```ignore
//! use event_reactor::{AgentTarget, EventThread, SyncRetEventAgent};
//!
//! let thread = EventThread::new()?;
//! let answer = SyncRetEventAgent::new(AgentTarget::NONE, || 6 * 7).send(&thread);
//! assert_eq!(answer, Some(42));
//! ```

use crate::dispatcher::Dispatcher;
use crate::event::{Event, EventRef, Priority};
use crate::fatal::lock;

use std::fmt;
use std::sync::{Arc, Mutex};

type Call = Box<dyn FnOnce() + Send>;

/// Identity of the object an agent's call operates on.
///
/// Only compared, never dereferenced.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct AgentTarget(usize);

impl AgentTarget {
    /// Target for calls that touch no particular object.
    pub const NONE: Self = Self(0);

    // Dispatcher-internal requests. No object lives at this address, so `of` never
    // yields it and callers cannot remove these agents.
    pub(crate) const INTERNAL: Self = Self(usize::MAX);

    pub fn of<T: ?Sized>(target: &T) -> Self {
        Self(target as *const T as *const () as usize)
    }
}

/// The deferred call carried by an agent event. Runs at most once.
pub(crate) struct Agent {
    target: AgentTarget,
    call: Mutex<Option<Call>>,
}

impl Agent {
    fn new(target: AgentTarget, call: Call) -> Self {
        Self {
            target,
            call: Mutex::new(Some(call)),
        }
    }

    pub(crate) fn target(&self) -> AgentTarget {
        self.target
    }

    pub(crate) fn deliver(&self) {
        // Taken out first so the call runs without the slot locked.
        let call = lock(&self.call).take();
        if let Some(call) = call {
            call();
        }
    }
}

fn agent_event(target: AgentTarget, call: Call) -> EventRef {
    Event::agent(Agent::new(target, call))
}

fn deliver_inline(event: &EventRef) {
    if let Some(agent) = event.as_agent() {
        agent.deliver();
    }
}

/// Queues a call on a dispatcher's thread and returns immediately.
pub struct AsyncEventAgent {
    event: EventRef,
}

impl AsyncEventAgent {
    pub fn new<F>(target: AgentTarget, call: F) -> Self
    where
        F: FnOnce() + Send + 'static,
    {
        Self {
            event: agent_event(target, Box::new(call)),
        }
    }

    pub fn with_priority(self, priority: Priority) -> Self {
        self.event.set_priority(priority);
        self
    }

    /// The underlying event, e.g. to schedule it on a timer.
    pub fn event(&self) -> &EventRef {
        &self.event
    }

    pub fn send(self, dispatcher: &dyn Dispatcher) {
        dispatcher.send_event(&self.event);
    }
}

/// Runs a call on a dispatcher's thread and blocks until it has run.
///
/// Called from the dispatcher's own thread, the call runs inline.
pub struct SyncEventAgent {
    event: EventRef,
}

impl SyncEventAgent {
    pub fn new<F>(target: AgentTarget, call: F) -> Self
    where
        F: FnOnce() + Send + 'static,
    {
        Self {
            event: agent_event(target, Box::new(call)),
        }
    }

    pub fn with_priority(self, priority: Priority) -> Self {
        self.event.set_priority(priority);
        self
    }

    pub fn send(self, dispatcher: &dyn Dispatcher) {
        if dispatcher.is_thread_current() {
            deliver_inline(&self.event);
        } else {
            dispatcher.send_event_sync(&self.event);
        }
    }
}

/// Runs a call on a dispatcher's thread and returns its result.
///
/// `send` returns `None` when the agent was discarded before it ran: removed with
/// `remove_agents_by_receiver`, or the dispatcher shut down.
pub struct SyncRetEventAgent<T> {
    event: EventRef,
    slot: Arc<Mutex<Option<T>>>,
}

impl<T: Send + 'static> SyncRetEventAgent<T> {
    pub fn new<F>(target: AgentTarget, call: F) -> Self
    where
        F: FnOnce() -> T + Send + 'static,
    {
        let slot = Arc::new(Mutex::new(None));
        let output = Arc::clone(&slot);
        let event = agent_event(
            target,
            Box::new(move || {
                let value = call();
                *lock(&output) = Some(value);
            }),
        );

        Self { event, slot }
    }

    pub fn with_priority(self, priority: Priority) -> Self {
        self.event.set_priority(priority);
        self
    }

    pub fn send(self, dispatcher: &dyn Dispatcher) -> Option<T> {
        if dispatcher.is_thread_current() {
            deliver_inline(&self.event);
        } else {
            dispatcher.send_event_sync(&self.event);
        }

        // The event may still sit in a queue's hands; only the slot is read here.
        lock(&self.slot).take()
    }
}

impl fmt::Debug for AsyncEventAgent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AsyncEventAgent").field("event", &self.event).finish()
    }
}

impl fmt::Debug for SyncEventAgent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SyncEventAgent").field("event", &self.event).finish()
    }
}

impl<T> fmt::Debug for SyncRetEventAgent<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SyncRetEventAgent").field("event", &self.event).finish()
    }
}
