//! The dispatch state machine shared by every dispatcher.
//!
//! An [`EventDispatcher`] combines an [`EventQueue`] with a listener registry and is
//! bound to the thread that constructed it. Any thread may send to it; only the owning
//! thread handles events, through [`EventDispatcher::handle_event`].
//!
//! [`EventThread`](crate::EventThread) and [`Selector`](crate::Selector) each run one on
//! a dedicated thread. A caller can also own one directly and drive it with
//! [`EventDispatcher::run`] or [`EventDispatcher::process_pending`].

use crate::dispatcher::registry::ListenerRegistry;
use crate::dispatcher::{Dispatcher, EventListener};
use crate::error::Result;
use crate::event::agent::{AgentTarget, SyncRetEventAgent};
use crate::event::queue::EventQueue;
use crate::event::sync::SyncEventHolder;
use crate::event::{Event, EventId, EventKind, EventRef, Priority};
use crate::fatal::fatal;
use crate::timer::{Timer, TimerManager};

use std::fmt;
use std::sync::{Arc, Weak};
use std::thread::{self, ThreadId};
use std::time::Duration;

use tracing::{debug, trace, warn};

/// Wakes a dispatcher's thread after an event was queued.
pub(crate) trait Wake: Send + Sync {
    fn wake(&self);
}

/// Queue, listener registry and send/remove protocol bound to one thread.
pub struct EventDispatcher {
    queue: EventQueue,
    listeners: ListenerRegistry,
    owner: ThreadId,
    owner_name: String,
    waker: Option<Arc<dyn Wake>>,
    timers: Arc<TimerManager>,
    this: Weak<EventDispatcher>,
}

// Releases a synchronous sender even if a listener panics.
struct Completion<'a>(&'a SyncEventHolder);

impl Drop for Completion<'_> {
    fn drop(&mut self) {
        self.0.complete();
    }
}

impl EventDispatcher {
    /// Creates a dispatcher owned by the calling thread, scheduling through the
    /// process-wide [`TimerManager`].
    pub fn new() -> Arc<Self> {
        Self::with_timers(Arc::clone(TimerManager::global()))
    }

    /// Creates a dispatcher owned by the calling thread, scheduling through `timers`.
    pub fn with_timers(timers: Arc<TimerManager>) -> Arc<Self> {
        Self::with_waker(timers, None)
    }

    pub(crate) fn with_waker(timers: Arc<TimerManager>, waker: Option<Arc<dyn Wake>>) -> Arc<Self> {
        let current = thread::current();
        let owner_name = current.name().unwrap_or("<unnamed>").to_owned();

        Arc::new_cyclic(|this| Self {
            queue: EventQueue::new(),
            listeners: ListenerRegistry::new(),
            owner: current.id(),
            owner_name,
            waker,
            timers,
            this: this.clone(),
        })
    }

    /// The timer registry timed sends go through and removals are fanned out to.
    pub fn timers(&self) -> &Arc<TimerManager> {
        &self.timers
    }

    /// Handles one dequeued event on the owning thread.
    ///
    /// Sync events are delivered and then completed, even if a listener panics. Agent
    /// and user events go to the matching listeners. A shutdown event cancels this
    /// dispatcher's timer entries and closes the queue.
    ///
    /// # Arguments
    /// * `event` - An event taken off this dispatcher's queue
    ///
    /// # Returns
    /// `true` once a shutdown event was handled; the dispatcher is then closed
    pub fn handle_event(&self, event: EventRef) -> bool {
        match event.kind() {
            EventKind::Control if event.id() == Event::SHUTDOWN => {
                debug!(thread = %self.owner_name, "dispatcher shutting down");
                self.timers.remove_timed_event(Event::INVALID, self);
                let dropped = self.queue.close();
                if dropped > 0 {
                    debug!(dropped, "discarded pending events on shutdown");
                }
                true
            }
            EventKind::Control => {
                trace!(event_id = event.id(), "ignoring control event");
                false
            }
            EventKind::Sync(holder) => {
                let _completion = Completion(holder);
                self.listeners.dispatch(holder.inner());
                false
            }
            EventKind::User(_) | EventKind::Agent(_) => {
                self.listeners.dispatch(&event);
                false
            }
        }
    }

    /// Handles events until a shutdown event arrives.
    pub fn run(&self) {
        self.assert_owner("run");

        loop {
            let Some(event) = self.queue.wait(None) else {
                fatal!(thread = %self.owner_name, "event queue wait returned no event");
            };

            if self.handle_event(event) {
                return;
            }
        }
    }

    /// Handles every queued event without blocking. Returns `true` if a shutdown was
    /// handled.
    pub fn process_pending(&self) -> bool {
        self.assert_owner("process_pending");

        while let Some(event) = self.queue.poll() {
            if self.handle_event(event) {
                return true;
            }
        }

        false
    }

    /// Waits up to `timeout` for one event and handles it. Returns `true` if it was a
    /// shutdown.
    pub fn wait_and_process(&self, timeout: Option<Duration>) -> bool {
        self.assert_owner("wait_and_process");

        match self.queue.wait(timeout) {
            Some(event) => self.handle_event(event),
            None => false,
        }
    }

    /// Asks the owning thread to stop. Shutdown overtakes queued `Normal` events.
    pub fn shutdown(&self) {
        self.enqueue(&Event::control(Event::SHUTDOWN, Priority::High));
    }

    /// Whether a shutdown was handled. A closed dispatcher drops every send.
    pub fn is_closed(&self) -> bool {
        self.queue.is_closed()
    }

    /// Number of queued events.
    pub fn pending(&self) -> usize {
        self.queue.len()
    }

    pub(crate) fn poll_event(&self) -> Option<EventRef> {
        self.queue.poll()
    }

    pub(crate) fn enqueue(&self, event: &EventRef) -> bool {
        if !self.queue.send(event) {
            debug!(thread = %self.owner_name, event_id = event.id(), "dropping event sent to a closed dispatcher");
            return false;
        }

        if let Some(waker) = &self.waker {
            waker.wake();
        }

        true
    }

    fn assert_owner(&self, operation: &str) {
        if !self.is_thread_current() {
            fatal!(
                thread = %self.owner_name,
                operation,
                "dispatcher driven from a thread other than its owner"
            );
        }
    }

    // Runs a queue mutation on the owning thread, blocking until it ran.
    fn on_owner<T, F>(&self, operation: F) -> T
    where
        T: Send + 'static,
        F: Fn(&EventQueue) -> T + Send + Sync + 'static,
    {
        let operation = Arc::new(operation);

        loop {
            // Closed: no thread is left to marshal to.
            if self.is_thread_current() || self.is_closed() {
                return (*operation)(&self.queue);
            }

            let Some(this) = self.this.upgrade() else {
                return (*operation)(&self.queue);
            };

            let remote = Arc::clone(&operation);
            let agent = SyncRetEventAgent::new(AgentTarget::INTERNAL, move || (*remote)(&this.queue))
                .with_priority(Priority::High);

            if let Some(result) = agent.send(self) {
                return result;
            }

            // Discarded by a concurrent flush or by shutdown; ask again.
            trace!(thread = %self.owner_name, "queue request discarded, resending");
        }
    }

    fn schedule(&self, event: &EventRef, ms: u32, timer: Option<&Arc<Timer>>, periodic: bool) {
        let Some(this) = self.this.upgrade() else {
            return;
        };

        let timer = match timer {
            Some(timer) => {
                self.timers.adopt(timer);
                Arc::clone(timer)
            }
            None => self.timers.default_timer(),
        };

        if periodic {
            timer.send_periodic_event(event, &this, ms);
        } else {
            timer.send_timed_event(event, &this, ms);
        }
    }
}

impl Dispatcher for EventDispatcher {
    fn send_event(&self, event: &EventRef) {
        self.enqueue(event);
    }

    fn send_event_sync(&self, event: &EventRef) {
        if self.is_thread_current() {
            fatal!(
                thread = %self.owner_name,
                event_id = event.id(),
                "synchronous send to the dispatcher's own thread would deadlock"
            );
        }

        let wrapper = Event::sync(event);
        if !self.enqueue(&wrapper) {
            warn!(thread = %self.owner_name, event_id = event.id(), "synchronous send to a closed dispatcher");
            return;
        }

        if let Some(holder) = wrapper.as_sync() {
            holder.wait_done();
        }
    }

    fn send_timed_event(&self, event: &EventRef, ms: u32, timer: Option<&Arc<Timer>>) {
        self.schedule(event, ms, timer, false);
    }

    fn send_periodic_event(&self, event: &EventRef, ms: u32, timer: Option<&Arc<Timer>>) {
        self.schedule(event, ms, timer, true);
    }

    fn remove(&self, id: EventId) -> usize {
        self.timers.remove_timed_event(id, self);
        self.on_owner(move |queue| queue.remove_id(id))
    }

    fn remove_event(&self, event: &EventRef) -> bool {
        self.timers.remove_timed_event_ref(event);
        let event = event.clone();
        self.on_owner(move |queue| queue.remove_event(&event))
    }

    fn remove_agents_by_receiver(&self, target: AgentTarget) -> usize {
        self.timers.remove_agents_by_receiver(target, self);
        self.on_owner(move |queue| queue.remove_agents_by_receiver(target))
    }

    fn remove_all(&self) {
        self.timers.remove_timed_event(Event::INVALID, self);
        self.on_owner(|queue| queue.flush());
    }

    fn is_thread_current(&self) -> bool {
        thread::current().id() == self.owner
    }

    fn add_event_listener(&self, listener: &Arc<dyn EventListener>, id: EventId) {
        self.listeners.add_listener(listener, id);
    }

    fn remove_event_listener(&self, listener: &Arc<dyn EventListener>, id: EventId) -> Result<()> {
        self.listeners.remove_listener(listener, id)
    }
}

impl Drop for EventDispatcher {
    fn drop(&mut self) {
        self.timers.remove_timed_event(Event::INVALID, self);
    }
}

impl fmt::Debug for EventDispatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventDispatcher")
            .field("owner", &self.owner_name)
            .field("pending", &self.queue.len())
            .field("closed", &self.queue.is_closed())
            .finish()
    }
}
