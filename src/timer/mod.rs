//! Tick-driven scheduling of one-shot and periodic events and callbacks.
//!
//! A [`Timer`] owns a clock thread that advances a tick counter at a fixed resolution
//! and fires every entry whose deadline tick has been reached. Entries either send an
//! event to a dispatcher or call a [`TimerListener`].
//!
//! - [`clock`]: tick catch-up and deadline arithmetic
//! - [`manager`]: [`TimerManager`], the registry of timers by resolution
//!
//! Deadlines are expressed in ticks: an entry scheduled `ms` from now fires on the
//! first tick at least `ms` away, so never early and less than one resolution late.

pub mod clock;
pub mod manager;

pub use clock::{DEFAULT_RESOLUTION_MS, MAX_CATCH_UP};
pub use manager::TimerManager;

use crate::dispatcher::{Dispatcher, EventDispatcher};
use crate::error::{Error, Result};
use crate::event::agent::AgentTarget;
use crate::event::{Event, EventId, EventRef};
use crate::fatal::{lock, wait_timeout};
use clock::{Clock, first_deadline, next_deadline};

use std::collections::VecDeque;
use std::fmt;
use std::sync::{Arc, Condvar, Mutex, OnceLock, Weak};
use std::thread::{self, JoinHandle, ThreadId};
use std::time::Instant;

use tracing::{debug, trace, warn};

/// Callback-style timer entry.
pub trait TimerListener: Send + Sync {
    fn on_timeout(&self, private_data: u64);
}

#[derive(Clone)]
enum Payload {
    Event {
        event: EventRef,
        dispatcher: Weak<EventDispatcher>,
    },
    Listener {
        listener: Weak<dyn TimerListener>,
        private_data: u64,
    },
}

impl Payload {
    fn is_live(&self) -> bool {
        match self {
            Payload::Event { dispatcher, .. } => dispatcher.strong_count() > 0,
            Payload::Listener { listener, .. } => listener.strong_count() > 0,
        }
    }

    fn event_for(&self, target: &EventDispatcher) -> Option<&EventRef> {
        match self {
            Payload::Event { event, dispatcher } if std::ptr::eq(dispatcher.as_ptr(), target) => Some(event),
            _ => None,
        }
    }

    fn fire(self) {
        match self {
            Payload::Event { event, dispatcher } => {
                if let Some(dispatcher) = dispatcher.upgrade() {
                    dispatcher.send_event(&event);
                }
            }
            Payload::Listener {
                listener,
                private_data,
            } => {
                if let Some(listener) = listener.upgrade() {
                    listener.on_timeout(private_data);
                }
            }
        }
    }
}

struct TimerNode {
    // Identifies the entry across periodic reinserts.
    seq: u64,
    deadline_tick: u64,
    payload: Payload,
    // 0 for one-shot entries.
    repeat_ms: u32,
    carry_ms: u32,
}

struct TimerState {
    tick: u64,
    // Ticks counted by the clock but not fired yet.
    owed: u64,
    clock: Clock,
    // Sorted by deadline, FIFO among equal deadlines.
    nodes: VecDeque<TimerNode>,
    next_seq: u64,
    // Listener callbacks taken off `nodes` for the tick being fired.
    in_flight: Vec<(u64, Payload)>,
    // In-flight callbacks removed before they ran.
    cancelled: Vec<u64>,
    running: bool,
}

impl TimerState {
    fn insert(&mut self, node: TimerNode) {
        let index = self
            .nodes
            .iter()
            .position(|queued| queued.deadline_tick > node.deadline_tick)
            .unwrap_or(self.nodes.len());

        self.nodes.insert(index, node);
    }

    fn schedule(&mut self, payload: Payload, ms: u32, repeat_ms: u32, resolution_ms: u32) {
        let since_tick = self.clock.since_tick(Instant::now());
        let deadline_tick = first_deadline(self.tick + self.owed, ms, since_tick, resolution_ms);
        let seq = self.next_seq;
        self.next_seq += 1;

        self.insert(TimerNode {
            seq,
            deadline_tick,
            payload,
            repeat_ms,
            carry_ms: 0,
        });
    }

    // Advances one tick and returns the entries due, rescheduling periodic ones.
    fn advance(&mut self, resolution_ms: u32) -> Vec<(u64, Payload)> {
        self.tick += 1;
        self.owed = self.owed.saturating_sub(1);
        let mut due = Vec::new();

        while self
            .nodes
            .front()
            .is_some_and(|node| node.deadline_tick <= self.tick)
        {
            let Some(mut node) = self.nodes.pop_front() else {
                break;
            };

            if !node.payload.is_live() {
                continue;
            }

            if node.repeat_ms == 0 {
                due.push((node.seq, node.payload));
                continue;
            }

            due.push((node.seq, node.payload.clone()));
            node.deadline_tick = next_deadline(self.tick, node.repeat_ms, &mut node.carry_ms, resolution_ms);
            self.insert(node);
        }

        due
    }

    // Drops matching entries and marks matching in-flight callbacks as cancelled.
    fn remove_where(&mut self, predicate: impl Fn(&Payload) -> bool) -> usize {
        let mut removed = Vec::new();
        self.nodes.retain(|node| {
            let matched = predicate(&node.payload);
            if matched {
                removed.push(node.seq);
            }
            !matched
        });

        let mut count = removed.len();
        for (seq, payload) in &self.in_flight {
            if !predicate(payload) || self.cancelled.contains(seq) {
                continue;
            }

            self.cancelled.push(*seq);
            // A periodic entry was already counted through its rescheduled node.
            if !removed.contains(seq) {
                count += 1;
            }
        }

        count
    }
}

struct TimerShared {
    resolution_ms: u32,
    state: Mutex<TimerState>,
    // Signalled to stop the clock thread.
    wake: Condvar,
    clock_thread: OnceLock<ThreadId>,
}

impl TimerShared {
    fn on_clock_thread(&self) -> bool {
        self.clock_thread.get() == Some(&thread::current().id())
    }

    // Never waits for the clock thread: a callback may itself be blocked on the
    // caller.
    fn remove_where(&self, predicate: impl Fn(&Payload) -> bool) -> usize {
        lock(&self.state).remove_where(predicate)
    }

    fn run(&self) {
        let _ = self.clock_thread.set(thread::current().id());

        loop {
            let ticks = {
                let mut state = lock(&self.state);
                if !state.running {
                    return;
                }

                let timeout = state.clock.until_next(Instant::now());
                state = wait_timeout(&self.wake, state, timeout);
                if !state.running {
                    return;
                }

                let ticks = state.clock.ticks_due(Instant::now());
                state.owed = ticks;
                ticks
            };

            for _ in 0..ticks {
                if !self.fire_tick() {
                    return;
                }
            }
        }
    }

    fn fire_tick(&self) -> bool {
        // Upgraded dispatchers are released after the lock: the last handle may cancel
        // entries on this timer when dropped.
        let mut senders = Vec::new();
        let callbacks = {
            let mut state = lock(&self.state);
            if !state.running {
                return false;
            }

            let due = state.advance(self.resolution_ms);
            if !due.is_empty() {
                trace!(count = due.len(), "firing timer entries");
            }

            // Events are sent under the lock, so a removal either precedes the send or
            // finds the event already queued.
            let mut callbacks = Vec::new();
            for (seq, payload) in due {
                match payload {
                    Payload::Event { event, dispatcher } => {
                        if let Some(dispatcher) = dispatcher.upgrade() {
                            dispatcher.send_event(&event);
                            senders.push(dispatcher);
                        }
                    }
                    listener => callbacks.push((seq, listener)),
                }
            }

            state.in_flight = callbacks.clone();
            state.cancelled.clear();
            callbacks
        };
        drop(senders);

        if callbacks.is_empty() {
            return true;
        }

        for (seq, payload) in callbacks {
            if lock(&self.state).cancelled.contains(&seq) {
                continue;
            }
            payload.fire();
        }

        let mut state = lock(&self.state);
        state.in_flight.clear();
        state.cancelled.clear();
        true
    }
}

/// A tick scheduler with its own clock thread.
///
/// Timers are shared as `Arc<Timer>`; dropping the last handle stops the clock thread.
/// Entries reference their dispatcher or listener weakly, and are discarded once it is
/// gone.
pub struct Timer {
    shared: Arc<TimerShared>,
    thread: Option<JoinHandle<()>>,
}

impl Timer {
    /// Starts a timer ticking every `resolution_ms` milliseconds (at least 1).
    pub fn new(resolution_ms: u32) -> Result<Arc<Self>> {
        let resolution_ms = resolution_ms.max(1);
        let shared = Arc::new(TimerShared {
            resolution_ms,
            state: Mutex::new(TimerState {
                tick: 0,
                owed: 0,
                clock: Clock::new(resolution_ms, Instant::now()),
                nodes: VecDeque::new(),
                next_seq: 0,
                in_flight: Vec::new(),
                cancelled: Vec::new(),
                running: true,
            }),
            wake: Condvar::new(),
            clock_thread: OnceLock::new(),
        });

        let clock = Arc::clone(&shared);
        let thread = thread::Builder::new()
            .name(format!("timer-{resolution_ms}ms"))
            .spawn(move || clock.run())
            .map_err(Error::Spawn)?;

        debug!(resolution_ms, "timer started");

        Ok(Arc::new(Self {
            shared,
            thread: Some(thread),
        }))
    }

    /// Tick length in milliseconds.
    pub fn resolution_ms(&self) -> u32 {
        self.shared.resolution_ms
    }

    /// Number of scheduled entries.
    pub fn pending(&self) -> usize {
        lock(&self.shared.state).nodes.len()
    }

    /// Calls `listener.on_timeout(private_data)` once after `ms` milliseconds.
    pub fn add_timer(&self, listener: &Arc<dyn TimerListener>, ms: u32, private_data: u64) {
        self.schedule(Self::listener_payload(listener, private_data), ms, 0);
    }

    /// Calls `listener.on_timeout(private_data)` every `ms` milliseconds until removed.
    pub fn add_periodic_timer(&self, listener: &Arc<dyn TimerListener>, ms: u32, private_data: u64) {
        self.schedule(Self::listener_payload(listener, private_data), ms, ms.max(1));
    }

    /// Sends `event` to `dispatcher` once after `ms` milliseconds.
    pub fn send_timed_event(&self, event: &EventRef, dispatcher: &Arc<EventDispatcher>, ms: u32) {
        self.schedule(Self::event_payload(event, dispatcher), ms, 0);
    }

    /// Sends `event` to `dispatcher` every `ms` milliseconds until removed.
    pub fn send_periodic_event(&self, event: &EventRef, dispatcher: &Arc<EventDispatcher>, ms: u32) {
        self.schedule(Self::event_payload(event, dispatcher), ms, ms.max(1));
    }

    /// Cancels entries sending `id` to `dispatcher`.
    ///
    /// Never waits for the clock thread. An event already handed to the dispatcher is
    /// left to the dispatcher's own queue removal.
    ///
    /// # Arguments
    /// * `id` - The event id, or [`Event::INVALID`] for all of the dispatcher's entries
    /// * `dispatcher` - The dispatcher the entries send to
    ///
    /// # Returns
    /// How many entries were cancelled
    pub fn remove_timed_event(&self, id: EventId, dispatcher: &EventDispatcher) -> usize {
        self.shared.remove_where(|payload| {
            payload
                .event_for(dispatcher)
                .is_some_and(|event| id == Event::INVALID || event.id() == id)
        })
    }

    /// Cancels every entry sending this exact event, whatever the dispatcher.
    pub fn remove_timed_event_ref(&self, event: &EventRef) -> usize {
        self.shared.remove_where(|payload| {
            matches!(payload, Payload::Event { event: scheduled, .. } if EventRef::ptr_eq(scheduled, event))
        })
    }

    /// Cancels agent entries for `dispatcher` whose call targets `target`.
    pub fn remove_agents_by_receiver(&self, target: AgentTarget, dispatcher: &EventDispatcher) -> usize {
        self.shared.remove_where(|payload| {
            payload
                .event_for(dispatcher)
                .and_then(|event| event.as_agent())
                .is_some_and(|agent| agent.target() == target)
        })
    }

    /// Cancels every callback entry of `listener`.
    ///
    /// A callback due on the tick being fired is skipped if it has not started yet.
    /// One already running is not waited for.
    ///
    /// # Returns
    /// How many entries were cancelled
    pub fn remove_timer(&self, listener: &Arc<dyn TimerListener>) -> usize {
        self.shared.remove_where(|payload| {
            matches!(payload, Payload::Listener { listener: scheduled, .. }
                if std::ptr::addr_eq(scheduled.as_ptr(), Arc::as_ptr(listener)))
        })
    }

    fn schedule(&self, payload: Payload, ms: u32, repeat_ms: u32) {
        lock(&self.shared.state).schedule(payload, ms, repeat_ms, self.shared.resolution_ms);
    }

    fn event_payload(event: &EventRef, dispatcher: &Arc<EventDispatcher>) -> Payload {
        Payload::Event {
            event: event.clone(),
            dispatcher: Arc::downgrade(dispatcher),
        }
    }

    fn listener_payload(listener: &Arc<dyn TimerListener>, private_data: u64) -> Payload {
        Payload::Listener {
            listener: Arc::downgrade(listener),
            private_data,
        }
    }
}

impl Drop for Timer {
    fn drop(&mut self) {
        {
            let mut state = lock(&self.shared.state);
            state.running = false;
            self.shared.wake.notify_all();
        }

        let Some(thread) = self.thread.take() else {
            return;
        };

        if self.shared.on_clock_thread() {
            warn!(resolution_ms = self.shared.resolution_ms, "timer dropped on its own clock thread, detaching");
            return;
        }

        if thread.join().is_err() {
            warn!(resolution_ms = self.shared.resolution_ms, "timer clock thread panicked");
        }
    }
}

impl fmt::Debug for Timer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Timer")
            .field("resolution_ms", &self.shared.resolution_ms)
            .field("pending", &self.pending())
            .finish()
    }
}
