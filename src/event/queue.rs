//! Thread-safe priority queue of events.
//!
//! Provides a two-class FIFO: `High` events are inserted in front of the first queued
//! event of strictly lower priority, `Normal` events are appended. Consumers block on
//! [`EventQueue::wait`] or check with [`EventQueue::poll`].

use crate::event::agent::AgentTarget;
use crate::event::{EventId, EventRef};
use crate::fatal::{lock, wait, wait_timeout};

use std::collections::VecDeque;
use std::sync::{Condvar, Mutex};
use std::time::{Duration, Instant};

struct QueueState {
    events: VecDeque<EventRef>,
    closed: bool,
}

/// A thread-safe, priority-ordered double-ended queue of events.
///
/// The queue holds one clone of each queued event; `wait` and `poll` hand that clone
/// to the caller.
pub struct EventQueue {
    state: Mutex<QueueState>,
    available: Condvar,
}

impl EventQueue {
    /// Creates an empty, open queue.
    pub fn new() -> Self {
        Self {
            state: Mutex::new(QueueState {
                events: VecDeque::new(),
                closed: false,
            }),
            available: Condvar::new(),
        }
    }

    /// Enqueues a clone of `event`.
    ///
    /// Returns `false` without queueing anything once the queue is closed.
    pub fn send(&self, event: &EventRef) -> bool {
        let mut state = lock(&self.state);
        if state.closed {
            return false;
        }

        let priority = event.priority();
        let position = state.events.iter().position(|queued| queued.priority() < priority);

        match position {
            Some(index) => state.events.insert(index, event.clone()),
            None => state.events.push_back(event.clone()),
        }

        self.available.notify_one();
        true
    }

    /// Blocks until an event is available or `timeout` elapses.
    ///
    /// # Arguments
    /// * `timeout` - How long to wait; `None` waits forever
    ///
    /// # Returns
    /// The front event, or `None` on timeout
    pub fn wait(&self, timeout: Option<Duration>) -> Option<EventRef> {
        let mut state = lock(&self.state);

        match timeout {
            None => {
                while state.events.is_empty() {
                    state = wait(&self.available, state);
                }
            }
            Some(timeout) => {
                let deadline = Instant::now() + timeout;
                while state.events.is_empty() {
                    let now = Instant::now();
                    if now >= deadline {
                        return None;
                    }
                    state = wait_timeout(&self.available, state, deadline - now);
                }
            }
        }

        state.events.pop_front()
    }

    /// Millisecond form of [`EventQueue::wait`] where `0` means forever.
    pub fn wait_ms(&self, timeout_ms: u32) -> Option<EventRef> {
        if timeout_ms == 0 {
            self.wait(None)
        } else {
            self.wait(Some(Duration::from_millis(u64::from(timeout_ms))))
        }
    }

    /// Dequeues the front event without blocking.
    ///
    /// # Returns
    /// Some(event) if one is queued, None if the queue is empty
    pub fn poll(&self) -> Option<EventRef> {
        lock(&self.state).events.pop_front()
    }

    /// Removes every queued event with the given id.
    ///
    /// Removed synchronous events are completed, so their senders return.
    ///
    /// # Arguments
    /// * `id` - The event id to drop
    ///
    /// # Returns
    /// How many events were removed
    pub fn remove_id(&self, id: EventId) -> usize {
        self.remove_where(|event| event.id() == id)
    }

    /// Removes every queued occurrence of `event`.
    pub fn remove_event(&self, event: &EventRef) -> bool {
        self.remove_where(|queued| EventRef::ptr_eq(queued, event)) > 0
    }

    /// Removes every queued agent whose call targets `target`, including agents
    /// waiting inside a synchronous send.
    pub fn remove_agents_by_receiver(&self, target: AgentTarget) -> usize {
        self.remove_where(|event| targets(event, target))
    }

    /// Removes everything. Returns how many events were dropped.
    pub fn flush(&self) -> usize {
        self.remove_where(|_| true)
    }

    /// Flushes and rejects every later `send`.
    pub fn close(&self) -> usize {
        let removed = {
            let mut state = lock(&self.state);
            state.closed = true;
            state.events.drain(..).collect::<Vec<_>>()
        };

        release(removed)
    }

    /// Whether [`EventQueue::close`] was called.
    pub fn is_closed(&self) -> bool {
        lock(&self.state).closed
    }

    /// Number of queued events, both priority classes included.
    pub fn len(&self) -> usize {
        lock(&self.state).events.len()
    }

    pub fn is_empty(&self) -> bool {
        lock(&self.state).events.is_empty()
    }

    fn remove_where(&self, predicate: impl Fn(&EventRef) -> bool) -> usize {
        let removed = {
            let mut state = lock(&self.state);
            let mut removed = Vec::new();
            let mut kept = VecDeque::with_capacity(state.events.len());

            for event in state.events.drain(..) {
                if predicate(&event) {
                    removed.push(event);
                } else {
                    kept.push_back(event);
                }
            }

            state.events = kept;
            removed
        };

        release(removed)
    }
}

impl Default for EventQueue {
    fn default() -> Self {
        Self::new()
    }
}

fn targets(event: &EventRef, target: AgentTarget) -> bool {
    if let Some(agent) = event.as_agent() {
        return agent.target() == target;
    }

    event
        .as_sync()
        .and_then(|holder| holder.inner().as_agent())
        .is_some_and(|agent| agent.target() == target)
}

// Drops removed events outside the queue lock. A synchronous sender whose holder is
// discarded is released instead of waiting forever.
fn release(removed: Vec<EventRef>) -> usize {
    let count = removed.len();

    for event in removed {
        if let Some(holder) = event.as_sync() {
            holder.complete();
        }
    }

    count
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::{Event, Priority};

    fn high(id: EventId) -> EventRef {
        let event = Event::new(id);
        event.set_priority(Priority::High);
        event
    }

    fn drain(queue: &EventQueue) -> Vec<EventId> {
        std::iter::from_fn(|| queue.poll()).map(|e| e.id()).collect()
    }

    #[test]
    fn test_high_events_overtake_normal_ones() {
        let queue = EventQueue::new();

        queue.send(&Event::new(1));
        queue.send(&high(2));
        queue.send(&Event::new(3));
        queue.send(&high(4));

        assert_eq!(drain(&queue), vec![2, 4, 1, 3]);
    }

    #[test]
    fn test_queue_holds_its_own_reference() {
        let queue = EventQueue::new();
        let event = Event::new(1);

        queue.send(&event);
        assert_eq!(EventRef::strong_count(&event), 2);

        let received = queue.poll().expect("queued event");
        assert!(EventRef::ptr_eq(&received, &event));
        drop(received);
        assert_eq!(EventRef::strong_count(&event), 1);
    }

    #[test]
    fn test_remove_by_id_and_by_ref() {
        let queue = EventQueue::new();
        let kept = Event::new(2);

        queue.send(&Event::new(1));
        queue.send(&kept);
        queue.send(&Event::new(1));

        assert_eq!(queue.remove_id(1), 2);
        assert!(queue.remove_event(&kept));
        assert!(!queue.remove_event(&kept));
        assert!(queue.is_empty());
    }

    #[test]
    fn test_wait_times_out_when_empty() {
        let queue = EventQueue::new();
        let start = Instant::now();

        assert!(queue.wait(Some(Duration::from_millis(30))).is_none());
        assert!(start.elapsed() >= Duration::from_millis(30));
    }

    #[test]
    fn test_closed_queue_rejects_sends() {
        let queue = EventQueue::new();
        queue.send(&Event::new(1));

        assert_eq!(queue.close(), 1);
        assert!(!queue.send(&Event::new(2)));
        assert!(queue.is_empty());
    }

    #[test]
    fn test_flush_releases_sync_senders() {
        let queue = EventQueue::new();
        let wrapper = Event::sync(&Event::new(1));

        queue.send(&wrapper);
        assert_eq!(queue.flush(), 1);

        // Would block forever if the flush had not completed the holder.
        wrapper.as_sync().expect("sync holder").wait_done();
    }
}
