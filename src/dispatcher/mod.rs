//! Dispatchers: objects bound to one OS thread that deliver events sent from any thread.
//!
//! - [`core`](self::core): [`EventDispatcher`], the queue + listener registry state machine
//! - [`registry`]: the per-dispatcher listener registry
//! - [`thread`]: [`EventThread`], a dispatcher running on its own thread
//!
//! The [`Selector`](crate::Selector) is the third implementation of [`Dispatcher`].

pub mod core;
pub(crate) mod registry;
pub mod thread;

pub use self::core::EventDispatcher;
pub use self::thread::EventThread;

use crate::error::Result;
use crate::event::agent::AgentTarget;
use crate::event::{EventId, EventRef};
use crate::timer::Timer;

use std::sync::Arc;

/// Receives events fanned out by a dispatcher, on the dispatcher's thread.
pub trait EventListener: Send + Sync {
    fn receive_event(&self, event: &EventRef);
}

/// The send / remove / listener protocol shared by every dispatcher.
pub trait Dispatcher: Send + Sync {
    /// Queues `event` and wakes the dispatcher's thread.
    fn send_event(&self, event: &EventRef);

    /// Queues `event` and blocks until it has been handled on the dispatcher's thread.
    ///
    /// # Panics
    /// Aborts the process when called from the dispatcher's own thread.
    fn send_event_sync(&self, event: &EventRef);

    /// Sends `event` once after `ms` milliseconds. `None` uses the default timer.
    fn send_timed_event(&self, event: &EventRef, ms: u32, timer: Option<&Arc<Timer>>);

    /// Sends `event` every `ms` milliseconds until removed.
    fn send_periodic_event(&self, event: &EventRef, ms: u32, timer: Option<&Arc<Timer>>);

    /// Cancels scheduled and queued events with this id. Returns how many queued
    /// events were dropped.
    fn remove(&self, id: EventId) -> usize;

    /// Cancels scheduled and queued occurrences of `event`.
    fn remove_event(&self, event: &EventRef) -> bool;

    /// Cancels every scheduled or queued agent whose call targets `target`.
    fn remove_agents_by_receiver(&self, target: AgentTarget) -> usize;

    /// Cancels everything scheduled for or queued on this dispatcher.
    fn remove_all(&self);

    fn is_thread_current(&self) -> bool;

    /// Subscribes `listener` to `id`, or to every event when `id` is [`Event::INVALID`].
    ///
    /// [`Event::INVALID`]: crate::Event::INVALID
    fn add_event_listener(&self, listener: &Arc<dyn EventListener>, id: EventId);

    fn remove_event_listener(&self, listener: &Arc<dyn EventListener>, id: EventId) -> Result<()>;
}

/// Implements [`Dispatcher`] for a type by forwarding to an `Arc<EventDispatcher>` field.
macro_rules! delegate_dispatcher {
    ($ty:ty, $field:ident) => {
        impl $crate::dispatcher::Dispatcher for $ty {
            fn send_event(&self, event: &$crate::EventRef) {
                $crate::dispatcher::Dispatcher::send_event(&*self.$field, event)
            }

            fn send_event_sync(&self, event: &$crate::EventRef) {
                $crate::dispatcher::Dispatcher::send_event_sync(&*self.$field, event)
            }

            fn send_timed_event(
                &self,
                event: &$crate::EventRef,
                ms: u32,
                timer: Option<&::std::sync::Arc<$crate::Timer>>,
            ) {
                $crate::dispatcher::Dispatcher::send_timed_event(&*self.$field, event, ms, timer)
            }

            fn send_periodic_event(
                &self,
                event: &$crate::EventRef,
                ms: u32,
                timer: Option<&::std::sync::Arc<$crate::Timer>>,
            ) {
                $crate::dispatcher::Dispatcher::send_periodic_event(&*self.$field, event, ms, timer)
            }

            fn remove(&self, id: $crate::EventId) -> usize {
                $crate::dispatcher::Dispatcher::remove(&*self.$field, id)
            }

            fn remove_event(&self, event: &$crate::EventRef) -> bool {
                $crate::dispatcher::Dispatcher::remove_event(&*self.$field, event)
            }

            fn remove_agents_by_receiver(&self, target: $crate::AgentTarget) -> usize {
                $crate::dispatcher::Dispatcher::remove_agents_by_receiver(&*self.$field, target)
            }

            fn remove_all(&self) {
                $crate::dispatcher::Dispatcher::remove_all(&*self.$field)
            }

            fn is_thread_current(&self) -> bool {
                $crate::dispatcher::Dispatcher::is_thread_current(&*self.$field)
            }

            fn add_event_listener(
                &self,
                listener: &::std::sync::Arc<dyn $crate::EventListener>,
                id: $crate::EventId,
            ) {
                $crate::dispatcher::Dispatcher::add_event_listener(&*self.$field, listener, id)
            }

            fn remove_event_listener(
                &self,
                listener: &::std::sync::Arc<dyn $crate::EventListener>,
                id: $crate::EventId,
            ) -> $crate::Result<()> {
                $crate::dispatcher::Dispatcher::remove_event_listener(&*self.$field, listener, id)
            }
        }
    };
}

pub(crate) use delegate_dispatcher;
