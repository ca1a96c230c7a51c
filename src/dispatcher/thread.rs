//! A dispatcher running on its own OS thread.

use crate::builder::{EventThreadBuilder, ThreadConfig};
use crate::dispatcher::EventDispatcher;
use crate::dispatcher::delegate_dispatcher;
use crate::error::{Error, Result};
use crate::fatal::fatal;

use std::fmt;
use std::io;
use std::sync::{Arc, mpsc};
use std::thread::{JoinHandle, ThreadId};

use tracing::{debug, warn};

/// An [`EventDispatcher`] bound to a dedicated thread.
///
/// The thread waits on the dispatcher's queue and handles each event until shutdown.
/// Dropping the `EventThread` sends a high-priority shutdown and joins the thread.
///
/// # Example
///
/// ```ignore
/// use event_reactor::{Dispatcher, Event, EventThread};
///
/// let thread = EventThread::new()?;
/// thread.add_event_listener(&listener, 1);
/// thread.send_event(&Event::new(1));
/// ```
pub struct EventThread {
    dispatcher: Arc<EventDispatcher>,
    thread: Option<JoinHandle<()>>,
}

impl EventThread {
    /// Starts a thread named `event-thread` using the process-wide timers.
    pub fn new() -> Result<Self> {
        Self::spawn(ThreadConfig::default())
    }

    pub fn builder() -> EventThreadBuilder {
        EventThreadBuilder::new()
    }

    pub(crate) fn spawn(config: ThreadConfig) -> Result<Self> {
        let timers = config.timers();
        let (transmitter, receiver) = mpsc::channel();

        let thread = config.spawn("event-thread", move || {
            // Built here so the dispatcher's owning thread is this one.
            let dispatcher = EventDispatcher::with_timers(timers);
            if transmitter.send(Arc::clone(&dispatcher)).is_err() {
                return;
            }

            dispatcher.run();
            debug!("event thread stopped");
        })?;

        let dispatcher = receiver.recv().map_err(|_| {
            Error::Spawn(io::Error::other("event thread exited before starting"))
        })?;

        Ok(Self {
            dispatcher,
            thread: Some(thread),
        })
    }

    /// The dispatcher run by this thread, e.g. for listeners that need to send back.
    pub fn dispatcher(&self) -> &Arc<EventDispatcher> {
        &self.dispatcher
    }

    pub fn thread_id(&self) -> Option<ThreadId> {
        self.thread.as_ref().map(|thread| thread.thread().id())
    }

    pub fn name(&self) -> Option<&str> {
        self.thread.as_ref().and_then(|thread| thread.thread().name())
    }
}

delegate_dispatcher!(EventThread, dispatcher);

impl Drop for EventThread {
    fn drop(&mut self) {
        let Some(thread) = self.thread.take() else {
            return;
        };

        if self.dispatcher.is_closed() && thread.is_finished() {
            let _ = thread.join();
            return;
        }

        if thread.thread().id() == std::thread::current().id() {
            fatal!(thread = ?thread.thread().name(), "event thread dropped on its own thread");
        }

        self.dispatcher.shutdown();
        if thread.join().is_err() {
            warn!("event thread panicked");
        }
    }
}

impl fmt::Debug for EventThread {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventThread")
            .field("name", &self.name())
            .field("dispatcher", &self.dispatcher)
            .finish()
    }
}
