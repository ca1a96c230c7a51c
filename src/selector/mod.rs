//! A dispatcher that also waits on file descriptors.
//!
//! The [`Selector`] thread blocks in a single `poll()` over every registered descriptor
//! plus the read end of a self-pipe. Sending an event writes one byte to the pipe, so
//! descriptor readiness and queued events are served by the same thread, in the order
//! the kernel reports them.
//!
//! - [`core`](self::core): registration table and the thread loop
//! - [`pipe`]: the self-pipe
//! - [`poller`]: the `pollfd` array

pub(crate) mod core;
pub(crate) mod pipe;
pub(crate) mod poller;

use crate::builder::{SelectorBuilder, ThreadConfig};
use crate::dispatcher::core::Wake;
use crate::dispatcher::{Dispatcher, EventDispatcher, delegate_dispatcher};
use crate::error::{Error, Result};
use crate::event::{Event, Priority};
use self::core::SelectorShared;

use std::fmt;
use std::io;
use std::os::unix::io::RawFd;
use std::sync::{Arc, mpsc};
use std::thread::{self, JoinHandle};

use tracing::{debug, warn};

pub const POLLIN: i16 = libc::POLLIN;
pub const POLLPRI: i16 = libc::POLLPRI;
pub const POLLOUT: i16 = libc::POLLOUT;
pub const POLLERR: i16 = libc::POLLERR;
pub const POLLHUP: i16 = libc::POLLHUP;
pub const POLLNVAL: i16 = libc::POLLNVAL;

/// Receives readiness of a registered descriptor on the selector thread.
///
/// `revents` is the raw `poll()` result for `fd`. After a `POLLHUP` or `POLLNVAL`
/// delivery the registration is dropped.
pub trait SelectorListener: Send + Sync {
    fn process_file_events(&self, fd: RawFd, revents: i16, private_data: u64);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SelectorState {
    Running,
    ShuttingDown,
    Stopped,
}

/// A dispatcher thread multiplexing descriptor readiness with its event queue.
///
/// Dropping the `Selector` sends a high-priority shutdown and joins the thread.
pub struct Selector {
    dispatcher: Arc<EventDispatcher>,
    shared: Arc<SelectorShared>,
    thread: Option<JoinHandle<()>>,
}

impl Selector {
    /// Starts a thread named `selector` using the process-wide timers.
    pub fn new() -> Result<Self> {
        Self::spawn(ThreadConfig::default())
    }

    pub fn builder() -> SelectorBuilder {
        SelectorBuilder::new()
    }

    pub(crate) fn spawn(config: ThreadConfig) -> Result<Self> {
        let timers = config.timers();
        let shared = Arc::new(SelectorShared::new()?);
        let (transmitter, receiver) = mpsc::channel();

        let thread_shared = Arc::clone(&shared);
        let thread = config.spawn("selector", move || {
            let waker: Arc<dyn Wake> = thread_shared.clone();
            let dispatcher = EventDispatcher::with_waker(timers, Some(waker));
            if transmitter.send(Arc::clone(&dispatcher)).is_err() {
                return;
            }

            self::core::run(&thread_shared, &dispatcher);
        })?;

        let dispatcher = receiver
            .recv()
            .map_err(|_| Error::Spawn(io::Error::other("selector thread exited before starting")))?;

        debug!("selector started");

        Ok(Self {
            dispatcher,
            shared,
            thread: Some(thread),
        })
    }

    /// Watches `fd` for the `poll()` events in `mask`.
    ///
    /// Called from another thread, returns once the selector polls with the new
    /// registration in place.
    pub fn add_listener(&self, fd: RawFd, mask: i16, listener: &Arc<dyn SelectorListener>, private_data: u64) {
        let change = self.shared.add(fd, mask, listener, private_data);
        self.apply(change);
    }

    /// Stops delivering `fd` readiness to `listener`.
    pub fn remove_listener(&self, fd: RawFd, listener: &Arc<dyn SelectorListener>) -> Result<()> {
        let change = self.shared.remove(fd, listener)?;
        self.apply(change);
        Ok(())
    }

    pub fn dispatcher(&self) -> &Arc<EventDispatcher> {
        &self.dispatcher
    }

    pub fn state(&self) -> SelectorState {
        self.shared.state()
    }

    /// Number of live descriptor registrations.
    pub fn listener_count(&self) -> usize {
        self.shared.listener_count()
    }

    pub fn name(&self) -> Option<&str> {
        self.thread.as_ref().and_then(|thread| thread.thread().name())
    }

    fn apply(&self, change: u64) {
        // The loop rebuilds before its next poll.
        if self.dispatcher.is_thread_current() {
            return;
        }

        if !self
            .dispatcher
            .enqueue(&Event::control(Event::SELECTOR_UPDATE, Priority::High))
        {
            return;
        }

        self.shared.wait_applied(change);
    }
}

delegate_dispatcher!(Selector, dispatcher);

impl Drop for Selector {
    fn drop(&mut self) {
        let Some(thread) = self.thread.take() else {
            return;
        };

        self.shared.begin_shutdown();
        self.dispatcher.shutdown();

        if thread.thread().id() == thread::current().id() {
            warn!("selector dropped on its own thread, not joining");
            return;
        }

        if thread.join().is_err() {
            warn!("selector thread panicked");
        }
    }
}

impl fmt::Debug for Selector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Selector")
            .field("name", &self.name())
            .field("state", &self.state())
            .field("listeners", &self.listener_count())
            .finish()
    }
}
