use crate::dispatcher::EventDispatcher;
use crate::dispatcher::core::Wake;
use crate::error::{Error, Result};
use crate::event::Event;
use crate::fatal::{lock, wait};
use crate::selector::pipe::WakePipe;
use crate::selector::poller::PollSet;
use crate::selector::{SelectorListener, SelectorState};

use libc::{POLLHUP, POLLIN, POLLNVAL};
use std::io;
use std::os::unix::io::RawFd;
use std::sync::{Arc, Condvar, Mutex};

use tracing::{debug, trace, warn};

struct FdListenerNode {
    // Unique per registration, so re-adding the same pair yields a distinct node.
    key: u64,
    fd: RawFd,
    mask: i16,
    listener: Arc<dyn SelectorListener>,
    private_data: u64,
}

impl FdListenerNode {
    fn is(&self, fd: RawFd, listener: &Arc<dyn SelectorListener>) -> bool {
        self.fd == fd && std::ptr::addr_eq(Arc::as_ptr(&self.listener), Arc::as_ptr(listener))
    }
}

struct Registry {
    nodes: Vec<FdListenerNode>,
    next_key: u64,
    dirty: bool,
    // Registration changes requested so far, and how many the fd table reflects.
    requested: u64,
    applied: u64,
    state: SelectorState,
}

/// State shared between a selector handle and its thread.
pub(crate) struct SelectorShared {
    registry: Mutex<Registry>,
    rebuilt: Condvar,
    pipe: WakePipe,
}

impl SelectorShared {
    pub(crate) fn new() -> Result<Self> {
        Ok(Self {
            registry: Mutex::new(Registry {
                nodes: Vec::new(),
                next_key: 0,
                dirty: true,
                requested: 0,
                applied: 0,
                state: SelectorState::Running,
            }),
            rebuilt: Condvar::new(),
            pipe: WakePipe::new()?,
        })
    }

    pub(crate) fn state(&self) -> SelectorState {
        lock(&self.registry).state
    }

    pub(crate) fn begin_shutdown(&self) {
        let mut registry = lock(&self.registry);
        if registry.state == SelectorState::Running {
            registry.state = SelectorState::ShuttingDown;
        }
    }

    pub(crate) fn listener_count(&self) -> usize {
        lock(&self.registry).nodes.len()
    }

    /// Appends a registration and returns the change number the caller waits for.
    pub(crate) fn add(&self, fd: RawFd, mask: i16, listener: &Arc<dyn SelectorListener>, private_data: u64) -> u64 {
        let mut registry = lock(&self.registry);
        let key = registry.next_key;
        registry.next_key += 1;
        registry.nodes.push(FdListenerNode {
            key,
            fd,
            mask,
            listener: Arc::clone(listener),
            private_data,
        });

        Self::touch(&mut registry)
    }

    pub(crate) fn remove(&self, fd: RawFd, listener: &Arc<dyn SelectorListener>) -> Result<u64> {
        let mut registry = lock(&self.registry);
        let index = registry
            .nodes
            .iter()
            .position(|node| node.is(fd, listener))
            .ok_or(Error::FdListenerNotFound { fd })?;

        registry.nodes.remove(index);
        Ok(Self::touch(&mut registry))
    }

    fn touch(registry: &mut Registry) -> u64 {
        registry.dirty = true;
        registry.requested += 1;
        registry.requested
    }

    /// Blocks until the selector thread rebuilt its fd table past `change`, or stopped.
    pub(crate) fn wait_applied(&self, change: u64) {
        let mut registry = lock(&self.registry);
        while registry.applied < change && registry.state != SelectorState::Stopped {
            registry = wait(&self.rebuilt, registry);
        }
    }

    fn rebuild(&self, poll_set: &mut PollSet) {
        let mut registry = lock(&self.registry);

        poll_set.clear();
        poll_set.push(self.pipe.read_fd(), POLLIN);
        for node in &registry.nodes {
            poll_set.push(node.fd, node.mask);
        }

        registry.dirty = false;
        registry.applied = registry.requested;
        self.rebuilt.notify_all();

        trace!(fds = poll_set.len(), "selector fd table rebuilt");
    }

    fn is_dirty(&self) -> bool {
        lock(&self.registry).dirty
    }

    // Delivers readiness on `fd`. Returns true if registrations were dropped.
    fn call_listeners(&self, fd: RawFd, revents: i16) -> bool {
        let matching: Vec<(u64, Arc<dyn SelectorListener>, u64)> = lock(&self.registry)
            .nodes
            .iter()
            .filter(|node| node.fd == fd)
            .map(|node| (node.key, Arc::clone(&node.listener), node.private_data))
            .collect();

        for (_, listener, private_data) in &matching {
            listener.process_file_events(fd, revents, *private_data);
        }

        if revents & (POLLHUP | POLLNVAL) == 0 {
            return false;
        }

        debug!(fd, revents, "fd hung up or invalid, dropping its registrations");
        let mut registry = lock(&self.registry);
        // Only the registrations just notified; ones added by those callbacks stay.
        registry
            .nodes
            .retain(|node| !matching.iter().any(|(key, _, _)| node.key == *key));
        registry.dirty = true;
        true
    }

    fn stop(&self) {
        let mut registry = lock(&self.registry);
        registry.state = SelectorState::Stopped;
        self.rebuilt.notify_all();
    }
}

impl Wake for SelectorShared {
    fn wake(&self) {
        self.pipe.wake();
    }
}

/// Body of the selector thread.
pub(crate) fn run(shared: &SelectorShared, dispatcher: &EventDispatcher) {
    let mut poll_set = PollSet::new();
    shared.rebuild(&mut poll_set);

    loop {
        match poll_set.wait(-1) {
            Ok(_) => {}
            Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
            Err(err) => {
                warn!(error = %err, "selector poll failed");
                continue;
            }
        }

        let mut event_pending = false;
        let mut dirty = false;

        for (fd, revents) in poll_set.ready() {
            if fd == shared.pipe.read_fd() {
                if revents & POLLIN != 0 {
                    shared.pipe.drain();
                    event_pending = true;
                }
                continue;
            }

            dirty |= shared.call_listeners(fd, revents);
        }

        if event_pending {
            while let Some(event) = dispatcher.poll_event() {
                if event.id() == Event::SELECTOR_UPDATE {
                    dirty = true;
                    continue;
                }

                if dispatcher.handle_event(event) {
                    shared.stop();
                    debug!("selector stopped");
                    return;
                }
            }
        }

        if dirty || shared.is_dirty() {
            shared.rebuild(&mut poll_set);
        }
    }
}
