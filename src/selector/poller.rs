use libc::{nfds_t, poll, pollfd};
use std::io;
use std::os::unix::io::RawFd;

/// The descriptor array handed to `poll()`.
pub(crate) struct PollSet {
    fds: Vec<pollfd>,
}

impl PollSet {
    pub(crate) fn new() -> Self {
        Self { fds: Vec::new() }
    }

    pub(crate) fn clear(&mut self) {
        self.fds.clear();
    }

    /// Adds `fd` with interest `events`.
    ///
    /// A descriptor already present keeps a single entry whose interest is the
    /// intersection of both masks.
    pub(crate) fn push(&mut self, fd: RawFd, events: i16) {
        if let Some(existing) = self.fds.iter_mut().find(|entry| entry.fd == fd) {
            existing.events &= events;
            return;
        }

        self.fds.push(pollfd {
            fd,
            events,
            revents: 0,
        });
    }

    pub(crate) fn len(&self) -> usize {
        self.fds.len()
    }

    /// Blocks until a descriptor is ready. `timeout_ms < 0` waits forever.
    pub(crate) fn wait(&mut self, timeout_ms: i32) -> io::Result<usize> {
        let res = unsafe { poll(self.fds.as_mut_ptr(), self.fds.len() as nfds_t, timeout_ms) };

        if res < 0 {
            return Err(io::Error::last_os_error());
        }

        Ok(res as usize)
    }

    /// Descriptors with non-empty `revents` after the last wait.
    pub(crate) fn ready(&self) -> Vec<(RawFd, i16)> {
        self.fds
            .iter()
            .filter(|entry| entry.revents != 0)
            .map(|entry| (entry.fd, entry.revents))
            .collect()
    }
}
