use crate::event::EventRef;
use crate::fatal::{lock, wait};

use std::sync::{Condvar, Mutex};

/// Wraps an event sent with `send_event_sync`.
///
/// The sender blocks on this holder's own condition variable, so concurrent synchronous
/// senders never wait on each other.
pub(crate) struct SyncEventHolder {
    inner: EventRef,
    done: Mutex<bool>,
    cond: Condvar,
}

impl SyncEventHolder {
    pub(crate) fn new(inner: EventRef) -> Self {
        Self {
            inner,
            done: Mutex::new(false),
            cond: Condvar::new(),
        }
    }

    pub(crate) fn inner(&self) -> &EventRef {
        &self.inner
    }

    /// Marks the holder handled and releases the waiting sender.
    pub(crate) fn complete(&self) {
        let mut done = lock(&self.done);
        *done = true;
        self.cond.notify_all();
    }

    pub(crate) fn wait_done(&self) {
        let mut done = lock(&self.done);
        while !*done {
            done = wait(&self.cond, done);
        }
    }
}
