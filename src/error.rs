use std::io;
use std::os::unix::io::RawFd;

use thiserror::Error;

use crate::event::EventId;

/// Result type for recoverable dispatcher operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Recoverable failures.
///
/// Programmer errors are not represented here: they abort the process.
#[derive(Error, Debug)]
pub enum Error {
    /// No live registration matched the (listener, event id) pair.
    #[error("no listener registered for event id {id}")]
    ListenerNotFound { id: EventId },

    /// No registration matched the (fd, listener) pair on a selector.
    #[error("no selector listener registered for fd {fd}")]
    FdListenerNotFound { fd: RawFd },

    /// A dispatcher or timer thread could not be spawned.
    #[error("failed to spawn thread: {0}")]
    Spawn(#[source] io::Error),

    /// The selector wake pipe could not be created.
    #[error("failed to create wake pipe: {0}")]
    Pipe(#[source] io::Error),
}
