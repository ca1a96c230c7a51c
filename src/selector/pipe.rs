use crate::dispatcher::core::Wake;
use crate::error::{Error, Result};

use libc::{EAGAIN, EINTR, EWOULDBLOCK, F_GETFL, F_SETFL, FD_CLOEXEC, F_SETFD, O_NONBLOCK, close, fcntl, pipe, read, write};
use std::io;
use std::os::unix::io::RawFd;

use tracing::{debug, trace, warn};

/// Self-pipe used to interrupt a blocking `poll()` from another thread.
pub(crate) struct WakePipe {
    read_fd: RawFd,
    write_fd: RawFd,
}

impl WakePipe {
    pub(crate) fn new() -> Result<Self> {
        let mut fds = [0 as RawFd; 2];
        if unsafe { pipe(fds.as_mut_ptr()) } < 0 {
            return Err(Error::Pipe(io::Error::last_os_error()));
        }

        let pipe = Self {
            read_fd: fds[0],
            write_fd: fds[1],
        };

        for fd in fds {
            configure(fd).map_err(Error::Pipe)?;
        }

        Ok(pipe)
    }

    pub(crate) fn read_fd(&self) -> RawFd {
        self.read_fd
    }

    /// Reads every pending wake byte. Returns how many were read.
    pub(crate) fn drain(&self) -> usize {
        let mut buf = [0u8; 64];
        let mut total = 0;

        loop {
            let res = unsafe { read(self.read_fd, buf.as_mut_ptr() as *mut _, buf.len()) };

            if res > 0 {
                total += res as usize;
                continue;
            }

            if res == 0 {
                return total;
            }

            match errno() {
                EINTR => continue,
                err if err == EAGAIN || err == EWOULDBLOCK => return total,
                err => {
                    warn!(errno = err, "wake pipe read failed");
                    return total;
                }
            }
        }
    }
}

impl Wake for WakePipe {
    fn wake(&self) {
        let byte = [1u8; 1];
        let res = unsafe { write(self.write_fd, byte.as_ptr() as *const _, 1) };

        if res == 1 {
            return;
        }

        if res < 0 {
            let err = errno();
            if err == EAGAIN || err == EWOULDBLOCK {
                // Full pipe: a wake is already pending.
                trace!("wake pipe full");
                return;
            }
            warn!(errno = err, "wake pipe write failed");
            return;
        }

        debug!(written = res, "short write on wake pipe");
    }
}

impl Drop for WakePipe {
    fn drop(&mut self) {
        unsafe {
            close(self.read_fd);
            close(self.write_fd);
        }
    }
}

fn configure(fd: RawFd) -> io::Result<()> {
    let flags = unsafe { fcntl(fd, F_GETFL) };
    if flags < 0 || unsafe { fcntl(fd, F_SETFL, flags | O_NONBLOCK) } < 0 {
        return Err(io::Error::last_os_error());
    }

    if unsafe { fcntl(fd, F_SETFD, FD_CLOEXEC) } < 0 {
        return Err(io::Error::last_os_error());
    }

    Ok(())
}

pub(crate) fn errno() -> i32 {
    io::Error::last_os_error().raw_os_error().unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wake_then_drain() {
        let pipe = WakePipe::new().unwrap();

        pipe.wake();
        pipe.wake();

        assert_eq!(pipe.drain(), 2);
        assert_eq!(pipe.drain(), 0);
    }
}
