//! Fail-fast handling for programmer errors.
//!
//! Invariant violations (a synchronous send to one's own thread, a thread joining
//! itself, a poisoned lock) are never recovered from. They are logged with context
//! and the process is aborted.

use std::sync::{Condvar, Mutex, MutexGuard};
use std::time::Duration;

/// Logs the message at `error` level and aborts the process.
macro_rules! fatal {
    ($($arg:tt)+) => {{
        ::tracing::error!($($arg)+);
        ::std::process::abort()
    }};
}

pub(crate) use fatal;

/// Locks `mutex`, aborting if a previous holder panicked while holding it.
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(_) => fatal!("mutex poisoned by a panicking holder"),
    }
}

pub(crate) fn wait<'a, T>(cond: &Condvar, guard: MutexGuard<'a, T>) -> MutexGuard<'a, T> {
    match cond.wait(guard) {
        Ok(guard) => guard,
        Err(_) => fatal!("mutex poisoned while waiting on condition variable"),
    }
}

pub(crate) fn wait_timeout<'a, T>(
    cond: &Condvar,
    guard: MutexGuard<'a, T>,
    timeout: Duration,
) -> MutexGuard<'a, T> {
    match cond.wait_timeout(guard, timeout) {
        Ok((guard, _)) => guard,
        Err(_) => fatal!("mutex poisoned while waiting on condition variable"),
    }
}
