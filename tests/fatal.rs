//! Programmer errors abort the process. Each case re-runs this test binary as a child
//! process, filtered to the single test, and checks how the child died.

mod common;

use event_reactor::{Dispatcher, Event, EventDispatcher, EventThread};
use std::os::unix::process::ExitStatusExt;
use std::process::{Command, ExitStatus, Stdio};

const CHILD_ENV: &str = "EVENT_REACTOR_FATAL_CHILD";

fn in_child() -> bool {
    std::env::var_os(CHILD_ENV).is_some()
}

fn run_child(test_name: &str) -> ExitStatus {
    Command::new(std::env::current_exe().unwrap())
        .args(["--exact", test_name, "--test-threads=1"])
        .env(CHILD_ENV, "1")
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .unwrap()
}

fn assert_aborted(status: ExitStatus) {
    assert!(!status.success());
    assert_eq!(status.signal(), Some(libc::SIGABRT));
}

#[test]
fn test_sync_send_to_own_thread_aborts() {
    if in_child() {
        common::init_tracing();
        let dispatcher = EventDispatcher::new();
        dispatcher.send_event_sync(&Event::new(1));
        return;
    }

    assert_aborted(run_child("test_sync_send_to_own_thread_aborts"));
}

#[test]
fn test_sync_send_from_listener_to_own_thread_aborts() {
    if in_child() {
        common::init_tracing();
        let thread = EventThread::new().unwrap();
        let dispatcher = std::sync::Arc::clone(thread.dispatcher());
        event_reactor::AsyncEventAgent::new(event_reactor::AgentTarget::NONE, move || {
            dispatcher.send_event_sync(&Event::new(2));
        })
        .send(&thread);
        std::thread::sleep(std::time::Duration::from_secs(5));
        return;
    }

    assert_aborted(run_child("test_sync_send_from_listener_to_own_thread_aborts"));
}

#[test]
fn test_negative_event_id_aborts() {
    if in_child() {
        let _ = Event::new(-7);
        return;
    }

    assert_aborted(run_child("test_negative_event_id_aborts"));
}
