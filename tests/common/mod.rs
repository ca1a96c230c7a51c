#![allow(dead_code)]

use event_reactor::{EventListener, EventRef};
use std::sync::{Arc, Mutex, Once};
use std::thread::{self, ThreadId};
use std::time::{Duration, Instant};
use tracing_subscriber::EnvFilter;

static INIT: Once = Once::new();

/// Installs a test subscriber once; filter with `RUST_LOG`.
pub fn init_tracing() {
    INIT.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();
    });
}

/// Records every event id it receives, with the thread it ran on.
#[derive(Default)]
pub struct Recorder {
    pub seen: Mutex<Vec<(i64, ThreadId)>>,
}

impl Recorder {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn ids(&self) -> Vec<i64> {
        self.seen.lock().unwrap().iter().map(|(id, _)| *id).collect()
    }

    pub fn threads(&self) -> Vec<ThreadId> {
        self.seen.lock().unwrap().iter().map(|(_, thread)| *thread).collect()
    }
}

impl EventListener for Recorder {
    fn receive_event(&self, event: &EventRef) {
        self.seen.lock().unwrap().push((event.id(), thread::current().id()));
    }
}

pub fn as_listener(recorder: &Arc<Recorder>) -> Arc<dyn EventListener> {
    recorder.clone()
}

/// Polls `condition` every millisecond until it holds or `timeout` elapses.
pub fn wait_until(timeout: Duration, condition: impl Fn() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        thread::sleep(Duration::from_millis(1));
    }
    condition()
}
