//! Builders for the thread-owning dispatchers.
//!
//! ```ignore
//! use event_reactor::{EventThreadBuilder, TimerManager};
//!
//! let thread = EventThreadBuilder::new()
//!     .name("network")
//!     .timers(TimerManager::new())
//!     .build()?;
//! ```

use crate::dispatcher::EventThread;
use crate::error::{Error, Result};
use crate::selector::Selector;
use crate::timer::TimerManager;

use std::sync::Arc;
use std::thread::{self, JoinHandle};

/// Settings shared by every dispatcher that owns a thread.
#[derive(Debug, Default)]
pub(crate) struct ThreadConfig {
    name: Option<String>,
    stack_size: Option<usize>,
    timers: Option<Arc<TimerManager>>,
}

impl ThreadConfig {
    pub(crate) fn timers(&self) -> Arc<TimerManager> {
        match &self.timers {
            Some(timers) => Arc::clone(timers),
            None => Arc::clone(TimerManager::global()),
        }
    }

    pub(crate) fn spawn<F>(&self, default_name: &str, body: F) -> Result<JoinHandle<()>>
    where
        F: FnOnce() + Send + 'static,
    {
        let name = self.name.as_deref().unwrap_or(default_name).to_owned();
        let mut builder = thread::Builder::new().name(name);
        if let Some(stack_size) = self.stack_size {
            builder = builder.stack_size(stack_size);
        }

        builder.spawn(body).map_err(Error::Spawn)
    }
}

/// Fluent configuration for an [`EventThread`].
#[derive(Debug, Default)]
pub struct EventThreadBuilder {
    config: ThreadConfig,
}

impl EventThreadBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Names the OS thread. Defaults to `event-thread`.
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.config.name = Some(name.into());
        self
    }

    pub fn stack_size(mut self, bytes: usize) -> Self {
        self.config.stack_size = Some(bytes);
        self
    }

    /// Schedules timed events through `timers` instead of the process-wide manager.
    pub fn timers(mut self, timers: Arc<TimerManager>) -> Self {
        self.config.timers = Some(timers);
        self
    }

    pub fn build(self) -> Result<EventThread> {
        EventThread::spawn(self.config)
    }
}

/// Fluent configuration for a [`Selector`].
#[derive(Debug, Default)]
pub struct SelectorBuilder {
    config: ThreadConfig,
}

impl SelectorBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Names the OS thread. Defaults to `selector`.
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.config.name = Some(name.into());
        self
    }

    pub fn stack_size(mut self, bytes: usize) -> Self {
        self.config.stack_size = Some(bytes);
        self
    }

    pub fn timers(mut self, timers: Arc<TimerManager>) -> Self {
        self.config.timers = Some(timers);
        self
    }

    pub fn build(self) -> Result<Selector> {
        Selector::spawn(self.config)
    }
}
