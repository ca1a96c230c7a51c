//! Registry of timers by tick resolution.
//!
//! Dispatchers schedule through a [`TimerManager`]: the manager owns the shared
//! default timer and tracks every other timer weakly, so removal requests reach every
//! timer that may still hold entries for a dispatcher. A process-wide instance is
//! available through [`TimerManager::global`]; an explicit handle can be passed to the
//! builders instead.

use crate::dispatcher::EventDispatcher;
use crate::event::agent::AgentTarget;
use crate::event::{EventId, EventRef};
use crate::fatal::{fatal, lock};
use crate::timer::{DEFAULT_RESOLUTION_MS, Timer};

use std::fmt;
use std::sync::{Arc, Mutex, OnceLock, Weak};

static GLOBAL: OnceLock<Arc<TimerManager>> = OnceLock::new();

#[derive(Default)]
struct ManagerState {
    default: Option<Arc<Timer>>,
    known: Vec<Weak<Timer>>,
}

impl ManagerState {
    fn live(&mut self) -> Vec<Arc<Timer>> {
        self.known.retain(|timer| timer.strong_count() > 0);
        self.known.iter().filter_map(Weak::upgrade).collect()
    }

    fn track(&mut self, timer: &Arc<Timer>) {
        let known = self
            .known
            .iter()
            .any(|weak| std::ptr::eq(weak.as_ptr(), Arc::as_ptr(timer)));

        if !known {
            self.known.push(Arc::downgrade(timer));
        }
    }
}

/// Timers keyed by resolution, with one shared default timer.
pub struct TimerManager {
    state: Mutex<ManagerState>,
}

impl TimerManager {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            state: Mutex::new(ManagerState::default()),
        })
    }

    /// The process-wide manager, created on first use.
    pub fn global() -> &'static Arc<TimerManager> {
        GLOBAL.get_or_init(TimerManager::new)
    }

    /// The shared timer at [`DEFAULT_RESOLUTION_MS`], created on first use and owned by
    /// the manager.
    ///
    /// # Panics
    /// Aborts the process if the clock thread cannot be spawned.
    pub fn default_timer(&self) -> Arc<Timer> {
        let mut state = lock(&self.state);
        if let Some(timer) = &state.default {
            return Arc::clone(timer);
        }

        let timer = match Timer::new(DEFAULT_RESOLUTION_MS) {
            Ok(timer) => timer,
            Err(error) => fatal!(%error, "cannot start the default timer"),
        };

        state.track(&timer);
        state.default = Some(Arc::clone(&timer));
        timer
    }

    /// A live timer ticking every `resolution_ms`, or a new one.
    ///
    /// A timer created here belongs to the caller: the manager keeps only a weak
    /// reference, so it stops once the caller drops it.
    pub fn get_timer(&self, resolution_ms: u32) -> crate::Result<Arc<Timer>> {
        if resolution_ms == DEFAULT_RESOLUTION_MS {
            return Ok(self.default_timer());
        }

        // Upgraded handles are dropped outside the lock: a drop may stop a timer.
        let existing = self
            .timers()
            .into_iter()
            .find(|timer| timer.resolution_ms() == resolution_ms.max(1));

        if let Some(timer) = existing {
            return Ok(timer);
        }

        let timer = Timer::new(resolution_ms)?;
        self.adopt(&timer);
        Ok(timer)
    }

    /// Tracks a timer built elsewhere so removals reach it.
    pub fn adopt(&self, timer: &Arc<Timer>) {
        lock(&self.state).track(timer);
    }

    /// Live timers currently known.
    pub fn timers(&self) -> Vec<Arc<Timer>> {
        lock(&self.state).live()
    }

    pub fn remove_timed_event(&self, id: EventId, dispatcher: &EventDispatcher) -> usize {
        self.timers()
            .iter()
            .map(|timer| timer.remove_timed_event(id, dispatcher))
            .sum()
    }

    pub fn remove_timed_event_ref(&self, event: &EventRef) -> usize {
        self.timers()
            .iter()
            .map(|timer| timer.remove_timed_event_ref(event))
            .sum()
    }

    pub fn remove_agents_by_receiver(&self, target: AgentTarget, dispatcher: &EventDispatcher) -> usize {
        self.timers()
            .iter()
            .map(|timer| timer.remove_agents_by_receiver(target, dispatcher))
            .sum()
    }

    /// Releases the default timer. Its clock thread stops once no one else holds it.
    pub fn shutdown(&self) {
        let default = lock(&self.state).default.take();
        drop(default);
    }
}

impl fmt::Debug for TimerManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = lock(&self.state);
        f.debug_struct("TimerManager")
            .field("has_default", &state.default.is_some())
            .field("known", &state.known.len())
            .finish()
    }
}
