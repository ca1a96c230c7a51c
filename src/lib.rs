//! Cross-thread event dispatch for native OS threads.
//!
//! Each dispatcher is bound to one thread. Any thread may send it reference-counted
//! events, synchronously or asynchronously, or run closures on it through agents.
//! Events are fanned out to registered listeners on the owning thread.
//!
//! # Architecture
//!
//! - **Event**: reference-counted message with an id, a priority and an optional payload
//! - **EventQueue**: two-class priority FIFO with blocking and timed waits
//! - **EventDispatcher**: queue plus listener registry, driven by its owning thread
//! - **EventThread**: a dispatcher running on a dedicated thread
//! - **Selector**: a dispatcher thread that also waits on file descriptors via `poll()`
//! - **Agents**: closures delivered on a dispatcher's thread, with or without a result
//! - **Timer / TimerManager**: tick-driven one-shot and periodic scheduling
//! - **Builders**: thread name, stack size and timer registry for the thread owners
//!
//! # Example
//!
//! ```ignore
//! use event_reactor::{Dispatcher, Event, EventListener, EventRef, EventThread};
//! use std::sync::Arc;
//!
//! struct Printer;
//!
//! impl EventListener for Printer {
//!     fn receive_event(&self, event: &EventRef) {
//!         println!("got {}", event.id());
//!     }
//! }
//!
//! let thread = EventThread::new()?;
//! let printer: Arc<dyn EventListener> = Arc::new(Printer);
//! thread.add_event_listener(&printer, 7);
//! thread.send_event_sync(&Event::new(7));
//! ```
//!
//! Programmer errors (a synchronous send to the current thread, a poisoned lock) log
//! through `tracing` and abort the process.

mod fatal;

mod builder;
pub mod dispatcher;
mod error;
pub mod event;
pub mod selector;
pub mod timer;

pub use builder::{EventThreadBuilder, SelectorBuilder};
pub use dispatcher::{Dispatcher, EventDispatcher, EventListener, EventThread};
pub use error::{Error, Result};
pub use event::agent::{AgentTarget, AsyncEventAgent, SyncEventAgent, SyncRetEventAgent};
pub use event::queue::EventQueue;
pub use event::{Event, EventId, EventRef, Priority};
pub use selector::{Selector, SelectorListener, SelectorState};
pub use timer::{DEFAULT_RESOLUTION_MS, MAX_CATCH_UP, Timer, TimerListener, TimerManager};
