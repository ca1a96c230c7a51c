mod common;

use common::{init_tracing, wait_until};
use event_reactor::{AgentTarget, AsyncEventAgent, Dispatcher, EventThread, Priority, SyncRetEventAgent, Timer};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, mpsc};
use std::thread;
use std::time::Duration;

/// An object agents are aimed at.
struct Widget {
    touched: AtomicUsize,
}

impl Widget {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            touched: AtomicUsize::new(0),
        })
    }

    fn touch(&self) {
        self.touched.fetch_add(1, Ordering::SeqCst);
    }

    fn touched(&self) -> usize {
        self.touched.load(Ordering::SeqCst)
    }
}

// Parks the thread inside an agent until the returned sender is used.
fn park(thread: &EventThread) -> mpsc::Sender<()> {
    let (started_tx, started_rx) = mpsc::channel();
    let (release_tx, release_rx) = mpsc::channel::<()>();

    AsyncEventAgent::new(AgentTarget::NONE, move || {
        started_tx.send(()).unwrap();
        release_rx.recv().unwrap();
    })
    .send(thread);
    started_rx.recv().unwrap();

    release_tx
}

#[test]
fn test_async_agent_runs_on_the_thread() {
    init_tracing();
    let thread = EventThread::new().unwrap();
    let ran_on = Arc::new(Mutex::new(None));

    let slot = Arc::clone(&ran_on);
    AsyncEventAgent::new(AgentTarget::NONE, move || {
        *slot.lock().unwrap() = Some(thread::current().id());
    })
    .send(&thread);

    assert!(wait_until(Duration::from_secs(2), || ran_on.lock().unwrap().is_some()));
    assert_eq!(*ran_on.lock().unwrap(), thread.thread_id());
}

#[test]
fn test_removed_agents_never_touch_their_target() {
    init_tracing();
    let thread = EventThread::new().unwrap();
    let doomed = Widget::new();
    let survivor = Widget::new();
    let release = park(&thread);

    for _ in 0..2 {
        let widget = Arc::clone(&doomed);
        AsyncEventAgent::new(AgentTarget::of(&*doomed), move || widget.touch()).send(&thread);
    }
    let widget = Arc::clone(&survivor);
    AsyncEventAgent::new(AgentTarget::of(&*survivor), move || widget.touch()).send(&thread);

    let dispatcher = Arc::clone(thread.dispatcher());
    let target = AgentTarget::of(&*doomed);
    let remover = thread::spawn(move || dispatcher.remove_agents_by_receiver(target));

    assert!(wait_until(Duration::from_secs(2), || thread.dispatcher().pending() == 4));
    release.send(()).unwrap();

    assert_eq!(remover.join().unwrap(), 2);
    assert_eq!(
        SyncRetEventAgent::new(AgentTarget::NONE, || ()).send(&thread),
        Some(())
    );
    assert_eq!(doomed.touched(), 0);
    assert_eq!(survivor.touched(), 1);
}

#[test]
fn test_removal_cancels_scheduled_agents() {
    init_tracing();
    let timer = Timer::new(10).unwrap();
    let thread = EventThread::new().unwrap();
    let widget = Widget::new();

    let touched = Arc::clone(&widget);
    let agent = AsyncEventAgent::new(AgentTarget::of(&*widget), move || touched.touch());
    thread.send_timed_event(agent.event(), 50, Some(&timer));
    assert_eq!(timer.pending(), 1);

    assert_eq!(thread.remove_agents_by_receiver(AgentTarget::of(&*widget)), 0);
    assert_eq!(timer.pending(), 0);

    thread::sleep(Duration::from_millis(120));
    assert_eq!(widget.touched(), 0);
}

#[test]
fn test_removed_sync_ret_agent_releases_its_sender() {
    init_tracing();
    let thread = EventThread::new().unwrap();
    let widget = Widget::new();
    let target = AgentTarget::of(&*widget);
    let release = park(&thread);

    let dispatcher = Arc::clone(thread.dispatcher());
    let touched = Arc::clone(&widget);
    let sender = thread::spawn(move || {
        SyncRetEventAgent::new(target, move || {
            touched.touch();
            7
        })
        .send(&*dispatcher)
    });
    assert!(wait_until(Duration::from_secs(2), || thread.dispatcher().pending() == 1));

    let dispatcher = Arc::clone(thread.dispatcher());
    let remover = thread::spawn(move || dispatcher.remove_agents_by_receiver(target));
    assert!(wait_until(Duration::from_secs(2), || thread.dispatcher().pending() == 2));
    release.send(()).unwrap();

    assert_eq!(remover.join().unwrap(), 1);
    assert_eq!(sender.join().unwrap(), None);
    assert_eq!(widget.touched(), 0);
}

#[test]
fn test_high_priority_agent_runs_first() {
    init_tracing();
    let thread = EventThread::new().unwrap();
    let order = Arc::new(Mutex::new(Vec::new()));
    let release = park(&thread);

    for (label, priority) in [("normal", Priority::Normal), ("high", Priority::High)] {
        let log = Arc::clone(&order);
        AsyncEventAgent::new(AgentTarget::NONE, move || log.lock().unwrap().push(label))
            .with_priority(priority)
            .send(&thread);
    }
    release.send(()).unwrap();

    assert_eq!(SyncRetEventAgent::new(AgentTarget::NONE, || 1).send(&thread), Some(1));
    assert_eq!(*order.lock().unwrap(), vec!["high", "normal"]);
}
