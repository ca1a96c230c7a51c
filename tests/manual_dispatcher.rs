mod common;

use common::{Recorder, as_listener, init_tracing};
use event_reactor::{Dispatcher, Event, EventDispatcher, EventQueue, Priority};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

#[test]
fn test_caller_thread_drives_its_dispatcher() {
    init_tracing();
    let dispatcher = EventDispatcher::new();
    let recorder = Recorder::new();
    dispatcher.add_event_listener(&as_listener(&recorder), Event::INVALID);

    let sender = Arc::clone(&dispatcher);
    let producer = thread::spawn(move || {
        for id in 0..3 {
            sender.send_event(&Event::new(id));
        }
    });
    producer.join().unwrap();

    for _ in 0..3 {
        assert!(!dispatcher.wait_and_process(Some(Duration::from_secs(1))));
    }

    assert_eq!(recorder.ids(), vec![0, 1, 2]);
    assert!(recorder.threads().iter().all(|&id| id == thread::current().id()));
    assert!(dispatcher.is_thread_current());
}

#[test]
fn test_wait_and_process_times_out() {
    init_tracing();
    let dispatcher = EventDispatcher::new();

    let start = Instant::now();
    assert!(!dispatcher.wait_and_process(Some(Duration::from_millis(30))));
    assert!(start.elapsed() >= Duration::from_millis(30));
}

#[test]
fn test_sync_sender_is_released_by_the_owner() {
    init_tracing();
    let dispatcher = EventDispatcher::new();
    let recorder = Recorder::new();
    dispatcher.add_event_listener(&as_listener(&recorder), 2);

    let sender = Arc::clone(&dispatcher);
    let producer = thread::spawn(move || sender.send_event_sync(&Event::new(2)));

    assert!(!dispatcher.wait_and_process(Some(Duration::from_secs(2))));
    producer.join().unwrap();
    assert_eq!(recorder.ids(), vec![2]);
}

#[test]
fn test_closed_dispatcher_drops_sends() {
    init_tracing();
    let dispatcher = EventDispatcher::new();
    let recorder = Recorder::new();
    dispatcher.add_event_listener(&as_listener(&recorder), Event::INVALID);

    dispatcher.shutdown();
    assert!(dispatcher.process_pending());
    assert!(dispatcher.is_closed());

    dispatcher.send_event(&Event::new(1));
    assert_eq!(dispatcher.pending(), 0);

    // Returns at once instead of waiting for a thread that no longer handles events.
    let sender = Arc::clone(&dispatcher);
    thread::spawn(move || sender.send_event_sync(&Event::new(2)))
        .join()
        .unwrap();

    assert!(recorder.ids().is_empty());
}

#[test]
fn test_owner_removes_queued_events_directly() {
    init_tracing();
    let dispatcher = EventDispatcher::new();
    let recorder = Recorder::new();
    dispatcher.add_event_listener(&as_listener(&recorder), Event::INVALID);

    let kept = Event::new(3);
    for event in [Event::new(1), Event::new(2), Event::new(1), Arc::clone(&kept)] {
        dispatcher.send_event(&event);
    }

    assert_eq!(dispatcher.remove(1), 2);
    assert!(dispatcher.remove_event(&kept));
    assert!(!dispatcher.remove_event(&kept));
    assert_eq!(dispatcher.pending(), 1);

    dispatcher.remove_all();
    assert_eq!(dispatcher.pending(), 0);
    assert!(!dispatcher.process_pending());
    assert!(recorder.ids().is_empty());
}

#[test]
fn test_queue_wait_ms_zero_blocks_until_sent() {
    let queue = Arc::new(EventQueue::new());
    let producer_queue = Arc::clone(&queue);

    let producer = thread::spawn(move || {
        thread::sleep(Duration::from_millis(20));
        let event = Event::new(6);
        event.set_priority(Priority::High);
        producer_queue.send(&event);
    });

    let event = queue.wait_ms(0).unwrap();
    assert_eq!(event.id(), 6);
    assert_eq!(event.priority(), Priority::High);
    producer.join().unwrap();
}
