use crate::dispatcher::EventListener;
use crate::error::{Error, Result};
use crate::event::{Event, EventId, EventRef};
use crate::fatal::lock;

use std::sync::{Arc, Mutex, Weak};

struct ListenerNode {
    // `None` marks a removed registration awaiting pruning.
    listener: Option<Weak<dyn EventListener>>,
    filter: EventId,
}

impl ListenerNode {
    fn is(&self, listener: &Arc<dyn EventListener>) -> bool {
        self.listener
            .as_ref()
            .is_some_and(|weak| std::ptr::addr_eq(weak.as_ptr(), Arc::as_ptr(listener)))
    }

    fn accepts(&self, id: EventId) -> bool {
        self.filter == Event::INVALID || self.filter == id
    }
}

/// Event id to listener fan-out for one dispatcher.
///
/// Removal only tombstones a node; the next dispatch scan erases it. Listeners run with
/// the registry unlocked, so they may add or remove listeners while being called.
pub(crate) struct ListenerRegistry {
    nodes: Mutex<Vec<ListenerNode>>,
}

impl ListenerRegistry {
    pub(crate) fn new() -> Self {
        Self {
            nodes: Mutex::new(Vec::new()),
        }
    }

    pub(crate) fn add_listener(&self, listener: &Arc<dyn EventListener>, id: EventId) {
        lock(&self.nodes).push(ListenerNode {
            listener: Some(Arc::downgrade(listener)),
            filter: id,
        });
    }

    pub(crate) fn remove_listener(&self, listener: &Arc<dyn EventListener>, id: EventId) -> Result<()> {
        let mut nodes = lock(&self.nodes);
        let node = nodes
            .iter_mut()
            .find(|node| node.filter == id && node.is(listener))
            .ok_or(Error::ListenerNotFound { id })?;

        node.listener = None;
        Ok(())
    }

    /// Delivers `event`: agents run their call, anything else goes to every matching
    /// listener in registration order.
    pub(crate) fn dispatch(&self, event: &EventRef) {
        if let Some(agent) = event.as_agent() {
            agent.deliver();
            return;
        }

        let mut index = 0;
        loop {
            let listener = {
                let mut nodes = lock(&self.nodes);
                match next_match(&mut nodes, &mut index, event.id()) {
                    Some(listener) => listener,
                    None => return,
                }
            };

            listener.receive_event(event);
        }
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        lock(&self.nodes).len()
    }
}

// Advances `index` past the next matching live node, erasing dead nodes on the way.
fn next_match(
    nodes: &mut Vec<ListenerNode>,
    index: &mut usize,
    id: EventId,
) -> Option<Arc<dyn EventListener>> {
    while *index < nodes.len() {
        let live = nodes[*index].listener.as_ref().and_then(Weak::upgrade);

        match live {
            None => {
                nodes.remove(*index);
            }
            Some(listener) => {
                let accepts = nodes[*index].accepts(id);
                *index += 1;
                if accepts {
                    return Some(listener);
                }
            }
        }
    }

    None
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Recorder {
        name: &'static str,
        log: Arc<Mutex<Vec<(&'static str, EventId)>>>,
    }

    impl EventListener for Recorder {
        fn receive_event(&self, event: &EventRef) {
            self.log.lock().unwrap().push((self.name, event.id()));
        }
    }

    fn recorder(name: &'static str, log: &Arc<Mutex<Vec<(&'static str, EventId)>>>) -> Arc<dyn EventListener> {
        Arc::new(Recorder {
            name,
            log: log.clone(),
        })
    }

    #[test]
    fn test_fan_out_in_registration_order() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let registry = ListenerRegistry::new();
        let all = recorder("all", &log);
        let one = recorder("one", &log);

        registry.add_listener(&one, 1);
        registry.add_listener(&all, Event::INVALID);

        registry.dispatch(&Event::new(1));
        registry.dispatch(&Event::new(2));

        assert_eq!(*log.lock().unwrap(), vec![("one", 1), ("all", 1), ("all", 2)]);
    }

    #[test]
    fn test_remove_requires_exact_match() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let registry = ListenerRegistry::new();
        let listener = recorder("a", &log);

        registry.add_listener(&listener, 5);

        assert!(matches!(
            registry.remove_listener(&listener, 6),
            Err(Error::ListenerNotFound { id: 6 })
        ));
        assert!(registry.remove_listener(&listener, 5).is_ok());
        assert!(registry.remove_listener(&listener, 5).is_err());

        // The tombstone is pruned by the next scan.
        assert_eq!(registry.len(), 1);
        registry.dispatch(&Event::new(5));
        assert_eq!(registry.len(), 0);
        assert!(log.lock().unwrap().is_empty());
    }

    #[test]
    fn test_dropped_listeners_are_pruned() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let registry = ListenerRegistry::new();
        let listener = recorder("gone", &log);

        registry.add_listener(&listener, Event::INVALID);
        drop(listener);

        registry.dispatch(&Event::new(1));
        assert_eq!(registry.len(), 0);
    }

    struct SelfRemover {
        me: Mutex<Option<Arc<dyn EventListener>>>,
        registry: Arc<ListenerRegistry>,
        calls: Mutex<usize>,
    }

    impl EventListener for SelfRemover {
        fn receive_event(&self, _event: &EventRef) {
            *self.calls.lock().unwrap() += 1;
            if let Some(me) = self.me.lock().unwrap().take() {
                self.registry.remove_listener(&me, Event::INVALID).unwrap();
            }
        }
    }

    #[test]
    fn test_listener_can_remove_itself_during_dispatch() {
        let registry = Arc::new(ListenerRegistry::new());
        let remover = Arc::new(SelfRemover {
            me: Mutex::new(None),
            registry: registry.clone(),
            calls: Mutex::new(0),
        });
        let as_listener: Arc<dyn EventListener> = remover.clone();
        *remover.me.lock().unwrap() = Some(as_listener.clone());

        registry.add_listener(&as_listener, Event::INVALID);
        registry.dispatch(&Event::new(1));
        registry.dispatch(&Event::new(2));

        assert_eq!(*remover.calls.lock().unwrap(), 1);
    }
}
