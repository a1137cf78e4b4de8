// ── Event dispatcher ──
//
// Fan-out of every ingested event to registered handlers, in registration
// order, on the ingesting source's task. Handlers run after the store has
// applied the event and with no dispatcher lock held, so a handler may
// register or unregister freely. Every event is also published on a
// broadcast channel for stream consumers.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use ndb_api::{Event, Kind};
use parking_lot::RwLock;
use tokio::sync::{broadcast, watch};
use tracing::trace;

const EVENT_CHANNEL_SIZE: usize = 1024;

/// Handler callback: `(target, event)`.
pub type Handler = Arc<dyn Fn(&str, &Event) + Send + Sync>;

/// Predicate deciding whether a one-shot handler fires.
pub type Predicate = Arc<dyn Fn(&str, &Event) -> bool + Send + Sync>;

/// Identifies one registration for [`Dispatcher::unregister`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct HandlerId(u64);

struct Registration {
    id: HandlerId,
    handler: Handler,
    /// One-shot registrations fire on the first event accepted by this
    /// predicate and are then removed.
    once: Option<Predicate>,
}

pub struct Dispatcher {
    handlers: RwLock<HashMap<Kind, Vec<Registration>>>,
    next_id: AtomicU64,
    events: broadcast::Sender<(String, Event)>,
}

impl std::fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let handlers: usize = self.handlers.read().values().map(Vec::len).sum();
        f.debug_struct("Dispatcher")
            .field("handlers", &handlers)
            .finish_non_exhaustive()
    }
}

impl Default for Dispatcher {
    fn default() -> Self {
        Self::new()
    }
}

impl Dispatcher {
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_SIZE);
        Self {
            handlers: RwLock::new(HashMap::new()),
            next_id: AtomicU64::new(1),
            events,
        }
    }

    fn push(&self, kind: Kind, handler: Handler, once: Option<Predicate>) -> HandlerId {
        let id = HandlerId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.handlers
            .write()
            .entry(kind)
            .or_default()
            .push(Registration { id, handler, once });
        id
    }

    /// Register a persistent handler for `kind`.
    pub fn register<F>(&self, kind: Kind, handler: F) -> HandlerId
    where
        F: Fn(&str, &Event) + Send + Sync + 'static,
    {
        self.push(kind, Arc::new(handler), None)
    }

    /// Register a handler that fires once, on the first event of `kind`
    /// accepted by `predicate`.
    pub fn register_once<P, F>(&self, kind: Kind, predicate: P, handler: F) -> HandlerId
    where
        P: Fn(&str, &Event) -> bool + Send + Sync + 'static,
        F: Fn(&str, &Event) + Send + Sync + 'static,
    {
        self.push(kind, Arc::new(handler), Some(Arc::new(predicate)))
    }

    /// Remove a registration. Returns `false` if it already fired or was
    /// never registered.
    pub fn unregister(&self, kind: Kind, id: HandlerId) -> bool {
        let mut handlers = self.handlers.write();
        let Some(list) = handlers.get_mut(&kind) else {
            return false;
        };
        let before = list.len();
        list.retain(|r| r.id != id);
        before != list.len()
    }

    /// Deliver one ingested event.
    pub fn dispatch(&self, target: &str, event: &Event) {
        let due: Vec<Handler> = {
            let mut handlers = self.handlers.write();
            let Some(list) = handlers.get_mut(&event.kind) else {
                let _ = self.events.send((target.to_owned(), event.clone()));
                return;
            };
            let mut due = Vec::with_capacity(list.len());
            list.retain(|r| match &r.once {
                None => {
                    due.push(Arc::clone(&r.handler));
                    true
                }
                Some(predicate) if predicate(target, event) => {
                    due.push(Arc::clone(&r.handler));
                    false
                }
                Some(_) => true,
            });
            due
        };

        trace!(%target, kind = %event.kind, action = %event.action, handlers = due.len(), "dispatching");
        for handler in due {
            handler(target, event);
        }
        // No subscribers is fine.
        let _ = self.events.send((target.to_owned(), event.clone()));
    }

    /// Subscribe to every dispatched `(target, event)`.
    pub fn subscribe(&self) -> broadcast::Receiver<(String, Event)> {
        self.events.subscribe()
    }

    /// Arm a waiter for the first event of `kind` accepted by `predicate`.
    pub fn waiter<P>(self: &Arc<Self>, kind: Kind, predicate: P) -> EventWaiter
    where
        P: Fn(&str, &Event) -> bool + Send + Sync + 'static,
    {
        let (tx, rx) = watch::channel(None);
        let id = self.register_once(kind, predicate, move |target, event| {
            tx.send_replace(Some((target.to_owned(), event.clone())));
        });
        EventWaiter {
            dispatcher: Arc::downgrade(self),
            kind,
            id,
            rx,
        }
    }
}

// ── EventWaiter ──────────────────────────────────────────────────────

/// Blocking "wait for a matching event" primitive.
///
/// The handler is registered when the waiter is created, so an event that
/// arrives before [`wait`](Self::wait) is called is still captured.
/// Dropping an unfired waiter unregisters it.
pub struct EventWaiter {
    dispatcher: Weak<Dispatcher>,
    kind: Kind,
    id: HandlerId,
    rx: watch::Receiver<Option<(String, Event)>>,
}

impl std::fmt::Debug for EventWaiter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventWaiter")
            .field("kind", &self.kind)
            .field("id", &self.id)
            .finish_non_exhaustive()
    }
}

impl EventWaiter {
    /// Wait until the matching event arrives or `timeout` elapses.
    /// Returns `None` on timeout.
    pub async fn wait(&mut self, timeout: Duration) -> Option<(String, Event)> {
        let fired = tokio::time::timeout(timeout, self.rx.wait_for(Option::is_some)).await;
        match fired {
            Ok(Ok(value)) => value.clone(),
            // Sender gone without firing: the registration was dropped.
            Ok(Err(_)) | Err(_) => None,
        }
    }

    /// The matched event, if it has already arrived.
    pub fn try_take(&self) -> Option<(String, Event)> {
        self.rx.borrow().clone()
    }
}

impl Drop for EventWaiter {
    fn drop(&mut self) {
        if let Some(dispatcher) = self.dispatcher.upgrade() {
            dispatcher.unregister(self.kind, self.id);
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::sync::Mutex;

    use ndb_api::Attrs;

    use super::*;

    fn link(name: &str) -> Event {
        Event::new(Kind::Interface, Attrs::new().with("index", 2).with("ifname", name))
    }

    #[test]
    fn handlers_run_in_registration_order() {
        let dispatcher = Dispatcher::new();
        let seen = Arc::new(Mutex::new(Vec::new()));
        for tag in ["first", "second"] {
            let seen = Arc::clone(&seen);
            dispatcher.register(Kind::Interface, move |_, _| seen.lock().unwrap().push(tag));
        }
        dispatcher.dispatch("t", &link("a"));
        assert_eq!(*seen.lock().unwrap(), ["first", "second"]);
    }

    #[test]
    fn handlers_only_see_their_kind() {
        let dispatcher = Dispatcher::new();
        let hits = Arc::new(AtomicU64::new(0));
        let counter = Arc::clone(&hits);
        dispatcher.register(Kind::Route, move |_, _| {
            counter.fetch_add(1, Ordering::Relaxed);
        });
        dispatcher.dispatch("t", &link("a"));
        assert_eq!(hits.load(Ordering::Relaxed), 0);
    }

    #[test]
    fn one_shot_fires_once_on_match() {
        let dispatcher = Dispatcher::new();
        let hits = Arc::new(AtomicU64::new(0));
        let counter = Arc::clone(&hits);
        dispatcher.register_once(
            Kind::Interface,
            |_, e| e.attrs.get_str("ifname") == Some("b"),
            move |_, _| {
                counter.fetch_add(1, Ordering::Relaxed);
            },
        );
        for name in ["a", "b", "b"] {
            dispatcher.dispatch("t", &link(name));
        }
        assert_eq!(hits.load(Ordering::Relaxed), 1);
    }

    #[test]
    fn unregister_removes_handler() {
        let dispatcher = Dispatcher::new();
        let id = dispatcher.register(Kind::Interface, |_, _| {});
        assert!(dispatcher.unregister(Kind::Interface, id));
        assert!(!dispatcher.unregister(Kind::Interface, id));
    }

    #[tokio::test]
    async fn waiter_captures_event_before_wait() {
        let dispatcher = Arc::new(Dispatcher::new());
        let mut waiter = dispatcher.waiter(Kind::Interface, |_, e| e.attrs.get_str("ifname") == Some("a"));
        dispatcher.dispatch("ns1", &link("a"));

        let (target, event) = waiter.wait(Duration::from_millis(10)).await.unwrap();
        assert_eq!(target, "ns1");
        assert_eq!(event.attrs.get_str("ifname"), Some("a"));
    }

    #[tokio::test(start_paused = true)]
    async fn waiter_times_out() {
        let dispatcher = Arc::new(Dispatcher::new());
        let mut waiter = dispatcher.waiter(Kind::Interface, |_, _| false);
        assert!(waiter.wait(Duration::from_secs(3)).await.is_none());
    }

    #[test]
    fn dropping_waiter_unregisters() {
        let dispatcher = Arc::new(Dispatcher::new());
        let waiter = dispatcher.waiter(Kind::Interface, |_, _| true);
        drop(waiter);
        assert_eq!(format!("{dispatcher:?}"), "Dispatcher { handlers: 0, .. }");
    }
}
