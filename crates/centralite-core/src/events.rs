//! Push event subscriptions
//!
//! Adapters register handlers under an [`EventKey`]; the reader thread
//! dispatches every switch and load event to the handlers of its key in
//! registration order. A failing handler is logged and skipped, it never
//! stops the other handlers or the reader.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock};

/// Canonical subscription key
///
/// Loads and switches live under different tags, so load 75 and switch 75
/// never share a key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EventKey(String);

impl EventKey {
    /// `^K###`: load `id` changed level
    pub fn load_change(id: u16) -> Self {
        Self(format!("^K{:03}", id))
    }

    /// `P####`: switch `id` pressed (leading board digit included)
    pub fn pressed(id: u16) -> Self {
        Self(format!("P{:04}", id))
    }

    /// `R####`: switch `id` released
    pub fn released(id: u16) -> Self {
        Self(format!("R{:04}", id))
    }

    /// Wire form of the key, e.g. `P0044`
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for EventKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Event delivered to handlers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PanelEvent {
    /// Load changed level; `level` is the panel's unscaled 0-99 value
    LoadChanged {
        /// Load number
        id: u16,
        /// Level 0-99
        level: u8,
    },
    /// Switch went down
    SwitchPressed {
        /// Switch number
        id: u16,
    },
    /// Switch came back up
    SwitchReleased {
        /// Switch number
        id: u16,
    },
}

impl PanelEvent {
    /// Key handlers for this event are registered under
    pub fn key(&self) -> EventKey {
        match *self {
            PanelEvent::LoadChanged { id, .. } => EventKey::load_change(id),
            PanelEvent::SwitchPressed { id } => EventKey::pressed(id),
            PanelEvent::SwitchReleased { id } => EventKey::released(id),
        }
    }
}

/// Callback invoked on the reader thread; keep it cheap
pub type Handler = Arc<dyn Fn(&PanelEvent) -> anyhow::Result<()> + Send + Sync>;

/// Identifies one registered handler
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

/// Returned by subscribe; pass it to unsubscribe to remove the handler
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Subscription {
    key: EventKey,
    id: SubscriptionId,
}

impl Subscription {
    /// Key the handler was registered under
    pub fn key(&self) -> &EventKey {
        &self.key
    }

    /// Id unique to this registration
    pub fn id(&self) -> SubscriptionId {
        self.id
    }
}

/// Outcome of one dispatch
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatchReport {
    /// Handlers that returned Ok
    pub delivered: usize,
    /// Handlers that returned an error or panicked
    pub failed: usize,
}

/// Handler registry shared between adapters and the reader thread
#[derive(Default)]
pub struct EventBus {
    handlers: RwLock<HashMap<EventKey, Vec<(SubscriptionId, Handler)>>>,
    next_id: AtomicU64,
}

impl EventBus {
    /// Create an empty bus
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handler under `key`
    ///
    /// Registering the same closure twice adds it twice.
    pub fn subscribe<F>(&self, key: EventKey, handler: F) -> Subscription
    where
        F: Fn(&PanelEvent) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        tracing::debug!("subscribe: {} as {:?}", key, id);
        self.handlers
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(key.clone())
            .or_default()
            .push((id, Arc::new(handler)));
        Subscription { key, id }
    }

    /// Remove exactly the handler `subscription` refers to
    pub fn unsubscribe(&self, subscription: &Subscription) -> bool {
        let mut handlers = self.handlers.write().unwrap_or_else(PoisonError::into_inner);
        let Some(list) = handlers.get_mut(&subscription.key) else {
            return false;
        };
        let before = list.len();
        list.retain(|(id, _)| *id != subscription.id);
        let removed = list.len() != before;
        if list.is_empty() {
            handlers.remove(&subscription.key);
        }
        removed
    }

    /// Number of handlers registered under `key`
    pub fn subscriber_count(&self, key: &EventKey) -> usize {
        self.handlers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(key)
            .map_or(0, Vec::len)
    }

    /// Drop every subscription
    pub fn clear(&self) {
        self.handlers
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }

    /// Run every handler registered for the event's key
    ///
    /// Handlers run after the registry lock is released, so a handler may
    /// subscribe or unsubscribe without deadlocking.
    pub fn dispatch(&self, event: &PanelEvent) -> DispatchReport {
        let key = event.key();
        let snapshot: Vec<(SubscriptionId, Handler)> = match self
            .handlers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&key)
        {
            Some(list) => list.clone(),
            None => {
                tracing::trace!("dispatch: no handlers for {}", key);
                return DispatchReport::default();
            }
        };

        let mut report = DispatchReport::default();
        for (id, handler) in snapshot {
            match panic::catch_unwind(AssertUnwindSafe(|| handler(event))) {
                Ok(Ok(())) => report.delivered += 1,
                Ok(Err(e)) => {
                    report.failed += 1;
                    tracing::warn!(key = %key, subscription = ?id, "dispatch: handler failed: {e:#}");
                }
                Err(payload) => {
                    report.failed += 1;
                    tracing::error!(
                        key = %key,
                        subscription = ?id,
                        "dispatch: handler panicked: {}",
                        panic_message(payload.as_ref())
                    );
                }
            }
        }
        report
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> &str {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.as_str()
    } else {
        "non-string panic payload"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    type BoxedHandler = Box<dyn Fn(&PanelEvent) -> anyhow::Result<()> + Send + Sync>;

    /// Shared log plus a factory of handlers that append "name:key" to it
    fn recorder() -> (Arc<Mutex<Vec<String>>>, impl Fn(&str) -> BoxedHandler) {
        let log = Arc::new(Mutex::new(Vec::new()));
        let shared = log.clone();
        let factory = move |name: &str| -> BoxedHandler {
            let log = shared.clone();
            let name = name.to_string();
            Box::new(move |event: &PanelEvent| -> anyhow::Result<()> {
                log.lock().unwrap().push(format!("{name}:{}", event.key()));
                Ok(())
            })
        };
        (log, factory)
    }

    #[test]
    fn test_key_formats() {
        assert_eq!(EventKey::load_change(7).as_str(), "^K007");
        assert_eq!(EventKey::pressed(75).as_str(), "P0075");
        assert_eq!(EventKey::released(1106).as_str(), "R1106");
        assert_ne!(EventKey::load_change(75), EventKey::pressed(75));
    }

    #[test]
    fn test_event_keys() {
        assert_eq!(
            PanelEvent::LoadChanged { id: 3, level: 45 }.key(),
            EventKey::load_change(3)
        );
        assert_eq!(PanelEvent::SwitchPressed { id: 9 }.key(), EventKey::pressed(9));
        assert_eq!(PanelEvent::SwitchReleased { id: 9 }.key(), EventKey::released(9));
    }

    #[test]
    fn test_dispatch_in_registration_order() {
        let bus = EventBus::new();
        let (log, handler) = recorder();
        bus.subscribe(EventKey::pressed(1), handler("a"));
        bus.subscribe(EventKey::pressed(1), handler("b"));
        bus.subscribe(EventKey::pressed(2), handler("other"));

        let report = bus.dispatch(&PanelEvent::SwitchPressed { id: 1 });
        assert_eq!(report.delivered, 2);
        assert_eq!(*log.lock().unwrap(), vec!["a:P0001", "b:P0001"]);
    }

    #[test]
    fn test_duplicate_subscriptions_both_run() {
        let bus = EventBus::new();
        let (log, handler) = recorder();
        let h: Handler = Arc::from(handler("dup"));
        let h2 = h.clone();
        bus.subscribe(EventKey::load_change(4), move |e| h(e));
        bus.subscribe(EventKey::load_change(4), move |e| h2(e));

        bus.dispatch(&PanelEvent::LoadChanged { id: 4, level: 10 });
        assert_eq!(log.lock().unwrap().len(), 2);
    }

    #[test]
    fn test_unsubscribe_removes_one_instance() {
        let bus = EventBus::new();
        let (log, handler) = recorder();
        let first = bus.subscribe(EventKey::released(5), handler("first"));
        bus.subscribe(EventKey::released(5), handler("second"));

        assert!(bus.unsubscribe(&first));
        assert!(!bus.unsubscribe(&first));
        assert_eq!(bus.subscriber_count(&EventKey::released(5)), 1);

        bus.dispatch(&PanelEvent::SwitchReleased { id: 5 });
        assert_eq!(*log.lock().unwrap(), vec!["second:R0005"]);
    }

    #[test]
    fn test_failing_handler_does_not_stop_others() {
        let bus = EventBus::new();
        let (log, handler) = recorder();
        bus.subscribe(EventKey::pressed(1), |_| anyhow::bail!("adapter is gone"));
        bus.subscribe(EventKey::pressed(1), handler("after_error"));
        bus.subscribe(EventKey::pressed(1), |_| panic!("adapter bug"));
        bus.subscribe(EventKey::pressed(1), handler("after_panic"));
        bus.subscribe(EventKey::pressed(2), handler("other_key"));

        let report = bus.dispatch(&PanelEvent::SwitchPressed { id: 1 });
        assert_eq!(report, DispatchReport { delivered: 2, failed: 2 });

        // Next events still reach everyone
        let report = bus.dispatch(&PanelEvent::SwitchPressed { id: 1 });
        assert_eq!(report.failed, 2);
        bus.dispatch(&PanelEvent::SwitchPressed { id: 2 });

        assert_eq!(
            *log.lock().unwrap(),
            vec![
                "after_error:P0001",
                "after_panic:P0001",
                "after_error:P0001",
                "after_panic:P0001",
                "other_key:P0002",
            ]
        );
    }

    #[test]
    fn test_handler_may_unsubscribe_itself() {
        let bus = Arc::new(EventBus::new());
        let slot: Arc<Mutex<Option<Subscription>>> = Arc::new(Mutex::new(None));

        let bus_in_handler = bus.clone();
        let slot_in_handler = slot.clone();
        let sub = bus.subscribe(EventKey::pressed(3), move |_| {
            if let Some(sub) = slot_in_handler.lock().unwrap().take() {
                bus_in_handler.unsubscribe(&sub);
            }
            Ok(())
        });
        *slot.lock().unwrap() = Some(sub);

        assert_eq!(bus.dispatch(&PanelEvent::SwitchPressed { id: 3 }).delivered, 1);
        assert_eq!(bus.dispatch(&PanelEvent::SwitchPressed { id: 3 }).delivered, 0);
    }

    #[test]
    fn test_clear() {
        let bus = EventBus::new();
        bus.subscribe(EventKey::pressed(1), |_| Ok(()));
        bus.clear();
        assert_eq!(bus.subscriber_count(&EventKey::pressed(1)), 0);
    }

    #[test]
    fn test_event_serializes_with_type_tag() {
        let json = serde_json::to_string(&PanelEvent::LoadChanged { id: 3, level: 45 }).unwrap();
        assert_eq!(json, r#"{"type":"load_changed","id":3,"level":45}"#);
    }
}
