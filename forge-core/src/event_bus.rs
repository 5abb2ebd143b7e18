//! In-process topic pub/sub with handler isolation (§4.3).

use log::error;
use std::collections::HashMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};

pub type Handler = Arc<dyn Fn(&serde_json::Value) + Send + Sync>;

struct Subscription {
    id: u64,
    handler: Handler,
}

/// Thread-safe publish/subscribe bus. `publish` snapshots the subscriber list
/// under the bus lock, then runs handlers outside it so a slow or panicking
/// handler never blocks `subscribe`/`publish` on other topics.
#[derive(Default)]
pub struct EventBus {
    subs: RwLock<HashMap<String, Vec<Subscription>>>,
    next_id: AtomicU64,
}

/// Dropping or calling this removes the subscription it was issued for.
pub struct Unsubscribe {
    bus: Arc<EventBus>,
    topic: String,
    id: u64,
}

impl Unsubscribe {
    pub fn call(self) {
        let mut subs = self.bus.subs.write().unwrap();
        if let Some(list) = subs.get_mut(&self.topic) {
            list.retain(|s| s.id != self.id);
        }
    }
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Subscribes `handler` to `topic`, returning a token that unsubscribes
    /// it when `.call()`'d.
    pub fn subscribe(self: &Arc<Self>, topic: &str, handler: Handler) -> Unsubscribe {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        {
            let mut subs = self.subs.write().unwrap();
            subs.entry(topic.to_string())
                .or_default()
                .push(Subscription { id, handler });
        }
        Unsubscribe {
            bus: self.clone(),
            topic: topic.to_string(),
            id,
        }
    }

    /// Publishes `payload` to every subscriber of `topic`, in subscription
    /// order. A handler that panics is caught, logged, and skipped; other
    /// handlers still receive the payload.
    pub fn publish(&self, topic: &str, payload: &serde_json::Value) {
        let handlers: Vec<Handler> = {
            let subs = self.subs.read().unwrap();
            subs.get(topic)
                .map(|list| list.iter().map(|s| s.handler.clone()).collect())
                .unwrap_or_default()
        };
        for handler in handlers {
            if catch_unwind(AssertUnwindSafe(|| handler(payload))).is_err() {
                error!("event handler for topic '{}' panicked; skipped", topic);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[test]
    fn delivers_in_subscription_order() {
        let bus = Arc::new(EventBus::new());
        let order = Arc::new(Mutex::new(Vec::new()));
        let o1 = order.clone();
        bus.subscribe("topic", Arc::new(move |_| o1.lock().unwrap().push(1)));
        let o2 = order.clone();
        bus.subscribe("topic", Arc::new(move |_| o2.lock().unwrap().push(2)));
        bus.publish("topic", &serde_json::Value::Null);
        assert_eq!(*order.lock().unwrap(), vec![1, 2]);
    }

    #[test]
    fn panicking_handler_does_not_block_others() {
        let bus = Arc::new(EventBus::new());
        let seen = Arc::new(Mutex::new(false));
        bus.subscribe("topic", Arc::new(|_| panic!("boom")));
        let seen2 = seen.clone();
        bus.subscribe("topic", Arc::new(move |_| *seen2.lock().unwrap() = true));
        bus.publish("topic", &serde_json::Value::Null);
        assert!(*seen.lock().unwrap());
    }

    #[test]
    fn unsubscribe_stops_delivery() {
        let bus = Arc::new(EventBus::new());
        let count = Arc::new(Mutex::new(0));
        let c = count.clone();
        let token = bus.subscribe("topic", Arc::new(move |_| *c.lock().unwrap() += 1));
        bus.publish("topic", &serde_json::Value::Null);
        token.call();
        bus.publish("topic", &serde_json::Value::Null);
        assert_eq!(*count.lock().unwrap(), 1);
    }
}
