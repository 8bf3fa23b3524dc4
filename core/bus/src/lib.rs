//! In-process topic pub/sub (`spec.md` §4.3). Generic over the event payload
//! so both `ChannelManager`'s `channel.open`/`channel.data`/`channel.closed`
//! fan-out and `Node`'s `command`/`task`/`reply`/`sync-message` dispatch run
//! on the same mechanism.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::RwLock;
use tracing::warn;

pub type Handler<E> = Box<dyn Fn(&E) -> Result<(), Box<dyn std::error::Error + Send + Sync>> + Send + Sync>;

/// Returned by `on()`, used to unsubscribe. Rust closures aren't comparable
/// by identity the way the source's Python callables are, so this id is the
/// idiomatic stand-in for handler-identity equality: every subscription is
/// distinct by construction, which also means duplicate-handler rejection
/// (the source's `on()` behavior) has no counterpart here — every `on()`
/// call succeeds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

struct Subscription<E> {
    id: SubscriptionId,
    handler: Handler<E>,
}

pub struct MessageBus<E> {
    subscribers: RwLock<HashMap<String, Vec<Subscription<E>>>>,
    next_id: AtomicU64,
}

impl<E> Default for MessageBus<E> {
    fn default() -> Self {
        Self {
            subscribers: RwLock::new(HashMap::new()),
            next_id: AtomicU64::new(1),
        }
    }
}

impl<E> MessageBus<E> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on(&self, topic: impl Into<String>, handler: Handler<E>) -> SubscriptionId {
        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.subscribers
            .write()
            .entry(topic.into())
            .or_default()
            .push(Subscription { id, handler });
        id
    }

    pub fn remove(&self, topic: &str, id: SubscriptionId) {
        if let Some(subs) = self.subscribers.write().get_mut(topic) {
            subs.retain(|s| s.id != id);
        }
    }

    /// Synchronous: returns only after every handler has run. A handler
    /// returning `Err` is logged; the rest still run (`spec.md` §4.3,
    /// "Publishing catches per-handler exceptions").
    pub fn publish(&self, topic: &str, event: &E) {
        let subscribers = self.subscribers.read();
        let Some(subs) = subscribers.get(topic) else {
            return;
        };
        for sub in subs {
            if let Err(e) = (sub.handler)(event) {
                warn!(topic, error = %e, "message bus handler failed");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::sync::Arc;

    #[test]
    fn publish_invokes_all_subscribers_on_topic() {
        let bus: MessageBus<u32> = MessageBus::new();
        let count = Arc::new(AtomicUsize::new(0));
        let c1 = count.clone();
        bus.on("topic", Box::new(move |_| { c1.fetch_add(1, Ordering::SeqCst); Ok(()) }));
        let c2 = count.clone();
        bus.on("topic", Box::new(move |_| { c2.fetch_add(10, Ordering::SeqCst); Ok(()) }));
        bus.publish("topic", &1);
        assert_eq!(count.load(Ordering::SeqCst), 11);
    }

    #[test]
    fn publish_on_unknown_topic_is_a_no_op() {
        let bus: MessageBus<u32> = MessageBus::new();
        bus.publish("nothing-subscribed", &1);
    }

    #[test]
    fn failing_handler_does_not_block_the_rest() {
        let bus: MessageBus<u32> = MessageBus::new();
        let ran = Arc::new(AtomicUsize::new(0));
        bus.on("topic", Box::new(|_| Err("boom".into())));
        let ran2 = ran.clone();
        bus.on("topic", Box::new(move |_| { ran2.fetch_add(1, Ordering::SeqCst); Ok(()) }));
        bus.publish("topic", &1);
        assert_eq!(ran.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn removed_subscription_no_longer_receives_events() {
        let bus: MessageBus<u32> = MessageBus::new();
        let count = Arc::new(AtomicUsize::new(0));
        let c = count.clone();
        let id = bus.on("topic", Box::new(move |_| { c.fetch_add(1, Ordering::SeqCst); Ok(()) }));
        bus.remove("topic", id);
        bus.publish("topic", &1);
        assert_eq!(count.load(Ordering::SeqCst), 0);
    }
}
