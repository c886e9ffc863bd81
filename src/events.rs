//! In-process publish/subscribe
//!
//! Stores publish a [`Notification`] after every mutation; UI-facing code
//! subscribes per [`Topic`]. Changes written by other browsing contexts are
//! mirrored onto the same topics through [`EventBus::bridge`].

use parking_lot::RwLock;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use crate::config::StorageKeys;
use crate::store::{StorageBackend, StorageChange, WatchHandle};

/// Notification topics
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Topic {
    CartUpdated,
    WishlistUpdated,
    RecentlyViewedUpdated,
    ShippingAddressUpdated,
    SessionChanged,
}

impl Topic {
    /// Wire name of the topic
    pub fn as_str(&self) -> &'static str {
        match self {
            Topic::CartUpdated => "cart-updated",
            Topic::WishlistUpdated => "wishlist-updated",
            Topic::RecentlyViewedUpdated => "recently-viewed-updated",
            Topic::ShippingAddressUpdated => "shipping-address-updated",
            Topic::SessionChanged => "session-changed",
        }
    }

    /// Topic announcing changes to the given storage key, if any
    pub fn for_key(keys: &StorageKeys, key: &str) -> Option<Topic> {
        if key == keys.cart {
            Some(Topic::CartUpdated)
        } else if key == keys.wishlist {
            Some(Topic::WishlistUpdated)
        } else if key == keys.recently_viewed {
            Some(Topic::RecentlyViewedUpdated)
        } else if key == keys.shipping_address {
            Some(Topic::ShippingAddressUpdated)
        } else if key == keys.token {
            Some(Topic::SessionChanged)
        } else {
            None
        }
    }
}

impl std::fmt::Display for Topic {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Where a notification came from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Source {
    /// Published by a store in this context
    Local,
    /// Mirrored from a storage write in another context
    OtherContext,
}

/// A published change
#[derive(Debug, Clone, PartialEq)]
pub struct Notification {
    pub topic: Topic,
    pub source: Source,
    /// Optional payload, e.g. the outcome of a wishlist toggle
    pub detail: Option<Value>,
}

type Handler = Arc<dyn Fn(&Notification) + Send + Sync>;

#[derive(Default)]
struct BusInner {
    handlers: RwLock<HashMap<Topic, Vec<(u64, Handler)>>>,
    next_id: AtomicU64,
}

impl BusInner {
    fn unsubscribe(&self, topic: Topic, id: u64) {
        let mut handlers = self.handlers.write();
        if let Some(list) = handlers.get_mut(&topic) {
            list.retain(|(handler_id, _)| *handler_id != id);
            if list.is_empty() {
                handlers.remove(&topic);
            }
        }
    }
}

/// Publish/subscribe channel shared by every store in one context
///
/// `Clone` is cheap and shares the same subscribers.
#[derive(Clone, Default)]
pub struct EventBus {
    inner: Arc<BusInner>,
}

impl EventBus {
    /// Create a bus with no subscribers
    pub fn new() -> Self {
        Self::default()
    }

    /// Deliver a local notification to every current subscriber of `topic`
    pub fn publish(&self, topic: Topic, detail: Option<Value>) {
        self.dispatch(Notification {
            topic,
            source: Source::Local,
            detail,
        });
    }

    /// Deliver a notification as-is
    ///
    /// Handlers run synchronously in subscription order. The handler list is
    /// copied first, so handlers may publish or (un)subscribe themselves.
    pub fn dispatch(&self, notification: Notification) {
        let handlers: Vec<Handler> = match self.inner.handlers.read().get(&notification.topic) {
            Some(list) => list.iter().map(|(_, h)| Arc::clone(h)).collect(),
            None => return,
        };

        tracing::trace!(
            topic = %notification.topic,
            subscribers = handlers.len(),
            "Dispatching notification"
        );
        for handler in handlers {
            handler(&notification);
        }
    }

    /// Subscribe to a topic. The handler stays registered until the returned
    /// [`Subscription`] is dropped or unsubscribed.
    pub fn subscribe<F>(&self, topic: Topic, handler: F) -> Subscription
    where
        F: Fn(&Notification) + Send + Sync + 'static,
    {
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        self.inner
            .handlers
            .write()
            .entry(topic)
            .or_default()
            .push((id, Arc::new(handler)));

        Subscription {
            bus: Arc::downgrade(&self.inner),
            topic,
            id,
            active: true,
        }
    }

    /// Number of handlers currently subscribed to `topic`
    pub fn subscriber_count(&self, topic: Topic) -> usize {
        self.inner
            .handlers
            .read()
            .get(&topic)
            .map(Vec::len)
            .unwrap_or(0)
    }

    /// Mirror storage changes made by other contexts onto this bus
    ///
    /// Returns None when the backend cannot observe foreign writes.
    pub fn bridge(&self, backend: &dyn StorageBackend, keys: StorageKeys) -> Option<WatchHandle> {
        let bus = Arc::downgrade(&self.inner);
        backend.watch(Arc::new(move |change: &StorageChange| {
            let Some(topic) = Topic::for_key(&keys, &change.key) else {
                return;
            };
            if let Some(inner) = bus.upgrade() {
                EventBus { inner }.dispatch(Notification {
                    topic,
                    source: Source::OtherContext,
                    detail: None,
                });
            }
        }))
    }
}

impl std::fmt::Debug for EventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let handlers = self.inner.handlers.read();
        let counts: HashMap<&'static str, usize> =
            handlers.iter().map(|(t, l)| (t.as_str(), l.len())).collect();
        f.debug_struct("EventBus").field("subscribers", &counts).finish()
    }
}

/// Guard for a bus subscription; dropping it unsubscribes
pub struct Subscription {
    bus: Weak<BusInner>,
    topic: Topic,
    id: u64,
    active: bool,
}

impl Subscription {
    /// Topic this subscription listens to
    pub fn topic(&self) -> Topic {
        self.topic
    }

    /// Remove the handler now
    pub fn unsubscribe(mut self) {
        self.release();
    }

    fn release(&mut self) {
        if !self.active {
            return;
        }
        self.active = false;
        if let Some(inner) = self.bus.upgrade() {
            inner.unsubscribe(self.topic, self.id);
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.release();
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("topic", &self.topic)
            .field("id", &self.id)
            .field("active", &self.active)
            .finish()
    }
}
