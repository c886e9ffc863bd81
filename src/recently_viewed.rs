//! Recently viewed products, most recent first

use std::time::Duration;

use crate::config::StateConfig;
use crate::events::{EventBus, Notification, Subscription, Topic};
use crate::observe::{observe, Observer};
use crate::persistent::PersistentStore;
use crate::product::{Product, ProductSnapshot};

/// Persisted, bounded list of viewed products
#[derive(Clone, Debug)]
pub struct RecentlyViewedStore {
    store: PersistentStore,
    bus: EventBus,
    key: String,
    limit: usize,
    poll_interval: Option<Duration>,
}

impl RecentlyViewedStore {
    /// Create the list over the given store and bus
    pub fn new(store: PersistentStore, bus: EventBus, config: &StateConfig) -> Self {
        Self {
            store,
            bus,
            key: config.keys.recently_viewed.clone(),
            limit: config.recently_viewed_limit,
            poll_interval: config.poll_interval,
        }
    }

    /// Move the product to the front, dropping older duplicates and overflow
    pub fn record(&self, product: &Product) -> Vec<ProductSnapshot> {
        if product.id.trim().is_empty() {
            tracing::debug!("Ignoring view of product without id");
            return self.get_all();
        }

        let snapshot = ProductSnapshot::from(product);
        let limit = self.limit;
        let mutation = self
            .store
            .update(&self.key, |items: &mut Vec<ProductSnapshot>| {
                items.retain(|item| item.id != snapshot.id);
                items.insert(0, snapshot.clone());
                items.truncate(limit);
            });

        self.bus.publish(Topic::RecentlyViewedUpdated, None);
        mutation.value
    }

    /// Snapshots, most recent first; `[]` when storage is empty or unreadable
    pub fn get_all(&self) -> Vec<ProductSnapshot> {
        self.store.get_or_default(&self.key)
    }

    /// Forget every viewed product
    pub fn clear(&self) {
        self.store.remove(&self.key);
        self.bus.publish(Topic::RecentlyViewedUpdated, None);
    }

    /// Subscribe to `recently-viewed-updated`
    pub fn subscribe<F>(&self, handler: F) -> Subscription
    where
        F: Fn(&Notification) + Send + Sync + 'static,
    {
        self.bus.subscribe(Topic::RecentlyViewedUpdated, handler)
    }

    /// Receive the list whenever it changes
    pub fn observe<F>(&self, listener: F) -> Observer
    where
        F: Fn(&Vec<ProductSnapshot>) + Send + Sync + 'static,
    {
        let recent = self.clone();
        observe(
            &self.bus,
            &[Topic::RecentlyViewedUpdated],
            self.poll_interval,
            move || recent.get_all(),
            listener,
        )
    }
}
