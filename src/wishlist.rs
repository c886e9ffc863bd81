//! Wishlist store
//!
//! Membership is a set keyed by product id. Toggling twice restores the
//! original membership.

use serde::{Deserialize, Serialize};
use serde_json::json;
use std::time::Duration;

use crate::config::StateConfig;
use crate::error::StateError;
use crate::events::{EventBus, Notification, Subscription, Topic};
use crate::observe::{observe, Observer};
use crate::persistent::PersistentStore;
use crate::product::{Product, WishlistItem};

/// What a toggle did
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ToggleOutcome {
    Added,
    Removed,
}

/// Persisted wishlist
#[derive(Clone, Debug)]
pub struct WishlistStore {
    store: PersistentStore,
    bus: EventBus,
    key: String,
    poll_interval: Option<Duration>,
}

impl WishlistStore {
    /// Create a wishlist over the given store and bus
    pub fn new(store: PersistentStore, bus: EventBus, config: &StateConfig) -> Self {
        Self {
            store,
            bus,
            key: config.keys.wishlist.clone(),
            poll_interval: config.poll_interval,
        }
    }

    /// Remove the product if present, otherwise add it.
    ///
    /// Adding requires an id, name, price and at least one image; an
    /// incomplete product is rejected and nothing changes. Removal only
    /// needs the id.
    pub fn toggle(&self, product: &Product) -> Result<ToggleOutcome, StateError> {
        // An incomplete payload is still good enough to remove an entry
        let price = match product.validate_for_wishlist() {
            Ok(price) => Some(price),
            Err(e) if !self.is_present(&product.id) => {
                tracing::debug!(id = %product.id, error = %e, "Rejected wishlist add");
                return Err(e);
            }
            Err(_) => None,
        };

        let mutation = self.store.update(&self.key, |items: &mut Vec<WishlistItem>| {
            if let Some(index) = items.iter().position(|item| item.id == product.id) {
                items.remove(index);
                return Some(ToggleOutcome::Removed);
            }
            price.map(|price| {
                items.push(WishlistItem::from_product(product, price));
                ToggleOutcome::Added
            })
        });

        let Some(outcome) = mutation.output else {
            // Removed by another context after the presence check
            return Err(StateError::InvalidProduct(format!(
                "incomplete product '{}' is not on the wishlist",
                product.id
            )));
        };

        self.publish(outcome, &product.id);
        Ok(outcome)
    }

    /// Whether a product id is on the wishlist
    pub fn is_present(&self, id: &str) -> bool {
        self.get_all().iter().any(|item| item.id == id)
    }

    /// Remove a product if present
    pub fn remove(&self, id: &str) -> bool {
        let mutation = self.store.update(&self.key, |items: &mut Vec<WishlistItem>| {
            let before = items.len();
            items.retain(|item| item.id != id);
            items.len() != before
        });

        if mutation.output {
            self.publish(ToggleOutcome::Removed, id);
        }
        mutation.output
    }

    /// Empty the wishlist
    pub fn clear(&self) {
        self.store
            .update(&self.key, |items: &mut Vec<WishlistItem>| items.clear());
        self.bus.publish(Topic::WishlistUpdated, None);
    }

    /// All entries, `[]` when storage is empty or unreadable
    pub fn get_all(&self) -> Vec<WishlistItem> {
        self.store.get_or_default(&self.key)
    }

    /// Number of entries
    pub fn len(&self) -> usize {
        self.get_all().len()
    }

    /// Whether the wishlist is empty
    pub fn is_empty(&self) -> bool {
        self.get_all().is_empty()
    }

    /// Subscribe to `wishlist-updated`
    pub fn subscribe<F>(&self, handler: F) -> Subscription
    where
        F: Fn(&Notification) + Send + Sync + 'static,
    {
        self.bus.subscribe(Topic::WishlistUpdated, handler)
    }

    /// Receive the wishlist whenever it changes
    pub fn observe<F>(&self, listener: F) -> Observer
    where
        F: Fn(&Vec<WishlistItem>) + Send + Sync + 'static,
    {
        let wishlist = self.clone();
        observe(
            &self.bus,
            &[Topic::WishlistUpdated],
            self.poll_interval,
            move || wishlist.get_all(),
            listener,
        )
    }

    fn publish(&self, outcome: ToggleOutcome, id: &str) {
        self.bus.publish(
            Topic::WishlistUpdated,
            Some(json!({ "outcome": outcome, "id": id })),
        );
    }
}
