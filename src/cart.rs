//! Cart store
//!
//! A quantity-bearing collection keyed by product id. Lines are merged by id
//! only; size and color do not split a product into separate lines.

use serde_json::json;
use std::time::Duration;

use crate::config::StateConfig;
use crate::error::StateError;
use crate::events::{EventBus, Notification, Subscription, Topic};
use crate::observe::{observe, Observer};
use crate::persistent::PersistentStore;
use crate::product::{CartItem, Product};

/// Persisted shopping cart
#[derive(Clone, Debug)]
pub struct CartStore {
    store: PersistentStore,
    bus: EventBus,
    key: String,
    poll_interval: Option<Duration>,
}

impl CartStore {
    /// Create a cart over the given store and bus
    pub fn new(store: PersistentStore, bus: EventBus, config: &StateConfig) -> Self {
        Self {
            store,
            bus,
            key: config.keys.cart.clone(),
            poll_interval: config.poll_interval,
        }
    }

    /// Add `quantity` of a product (0 counts as 1), merging into an existing line
    pub fn add_item(&self, product: &Product, quantity: u32) -> Result<Vec<CartItem>, StateError> {
        let price = product.validate_for_cart()?;
        let quantity = quantity.max(1);

        let mutation = self.store.update(&self.key, |items: &mut Vec<CartItem>| {
            let existing = items.iter_mut().find(|item| item.id == product.id);
            match existing {
                Some(item) => item.quantity = item.quantity.saturating_add(quantity),
                None => items.push(CartItem::from_product(product, price, quantity)),
            }
        });

        tracing::debug!(id = %product.id, quantity, "Added to cart");
        self.publish(&mutation.value);
        Ok(mutation.value)
    }

    /// Set a line's quantity. Values below 1 are clamped to 1; the line is never removed.
    pub fn update_quantity(&self, id: &str, quantity: i64) -> Vec<CartItem> {
        let quantity = u32::try_from(quantity.max(1)).unwrap_or(u32::MAX);

        let mutation = self.store.update(&self.key, |items: &mut Vec<CartItem>| {
            if let Some(item) = items.iter_mut().find(|item| item.id == id) {
                item.quantity = quantity;
            }
        });

        self.publish(&mutation.value);
        mutation.value
    }

    /// Remove a line if present
    pub fn remove_item(&self, id: &str) -> Vec<CartItem> {
        let mutation = self.store.update(&self.key, |items: &mut Vec<CartItem>| {
            items.retain(|item| item.id != id);
        });

        self.publish(&mutation.value);
        mutation.value
    }

    /// Empty the cart, returning what it held
    pub fn clear(&self) -> Vec<CartItem> {
        let mutation = self
            .store
            .update(&self.key, |items: &mut Vec<CartItem>| std::mem::take(items));

        self.publish(&mutation.value);
        mutation.output
    }

    /// All lines, `[]` when storage is empty or unreadable
    pub fn get_all(&self) -> Vec<CartItem> {
        self.store.get_or_default(&self.key)
    }

    /// Number of units in the cart, as shown on badges
    pub fn total_count(&self) -> u64 {
        count(&self.get_all())
    }

    /// Sum of price × quantity
    pub fn subtotal(&self) -> f64 {
        self.get_all().iter().map(CartItem::line_total).sum()
    }

    /// Subscribe to `cart-updated`
    pub fn subscribe<F>(&self, handler: F) -> Subscription
    where
        F: Fn(&Notification) + Send + Sync + 'static,
    {
        self.bus.subscribe(Topic::CartUpdated, handler)
    }

    /// Receive the cart contents whenever they change
    pub fn observe<F>(&self, listener: F) -> Observer
    where
        F: Fn(&Vec<CartItem>) + Send + Sync + 'static,
    {
        let cart = self.clone();
        observe(
            &self.bus,
            &[Topic::CartUpdated],
            self.poll_interval,
            move || cart.get_all(),
            listener,
        )
    }

    fn publish(&self, items: &[CartItem]) {
        self.bus
            .publish(Topic::CartUpdated, Some(json!({ "count": count(items) })));
    }
}

fn count(items: &[CartItem]) -> u64 {
    items.iter().map(|item| u64::from(item.quantity)).sum()
}
