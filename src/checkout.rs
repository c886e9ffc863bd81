//! Shipping address memory for checkout
//!
//! The last submitted address is kept so the checkout form can be prefilled
//! on the next visit.

use serde::{Deserialize, Serialize};

use crate::config::StateConfig;
use crate::events::{EventBus, Topic};
use crate::persistent::PersistentStore;

/// Address and contact details submitted at checkout
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ShippingAddress {
    pub full_name: String,
    pub email: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phone: Option<String>,
    pub address: String,
    pub city: String,
    pub postal_code: String,
    pub country: String,
}

/// Persisted last-used shipping address
#[derive(Clone, Debug)]
pub struct ShippingAddressStore {
    store: PersistentStore,
    bus: EventBus,
    key: String,
}

impl ShippingAddressStore {
    /// Create the store over the given backend and bus
    pub fn new(store: PersistentStore, bus: EventBus, config: &StateConfig) -> Self {
        Self {
            store,
            bus,
            key: config.keys.shipping_address.clone(),
        }
    }

    /// Last saved address, if any was stored and is readable
    pub fn load(&self) -> Option<ShippingAddress> {
        self.store.get(&self.key, None)
    }

    /// Remember an address. Returns false if it could not be persisted.
    pub fn save(&self, address: &ShippingAddress) -> bool {
        let persisted = self.store.set(&self.key, address);
        self.bus.publish(Topic::ShippingAddressUpdated, None);
        persisted
    }

    /// Forget the saved address
    pub fn clear(&self) {
        self.store.remove(&self.key);
        self.bus.publish(Topic::ShippingAddressUpdated, None);
    }
}
