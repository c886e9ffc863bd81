//! One context's worth of storefront state
//!
//! [`Storefront`] wires every store to a shared backend and event bus, and
//! mirrors writes made by other contexts onto the bus.

use std::sync::Arc;

use crate::auth::AuthApi;
use crate::cart::CartStore;
use crate::checkout::{ShippingAddress, ShippingAddressStore};
use crate::clock::{Clock, SystemClock};
use crate::config::StateConfig;
use crate::events::{EventBus, Source, Subscription, Topic};
use crate::persistent::PersistentStore;
use crate::product::CartItem;
use crate::recently_viewed::RecentlyViewedStore;
use crate::session::SessionManager;
use crate::store::{StorageBackend, WatchHandle};
use crate::wishlist::WishlistStore;

/// Every store for one browsing context, sharing a bus and a backend
pub struct Storefront {
    bus: EventBus,
    cart: CartStore,
    wishlist: WishlistStore,
    recently_viewed: RecentlyViewedStore,
    shipping: ShippingAddressStore,
    session: SessionManager,
    bridge: Option<WatchHandle>,
    _session_sync: Subscription,
}

impl Storefront {
    /// Build the stores over `backend` using the wall clock
    pub fn new(
        backend: Arc<dyn StorageBackend>,
        api: Arc<dyn AuthApi>,
        config: StateConfig,
    ) -> Self {
        Self::with_clock(backend, api, Arc::new(SystemClock), config)
    }

    /// Build the stores over `backend` with an explicit time source
    pub fn with_clock(
        backend: Arc<dyn StorageBackend>,
        api: Arc<dyn AuthApi>,
        clock: Arc<dyn Clock>,
        config: StateConfig,
    ) -> Self {
        let bus = EventBus::new();
        let store = PersistentStore::new(Arc::clone(&backend))
            .with_max_write_attempts(config.max_write_attempts);

        let bridge = bus.bridge(backend.as_ref(), config.keys.clone());
        if bridge.is_none() {
            tracing::debug!("Backend cannot watch other contexts, relying on polling");
        }

        let cart = CartStore::new(store.clone(), bus.clone(), &config);
        let wishlist = WishlistStore::new(store.clone(), bus.clone(), &config);
        let recently_viewed = RecentlyViewedStore::new(store.clone(), bus.clone(), &config);
        let shipping = ShippingAddressStore::new(store.clone(), bus.clone(), &config);
        let session = SessionManager::new(api, store, bus.clone(), clock, config);

        let session_sync = {
            let session = session.clone();
            bus.subscribe(Topic::SessionChanged, move |notification| {
                if notification.source != Source::OtherContext {
                    return;
                }
                session.resync();
            })
        };

        Self {
            bus,
            cart,
            wishlist,
            recently_viewed,
            shipping,
            session,
            bridge,
            _session_sync: session_sync,
        }
    }

    /// Event bus shared by every store in this context
    pub fn bus(&self) -> &EventBus {
        &self.bus
    }

    /// Cart store
    pub fn cart(&self) -> &CartStore {
        &self.cart
    }

    /// Wishlist store
    pub fn wishlist(&self) -> &WishlistStore {
        &self.wishlist
    }

    /// Recently viewed products
    pub fn recently_viewed(&self) -> &RecentlyViewedStore {
        &self.recently_viewed
    }

    /// Last used shipping address
    pub fn shipping(&self) -> &ShippingAddressStore {
        &self.shipping
    }

    /// Session manager
    pub fn session(&self) -> &SessionManager {
        &self.session
    }

    /// Whether changes from other contexts arrive as notifications
    pub fn is_bridged(&self) -> bool {
        self.bridge.is_some()
    }

    /// Finish an order: remember the address, copy the contact details onto
    /// the signed-in user and empty the cart. Returns the purchased lines.
    pub fn complete_checkout(&self, address: &ShippingAddress) -> Vec<CartItem> {
        if !self.shipping.save(address) {
            tracing::warn!("Shipping address could not be persisted");
        }
        self.session.update_contact(address);
        let purchased = self.cart.clear();
        tracing::info!(lines = purchased.len(), "Checkout completed");
        purchased
    }
}

impl std::fmt::Debug for Storefront {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Storefront")
            .field("session", &self.session)
            .field("bridged", &self.is_bridged())
            .finish()
    }
}
