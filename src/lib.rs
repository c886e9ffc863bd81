//! # storefront-state
//!
//! Client-side session and persistent state for a storefront.
//!
//! Every browsing context (tab, window) holds a cart, a wishlist, a list of
//! recently viewed products, the last shipping address and the signed-in
//! session. The state is kept in a key-value storage backend shared by all
//! contexts of one origin, and every change is announced on an in-process
//! event bus so views can re-render.
//!
//! ## Features
//!
//! - **Tolerant persistence**: corrupted or missing values read as defaults, failed writes never panic
//! - **Cross-context sync**: writes from other contexts are mirrored onto the bus; concurrent
//!   read-modify-write cycles are retried against revision numbers so no update is lost
//! - **Polling fallback**: observers can also re-read on an interval for backends that cannot watch
//! - **Session lifecycle**: bootstrap, login, logout, expiry, admin gating and login redirects
//! - **Pluggable storage backends**: in-memory, Redis, or custom backends
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use storefront_state::{MemoryBackend, Product, StateConfig, Storefront};
//!
//! #[tokio::main]
//! async fn main() {
//!     let backend = MemoryBackend::new();
//!     let shop = Storefront::new(Arc::new(backend), Arc::new(MyAccountApi::new()), StateConfig::new());
//!
//!     shop.session().bootstrap().await;
//!
//!     let _badge = shop.cart().observe(|items| {
//!         println!("{} items in cart", items.iter().map(|i| i.quantity).sum::<u32>());
//!     });
//!
//!     shop.cart().add_item(&Product::new("p1", 10.0), 1).unwrap();
//! }
//! ```

pub mod app;
pub mod auth;
pub mod cart;
pub mod checkout;
pub mod clock;
pub mod config;
pub mod error;
pub mod events;
pub mod observe;
pub mod persistent;
pub mod product;
pub mod recently_viewed;
pub mod session;
pub mod store;
pub mod token;
pub mod wishlist;

#[cfg(test)]
mod testing;

pub use app::Storefront;
pub use auth::{AuthApi, AuthError, AuthErrorKind, LoginResponse, RegistrationRequest, UserProfile};
pub use cart::CartStore;
pub use checkout::{ShippingAddress, ShippingAddressStore};
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{StateConfig, StorageKeys};
pub use error::StateError;
pub use events::{EventBus, Notification, Source, Subscription, Topic};
pub use observe::{Observer, PollHandle};
pub use persistent::{Mutation, PersistentStore};
pub use product::{CartItem, Product, ProductSnapshot, WishlistItem};
pub use recently_viewed::RecentlyViewedStore;
pub use session::{Access, Requirement, Role, Session, SessionManager, SessionStatus, SyncOutcome};
pub use store::{MemoryBackend, StorageBackend, StorageChange, Versioned, WatchHandle};
pub use token::Claims;
pub use wishlist::{ToggleOutcome, WishlistStore};

#[cfg(feature = "redis-store")]
pub use store::RedisBackend;
