//! State configuration

use std::time::Duration;

/// Storage keys used for each persisted value.
///
/// The defaults are a stable contract shared with every other client
/// pointed at the same storage origin; change them only for isolation
/// (tests, multi-tenant hosts).
#[derive(Clone, Debug, PartialEq)]
pub struct StorageKeys {
    /// Raw session token string (default: "token")
    pub token: String,
    /// Cart collection (default: "shopping-cart")
    pub cart: String,
    /// Wishlist collection (default: "wishlist")
    pub wishlist: String,
    /// Last submitted checkout address (default: "shipping-address")
    pub shipping_address: String,
    /// Recently viewed product snapshots (default: "recently-viewed")
    pub recently_viewed: String,
}

impl Default for StorageKeys {
    fn default() -> Self {
        Self {
            token: "token".to_string(),
            cart: "shopping-cart".to_string(),
            wishlist: "wishlist".to_string(),
            shipping_address: "shipping-address".to_string(),
            recently_viewed: "recently-viewed".to_string(),
        }
    }
}

impl StorageKeys {
    /// Prefix every key, e.g. `"shop1:"` turns `"token"` into `"shop1:token"`
    pub fn prefixed(prefix: &str) -> Self {
        let defaults = Self::default();
        Self {
            token: format!("{}{}", prefix, defaults.token),
            cart: format!("{}{}", prefix, defaults.cart),
            wishlist: format!("{}{}", prefix, defaults.wishlist),
            shipping_address: format!("{}{}", prefix, defaults.shipping_address),
            recently_viewed: format!("{}{}", prefix, defaults.recently_viewed),
        }
    }
}

/// Configuration for the session manager and persisted stores
#[derive(Clone, Debug)]
pub struct StateConfig {
    /// Storage keys
    pub keys: StorageKeys,

    /// Interval for the re-read fallback run by observers (default: 1000 ms).
    /// `None` disables polling; observers then rely on notifications only.
    pub poll_interval: Option<Duration>,

    /// Maximum number of recently viewed snapshots kept (default: 6)
    pub recently_viewed_limit: usize,

    /// Path of the login page (default: "/login")
    pub login_path: String,

    /// Query parameter carrying the return path on the login URL (default: "redirect")
    pub redirect_param: String,

    /// Where to go after login when no location was saved (default: "/")
    pub default_redirect: String,

    /// Compare-and-swap attempts before a write is given up (default: 8)
    pub max_write_attempts: u32,

    /// Shared secret for verifying token signatures (default: None).
    /// When None, claims are decoded without verification; they are
    /// used for UI gating only.
    pub token_secret: Option<String>,

    /// Seconds subtracted from the token expiry when judging validity (default: 0)
    pub expiry_leeway_secs: i64,
}

impl Default for StateConfig {
    fn default() -> Self {
        Self {
            keys: StorageKeys::default(),
            poll_interval: Some(Duration::from_millis(1000)),
            recently_viewed_limit: 6,
            login_path: "/login".to_string(),
            redirect_param: "redirect".to_string(),
            default_redirect: "/".to_string(),
            max_write_attempts: 8,
            token_secret: None,
            expiry_leeway_secs: 0,
        }
    }
}

impl StateConfig {
    /// Create a configuration with default settings
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the storage keys
    pub fn with_keys(mut self, keys: StorageKeys) -> Self {
        self.keys = keys;
        self
    }

    /// Set the polling fallback interval. Pass None to disable polling.
    pub fn with_poll_interval(mut self, interval: Option<Duration>) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Set the recently viewed limit (default: 6)
    pub fn with_recently_viewed_limit(mut self, limit: usize) -> Self {
        self.recently_viewed_limit = limit;
        self
    }

    /// Set the login path (default: "/login")
    pub fn with_login_path<S: Into<String>>(mut self, path: S) -> Self {
        self.login_path = path.into();
        self
    }

    /// Set the redirect query parameter (default: "redirect")
    pub fn with_redirect_param<S: Into<String>>(mut self, param: S) -> Self {
        self.redirect_param = param.into();
        self
    }

    /// Set the fallback redirect after login (default: "/")
    pub fn with_default_redirect<S: Into<String>>(mut self, path: S) -> Self {
        self.default_redirect = path.into();
        self
    }

    /// Set the compare-and-swap attempt limit (minimum 1)
    pub fn with_max_write_attempts(mut self, attempts: u32) -> Self {
        self.max_write_attempts = attempts.max(1);
        self
    }

    /// Verify token signatures with the given HMAC-SHA256 secret
    pub fn with_token_secret<S: Into<String>>(mut self, secret: S) -> Self {
        self.token_secret = Some(secret.into());
        self
    }

    /// Treat tokens as expired this many seconds early
    pub fn with_expiry_leeway(mut self, secs: i64) -> Self {
        self.expiry_leeway_secs = secs;
        self
    }
}
