//! Two browsing contexts sharing one in-memory origin

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use storefront_state::token::{self, Claims};
use storefront_state::{
    AuthApi, AuthError, AuthErrorKind, CartItem, LoginResponse, MemoryBackend, Product,
    RegistrationRequest, StateConfig, Storefront, UserProfile,
};

const SECRET: &str = "demo-secret";

/// Account API that accepts a single hard-coded user
struct DemoAccounts;

impl DemoAccounts {
    fn profile() -> UserProfile {
        UserProfile {
            id: "u1".to_string(),
            first_name: "Ada".to_string(),
            last_name: "Lovelace".to_string(),
            email: "ada@example.com".to_string(),
            ..Default::default()
        }
    }
}

#[async_trait]
impl AuthApi for DemoAccounts {
    async fn login(&self, email: &str, password: &str) -> Result<LoginResponse, AuthError> {
        if email != "ada@example.com" || password != "analytical" {
            return Err(AuthError::new(
                AuthErrorKind::InvalidCredentials,
                "Invalid email or password",
            ));
        }
        let expires_at = chrono::Utc::now().timestamp() + 3600;
        let token = token::sign(&Claims::new("u1", expires_at, false), SECRET)
            .map_err(|e| AuthError::new(AuthErrorKind::Other, e.to_string()))?;
        Ok(LoginResponse {
            token,
            user: Self::profile(),
        })
    }

    async fn register(&self, _request: &RegistrationRequest) -> Result<(), AuthError> {
        Err(AuthError::new(AuthErrorKind::EmailTaken, "Email already registered"))
    }

    async fn current_user(&self, _token: &str) -> Result<UserProfile, AuthError> {
        Ok(Self::profile())
    }
}

#[tokio::main]
async fn main() {
    // Set up logging
    tracing_subscriber::fmt::init();

    let origin = MemoryBackend::new();
    let api: Arc<dyn AuthApi> = Arc::new(DemoAccounts);
    let config = StateConfig::new()
        .with_token_secret(SECRET)
        .with_poll_interval(Some(Duration::from_millis(500)));

    let first = Storefront::new(Arc::new(origin.attach()), Arc::clone(&api), config.clone());
    let second = Storefront::new(Arc::new(origin.attach()), Arc::clone(&api), config);

    first.session().bootstrap().await;
    second.session().bootstrap().await;

    let _badge = second.cart().observe(|items: &Vec<CartItem>| {
        let count: u32 = items.iter().map(|item| item.quantity).sum();
        println!("[second tab] cart badge: {}", count);
    });
    let _session = second
        .session()
        .subscribe(|n| println!("[second tab] session changed: {:?}", n.detail));

    let lamp = Product::new("lamp", 49.0).with_name("Desk lamp");
    let _ = first.cart().add_item(&lamp, 2);
    let _ = first.cart().add_item(&Product::new("bulb", 4.5), 1);

    match first.session().login("ada@example.com", "analytical").await {
        Ok(session) => println!("[first tab] signed in: {:?}", session.status),
        Err(e) => println!("[first tab] login failed: {}", e),
    }

    // Let the second tab load the profile for the new token
    tokio::time::sleep(Duration::from_millis(50)).await;
    println!(
        "[second tab] signed in as {:?}",
        second.session().user().map(|u| u.display_name())
    );

    first.session().logout();
    println!("[second tab] status after logout: {:?}", second.session().status());
}
