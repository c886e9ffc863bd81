//! Test doubles shared by the unit tests

use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::Notify;

use crate::auth::{AuthApi, AuthError, AuthErrorKind, LoginResponse, RegistrationRequest, UserProfile};
use crate::token::{self, Claims};

pub(crate) const NOW: i64 = 1_700_000_000;
pub(crate) const SECRET: &str = "test-secret";

/// Route `tracing` output through the test harness
pub(crate) fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_max_level(tracing::Level::DEBUG)
        .with_test_writer()
        .try_init();
}

pub(crate) fn token_for(subject: &str, expires_at: i64, is_admin: bool) -> String {
    token::sign(&Claims::new(subject, expires_at, is_admin), SECRET).unwrap()
}

pub(crate) fn user(id: &str) -> UserProfile {
    UserProfile {
        id: id.to_string(),
        first_name: "Ada".to_string(),
        last_name: "Lovelace".to_string(),
        email: format!("{}@example.com", id),
        ..Default::default()
    }
}

/// Scripted account API
#[derive(Default)]
pub(crate) struct MockAuthApi {
    pub login_result: Mutex<Option<Result<LoginResponse, AuthError>>>,
    pub register_result: Mutex<Option<Result<(), AuthError>>>,
    pub current_user_result: Mutex<Option<Result<UserProfile, AuthError>>>,
    pub registrations: Mutex<Vec<RegistrationRequest>>,
    pub current_user_calls: AtomicUsize,
    /// When set, `current_user` waits for a notification before answering
    pub hold_current_user: Mutex<Option<Arc<Notify>>>,
}

impl MockAuthApi {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn succeed_login(&self, token: String, user: UserProfile) {
        *self.login_result.lock() = Some(Ok(LoginResponse { token, user }));
    }

    pub fn fail_login(&self, error: AuthError) {
        *self.login_result.lock() = Some(Err(error));
    }

    pub fn serve_user(&self, result: Result<UserProfile, AuthError>) {
        *self.current_user_result.lock() = Some(result);
    }

    pub fn hold(&self) -> Arc<Notify> {
        let gate = Arc::new(Notify::new());
        *self.hold_current_user.lock() = Some(Arc::clone(&gate));
        gate
    }
}

#[async_trait]
impl AuthApi for MockAuthApi {
    async fn login(&self, _email: &str, _password: &str) -> Result<LoginResponse, AuthError> {
        self.login_result
            .lock()
            .clone()
            .unwrap_or_else(|| Err(AuthError::new(AuthErrorKind::Network, "no login scripted")))
    }

    async fn register(&self, request: &RegistrationRequest) -> Result<(), AuthError> {
        self.registrations.lock().push(request.clone());
        self.register_result.lock().clone().unwrap_or(Ok(()))
    }

    async fn current_user(&self, _token: &str) -> Result<UserProfile, AuthError> {
        self.current_user_calls.fetch_add(1, Ordering::SeqCst);
        let gate = self.hold_current_user.lock().clone();
        if let Some(gate) = gate {
            gate.notified().await;
        }
        self.current_user_result.lock().clone().unwrap_or_else(|| {
            Err(AuthError::new(AuthErrorKind::Unauthorized, "no user scripted"))
        })
    }
}
