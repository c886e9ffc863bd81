//! Session manager
//!
//! Owns the session token and everything derived from it. The token lives in
//! storage under the token key; the decoded claims, user profile and status
//! live here. Admin status comes from the token's `isAdmin` claim only.
//!
//! State machine:
//!
//! ```text
//! Loading ──bootstrap──▶ Unauthenticated
//!                      ▶ Authenticated(User | Admin)
//! any ──login──▶ Authenticated(..)      any ──logout / expiry──▶ Unauthenticated
//! ```

use parking_lot::RwLock;
use serde_json::json;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use crate::auth::{AuthApi, AuthError, AuthErrorKind, RegistrationRequest, UserProfile};
use crate::checkout::ShippingAddress;
use crate::clock::Clock;
use crate::config::StateConfig;
use crate::error::StateError;
use crate::events::{EventBus, Notification, Subscription, Topic};
use crate::observe::{observe, Observer, PollHandle};
use crate::persistent::PersistentStore;
use crate::token::{self, Claims};

/// Role granted by the token
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    User,
    Admin,
}

impl Role {
    fn from_claims(claims: &Claims) -> Self {
        if claims.is_admin {
            Role::Admin
        } else {
            Role::User
        }
    }
}

/// Lifecycle state of the session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionStatus {
    /// Bootstrap has not finished
    Loading,
    Unauthenticated,
    Authenticated(Role),
}

/// Snapshot of the session
#[derive(Debug, Clone, PartialEq)]
pub struct Session {
    /// While `Loading`, the stored token being checked
    pub token: Option<String>,
    pub claims: Option<Claims>,
    pub user: Option<UserProfile>,
    pub status: SessionStatus,
    /// Path to return to after signing in
    pub saved_location: Option<String>,
}

impl Session {
    fn loading() -> Self {
        Self {
            token: None,
            claims: None,
            user: None,
            status: SessionStatus::Loading,
            saved_location: None,
        }
    }

    fn reset(&mut self) {
        self.token = None;
        self.claims = None;
        self.user = None;
        self.status = SessionStatus::Unauthenticated;
    }

    pub fn is_authenticated(&self) -> bool {
        matches!(self.status, SessionStatus::Authenticated(_))
    }

    /// Advisory only: gates rendering, not access to data
    pub fn is_admin(&self) -> bool {
        self.is_authenticated() && self.claims.as_ref().is_some_and(|c| c.is_admin)
    }
}

/// What a route needs before it renders
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Requirement {
    Authenticated,
    Admin,
}

/// Route guard verdict
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Access {
    Granted,
    /// Navigate here instead
    Redirect(String),
}

/// Result of re-reading the token after another context changed it
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncOutcome {
    Unchanged,
    /// Same user, new token (e.g. re-issued with a later expiry)
    Refreshed,
    /// The token was removed or replaced by an unusable one
    SignedOut,
    /// A different valid token was stored; call `bootstrap` to load its user
    NeedsBootstrap,
}

/// Single source of truth for authentication state
///
/// `Clone` is cheap and shares state.
#[derive(Clone)]
pub struct SessionManager {
    api: Arc<dyn AuthApi>,
    store: PersistentStore,
    bus: EventBus,
    clock: Arc<dyn Clock>,
    config: Arc<StateConfig>,
    state: Arc<RwLock<Session>>,
    /// Bumped by every transition that invalidates in-flight bootstraps
    generation: Arc<AtomicU64>,
}

impl SessionManager {
    /// Create a manager in the `Loading` state. Call [`bootstrap`](Self::bootstrap) next.
    pub fn new(
        api: Arc<dyn AuthApi>,
        store: PersistentStore,
        bus: EventBus,
        clock: Arc<dyn Clock>,
        config: StateConfig,
    ) -> Self {
        Self {
            api,
            store,
            bus,
            clock,
            config: Arc::new(config),
            state: Arc::new(RwLock::new(Session::loading())),
            generation: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Restore the session from the stored token.
    ///
    /// Missing, malformed or expired tokens are discarded silently. A valid
    /// token is checked against the account API; if it is rejected or the
    /// call fails, the token is discarded too, unless another context has
    /// replaced it by then. If `login`, `logout` or a resync runs while the
    /// API call is pending, or the stored token changes in any context, the
    /// late result is ignored.
    pub async fn bootstrap(&self) -> SessionStatus {
        let (generation, stored) = {
            let mut state = self.state.write();
            let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
            let stored = self.store.get_raw(&self.config.keys.token);
            // Track the candidate token so resyncs notice when storage moves on
            state.token = stored.clone();
            state.claims = None;
            state.user = None;
            state.status = SessionStatus::Loading;
            (generation, stored)
        };

        let Some(token) = stored else {
            return self.finish_unauthenticated(generation, None);
        };

        let claims = match self.read_claims(&token) {
            Ok(claims) => claims,
            Err(e) => {
                tracing::warn!(error = %e, "Discarding unreadable session token");
                return self.finish_unauthenticated(generation, Some(&token));
            }
        };

        if claims.is_expired_at(self.clock.now(), self.config.expiry_leeway_secs) {
            tracing::info!(subject = %claims.subject_id, "Stored session token has expired");
            return self.finish_unauthenticated(generation, Some(&token));
        }

        let result = self.api.current_user(&token).await;

        match result {
            Ok(user) => {
                let status = {
                    let mut state = self.state.write();
                    if !self.is_current(generation) {
                        tracing::debug!("Discarding stale bootstrap result");
                        return state.status;
                    }
                    let stored = self.store.get_raw(&self.config.keys.token);
                    if stored.as_deref() == Some(token.as_str()) {
                        let role = Role::from_claims(&claims);
                        state.token = Some(token);
                        state.claims = Some(claims);
                        state.user = Some(user);
                        state.status = SessionStatus::Authenticated(role);
                    } else {
                        // A later resync picks up any replacement token
                        tracing::debug!("Stored token changed during bootstrap, discarding result");
                        self.generation.fetch_add(1, Ordering::SeqCst);
                        state.reset();
                    }
                    state.status
                };
                self.publish();
                status
            }
            Err(e) => {
                tracing::warn!(error = %e, "Profile fetch failed, signing out");
                self.finish_unauthenticated(generation, Some(&token))
            }
        }
    }

    /// Sign in. Errors from the account API are returned unchanged.
    pub async fn login(&self, email: &str, password: &str) -> Result<Session, AuthError> {
        let response = self.api.login(email, password).await?;

        let claims = self
            .read_claims(&response.token)
            .map_err(|e| AuthError::new(AuthErrorKind::MalformedToken, e.to_string()))?;
        if claims.is_expired_at(self.clock.now(), self.config.expiry_leeway_secs) {
            return Err(AuthError::new(
                AuthErrorKind::MalformedToken,
                "issued token is already expired",
            ));
        }

        self.store
            .set_raw(&self.config.keys.token, &response.token);

        let session = {
            let mut state = self.state.write();
            self.generation.fetch_add(1, Ordering::SeqCst);
            state.status = SessionStatus::Authenticated(Role::from_claims(&claims));
            state.token = Some(response.token);
            state.claims = Some(claims);
            state.user = Some(response.user);
            state.clone()
        };

        tracing::info!(user = ?session.user.as_ref().map(|u| &u.id), "Signed in");
        self.publish();
        Ok(session)
    }

    /// Sign out locally. No network call.
    pub fn logout(&self) {
        self.store.remove(&self.config.keys.token);
        {
            let mut state = self.state.write();
            self.generation.fetch_add(1, Ordering::SeqCst);
            state.reset();
            state.saved_location = None;
        }
        tracing::info!("Signed out");
        self.publish();
    }

    /// Create an account. The session is left as it is; sign in afterwards.
    pub async fn register(&self, request: &RegistrationRequest) -> Result<(), AuthError> {
        self.api.register(request).await
    }

    /// Current snapshot. An expired token is detected and dropped here.
    pub fn snapshot(&self) -> Session {
        self.check_expiry();
        self.state.read().clone()
    }

    /// Current lifecycle state
    pub fn status(&self) -> SessionStatus {
        self.check_expiry();
        self.state.read().status
    }

    /// Whether a valid session is active
    pub fn is_authenticated(&self) -> bool {
        self.check_expiry();
        self.state.read().is_authenticated()
    }

    /// Admin flag from the token claims; advisory only
    pub fn is_admin(&self) -> bool {
        self.check_expiry();
        self.state.read().is_admin()
    }

    /// Signed-in user profile
    pub fn user(&self) -> Option<UserProfile> {
        self.check_expiry();
        self.state.read().user.clone()
    }

    /// Current session token
    pub fn token(&self) -> Option<String> {
        self.check_expiry();
        self.state.read().token.clone()
    }

    /// Remember where to return after signing in
    pub fn save_location(&self, path: &str) {
        self.state.write().saved_location = Some(path.to_string());
    }

    /// Record `current_path` and return the login URL to navigate to.
    ///
    /// Returns None when already on the login page, leaving any saved
    /// location untouched, so a bounce off a protected route cannot loop.
    pub fn login_with_redirect(&self, current_path: &str) -> Option<String> {
        if self.is_login_path(current_path) {
            return None;
        }
        self.save_location(current_path);
        Some(format!(
            "{}?{}={}",
            self.config.login_path,
            self.config.redirect_param,
            urlencoding::encode(current_path)
        ))
    }

    /// Take the saved location, falling back to the default redirect
    pub fn take_redirect_after_login(&self) -> String {
        let saved = self.state.write().saved_location.take();
        saved
            .filter(|path| is_local_path(path))
            .unwrap_or_else(|| self.config.default_redirect.clone())
    }

    /// Resolve the `redirect` query value of the login URL
    pub fn redirect_from_query(&self, encoded: &str) -> String {
        urlencoding::decode(encoded)
            .ok()
            .map(|path| path.into_owned())
            .filter(|path| is_local_path(path) && !self.is_login_path(path))
            .unwrap_or_else(|| self.config.default_redirect.clone())
    }

    /// Decide whether `path` may render under `requirement`
    pub fn guard(&self, path: &str, requirement: Requirement) -> Access {
        let session = self.snapshot();
        if session.is_authenticated() {
            if requirement == Requirement::Admin && !session.is_admin() {
                return Access::Redirect(self.config.default_redirect.clone());
            }
            return Access::Granted;
        }
        match self.login_with_redirect(path) {
            Some(url) => Access::Redirect(url),
            None => Access::Granted,
        }
    }

    /// Reconcile with the stored token after another context changed it
    pub fn sync_from_storage(&self) -> SyncOutcome {
        let stored = self.store.get_raw(&self.config.keys.token);
        let current = self.state.read().token.clone();
        if stored == current {
            return SyncOutcome::Unchanged;
        }

        let valid = stored.as_deref().and_then(|token| {
            self.read_claims(token)
                .ok()
                .filter(|c| !c.is_expired_at(self.clock.now(), self.config.expiry_leeway_secs))
        });

        match (stored, valid) {
            (Some(token), Some(claims)) => {
                let same_user = {
                    let mut state = self.state.write();
                    self.generation.fetch_add(1, Ordering::SeqCst);
                    let same_user = state.user.is_some()
                        && state
                            .claims
                            .as_ref()
                            .is_some_and(|c| c.subject_id == claims.subject_id);
                    if same_user {
                        state.status = SessionStatus::Authenticated(Role::from_claims(&claims));
                    } else {
                        state.user = None;
                        state.status = SessionStatus::Loading;
                    }
                    state.token = Some(token);
                    state.claims = Some(claims);
                    same_user
                };
                self.publish();
                if same_user {
                    SyncOutcome::Refreshed
                } else {
                    SyncOutcome::NeedsBootstrap
                }
            }
            _ => {
                {
                    let mut state = self.state.write();
                    self.generation.fetch_add(1, Ordering::SeqCst);
                    state.reset();
                }
                tracing::info!("Session ended in another context");
                self.publish();
                SyncOutcome::SignedOut
            }
        }
    }

    /// Copy checkout contact details onto the signed-in user's profile
    pub fn update_contact(&self, address: &ShippingAddress) {
        let updated = {
            let mut state = self.state.write();
            match state.user.as_mut() {
                Some(user) => {
                    user.apply_shipping(address);
                    true
                }
                None => false,
            }
        };
        if updated {
            self.publish();
        }
    }

    /// Reconcile with storage and load the user when a new token appeared.
    ///
    /// Also drops an expired session. The bootstrap runs on the current
    /// Tokio runtime; without one it is skipped and logged.
    pub fn resync(&self) -> SyncOutcome {
        self.check_expiry();
        let outcome = self.sync_from_storage();
        if outcome == SyncOutcome::NeedsBootstrap {
            self.spawn_bootstrap();
        }
        outcome
    }

    /// Subscribe to `session-changed`
    pub fn subscribe<F>(&self, handler: F) -> Subscription
    where
        F: Fn(&Notification) + Send + Sync + 'static,
    {
        self.bus.subscribe(Topic::SessionChanged, handler)
    }

    /// Receive the session snapshot whenever it changes.
    ///
    /// With a poll interval configured, storage is also re-read on every
    /// tick so sign-ins and sign-outs in unbridged contexts are noticed.
    pub fn observe<F>(&self, listener: F) -> Observer
    where
        F: Fn(&Session) + Send + Sync + 'static,
    {
        let session = self.clone();
        let observer = observe(
            &self.bus,
            &[Topic::SessionChanged],
            None,
            move || session.snapshot(),
            listener,
        );

        let session = self.clone();
        let poll = self.config.poll_interval.and_then(|interval| {
            PollHandle::spawn(interval, move || {
                session.resync();
            })
        });
        observer.with_poll(poll)
    }

    fn spawn_bootstrap(&self) {
        match tokio::runtime::Handle::try_current() {
            Ok(runtime) => {
                let session = self.clone();
                runtime.spawn(async move {
                    session.bootstrap().await;
                });
            }
            Err(_) => tracing::warn!("No Tokio runtime, session bootstrap deferred"),
        }
    }

    fn read_claims(&self, token: &str) -> Result<Claims, StateError> {
        match &self.config.token_secret {
            Some(secret) => token::verify(token, secret),
            None => token::decode_claims(token),
        }
    }

    fn is_current(&self, generation: u64) -> bool {
        self.generation.load(Ordering::SeqCst) == generation
    }

    fn is_login_path(&self, path: &str) -> bool {
        let login = self.config.login_path.as_str();
        match path.strip_prefix(login) {
            Some(rest) => rest.is_empty() || rest.starts_with(['?', '/', '#']),
            None => false,
        }
    }

    fn finish_unauthenticated(&self, generation: u64, discard: Option<&str>) -> SessionStatus {
        {
            let mut state = self.state.write();
            if !self.is_current(generation) {
                tracing::debug!("Discarding stale bootstrap result");
                return state.status;
            }
            state.reset();
        }
        if let Some(token) = discard {
            self.discard_stored_token(token);
        }
        self.publish();
        SessionStatus::Unauthenticated
    }

    /// Remove `token` from storage unless another context replaced it
    fn discard_stored_token(&self, token: &str) {
        if !self.store.remove_if_unchanged(&self.config.keys.token, token) {
            tracing::debug!("Stored token was replaced, leaving it in place");
        }
    }

    /// Drop the session if its token expired since it was last checked
    fn check_expiry(&self) {
        let expired = {
            let state = self.state.read();
            state.is_authenticated()
                && state.claims.as_ref().is_some_and(|c| {
                    c.is_expired_at(self.clock.now(), self.config.expiry_leeway_secs)
                })
        };
        if !expired {
            return;
        }

        let token = {
            let mut state = self.state.write();
            // Re-check under the write lock; another caller may have won
            if !state.is_authenticated() {
                return;
            }
            self.generation.fetch_add(1, Ordering::SeqCst);
            let token = state.token.take();
            state.reset();
            token
        };
        if let Some(token) = token {
            self.discard_stored_token(&token);
        }
        tracing::info!("Session token expired");
        self.publish();
    }

    fn publish(&self) {
        let (authenticated, admin) = {
            let state = self.state.read();
            (state.is_authenticated(), state.is_admin())
        };
        self.bus.publish(
            Topic::SessionChanged,
            Some(json!({ "authenticated": authenticated, "admin": admin })),
        );
    }
}

impl std::fmt::Debug for SessionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.read();
        f.debug_struct("SessionManager")
            .field("status", &state.status)
            .field("user", &state.user.as_ref().map(|u| &u.id))
            .field("generation", &self.generation.load(Ordering::SeqCst))
            .finish()
    }
}

/// Relative, same-origin path ("/account", not "//evil.example" or "https://…")
fn is_local_path(path: &str) -> bool {
    path.starts_with('/') && !path.starts_with("//") && !path.starts_with("/\\")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::store::{MemoryBackend, StorageBackend};
    use crate::testing::{token_for, user, MockAuthApi, NOW, SECRET};
    use parking_lot::Mutex;
    use std::time::Duration;

    struct Fixture {
        backend: MemoryBackend,
        api: Arc<MockAuthApi>,
        clock: Arc<ManualClock>,
        session: SessionManager,
    }

    fn fixture_with(config: StateConfig) -> Fixture {
        let backend = MemoryBackend::new();
        let api = MockAuthApi::new();
        let clock = Arc::new(ManualClock::new(NOW));
        let session = SessionManager::new(
            api.clone(),
            PersistentStore::new(Arc::new(backend.clone())),
            EventBus::new(),
            clock.clone(),
            config,
        );
        Fixture {
            backend,
            api,
            clock,
            session,
        }
    }

    /// Manager for another context of the same origin, with its own bus and no bridge
    fn other_tab(f: &Fixture, config: StateConfig) -> SessionManager {
        SessionManager::new(
            f.api.clone(),
            PersistentStore::new(Arc::new(f.backend.attach())),
            EventBus::new(),
            f.clock.clone(),
            config,
        )
    }

    fn fixture() -> Fixture {
        fixture_with(StateConfig::default().with_poll_interval(None))
    }

    fn stored_token(f: &Fixture) -> Option<String> {
        f.backend.read("token").unwrap().value
    }

    #[tokio::test]
    async fn test_starts_loading() {
        let f = fixture();
        assert_eq!(f.session.status(), SessionStatus::Loading);
        assert!(!f.session.is_authenticated());
    }

    #[tokio::test]
    async fn test_bootstrap_without_token() {
        let f = fixture();
        assert_eq!(f.session.bootstrap().await, SessionStatus::Unauthenticated);
        assert_eq!(f.api.current_user_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_bootstrap_with_valid_token() {
        let f = fixture();
        let token = token_for("u1", NOW + 3600, false);
        f.backend.write("token", &token, None).unwrap();
        f.api.serve_user(Ok(user("u1")));

        assert_eq!(
            f.session.bootstrap().await,
            SessionStatus::Authenticated(Role::User)
        );
        let snapshot = f.session.snapshot();
        assert_eq!(snapshot.token.as_deref(), Some(token.as_str()));
        assert_eq!(snapshot.user, Some(user("u1")));
        assert!(!snapshot.is_admin());
    }

    #[tokio::test]
    async fn test_bootstrap_discards_expired_token() {
        let f = fixture();
        f.backend
            .write("token", &token_for("u1", NOW - 10, false), None)
            .unwrap();
        f.api.serve_user(Ok(user("u1")));

        assert_eq!(f.session.bootstrap().await, SessionStatus::Unauthenticated);
        assert!(!f.session.is_authenticated());
        assert_eq!(stored_token(&f), None);
        assert_eq!(f.api.current_user_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_bootstrap_discards_malformed_token() {
        let f = fixture();
        f.backend.write("token", "garbage", None).unwrap();
        assert_eq!(f.session.bootstrap().await, SessionStatus::Unauthenticated);
        assert_eq!(stored_token(&f), None);
    }

    #[tokio::test]
    async fn test_bootstrap_discards_token_rejected_by_api() {
        let f = fixture();
        f.backend
            .write("token", &token_for("u1", NOW + 3600, true), None)
            .unwrap();
        f.api.serve_user(Err(AuthError::new(
            AuthErrorKind::Unauthorized,
            "jwt revoked",
        )));

        assert_eq!(f.session.bootstrap().await, SessionStatus::Unauthenticated);
        assert_eq!(stored_token(&f), None);
        assert!(!f.session.is_admin());
    }

    #[tokio::test]
    async fn test_bootstrap_verifies_signature_when_secret_configured() {
        let f = fixture_with(
            StateConfig::default()
                .with_poll_interval(None)
                .with_token_secret("another-secret"),
        );
        f.backend
            .write("token", &token_for("u1", NOW + 3600, true), None)
            .unwrap();
        f.api.serve_user(Ok(user("u1")));

        assert_eq!(f.session.bootstrap().await, SessionStatus::Unauthenticated);
        assert_eq!(stored_token(&f), None);

        let f = fixture_with(
            StateConfig::default()
                .with_poll_interval(None)
                .with_token_secret(SECRET),
        );
        f.backend
            .write("token", &token_for("u1", NOW + 3600, true), None)
            .unwrap();
        f.api.serve_user(Ok(user("u1")));
        assert_eq!(
            f.session.bootstrap().await,
            SessionStatus::Authenticated(Role::Admin)
        );
    }

    #[tokio::test]
    async fn test_login_as_admin() {
        let f = fixture();
        f.session.bootstrap().await;
        let token = token_for("u1", NOW + 3600, true);
        f.api.succeed_login(token.clone(), user("u1"));

        let session = f.session.login("u1@example.com", "pw").await.unwrap();
        assert_eq!(session.status, SessionStatus::Authenticated(Role::Admin));
        assert!(session.is_authenticated());
        assert!(session.is_admin());
        assert!(f.session.is_admin());
        assert_eq!(stored_token(&f), Some(token));
    }

    #[tokio::test]
    async fn test_admin_flag_ignores_profile_fields() {
        let f = fixture();
        f.api
            .succeed_login(token_for("u1", NOW + 3600, false), user("u1"));
        f.session.login("u1@example.com", "pw").await.unwrap();
        assert!(f.session.is_authenticated());
        assert!(!f.session.is_admin());
    }

    #[tokio::test]
    async fn test_login_error_is_passed_through() {
        let f = fixture();
        f.session.bootstrap().await;
        let error = AuthError::new(AuthErrorKind::InvalidCredentials, "Invalid email or password");
        f.api.fail_login(error.clone());

        assert_eq!(f.session.login("a@b.c", "nope").await.unwrap_err(), error);
        assert_eq!(f.session.status(), SessionStatus::Unauthenticated);
        assert_eq!(stored_token(&f), None);
    }

    #[tokio::test]
    async fn test_login_rejects_unreadable_token() {
        let f = fixture();
        f.api.succeed_login("not-a-token".to_string(), user("u1"));
        let err = f.session.login("a@b.c", "pw").await.unwrap_err();
        assert_eq!(err.kind, AuthErrorKind::MalformedToken);
        assert_eq!(stored_token(&f), None);
    }

    #[tokio::test]
    async fn test_logout() {
        let f = fixture();
        f.api
            .succeed_login(token_for("u1", NOW + 3600, true), user("u1"));
        f.session.login("a@b.c", "pw").await.unwrap();
        f.session.save_location("/orders");

        f.session.logout();
        let snapshot = f.session.snapshot();
        assert_eq!(snapshot.status, SessionStatus::Unauthenticated);
        assert_eq!(snapshot.user, None);
        assert_eq!(snapshot.saved_location, None);
        assert!(!snapshot.is_admin());
        assert_eq!(stored_token(&f), None);
    }

    #[tokio::test]
    async fn test_register_leaves_session_alone() {
        let f = fixture();
        f.session.bootstrap().await;
        let request = RegistrationRequest::new("Ada", "Lovelace", "ada@example.com", "pw");
        f.session.register(&request).await.unwrap();

        assert_eq!(f.api.registrations.lock().len(), 1);
        assert_eq!(f.session.status(), SessionStatus::Unauthenticated);

        *f.api.register_result.lock() = Some(Err(AuthError::new(
            AuthErrorKind::EmailTaken,
            "Email already registered",
        )));
        let err = f.session.register(&request).await.unwrap_err();
        assert_eq!(err.kind, AuthErrorKind::EmailTaken);
    }

    #[tokio::test]
    async fn test_expiry_detected_after_login() {
        let f = fixture();
        f.api
            .succeed_login(token_for("u1", NOW + 60, false), user("u1"));
        f.session.login("a@b.c", "pw").await.unwrap();

        let changes = Arc::new(Mutex::new(0));
        let sink = Arc::clone(&changes);
        let _sub = f.session.subscribe(move |_| *sink.lock() += 1);

        f.clock.advance(59);
        assert!(f.session.is_authenticated());
        f.clock.advance(1);
        assert!(!f.session.is_authenticated());
        assert_eq!(stored_token(&f), None);
        assert_eq!(*changes.lock(), 1);
    }

    #[tokio::test]
    async fn test_stale_bootstrap_does_not_resurrect_session() {
        let f = fixture();
        f.backend
            .write("token", &token_for("u1", NOW + 3600, false), None)
            .unwrap();
        f.api.serve_user(Ok(user("u1")));
        let gate = f.api.hold();

        let session = f.session.clone();
        let pending = tokio::spawn(async move { session.bootstrap().await });
        // Let the bootstrap reach the profile fetch
        while f.api.current_user_calls.load(Ordering::SeqCst) == 0 {
            tokio::task::yield_now().await;
        }

        f.session.logout();
        gate.notify_one();
        let status = pending.await.unwrap();

        assert_eq!(status, SessionStatus::Unauthenticated);
        assert!(!f.session.is_authenticated());
        assert_eq!(f.session.user(), None);
    }

    #[tokio::test]
    async fn test_redirect_guard() {
        let f = fixture();
        f.session.bootstrap().await;

        let url = f.session.login_with_redirect("/account/orders?page=2").unwrap();
        assert_eq!(url, "/login?redirect=%2Faccount%2Forders%3Fpage%3D2");
        assert_eq!(
            f.session.snapshot().saved_location.as_deref(),
            Some("/account/orders?page=2")
        );

        // Already on the login page: no new redirect, saved path untouched
        assert_eq!(f.session.login_with_redirect("/login"), None);
        assert_eq!(f.session.login_with_redirect("/login?redirect=%2Fx"), None);
        assert_eq!(
            f.session.take_redirect_after_login(),
            "/account/orders?page=2"
        );
        assert_eq!(f.session.take_redirect_after_login(), "/");
    }

    #[tokio::test]
    async fn test_login_prefixed_paths_are_not_login_page() {
        let f = fixture();
        assert!(f.session.login_with_redirect("/loginhelp").is_some());
    }

    #[tokio::test]
    async fn test_redirect_rejects_foreign_targets() {
        let f = fixture();
        f.session.save_location("//evil.example/phish");
        assert_eq!(f.session.take_redirect_after_login(), "/");

        assert_eq!(f.session.redirect_from_query("%2Fcart"), "/cart");
        assert_eq!(f.session.redirect_from_query("https%3A%2F%2Fevil"), "/");
        assert_eq!(f.session.redirect_from_query("%2Flogin"), "/");
    }

    #[tokio::test]
    async fn test_route_guard() {
        let f = fixture();
        f.session.bootstrap().await;

        assert_eq!(
            f.session.guard("/admin", Requirement::Admin),
            Access::Redirect("/login?redirect=%2Fadmin".to_string())
        );
        assert_eq!(f.session.guard("/login", Requirement::Authenticated), Access::Granted);

        f.api
            .succeed_login(token_for("u1", NOW + 3600, false), user("u1"));
        f.session.login("a@b.c", "pw").await.unwrap();
        assert_eq!(f.session.guard("/checkout", Requirement::Authenticated), Access::Granted);
        assert_eq!(
            f.session.guard("/admin", Requirement::Admin),
            Access::Redirect("/".to_string())
        );

        f.api
            .succeed_login(token_for("u2", NOW + 3600, true), user("u2"));
        f.session.login("b@b.c", "pw").await.unwrap();
        assert_eq!(f.session.guard("/admin", Requirement::Admin), Access::Granted);
    }

    #[tokio::test]
    async fn test_sync_from_storage() {
        let f = fixture();
        f.api
            .succeed_login(token_for("u1", NOW + 60, false), user("u1"));
        f.session.login("a@b.c", "pw").await.unwrap();
        assert_eq!(f.session.sync_from_storage(), SyncOutcome::Unchanged);

        // Same user, re-issued token
        let other_tab = f.backend.attach();
        let renewed = token_for("u1", NOW + 7200, false);
        other_tab.write("token", &renewed, None).unwrap();
        assert_eq!(f.session.sync_from_storage(), SyncOutcome::Refreshed);
        assert_eq!(f.session.token(), Some(renewed));
        assert_eq!(f.session.user(), Some(user("u1")));

        // Different user
        other_tab
            .write("token", &token_for("u2", NOW + 7200, true), None)
            .unwrap();
        assert_eq!(f.session.sync_from_storage(), SyncOutcome::NeedsBootstrap);
        assert_eq!(f.session.status(), SessionStatus::Loading);

        // Signed out elsewhere
        other_tab.remove("token").unwrap();
        assert_eq!(f.session.sync_from_storage(), SyncOutcome::SignedOut);
        assert_eq!(f.session.status(), SessionStatus::Unauthenticated);
    }

    #[tokio::test]
    async fn test_update_contact() {
        let f = fixture();
        f.api
            .succeed_login(token_for("u1", NOW + 3600, false), user("u1"));
        f.session.login("a@b.c", "pw").await.unwrap();

        f.session.update_contact(&ShippingAddress {
            city: "London".to_string(),
            ..Default::default()
        });
        assert_eq!(
            f.session.user().and_then(|u| u.city),
            Some("London".to_string())
        );
    }

    #[tokio::test]
    async fn test_observe_session_changes() {
        let f = fixture();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let _observer = f.session.observe(move |s: &Session| sink.lock().push(s.status));

        f.session.bootstrap().await;
        f.api
            .succeed_login(token_for("u1", NOW + 3600, true), user("u1"));
        f.session.login("a@b.c", "pw").await.unwrap();
        f.session.logout();

        assert_eq!(
            *seen.lock(),
            vec![
                SessionStatus::Unauthenticated,
                SessionStatus::Authenticated(Role::Admin),
                SessionStatus::Unauthenticated,
            ]
        );
    }

    #[tokio::test]
    async fn test_bootstrap_dropped_when_token_removed_meanwhile() {
        let f = fixture();
        let tab_b = other_tab(&f, StateConfig::default().with_poll_interval(None));
        f.api
            .succeed_login(token_for("u1", NOW + 3600, false), user("u1"));
        f.session.login("a@b.c", "pw").await.unwrap();

        f.api.serve_user(Ok(user("u1")));
        let gate = f.api.hold();
        let session = tab_b.clone();
        let pending = tokio::spawn(async move { session.bootstrap().await });
        while f.api.current_user_calls.load(Ordering::SeqCst) == 0 {
            tokio::task::yield_now().await;
        }

        // No bridge: tab B only learns of the logout from storage
        f.session.logout();
        gate.notify_one();

        assert_eq!(pending.await.unwrap(), SessionStatus::Unauthenticated);
        assert!(!tab_b.is_authenticated());
        assert_eq!(tab_b.token(), None);
        assert_eq!(stored_token(&f), None);
    }

    #[tokio::test]
    async fn test_expiry_keeps_token_stored_by_other_tab() {
        let f = fixture();
        let tab_b = other_tab(&f, StateConfig::default().with_poll_interval(None));
        f.api
            .succeed_login(token_for("u1", NOW + 60, false), user("u1"));
        f.session.login("a@b.c", "pw").await.unwrap();
        tab_b.login("a@b.c", "pw").await.unwrap();

        f.clock.advance(61);
        let fresh = token_for("u1", NOW + 7200, false);
        f.api.succeed_login(fresh.clone(), user("u1"));
        f.session.login("a@b.c", "pw").await.unwrap();

        assert!(!tab_b.is_authenticated());
        assert_eq!(stored_token(&f), Some(fresh));
        assert!(f.session.is_authenticated());
    }

    #[tokio::test(start_paused = true)]
    async fn test_polling_follows_unbridged_sign_in_and_out() {
        let f = fixture();
        let tab_b = other_tab(
            &f,
            StateConfig::default().with_poll_interval(Some(Duration::from_millis(1000))),
        );
        tab_b.bootstrap().await;

        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let observer = tab_b.observe(move |s: &Session| sink.lock().push(s.status));
        assert!(observer.is_polling());

        f.api
            .succeed_login(token_for("u1", NOW + 3600, true), user("u1"));
        f.api.serve_user(Ok(user("u1")));
        f.session.login("a@b.c", "pw").await.unwrap();
        assert!(!tab_b.is_authenticated());

        tokio::time::sleep(Duration::from_millis(1100)).await;
        assert!(tab_b.is_admin());
        assert_eq!(tab_b.user(), Some(user("u1")));

        f.session.logout();
        tokio::time::sleep(Duration::from_millis(1000)).await;
        assert_eq!(tab_b.status(), SessionStatus::Unauthenticated);

        let seen = seen.lock();
        assert!(seen.contains(&SessionStatus::Authenticated(Role::Admin)));
        assert_eq!(seen.last(), Some(&SessionStatus::Unauthenticated));
    }
}
