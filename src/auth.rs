//! Remote authentication collaborator
//!
//! The session manager talks to the account API only through [`AuthApi`].
//! Transport, retries and timeouts belong to the implementation.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::checkout::ShippingAddress;

/// Signed-in user as returned by the account API
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserProfile {
    #[serde(alias = "_id")]
    pub id: String,
    #[serde(default)]
    pub first_name: String,
    #[serde(default)]
    pub last_name: String,
    pub email: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phone: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub address: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub city: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub postal_code: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub country: Option<String>,
}

impl UserProfile {
    /// "First Last", trimmed
    pub fn display_name(&self) -> String {
        format!("{} {}", self.first_name, self.last_name)
            .trim()
            .to_string()
    }

    /// Copy contact fields submitted at checkout
    pub fn apply_shipping(&mut self, address: &ShippingAddress) {
        if address.phone.is_some() {
            self.phone = address.phone.clone();
        }
        self.address = Some(address.address.clone());
        self.city = Some(address.city.clone());
        self.postal_code = Some(address.postal_code.clone());
        self.country = Some(address.country.clone());
    }
}

/// Successful login payload
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoginResponse {
    pub token: String,
    pub user: UserProfile,
}

/// New account details
#[derive(Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegistrationRequest {
    pub first_name: String,
    pub last_name: String,
    pub email: String,
    pub password: String,
}

impl RegistrationRequest {
    pub fn new(
        first_name: impl Into<String>,
        last_name: impl Into<String>,
        email: impl Into<String>,
        password: impl Into<String>,
    ) -> Self {
        Self {
            first_name: first_name.into(),
            last_name: last_name.into(),
            email: email.into(),
            password: password.into(),
        }
    }
}

impl fmt::Debug for RegistrationRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RegistrationRequest")
            .field("first_name", &self.first_name)
            .field("last_name", &self.last_name)
            .field("email", &self.email)
            .field("password", &"[redacted]")
            .finish()
    }
}

/// Category of an authentication failure
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthErrorKind {
    /// Wrong email or password
    InvalidCredentials,
    /// Registration with an email that already has an account
    EmailTaken,
    /// Token rejected by the API
    Unauthorized,
    /// Transport failure
    Network,
    /// The API returned a token whose claims cannot be read
    MalformedToken,
    Other,
}

/// Error reported by the account API, passed to callers unchanged
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthError {
    pub kind: AuthErrorKind,
    /// Server-provided message, suitable for display
    pub message: String,
}

impl AuthError {
    pub fn new<S: Into<String>>(kind: AuthErrorKind, message: S) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }
}

impl fmt::Display for AuthError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}: {}", self.kind, self.message)
    }
}

impl std::error::Error for AuthError {}

/// Account API consumed by the session manager
#[async_trait]
pub trait AuthApi: Send + Sync + 'static {
    /// Exchange credentials for a session token and profile
    async fn login(&self, email: &str, password: &str) -> Result<LoginResponse, AuthError>;

    /// Create an account. Does not sign in.
    async fn register(&self, request: &RegistrationRequest) -> Result<(), AuthError>;

    /// Fetch the profile belonging to `token`
    async fn current_user(&self, token: &str) -> Result<UserProfile, AuthError>;
}
