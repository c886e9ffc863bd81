//! Session token codec
//!
//! Tokens have the compact form `header.payload.signature`, each part
//! base64url-encoded without padding. The payload is a JSON object; only
//! `exp`, `isAdmin` and `sub` are read here.
//!
//! Decoding does not check the signature. Claims read that way are good for
//! UI decisions only; the API must still authorize every request. When a
//! shared secret is available, [`verify`] checks an HMAC-SHA256 signature.

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::Sha256;

use crate::error::StateError;

type HmacSha256 = Hmac<Sha256>;

const HEADER: &str = r#"{"alg":"HS256","typ":"JWT"}"#;

/// Claims read from a session token
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "RawClaims")]
pub struct Claims {
    /// Expiry, seconds since the Unix epoch
    #[serde(rename = "exp")]
    pub expires_at: i64,

    /// Role flag used for admin gating
    #[serde(rename = "isAdmin")]
    pub is_admin: bool,

    /// Subject (user id)
    #[serde(rename = "sub")]
    pub subject_id: String,
}

/// Wire shape; issuers put the subject in `sub` or `id`, as string or number
#[derive(Deserialize)]
struct RawClaims {
    exp: i64,
    #[serde(rename = "isAdmin", default)]
    is_admin: bool,
    #[serde(default)]
    sub: Option<Value>,
    #[serde(default)]
    id: Option<Value>,
}

impl From<RawClaims> for Claims {
    fn from(raw: RawClaims) -> Self {
        let subject_id = match raw.sub.or(raw.id) {
            Some(Value::String(s)) => s,
            Some(Value::Null) | None => String::new(),
            Some(other) => other.to_string(),
        };
        Self {
            expires_at: raw.exp,
            is_admin: raw.is_admin,
            subject_id,
        }
    }
}

impl Claims {
    pub fn new<S: Into<String>>(subject_id: S, expires_at: i64, is_admin: bool) -> Self {
        Self {
            expires_at,
            is_admin,
            subject_id: subject_id.into(),
        }
    }

    /// Whether the token is expired at `now`, treating it as expiring
    /// `leeway_secs` early
    pub fn is_expired_at(&self, now: i64, leeway_secs: i64) -> bool {
        self.expires_at.saturating_sub(leeway_secs) <= now
    }
}

/// Split a token into its three parts
fn split(token: &str) -> Result<(&str, &str, &str), StateError> {
    let mut parts = token.trim().split('.');
    match (parts.next(), parts.next(), parts.next(), parts.next()) {
        (Some(header), Some(payload), Some(signature), None)
            if !header.is_empty() && !payload.is_empty() =>
        {
            Ok((header, payload, signature))
        }
        _ => Err(StateError::InvalidToken(
            "expected header.payload.signature".to_string(),
        )),
    }
}

/// Decode claims without checking the signature
pub fn decode_claims(token: &str) -> Result<Claims, StateError> {
    let (_, payload, _) = split(token)?;
    let bytes = URL_SAFE_NO_PAD
        .decode(payload.trim_end_matches('='))
        .map_err(|e| StateError::InvalidToken(format!("payload is not base64url: {}", e)))?;
    serde_json::from_slice(&bytes)
        .map_err(|e| StateError::InvalidToken(format!("unreadable claims: {}", e)))
}

/// Verify the HMAC-SHA256 signature, then decode the claims
pub fn verify(token: &str, secret: &str) -> Result<Claims, StateError> {
    let (header, payload, signature) = split(token)?;
    let signing_input = format!("{}.{}", header, payload);
    let expected = create_signature(&signing_input, secret);

    if !constant_time_compare(&expected, signature.trim_end_matches('=')) {
        return Err(StateError::InvalidToken("signature mismatch".to_string()));
    }
    decode_claims(token)
}

/// Mint a token carrying `claims`, signed with `secret`
pub fn sign(claims: &Claims, secret: &str) -> Result<String, StateError> {
    let header = URL_SAFE_NO_PAD.encode(HEADER);
    let payload = URL_SAFE_NO_PAD.encode(serde_json::to_vec(claims)?);
    let signing_input = format!("{}.{}", header, payload);
    let signature = create_signature(&signing_input, secret);
    Ok(format!("{}.{}", signing_input, signature))
}

/// Create HMAC-SHA256 signature in base64url format without padding
fn create_signature(value: &str, secret: &str) -> String {
    let mut mac =
        HmacSha256::new_from_slice(secret.as_bytes()).expect("HMAC can take key of any size");
    mac.update(value.as_bytes());
    URL_SAFE_NO_PAD.encode(mac.finalize().into_bytes())
}

/// Constant-time string comparison to prevent timing attacks
fn constant_time_compare(a: &str, b: &str) -> bool {
    if a.len() != b.len() {
        return false;
    }

    let mut result = 0u8;
    for (x, y) in a.bytes().zip(b.bytes()) {
        result |= x ^ y;
    }
    result == 0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sign_and_verify() {
        let claims = Claims::new("user-1", 2_000_000_000, true);
        let token = sign(&claims, "keyboard cat").unwrap();
        assert_eq!(token.split('.').count(), 3);

        assert_eq!(verify(&token, "keyboard cat").unwrap(), claims);
        assert_eq!(decode_claims(&token).unwrap(), claims);
    }

    #[test]
    fn test_invalid_signature() {
        let token = sign(&Claims::new("user-1", 2_000_000_000, false), "secret").unwrap();
        assert!(matches!(
            verify(&token, "wrong secret"),
            Err(StateError::InvalidToken(_))
        ));
        // Unverified decoding still works
        assert!(decode_claims(&token).is_ok());
    }

    #[test]
    fn test_decode_foreign_token() {
        // Payload: {"id":"42","isAdmin":false,"exp":1700000000,"iat":1699990000}
        let payload = URL_SAFE_NO_PAD
            .encode(r#"{"id":"42","isAdmin":false,"exp":1700000000,"iat":1699990000}"#);
        let token = format!("eyJhbGciOiJIUzI1NiJ9.{}.c2ln", payload);

        let claims = decode_claims(&token).unwrap();
        assert_eq!(claims.subject_id, "42");
        assert_eq!(claims.expires_at, 1_700_000_000);
        assert!(!claims.is_admin);
    }

    #[test]
    fn test_numeric_subject() {
        let payload = URL_SAFE_NO_PAD.encode(r#"{"sub":7,"id":"ignored","exp":10}"#);
        let claims = decode_claims(&format!("h.{}.s", payload)).unwrap();
        assert_eq!(claims.subject_id, "7");
    }

    #[test]
    fn test_missing_admin_claim_defaults_to_false() {
        let payload = URL_SAFE_NO_PAD.encode(r#"{"sub":"7","exp":10}"#);
        let claims = decode_claims(&format!("h.{}.s", payload)).unwrap();
        assert!(!claims.is_admin);
    }

    #[test]
    fn test_malformed_tokens() {
        for token in ["", "abc", "a.b", "a.b.c.d", ".x.y", "h.!!!.s"] {
            assert!(decode_claims(token).is_err(), "accepted {:?}", token);
        }

        // Valid base64 but no expiry claim
        let payload = URL_SAFE_NO_PAD.encode(r#"{"sub":"7"}"#);
        assert!(decode_claims(&format!("h.{}.s", payload)).is_err());
    }

    #[test]
    fn test_expiry_with_leeway() {
        let claims = Claims::new("u", 1_000, false);
        assert!(!claims.is_expired_at(999, 0));
        assert!(claims.is_expired_at(1_000, 0));
        assert!(claims.is_expired_at(990, 10));
    }
}
