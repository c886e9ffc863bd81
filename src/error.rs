//! Error types for storage and state operations

use std::fmt;

/// Errors that can occur while reading or mutating persisted state
#[derive(Debug)]
pub enum StateError {
    /// Error from the storage backend
    StorageError(String),
    /// Write rejected because the storage quota would be exceeded
    QuotaExceeded { key: String, needed: usize, quota: usize },
    /// Error during serialization/deserialization
    SerializationError(String),
    /// Compare-and-swap kept losing against concurrent writers
    Conflict { key: String, attempts: u32 },
    /// Session token could not be decoded or verified
    InvalidToken(String),
    /// Product payload is missing a required field
    InvalidProduct(String),
    /// Redis error (when redis-store feature is enabled)
    #[cfg(feature = "redis-store")]
    RedisError(redis::RedisError),
}

impl fmt::Display for StateError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StateError::StorageError(msg) => write!(f, "Storage error: {}", msg),
            StateError::QuotaExceeded { key, needed, quota } => write!(
                f,
                "Storage quota exceeded writing '{}': {} bytes needed, quota is {}",
                key, needed, quota
            ),
            StateError::SerializationError(msg) => write!(f, "Serialization error: {}", msg),
            StateError::Conflict { key, attempts } => write!(
                f,
                "Write conflict on '{}' not resolved after {} attempts",
                key, attempts
            ),
            StateError::InvalidToken(msg) => write!(f, "Invalid session token: {}", msg),
            StateError::InvalidProduct(msg) => write!(f, "Invalid product: {}", msg),
            #[cfg(feature = "redis-store")]
            StateError::RedisError(e) => write!(f, "Redis error: {}", e),
        }
    }
}

impl std::error::Error for StateError {}

#[cfg(feature = "redis-store")]
impl From<redis::RedisError> for StateError {
    fn from(err: redis::RedisError) -> Self {
        StateError::RedisError(err)
    }
}

impl From<serde_json::Error> for StateError {
    fn from(err: serde_json::Error) -> Self {
        StateError::SerializationError(err.to_string())
    }
}
