//! Typed persistence over a storage backend
//!
//! Values are stored as JSON text. Reads never fail: missing or corrupted
//! data falls back to a caller-supplied value. Writes are best-effort; a
//! failed write is logged and the caller keeps the state it computed.

use serde::de::DeserializeOwned;
use serde::Serialize;
use std::sync::Arc;

use crate::error::StateError;
use crate::store::{StorageBackend, Versioned};

/// Result of a read-modify-write through [`PersistentStore::update`]
#[derive(Debug, Clone, PartialEq)]
pub struct Mutation<T, R> {
    /// Value after the mutation was applied
    pub value: T,
    /// What the mutation closure returned
    pub output: R,
    /// Whether the value reached storage
    pub persisted: bool,
}

/// Typed wrapper over a [`StorageBackend`]
#[derive(Clone)]
pub struct PersistentStore {
    backend: Arc<dyn StorageBackend>,
    max_write_attempts: u32,
}

impl PersistentStore {
    /// Create a store over the given backend
    pub fn new(backend: Arc<dyn StorageBackend>) -> Self {
        Self {
            backend,
            max_write_attempts: 8,
        }
    }

    /// Set the compare-and-swap attempt limit used by [`update`](Self::update)
    pub fn with_max_write_attempts(mut self, attempts: u32) -> Self {
        self.max_write_attempts = attempts.max(1);
        self
    }

    /// The underlying backend
    pub fn backend(&self) -> &Arc<dyn StorageBackend> {
        &self.backend
    }

    /// Read and decode a value, returning `fallback` when it is missing or unreadable
    pub fn get<T: DeserializeOwned>(&self, key: &str, fallback: T) -> T {
        let stored = self.read_versioned(key);
        decode(key, stored.value.as_deref()).unwrap_or(fallback)
    }

    /// Read and decode a value, returning `T::default()` when missing or unreadable
    pub fn get_or_default<T: DeserializeOwned + Default>(&self, key: &str) -> T {
        self.get(key, T::default())
    }

    /// Read the raw text stored at `key`
    pub fn get_raw(&self, key: &str) -> Option<String> {
        self.read_versioned(key).value
    }

    /// Encode and write a value. Failures are logged, not returned.
    pub fn set<T: Serialize>(&self, key: &str, value: &T) -> bool {
        match serde_json::to_string(value) {
            Ok(text) => self.set_raw(key, &text),
            Err(e) => {
                tracing::warn!(key, error = %e, "Failed to serialize value");
                false
            }
        }
    }

    /// Write raw text. Failures are logged, not returned.
    pub fn set_raw(&self, key: &str, value: &str) -> bool {
        match self.backend.write(key, value, None) {
            Ok(_) => true,
            Err(e) => {
                tracing::warn!(key, error = %e, "Failed to persist value");
                false
            }
        }
    }

    /// Remove a key. Failures are logged, not returned.
    pub fn remove(&self, key: &str) {
        if let Err(e) = self.backend.remove(key) {
            tracing::warn!(key, error = %e, "Failed to remove value");
        }
    }

    /// Remove a key only while it still holds `expected`.
    ///
    /// Returns false when the stored text differs or changed before the
    /// removal could happen; the newer value is left in place.
    pub fn remove_if_unchanged(&self, key: &str, expected: &str) -> bool {
        let stored = self.read_versioned(key);
        if stored.value.as_deref() != Some(expected) {
            return false;
        }
        match self.backend.remove_at(key, stored.revision) {
            Ok(removed) => removed,
            Err(e) => {
                tracing::warn!(key, error = %e, "Failed to remove value");
                false
            }
        }
    }

    /// Read-modify-write under compare-and-swap.
    ///
    /// `mutate` receives the freshly decoded value (default when missing or
    /// corrupted). If another context wrote the key in between, the value is
    /// re-read and `mutate` runs again, so it must not depend on side effects
    /// of earlier runs.
    pub fn update<T, R, F>(&self, key: &str, mut mutate: F) -> Mutation<T, R>
    where
        T: DeserializeOwned + Serialize + Default,
        F: FnMut(&mut T) -> R,
    {
        let mut attempt = 0;
        loop {
            attempt += 1;
            let stored = self.read_versioned(key);
            let mut value: T = decode(key, stored.value.as_deref()).unwrap_or_default();
            let output = mutate(&mut value);

            let text = match serde_json::to_string(&value) {
                Ok(text) => text,
                Err(e) => {
                    tracing::warn!(key, error = %e, "Failed to serialize value");
                    return Mutation {
                        value,
                        output,
                        persisted: false,
                    };
                }
            };

            match self.backend.write(key, &text, Some(stored.revision)) {
                Ok(Some(_)) => {
                    return Mutation {
                        value,
                        output,
                        persisted: true,
                    };
                }
                Ok(None) if attempt < self.max_write_attempts => {
                    tracing::debug!(key, attempt, "Concurrent write detected, retrying");
                }
                Ok(None) => {
                    let err = StateError::Conflict {
                        key: key.to_string(),
                        attempts: attempt,
                    };
                    tracing::warn!(key, error = %err, "Giving up on write");
                    return Mutation {
                        value,
                        output,
                        persisted: false,
                    };
                }
                Err(e) => {
                    tracing::warn!(key, error = %e, "Failed to persist value");
                    return Mutation {
                        value,
                        output,
                        persisted: false,
                    };
                }
            }
        }
    }

    fn read_versioned(&self, key: &str) -> Versioned {
        match self.backend.read(key) {
            Ok(stored) => stored,
            Err(e) => {
                tracing::warn!(key, error = %e, "Failed to read value");
                Versioned::default()
            }
        }
    }
}

impl std::fmt::Debug for PersistentStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PersistentStore")
            .field("max_write_attempts", &self.max_write_attempts)
            .finish()
    }
}

fn decode<T: DeserializeOwned>(key: &str, text: Option<&str>) -> Option<T> {
    let text = text?;
    match serde_json::from_str(text) {
        Ok(value) => Some(value),
        Err(e) => {
            tracing::warn!(key, error = %e, "Discarding unreadable stored value");
            None
        }
    }
}
