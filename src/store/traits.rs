//! Storage backend trait

use std::sync::Arc;

use crate::error::StateError;

/// A value read from storage together with its revision.
///
/// Revisions start at 0 for a key that was never written and increase on
/// every write or removal, so a removed key keeps a non-zero revision.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Versioned {
    pub value: Option<String>,
    pub revision: u64,
}

/// Notification that a key was rewritten by another browsing context
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StorageChange {
    pub key: String,
    /// New value, or None when the key was removed
    pub value: Option<String>,
}

/// Callback invoked for changes made by other contexts
pub type StorageListener = Arc<dyn Fn(&StorageChange) + Send + Sync>;

/// Guard for a registered [`StorageListener`]. Dropping it stops delivery.
pub struct WatchHandle {
    cancel: Option<Box<dyn FnOnce() + Send + Sync>>,
}

impl WatchHandle {
    pub(crate) fn new<F>(cancel: F) -> Self
    where
        F: FnOnce() + Send + Sync + 'static,
    {
        Self {
            cancel: Some(Box::new(cancel)),
        }
    }
}

impl Drop for WatchHandle {
    fn drop(&mut self) {
        if let Some(cancel) = self.cancel.take() {
            cancel();
        }
    }
}

impl std::fmt::Debug for WatchHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WatchHandle")
            .field("active", &self.cancel.is_some())
            .finish()
    }
}

/// Trait for key/value storage backends
///
/// Access is synchronous and atomic per call. A backend handle represents one
/// browsing context; several contexts may share the same underlying origin.
pub trait StorageBackend: Send + Sync + 'static {
    /// Read a key and its current revision
    fn read(&self, key: &str) -> Result<Versioned, StateError>;

    /// Write a key.
    ///
    /// With `expected_revision` set, the write only happens if the stored
    /// revision still matches (compare-and-swap). Returns the new revision,
    /// or None when the comparison failed and nothing was written.
    fn write(
        &self,
        key: &str,
        value: &str,
        expected_revision: Option<u64>,
    ) -> Result<Option<u64>, StateError>;

    /// Remove a key
    fn remove(&self, key: &str) -> Result<(), StateError>;

    /// Remove a key only if its revision still matches.
    ///
    /// Returns false when the comparison failed and nothing was removed.
    fn remove_at(&self, key: &str, expected_revision: u64) -> Result<bool, StateError>;

    /// Register a listener for changes made by *other* contexts (optional)
    ///
    /// Returns None when the backend cannot observe foreign writes; consumers
    /// then depend on polling.
    fn watch(&self, listener: StorageListener) -> Option<WatchHandle> {
        let _ = listener;
        None
    }

    /// Get all keys (optional)
    fn keys(&self) -> Result<Vec<String>, StateError> {
        Err(StateError::StorageError("keys not implemented".to_string()))
    }

    /// Remove all keys (optional)
    fn clear(&self) -> Result<(), StateError> {
        Err(StateError::StorageError("clear not implemented".to_string()))
    }
}
