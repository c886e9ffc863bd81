//! In-memory storage backend
//!
//! Models browser-local storage: one origin holding the data, any number of
//! attached browsing contexts (tabs) reading and writing it. Writes made
//! through one context are announced to the watchers of every other context,
//! the way a storage event only fires in the tabs that did not write.

use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use uuid::Uuid;

use super::traits::{StorageBackend, StorageChange, StorageListener, Versioned, WatchHandle};
use crate::error::StateError;

#[derive(Default)]
struct Entry {
    value: Option<String>,
    revision: u64,
}

struct Watcher {
    id: u64,
    context: Uuid,
    listener: StorageListener,
}

#[derive(Default)]
struct Origin {
    entries: RwLock<HashMap<String, Entry>>,
    watchers: RwLock<Vec<Watcher>>,
    next_watcher: AtomicU64,
    quota: Option<usize>,
}

impl Origin {
    fn used_bytes(entries: &HashMap<String, Entry>) -> usize {
        entries
            .iter()
            .filter_map(|(k, e)| e.value.as_ref().map(|v| k.len() + v.len()))
            .sum()
    }
}

/// In-memory storage backend
///
/// Cloning yields a handle for the *same* context. Use [`MemoryBackend::attach`]
/// to open another context over the same origin.
pub struct MemoryBackend {
    origin: Arc<Origin>,
    context: Uuid,
}

impl MemoryBackend {
    /// Create a new, empty origin and a first context on it
    pub fn new() -> Self {
        Self {
            origin: Arc::new(Origin::default()),
            context: Uuid::new_v4(),
        }
    }

    /// Create an origin that rejects writes once keys and values exceed `bytes`
    pub fn with_quota(bytes: usize) -> Self {
        Self {
            origin: Arc::new(Origin {
                quota: Some(bytes),
                ..Default::default()
            }),
            context: Uuid::new_v4(),
        }
    }

    /// Open another browsing context on the same origin
    pub fn attach(&self) -> Self {
        Self {
            origin: Arc::clone(&self.origin),
            context: Uuid::new_v4(),
        }
    }

    /// Identifier of this context
    pub fn context_id(&self) -> Uuid {
        self.context
    }

    fn notify(&self, key: &str, value: Option<&str>) {
        let listeners: Vec<StorageListener> = self
            .origin
            .watchers
            .read()
            .iter()
            .filter(|w| w.context != self.context)
            .map(|w| Arc::clone(&w.listener))
            .collect();

        if listeners.is_empty() {
            return;
        }

        let change = StorageChange {
            key: key.to_string(),
            value: value.map(str::to_string),
        };
        for listener in listeners {
            listener(&change);
        }
    }
}

impl Default for MemoryBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl Clone for MemoryBackend {
    fn clone(&self) -> Self {
        Self {
            origin: Arc::clone(&self.origin),
            context: self.context,
        }
    }
}

impl std::fmt::Debug for MemoryBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryBackend")
            .field("context", &self.context)
            .field("quota", &self.origin.quota)
            .finish()
    }
}

impl StorageBackend for MemoryBackend {
    fn read(&self, key: &str) -> Result<Versioned, StateError> {
        let entries = self.origin.entries.read();
        Ok(entries
            .get(key)
            .map(|e| Versioned {
                value: e.value.clone(),
                revision: e.revision,
            })
            .unwrap_or_default())
    }

    fn write(
        &self,
        key: &str,
        value: &str,
        expected_revision: Option<u64>,
    ) -> Result<Option<u64>, StateError> {
        let revision = {
            let mut entries = self.origin.entries.write();
            let current = entries.get(key).map(|e| e.revision).unwrap_or(0);

            if let Some(expected) = expected_revision {
                if expected != current {
                    return Ok(None);
                }
            }

            if let Some(quota) = self.origin.quota {
                let previous = entries
                    .get(key)
                    .and_then(|e| e.value.as_ref())
                    .map(|v| key.len() + v.len())
                    .unwrap_or(0);
                let needed = Origin::used_bytes(&entries) - previous + key.len() + value.len();
                if needed > quota {
                    return Err(StateError::QuotaExceeded {
                        key: key.to_string(),
                        needed,
                        quota,
                    });
                }
            }

            let entry = entries.entry(key.to_string()).or_default();
            entry.value = Some(value.to_string());
            entry.revision = current + 1;
            entry.revision
        };

        self.notify(key, Some(value));
        Ok(Some(revision))
    }

    fn remove(&self, key: &str) -> Result<(), StateError> {
        let removed = {
            let mut entries = self.origin.entries.write();
            match entries.get_mut(key) {
                Some(entry) if entry.value.is_some() => {
                    entry.value = None;
                    entry.revision += 1;
                    true
                }
                _ => false,
            }
        };

        if removed {
            self.notify(key, None);
        }
        Ok(())
    }

    fn remove_at(&self, key: &str, expected_revision: u64) -> Result<bool, StateError> {
        let removed = {
            let mut entries = self.origin.entries.write();
            let current = entries.get(key).map(|e| e.revision).unwrap_or(0);
            if current != expected_revision {
                return Ok(false);
            }
            match entries.get_mut(key) {
                Some(entry) if entry.value.is_some() => {
                    entry.value = None;
                    entry.revision += 1;
                    true
                }
                _ => false,
            }
        };

        if removed {
            self.notify(key, None);
        }
        Ok(true)
    }

    fn watch(&self, listener: StorageListener) -> Option<WatchHandle> {
        let id = self.origin.next_watcher.fetch_add(1, Ordering::Relaxed);
        self.origin.watchers.write().push(Watcher {
            id,
            context: self.context,
            listener,
        });

        let origin = Arc::downgrade(&self.origin);
        Some(WatchHandle::new(move || {
            if let Some(origin) = origin.upgrade() {
                origin.watchers.write().retain(|w| w.id != id);
            }
        }))
    }

    fn keys(&self) -> Result<Vec<String>, StateError> {
        let entries = self.origin.entries.read();
        Ok(entries
            .iter()
            .filter(|(_, e)| e.value.is_some())
            .map(|(k, _)| k.clone())
            .collect())
    }

    fn clear(&self) -> Result<(), StateError> {
        let removed: Vec<String> = {
            let mut entries = self.origin.entries.write();
            entries
                .iter_mut()
                .filter(|(_, e)| e.value.is_some())
                .map(|(k, e)| {
                    e.value = None;
                    e.revision += 1;
                    k.clone()
                })
                .collect()
        };

        for key in removed {
            self.notify(&key, None);
        }
        Ok(())
    }
}
