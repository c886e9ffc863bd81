//! Redis storage backend
//!
//! Lets several processes share one storage origin. Each key is stored as
//! `prefix + key`, with its revision counter at `prefix + key + ":rev"`.
//! Redis offers no change feed here, so `watch` is unsupported and
//! observers rely on the polling fallback.

use parking_lot::Mutex;
use std::sync::Arc;

use super::traits::{StorageBackend, Versioned};
use crate::error::StateError;

/// Compare-and-swap write. Returns the new revision, or -1 on a mismatch.
const CAS_SCRIPT: &str = r"
local rev = tonumber(redis.call('GET', KEYS[2]) or '0')
if ARGV[1] ~= '' and tonumber(ARGV[1]) ~= rev then
  return -1
end
redis.call('SET', KEYS[1], ARGV[2])
return redis.call('INCR', KEYS[2])
";

/// Delete the value and bump the revision so readers notice the removal
const REMOVE_SCRIPT: &str = r"
if redis.call('DEL', KEYS[1]) == 1 then
  return redis.call('INCR', KEYS[2])
end
return 0
";

/// Delete only if the revision still matches. Returns -1 on a mismatch.
const REMOVE_AT_SCRIPT: &str = r"
local rev = tonumber(redis.call('GET', KEYS[2]) or '0')
if tonumber(ARGV[1]) ~= rev then
  return -1
end
if redis.call('DEL', KEYS[1]) == 1 then
  return redis.call('INCR', KEYS[2])
end
return 0
";

/// Redis storage backend
///
/// # Example
///
/// ```rust,ignore
/// use storefront_state::store::RedisBackend;
///
/// let backend = RedisBackend::from_url("redis://127.0.0.1/")?;
/// ```
pub struct RedisBackend {
    conn: Arc<Mutex<redis::Connection>>,
    prefix: String,
}

impl RedisBackend {
    /// Create a new Redis backend with the default prefix "storefront:"
    pub fn new(client: redis::Client) -> Result<Self, StateError> {
        let conn = client.get_connection()?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            prefix: "storefront:".to_string(),
        })
    }

    /// Create a new Redis backend from a connection string
    pub fn from_url(url: &str) -> Result<Self, StateError> {
        let client = redis::Client::open(url).map_err(|e| {
            StateError::StorageError(format!("Failed to create Redis client: {}", e))
        })?;
        Self::new(client)
    }

    /// Build with custom prefix
    pub fn with_custom_prefix(mut self, prefix: &str) -> Self {
        self.prefix = prefix.to_string();
        self
    }

    fn make_key(&self, key: &str) -> String {
        format!("{}{}", self.prefix, key)
    }

    fn make_revision_key(&self, key: &str) -> String {
        format!("{}{}:rev", self.prefix, key)
    }
}

impl Clone for RedisBackend {
    fn clone(&self) -> Self {
        Self {
            conn: Arc::clone(&self.conn),
            prefix: self.prefix.clone(),
        }
    }
}

impl StorageBackend for RedisBackend {
    fn read(&self, key: &str) -> Result<Versioned, StateError> {
        let mut conn = self.conn.lock();
        let (value, revision): (Option<String>, Option<u64>) = redis::cmd("MGET")
            .arg(self.make_key(key))
            .arg(self.make_revision_key(key))
            .query(&mut *conn)?;

        Ok(Versioned {
            value,
            revision: revision.unwrap_or(0),
        })
    }

    fn write(
        &self,
        key: &str,
        value: &str,
        expected_revision: Option<u64>,
    ) -> Result<Option<u64>, StateError> {
        let expected = expected_revision
            .map(|r| r.to_string())
            .unwrap_or_default();

        let mut conn = self.conn.lock();
        let revision: i64 = redis::Script::new(CAS_SCRIPT)
            .key(self.make_key(key))
            .key(self.make_revision_key(key))
            .arg(expected)
            .arg(value)
            .invoke(&mut *conn)?;

        Ok(u64::try_from(revision).ok())
    }

    fn remove(&self, key: &str) -> Result<(), StateError> {
        let mut conn = self.conn.lock();
        let _: i64 = redis::Script::new(REMOVE_SCRIPT)
            .key(self.make_key(key))
            .key(self.make_revision_key(key))
            .invoke(&mut *conn)?;
        Ok(())
    }

    fn remove_at(&self, key: &str, expected_revision: u64) -> Result<bool, StateError> {
        let mut conn = self.conn.lock();
        let result: i64 = redis::Script::new(REMOVE_AT_SCRIPT)
            .key(self.make_key(key))
            .key(self.make_revision_key(key))
            .arg(expected_revision)
            .invoke(&mut *conn)?;
        Ok(result >= 0)
    }

    fn keys(&self) -> Result<Vec<String>, StateError> {
        let mut conn = self.conn.lock();
        let pattern = format!("{}*", self.prefix);
        let keys: Vec<String> = redis::cmd("KEYS").arg(&pattern).query(&mut *conn)?;

        let prefix_len = self.prefix.len();
        Ok(keys
            .into_iter()
            .filter(|k| !k.ends_with(":rev"))
            .map(|k| k[prefix_len..].to_string())
            .collect())
    }

    fn clear(&self) -> Result<(), StateError> {
        for key in self.keys()? {
            self.remove(&key)?;
        }
        Ok(())
    }
}
