//! Storage backend implementations

mod memory;
mod traits;

pub use memory::MemoryBackend;
pub use traits::{StorageBackend, StorageChange, StorageListener, Versioned, WatchHandle};

#[cfg(feature = "redis-store")]
mod redis_store;

#[cfg(feature = "redis-store")]
pub use redis_store::RedisBackend;
