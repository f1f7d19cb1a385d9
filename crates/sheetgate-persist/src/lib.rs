//! # SheetGate Persistence
//!
//! Storage backends behind the core store traits.
//!
//! Supports:
//! - SQLite for durable daily usage counters
//! - Redis for shared per-minute rate windows
//! - In-memory rate windows when Redis is not configured

#[cfg(feature = "redis")]
pub mod redis_counter;
#[cfg(feature = "sqlite")]
pub mod sqlite;
#[cfg(feature = "sqlite")]
pub mod usage_store;

use std::sync::Arc;
use tracing::warn;

use sheetgate_core::{CounterStore, MemoryCounterStore};

#[cfg(feature = "redis")]
pub use redis_counter::RedisCounterStore;
#[cfg(feature = "sqlite")]
pub use sqlite::{SqliteBackend, SqliteConfig};
#[cfg(feature = "sqlite")]
pub use usage_store::SqliteUsageStore;

/// Counter store selected at startup
pub enum CounterBackend {
    #[cfg(feature = "redis")]
    Redis(Arc<RedisCounterStore>),
    /// Process-local windows; callers should purge expired slots periodically
    Memory(Arc<MemoryCounterStore>),
}

impl CounterBackend {
    /// The store as the core trait object
    pub fn store(&self) -> Arc<dyn CounterStore> {
        match self {
            #[cfg(feature = "redis")]
            CounterBackend::Redis(store) => store.clone(),
            CounterBackend::Memory(store) => store.clone(),
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            #[cfg(feature = "redis")]
            CounterBackend::Redis(_) => "redis",
            CounterBackend::Memory(_) => "memory",
        }
    }
}

/// Connect the rate-window counter store.
///
/// Uses Redis when a URL is given and reachable. Otherwise windows are
/// counted in process memory, which is only exact for a single instance.
pub async fn connect_counter_store(redis_url: Option<&str>) -> CounterBackend {
    #[cfg(feature = "redis")]
    if let Some(url) = redis_url {
        match RedisCounterStore::connect(url).await {
            Ok(store) => return CounterBackend::Redis(Arc::new(store)),
            Err(e) => {
                warn!(error = %e, "Redis unavailable, counting rate windows in memory");
            }
        }
    }

    #[cfg(not(feature = "redis"))]
    if redis_url.is_some() {
        warn!("Built without the redis feature, counting rate windows in memory");
    }

    CounterBackend::Memory(Arc::new(MemoryCounterStore::new()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_memory_backend_without_url() {
        let backend = connect_counter_store(None).await;
        assert_eq!(backend.name(), "memory");
        assert_eq!(backend.store().name(), "memory");
    }
}
