//! Fixed one-minute rate windows
//!
//! Windows are aligned to wall-clock minute boundaries. A counter lives
//! under `rate_limit:{tenant}:{category}:{window}` where `window` is the
//! number of whole minutes since the Unix epoch, and expires on its own
//! 60 seconds after its first increment.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tokio::time::Instant;

use crate::category::RequestCategory;
use crate::store::{with_deadline, CounterStore, StoreError};

/// Window length
pub const WINDOW_SECS: i64 = 60;

const KEY_PREFIX: &str = "rate_limit";

/// Counter for (tenant, category, minute) windows over a shared store
#[derive(Clone)]
pub struct WindowCounter {
    store: Arc<dyn CounterStore>,
    timeout: Duration,
}

impl WindowCounter {
    pub fn new(store: Arc<dyn CounterStore>, timeout: Duration) -> Self {
        Self { store, timeout }
    }

    /// Name of the backing store
    pub fn store_name(&self) -> &str {
        self.store.name()
    }

    /// Minute index containing `now`
    pub fn window_id(now: DateTime<Utc>) -> i64 {
        now.timestamp().div_euclid(WINDOW_SECS)
    }

    /// Start of the window after the one containing `now`
    pub fn reset_at(now: DateTime<Utc>) -> DateTime<Utc> {
        let next = (Self::window_id(now) + 1) * WINDOW_SECS;
        DateTime::<Utc>::from_timestamp(next, 0).unwrap_or(now)
    }

    pub fn key(tenant_key: &str, category: RequestCategory, window_id: i64) -> String {
        format!("{}:{}:{}:{}", KEY_PREFIX, tenant_key, category.as_str(), window_id)
    }

    /// Increment the window containing `now` and return its new count
    pub async fn increment(
        &self,
        tenant_key: &str,
        category: RequestCategory,
        now: DateTime<Utc>,
    ) -> Result<u64, StoreError> {
        let key = Self::key(tenant_key, category, Self::window_id(now));
        let ttl = Duration::from_secs(WINDOW_SECS as u64);
        with_deadline(self.timeout, self.store.increment_with_ttl(&key, ttl)).await
    }
}

impl std::fmt::Debug for WindowCounter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WindowCounter")
            .field("store", &self.store.name())
            .field("timeout", &self.timeout)
            .finish()
    }
}

#[derive(Debug, Clone, Copy)]
struct Slot {
    count: u64,
    expires_at: Instant,
}

/// In-process counter store.
///
/// Suitable for a single gateway node and for tests. The write lock makes
/// increment-and-expire one atomic step per key.
#[derive(Debug, Default)]
pub struct MemoryCounterStore {
    slots: RwLock<HashMap<String, Slot>>,
}

impl MemoryCounterStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Current count for a key, if it exists and has not expired
    pub async fn get(&self, key: &str) -> Option<u64> {
        let slots = self.slots.read().await;
        slots
            .get(key)
            .filter(|slot| slot.expires_at > Instant::now())
            .map(|slot| slot.count)
    }

    /// Drop expired counters, returning how many were removed
    pub async fn purge_expired(&self) -> usize {
        let mut slots = self.slots.write().await;
        let now = Instant::now();
        let before = slots.len();
        slots.retain(|_, slot| slot.expires_at > now);
        let removed = before - slots.len();
        tracing::debug!(removed, remaining = slots.len(), "Purged expired rate windows");
        removed
    }

    pub async fn len(&self) -> usize {
        self.slots.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.slots.read().await.is_empty()
    }
}

#[async_trait]
impl CounterStore for MemoryCounterStore {
    fn name(&self) -> &str {
        "memory"
    }

    async fn increment_with_ttl(&self, key: &str, ttl: Duration) -> Result<u64, StoreError> {
        let mut slots = self.slots.write().await;
        let now = Instant::now();

        let slot = slots.entry(key.to_string()).or_insert(Slot {
            count: 0,
            expires_at: now + ttl,
        });
        if slot.expires_at <= now {
            // Expired but not yet purged: behaves like a fresh key
            *slot = Slot {
                count: 0,
                expires_at: now + ttl,
            };
        }
        slot.count += 1;
        Ok(slot.count)
    }
}
