//! Backing-store traits and error types
//!
//! Two stores back the core:
//! - a low-latency [`CounterStore`] for per-minute rate windows
//! - a durable [`UsageStore`] for daily usage rows
//!
//! All counter mutation happens inside these stores through atomic
//! increment primitives. The core keeps no mutable counter state itself.

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use uuid::Uuid;

use crate::category::RequestCategory;

/// Store error types
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("Connection error: {0}")]
    Connection(String),

    #[error("Query error: {0}")]
    Query(String),

    #[error("Timed out after {0:?}")]
    Timeout(Duration),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

/// Shared counter store with atomic "increment, set TTL if first" semantics
#[async_trait]
pub trait CounterStore: Send + Sync {
    /// Backend name for logs
    fn name(&self) -> &str;

    /// Atomically increment `key` and return the new count.
    ///
    /// When the increment creates the key, its expiry is set to `ttl`.
    /// Later increments leave the expiry untouched.
    async fn increment_with_ttl(&self, key: &str, ttl: Duration) -> Result<u64, StoreError>;
}

/// Whose usage a quota total is summed over
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind", content = "id")]
pub enum UsageScope {
    /// A single published resource's key
    Tenant(String),
    /// Every resource belonging to an owner
    Owner(Uuid),
}

/// One row per (tenant key, UTC date, category)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DailyUsageRecord {
    pub tenant_key: String,
    pub owner_id: Uuid,
    pub resource_id: Uuid,
    pub date: NaiveDate,
    pub category: RequestCategory,
    pub count: u64,
    pub updated_at: DateTime<Utc>,
}

/// Durable usage counters
#[async_trait]
pub trait UsageStore: Send + Sync {
    /// Backend name for logs
    fn name(&self) -> &str;

    /// Upsert-increment the (tenant, date, category) row by one.
    ///
    /// Must not lose updates under concurrent increments of the same row.
    async fn increment(
        &self,
        tenant_key: &str,
        owner_id: Uuid,
        resource_id: Uuid,
        date: NaiveDate,
        category: RequestCategory,
    ) -> Result<(), StoreError>;

    /// Sum of counts from `since` (inclusive) onward for a category
    async fn total_since(
        &self,
        scope: &UsageScope,
        since: NaiveDate,
        category: RequestCategory,
    ) -> Result<u64, StoreError>;

    /// Rows between `start` and `end` inclusive, newest first
    async fn daily_usage(
        &self,
        scope: &UsageScope,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<Vec<DailyUsageRecord>, StoreError>;
}

/// Run a store call with a deadline, turning expiry into [`StoreError::Timeout`]
pub async fn with_deadline<T, F>(deadline: Duration, call: F) -> Result<T, StoreError>
where
    F: std::future::Future<Output = Result<T, StoreError>>,
{
    match tokio::time::timeout(deadline, call).await {
        Ok(result) => result,
        Err(_) => Err(StoreError::Timeout(deadline)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_with_deadline_expires() {
        let result: Result<(), StoreError> = with_deadline(Duration::from_millis(10), async {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok(())
        })
        .await;
        assert!(matches!(result, Err(StoreError::Timeout(_))));
    }

    #[tokio::test]
    async fn test_with_deadline_passes_through() {
        let result = with_deadline(Duration::from_secs(1), async { Ok::<_, StoreError>(7u64) }).await;
        assert_eq!(result.unwrap(), 7);
    }

    #[test]
    fn test_scope_serialization() {
        let scope = UsageScope::Tenant("key_1".to_string());
        let json = serde_json::to_value(&scope).unwrap();
        assert_eq!(json["kind"], "tenant");
        assert_eq!(json["id"], "key_1");
    }
}
