//! Calendar helpers and the in-memory usage store

use async_trait::async_trait;
use chrono::{DateTime, Datelike, NaiveDate, Utc};
use std::collections::HashMap;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::category::RequestCategory;
use crate::store::{DailyUsageRecord, StoreError, UsageScope, UsageStore};

/// UTC calendar date of `now`
pub fn utc_day(now: DateTime<Utc>) -> NaiveDate {
    now.date_naive()
}

/// First day of the UTC calendar month containing `now`
pub fn first_of_month(now: DateTime<Utc>) -> NaiveDate {
    let today = now.date_naive();
    today.with_day(1).unwrap_or(today)
}

impl UsageScope {
    /// Whether a usage row belongs to this scope
    pub fn matches(&self, record: &DailyUsageRecord) -> bool {
        match self {
            UsageScope::Tenant(key) => &record.tenant_key == key,
            UsageScope::Owner(owner) => &record.owner_id == owner,
        }
    }
}

type RowKey = (String, NaiveDate, RequestCategory);

/// In-memory usage store (for testing and single-node setups)
#[derive(Debug, Default)]
pub struct MemoryUsageStore {
    rows: RwLock<HashMap<RowKey, DailyUsageRecord>>,
}

impl MemoryUsageStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Count stored for one row, 0 when absent
    pub async fn count(&self, tenant_key: &str, date: NaiveDate, category: RequestCategory) -> u64 {
        let rows = self.rows.read().await;
        rows.get(&(tenant_key.to_string(), date, category))
            .map(|r| r.count)
            .unwrap_or(0)
    }
}

#[async_trait]
impl UsageStore for MemoryUsageStore {
    fn name(&self) -> &str {
        "memory"
    }

    async fn increment(
        &self,
        tenant_key: &str,
        owner_id: Uuid,
        resource_id: Uuid,
        date: NaiveDate,
        category: RequestCategory,
    ) -> Result<(), StoreError> {
        let mut rows = self.rows.write().await;
        let now = Utc::now();
        rows.entry((tenant_key.to_string(), date, category))
            .and_modify(|r| {
                r.count += 1;
                r.updated_at = now;
            })
            .or_insert_with(|| DailyUsageRecord {
                tenant_key: tenant_key.to_string(),
                owner_id,
                resource_id,
                date,
                category,
                count: 1,
                updated_at: now,
            });
        Ok(())
    }

    async fn total_since(
        &self,
        scope: &UsageScope,
        since: NaiveDate,
        category: RequestCategory,
    ) -> Result<u64, StoreError> {
        let rows = self.rows.read().await;
        Ok(rows
            .values()
            .filter(|r| r.category == category && r.date >= since && scope.matches(r))
            .map(|r| r.count)
            .sum())
    }

    async fn daily_usage(
        &self,
        scope: &UsageScope,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<Vec<DailyUsageRecord>, StoreError> {
        let rows = self.rows.read().await;
        let mut records: Vec<DailyUsageRecord> = rows
            .values()
            .filter(|r| r.date >= start && r.date <= end && scope.matches(r))
            .cloned()
            .collect();
        records.sort_by(|a, b| {
            b.date
                .cmp(&a.date)
                .then_with(|| a.tenant_key.cmp(&b.tenant_key))
                .then_with(|| a.category.as_str().cmp(b.category.as_str()))
        });
        Ok(records)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use std::sync::Arc;

    fn day(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn test_calendar_helpers() {
        let now = Utc.with_ymd_and_hms(2026, 2, 17, 23, 59, 59).unwrap();
        assert_eq!(utc_day(now), day(2026, 2, 17));
        assert_eq!(first_of_month(now), day(2026, 2, 1));
    }

    #[tokio::test]
    async fn test_upsert_creates_then_increments() {
        let store = MemoryUsageStore::new();
        let (owner, sheet) = (Uuid::new_v4(), Uuid::new_v4());
        let today = day(2026, 4, 2);

        store.increment("k1", owner, sheet, today, RequestCategory::Write).await.unwrap();
        store.increment("k1", owner, sheet, today, RequestCategory::Write).await.unwrap();
        store.increment("k1", owner, sheet, today, RequestCategory::Read).await.unwrap();

        assert_eq!(store.count("k1", today, RequestCategory::Write).await, 2);
        assert_eq!(store.count("k1", today, RequestCategory::Read).await, 1);
    }

    #[tokio::test]
    async fn test_total_since_by_scope() {
        let store = MemoryUsageStore::new();
        let owner = Uuid::new_v4();
        let (sheet_a, sheet_b) = (Uuid::new_v4(), Uuid::new_v4());

        store.increment("a", owner, sheet_a, day(2026, 3, 31), RequestCategory::Read).await.unwrap();
        store.increment("a", owner, sheet_a, day(2026, 4, 1), RequestCategory::Read).await.unwrap();
        store.increment("b", owner, sheet_b, day(2026, 4, 5), RequestCategory::Read).await.unwrap();
        store.increment("b", owner, sheet_b, day(2026, 4, 5), RequestCategory::Write).await.unwrap();

        let since = day(2026, 4, 1);
        let by_owner = store
            .total_since(&UsageScope::Owner(owner), since, RequestCategory::Read)
            .await
            .unwrap();
        assert_eq!(by_owner, 2);

        let by_tenant = store
            .total_since(&UsageScope::Tenant("a".into()), since, RequestCategory::Read)
            .await
            .unwrap();
        assert_eq!(by_tenant, 1);
    }

    #[tokio::test]
    async fn test_daily_usage_newest_first() {
        let store = MemoryUsageStore::new();
        let (owner, sheet) = (Uuid::new_v4(), Uuid::new_v4());
        for d in [3, 1, 2] {
            store.increment("k", owner, sheet, day(2026, 6, d), RequestCategory::Read).await.unwrap();
        }

        let rows = store
            .daily_usage(&UsageScope::Tenant("k".into()), day(2026, 6, 2), day(2026, 6, 30))
            .await
            .unwrap();
        let dates: Vec<_> = rows.iter().map(|r| r.date).collect();
        assert_eq!(dates, vec![day(2026, 6, 3), day(2026, 6, 2)]);
    }

    #[tokio::test]
    async fn test_concurrent_increments_lose_nothing() {
        let store = Arc::new(MemoryUsageStore::new());
        let (owner, sheet) = (Uuid::new_v4(), Uuid::new_v4());
        let today = day(2026, 1, 1);

        let handles: Vec<_> = (0..100)
            .map(|_| {
                let store = store.clone();
                tokio::spawn(async move {
                    store.increment("k", owner, sheet, today, RequestCategory::Write).await
                })
            })
            .collect();
        for handle in handles {
            handle.await.unwrap().unwrap();
        }

        assert_eq!(store.count("k", today, RequestCategory::Write).await, 100);
    }
}
