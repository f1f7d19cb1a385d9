//! SQLite-backed daily usage counters

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use sqlx::sqlite::{SqlitePool, SqliteRow};
use sqlx::Row;
use uuid::Uuid;

use sheetgate_core::{DailyUsageRecord, RequestCategory, StoreError, UsageScope, UsageStore};

use crate::sqlite::SqliteBackend;

/// Usage store over the `api_usage_daily` table
#[derive(Debug, Clone)]
pub struct SqliteUsageStore {
    pool: SqlitePool,
}

impl SqliteUsageStore {
    pub fn new(backend: &SqliteBackend) -> Self {
        Self {
            pool: backend.pool().clone(),
        }
    }

    pub fn from_pool(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

fn query_error(e: sqlx::Error) -> StoreError {
    match e {
        sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed | sqlx::Error::Io(_) => {
            StoreError::Connection(e.to_string())
        }
        other => StoreError::Query(other.to_string()),
    }
}

/// Scope filter as a column name and bound value
fn scope_filter(scope: &UsageScope) -> (&'static str, String) {
    match scope {
        UsageScope::Tenant(key) => ("tenant_key", key.clone()),
        UsageScope::Owner(owner) => ("owner_id", owner.to_string()),
    }
}

fn count_from_db(value: i64) -> u64 {
    u64::try_from(value).unwrap_or(0)
}

fn record_from_row(row: &SqliteRow) -> Result<DailyUsageRecord, StoreError> {
    let uuid_column = |name: &str| -> Result<Uuid, StoreError> {
        let raw: String = row.try_get(name).map_err(query_error)?;
        Uuid::parse_str(&raw).map_err(|e| StoreError::Serialization(e.to_string()))
    };

    let category: String = row.try_get("category").map_err(query_error)?;
    let category = RequestCategory::parse(&category)
        .ok_or_else(|| StoreError::Serialization(format!("unknown category '{}'", category)))?;
    let count: i64 = row.try_get("request_count").map_err(query_error)?;
    let date: NaiveDate = row.try_get("request_date").map_err(query_error)?;
    let updated_at: DateTime<Utc> = row.try_get("updated_at").map_err(query_error)?;

    Ok(DailyUsageRecord {
        tenant_key: row.try_get("tenant_key").map_err(query_error)?,
        owner_id: uuid_column("owner_id")?,
        resource_id: uuid_column("resource_id")?,
        date,
        category,
        count: count_from_db(count),
        updated_at,
    })
}

#[async_trait]
impl UsageStore for SqliteUsageStore {
    fn name(&self) -> &str {
        "sqlite"
    }

    async fn increment(
        &self,
        tenant_key: &str,
        owner_id: Uuid,
        resource_id: Uuid,
        date: NaiveDate,
        category: RequestCategory,
    ) -> Result<(), StoreError> {
        let now = Utc::now();

        // Single statement upsert: concurrent writers serialize on the row
        sqlx::query(
            r#"
            INSERT INTO api_usage_daily
                (tenant_key, owner_id, resource_id, request_date, category, request_count, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, 1, ?, ?)
            ON CONFLICT (tenant_key, request_date, category)
            DO UPDATE SET
                request_count = api_usage_daily.request_count + 1,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(tenant_key)
        .bind(owner_id.to_string())
        .bind(resource_id.to_string())
        .bind(date)
        .bind(category.as_str())
        .bind(now)
        .bind(now)
        .execute(&self.pool)
        .await
        .map_err(query_error)?;

        Ok(())
    }

    async fn total_since(
        &self,
        scope: &UsageScope,
        since: NaiveDate,
        category: RequestCategory,
    ) -> Result<u64, StoreError> {
        let (column, value) = scope_filter(scope);
        let sql = format!(
            "SELECT COALESCE(SUM(request_count), 0) FROM api_usage_daily \
             WHERE {} = ? AND request_date >= ? AND category = ?",
            column
        );

        let (total,): (i64,) = sqlx::query_as(&sql)
            .bind(value)
            .bind(since)
            .bind(category.as_str())
            .fetch_one(&self.pool)
            .await
            .map_err(query_error)?;

        Ok(count_from_db(total))
    }

    async fn daily_usage(
        &self,
        scope: &UsageScope,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<Vec<DailyUsageRecord>, StoreError> {
        let (column, value) = scope_filter(scope);
        let sql = format!(
            "SELECT tenant_key, owner_id, resource_id, request_date, category, request_count, updated_at \
             FROM api_usage_daily \
             WHERE {} = ? AND request_date >= ? AND request_date <= ? \
             ORDER BY request_date DESC, tenant_key, category",
            column
        );

        let rows = sqlx::query(&sql)
            .bind(value)
            .bind(start)
            .bind(end)
            .fetch_all(&self.pool)
            .await
            .map_err(query_error)?;

        rows.iter().map(record_from_row).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sqlite::SqliteConfig;

    async fn store() -> SqliteUsageStore {
        let backend = SqliteBackend::new_with_config(SqliteConfig::memory())
            .await
            .unwrap();
        SqliteUsageStore::new(&backend)
    }

    fn day(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[tokio::test]
    async fn test_first_increment_creates_row() {
        let store = store().await;
        let (owner, sheet) = (Uuid::new_v4(), Uuid::new_v4());
        let today = day(2026, 5, 20);

        store
            .increment("key-1", owner, sheet, today, RequestCategory::Write)
            .await
            .unwrap();

        let rows = store
            .daily_usage(&UsageScope::Tenant("key-1".into()), today, today)
            .await
            .unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].count, 1);
        assert_eq!(rows[0].owner_id, owner);
        assert_eq!(rows[0].resource_id, sheet);
        assert_eq!(rows[0].category, RequestCategory::Write);
    }

    #[tokio::test]
    async fn test_total_since_empty_is_zero() {
        let store = store().await;
        let total = store
            .total_since(&UsageScope::Owner(Uuid::new_v4()), day(2026, 1, 1), RequestCategory::Read)
            .await
            .unwrap();
        assert_eq!(total, 0);
    }

    #[tokio::test]
    async fn test_month_total_excludes_previous_month() {
        let store = store().await;
        let (owner, sheet) = (Uuid::new_v4(), Uuid::new_v4());

        for date in [day(2026, 4, 30), day(2026, 5, 1), day(2026, 5, 1), day(2026, 5, 19)] {
            store
                .increment("key-1", owner, sheet, date, RequestCategory::Read)
                .await
                .unwrap();
        }

        let total = store
            .total_since(&UsageScope::Owner(owner), day(2026, 5, 1), RequestCategory::Read)
            .await
            .unwrap();
        assert_eq!(total, 3);
    }
}
