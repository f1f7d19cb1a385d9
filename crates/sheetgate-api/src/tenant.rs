//! Tenant resolution
//!
//! Maps the API key in the request path to the published resource and its
//! owner. Account management lives outside the gateway; the in-memory
//! directory here serves tests and single-node deployments seeded from a
//! JSON file.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use tokio::sync::RwLock;
use uuid::Uuid;

use sheetgate_core::{Plan, StoreError, Subscription, SubscriptionSource, SubscriptionStatus};

/// Resolved identity of a request
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TenantContext {
    pub tenant_key: String,
    pub owner_id: Uuid,
    pub resource_id: Uuid,
}

/// Looks up the tenant behind an API key
#[async_trait]
pub trait TenantResolver: Send + Sync {
    /// `Ok(None)` when no resource is published under `api_key`
    async fn resolve(&self, api_key: &str) -> Result<Option<TenantContext>, StoreError>;
}

fn default_plan() -> String {
    "free".to_string()
}

/// One published resource, as stored in a tenants file
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TenantRecord {
    pub api_key: String,
    pub owner_id: Uuid,
    #[serde(default = "Uuid::new_v4")]
    pub resource_id: Uuid,
    /// Plan identifier; unknown values mean the free plan
    #[serde(default = "default_plan")]
    pub plan: String,
    /// Billing status; absent means active
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub period_end: Option<DateTime<Utc>>,
}

impl TenantRecord {
    fn subscription(&self) -> Subscription {
        let status = self
            .status
            .as_deref()
            .map(SubscriptionStatus::parse)
            .unwrap_or(SubscriptionStatus::Active);
        Subscription::new(Plan::parse(&self.plan), status, self.period_end)
    }
}

/// In-memory tenants and owner subscriptions
#[derive(Debug, Default)]
pub struct MemoryTenantDirectory {
    tenants: RwLock<HashMap<String, TenantContext>>,
    subscriptions: RwLock<HashMap<Uuid, Subscription>>,
}

impl MemoryTenantDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build from records. A later record for the same owner replaces the
    /// owner's subscription.
    pub fn from_records(records: impl IntoIterator<Item = TenantRecord>) -> Self {
        let mut tenants = HashMap::new();
        let mut subscriptions = HashMap::new();
        for record in records {
            subscriptions.insert(record.owner_id, record.subscription());
            tenants.insert(
                record.api_key.clone(),
                TenantContext {
                    tenant_key: record.api_key,
                    owner_id: record.owner_id,
                    resource_id: record.resource_id,
                },
            );
        }
        Self {
            tenants: RwLock::new(tenants),
            subscriptions: RwLock::new(subscriptions),
        }
    }

    /// Load a JSON array of [`TenantRecord`]s
    pub fn load_json(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)
            .map_err(|e| StoreError::Connection(format!("{}: {}", path.display(), e)))?;
        Self::from_json_str(&raw)
    }

    pub fn from_json_str(raw: &str) -> Result<Self, StoreError> {
        let records: Vec<TenantRecord> =
            serde_json::from_str(raw).map_err(|e| StoreError::Serialization(e.to_string()))?;
        Ok(Self::from_records(records))
    }

    /// Publish a resource under `api_key`
    pub async fn register(&self, api_key: &str, owner_id: Uuid, resource_id: Uuid) {
        self.tenants.write().await.insert(
            api_key.to_string(),
            TenantContext {
                tenant_key: api_key.to_string(),
                owner_id,
                resource_id,
            },
        );
    }

    /// Replace `old_key` with `new_key` for the same resource.
    ///
    /// The old key stops resolving at once. Rate windows and usage rows are
    /// keyed by tenant key, so the new key starts with fresh counters.
    /// Returns `None`, changing nothing, when `old_key` is unknown or
    /// `new_key` is already issued.
    pub async fn rotate_key(&self, old_key: &str, new_key: &str) -> Option<TenantContext> {
        let mut tenants = self.tenants.write().await;
        if tenants.contains_key(new_key) {
            return None;
        }
        let mut tenant = tenants.remove(old_key)?;
        tenant.tenant_key = new_key.to_string();
        tenants.insert(new_key.to_string(), tenant.clone());
        Some(tenant)
    }

    pub async fn set_subscription(&self, owner_id: Uuid, subscription: Subscription) {
        self.subscriptions
            .write()
            .await
            .insert(owner_id, subscription);
    }

    pub async fn len(&self) -> usize {
        self.tenants.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.tenants.read().await.is_empty()
    }
}

#[async_trait]
impl TenantResolver for MemoryTenantDirectory {
    async fn resolve(&self, api_key: &str) -> Result<Option<TenantContext>, StoreError> {
        Ok(self.tenants.read().await.get(api_key).cloned())
    }
}

#[async_trait]
impl SubscriptionSource for MemoryTenantDirectory {
    async fn owner_subscription(&self, owner_id: Uuid) -> Result<Subscription, StoreError> {
        Ok(self
            .subscriptions
            .read()
            .await
            .get(&owner_id)
            .cloned()
            .unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_unknown_key_resolves_to_none() {
        let directory = MemoryTenantDirectory::new();
        assert!(directory.resolve("nope").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_unknown_owner_is_on_free_plan() {
        let directory = MemoryTenantDirectory::new();
        let sub = directory.owner_subscription(Uuid::new_v4()).await.unwrap();
        assert_eq!(sub.plan, Plan::Free);
        assert!(sub.is_active());
    }

    #[tokio::test]
    async fn test_from_json() {
        let owner = Uuid::new_v4();
        let raw = format!(
            r#"[
                {{"api_key": "sheet-a", "owner_id": "{owner}", "plan": "pro"}},
                {{"api_key": "sheet-b", "owner_id": "{owner}", "plan": "PRO", "status": "past_due"}}
            ]"#
        );
        let directory = MemoryTenantDirectory::from_json_str(&raw).unwrap();
        assert_eq!(directory.len().await, 2);

        let tenant = directory.resolve("sheet-a").await.unwrap().unwrap();
        assert_eq!(tenant.owner_id, owner);

        let sub = directory.owner_subscription(owner).await.unwrap();
        assert_eq!(sub.plan, Plan::Pro);
        assert_eq!(sub.status, SubscriptionStatus::PastDue);
        assert!(!sub.is_active());
    }

    #[tokio::test]
    async fn test_rotate_key() {
        let directory = MemoryTenantDirectory::new();
        let (owner, resource) = (Uuid::new_v4(), Uuid::new_v4());
        directory.register("old", owner, resource).await;

        let rotated = directory.rotate_key("old", "new").await.unwrap();
        assert_eq!(rotated.tenant_key, "new");
        assert_eq!(rotated.resource_id, resource);
        assert!(directory.resolve("old").await.unwrap().is_none());
        assert_eq!(directory.resolve("new").await.unwrap(), Some(rotated));

        assert!(directory.rotate_key("old", "newer").await.is_none());
    }

    #[tokio::test]
    async fn test_rotate_onto_issued_key_is_refused() {
        let directory = MemoryTenantDirectory::new();
        let (a, b) = (Uuid::new_v4(), Uuid::new_v4());
        directory.register("sheet-a", Uuid::new_v4(), a).await;
        directory.register("sheet-b", Uuid::new_v4(), b).await;

        assert!(directory.rotate_key("sheet-a", "sheet-b").await.is_none());
        assert_eq!(directory.resolve("sheet-a").await.unwrap().unwrap().resource_id, a);
        assert_eq!(directory.resolve("sheet-b").await.unwrap().unwrap().resource_id, b);
    }

    #[test]
    fn test_bad_json_is_serialization_error() {
        let err = MemoryTenantDirectory::from_json_str("{not json").unwrap_err();
        assert!(matches!(err, StoreError::Serialization(_)));
    }
}
