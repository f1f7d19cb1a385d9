//! Owner subscriptions
//!
//! Subscriptions are owned by the account-management side of the gateway;
//! this crate only reads them through [`SubscriptionSource`].

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::plan::Plan;
use crate::store::StoreError;

/// Billing status reported by the payment provider
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubscriptionStatus {
    Active,
    Trialing,
    PastDue,
    Canceled,
    Incomplete,
    Unpaid,
}

impl SubscriptionStatus {
    /// Parse a provider status string. Unrecognised values are `Incomplete`.
    pub fn parse(value: &str) -> Self {
        match value.trim().to_ascii_lowercase().as_str() {
            "active" => Self::Active,
            "trialing" => Self::Trialing,
            "past_due" => Self::PastDue,
            "canceled" | "cancelled" => Self::Canceled,
            "unpaid" => Self::Unpaid,
            _ => Self::Incomplete,
        }
    }
}

/// Subscription attached to a resource owner
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Subscription {
    pub plan: Plan,
    pub status: SubscriptionStatus,
    /// End of the paid period (None = open-ended)
    pub period_end: Option<DateTime<Utc>>,
}

impl Default for Subscription {
    fn default() -> Self {
        Self::free()
    }
}

impl Subscription {
    /// The free tier, which never lapses
    pub fn free() -> Self {
        Self {
            plan: Plan::Free,
            status: SubscriptionStatus::Active,
            period_end: None,
        }
    }

    pub fn new(plan: Plan, status: SubscriptionStatus, period_end: Option<DateTime<Utc>>) -> Self {
        Self {
            plan,
            status,
            period_end,
        }
    }

    /// Whether requests may be admitted under this subscription at `now`
    pub fn is_active_at(&self, now: DateTime<Utc>) -> bool {
        if self.plan.is_free() {
            return true;
        }
        let status_ok = matches!(
            self.status,
            SubscriptionStatus::Active | SubscriptionStatus::Trialing
        );
        let period_ok = self.period_end.map(|end| end > now).unwrap_or(true);
        status_ok && period_ok
    }

    pub fn is_active(&self) -> bool {
        self.is_active_at(Utc::now())
    }
}

/// Read access to owner subscriptions
#[async_trait]
pub trait SubscriptionSource: Send + Sync {
    /// Subscription for an owner. Owners without a record are on the free tier.
    async fn owner_subscription(&self, owner_id: Uuid) -> Result<Subscription, StoreError>;
}

/// In-memory subscription source (for testing and single-node setups)
#[derive(Debug, Default)]
pub struct MemorySubscriptionSource {
    subscriptions: RwLock<HashMap<Uuid, Subscription>>,
}

impl MemorySubscriptionSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn set(&self, owner_id: Uuid, subscription: Subscription) {
        self.subscriptions
            .write()
            .await
            .insert(owner_id, subscription);
    }
}

#[async_trait]
impl SubscriptionSource for MemorySubscriptionSource {
    async fn owner_subscription(&self, owner_id: Uuid) -> Result<Subscription, StoreError> {
        let subscriptions = self.subscriptions.read().await;
        Ok(subscriptions.get(&owner_id).cloned().unwrap_or_default())
    }
}
