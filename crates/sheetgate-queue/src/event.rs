//! Usage event definitions

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use sheetgate_core::{utc_day, RequestCategory};

/// One successful, admitted request
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UsageEvent {
    pub tenant_key: String,
    pub owner_id: Uuid,
    pub resource_id: Uuid,
    pub category: RequestCategory,
    pub timestamp: DateTime<Utc>,
}

impl UsageEvent {
    /// Event stamped with the current time
    pub fn new(
        tenant_key: impl Into<String>,
        owner_id: Uuid,
        resource_id: Uuid,
        category: RequestCategory,
    ) -> Self {
        Self::at(tenant_key, owner_id, resource_id, category, Utc::now())
    }

    pub fn at(
        tenant_key: impl Into<String>,
        owner_id: Uuid,
        resource_id: Uuid,
        category: RequestCategory,
        timestamp: DateTime<Utc>,
    ) -> Self {
        Self {
            tenant_key: tenant_key.into(),
            owner_id,
            resource_id,
            category,
            timestamp,
        }
    }

    /// UTC date the event is counted under
    pub fn date(&self) -> NaiveDate {
        utc_day(self.timestamp)
    }
}
