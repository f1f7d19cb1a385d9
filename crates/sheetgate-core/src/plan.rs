//! Subscription plan catalogue and quota policy
//!
//! Limits are fixed per tier and looked up, never mutated. Anything that
//! does not name a known tier gets the free tier's limits.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

use crate::category::RequestCategory;

/// Subscription tier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum Plan {
    #[default]
    Free,
    Starter,
    Pro,
    Enterprise,
}

impl Plan {
    /// Parse a plan identifier. Unknown identifiers fall back to `Free`.
    pub fn parse(value: &str) -> Self {
        match value.trim().to_ascii_lowercase().as_str() {
            "starter" => Self::Starter,
            "pro" => Self::Pro,
            "enterprise" => Self::Enterprise,
            _ => Self::Free,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Free => "free",
            Self::Starter => "starter",
            Self::Pro => "pro",
            Self::Enterprise => "enterprise",
        }
    }

    pub fn is_free(&self) -> bool {
        matches!(self, Self::Free)
    }
}

impl fmt::Display for Plan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Rate limits, quotas, pricing and feature flags of one plan tier.
///
/// A quota of `0` disables that ceiling.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlanLimits {
    /// READ requests per minute
    pub per_minute_read: u64,
    /// WRITE requests per minute
    pub per_minute_write: u64,
    /// WRITE requests per UTC day
    pub daily_write_quota: u64,
    /// READ requests per calendar month
    pub monthly_read_quota: u64,
    /// WRITE requests per calendar month
    pub monthly_write_quota: u64,
    /// Monthly price in cents (USD)
    pub monthly_price_cents: u32,
    /// Annual price in cents (USD), 0 when negotiated
    pub annual_price_cents: u32,
    /// Minimum response cache TTL enforced on this plan
    pub cache_min_ttl_secs: u32,
    pub custom_domain: bool,
    pub priority_support: bool,
}

impl PlanLimits {
    /// Monthly quota for a category
    pub fn monthly_quota(&self, category: RequestCategory) -> u64 {
        match category {
            RequestCategory::Read => self.monthly_read_quota,
            RequestCategory::Write => self.monthly_write_quota,
        }
    }
}

const FREE: PlanLimits = PlanLimits {
    per_minute_read: 60,
    per_minute_write: 2,
    daily_write_quota: 200,
    monthly_read_quota: 10_000,
    monthly_write_quota: 2_000,
    monthly_price_cents: 0,
    annual_price_cents: 0,
    cache_min_ttl_secs: 60,
    custom_domain: false,
    priority_support: false,
};

const STARTER: PlanLimits = PlanLimits {
    per_minute_read: 50,
    per_minute_write: 10,
    daily_write_quota: 500,
    monthly_read_quota: 50_000,
    monthly_write_quota: 5_000,
    monthly_price_cents: 499,
    annual_price_cents: 4_799,
    cache_min_ttl_secs: 30,
    custom_domain: false,
    priority_support: false,
};

const PRO: PlanLimits = PlanLimits {
    per_minute_read: 200,
    per_minute_write: 50,
    daily_write_quota: 2_000,
    monthly_read_quota: 500_000,
    monthly_write_quota: 50_000,
    monthly_price_cents: 1_999,
    annual_price_cents: 19_199,
    cache_min_ttl_secs: 10,
    custom_domain: true,
    priority_support: true,
};

const ENTERPRISE: PlanLimits = PlanLimits {
    per_minute_read: 1_000,
    per_minute_write: 200,
    daily_write_quota: 100_000,
    monthly_read_quota: 10_000_000,
    monthly_write_quota: 1_000_000,
    monthly_price_cents: 9_900,
    annual_price_cents: 0,
    cache_min_ttl_secs: 0,
    custom_domain: true,
    priority_support: true,
};

/// Limits for a plan tier
pub fn limits_for(plan: Plan) -> PlanLimits {
    match plan {
        Plan::Free => FREE,
        Plan::Starter => STARTER,
        Plan::Pro => PRO,
        Plan::Enterprise => ENTERPRISE,
    }
}

/// Per-minute limit that applies to a category
pub fn category_limit(limits: &PlanLimits, category: RequestCategory) -> u64 {
    match category {
        RequestCategory::Read => limits.per_minute_read,
        RequestCategory::Write => limits.per_minute_write,
    }
}

/// Plan lookup with optional per-tier overrides.
///
/// Negotiated enterprise contracts replace a tier's limits here; every
/// other tier resolves to the standard catalogue.
#[derive(Debug, Clone, Default)]
pub struct PlanCatalog {
    overrides: HashMap<Plan, PlanLimits>,
}

impl PlanCatalog {
    /// The standard catalogue with no overrides
    pub fn standard() -> Self {
        Self::default()
    }

    /// Replace the limits of one tier
    pub fn with_limits(mut self, plan: Plan, limits: PlanLimits) -> Self {
        self.overrides.insert(plan, limits);
        self
    }

    pub fn limits_for(&self, plan: Plan) -> PlanLimits {
        self.overrides
            .get(&plan)
            .copied()
            .unwrap_or_else(|| limits_for(plan))
    }
}
