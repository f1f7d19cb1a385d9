//! # SheetGate Core
//!
//! Admission control and usage accounting for the SheetGate API gateway.
//!
//! Features:
//! - Fixed-window per-minute rate limiting over a shared counter store
//! - Plan catalogue with daily and monthly quota ceilings
//! - Subscription gating ("payment required" for lapsed paid plans)
//! - Durable usage counters behind a pluggable `UsageStore`
//! - Fail-open handling of backing-store outages

pub mod admission;
pub mod category;
pub mod metrics;
pub mod plan;
pub mod rate_limiter;
pub mod store;
pub mod subscription;
pub mod usage;
pub mod window;

pub use admission::{
    AdmissionConfig, AdmissionController, AdmissionError, Decision, QuotaHeaders, QuotaScope,
    QuotaUsage, RateHeader, RejectReason, RejectStatus, Rejection,
};
pub use category::RequestCategory;
pub use metrics::{Metrics, MetricsSnapshot};
pub use plan::{category_limit, limits_for, Plan, PlanCatalog, PlanLimits};
pub use rate_limiter::{RateLimitResult, RateLimiter};
pub use store::{CounterStore, DailyUsageRecord, StoreError, UsageScope, UsageStore};
pub use subscription::{
    MemorySubscriptionSource, Subscription, SubscriptionSource, SubscriptionStatus,
};
pub use usage::{first_of_month, utc_day, MemoryUsageStore};
pub use window::{MemoryCounterStore, WindowCounter};
