//! Admission control
//!
//! Runs once per request, before any upstream work, in this order:
//! 1. subscription gate ("payment required")
//! 2. per-minute rate limit for the request category
//! 3. daily write quota (writes only, when the plan sets one)
//! 4. monthly quota for the request category
//!
//! The first failing step short-circuits to a rejection. Counter and usage
//! store failures never reject: the affected check is skipped and logged.

use chrono::{DateTime, Datelike, Duration as ChronoDuration, NaiveDate, NaiveTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::category::RequestCategory;
use crate::metrics::Metrics;
use crate::plan::{category_limit, Plan, PlanCatalog};
use crate::rate_limiter::{RateLimitResult, RateLimiter};
use crate::store::{with_deadline, UsageScope, UsageStore};
use crate::subscription::SubscriptionSource;
use crate::usage::{first_of_month, utc_day};

pub const HEADER_RATE_LIMIT: &str = "X-RateLimit-Limit";
pub const HEADER_RATE_REMAINING: &str = "X-RateLimit-Remaining";
pub const HEADER_RATE_RESET: &str = "X-RateLimit-Reset";
pub const HEADER_DAILY_LIMIT: &str = "X-Daily-Quota-Limit";
pub const HEADER_DAILY_USED: &str = "X-Daily-Quota-Used";
pub const HEADER_MONTHLY_LIMIT: &str = "X-Monthly-Quota-Limit";
pub const HEADER_MONTHLY_USED: &str = "X-Monthly-Quota-Used";

/// Errors that prevent an admission decision from being made
#[derive(Debug, thiserror::Error)]
pub enum AdmissionError {
    #[error("Subscription lookup failed: {0}")]
    SubscriptionLookup(String),
}

/// Which usage rows quota totals are summed over
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum QuotaScope {
    /// All resources of the owner share the plan's quotas
    #[default]
    Owner,
    /// Each tenant key has its own quota totals
    Tenant,
}

impl QuotaScope {
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "owner" => Some(Self::Owner),
            "tenant" => Some(Self::Tenant),
            _ => None,
        }
    }

    fn usage_scope(&self, tenant_key: &str, owner_id: Uuid) -> UsageScope {
        match self {
            Self::Owner => UsageScope::Owner(owner_id),
            Self::Tenant => UsageScope::Tenant(tenant_key.to_string()),
        }
    }
}

/// Admission settings
#[derive(Debug, Clone, Copy)]
pub struct AdmissionConfig {
    /// Deadline for each usage-total read
    pub usage_read_timeout: Duration,
    pub quota_scope: QuotaScope,
}

impl Default for AdmissionConfig {
    fn default() -> Self {
        Self {
            usage_read_timeout: Duration::from_millis(500),
            quota_scope: QuotaScope::Owner,
        }
    }
}

/// Rate-limit header values
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct RateHeader {
    pub limit: u64,
    pub remaining: u64,
    /// Unix seconds of the next window start
    pub reset: i64,
}

impl From<&RateLimitResult> for RateHeader {
    fn from(result: &RateLimitResult) -> Self {
        Self {
            limit: result.limit,
            remaining: result.remaining,
            reset: result.reset_at.timestamp(),
        }
    }
}

/// Quota ceiling and the usage counted against it
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct QuotaUsage {
    pub limit: u64,
    pub used: u64,
}

/// Headers to set on the response, admitted or rejected
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct QuotaHeaders {
    pub rate: Option<RateHeader>,
    pub daily: Option<QuotaUsage>,
    pub monthly: Option<QuotaUsage>,
}

impl QuotaHeaders {
    /// Header name/value pairs in a stable order
    pub fn pairs(&self) -> Vec<(&'static str, String)> {
        let mut pairs = Vec::with_capacity(7);
        if let Some(rate) = &self.rate {
            pairs.push((HEADER_RATE_LIMIT, rate.limit.to_string()));
            pairs.push((HEADER_RATE_REMAINING, rate.remaining.to_string()));
            pairs.push((HEADER_RATE_RESET, rate.reset.to_string()));
        }
        if let Some(daily) = &self.daily {
            pairs.push((HEADER_DAILY_LIMIT, daily.limit.to_string()));
            pairs.push((HEADER_DAILY_USED, daily.used.to_string()));
        }
        if let Some(monthly) = &self.monthly {
            pairs.push((HEADER_MONTHLY_LIMIT, monthly.limit.to_string()));
            pairs.push((HEADER_MONTHLY_USED, monthly.used.to_string()));
        }
        pairs
    }
}

/// Which policy rejected a request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RejectReason {
    SubscriptionInactive,
    RateLimited,
    DailyQuotaExceeded,
    MonthlyQuotaExceeded,
}

impl RejectReason {
    /// Machine-readable error code
    pub fn code(&self) -> &'static str {
        match self {
            Self::SubscriptionInactive => "SUBSCRIPTION_INACTIVE",
            Self::RateLimited => "RATE_LIMITED",
            Self::DailyQuotaExceeded => "DAILY_QUOTA_EXCEEDED",
            Self::MonthlyQuotaExceeded => "MONTHLY_QUOTA_EXCEEDED",
        }
    }

    pub fn status(&self) -> RejectStatus {
        match self {
            Self::SubscriptionInactive => RejectStatus::PaymentRequired,
            _ => RejectStatus::TooManyRequests,
        }
    }
}

/// Client-visible rejection status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum RejectStatus {
    /// HTTP 402
    PaymentRequired,
    /// HTTP 429
    TooManyRequests,
}

impl RejectStatus {
    pub fn as_u16(&self) -> u16 {
        match self {
            Self::PaymentRequired => 402,
            Self::TooManyRequests => 429,
        }
    }
}

/// A policy rejection
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Rejection {
    pub reason: RejectReason,
    pub status: RejectStatus,
    pub plan: Plan,
    pub message: String,
    /// When the limiting budget resets, if it resets on its own
    pub retry_at: Option<DateTime<Utc>>,
    pub headers: QuotaHeaders,
}

/// Outcome of admission
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decision {
    Allow { headers: QuotaHeaders },
    Reject(Rejection),
}

impl Decision {
    pub fn is_allowed(&self) -> bool {
        matches!(self, Decision::Allow { .. })
    }

    pub fn headers(&self) -> &QuotaHeaders {
        match self {
            Decision::Allow { headers } => headers,
            Decision::Reject(rejection) => &rejection.headers,
        }
    }

    pub fn rejection(&self) -> Option<&Rejection> {
        match self {
            Decision::Allow { .. } => None,
            Decision::Reject(rejection) => Some(rejection),
        }
    }
}

/// Accepts or rejects requests for a tenant key
#[derive(Clone)]
pub struct AdmissionController {
    subscriptions: Arc<dyn SubscriptionSource>,
    plans: PlanCatalog,
    rate_limiter: RateLimiter,
    usage: Arc<dyn UsageStore>,
    metrics: Arc<Metrics>,
    config: AdmissionConfig,
}

impl AdmissionController {
    pub fn new(
        subscriptions: Arc<dyn SubscriptionSource>,
        plans: PlanCatalog,
        rate_limiter: RateLimiter,
        usage: Arc<dyn UsageStore>,
        metrics: Arc<Metrics>,
        config: AdmissionConfig,
    ) -> Self {
        Self {
            subscriptions,
            plans,
            rate_limiter,
            usage,
            metrics,
            config,
        }
    }

    pub fn config(&self) -> &AdmissionConfig {
        &self.config
    }

    /// Decide on a request arriving now
    pub async fn admit(
        &self,
        tenant_key: &str,
        owner_id: Uuid,
        http_method: &str,
    ) -> Result<Decision, AdmissionError> {
        self.admit_at(tenant_key, owner_id, http_method, Utc::now())
            .await
    }

    /// Decide on a request arriving at `now`
    pub async fn admit_at(
        &self,
        tenant_key: &str,
        owner_id: Uuid,
        http_method: &str,
        now: DateTime<Utc>,
    ) -> Result<Decision, AdmissionError> {
        let subscription = self
            .subscriptions
            .owner_subscription(owner_id)
            .await
            .map_err(|e| AdmissionError::SubscriptionLookup(e.to_string()))?;
        let plan = subscription.plan;
        let mut headers = QuotaHeaders::default();

        // 1. Subscription gate
        if !subscription.is_active_at(now) {
            return Ok(self.reject(
                RejectReason::SubscriptionInactive,
                plan,
                format!(
                    "Your {} subscription is not active. Please upgrade or renew your plan.",
                    plan
                ),
                None,
                headers,
            ));
        }

        let limits = self.plans.limits_for(plan);
        let category = RequestCategory::from_method(http_method);

        // 2. Per-minute rate limit
        let limit = category_limit(&limits, category);
        let rate = self
            .rate_limiter
            .check_limit_at(tenant_key, category, limit, now)
            .await;
        headers.rate = Some(RateHeader::from(&rate));
        if !rate.allowed {
            return Ok(self.reject(
                RejectReason::RateLimited,
                plan,
                format!(
                    "You have exceeded the rate limit of {} requests per minute for {} operations",
                    rate.limit, category
                ),
                Some(rate.reset_at),
                headers,
            ));
        }

        let scope = self.config.quota_scope.usage_scope(tenant_key, owner_id);

        // 3. Daily write quota
        if category.is_write() && limits.daily_write_quota > 0 {
            let quota = limits.daily_write_quota;
            if let Some(used) = self.usage_total(&scope, utc_day(now), category).await {
                headers.daily = Some(QuotaUsage { limit: quota, used });
                if used >= quota {
                    return Ok(self.reject(
                        RejectReason::DailyQuotaExceeded,
                        plan,
                        format!(
                            "You have exceeded your daily quota of {} writes. Quota resets at midnight UTC.",
                            quota
                        ),
                        Some(next_utc_midnight(now)),
                        headers,
                    ));
                }
            }
        }

        // 4. Monthly quota
        let quota = limits.monthly_quota(category);
        if quota > 0 {
            if let Some(used) = self.usage_total(&scope, first_of_month(now), category).await {
                headers.monthly = Some(QuotaUsage { limit: quota, used });
                if used >= quota {
                    return Ok(self.reject(
                        RejectReason::MonthlyQuotaExceeded,
                        plan,
                        format!(
                            "You have exceeded your monthly quota of {} {} operations on the {} plan. Please upgrade your plan or wait until next month.",
                            quota, category, plan
                        ),
                        Some(next_month_start(now)),
                        headers,
                    ));
                }
            }
        }

        self.metrics.record_admitted();
        debug!(tenant_key = %tenant_key, category = %category, plan = %plan, "Request admitted");
        Ok(Decision::Allow { headers })
    }

    /// Usage total for a quota check; `None` when the store is unavailable
    async fn usage_total(
        &self,
        scope: &UsageScope,
        since: NaiveDate,
        category: RequestCategory,
    ) -> Option<u64> {
        let read = self.usage.total_since(scope, since, category);
        match with_deadline(self.config.usage_read_timeout, read).await {
            Ok(total) => Some(total),
            Err(e) => {
                self.metrics.record_usage_read_failure();
                warn!(
                    scope = ?scope,
                    category = %category,
                    store = %self.usage.name(),
                    error = %e,
                    degraded = true,
                    "Usage store unavailable, skipping quota check"
                );
                None
            }
        }
    }

    fn reject(
        &self,
        reason: RejectReason,
        plan: Plan,
        message: String,
        retry_at: Option<DateTime<Utc>>,
        headers: QuotaHeaders,
    ) -> Decision {
        self.metrics.record_rejected(reason);
        debug!(reason = reason.code(), plan = %plan, "Request rejected");
        Decision::Reject(Rejection {
            reason,
            status: reason.status(),
            plan,
            message,
            retry_at,
            headers,
        })
    }
}

impl std::fmt::Debug for AdmissionController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AdmissionController")
            .field("rate_limiter", &self.rate_limiter)
            .field("usage", &self.usage.name())
            .field("config", &self.config)
            .finish()
    }
}

fn next_utc_midnight(now: DateTime<Utc>) -> DateTime<Utc> {
    let tomorrow = now.date_naive() + ChronoDuration::days(1);
    tomorrow.and_time(NaiveTime::MIN).and_utc()
}

fn next_month_start(now: DateTime<Utc>) -> DateTime<Utc> {
    let (year, month) = if now.month() == 12 {
        (now.year() + 1, 1)
    } else {
        (now.year(), now.month() + 1)
    };
    NaiveDate::from_ymd_opt(year, month, 1)
        .map(|d| d.and_time(NaiveTime::MIN).and_utc())
        .unwrap_or_else(|| next_utc_midnight(now))
}
