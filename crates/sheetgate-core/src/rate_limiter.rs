//! Per-minute rate limiting over fixed windows
//!
//! A burst straddling a minute boundary gets a fresh budget at the boundary,
//! so up to twice the nominal rate can pass across two adjacent windows.
//! No smoothing is applied.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;
use tracing::warn;

use crate::category::RequestCategory;
use crate::metrics::Metrics;
use crate::window::WindowCounter;

/// Outcome of a rate check
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct RateLimitResult {
    pub allowed: bool,
    pub limit: u64,
    pub remaining: u64,
    /// Start of the next window
    pub reset_at: DateTime<Utc>,
    /// The counter store could not be reached and the check failed open
    pub degraded: bool,
}

/// Fixed-window rate limiter
#[derive(Debug, Clone)]
pub struct RateLimiter {
    counter: WindowCounter,
    metrics: Arc<Metrics>,
}

impl RateLimiter {
    pub fn new(counter: WindowCounter, metrics: Arc<Metrics>) -> Self {
        Self { counter, metrics }
    }

    /// Check a request against `limit` for the current minute
    pub async fn check_limit(
        &self,
        tenant_key: &str,
        category: RequestCategory,
        limit: u64,
    ) -> RateLimitResult {
        self.check_limit_at(tenant_key, category, limit, Utc::now())
            .await
    }

    /// Check a request against `limit` for the minute containing `now`.
    ///
    /// Never fails: an unreachable store yields an allowed, degraded result.
    pub async fn check_limit_at(
        &self,
        tenant_key: &str,
        category: RequestCategory,
        limit: u64,
        now: DateTime<Utc>,
    ) -> RateLimitResult {
        let reset_at = WindowCounter::reset_at(now);

        match self.counter.increment(tenant_key, category, now).await {
            Ok(count) => RateLimitResult {
                allowed: count <= limit,
                limit,
                remaining: limit.saturating_sub(count),
                reset_at,
                degraded: false,
            },
            Err(e) => {
                self.metrics.record_rate_store_failure();
                warn!(
                    tenant_key = %tenant_key,
                    category = %category,
                    store = %self.counter.store_name(),
                    error = %e,
                    degraded = true,
                    "Rate limit store unavailable, failing open"
                );
                RateLimitResult {
                    allowed: true,
                    limit,
                    remaining: limit,
                    reset_at,
                    degraded: true,
                }
            }
        }
    }
}
