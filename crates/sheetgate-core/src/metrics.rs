//! Admission and usage-pipeline counters
//!
//! Degraded-mode events (store outages, dropped usage events) are never
//! surfaced to clients, so these counters are how operators see them.

use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};

use crate::admission::RejectReason;

/// Process-wide metrics collector
#[derive(Debug, Default)]
pub struct Metrics {
    /// Requests admitted
    pub admitted: AtomicU64,
    /// Rejected: subscription inactive
    pub rejected_payment: AtomicU64,
    /// Rejected: per-minute rate limit
    pub rejected_rate: AtomicU64,
    /// Rejected: daily write quota
    pub rejected_daily: AtomicU64,
    /// Rejected: monthly quota
    pub rejected_monthly: AtomicU64,
    /// Rate checks that failed open
    pub rate_store_failures: AtomicU64,
    /// Quota reads that failed open
    pub usage_read_failures: AtomicU64,
    /// Usage events accepted into the buffer
    pub events_submitted: AtomicU64,
    /// Usage events dropped because the buffer was full
    pub events_dropped_full: AtomicU64,
    /// Usage events dropped because the recorder was shutting down
    pub events_dropped_closed: AtomicU64,
    /// Usage events written to the usage store
    pub events_persisted: AtomicU64,
    /// Usage events whose write failed or timed out
    pub events_failed: AtomicU64,
}

impl Metrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_admitted(&self) {
        self.admitted.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_rejected(&self, reason: RejectReason) {
        let counter = match reason {
            RejectReason::SubscriptionInactive => &self.rejected_payment,
            RejectReason::RateLimited => &self.rejected_rate,
            RejectReason::DailyQuotaExceeded => &self.rejected_daily,
            RejectReason::MonthlyQuotaExceeded => &self.rejected_monthly,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_rate_store_failure(&self) {
        self.rate_store_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_usage_read_failure(&self) {
        self.usage_read_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_event_submitted(&self) {
        self.events_submitted.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_event_dropped_full(&self) {
        self.events_dropped_full.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_event_dropped_closed(&self) {
        self.events_dropped_closed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_event_persisted(&self) {
        self.events_persisted.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_event_failed(&self) {
        self.events_failed.fetch_add(1, Ordering::Relaxed);
    }

    /// Get snapshot of all metrics
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            admitted: self.admitted.load(Ordering::Relaxed),
            rejected_payment: self.rejected_payment.load(Ordering::Relaxed),
            rejected_rate: self.rejected_rate.load(Ordering::Relaxed),
            rejected_daily: self.rejected_daily.load(Ordering::Relaxed),
            rejected_monthly: self.rejected_monthly.load(Ordering::Relaxed),
            rate_store_failures: self.rate_store_failures.load(Ordering::Relaxed),
            usage_read_failures: self.usage_read_failures.load(Ordering::Relaxed),
            events_submitted: self.events_submitted.load(Ordering::Relaxed),
            events_dropped_full: self.events_dropped_full.load(Ordering::Relaxed),
            events_dropped_closed: self.events_dropped_closed.load(Ordering::Relaxed),
            events_persisted: self.events_persisted.load(Ordering::Relaxed),
            events_failed: self.events_failed.load(Ordering::Relaxed),
        }
    }
}

/// Snapshot of metrics at a point in time
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetricsSnapshot {
    pub admitted: u64,
    pub rejected_payment: u64,
    pub rejected_rate: u64,
    pub rejected_daily: u64,
    pub rejected_monthly: u64,
    pub rate_store_failures: u64,
    pub usage_read_failures: u64,
    pub events_submitted: u64,
    pub events_dropped_full: u64,
    pub events_dropped_closed: u64,
    pub events_persisted: u64,
    pub events_failed: u64,
}

impl MetricsSnapshot {
    /// Export metrics in Prometheus text format
    pub fn to_prometheus(&self) -> String {
        let mut output = String::new();

        output.push_str("# HELP sheetgate_requests_admitted_total Requests admitted\n");
        output.push_str("# TYPE sheetgate_requests_admitted_total counter\n");
        output.push_str(&format!("sheetgate_requests_admitted_total {}\n", self.admitted));

        output.push_str("# HELP sheetgate_requests_rejected_total Requests rejected by policy\n");
        output.push_str("# TYPE sheetgate_requests_rejected_total counter\n");
        for (reason, value) in [
            ("subscription_inactive", self.rejected_payment),
            ("rate_limited", self.rejected_rate),
            ("daily_quota", self.rejected_daily),
            ("monthly_quota", self.rejected_monthly),
        ] {
            output.push_str(&format!(
                "sheetgate_requests_rejected_total{{reason=\"{}\"}} {}\n",
                reason, value
            ));
        }

        output.push_str("# HELP sheetgate_degraded_checks_total Admission checks that failed open\n");
        output.push_str("# TYPE sheetgate_degraded_checks_total counter\n");
        output.push_str(&format!(
            "sheetgate_degraded_checks_total{{store=\"counter\"}} {}\n",
            self.rate_store_failures
        ));
        output.push_str(&format!(
            "sheetgate_degraded_checks_total{{store=\"usage\"}} {}\n",
            self.usage_read_failures
        ));

        output.push_str("# HELP sheetgate_usage_events_total Usage events by outcome\n");
        output.push_str("# TYPE sheetgate_usage_events_total counter\n");
        for (outcome, value) in [
            ("submitted", self.events_submitted),
            ("dropped_full", self.events_dropped_full),
            ("dropped_closed", self.events_dropped_closed),
            ("persisted", self.events_persisted),
            ("failed", self.events_failed),
        ] {
            output.push_str(&format!(
                "sheetgate_usage_events_total{{outcome=\"{}\"}} {}\n",
                outcome, value
            ));
        }

        output
    }
}
