//! Application State
//!
//! Centralizes access to admission, usage recording and tenant lookup.

use std::sync::Arc;

use sheetgate_core::{AdmissionController, Metrics, UsageStore};
use sheetgate_queue::UsageRecorder;

use crate::tenant::TenantResolver;

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    admission: AdmissionController,
    recorder: Arc<UsageRecorder>,
    tenants: Arc<dyn TenantResolver>,
    usage: Arc<dyn UsageStore>,
    metrics: Arc<Metrics>,
}

impl AppState {
    /// Create new application state
    pub fn new(
        admission: AdmissionController,
        recorder: Arc<UsageRecorder>,
        tenants: Arc<dyn TenantResolver>,
        usage: Arc<dyn UsageStore>,
        metrics: Arc<Metrics>,
    ) -> Self {
        Self {
            admission,
            recorder,
            tenants,
            usage,
            metrics,
        }
    }

    pub fn admission(&self) -> &AdmissionController {
        &self.admission
    }

    /// Get usage recorder (cloned Arc for sharing)
    pub fn recorder(&self) -> Arc<UsageRecorder> {
        self.recorder.clone()
    }

    pub fn tenants(&self) -> Arc<dyn TenantResolver> {
        self.tenants.clone()
    }

    /// Get usage store (read side, for analytics)
    pub fn usage(&self) -> Arc<dyn UsageStore> {
        self.usage.clone()
    }

    /// Get metrics collector (cloned Arc for sharing)
    pub fn metrics(&self) -> Arc<Metrics> {
        self.metrics.clone()
    }
}
