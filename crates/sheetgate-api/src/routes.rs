//! API routes for SheetGate endpoints

use axum::{
    extract::{Extension, Query, State},
    http::{header, Method},
    middleware,
    response::IntoResponse,
    routing::{any, get},
    Json, Router,
};
use chrono::{Duration as ChronoDuration, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use uuid::Uuid;

use sheetgate_core::{DailyUsageRecord, RequestCategory, UsageScope};

use crate::error::ApiResult;
use crate::middleware::{quota_middleware, tenant_middleware, usage_tracking_middleware};
use crate::state::AppState;
use crate::tenant::TenantContext;

pub const DEFAULT_USAGE_DAYS: u32 = 30;
pub const MAX_USAGE_DAYS: u32 = 90;

/// Health check response
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub timestamp: chrono::DateTime<Utc>,
}

/// Basic health check handler (lightweight)
pub async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        timestamp: Utc::now(),
    })
}

/// Prometheus text exposition of the gateway counters
pub async fn prometheus_metrics(State(state): State<AppState>) -> impl IntoResponse {
    let body = state.metrics().snapshot().to_prometheus();
    (
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        body,
    )
}

/// Acknowledgement returned by the data route
#[derive(Debug, Serialize, Deserialize)]
pub struct DataAck {
    pub tenant_key: String,
    pub resource_id: Uuid,
    pub method: String,
    pub category: RequestCategory,
    pub accepted: bool,
}

/// Admitted data request. Fetching the upstream spreadsheet happens
/// behind this gateway; here the request is only acknowledged.
pub async fn tenant_data(
    Extension(tenant): Extension<TenantContext>,
    method: Method,
) -> Json<DataAck> {
    Json(DataAck {
        tenant_key: tenant.tenant_key,
        resource_id: tenant.resource_id,
        category: RequestCategory::from_method(method.as_str()),
        method: method.to_string(),
        accepted: true,
    })
}

#[derive(Debug, Deserialize)]
pub struct UsageQuery {
    /// Raw so that junk falls back to the default instead of a 400
    pub days: Option<String>,
}

impl UsageQuery {
    /// Requested window length: missing, unparseable or non-positive values
    /// mean the default, larger values are capped.
    pub fn days(&self) -> u32 {
        self.days
            .as_deref()
            .and_then(|raw| raw.trim().parse::<i64>().ok())
            .filter(|days| *days > 0)
            .map(|days| days.min(i64::from(MAX_USAGE_DAYS)) as u32)
            .unwrap_or(DEFAULT_USAGE_DAYS)
    }
}

#[derive(Debug, Default, Serialize, Deserialize)]
pub struct UsageTotals {
    pub read: u64,
    pub write: u64,
}

/// One day of usage; days without traffic are reported with zero counts
#[derive(Debug, Serialize, Deserialize)]
pub struct DailySummary {
    pub date: NaiveDate,
    pub read: u64,
    pub write: u64,
    pub total: u64,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct UsageReport {
    pub tenant_key: String,
    pub period_days: u32,
    pub start: NaiveDate,
    pub end: NaiveDate,
    pub totals: UsageTotals,
    /// Oldest first, one entry per day in `start..=end`
    pub daily: Vec<DailySummary>,
}

fn summarize(records: &[DailyUsageRecord], start: NaiveDate, end: NaiveDate) -> Vec<DailySummary> {
    let mut days: BTreeMap<NaiveDate, UsageTotals> = start
        .iter_days()
        .take_while(|day| *day <= end)
        .map(|day| (day, UsageTotals::default()))
        .collect();

    for record in records {
        if let Some(totals) = days.get_mut(&record.date) {
            match record.category {
                RequestCategory::Read => totals.read += record.count,
                RequestCategory::Write => totals.write += record.count,
            }
        }
    }

    days.into_iter()
        .map(|(date, t)| DailySummary {
            date,
            read: t.read,
            write: t.write,
            total: t.read + t.write,
        })
        .collect()
}

/// Daily usage of one API key over the last `days` days (today included)
pub async fn usage_report(
    State(state): State<AppState>,
    Extension(tenant): Extension<TenantContext>,
    Query(query): Query<UsageQuery>,
) -> ApiResult<Json<UsageReport>> {
    let days = query.days();
    let end = Utc::now().date_naive();
    let start = end - ChronoDuration::days(i64::from(days) - 1);
    let scope = UsageScope::Tenant(tenant.tenant_key.clone());
    let records = state.usage().daily_usage(&scope, start, end).await?;

    let daily = summarize(&records, start, end);
    let totals = UsageTotals {
        read: daily.iter().map(|d| d.read).sum(),
        write: daily.iter().map(|d| d.write).sum(),
    };

    Ok(Json(UsageReport {
        tenant_key: tenant.tenant_key,
        period_days: days,
        start,
        end,
        totals,
        daily,
    }))
}

/// Build the API router
pub fn api_router(state: AppState) -> Router {
    // Layers added last run first: tenant, then quota, then usage tracking
    let data = Router::new()
        .route("/v1/{api_key}", any(tenant_data))
        .route_layer(middleware::from_fn_with_state(
            state.clone(),
            usage_tracking_middleware,
        ))
        .route_layer(middleware::from_fn_with_state(
            state.clone(),
            quota_middleware,
        ))
        .route_layer(middleware::from_fn_with_state(
            state.clone(),
            tenant_middleware,
        ));

    let analytics = Router::new()
        .route("/v1/{api_key}/usage", get(usage_report))
        .route_layer(middleware::from_fn_with_state(
            state.clone(),
            tenant_middleware,
        ));

    Router::new()
        .route("/health", get(health))
        .route("/metrics", get(prometheus_metrics))
        .merge(data)
        .merge(analytics)
        .with_state(state)
}
