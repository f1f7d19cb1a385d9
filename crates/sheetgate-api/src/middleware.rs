//! Tower middleware for the SheetGate API

use axum::{
    extract::{Path, Request, State},
    http::{header, HeaderName, HeaderValue, Method},
    middleware::Next,
    response::{IntoResponse, Response},
};
use std::time::{Duration, Instant};

use sheetgate_core::{Decision, QuotaHeaders, RequestCategory, StoreError};
use sheetgate_queue::{SubmitOutcome, UsageEvent};

use crate::error::ApiError;
use crate::state::AppState;
use crate::tenant::TenantContext;

/// Resolve the `{api_key}` path segment into a [`TenantContext`]
pub async fn tenant_middleware(
    State(state): State<AppState>,
    Path(api_key): Path<String>,
    mut request: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let tenant = match state.tenants().resolve(&api_key).await {
        Ok(Some(tenant)) => tenant,
        Ok(None) => return Err(ApiError::Unauthorized("invalid api_key".to_string())),
        Err(e) => {
            tracing::warn!(error = %e, "Tenant lookup failed");
            return Err(match e {
                StoreError::Connection(_) | StoreError::Timeout(_) => {
                    ApiError::ServiceUnavailable("Tenant directory unavailable".to_string())
                }
                other => ApiError::Internal(other.to_string()),
            });
        }
    };

    request.extensions_mut().insert(tenant);
    Ok(next.run(request).await)
}

/// Admission middleware: subscription, rate limit and quotas.
///
/// Quota headers are set on the response whether or not the request is
/// admitted.
pub async fn quota_middleware(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let tenant = request
        .extensions()
        .get::<TenantContext>()
        .cloned()
        .ok_or_else(|| ApiError::Internal("tenant context missing".to_string()))?;

    let decision = state
        .admission()
        .admit(&tenant.tenant_key, tenant.owner_id, request.method().as_str())
        .await?;

    let (mut response, headers) = match decision {
        Decision::Allow { headers } => (next.run(request).await, headers),
        Decision::Reject(rejection) => {
            tracing::info!(
                tenant_key = %tenant.tenant_key,
                reason = rejection.reason.code(),
                plan = %rejection.plan,
                "Request rejected"
            );
            let headers = rejection.headers.clone();
            (ApiError::from(rejection).into_response(), headers)
        }
    };

    apply_quota_headers(&mut response, &headers);
    Ok(response)
}

fn apply_quota_headers(response: &mut Response, quota: &QuotaHeaders) {
    let headers = response.headers_mut();
    for (name, value) in quota.pairs() {
        if let (Ok(name), Ok(value)) = (
            HeaderName::from_bytes(name.as_bytes()),
            HeaderValue::from_str(&value),
        ) {
            headers.insert(name, value);
        }
    }
}

/// Submit a usage event for every successful admitted request
pub async fn usage_tracking_middleware(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Response {
    let tenant = request.extensions().get::<TenantContext>().cloned();
    let category = RequestCategory::from_method(request.method().as_str());

    let response = next.run(request).await;

    if response.status().is_success() {
        if let Some(tenant) = tenant {
            let event = UsageEvent::new(
                tenant.tenant_key,
                tenant.owner_id,
                tenant.resource_id,
                category,
            );
            if let SubmitOutcome::Dropped(reason) = state.recorder().submit(event) {
                tracing::debug!(reason = %reason, "Usage event not recorded");
            }
        }
    }

    response
}

/// Request tracing middleware
pub async fn tracing_middleware(request: Request, next: Next) -> Response {
    let start = Instant::now();
    let method = request.method().clone();
    let path = request.uri().path().to_string();
    let request_id = request
        .extensions()
        .get::<RequestId>()
        .map(|id| id.0.clone())
        .unwrap_or_else(|| "unknown".to_string());

    let span = tracing::info_span!(
        "http_request",
        method = %method,
        path = %path,
        request_id = %request_id,
    );

    let response = {
        let _enter = span.enter();
        next.run(request).await
    };

    let latency = start.elapsed();
    let status = response.status();

    tracing::info!(
        method = %method,
        path = %path,
        status = %status.as_u16(),
        latency_ms = %latency.as_millis(),
        "Request completed"
    );

    response
}

/// Request ID middleware
pub async fn request_id_middleware(mut request: Request, next: Next) -> Response {
    let request_id = uuid::Uuid::new_v4().to_string();

    request
        .extensions_mut()
        .insert(RequestId(request_id.clone()));

    let mut response = next.run(request).await;

    if let Ok(value) = HeaderValue::from_str(&request_id) {
        response.headers_mut().insert("x-request-id", value);
    }

    response
}

/// Request ID wrapper
#[derive(Clone, Debug)]
pub struct RequestId(pub String);

/// CORS for the public data API: any origin, quota headers exposed
pub fn cors_layer() -> tower_http::cors::CorsLayer {
    use tower_http::cors::{AllowOrigin, CorsLayer};

    let exposed = [
        "x-ratelimit-limit",
        "x-ratelimit-remaining",
        "x-ratelimit-reset",
        "x-daily-quota-limit",
        "x-daily-quota-used",
        "x-monthly-quota-limit",
        "x-monthly-quota-used",
        "x-request-id",
    ]
    .map(HeaderName::from_static);

    CorsLayer::new()
        .allow_origin(AllowOrigin::any())
        .allow_methods([
            Method::GET,
            Method::HEAD,
            Method::POST,
            Method::PUT,
            Method::PATCH,
            Method::DELETE,
            Method::OPTIONS,
        ])
        .allow_headers([header::ORIGIN, header::CONTENT_TYPE, header::ACCEPT])
        .expose_headers(exposed)
        .max_age(Duration::from_secs(12 * 3600))
}

/// Timeout layer helper
#[allow(deprecated)]
pub fn timeout_layer(duration: Duration) -> tower_http::timeout::TimeoutLayer {
    tower_http::timeout::TimeoutLayer::new(duration)
}

/// Request body size limit
pub fn body_limit_layer(limit: usize) -> tower_http::limit::RequestBodyLimitLayer {
    tower_http::limit::RequestBodyLimitLayer::new(limit)
}

#[cfg(test)]
mod tests {
    use super::*;
    use sheetgate_core::{QuotaUsage, RateHeader};

    #[test]
    fn test_quota_headers_are_applied() {
        let mut response = Response::new(axum::body::Body::empty());
        let quota = QuotaHeaders {
            rate: Some(RateHeader {
                limit: 2,
                remaining: 1,
                reset: 1_700_000_000,
            }),
            daily: Some(QuotaUsage { limit: 200, used: 7 }),
            monthly: None,
        };

        apply_quota_headers(&mut response, &quota);

        let headers = response.headers();
        assert_eq!(headers["x-ratelimit-remaining"], "1");
        assert_eq!(headers["x-ratelimit-reset"], "1700000000");
        assert_eq!(headers["x-daily-quota-used"], "7");
        assert!(headers.get("x-monthly-quota-limit").is_none());
    }
}
