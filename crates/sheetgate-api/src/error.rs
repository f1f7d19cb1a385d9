//! API error types with proper HTTP mapping

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;

use sheetgate_core::{AdmissionError, Plan, RejectStatus, Rejection, StoreError};

/// API result type alias
pub type ApiResult<T> = Result<T, ApiError>;

/// API error type
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("Payment required: {message}")]
    PaymentRequired { message: String, plan: Plan },

    #[error("{code}: {message}")]
    QuotaExceeded {
        code: &'static str,
        message: String,
        plan: Plan,
        /// Unix seconds at which the exhausted budget resets
        retry_after: Option<i64>,
    },

    #[error("Service unavailable: {0}")]
    ServiceUnavailable(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

/// Error response body
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: ErrorBody,
}

#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub code: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, code, message, details) = match self {
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, "NOT_FOUND", msg, None),
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, "BAD_REQUEST", msg, None),
            ApiError::Unauthorized(msg) => (StatusCode::UNAUTHORIZED, "UNAUTHORIZED", msg, None),
            ApiError::PaymentRequired { message, plan } => (
                StatusCode::PAYMENT_REQUIRED,
                "SUBSCRIPTION_INACTIVE",
                message,
                Some(serde_json::json!({ "plan": plan })),
            ),
            ApiError::QuotaExceeded {
                code,
                message,
                plan,
                retry_after,
            } => (
                StatusCode::TOO_MANY_REQUESTS,
                code,
                message,
                Some(serde_json::json!({ "plan": plan, "retry_after": retry_after })),
            ),
            ApiError::ServiceUnavailable(msg) => (
                StatusCode::SERVICE_UNAVAILABLE,
                "SERVICE_UNAVAILABLE",
                msg,
                None,
            ),
            ApiError::Internal(msg) => {
                // Don't expose internal errors to clients
                tracing::error!(error = %msg, "Internal error");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "INTERNAL_ERROR",
                    "An internal error occurred".to_string(),
                    None,
                )
            }
        };

        let body = ErrorResponse {
            error: ErrorBody {
                code: code.to_string(),
                message,
                details,
            },
        };

        (status, Json(body)).into_response()
    }
}

impl From<Rejection> for ApiError {
    fn from(rejection: Rejection) -> Self {
        match rejection.status {
            RejectStatus::PaymentRequired => ApiError::PaymentRequired {
                message: rejection.message,
                plan: rejection.plan,
            },
            RejectStatus::TooManyRequests => ApiError::QuotaExceeded {
                code: rejection.reason.code(),
                message: rejection.message,
                plan: rejection.plan,
                retry_after: rejection.retry_at.map(|t| t.timestamp()),
            },
        }
    }
}

impl From<AdmissionError> for ApiError {
    fn from(e: AdmissionError) -> Self {
        ApiError::Internal(e.to_string())
    }
}

impl From<StoreError> for ApiError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::Connection(_) | StoreError::Timeout(_) => {
                ApiError::ServiceUnavailable("Usage store unavailable".to_string())
            }
            _ => ApiError::Internal(e.to_string()),
        }
    }
}

impl From<std::io::Error> for ApiError {
    fn from(e: std::io::Error) -> Self {
        ApiError::Internal(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use http_body_util::BodyExt;
    use sheetgate_core::{QuotaHeaders, RejectReason};

    async fn body_json(response: Response) -> serde_json::Value {
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn test_error_response() {
        let response = ApiError::Unauthorized("invalid api_key".to_string()).into_response();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

        let json = body_json(response).await;
        assert_eq!(json["error"]["code"], "UNAUTHORIZED");
        assert!(json["error"].get("details").is_none());
    }

    #[tokio::test]
    async fn test_rate_rejection_maps_to_429() {
        let rejection = Rejection {
            reason: RejectReason::RateLimited,
            status: RejectReason::RateLimited.status(),
            plan: Plan::Free,
            message: "slow down".to_string(),
            retry_at: chrono::DateTime::from_timestamp(1_700_000_060, 0),
            headers: QuotaHeaders::default(),
        };

        let response = ApiError::from(rejection).into_response();
        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);

        let json = body_json(response).await;
        assert_eq!(json["error"]["code"], "RATE_LIMITED");
        assert_eq!(json["error"]["details"]["plan"], "free");
        assert_eq!(json["error"]["details"]["retry_after"], 1_700_000_060);
    }

    #[tokio::test]
    async fn test_internal_error_is_opaque() {
        let response = ApiError::Internal("db password wrong".to_string()).into_response();
        let json = body_json(response).await;
        assert_eq!(json["error"]["message"], "An internal error occurred");
    }
}
