//! # SheetGate API
//!
//! HTTP front of the SheetGate gateway.
//!
//! Features:
//! - Axum-based web server
//! - Tenant resolution from the `/v1/{api_key}` path
//! - Admission middleware (subscription, rate limit, quotas) with quota headers
//! - Usage tracking of successful requests off the response path
//! - Graceful shutdown that drains the usage recorder

pub mod error;
pub mod middleware;
pub mod routes;
pub mod server;
pub mod state;
pub mod tenant;

pub use error::{ApiError, ApiResult};
pub use server::{GatewayConfig, GatewayServer, ServerConfig};
pub use state::AppState;
pub use tenant::{MemoryTenantDirectory, TenantContext, TenantRecord, TenantResolver};
