//! SheetGate API server with graceful shutdown

use axum::{middleware, Router};
use std::net::SocketAddr;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tower_http::compression::CompressionLayer;

use sheetgate_core::{
    AdmissionConfig, AdmissionController, Metrics, PlanCatalog, QuotaScope, RateLimiter,
    SubscriptionSource, UsageStore, WindowCounter,
};
use sheetgate_persist::{connect_counter_store, CounterBackend, SqliteBackend, SqliteUsageStore};
use sheetgate_queue::{RecorderConfig, UsageRecorder};

use crate::error::ApiError;
use crate::middleware::{
    body_limit_layer, cors_layer, request_id_middleware, timeout_layer, tracing_middleware,
};
use crate::routes::api_router;
use crate::state::AppState;
use crate::tenant::{MemoryTenantDirectory, TenantResolver};

/// How often expired in-process rate windows are purged
const PURGE_INTERVAL: Duration = Duration::from_secs(60);

fn env_or<T: FromStr>(name: &str, default: T) -> T {
    std::env::var(name)
        .ok()
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or(default)
}

/// Server configuration
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Server address
    pub addr: SocketAddr,
    /// Request timeout
    pub timeout: Duration,
    /// Max request body size (bytes)
    pub max_body_size: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            addr: SocketAddr::from(([0, 0, 0, 0], 8081)),
            timeout: Duration::from_secs(30),
            max_body_size: 1024 * 1024, // 1MB
        }
    }
}

impl ServerConfig {
    /// Create from environment variables
    pub fn from_env() -> Self {
        let port: u16 = std::env::var("SHEETGATE_PORT")
            .or_else(|_| std::env::var("PORT"))
            .ok()
            .and_then(|p| p.parse().ok())
            .unwrap_or(8081);

        Self {
            addr: SocketAddr::from(([0, 0, 0, 0], port)),
            timeout: Duration::from_secs(env_or("SHEETGATE_TIMEOUT_SECS", 30)),
            ..Default::default()
        }
    }
}

/// Backing stores, admission and recorder settings
#[derive(Debug, Clone)]
pub struct GatewayConfig {
    pub database_url: String,
    /// Shared rate-window store; in-process windows when unset
    pub redis_url: Option<String>,
    /// JSON file of published resources for the in-memory tenant directory
    pub tenants_file: Option<String>,
    /// Deadline for each rate-window increment
    pub counter_timeout: Duration,
    pub admission: AdmissionConfig,
    pub recorder: RecorderConfig,
    /// How long shutdown waits for buffered usage events
    pub shutdown_grace: Duration,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            database_url: "sqlite:sheetgate.db?mode=rwc".to_string(),
            redis_url: None,
            tenants_file: None,
            counter_timeout: Duration::from_millis(250),
            admission: AdmissionConfig::default(),
            recorder: RecorderConfig::default(),
            shutdown_grace: Duration::from_secs(5),
        }
    }
}

impl GatewayConfig {
    /// Create from environment variables
    pub fn from_env() -> Self {
        let defaults = Self::default();

        let quota_scope = match std::env::var("SHEETGATE_QUOTA_SCOPE") {
            Ok(raw) => QuotaScope::parse(&raw).unwrap_or_else(|| {
                tracing::warn!(value = %raw, "Unknown SHEETGATE_QUOTA_SCOPE, using owner");
                QuotaScope::Owner
            }),
            Err(_) => QuotaScope::Owner,
        };

        Self {
            database_url: std::env::var("DATABASE_URL").unwrap_or(defaults.database_url),
            redis_url: std::env::var("REDIS_URL").ok().filter(|u| !u.is_empty()),
            tenants_file: std::env::var("SHEETGATE_TENANTS_FILE").ok(),
            counter_timeout: Duration::from_millis(env_or("SHEETGATE_COUNTER_TIMEOUT_MS", 250)),
            admission: AdmissionConfig {
                usage_read_timeout: Duration::from_millis(env_or(
                    "SHEETGATE_USAGE_READ_TIMEOUT_MS",
                    500,
                )),
                quota_scope,
            },
            recorder: RecorderConfig {
                workers: env_or("USAGE_TRACK_WORKERS", defaults.recorder.workers),
                capacity: env_or("USAGE_BUFFER_CAPACITY", defaults.recorder.capacity),
                persist_timeout: Duration::from_secs(env_or("USAGE_PERSIST_TIMEOUT_SECS", 5)),
            },
            shutdown_grace: Duration::from_secs(env_or("SHEETGATE_SHUTDOWN_GRACE_SECS", 5)),
        }
    }
}

/// SheetGate API Server
pub struct GatewayServer {
    config: ServerConfig,
    app_state: AppState,
    counter: CounterBackend,
    database: SqliteBackend,
    shutdown_grace: Duration,
}

impl GatewayServer {
    /// Connect the backing stores and start the usage recorder.
    ///
    /// Tenants and subscriptions come from the in-memory directory, seeded
    /// from `tenants_file` when one is configured.
    pub async fn new(config: ServerConfig, gateway: GatewayConfig) -> Result<Self, ApiError> {
        let directory = match &gateway.tenants_file {
            Some(path) => {
                let directory = MemoryTenantDirectory::load_json(path)?;
                tracing::info!(path = %path, tenants = directory.len().await, "Loaded tenants");
                directory
            }
            None => {
                tracing::warn!("SHEETGATE_TENANTS_FILE not set, no API keys will resolve");
                MemoryTenantDirectory::new()
            }
        };
        let directory = Arc::new(directory);

        Self::with_directory(config, gateway, directory.clone(), directory).await
    }

    /// Build the server over any tenant and subscription sources
    pub async fn with_directory(
        config: ServerConfig,
        gateway: GatewayConfig,
        tenants: Arc<dyn TenantResolver>,
        subscriptions: Arc<dyn SubscriptionSource>,
    ) -> Result<Self, ApiError> {
        let metrics = Arc::new(Metrics::new());

        let database = SqliteBackend::new(&gateway.database_url).await?;
        let usage: Arc<dyn UsageStore> = Arc::new(SqliteUsageStore::new(&database));

        let counter = connect_counter_store(gateway.redis_url.as_deref()).await;
        let window = WindowCounter::new(counter.store(), gateway.counter_timeout);
        let admission = AdmissionController::new(
            subscriptions,
            PlanCatalog::standard(),
            RateLimiter::new(window, metrics.clone()),
            usage.clone(),
            metrics.clone(),
            gateway.admission,
        );

        let recorder = Arc::new(UsageRecorder::start(
            usage.clone(),
            metrics.clone(),
            gateway.recorder,
        ));

        tracing::info!(
            counter_store = counter.name(),
            usage_store = %usage.name(),
            quota_scope = ?gateway.admission.quota_scope,
            "Gateway initialized"
        );

        let app_state = AppState::new(admission, recorder, tenants, usage, metrics);

        Ok(Self {
            config,
            app_state,
            counter,
            database,
            shutdown_grace: gateway.shutdown_grace,
        })
    }

    /// Get the configured router
    pub fn router(&self) -> Router {
        api_router(self.app_state.clone())
            // Compression (outermost - compresses response)
            .layer(CompressionLayer::new())
            // Body size limit
            .layer(body_limit_layer(self.config.max_body_size))
            // Timeout
            .layer(timeout_layer(self.config.timeout))
            // CORS
            .layer(cors_layer())
            // Tracing
            .layer(middleware::from_fn(tracing_middleware))
            // Request ID (runs before tracing so the span carries it)
            .layer(middleware::from_fn(request_id_middleware))
    }

    pub fn state(&self) -> &AppState {
        &self.app_state
    }

    /// Run the server until SIGINT/SIGTERM, then drain the usage recorder
    pub async fn run(self) -> Result<(), ApiError> {
        let app = self.router();
        let addr = self.config.addr;

        let purge = match &self.counter {
            CounterBackend::Memory(store) => {
                let store = store.clone();
                Some(tokio::spawn(async move {
                    let mut ticker = tokio::time::interval(PURGE_INTERVAL);
                    loop {
                        ticker.tick().await;
                        store.purge_expired().await;
                    }
                }))
            }
            #[allow(unreachable_patterns)]
            _ => None,
        };

        let listener = tokio::net::TcpListener::bind(addr).await?;
        tracing::info!("SheetGate listening on http://{}", addr);

        axum::serve(listener, app)
            .with_graceful_shutdown(shutdown_signal())
            .await
            .map_err(|e| ApiError::Internal(format!("Server error: {}", e)))?;

        if let Some(purge) = purge {
            purge.abort();
        }

        let recorder = self.app_state.recorder();
        recorder.shutdown(self.shutdown_grace).await;
        self.database.close().await;

        tracing::info!("Server shutdown complete");
        Ok(())
    }

    /// Get server metrics
    pub fn metrics(&self) -> Arc<Metrics> {
        self.app_state.metrics()
    }
}

/// Graceful shutdown signal handler
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Received Ctrl+C, starting graceful shutdown");
        }
        _ = terminate => {
            tracing::info!("Received SIGTERM, starting graceful shutdown");
        }
    }
}

/// Initialize tracing subscriber
pub fn init_tracing() {
    use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,sheetgate=debug,tower_http=debug"));

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_target(true))
        .init();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_server_config_default() {
        let config = ServerConfig::default();
        assert_eq!(config.addr.port(), 8081);
        assert_eq!(config.timeout, Duration::from_secs(30));
        assert_eq!(config.max_body_size, 1024 * 1024);
    }

    #[test]
    fn test_gateway_config_default() {
        let config = GatewayConfig::default();
        assert_eq!(config.recorder.workers, 3);
        assert_eq!(config.counter_timeout, Duration::from_millis(250));
        assert_eq!(config.admission.quota_scope, QuotaScope::Owner);
        assert!(config.redis_url.is_none());
    }

    #[test]
    fn test_env_or_falls_back_on_garbage() {
        assert_eq!(env_or("SHEETGATE_TEST_UNSET_VARIABLE", 7u64), 7);
    }

    #[tokio::test]
    async fn test_server_builds_on_memory_database() {
        let gateway = GatewayConfig {
            database_url: "sqlite::memory:".to_string(),
            ..Default::default()
        };
        let directory = Arc::new(MemoryTenantDirectory::new());
        let server = GatewayServer::with_directory(
            ServerConfig::default(),
            gateway,
            directory.clone(),
            directory,
        )
        .await
        .unwrap();

        assert!(matches!(server.counter, CounterBackend::Memory(_)));
        let _router = server.router();
        server.state().recorder().shutdown(Duration::from_secs(1)).await;
    }
}
