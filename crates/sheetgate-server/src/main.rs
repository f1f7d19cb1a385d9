//! SheetGate Server - standalone entry point for the gateway
//!
//! Thin wrapper around `sheetgate-api`. All settings come from the
//! environment (see `ServerConfig::from_env` and `GatewayConfig::from_env`).

use anyhow::Result;
use sheetgate_api::{GatewayConfig, GatewayServer, ServerConfig};

#[tokio::main]
async fn main() -> Result<()> {
    sheetgate_api::server::init_tracing();

    tracing::info!("Starting SheetGate gateway");

    let config = ServerConfig::from_env();
    let gateway = GatewayConfig::from_env();

    let server = GatewayServer::new(config, gateway).await.map_err(|e| {
        tracing::error!("Failed to initialize server: {}", e);
        e
    })?;

    server.run().await.map_err(|e| {
        tracing::error!("Server error during execution: {}", e);
        e
    })?;

    Ok(())
}
