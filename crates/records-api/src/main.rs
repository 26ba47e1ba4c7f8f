//! Records API Service
//!
//! Main entry point for the healthcare records REST service.

use anyhow::{Context, Result};
use medledger_chain::{ChainClient, MockChain, RpcChainClient};
use std::sync::Arc;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use records_api::{
    bootstrap_admin,
    config::{Config, StorageBackend},
    create_router, AppState, MemoryStore, RedisStore, Store,
};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "records_api=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting Records API");

    // Load configuration
    let config = Config::from_env()?;
    info!("Configuration loaded");
    info!("  API address: {}", config.api_address());
    info!("  Storage backend: {:?}", config.storage_backend);
    info!("  Mock chain: {}", config.mock_chain);
    info!("  Session TTL: {}s", config.session_ttl_secs);

    let store: Arc<dyn Store> = match config.storage_backend {
        StorageBackend::Redis => {
            Arc::new(RedisStore::new(&config.redis_url).await?)
        }
        StorageBackend::Memory => {
            warn!("Using in-memory storage; records are lost on restart");
            Arc::new(MemoryStore::new())
        }
    };

    let chain: Arc<dyn ChainClient> = match (&config.chain_rpc_url, config.mock_chain) {
        (Some(rpc_url), false) => {
            info!(
                "Using chain relayer at {} (contract {})",
                rpc_url, config.chain_contract_address
            );
            Arc::new(RpcChainClient::new(
                rpc_url.clone(),
                config.chain_contract_address.clone(),
            ))
        }
        _ => {
            info!("Using in-memory mock chain");
            Arc::new(MockChain::new())
        }
    };

    match chain.block_number().await {
        Ok(height) => info!("Chain reachable at block {}", height),
        Err(e) => warn!("Chain not reachable yet, records will be marked FAILED: {}", e),
    }

    let state = AppState::new(store, chain, config.session_ttl_secs);

    if let (Some(email), Some(password)) = (&config.admin_email, &config.admin_password) {
        bootstrap_admin(&state, email, password)
            .await
            .context("Failed to bootstrap admin account")?;
    }

    // Create router
    let app = create_router(state);

    // Start server
    let addr = config.api_address();
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;
    info!("Records API listening on {}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("API server error")?;

    info!("Shutting down Records API");

    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("Failed to listen for shutdown signal: {}", e);
        return;
    }
    info!("Received shutdown signal");
}
