//! Configuration management for the Records API
//!
//! Loads configuration from environment variables with sensible defaults.

use anyhow::{Context, Result};
use std::env;

/// Longest session a login may hand out (30 days)
pub const MAX_SESSION_TTL_SECS: u64 = 30 * 24 * 60 * 60;

/// Which record store backs the service
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageBackend {
    Redis,
    Memory,
}

impl std::str::FromStr for StorageBackend {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "redis" => Ok(StorageBackend::Redis),
            "memory" => Ok(StorageBackend::Memory),
            other => anyhow::bail!("Unknown STORAGE_BACKEND: {} (expected redis/memory)", other),
        }
    }
}

/// Application configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// API server host
    pub api_host: String,

    /// API server port
    pub api_port: u16,

    pub storage_backend: StorageBackend,

    /// Redis connection URL (redis backend only)
    pub redis_url: String,

    /// Use the in-memory contract simulation instead of a JSON-RPC provider
    pub mock_chain: bool,

    /// JSON-RPC provider URL (when not in mock mode)
    pub chain_rpc_url: Option<String>,

    /// Records contract address passed with every contract call
    pub chain_contract_address: String,

    /// Session lifetime in seconds
    pub session_ttl_secs: u64,

    /// Optional admin account created at startup
    pub admin_email: Option<String>,
    pub admin_password: Option<String>,
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self> {
        // Load .env file if it exists (for local development)
        dotenvy::dotenv().ok();

        let config = Config {
            api_host: env::var("API_HOST").unwrap_or_else(|_| "0.0.0.0".to_string()),

            api_port: env::var("API_PORT")
                .unwrap_or_else(|_| "8080".to_string())
                .parse()
                .context("Invalid API_PORT")?,

            storage_backend: env::var("STORAGE_BACKEND")
                .unwrap_or_else(|_| "redis".to_string())
                .parse()?,

            redis_url: env::var("REDIS_URL")
                .unwrap_or_else(|_| "redis://127.0.0.1:6379".to_string()),

            mock_chain: env::var("MOCK_CHAIN")
                .unwrap_or_else(|_| "true".to_string())
                .parse()
                .context("Invalid MOCK_CHAIN (expected true/false)")?,

            chain_rpc_url: env::var("CHAIN_RPC_URL").ok(),

            chain_contract_address: env::var("CHAIN_CONTRACT_ADDRESS")
                .unwrap_or_else(|_| "0x0000000000000000000000000000000000000000".to_string()),

            session_ttl_secs: env::var("SESSION_TTL_SECS")
                .unwrap_or_else(|_| "86400".to_string())
                .parse()
                .context("Invalid SESSION_TTL_SECS")?,

            admin_email: env::var("ADMIN_EMAIL").ok(),
            admin_password: env::var("ADMIN_PASSWORD").ok(),
        };

        // Validate configuration
        config.validate()?;

        Ok(config)
    }

    /// Validate configuration
    fn validate(&self) -> Result<()> {
        if self.api_port == 0 {
            anyhow::bail!("API_PORT must be greater than 0");
        }

        if self.session_ttl_secs == 0 {
            anyhow::bail!("SESSION_TTL_SECS must be greater than 0");
        }

        if self.session_ttl_secs > MAX_SESSION_TTL_SECS {
            anyhow::bail!(
                "SESSION_TTL_SECS must be at most {} (30 days)",
                MAX_SESSION_TTL_SECS
            );
        }

        if !self.mock_chain && self.chain_rpc_url.is_none() {
            anyhow::bail!("CHAIN_RPC_URL is required when MOCK_CHAIN=false");
        }

        if self.admin_email.is_some() != self.admin_password.is_some() {
            anyhow::bail!("ADMIN_EMAIL and ADMIN_PASSWORD must be set together");
        }

        Ok(())
    }

    /// Get the API server address
    pub fn api_address(&self) -> String {
        format!("{}:{}", self.api_host, self.api_port)
    }
}
