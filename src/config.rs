use serde::Deserialize;
use std::env;

use crate::constants::{DEFAULT_CONFIRM_TIMEOUT_SECS, DEFAULT_RECONCILER_INTERVAL_SECS};

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    // Server
    pub host: String,
    pub port: u16,
    pub environment: String,

    // Database
    pub database_url: String,
    pub database_max_connections: u32,

    // Redis (optional; enables the cross-process delta bridge)
    pub redis_url: Option<String>,

    // Blockchain
    pub starknet_rpc_url: String,
    pub starknet_chain_id: String,

    // Escrow contract holding the wagers
    pub escrow_contract_address: String,

    // Settlement signer (admin account authorized to declare winners).
    // When absent the reconciler is not started.
    pub settlement_account_address: Option<String>,
    pub settlement_private_key: Option<String>,

    // Reconciler
    pub reconciler_interval_secs: u64,
    pub settlement_confirm_timeout_secs: u64,

    // CORS
    pub cors_allowed_origins: String,
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        dotenv::dotenv().ok();

        Ok(Config {
            host: env::var("HOST").unwrap_or_else(|_| "0.0.0.0".to_string()),
            port: env::var("PORT")
                .unwrap_or_else(|_| "3000".to_string())
                .parse()?,
            environment: env::var("ENVIRONMENT").unwrap_or_else(|_| "development".to_string()),

            database_url: env::var("DATABASE_URL")?,
            database_max_connections: env::var("DATABASE_MAX_CONNECTIONS")
                .unwrap_or_else(|_| "50".to_string())
                .parse()?,

            redis_url: env::var("REDIS_URL").ok(),

            starknet_rpc_url: env::var("STARKNET_RPC_URL")?,
            starknet_chain_id: env::var("STARKNET_CHAIN_ID")
                .unwrap_or_else(|_| "SN_MAIN".to_string()),

            escrow_contract_address: env::var("ESCROW_CONTRACT_ADDRESS")?,

            settlement_account_address: env::var("SETTLEMENT_ACCOUNT_ADDRESS").ok(),
            settlement_private_key: env::var("SETTLEMENT_PRIVATE_KEY").ok(),

            reconciler_interval_secs: env::var("RECONCILER_INTERVAL_SECS")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(DEFAULT_RECONCILER_INTERVAL_SECS),
            settlement_confirm_timeout_secs: env::var("SETTLEMENT_CONFIRM_TIMEOUT_SECS")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(DEFAULT_CONFIRM_TIMEOUT_SECS),

            cors_allowed_origins: env::var("CORS_ALLOWED_ORIGINS")
                .unwrap_or_else(|_| "*".to_string()),
        })
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.database_url.trim().is_empty() {
            anyhow::bail!("DATABASE_URL is empty");
        }
        if self.starknet_rpc_url.trim().is_empty() {
            anyhow::bail!("STARKNET_RPC_URL is empty");
        }
        if self.escrow_contract_address.trim().is_empty() {
            anyhow::bail!("ESCROW_CONTRACT_ADDRESS is empty");
        }

        if self.escrow_contract_address.starts_with("0x0000") {
            tracing::warn!("Using placeholder escrow contract address");
        }

        match (
            &self.settlement_account_address,
            &self.settlement_private_key,
        ) {
            (Some(_), Some(_)) => {}
            (None, None) => {
                tracing::warn!(
                    "Settlement signer not configured; reconciler will not run (set SETTLEMENT_ACCOUNT_ADDRESS and SETTLEMENT_PRIVATE_KEY)"
                );
            }
            _ => anyhow::bail!(
                "SETTLEMENT_ACCOUNT_ADDRESS and SETTLEMENT_PRIVATE_KEY must be set together"
            ),
        }

        if self.reconciler_interval_secs == 0 {
            anyhow::bail!("RECONCILER_INTERVAL_SECS must be > 0");
        }
        if self.settlement_confirm_timeout_secs == 0 {
            anyhow::bail!("SETTLEMENT_CONFIRM_TIMEOUT_SECS must be > 0");
        }

        if self.cors_allowed_origins.trim().is_empty() {
            tracing::warn!("CORS_ALLOWED_ORIGINS is empty; requests may be blocked");
        }

        Ok(())
    }

    pub fn has_settlement_signer(&self) -> bool {
        self.settlement_account_address.is_some() && self.settlement_private_key.is_some()
    }
}
