//! Configuration for the subsidy platform
//!
//! CLI arguments and environment variable handling using clap.

use clap::Parser;
use std::net::SocketAddr;
use uuid::Uuid;

use crate::db::schemas::DEFAULT_RETENTION_DAYS;

/// Green Hydrogen Subsidy Platform API server
#[derive(Parser, Debug, Clone)]
#[command(name = "greenh2")]
#[command(about = "REST API for tracking hydrogen-production subsidies")]
pub struct Args {
    /// Unique node identifier for this instance
    #[arg(long, env = "NODE_ID", default_value_t = Uuid::new_v4())]
    pub node_id: Uuid,

    /// Address to listen on
    #[arg(long, env = "LISTEN", default_value = "0.0.0.0:8080")]
    pub listen: SocketAddr,

    /// MongoDB connection URI
    #[arg(long, env = "MONGODB_URI", default_value = "mongodb://localhost:27017")]
    pub mongodb_uri: String,

    /// MongoDB database name
    #[arg(long, env = "MONGODB_DB", default_value = "greenh2")]
    pub mongodb_db: String,

    /// JWT secret for token signing (required in production)
    #[arg(long, env = "JWT_SECRET")]
    pub jwt_secret: Option<String>,

    /// JWT token expiry in seconds
    #[arg(long, env = "JWT_EXPIRY_SECONDS", default_value = "86400")]
    pub jwt_expiry_seconds: u64,

    /// Blockchain JSON-RPC endpoint
    #[arg(long, env = "CHAIN_RPC_URL", default_value = "http://localhost:8545")]
    pub chain_rpc_url: String,

    /// Subsidy contract address (0x-prefixed, 40 hex chars)
    #[arg(long, env = "CONTRACT_ADDRESS")]
    pub contract_address: Option<String>,

    /// Sender account address used for contract transactions
    #[arg(long, env = "CHAIN_SENDER_ADDRESS")]
    pub chain_sender_address: Option<String>,

    /// Gas ceiling for contract transactions
    #[arg(long, env = "CHAIN_GAS_LIMIT", default_value = "500000")]
    pub chain_gas_limit: u64,

    /// Receipt poll interval in milliseconds
    #[arg(long, env = "CHAIN_POLL_INTERVAL_MS", default_value = "2000")]
    pub chain_poll_interval_ms: u64,

    /// Maximum receipt polls before a submission is reported as unconfirmed
    #[arg(long, env = "CHAIN_POLL_ATTEMPTS", default_value = "30")]
    pub chain_poll_attempts: u32,

    /// Oracle public key for attestation signature checks (hex, 32 bytes)
    #[arg(long, env = "ORACLE_VERIFYING_KEY")]
    pub oracle_verifying_key: Option<String>,

    /// Oracle provider registry: comma-separated `name=url@weight` entries,
    /// e.g. "energy-grid=https://grid.example/api@0.4,weather=https://wx.example@0.3"
    #[arg(long, env = "ORACLE_PROVIDERS")]
    pub oracle_providers: Option<String>,

    /// Consensus threshold for oracle verification (0.0 - 1.0)
    #[arg(long, env = "ORACLE_CONSENSUS_THRESHOLD", default_value = "0.75")]
    pub oracle_consensus_threshold: f64,

    /// Per-provider request timeout in milliseconds
    #[arg(long, env = "ORACLE_TIMEOUT_MS", default_value = "10000")]
    pub oracle_timeout_ms: u64,

    /// Outbound mail relay endpoint (JSON POST); mail is dropped when unset
    #[arg(long, env = "MAIL_RELAY_URL")]
    pub mail_relay_url: Option<String>,

    /// From address stamped on outbound notifications
    #[arg(long, env = "MAIL_FROM", default_value = "noreply@greenh2.example")]
    pub mail_from: String,

    /// Enable development mode (relaxed config requirements)
    #[arg(long, env = "DEV_MODE", default_value = "false")]
    pub dev_mode: bool,

    /// Disable the notification scheduler (useful for read replicas)
    #[arg(long, env = "SCHEDULER_ENABLED", default_value = "true")]
    pub scheduler_enabled: bool,

    /// Audit retention period in days (drives record expiry)
    #[arg(long, env = "AUDIT_RETENTION_DAYS", default_value_t = DEFAULT_RETENTION_DAYS)]
    pub audit_retention_days: i64,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "LOG_LEVEL", default_value = "info")]
    pub log_level: String,
}

impl Args {
    /// Effective JWT secret. `validate()` rejects a missing secret outside
    /// dev mode, so the fallback is only reachable in development.
    pub fn jwt_secret(&self) -> String {
        self.jwt_secret
            .clone()
            .unwrap_or_else(|| "dev-only-insecure-secret-0123456789abcdef".to_string())
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<(), String> {
        if !self.dev_mode {
            if self.jwt_secret.is_none() {
                return Err("JWT_SECRET is required in production mode".to_string());
            }
            if self.contract_address.is_none() {
                return Err("CONTRACT_ADDRESS is required in production mode".to_string());
            }
            if self.chain_sender_address.is_none() {
                return Err("CHAIN_SENDER_ADDRESS is required in production mode".to_string());
            }
        }

        if !(0.0..=1.0).contains(&self.oracle_consensus_threshold) {
            return Err("ORACLE_CONSENSUS_THRESHOLD must be between 0.0 and 1.0".to_string());
        }

        if self.audit_retention_days <= 0 {
            return Err("AUDIT_RETENTION_DAYS must be positive".to_string());
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dev_args() -> Args {
        Args::parse_from(["greenh2", "--dev-mode"])
    }

    #[test]
    fn test_dev_mode_defaults() {
        let args = dev_args();
        assert!(args.validate().is_ok());
        assert!(!args.jwt_secret().is_empty());
        assert_eq!(args.oracle_consensus_threshold, 0.75);
    }

    #[test]
    fn test_production_requires_secret() {
        let args = Args::parse_from(["greenh2"]);
        assert!(args.validate().is_err());
    }

    #[test]
    fn test_threshold_bounds() {
        let mut args = dev_args();
        args.oracle_consensus_threshold = 1.5;
        assert!(args.validate().is_err());
    }

    #[test]
    fn test_retention_must_be_positive() {
        let mut args = dev_args();
        args.audit_retention_days = 0;
        assert!(args.validate().is_err());
    }
}
