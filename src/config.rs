//! Configuration for Gatekeeper
//!
//! CLI arguments and environment variable handling using clap.

use clap::Parser;
use std::net::SocketAddr;
use std::time::Duration;

use crate::auth::SessionIssuer;
use crate::types::GatekeeperError;

const MIN_JWT_SECRET_LEN: usize = 32;

/// Gatekeeper - ownership claims and approvals for NSQ topics and channels
#[derive(Parser, Debug, Clone)]
#[command(name = "gatekeeper")]
#[command(about = "Ownership claims, approval tickets and group-scoped access for NSQ")]
pub struct Args {
    /// Address to listen on
    #[arg(long, env = "LISTEN", default_value = "0.0.0.0:4181")]
    pub listen: SocketAddr,

    /// nsqlookupd HTTP base URL
    #[arg(long, env = "NSQ_LOOKUPD_URL", default_value = "http://127.0.0.1:4161")]
    pub lookupd_url: String,

    /// Timeout for each request to nsqlookupd or nsqd, in milliseconds
    #[arg(long, env = "BROKER_TIMEOUT_MS", default_value = "3000")]
    pub broker_timeout_ms: u64,

    /// Seconds between broker synchronisations (0 disables the background task)
    #[arg(long, env = "SYNC_INTERVAL_SECS", default_value = "30")]
    pub sync_interval_secs: u64,

    /// MongoDB connection URI. State is kept in memory only when absent.
    #[arg(long, env = "MONGODB_URI")]
    pub mongodb_uri: Option<String>,

    /// MongoDB database name
    #[arg(long, env = "MONGODB_DB", default_value = "gatekeeper")]
    pub mongodb_db: String,

    /// JWT secret for session signing (required unless in dev mode)
    #[arg(long, env = "JWT_SECRET")]
    pub jwt_secret: Option<String>,

    /// Session lifetime in seconds
    #[arg(long, env = "JWT_EXPIRY_SECONDS", default_value = "86400")]
    pub jwt_expiry_seconds: u64,

    /// Password reset token lifetime in seconds
    #[arg(long, env = "RESET_TOKEN_TTL_SECS", default_value = "86400")]
    pub reset_token_ttl_secs: u64,

    /// Username of the bootstrap root account
    #[arg(long, env = "ROOT_USERNAME", default_value = "root")]
    pub root_username: String,

    /// Password of the bootstrap root account; generated and logged once
    /// when absent
    #[arg(long, env = "ROOT_PASSWORD", hide_env_values = true)]
    pub root_password: Option<String>,

    /// Enable development mode (fixed JWT secret, in-memory broker fallback)
    #[arg(long, env = "DEV_MODE", default_value = "false")]
    pub dev_mode: bool,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "LOG_LEVEL", default_value = "info")]
    pub log_level: String,
}

impl Args {
    /// Validate configuration
    pub fn validate(&self) -> Result<(), String> {
        match self.jwt_secret.as_deref() {
            None | Some("") if !self.dev_mode => {
                return Err("JWT_SECRET is required outside dev mode".to_string());
            }
            Some(secret) if !secret.is_empty() && secret.len() < MIN_JWT_SECRET_LEN => {
                return Err(format!(
                    "JWT_SECRET must be at least {MIN_JWT_SECRET_LEN} characters"
                ));
            }
            _ => {}
        }

        if self.broker_timeout_ms == 0 {
            return Err("BROKER_TIMEOUT_MS must be greater than zero".to_string());
        }

        if self.root_username.trim().is_empty() {
            return Err("ROOT_USERNAME must not be empty".to_string());
        }

        Ok(())
    }

    pub fn broker_timeout(&self) -> Duration {
        Duration::from_millis(self.broker_timeout_ms)
    }

    /// Session issuer for the configured secret, or the dev issuer in dev
    /// mode without a secret
    pub fn session_issuer(&self) -> Result<SessionIssuer, GatekeeperError> {
        match self.jwt_secret.as_deref() {
            Some(secret) if !secret.is_empty() => {
                SessionIssuer::new(secret.to_string(), self.jwt_expiry_seconds)
            }
            _ if self.dev_mode => Ok(SessionIssuer::new_dev(self.jwt_expiry_seconds)),
            _ => Err(GatekeeperError::Config(
                "JWT_SECRET is required outside dev mode".into(),
            )),
        }
    }
}
