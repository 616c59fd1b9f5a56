//! Typed view of the merged configuration.
//!
//! Every section denies unknown fields, so a typo in YAML or a stray env
//! overlay fails at boot instead of being silently ignored.

use std::time::Duration;

use anyhow::{bail, Result};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(deny_unknown_fields, default)]
pub struct AppConfig {
    pub server: ServerSettings,
    pub database: DatabaseSettings,
    pub accrual: AccrualSettings,
    pub reconcile: ReconcileSettings,
    pub auth: AuthSettings,
    pub log: LogSettings,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct ServerSettings {
    /// `host:port`; a bare `:port` binds every interface.
    pub address: String,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            address: ":8080".to_string(),
        }
    }
}

impl ServerSettings {
    /// Address in a form `TcpListener::bind` accepts.
    pub fn bind_address(&self) -> String {
        if self.address.starts_with(':') {
            format!("0.0.0.0{}", self.address)
        } else {
            self.address.clone()
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct DatabaseSettings {
    /// Connection string. Empty means "not configured".
    pub uri: String,
    pub max_connections: u32,
}

impl Default for DatabaseSettings {
    fn default() -> Self {
        Self {
            uri: String::new(),
            max_connections: 5,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct AccrualSettings {
    /// Base URL of the accrual authority.
    pub address: String,
    pub timeout_ms: u64,
    pub retry_count: usize,
    pub retry_wait_ms: u64,
    pub retry_max_wait_ms: u64,
    /// Wait after a 429 that carries no usable `Retry-After`.
    pub rate_limit_delay_ms: u64,
}

impl Default for AccrualSettings {
    fn default() -> Self {
        Self {
            address: "http://localhost:8081".to_string(),
            timeout_ms: 5_000,
            retry_count: 3,
            retry_wait_ms: 1_000,
            retry_max_wait_ms: 5_000,
            rate_limit_delay_ms: 2_000,
        }
    }
}

impl AccrualSettings {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    pub fn retry_wait(&self) -> Duration {
        Duration::from_millis(self.retry_wait_ms)
    }

    pub fn retry_max_wait(&self) -> Duration {
        Duration::from_millis(self.retry_max_wait_ms)
    }

    pub fn rate_limit_delay(&self) -> Duration {
        Duration::from_millis(self.rate_limit_delay_ms)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct ReconcileSettings {
    pub page_size: usize,
    pub idle_delay_ms: u64,
    /// How long a claimed order stays invisible to other reconcilers.
    pub claim_lease_secs: i64,
}

impl Default for ReconcileSettings {
    fn default() -> Self {
        Self {
            page_size: 10,
            idle_delay_ms: 1_000,
            claim_lease_secs: 30,
        }
    }
}

impl ReconcileSettings {
    pub fn idle_delay(&self) -> Duration {
        Duration::from_millis(self.idle_delay_ms)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct AuthSettings {
    /// NAME of the env var holding the JWT signing secret. Never the secret.
    pub jwt_secret_env: String,
    pub access_ttl_secs: i64,
    pub refresh_ttl_secs: i64,
    pub bcrypt_cost: u32,
}

impl Default for AuthSettings {
    fn default() -> Self {
        Self {
            jwt_secret_env: "JWT_SECRET".to_string(),
            access_ttl_secs: 3_600,
            refresh_ttl_secs: 7_200,
            bcrypt_cost: 10,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct LogSettings {
    /// Default `EnvFilter` directive when `RUST_LOG` is unset.
    pub level: String,
}

impl Default for LogSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

impl AppConfig {
    /// Range checks that serde cannot express.
    pub fn validate(&self) -> Result<()> {
        if self.server.address.trim().is_empty() {
            bail!("CONFIG_INVALID server.address must not be empty");
        }
        if self.accrual.address.trim().is_empty() {
            bail!("CONFIG_INVALID accrual.address must not be empty");
        }
        if self.accrual.timeout_ms == 0 {
            bail!("CONFIG_INVALID accrual.timeout_ms must be > 0");
        }
        if self.accrual.retry_wait_ms > self.accrual.retry_max_wait_ms {
            bail!(
                "CONFIG_INVALID accrual.retry_wait_ms ({}) exceeds retry_max_wait_ms ({})",
                self.accrual.retry_wait_ms,
                self.accrual.retry_max_wait_ms
            );
        }
        if self.reconcile.page_size == 0 {
            bail!("CONFIG_INVALID reconcile.page_size must be >= 1");
        }
        if self.reconcile.claim_lease_secs <= 0 {
            bail!("CONFIG_INVALID reconcile.claim_lease_secs must be > 0");
        }
        if self.auth.access_ttl_secs <= 0 || self.auth.refresh_ttl_secs <= 0 {
            bail!("CONFIG_INVALID auth token lifetimes must be > 0");
        }
        if !(4..=31).contains(&self.auth.bcrypt_cost) {
            bail!("CONFIG_INVALID auth.bcrypt_cost must be within 4..=31");
        }
        Ok(())
    }
}
