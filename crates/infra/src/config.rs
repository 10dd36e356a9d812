//! Configuration loading and representation.
//!
//! Layers, lowest precedence first:
//! 1. Defaults in code
//! 2. Optional `config/stockledger.toml` (or the file named by `STOCKLEDGER_CONFIG`)
//! 3. Environment variables with the `STOCKLEDGER__` prefix, e.g.
//!    `STOCKLEDGER__DATABASE__URL`, `STOCKLEDGER__RETRY__MAX_ATTEMPTS`

use std::time::Duration;

use config::{Environment, File};
use serde::Deserialize;

use crate::executor::RetryPolicy;

#[derive(Debug, Deserialize, Clone)]
pub struct LedgerConfig {
    pub database: DatabaseConfig,
    pub session: SessionConfig,
    pub retry: RetryConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DatabaseConfig {
    /// PostgreSQL connection URL
    pub url: String,

    /// Maximum number of connections in the pool
    pub max_connections: u32,

    /// How long to wait for a pooled connection before failing (transient)
    pub acquire_timeout_ms: u64,
}

#[derive(Debug, Deserialize, Clone)]
pub struct SessionConfig {
    /// Timezone pinned into every transaction
    pub timezone: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct RetryConfig {
    pub max_attempts: u32,
    pub base_delay_ms: u64,
}

impl RetryConfig {
    pub fn policy(&self) -> RetryPolicy {
        RetryPolicy::linear(self.max_attempts, Duration::from_millis(self.base_delay_ms))
    }
}

impl DatabaseConfig {
    pub fn acquire_timeout(&self) -> Duration {
        Duration::from_millis(self.acquire_timeout_ms)
    }
}

impl LedgerConfig {
    /// Load configuration from defaults, an optional file, and the environment.
    pub fn load() -> Result<Self, config::ConfigError> {
        let file =
            std::env::var("STOCKLEDGER_CONFIG").unwrap_or_else(|_| "config/stockledger".into());
        Self::builder()?
            .add_source(File::with_name(&file).required(false))
            .add_source(
                Environment::with_prefix("STOCKLEDGER")
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize()
    }

    /// Defaults only; the database URL points at a local development instance.
    pub fn defaults() -> Result<Self, config::ConfigError> {
        Self::builder()?.build()?.try_deserialize()
    }

    fn builder()
    -> Result<config::ConfigBuilder<config::builder::DefaultState>, config::ConfigError> {
        config::Config::builder()
            .set_default("database.url", "postgres://localhost/stockledger")?
            .set_default("database.max_connections", 10)?
            .set_default("database.acquire_timeout_ms", 5_000)?
            .set_default("session.timezone", "UTC")?
            .set_default("retry.max_attempts", 3)?
            .set_default("retry.base_delay_ms", 100)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_values() {
        let config = LedgerConfig::defaults().unwrap();

        assert_eq!(config.database.max_connections, 10);
        assert_eq!(config.database.acquire_timeout(), Duration::from_secs(5));
        assert_eq!(config.session.timezone, "UTC");
        assert_eq!(config.retry.policy(), RetryPolicy::linear(3, Duration::from_millis(100)));
    }
}
