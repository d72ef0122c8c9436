//! Configuration management for the pairs backtesting system.

use crate::{Error, Result};
use serde::Deserialize;
use std::env;

/// Application configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub database: DatabaseConfig,
    pub conductor: ConductorConfig,
    pub backtest: BacktestDefaults,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub skip_migrations: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ConductorConfig {
    /// Base URL of the data-refresh conductor. `None` disables refresh.
    pub url: Option<String>,
    pub timeout_secs: u64,
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct BacktestDefaults {
    /// Overrides the worker-pool size of every run when set.
    pub max_parallelism: Option<usize>,
    pub skip_data_refresh: bool,
}

impl Config {
    /// Load configuration from environment variables.
    #[allow(clippy::result_large_err)]
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok();

        Ok(Self {
            database: DatabaseConfig {
                url: env::var("DATABASE_URL").map_err(|_| Error::Config {
                    message: "DATABASE_URL environment variable not set".to_string(),
                })?,
                max_connections: env::var("DATABASE_MAX_CONNECTIONS")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(5),
                skip_migrations: env_flag("SKIP_MIGRATIONS"),
            },
            conductor: ConductorConfig {
                url: env::var("CONDUCTOR_URL").ok().filter(|s| !s.is_empty()),
                timeout_secs: env::var("CONDUCTOR_TIMEOUT_SECS")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(30),
            },
            backtest: BacktestDefaults {
                max_parallelism: env::var("BACKTEST_MAX_PARALLELISM")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .filter(|n: &usize| *n >= 1),
                skip_data_refresh: env_flag("SKIP_DATA_REFRESH"),
            },
        })
    }

    /// Load configuration for testing (with defaults).
    #[cfg(test)]
    pub fn test_config() -> Self {
        Self {
            database: DatabaseConfig {
                url: "postgres://localhost/pairs_test".to_string(),
                max_connections: 2,
                skip_migrations: true,
            },
            conductor: ConductorConfig {
                url: None,
                timeout_secs: 5,
            },
            backtest: BacktestDefaults::default(),
        }
    }
}

fn env_flag(name: &str) -> bool {
    env::var(name)
        .map(|v| v == "true" || v == "1")
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_defaults() {
        let config = Config::test_config();
        assert_eq!(config.database.max_connections, 2);
        assert!(config.conductor.url.is_none());
        assert!(config.backtest.max_parallelism.is_none());
        assert!(!config.backtest.skip_data_refresh);
    }

    #[test]
    fn test_env_flag_unset_is_false() {
        assert!(!env_flag("PAIRS_CORE_TEST_FLAG_THAT_IS_NEVER_SET"));
    }
}
