//! Process configuration, read from `CATALOG_*` environment variables.
//!
//! | Variable | Default | Meaning |
//! |----------|---------|---------|
//! | `CATALOG_STORE` | `memory` | `memory` or `postgres` |
//! | `CATALOG_DATABASE_URL` | none | required when `CATALOG_STORE=postgres` |
//! | `CATALOG_DB_MAX_CONNECTIONS` | `5` | pool size |
//! | `CATALOG_LOG_LEVEL` | `info` | fallback filter when `RUST_LOG` is unset |
//! | `CATALOG_LOG_FORMAT` | `json` | `json` or `pretty` |
//! | `CATALOG_DEFAULT_PRICE_TYPE` | `DEFAULT` | price type returned on read |

use serde::{Deserialize, Serialize};
use thiserror::Error;

use catalog_observability::{LogConfig, LogFormat};
use catalog_products::Price;

pub const STORE_VAR: &str = "CATALOG_STORE";
pub const DATABASE_URL_VAR: &str = "CATALOG_DATABASE_URL";
pub const MAX_CONNECTIONS_VAR: &str = "CATALOG_DB_MAX_CONNECTIONS";
pub const LOG_LEVEL_VAR: &str = "CATALOG_LOG_LEVEL";
pub const LOG_FORMAT_VAR: &str = "CATALOG_LOG_FORMAT";
pub const DEFAULT_PRICE_TYPE_VAR: &str = "CATALOG_DEFAULT_PRICE_TYPE";

const DEFAULT_MAX_CONNECTIONS: u32 = 5;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("invalid value '{value}' for {key}: {reason}")]
    Invalid {
        key: &'static str,
        value: String,
        reason: String,
    },

    #[error("{key} must be set when {requirement}")]
    Missing {
        key: &'static str,
        requirement: &'static str,
    },
}

/// Which catalog database backs the manager.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreKind {
    #[default]
    Memory,
    Postgres,
}

impl core::str::FromStr for StoreKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "memory" | "in-memory" => Ok(StoreKind::Memory),
            "postgres" | "postgresql" => Ok(StoreKind::Postgres),
            other => Err(format!("unknown store '{other}' (expected memory or postgres)")),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DatabaseConfig {
    pub url: Option<String>,
    pub max_connections: u32,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: None,
            max_connections: DEFAULT_MAX_CONNECTIONS,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CatalogConfig {
    pub store: StoreKind,
    pub database: DatabaseConfig,
    pub log: LogConfig,
    pub default_price_type: String,
}

impl Default for CatalogConfig {
    fn default() -> Self {
        Self {
            store: StoreKind::default(),
            database: DatabaseConfig::default(),
            log: LogConfig::default(),
            default_price_type: Price::DEFAULT_TYPE.to_string(),
        }
    }
}

impl CatalogConfig {
    /// Load from the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load from an arbitrary key lookup. Unset or blank keys keep their defaults.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        let mut config = Self::default();

        if let Some(value) = get(STORE_VAR) {
            config.store = value.parse::<StoreKind>().map_err(|reason| ConfigError::Invalid {
                key: STORE_VAR,
                value,
                reason,
            })?;
        }

        config.database.url = get(DATABASE_URL_VAR);

        if let Some(value) = get(MAX_CONNECTIONS_VAR) {
            config.database.max_connections = match value.trim().parse::<u32>() {
                Ok(0) => {
                    return Err(ConfigError::Invalid {
                        key: MAX_CONNECTIONS_VAR,
                        value,
                        reason: "must be at least 1".to_string(),
                    });
                }
                Ok(n) => n,
                Err(e) => {
                    return Err(ConfigError::Invalid {
                        key: MAX_CONNECTIONS_VAR,
                        value,
                        reason: e.to_string(),
                    });
                }
            };
        }

        if let Some(level) = get(LOG_LEVEL_VAR) {
            config.log.level = level;
        }

        if let Some(value) = get(LOG_FORMAT_VAR) {
            config.log.format =
                value
                    .parse::<LogFormat>()
                    .map_err(|reason| ConfigError::Invalid {
                        key: LOG_FORMAT_VAR,
                        value,
                        reason,
                    })?;
        }

        if let Some(price_type) = get(DEFAULT_PRICE_TYPE_VAR) {
            config.default_price_type = price_type.trim().to_string();
        }

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.store == StoreKind::Postgres && self.database.url.is_none() {
            return Err(ConfigError::Missing {
                key: DATABASE_URL_VAR,
                requirement: "CATALOG_STORE=postgres",
            });
        }
        Ok(())
    }
}
