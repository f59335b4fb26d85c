//! Environment-based Configuration
//!
//! # Environment Variables
//!
//! - `VAULT_STORAGE` - "sqlite" or "memory" (default: "sqlite")
//! - `VAULT_DB_PATH` - SQLite database file (default: "data/token-vault.db")
//! - `VAULT_POOL_SIZE` - Maximum pooled SQLite connections (default: 8)
//! - `VAULT_LOG_LEVEL` - Logging level (trace, debug, info, warn, error)
//! - `VAULT_LOG_JSON` - Set to "1" or "true" for JSON log output

use std::env;
use std::path::PathBuf;
use std::str::FromStr;
use thiserror::Error;

/// Default database location
pub const DEFAULT_DB_PATH: &str = "data/token-vault.db";

/// Default connection pool size
pub const DEFAULT_POOL_SIZE: u32 = 8;

/// Configuration errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid value for {0}: {1}")]
    InvalidValue(String, String),
}

/// Where vault records live
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageBackend {
    Sqlite,
    Memory,
}

impl FromStr for StorageBackend {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "sqlite" => Ok(StorageBackend::Sqlite),
            "memory" | "mem" => Ok(StorageBackend::Memory),
            _ => Err(ConfigError::InvalidValue(
                "VAULT_STORAGE".to_string(),
                format!("unknown backend: {} (use 'sqlite' or 'memory')", s),
            )),
        }
    }
}

/// Main configuration struct
#[derive(Debug, Clone)]
pub struct VaultConfig {
    /// Storage backend
    pub storage: StorageBackend,

    /// SQLite database file (sqlite backend only)
    pub db_path: PathBuf,

    /// Maximum pooled SQLite connections
    pub pool_size: u32,

    /// Log level
    pub log_level: String,

    /// Emit JSON logs instead of pretty output
    pub log_json: bool,
}

impl Default for VaultConfig {
    fn default() -> Self {
        Self {
            storage: StorageBackend::Sqlite,
            db_path: PathBuf::from(DEFAULT_DB_PATH),
            pool_size: DEFAULT_POOL_SIZE,
            log_level: "info".to_string(),
            log_json: false,
        }
    }
}

impl VaultConfig {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Load configuration from an arbitrary key lookup
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();

        let storage = match lookup("VAULT_STORAGE") {
            Some(v) => v.parse()?,
            None => defaults.storage,
        };

        let db_path = lookup("VAULT_DB_PATH")
            .map(PathBuf::from)
            .unwrap_or(defaults.db_path);

        let pool_size = match lookup("VAULT_POOL_SIZE") {
            Some(v) => parse_pool_size(&v)?,
            None => defaults.pool_size,
        };

        let log_level = lookup("VAULT_LOG_LEVEL").unwrap_or(defaults.log_level);

        let log_json = lookup("VAULT_LOG_JSON")
            .map(|v| matches!(v.to_lowercase().as_str(), "1" | "true" | "yes"))
            .unwrap_or(defaults.log_json);

        Ok(Self {
            storage,
            db_path,
            pool_size,
            log_level,
            log_json,
        })
    }
}

fn parse_pool_size(value: &str) -> Result<u32, ConfigError> {
    let size: u32 = value.parse().map_err(|_| {
        ConfigError::InvalidValue("VAULT_POOL_SIZE".to_string(), "must be a number".to_string())
    })?;

    if size == 0 {
        return Err(ConfigError::InvalidValue(
            "VAULT_POOL_SIZE".to_string(),
            "must be at least 1".to_string(),
        ));
    }

    Ok(size)
}
