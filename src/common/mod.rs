//! Common Infrastructure Module
//!
//! Shared utilities and configuration for the token vault.
//!
//! This module contains:
//! - Configuration loading from environment variables
//! - Structured logging setup
//! - Common error types

pub mod config;
pub mod error;
pub mod logging;

// Re-exports for convenience
pub use config::{ConfigError, StorageBackend, VaultConfig};
pub use error::{Result, TokenVaultError};
pub use logging::{
    generate_correlation_id, init_from_config, init_logging, log_security_event, log_vault_event,
    EventCategory, LogEvent, LogLevel, LoggingError,
};
