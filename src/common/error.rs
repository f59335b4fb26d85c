//! Common Error Types
//!
//! Unifies every failure the binary can surface.

use thiserror::Error;

use crate::ledger::LedgerError;
use crate::storage::StorageError;
use crate::types::IdentityError;
use crate::vault::VaultError;

/// Root error type for the token vault
#[derive(Debug, Error)]
pub enum TokenVaultError {
    /// Configuration errors
    #[error("configuration error: {0}")]
    Config(#[from] super::config::ConfigError),

    /// Logging errors
    #[error("logging error: {0}")]
    Logging(#[from] super::logging::LoggingError),

    /// Vault operation errors
    #[error(transparent)]
    Vault(#[from] VaultError),

    /// Storage errors outside a vault operation
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    /// Ledger errors outside a vault operation
    #[error("ledger error: {0}")]
    Ledger(#[from] LedgerError),

    /// Invalid caller or account identity
    #[error("invalid identity: {0}")]
    Identity(#[from] IdentityError),

    /// Output serialization errors
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl TokenVaultError {
    /// Get error code for CLI output
    pub fn error_code(&self) -> &'static str {
        match self {
            TokenVaultError::Config(_) => "CONFIG_ERROR",
            TokenVaultError::Logging(_) => "LOGGING_ERROR",
            TokenVaultError::Vault(e) => e.error_code(),
            TokenVaultError::Storage(_) => "STORAGE_ERROR",
            TokenVaultError::Ledger(_) => "LEDGER_FAILURE",
            TokenVaultError::Identity(_) => "INVALID_IDENTITY",
            TokenVaultError::Serialization(_) => "SERIALIZATION_ERROR",
            TokenVaultError::Io(_) => "IO_ERROR",
        }
    }
}

/// Result type alias using TokenVaultError
pub type Result<T> = std::result::Result<T, TokenVaultError>;
