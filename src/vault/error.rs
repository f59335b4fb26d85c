//! Vault operation errors

use thiserror::Error;

use crate::ledger::LedgerError;
use crate::storage::StorageError;
use crate::types::{Identity, VaultId};

/// Errors returned by vault operations
///
/// Every error leaves the vault exactly as it was before the call.
#[derive(Debug, Error)]
pub enum VaultError {
    #[error("caller {caller} is not the vault admin")]
    NotAdmin { caller: Identity },

    #[error("insufficient unallocated balance: have {available}, need {requested}")]
    InsufficientBalance { available: u64, requested: u64 },

    #[error("no outstanding allocation for {0}")]
    NotAllocated(Identity),

    #[error("{0} already has an outstanding allocation")]
    DuplicateAllocation(Identity),

    #[error("vault already exists: {0}")]
    AlreadyExists(VaultId),

    #[error("vault not found: {0}")]
    NotFound(VaultId),

    #[error("ledger transfer rejected: {0}")]
    Ledger(#[from] LedgerError),

    #[error("vault balance overflow")]
    Overflow,

    #[error("vault balance underflow")]
    Underflow,

    #[error("storage failure: {0}")]
    Storage(#[from] StorageError),
}

impl VaultError {
    /// Stable error code
    pub fn error_code(&self) -> &'static str {
        match self {
            VaultError::NotAdmin { .. } => "NOT_ADMIN",
            VaultError::InsufficientBalance { .. } => "INSUFFICIENT_BALANCE",
            VaultError::NotAllocated(_) => "NOT_ALLOCATED",
            VaultError::DuplicateAllocation(_) => "DUPLICATE_ALLOCATION",
            VaultError::AlreadyExists(_) => "ALREADY_EXISTS",
            VaultError::NotFound(_) => "NOT_FOUND",
            VaultError::Ledger(_) => "LEDGER_FAILURE",
            VaultError::Overflow => "OVERFLOW",
            VaultError::Underflow => "UNDERFLOW",
            VaultError::Storage(StorageError::Conflict(_)) => "CONFLICT",
            VaultError::Storage(_) => "STORAGE_ERROR",
        }
    }
}

/// Result type for vault operations
pub type VaultResult<T> = Result<T, VaultError>;
