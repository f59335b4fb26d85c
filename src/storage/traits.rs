//! Storage Trait Definitions
//!
//! Defines the keyed vault store. Implementations can use SQLite (production)
//! or in-memory (testing).

use async_trait::async_trait;
use thiserror::Error;

use crate::types::{Vault, VaultId};

/// Storage errors
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Record not found: {0}")]
    NotFound(String),

    #[error("Duplicate record: {0}")]
    Duplicate(String),

    #[error("Concurrent modification: {0}")]
    Conflict(String),

    #[error("Database error: {0}")]
    Database(String),

    #[error("Invalid data: {0}")]
    InvalidData(String),

    #[error("Connection error: {0}")]
    Connection(String),
}

/// Result type for storage operations
pub type StorageResult<T> = Result<T, StorageError>;

/// Vault storage interface
///
/// Each call is atomic: a failed `insert` or `update` leaves the stored
/// record exactly as it was. Updates are optimistic: the record passed in
/// must carry the version that is currently stored, otherwise the update is
/// rejected with `Conflict`. A successful update bumps `vault.version`.
///
/// Implementations:
/// - `SqliteVaultStorage` - Production storage with SQLite
/// - `MemoryVaultStorage` - In-memory storage for testing
#[async_trait]
pub trait VaultStorage: Send + Sync {
    /// Insert a new vault; fails with `Duplicate` if the id is taken
    async fn insert(&self, vault: &Vault) -> StorageResult<()>;

    /// Replace an existing vault; fails with `NotFound` if absent and
    /// `Conflict` if it changed since `vault` was read
    async fn update(&self, vault: &mut Vault) -> StorageResult<()>;

    /// Get a vault by ID
    async fn get(&self, id: &VaultId) -> StorageResult<Option<Vault>>;

    /// IDs of all stored vaults
    async fn list_ids(&self) -> StorageResult<Vec<VaultId>>;
}
