//! In-Memory Storage Implementation
//!
//! Provides in-memory vault storage for testing and development.
//! Data is lost when the process exits.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

use super::traits::{StorageError, StorageResult, VaultStorage};
use crate::types::{Vault, VaultId};

/// In-memory vault store
///
/// Thread-safe storage for vault records.
/// Uses Arc<RwLock<>> for concurrent access.
#[derive(Clone, Default)]
pub struct MemoryVaultStorage {
    /// Records indexed by vault ID
    records: Arc<RwLock<HashMap<VaultId, Vault>>>,
}

impl MemoryVaultStorage {
    /// Create a new empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored vaults
    pub async fn len(&self) -> usize {
        self.records.read().await.len()
    }
}

#[async_trait]
impl VaultStorage for MemoryVaultStorage {
    async fn insert(&self, vault: &Vault) -> StorageResult<()> {
        let mut records = self.records.write().await;

        if records.contains_key(&vault.id) {
            return Err(StorageError::Duplicate(format!("vault: {}", vault.id)));
        }

        records.insert(vault.id.clone(), vault.clone());
        Ok(())
    }

    async fn update(&self, vault: &mut Vault) -> StorageResult<()> {
        let mut records = self.records.write().await;

        let existing = records
            .get_mut(&vault.id)
            .ok_or_else(|| StorageError::NotFound(vault.id.to_string()))?;

        if existing.version != vault.version {
            return Err(StorageError::Conflict(format!(
                "vault {} is at version {}, update was based on {}",
                vault.id, existing.version, vault.version
            )));
        }

        vault.version += 1;
        *existing = vault.clone();
        Ok(())
    }

    async fn get(&self, id: &VaultId) -> StorageResult<Option<Vault>> {
        let records = self.records.read().await;
        Ok(records.get(id).cloned())
    }

    async fn list_ids(&self) -> StorageResult<Vec<VaultId>> {
        let records = self.records.read().await;
        let mut ids: Vec<VaultId> = records.keys().cloned().collect();
        ids.sort();
        Ok(ids)
    }
}
