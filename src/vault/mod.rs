//! Vault Module
//!
//! The custodial vault state machine: an admin pools tokens, earmarks parts
//! of the pool for recipients, and recipients claim what they were given.
//!
//! ```text
//!   deposit ──► total_balance ──allocate──► allocations[recipient] ──claim──► recipient
//!                    │
//!                    └──withdraw──► admin
//! ```
//!
//! # Usage
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use token_vault::{MemoryLedger, MemoryVaultStorage, VaultStore};
//!
//! let store = VaultStore::new(Arc::new(MemoryVaultStorage::new()), Arc::new(MemoryLedger::new()));
//! let vault_id = store.init(&admin, &custody).await?;
//! store.deposit(&admin, &vault_id, 1_000).await?;
//! store.allocate(&admin, &vault_id, &recipient, 400).await?;
//! let claimed = store.claim(&recipient, &vault_id).await?;
//! ```

pub mod error;
pub mod service;

// Re-exports
pub use error::{VaultError, VaultResult};
pub use service::VaultStore;
