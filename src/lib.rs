//! Token Vault
//!
//! A custodial token vault: one admin account pools fungible tokens, earmarks
//! portions of the pool for named recipients, and recipients claim what was
//! earmarked for them.
//!
//! ## Components
//!
//! 1. **VaultStore** - The vault operations and their guards
//! 2. **Storage** - Keyed persistence of vault records (SQLite or in-memory)
//! 3. **Ledger** - The token ledger that actually moves funds
//!
//! Caller identities are attested upstream and passed in as given.

pub mod common;
pub mod ledger;
pub mod storage;
pub mod types;
pub mod vault;

// Re-exports: vault operations
pub use vault::{VaultError, VaultResult, VaultStore};

// Re-exports: collaborators
pub use ledger::{LedgerError, MemoryLedger, SqliteLedger, TokenLedger};
pub use storage::{MemoryVaultStorage, SqliteVaultStorage, StorageError, VaultStorage};

// Re-exports: data model
pub use types::{Identity, Vault, VaultEvent, VaultEventKind, VaultEvents, VaultId};
