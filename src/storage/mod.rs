//! Storage Layer Module
//!
//! Provides persistence for vault records.
//!
//! This module contains:
//! - Storage trait definitions for abstraction
//! - SQLite implementation for production
//! - In-memory implementation for testing

pub mod memory;
pub mod sqlite;
pub mod traits;

// Re-exports for convenience
pub use memory::MemoryVaultStorage;
pub use sqlite::SqliteVaultStorage;
pub use traits::{StorageError, StorageResult, VaultStorage};
