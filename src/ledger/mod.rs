//! Token Ledger Module
//!
//! The external ledger that actually moves tokens between accounts. The vault
//! consumes it through the `TokenLedger` trait and never implements transfer
//! semantics itself.
//!
//! This module contains:
//! - The `TokenLedger` collaborator trait and its error type
//! - An in-memory ledger for tests and demos
//! - A SQLite ledger used by the CLI

pub mod memory;
pub mod sqlite;
pub mod traits;

// Re-exports for convenience
pub use memory::MemoryLedger;
pub use sqlite::SqliteLedger;
pub use traits::{LedgerError, LedgerResult, TokenLedger};

#[cfg(test)]
pub use traits::MockTokenLedger;
