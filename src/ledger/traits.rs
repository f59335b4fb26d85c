//! Ledger Trait Definitions

use async_trait::async_trait;
use thiserror::Error;

use crate::types::Identity;

/// Ledger errors
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LedgerError {
    #[error("insufficient funds in {account}: have {available}, need {requested}")]
    InsufficientFunds {
        account: Identity,
        available: u64,
        requested: u64,
    },

    #[error("balance of {0} would overflow")]
    Overflow(Identity),

    #[error("ledger unavailable: {0}")]
    Unavailable(String),
}

/// Result type for ledger operations
pub type LedgerResult<T> = Result<T, LedgerError>;

/// Token ledger interface
///
/// A transfer either moves the full amount or fails without moving anything.
///
/// Implementations:
/// - `MemoryLedger` - In-memory balances for testing
/// - `SqliteLedger` - Persistent balances for the CLI
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait TokenLedger: Send + Sync {
    /// Move `amount` tokens from `from` to `to`
    async fn transfer(&self, from: &Identity, to: &Identity, amount: u64) -> LedgerResult<()>;

    /// Current token balance of `account` (0 if unknown)
    async fn balance_of(&self, account: &Identity) -> LedgerResult<u64>;
}
