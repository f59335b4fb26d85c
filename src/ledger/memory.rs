//! In-Memory Ledger
//!
//! Account balances held in a map. Data is lost when the process exits.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

use super::traits::{LedgerError, LedgerResult, TokenLedger};
use crate::types::Identity;

/// In-memory token ledger
#[derive(Clone, Default)]
pub struct MemoryLedger {
    balances: Arc<RwLock<HashMap<Identity, u64>>>,
}

impl MemoryLedger {
    /// Create a ledger with no funded accounts
    pub fn new() -> Self {
        Self::default()
    }

    /// Credit `amount` newly issued tokens to `account`
    pub async fn mint(&self, account: &Identity, amount: u64) -> LedgerResult<()> {
        let mut balances = self.balances.write().await;
        let balance = balances.entry(account.clone()).or_insert(0);
        *balance = balance
            .checked_add(amount)
            .ok_or_else(|| LedgerError::Overflow(account.clone()))?;
        Ok(())
    }

    /// Sum of every account balance
    pub async fn total_supply(&self) -> u128 {
        let balances = self.balances.read().await;
        balances.values().map(|&b| u128::from(b)).sum()
    }
}

#[async_trait]
impl TokenLedger for MemoryLedger {
    async fn transfer(&self, from: &Identity, to: &Identity, amount: u64) -> LedgerResult<()> {
        let mut balances = self.balances.write().await;

        let available = balances.get(from).copied().unwrap_or(0);
        let debited = available
            .checked_sub(amount)
            .ok_or_else(|| LedgerError::InsufficientFunds {
                account: from.clone(),
                available,
                requested: amount,
            })?;

        if from == to {
            return Ok(());
        }

        let credited = balances
            .get(to)
            .copied()
            .unwrap_or(0)
            .checked_add(amount)
            .ok_or_else(|| LedgerError::Overflow(to.clone()))?;

        balances.insert(from.clone(), debited);
        balances.insert(to.clone(), credited);
        Ok(())
    }

    async fn balance_of(&self, account: &Identity) -> LedgerResult<u64> {
        let balances = self.balances.read().await;
        Ok(balances.get(account).copied().unwrap_or(0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_transfer_moves_funds() {
        let ledger = MemoryLedger::new();
        let alice = Identity::from("alice");
        let bob = Identity::from("bob");
        ledger.mint(&alice, 100).await.unwrap();

        ledger.transfer(&alice, &bob, 30).await.unwrap();

        assert_eq!(ledger.balance_of(&alice).await.unwrap(), 70);
        assert_eq!(ledger.balance_of(&bob).await.unwrap(), 30);
        assert_eq!(ledger.total_supply().await, 100);
    }

    #[tokio::test]
    async fn test_insufficient_funds_moves_nothing() {
        let ledger = MemoryLedger::new();
        let alice = Identity::from("alice");
        let bob = Identity::from("bob");
        ledger.mint(&alice, 10).await.unwrap();

        let result = ledger.transfer(&alice, &bob, 11).await;

        assert!(matches!(
            result,
            Err(LedgerError::InsufficientFunds {
                available: 10,
                requested: 11,
                ..
            })
        ));
        assert_eq!(ledger.balance_of(&alice).await.unwrap(), 10);
        assert_eq!(ledger.balance_of(&bob).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_overflow_moves_nothing() {
        let ledger = MemoryLedger::new();
        let alice = Identity::from("alice");
        let bob = Identity::from("bob");
        ledger.mint(&alice, 10).await.unwrap();
        ledger.mint(&bob, u64::MAX).await.unwrap();

        let result = ledger.transfer(&alice, &bob, 1).await;

        assert_eq!(result, Err(LedgerError::Overflow(bob.clone())));
        assert_eq!(ledger.balance_of(&alice).await.unwrap(), 10);
    }

    #[tokio::test]
    async fn test_self_transfer_checks_funds_only() {
        let ledger = MemoryLedger::new();
        let alice = Identity::from("alice");
        ledger.mint(&alice, 5).await.unwrap();

        ledger.transfer(&alice, &alice, 5).await.unwrap();
        assert_eq!(ledger.balance_of(&alice).await.unwrap(), 5);
        assert!(ledger.transfer(&alice, &alice, 6).await.is_err());
    }
}
