//! SQLite Ledger
//!
//! Persistent account balances for the CLI. Each transfer runs in its own
//! SQLite transaction, so a rejected transfer leaves both accounts untouched.

use async_trait::async_trait;
use r2d2::{Pool, PooledConnection};
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::{params, OptionalExtension};
use std::path::Path;

use super::traits::{LedgerError, LedgerResult, TokenLedger};
use crate::storage::sqlite::{open_file_pool, open_memory_pool};
use crate::storage::StorageError;
use crate::types::Identity;

fn unavailable(e: impl std::fmt::Display) -> LedgerError {
    LedgerError::Unavailable(e.to_string())
}

/// SQLite-backed token ledger
pub struct SqliteLedger {
    pool: Pool<SqliteConnectionManager>,
}

impl SqliteLedger {
    /// Open (or create) the ledger tables in the given database
    pub fn new<P: AsRef<Path>>(db_path: P, pool_size: u32) -> Result<Self, StorageError> {
        let ledger = Self {
            pool: open_file_pool(db_path, pool_size)?,
        };
        ledger.run_migrations()?;

        Ok(ledger)
    }

    /// Create an in-memory ledger (for testing)
    pub fn in_memory() -> Result<Self, StorageError> {
        let ledger = Self {
            pool: open_memory_pool()?,
        };
        ledger.run_migrations()?;

        Ok(ledger)
    }

    fn conn(&self) -> LedgerResult<PooledConnection<SqliteConnectionManager>> {
        self.pool.get().map_err(unavailable)
    }

    fn run_migrations(&self) -> Result<(), StorageError> {
        let conn = self
            .pool
            .get()
            .map_err(|e| StorageError::Connection(e.to_string()))?;

        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS ledger_accounts (
                account TEXT PRIMARY KEY,
                balance INTEGER NOT NULL DEFAULT 0
            );
            "#,
        )
        .map_err(|e| StorageError::Database(e.to_string()))?;

        Ok(())
    }

    fn read_balance(conn: &rusqlite::Connection, account: &Identity) -> LedgerResult<u64> {
        let balance: Option<i64> = conn
            .query_row(
                "SELECT balance FROM ledger_accounts WHERE account = ?1",
                params![account.as_str()],
                |row| row.get(0),
            )
            .optional()
            .map_err(unavailable)?;

        Ok(balance.map(|b| b as u64).unwrap_or(0))
    }

    fn write_balance(
        conn: &rusqlite::Connection,
        account: &Identity,
        balance: u64,
    ) -> LedgerResult<()> {
        conn.execute(
            r#"
            INSERT INTO ledger_accounts (account, balance) VALUES (?1, ?2)
            ON CONFLICT(account) DO UPDATE SET balance = excluded.balance
            "#,
            params![account.as_str(), balance as i64],
        )
        .map_err(unavailable)?;

        Ok(())
    }

    /// Credit `amount` newly issued tokens to `account` (development faucet)
    pub fn mint(&self, account: &Identity, amount: u64) -> LedgerResult<u64> {
        let mut conn = self.conn()?;
        let tx = conn.transaction().map_err(unavailable)?;

        let balance = Self::read_balance(&tx, account)?
            .checked_add(amount)
            .ok_or_else(|| LedgerError::Overflow(account.clone()))?;
        Self::write_balance(&tx, account, balance)?;

        tx.commit().map_err(unavailable)?;
        Ok(balance)
    }

    fn transfer_sync(&self, from: &Identity, to: &Identity, amount: u64) -> LedgerResult<()> {
        let mut conn = self.conn()?;
        let tx = conn.transaction().map_err(unavailable)?;

        let available = Self::read_balance(&tx, from)?;
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

        let credited = Self::read_balance(&tx, to)?
            .checked_add(amount)
            .ok_or_else(|| LedgerError::Overflow(to.clone()))?;

        Self::write_balance(&tx, from, debited)?;
        Self::write_balance(&tx, to, credited)?;

        tx.commit().map_err(unavailable)?;
        Ok(())
    }
}

#[async_trait]
impl TokenLedger for SqliteLedger {
    async fn transfer(&self, from: &Identity, to: &Identity, amount: u64) -> LedgerResult<()> {
        self.transfer_sync(from, to, amount)
    }

    async fn balance_of(&self, account: &Identity) -> LedgerResult<u64> {
        let conn = self.conn()?;
        Self::read_balance(&conn, account)
    }
}
