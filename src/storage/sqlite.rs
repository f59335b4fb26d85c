//! SQLite Persistent Storage for Vaults
//!
//! Provides durable storage for vault records that survives restarts.
//! Uses connection pooling via r2d2 for concurrent access. A vault is spread
//! over three tables (header row, allocations, events) and every write
//! happens inside one SQLite transaction. Header rows carry a `version`
//! column so that writers in separate processes sharing one database file
//! cannot overwrite each other's changes.

use async_trait::async_trait;
use r2d2::{Pool, PooledConnection};
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::{params, OptionalExtension, TransactionBehavior};
use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;

use super::traits::{StorageError, StorageResult, VaultStorage};
use crate::types::{
    AllocatedEvent, ClaimedEvent, DepositedEvent, Identity, Vault, VaultEvent, VaultEventKind,
    VaultEvents, VaultId, WithdrawnEvent,
};

/// Busy timeout applied to every pooled connection
const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// Build a connection pool for an on-disk database
///
/// Creates the parent directory if needed.
pub(crate) fn open_file_pool<P: AsRef<Path>>(
    db_path: P,
    max_size: u32,
) -> Result<Pool<SqliteConnectionManager>, StorageError> {
    if let Some(parent) = db_path.as_ref().parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)
                .map_err(|e| StorageError::Connection(e.to_string()))?;
        }
    }

    let manager = SqliteConnectionManager::file(db_path)
        .with_init(|conn| conn.busy_timeout(BUSY_TIMEOUT));
    Pool::builder()
        .max_size(max_size.max(1))
        .build(manager)
        .map_err(|e| StorageError::Connection(e.to_string()))
}

/// Build a single-connection pool over a private in-memory database
pub(crate) fn open_memory_pool() -> Result<Pool<SqliteConnectionManager>, StorageError> {
    let manager = SqliteConnectionManager::memory();
    Pool::builder()
        .max_size(1)
        .build(manager)
        .map_err(|e| StorageError::Connection(e.to_string()))
}

fn db_err(e: rusqlite::Error) -> StorageError {
    StorageError::Database(e.to_string())
}

/// SQLite-backed vault store with connection pooling
pub struct SqliteVaultStorage {
    pool: Pool<SqliteConnectionManager>,
}

impl SqliteVaultStorage {
    /// Create a new store with the given database path
    ///
    /// Creates the database file and runs migrations if needed.
    pub fn new<P: AsRef<Path>>(db_path: P, pool_size: u32) -> Result<Self, StorageError> {
        let store = Self {
            pool: open_file_pool(db_path, pool_size)?,
        };
        store.run_migrations()?;

        Ok(store)
    }

    /// Create an in-memory store (for testing)
    pub fn in_memory() -> Result<Self, StorageError> {
        let store = Self {
            pool: open_memory_pool()?,
        };
        store.run_migrations()?;

        Ok(store)
    }

    /// Get a connection from the pool
    fn conn(&self) -> Result<PooledConnection<SqliteConnectionManager>, StorageError> {
        self.pool
            .get()
            .map_err(|e| StorageError::Connection(e.to_string()))
    }

    /// Run database migrations
    fn run_migrations(&self) -> Result<(), StorageError> {
        let conn = self.conn()?;

        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS vaults (
                id TEXT PRIMARY KEY,
                admin TEXT NOT NULL,
                vault_address TEXT NOT NULL,
                total_balance INTEGER NOT NULL DEFAULT 0,
                version INTEGER NOT NULL DEFAULT 0,
                created_at INTEGER NOT NULL,
                updated_at INTEGER NOT NULL
            );

            CREATE TABLE IF NOT EXISTS vault_allocations (
                vault_id TEXT NOT NULL REFERENCES vaults(id),
                recipient TEXT NOT NULL,
                amount INTEGER NOT NULL,
                PRIMARY KEY (vault_id, recipient)
            );

            CREATE TABLE IF NOT EXISTS vault_events (
                vault_id TEXT NOT NULL REFERENCES vaults(id),
                sequence INTEGER NOT NULL,
                kind TEXT NOT NULL,
                recipient TEXT,
                amount INTEGER NOT NULL,
                recorded_at INTEGER NOT NULL,
                PRIMARY KEY (vault_id, sequence)
            );

            CREATE INDEX IF NOT EXISTS idx_vault_events_kind ON vault_events(vault_id, kind);
            "#,
        )
        .map_err(db_err)?;

        // Databases created before the version column existed
        let has_version = conn
            .prepare("SELECT 1 FROM pragma_table_info('vaults') WHERE name = 'version'")
            .and_then(|mut stmt| stmt.exists([]))
            .map_err(db_err)?;
        if !has_version {
            conn.execute(
                "ALTER TABLE vaults ADD COLUMN version INTEGER NOT NULL DEFAULT 0",
                [],
            )
            .map_err(db_err)?;
        }

        Ok(())
    }

    /// Read the raw columns of an event row
    fn row_to_event_row(row: &rusqlite::Row) -> rusqlite::Result<EventRow> {
        Ok(EventRow {
            sequence: row.get::<_, i64>("sequence")? as u64,
            kind: row.get("kind")?,
            recipient: row.get("recipient")?,
            amount: row.get::<_, i64>("amount")? as u64,
            recorded_at: row.get::<_, i64>("recorded_at")? as u64,
        })
    }

    // Synchronous helper methods for the trait implementations

    fn insert_sync(&self, vault: &Vault) -> Result<(), StorageError> {
        let mut conn = self.conn()?;
        let tx = conn.transaction().map_err(db_err)?;

        tx.execute(
            r#"
            INSERT INTO vaults (id, admin, vault_address, total_balance, version, created_at, updated_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
            "#,
            params![
                vault.id.as_str(),
                vault.admin.as_str(),
                vault.vault_address.as_str(),
                vault.total_balance as i64,
                vault.version as i64,
                vault.created_at as i64,
                vault.updated_at as i64,
            ],
        )
        .map_err(|e| {
            if let rusqlite::Error::SqliteFailure(ref err, _) = e {
                if err.extended_code == 1555 || err.extended_code == 2067 {
                    return StorageError::Duplicate(format!("vault: {}", vault.id));
                }
            }
            db_err(e)
        })?;

        Self::write_allocations(&tx, vault)?;
        Self::append_events(&tx, vault, 0)?;

        tx.commit().map_err(db_err)?;
        Ok(())
    }

    fn update_sync(&self, vault: &mut Vault) -> Result<(), StorageError> {
        let mut conn = self.conn()?;
        let tx = conn
            .transaction_with_behavior(TransactionBehavior::Immediate)
            .map_err(db_err)?;

        let rows_affected = tx
            .execute(
                r#"
            UPDATE vaults SET
                admin = ?2,
                total_balance = ?3,
                updated_at = ?4,
                version = version + 1
            WHERE id = ?1 AND version = ?5
            "#,
                params![
                    vault.id.as_str(),
                    vault.admin.as_str(),
                    vault.total_balance as i64,
                    vault.updated_at as i64,
                    vault.version as i64,
                ],
            )
            .map_err(db_err)?;

        if rows_affected == 0 {
            let stored_version: Option<i64> = tx
                .query_row(
                    "SELECT version FROM vaults WHERE id = ?1",
                    params![vault.id.as_str()],
                    |row| row.get(0),
                )
                .optional()
                .map_err(db_err)?;

            return Err(match stored_version {
                Some(stored) => StorageError::Conflict(format!(
                    "vault {} is at version {}, update was based on {}",
                    vault.id, stored, vault.version
                )),
                None => StorageError::NotFound(vault.id.to_string()),
            });
        }

        tx.execute(
            "DELETE FROM vault_allocations WHERE vault_id = ?1",
            params![vault.id.as_str()],
        )
        .map_err(db_err)?;
        Self::write_allocations(&tx, vault)?;

        let stored_sequence: i64 = tx
            .query_row(
                "SELECT COALESCE(MAX(sequence), 0) FROM vault_events WHERE vault_id = ?1",
                params![vault.id.as_str()],
                |row| row.get(0),
            )
            .map_err(db_err)?;
        Self::append_events(&tx, vault, stored_sequence as u64)?;

        tx.commit().map_err(db_err)?;
        vault.version += 1;
        Ok(())
    }

    fn write_allocations(tx: &rusqlite::Transaction<'_>, vault: &Vault) -> Result<(), StorageError> {
        let mut stmt = tx
            .prepare(
                "INSERT INTO vault_allocations (vault_id, recipient, amount) VALUES (?1, ?2, ?3)",
            )
            .map_err(db_err)?;

        for (recipient, amount) in &vault.allocations {
            stmt.execute(params![vault.id.as_str(), recipient.as_str(), *amount as i64])
                .map_err(db_err)?;
        }

        Ok(())
    }

    /// Append events newer than `after`; the event tables are never rewritten
    fn append_events(
        tx: &rusqlite::Transaction<'_>,
        vault: &Vault,
        after: u64,
    ) -> Result<(), StorageError> {
        let mut stmt = tx
            .prepare(
                r#"
            INSERT INTO vault_events (vault_id, sequence, kind, recipient, amount, recorded_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6)
            "#,
            )
            .map_err(db_err)?;

        for event in vault.events.since(after) {
            stmt.execute(params![
                vault.id.as_str(),
                event.sequence() as i64,
                event.kind().to_string(),
                event.recipient().map(Identity::as_str),
                event.amount() as i64,
                event.recorded_at() as i64,
            ])
            .map_err(db_err)?;
        }

        Ok(())
    }

    fn get_sync(&self, id: &VaultId) -> Result<Option<Vault>, StorageError> {
        let conn = self.conn()?;

        let header = conn
            .query_row(
                "SELECT * FROM vaults WHERE id = ?1",
                params![id.as_str()],
                |row| {
                    Ok((
                        row.get::<_, String>("admin")?,
                        row.get::<_, String>("vault_address")?,
                        row.get::<_, i64>("total_balance")? as u64,
                        row.get::<_, i64>("version")? as u64,
                        row.get::<_, i64>("created_at")? as u64,
                        row.get::<_, i64>("updated_at")? as u64,
                    ))
                },
            )
            .optional()
            .map_err(db_err)?;

        let Some((admin, vault_address, total_balance, version, created_at, updated_at)) = header
        else {
            return Ok(None);
        };

        let mut stmt = conn
            .prepare("SELECT recipient, amount FROM vault_allocations WHERE vault_id = ?1")
            .map_err(db_err)?;
        let allocations = stmt
            .query_map(params![id.as_str()], |row| {
                Ok((
                    Identity::from(row.get::<_, String>(0)?),
                    row.get::<_, i64>(1)? as u64,
                ))
            })
            .map_err(db_err)?
            .collect::<Result<BTreeMap<_, _>, _>>()
            .map_err(db_err)?;

        let mut stmt = conn
            .prepare("SELECT * FROM vault_events WHERE vault_id = ?1 ORDER BY sequence ASC")
            .map_err(db_err)?;
        let rows = stmt
            .query_map(params![id.as_str()], |row| Self::row_to_event_row(row))
            .map_err(db_err)?
            .collect::<Result<Vec<_>, _>>()
            .map_err(db_err)?;

        let mut events = VaultEvents::default();
        for row in rows {
            events.append(row.into_event(id)?);
        }

        Ok(Some(Vault {
            id: id.clone(),
            admin: Identity::from(admin),
            vault_address: Identity::from(vault_address),
            total_balance,
            allocations,
            events,
            version,
            created_at,
            updated_at,
        }))
    }

    fn list_ids_sync(&self) -> Result<Vec<VaultId>, StorageError> {
        let conn = self.conn()?;

        let mut stmt = conn
            .prepare("SELECT id FROM vaults ORDER BY id ASC")
            .map_err(db_err)?;

        let ids = stmt
            .query_map([], |row| Ok(Identity::from(row.get::<_, String>(0)?)))
            .map_err(db_err)?
            .collect::<Result<Vec<_>, _>>()
            .map_err(db_err)?;

        Ok(ids)
    }
}

/// Raw columns of a `vault_events` row
struct EventRow {
    sequence: u64,
    kind: String,
    recipient: Option<String>,
    amount: u64,
    recorded_at: u64,
}

impl EventRow {
    fn into_event(self, vault_id: &VaultId) -> Result<VaultEvent, StorageError> {
        let kind: VaultEventKind = self.kind.parse().map_err(|e| {
            StorageError::InvalidData(format!("vault {} event {}: {}", vault_id, self.sequence, e))
        })?;

        let Self {
            sequence,
            recipient,
            amount,
            recorded_at,
            ..
        } = self;

        let event = match kind {
            VaultEventKind::Deposited => VaultEvent::Deposited(DepositedEvent {
                sequence,
                amount,
                recorded_at,
            }),
            VaultEventKind::Withdrawn => VaultEvent::Withdrawn(WithdrawnEvent {
                sequence,
                amount,
                recorded_at,
            }),
            VaultEventKind::Allocated | VaultEventKind::Claimed => {
                let recipient = recipient.map(Identity::from).ok_or_else(|| {
                    StorageError::InvalidData(format!(
                        "vault {} event {}: {} event without recipient",
                        vault_id, sequence, kind
                    ))
                })?;
                if kind == VaultEventKind::Allocated {
                    VaultEvent::Allocated(AllocatedEvent {
                        sequence,
                        recipient,
                        amount,
                        recorded_at,
                    })
                } else {
                    VaultEvent::Claimed(ClaimedEvent {
                        sequence,
                        recipient,
                        amount,
                        recorded_at,
                    })
                }
            }
        };

        Ok(event)
    }
}

#[async_trait]
impl VaultStorage for SqliteVaultStorage {
    async fn insert(&self, vault: &Vault) -> StorageResult<()> {
        self.insert_sync(vault)
    }

    async fn update(&self, vault: &mut Vault) -> StorageResult<()> {
        self.update_sync(vault)
    }

    async fn get(&self, id: &VaultId) -> StorageResult<Option<Vault>> {
        self.get_sync(id)
    }

    async fn list_ids(&self) -> StorageResult<Vec<VaultId>> {
        self.list_ids_sync()
    }
}
