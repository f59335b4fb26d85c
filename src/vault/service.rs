//! Vault Store
//!
//! Applies the vault operations to records held in a `VaultStorage`, moving
//! tokens through a `TokenLedger`.
//!
//! Each mutating operation holds a per-vault lock for its whole duration,
//! checks every guard before touching the ledger, builds the successor record
//! on a copy, performs the ledger transfer and only then persists. A failed
//! transfer therefore leaves nothing to undo; a failed write after a
//! successful transfer is compensated by the reverse transfer.
//!
//! The in-process lock only serializes callers sharing one `VaultStore`.
//! Stores in other processes are excluded by the storage layer, which rejects
//! an update based on a stale version with `StorageError::Conflict`; the loser
//! of such a race has its ledger transfer reversed like any other failed write.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};
use tracing::{debug, error, info, instrument, warn, Span};

use super::error::{VaultError, VaultResult};
use crate::common::logging::{generate_correlation_id, log_security_event, log_vault_event};
use crate::ledger::TokenLedger;
use crate::storage::{StorageError, VaultStorage};
use crate::types::{
    AllocatedEvent, ClaimedEvent, DepositedEvent, Identity, Vault, VaultEvent, VaultId,
    WithdrawnEvent,
};

/// A token movement performed on behalf of a vault operation
#[derive(Debug, Clone)]
struct Transfer {
    from: Identity,
    to: Identity,
    amount: u64,
}

impl Transfer {
    fn reversed(&self) -> Self {
        Self {
            from: self.to.clone(),
            to: self.from.clone(),
            amount: self.amount,
        }
    }
}

/// Assign a correlation id to the current operation span
fn begin_operation() -> String {
    let op_id = generate_correlation_id();
    Span::current().record("op_id", op_id.as_str());
    op_id
}

type LockTable = Mutex<HashMap<VaultId, Arc<AsyncMutex<()>>>>;

/// Exclusive hold on one vault for the duration of an operation
///
/// Dropping the lease releases the vault and removes its table entry when no
/// other operation is waiting on it.
struct VaultLease<'a> {
    table: &'a LockTable,
    vault_id: VaultId,
    guard: Option<OwnedMutexGuard<()>>,
}

impl Drop for VaultLease<'_> {
    fn drop(&mut self) {
        let mut locks = self
            .table
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        // Release under the table lock so no new waiter can clone the entry
        // between the release and the count check.
        drop(self.guard.take());
        let idle = locks
            .get(&self.vault_id)
            .is_some_and(|lock| Arc::strong_count(lock) == 1);
        if idle {
            locks.remove(&self.vault_id);
        }
    }
}

/// Keyed store of vaults exposing the invariant-preserving operations
pub struct VaultStore {
    storage: Arc<dyn VaultStorage>,
    ledger: Arc<dyn TokenLedger>,
    /// One async lock per vault in use; operations on different vaults never contend
    locks: LockTable,
}

impl VaultStore {
    pub fn new(storage: Arc<dyn VaultStorage>, ledger: Arc<dyn TokenLedger>) -> Self {
        Self {
            storage,
            ledger,
            locks: Mutex::new(HashMap::new()),
        }
    }

    async fn lock_vault(&self, vault_id: &VaultId) -> VaultLease<'_> {
        let lock = {
            let mut locks = self
                .locks
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            locks.entry(vault_id.clone()).or_default().clone()
        };
        let guard = lock.lock_owned().await;

        VaultLease {
            table: &self.locks,
            vault_id: vault_id.clone(),
            guard: Some(guard),
        }
    }

    #[cfg(test)]
    fn tracked_locks(&self) -> usize {
        self.locks
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .len()
    }

    async fn load(&self, vault_id: &VaultId) -> VaultResult<Vault> {
        self.storage
            .get(vault_id)
            .await?
            .ok_or_else(|| VaultError::NotFound(vault_id.clone()))
    }

    fn require_admin(vault: &Vault, caller: &Identity, op: &str, op_id: &str) -> VaultResult<()> {
        if vault.is_admin(caller) {
            return Ok(());
        }

        log_security_event(
            "vault.not_admin",
            false,
            serde_json::json!({
                "op": op,
                "vault_id": vault.id,
                "caller": caller,
            }),
            Some(op_id),
        );
        Err(VaultError::NotAdmin {
            caller: caller.clone(),
        })
    }

    fn require_unallocated(vault: &Vault, amount: u64) -> VaultResult<()> {
        if vault.total_balance < amount {
            return Err(VaultError::InsufficientBalance {
                available: vault.total_balance,
                requested: amount,
            });
        }
        Ok(())
    }

    async fn move_tokens(&self, transfer: &Transfer) -> VaultResult<()> {
        self.ledger
            .transfer(&transfer.from, &transfer.to, transfer.amount)
            .await
            .map_err(|e| {
                warn!(
                    from = %transfer.from,
                    to = %transfer.to,
                    amount = transfer.amount,
                    error = %e,
                    "ledger rejected transfer"
                );
                VaultError::Ledger(e)
            })
    }

    /// Persist `next` and emit the events it gained since `prior_sequence`
    ///
    /// On success `next` carries the version now stored.
    async fn commit(
        &self,
        next: &mut Vault,
        prior_sequence: u64,
        moved: Option<&Transfer>,
        op_id: &str,
    ) -> VaultResult<()> {
        if let Err(err) = self.storage.update(next).await {
            if let Some(transfer) = moved {
                self.compensate(transfer, &err).await;
            }
            return Err(err.into());
        }

        for event in next.events.since(prior_sequence) {
            log_vault_event(&next.id, &event, op_id);
        }
        Ok(())
    }

    async fn compensate(&self, transfer: &Transfer, cause: &StorageError) {
        let reverse = transfer.reversed();
        match self
            .ledger
            .transfer(&reverse.from, &reverse.to, reverse.amount)
            .await
        {
            Ok(()) => warn!(
                from = %reverse.from,
                to = %reverse.to,
                amount = reverse.amount,
                cause = %cause,
                "vault write failed, ledger transfer reversed"
            ),
            Err(e) => error!(
                from = %reverse.from,
                to = %reverse.to,
                amount = reverse.amount,
                cause = %cause,
                error = %e,
                "vault write failed and ledger transfer could not be reversed"
            ),
        }
    }

    /// Create the vault owned by `admin`, custodied at `vault_address`
    ///
    /// The vault is keyed by the admin's identity, so each account can create
    /// at most one vault.
    #[instrument(name = "vault.init", skip_all, fields(admin = %admin, op_id))]
    pub async fn init(&self, admin: &Identity, vault_address: &Identity) -> VaultResult<VaultId> {
        begin_operation();
        let _lease = self.lock_vault(admin).await;

        if self.storage.get(admin).await?.is_some() {
            return Err(VaultError::AlreadyExists(admin.clone()));
        }

        let vault = Vault::new(admin.clone(), vault_address.clone());
        self.storage.insert(&vault).await.map_err(|e| match e {
            StorageError::Duplicate(_) => VaultError::AlreadyExists(admin.clone()),
            other => VaultError::Storage(other),
        })?;

        info!(vault_address = %vault_address, "vault created");
        Ok(vault.id)
    }

    /// Move `amount` tokens from the admin into custody
    #[instrument(
        name = "vault.deposit",
        skip_all,
        fields(vault_id = %vault_id, caller = %caller, amount = amount, op_id)
    )]
    pub async fn deposit(&self, caller: &Identity, vault_id: &VaultId, amount: u64) -> VaultResult<()> {
        let op_id = begin_operation();
        let _lease = self.lock_vault(vault_id).await;

        let mut next = self.load(vault_id).await?;
        Self::require_admin(&next, caller, "deposit", &op_id)?;
        let total_balance = next
            .total_balance
            .checked_add(amount)
            .ok_or(VaultError::Overflow)?;

        let prior_sequence = next.last_sequence();
        let sequence = next.next_sequence();
        next.touch();
        next.total_balance = total_balance;
        next.events.append(VaultEvent::Deposited(DepositedEvent {
            sequence,
            amount,
            recorded_at: next.updated_at,
        }));

        let transfer = Transfer {
            from: caller.clone(),
            to: next.vault_address.clone(),
            amount,
        };
        self.move_tokens(&transfer).await?;
        self.commit(&mut next, prior_sequence, Some(&transfer), &op_id)
            .await?;

        debug!(total_balance, "deposit committed");
        Ok(())
    }

    /// Earmark `amount` unallocated tokens for `recipient`
    ///
    /// A recipient holds at most one outstanding allocation; allocating again
    /// before they claim fails with `DuplicateAllocation`.
    #[instrument(
        name = "vault.allocate",
        skip_all,
        fields(vault_id = %vault_id, caller = %caller, recipient = %recipient, amount = amount, op_id)
    )]
    pub async fn allocate(
        &self,
        caller: &Identity,
        vault_id: &VaultId,
        recipient: &Identity,
        amount: u64,
    ) -> VaultResult<()> {
        let op_id = begin_operation();
        let _lease = self.lock_vault(vault_id).await;

        let mut next = self.load(vault_id).await?;
        Self::require_admin(&next, caller, "allocate", &op_id)?;
        Self::require_unallocated(&next, amount)?;
        if next.allocations.contains_key(recipient) {
            return Err(VaultError::DuplicateAllocation(recipient.clone()));
        }
        let total_balance = next
            .total_balance
            .checked_sub(amount)
            .ok_or(VaultError::Underflow)?;

        let prior_sequence = next.last_sequence();
        let sequence = next.next_sequence();
        next.touch();
        next.total_balance = total_balance;
        next.allocations.insert(recipient.clone(), amount);
        next.events.append(VaultEvent::Allocated(AllocatedEvent {
            sequence,
            recipient: recipient.clone(),
            amount,
            recorded_at: next.updated_at,
        }));

        self.commit(&mut next, prior_sequence, None, &op_id).await?;

        debug!(total_balance, "allocation committed");
        Ok(())
    }

    /// Pay out the caller's outstanding allocation, returning the amount
    #[instrument(name = "vault.claim", skip_all, fields(vault_id = %vault_id, caller = %caller, op_id))]
    pub async fn claim(&self, caller: &Identity, vault_id: &VaultId) -> VaultResult<u64> {
        let op_id = begin_operation();
        let _lease = self.lock_vault(vault_id).await;

        let mut next = self.load(vault_id).await?;
        let amount = next
            .allocations
            .remove(caller)
            .ok_or_else(|| VaultError::NotAllocated(caller.clone()))?;

        let prior_sequence = next.last_sequence();
        let sequence = next.next_sequence();
        next.touch();
        next.events.append(VaultEvent::Claimed(ClaimedEvent {
            sequence,
            recipient: caller.clone(),
            amount,
            recorded_at: next.updated_at,
        }));

        let transfer = Transfer {
            from: next.vault_address.clone(),
            to: caller.clone(),
            amount,
        };
        self.move_tokens(&transfer).await?;
        self.commit(&mut next, prior_sequence, Some(&transfer), &op_id)
            .await?;

        debug!(amount, "claim committed");
        Ok(amount)
    }

    /// Return `amount` unallocated tokens from custody to the admin
    #[instrument(
        name = "vault.withdraw",
        skip_all,
        fields(vault_id = %vault_id, caller = %caller, amount = amount, op_id)
    )]
    pub async fn withdraw(&self, caller: &Identity, vault_id: &VaultId, amount: u64) -> VaultResult<()> {
        let op_id = begin_operation();
        let _lease = self.lock_vault(vault_id).await;

        let mut next = self.load(vault_id).await?;
        Self::require_admin(&next, caller, "withdraw", &op_id)?;
        Self::require_unallocated(&next, amount)?;
        let total_balance = next
            .total_balance
            .checked_sub(amount)
            .ok_or(VaultError::Underflow)?;

        let prior_sequence = next.last_sequence();
        let sequence = next.next_sequence();
        next.touch();
        next.total_balance = total_balance;
        next.events.append(VaultEvent::Withdrawn(WithdrawnEvent {
            sequence,
            amount,
            recorded_at: next.updated_at,
        }));

        let transfer = Transfer {
            from: next.vault_address.clone(),
            to: caller.clone(),
            amount,
        };
        self.move_tokens(&transfer).await?;
        self.commit(&mut next, prior_sequence, Some(&transfer), &op_id)
            .await?;

        debug!(total_balance, "withdrawal committed");
        Ok(())
    }

    /// Hand admin rights to `new_admin`
    ///
    /// The vault keeps its id and custodial address. No event is recorded.
    #[instrument(
        name = "vault.transfer_ownership",
        skip_all,
        fields(vault_id = %vault_id, caller = %caller, new_admin = %new_admin, op_id)
    )]
    pub async fn transfer_ownership(
        &self,
        caller: &Identity,
        vault_id: &VaultId,
        new_admin: &Identity,
    ) -> VaultResult<()> {
        let op_id = begin_operation();
        let _lease = self.lock_vault(vault_id).await;

        let mut next = self.load(vault_id).await?;
        Self::require_admin(&next, caller, "transfer_ownership", &op_id)?;

        let prior_sequence = next.last_sequence();
        next.touch();
        next.admin = new_admin.clone();
        self.commit(&mut next, prior_sequence, None, &op_id).await?;

        info!("vault ownership transferred");
        Ok(())
    }

    /// Unallocated tokens currently pooled in the vault
    pub async fn get_total_balance(&self, vault_id: &VaultId) -> VaultResult<u64> {
        Ok(self.load(vault_id).await?.total_balance)
    }

    /// Full snapshot of a vault
    pub async fn get_vault(&self, vault_id: &VaultId) -> VaultResult<Vault> {
        self.load(vault_id).await
    }

    /// Outstanding allocation for `recipient`, if any
    pub async fn get_allocation(
        &self,
        vault_id: &VaultId,
        recipient: &Identity,
    ) -> VaultResult<Option<u64>> {
        Ok(self.load(vault_id).await?.allocation_of(recipient))
    }

    /// IDs of every vault in the store
    pub async fn list_vaults(&self) -> VaultResult<Vec<VaultId>> {
        Ok(self.storage.list_ids().await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::{LedgerError, MemoryLedger, MockTokenLedger};
    use crate::storage::{MemoryVaultStorage, StorageResult};
    use crate::types::VaultEventKind;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicBool, Ordering};

    fn id(s: &str) -> Identity {
        Identity::from(s)
    }

    async fn setup() -> (VaultStore, MemoryLedger) {
        let ledger = MemoryLedger::new();
        ledger.mint(&id("admin"), 10_000).await.unwrap();
        let store = VaultStore::new(Arc::new(MemoryVaultStorage::new()), Arc::new(ledger.clone()));
        store.init(&id("admin"), &id("custody")).await.unwrap();
        (store, ledger)
    }

    /// Storage whose updates can be made to fail on demand
    #[derive(Default)]
    struct FlakyStorage {
        inner: MemoryVaultStorage,
        fail_updates: AtomicBool,
    }

    #[async_trait]
    impl VaultStorage for FlakyStorage {
        async fn insert(&self, vault: &Vault) -> StorageResult<()> {
            self.inner.insert(vault).await
        }

        async fn update(&self, vault: &mut Vault) -> StorageResult<()> {
            if self.fail_updates.load(Ordering::SeqCst) {
                return Err(StorageError::Database("disk full".to_string()));
            }
            self.inner.update(vault).await
        }

        async fn get(&self, id: &VaultId) -> StorageResult<Option<Vault>> {
            self.inner.get(id).await
        }

        async fn list_ids(&self) -> StorageResult<Vec<VaultId>> {
            self.inner.list_ids().await
        }
    }

    #[tokio::test]
    async fn test_reference_scenario() {
        let (store, ledger) = setup().await;
        let vault_id = id("admin");

        store.deposit(&id("admin"), &vault_id, 1000).await.unwrap();
        assert_eq!(store.get_total_balance(&vault_id).await.unwrap(), 1000);

        store
            .allocate(&id("admin"), &vault_id, &id("recipient"), 400)
            .await
            .unwrap();
        assert_eq!(store.get_total_balance(&vault_id).await.unwrap(), 600);
        assert_eq!(
            store.get_allocation(&vault_id, &id("recipient")).await.unwrap(),
            Some(400)
        );

        assert_eq!(store.claim(&id("recipient"), &vault_id).await.unwrap(), 400);
        assert_eq!(store.get_total_balance(&vault_id).await.unwrap(), 600);
        assert_eq!(
            store.get_allocation(&vault_id, &id("recipient")).await.unwrap(),
            None
        );

        store.withdraw(&id("admin"), &vault_id, 600).await.unwrap();
        assert_eq!(store.get_total_balance(&vault_id).await.unwrap(), 0);

        let err = store.claim(&id("recipient"), &vault_id).await.unwrap_err();
        assert!(matches!(err, VaultError::NotAllocated(_)));

        assert_eq!(ledger.balance_of(&id("admin")).await.unwrap(), 9_600);
        assert_eq!(ledger.balance_of(&id("recipient")).await.unwrap(), 400);
        assert_eq!(ledger.balance_of(&id("custody")).await.unwrap(), 0);

        let vault = store.get_vault(&vault_id).await.unwrap();
        let kinds: Vec<_> = vault.events.ordered().iter().map(VaultEvent::kind).collect();
        assert_eq!(
            kinds,
            vec![
                VaultEventKind::Deposited,
                VaultEventKind::Allocated,
                VaultEventKind::Claimed,
                VaultEventKind::Withdrawn,
            ]
        );
    }

    #[tokio::test]
    async fn test_init_twice_already_exists() {
        let (store, _) = setup().await;
        let err = store.init(&id("admin"), &id("other")).await.unwrap_err();
        assert!(matches!(err, VaultError::AlreadyExists(_)));

        let vault = store.get_vault(&id("admin")).await.unwrap();
        assert_eq!(vault.vault_address, id("custody"));
    }

    #[tokio::test]
    async fn test_missing_vault_is_not_found() {
        let (store, _) = setup().await;
        let ghost = id("ghost");

        assert!(matches!(
            store.get_total_balance(&ghost).await,
            Err(VaultError::NotFound(_))
        ));
        assert!(matches!(
            store.deposit(&ghost, &ghost, 1).await,
            Err(VaultError::NotFound(_))
        ));
        assert!(matches!(
            store.claim(&id("recipient"), &ghost).await,
            Err(VaultError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_non_admin_is_rejected_without_side_effects() {
        let (store, ledger) = setup().await;
        let vault_id = id("admin");
        ledger.mint(&id("mallory"), 500).await.unwrap();
        store.deposit(&id("admin"), &vault_id, 1000).await.unwrap();
        let before = store.get_vault(&vault_id).await.unwrap();

        let mallory = id("mallory");
        let results = [
            store.deposit(&mallory, &vault_id, 100).await,
            store.allocate(&mallory, &vault_id, &mallory, 100).await,
            store.withdraw(&mallory, &vault_id, 100).await,
            store.transfer_ownership(&mallory, &vault_id, &mallory).await,
        ];
        for result in results {
            assert!(matches!(result, Err(VaultError::NotAdmin { .. })));
        }

        assert_eq!(store.get_vault(&vault_id).await.unwrap(), before);
        assert_eq!(ledger.balance_of(&mallory).await.unwrap(), 500);
    }

    #[tokio::test]
    async fn test_insufficient_balance_leaves_state() {
        let (store, _) = setup().await;
        let vault_id = id("admin");
        store.deposit(&id("admin"), &vault_id, 300).await.unwrap();
        let before = store.get_vault(&vault_id).await.unwrap();

        let err = store
            .allocate(&id("admin"), &vault_id, &id("recipient"), 301)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            VaultError::InsufficientBalance {
                available: 300,
                requested: 301
            }
        ));

        let err = store.withdraw(&id("admin"), &vault_id, 301).await.unwrap_err();
        assert!(matches!(err, VaultError::InsufficientBalance { .. }));

        assert_eq!(store.get_vault(&vault_id).await.unwrap(), before);
    }

    #[tokio::test]
    async fn test_allocated_funds_are_not_withdrawable() {
        let (store, _) = setup().await;
        let vault_id = id("admin");
        store.deposit(&id("admin"), &vault_id, 1000).await.unwrap();
        store
            .allocate(&id("admin"), &vault_id, &id("recipient"), 900)
            .await
            .unwrap();

        let err = store.withdraw(&id("admin"), &vault_id, 101).await.unwrap_err();
        assert!(matches!(err, VaultError::InsufficientBalance { available: 100, .. }));
        store.withdraw(&id("admin"), &vault_id, 100).await.unwrap();
    }

    #[tokio::test]
    async fn test_duplicate_allocation_debits_once() {
        let (store, _) = setup().await;
        let vault_id = id("admin");
        store.deposit(&id("admin"), &vault_id, 1000).await.unwrap();

        store
            .allocate(&id("admin"), &vault_id, &id("recipient"), 400)
            .await
            .unwrap();
        let err = store
            .allocate(&id("admin"), &vault_id, &id("recipient"), 400)
            .await
            .unwrap_err();

        assert!(matches!(err, VaultError::DuplicateAllocation(_)));
        assert_eq!(store.get_total_balance(&vault_id).await.unwrap(), 600);
        assert_eq!(
            store.get_allocation(&vault_id, &id("recipient")).await.unwrap(),
            Some(400)
        );
        let vault = store.get_vault(&vault_id).await.unwrap();
        assert_eq!(vault.events.allocated.len(), 1);
    }

    #[tokio::test]
    async fn test_reallocate_after_claim() {
        let (store, _) = setup().await;
        let vault_id = id("admin");
        store.deposit(&id("admin"), &vault_id, 1000).await.unwrap();

        store
            .allocate(&id("admin"), &vault_id, &id("recipient"), 400)
            .await
            .unwrap();
        store.claim(&id("recipient"), &vault_id).await.unwrap();
        store
            .allocate(&id("admin"), &vault_id, &id("recipient"), 250)
            .await
            .unwrap();

        assert_eq!(store.claim(&id("recipient"), &vault_id).await.unwrap(), 250);
        assert_eq!(store.get_total_balance(&vault_id).await.unwrap(), 350);
    }

    #[tokio::test]
    async fn test_transfer_ownership_moves_privileges() {
        let (store, ledger) = setup().await;
        let vault_id = id("admin");
        ledger.mint(&id("successor"), 100).await.unwrap();

        store
            .transfer_ownership(&id("admin"), &vault_id, &id("successor"))
            .await
            .unwrap();

        let err = store.deposit(&id("admin"), &vault_id, 10).await.unwrap_err();
        assert!(matches!(err, VaultError::NotAdmin { .. }));
        store.deposit(&id("successor"), &vault_id, 100).await.unwrap();

        let vault = store.get_vault(&vault_id).await.unwrap();
        assert_eq!(vault.admin, id("successor"));
        assert_eq!(vault.vault_address, id("custody"));
        assert_eq!(vault.id, vault_id);
        // ownership transfer itself records no event
        assert_eq!(vault.events.len(), 1);
    }

    #[tokio::test]
    async fn test_deposit_without_external_funds_changes_nothing() {
        let (store, ledger) = setup().await;
        let vault_id = id("admin");

        let err = store.deposit(&id("admin"), &vault_id, 10_001).await.unwrap_err();

        assert!(matches!(
            err,
            VaultError::Ledger(LedgerError::InsufficientFunds { .. })
        ));
        let vault = store.get_vault(&vault_id).await.unwrap();
        assert_eq!(vault.total_balance, 0);
        assert!(vault.events.is_empty());
        assert_eq!(ledger.balance_of(&id("admin")).await.unwrap(), 10_000);
    }

    #[tokio::test]
    async fn test_deposit_overflow_never_reaches_ledger() {
        let mut ledger = MockTokenLedger::new();
        ledger
            .expect_transfer()
            .times(1)
            .returning(|_, _, _| Ok(()));

        let store = VaultStore::new(Arc::new(MemoryVaultStorage::new()), Arc::new(ledger));
        let vault_id = store.init(&id("admin"), &id("custody")).await.unwrap();

        store.deposit(&id("admin"), &vault_id, u64::MAX).await.unwrap();
        let err = store.deposit(&id("admin"), &vault_id, 1).await.unwrap_err();

        assert!(matches!(err, VaultError::Overflow));
        assert_eq!(store.get_total_balance(&vault_id).await.unwrap(), u64::MAX);
    }

    #[tokio::test]
    async fn test_failed_claim_transfer_keeps_allocation() {
        let mut ledger = MockTokenLedger::new();
        ledger.expect_transfer().returning(|from, _, _| {
            if from.as_str() == "custody" {
                Err(LedgerError::Unavailable("ledger offline".to_string()))
            } else {
                Ok(())
            }
        });

        let store = VaultStore::new(Arc::new(MemoryVaultStorage::new()), Arc::new(ledger));
        let vault_id = store.init(&id("admin"), &id("custody")).await.unwrap();
        store.deposit(&id("admin"), &vault_id, 1000).await.unwrap();
        store
            .allocate(&id("admin"), &vault_id, &id("recipient"), 400)
            .await
            .unwrap();
        let before = store.get_vault(&vault_id).await.unwrap();

        let err = store.claim(&id("recipient"), &vault_id).await.unwrap_err();
        assert!(matches!(err, VaultError::Ledger(LedgerError::Unavailable(_))));

        let err = store.withdraw(&id("admin"), &vault_id, 100).await.unwrap_err();
        assert!(matches!(err, VaultError::Ledger(_)));

        assert_eq!(store.get_vault(&vault_id).await.unwrap(), before);
    }

    #[tokio::test]
    async fn test_failed_write_reverses_transfer() {
        let ledger = MemoryLedger::new();
        ledger.mint(&id("admin"), 1000).await.unwrap();
        let storage = Arc::new(FlakyStorage::default());
        let store = VaultStore::new(storage.clone(), Arc::new(ledger.clone()));
        let vault_id = store.init(&id("admin"), &id("custody")).await.unwrap();

        storage.fail_updates.store(true, Ordering::SeqCst);
        let err = store.deposit(&id("admin"), &vault_id, 700).await.unwrap_err();

        assert!(matches!(err, VaultError::Storage(_)));
        assert_eq!(ledger.balance_of(&id("admin")).await.unwrap(), 1000);
        assert_eq!(ledger.balance_of(&id("custody")).await.unwrap(), 0);
        assert_eq!(store.get_total_balance(&vault_id).await.unwrap(), 0);
    }

    async fn funded_flaky_store() -> (VaultStore, MemoryLedger, Arc<FlakyStorage>) {
        let ledger = MemoryLedger::new();
        ledger.mint(&id("admin"), 1000).await.unwrap();
        let storage = Arc::new(FlakyStorage::default());
        let store = VaultStore::new(storage.clone(), Arc::new(ledger.clone()));
        let vault_id = store.init(&id("admin"), &id("custody")).await.unwrap();
        store.deposit(&id("admin"), &vault_id, 1000).await.unwrap();
        store
            .allocate(&id("admin"), &vault_id, &id("recipient"), 400)
            .await
            .unwrap();
        (store, ledger, storage)
    }

    #[tokio::test]
    async fn test_failed_claim_write_refunds_custody() {
        let (store, ledger, storage) = funded_flaky_store().await;
        let vault_id = id("admin");
        let before = store.get_vault(&vault_id).await.unwrap();

        storage.fail_updates.store(true, Ordering::SeqCst);
        let err = store.claim(&id("recipient"), &vault_id).await.unwrap_err();

        assert!(matches!(err, VaultError::Storage(StorageError::Database(_))));
        assert_eq!(ledger.balance_of(&id("custody")).await.unwrap(), 1000);
        assert_eq!(ledger.balance_of(&id("recipient")).await.unwrap(), 0);
        assert_eq!(store.get_vault(&vault_id).await.unwrap(), before);

        storage.fail_updates.store(false, Ordering::SeqCst);
        assert_eq!(store.claim(&id("recipient"), &vault_id).await.unwrap(), 400);
        assert_eq!(ledger.balance_of(&id("recipient")).await.unwrap(), 400);
    }

    #[tokio::test]
    async fn test_failed_withdraw_write_refunds_custody() {
        let (store, ledger, storage) = funded_flaky_store().await;
        let vault_id = id("admin");

        storage.fail_updates.store(true, Ordering::SeqCst);
        let err = store.withdraw(&id("admin"), &vault_id, 300).await.unwrap_err();

        assert!(matches!(err, VaultError::Storage(_)));
        assert_eq!(ledger.balance_of(&id("custody")).await.unwrap(), 1000);
        assert_eq!(ledger.balance_of(&id("admin")).await.unwrap(), 0);
        assert_eq!(store.get_total_balance(&vault_id).await.unwrap(), 600);
        assert!(store.get_vault(&vault_id).await.unwrap().events.withdrawn.is_empty());
    }

    #[tokio::test]
    async fn test_lock_table_is_emptied_after_operations() {
        let (store, _) = setup().await;
        let store = Arc::new(store);
        let vault_id = id("admin");
        assert_eq!(store.tracked_locks(), 0);

        for n in 0..50 {
            let ghost = id(&format!("ghost-{}", n));
            let _ = store.deposit(&ghost, &ghost, 1).await;
            let _ = store.claim(&id("recipient"), &ghost).await;
        }
        assert_eq!(store.tracked_locks(), 0);

        let mut handles = Vec::new();
        for _ in 0..20 {
            let store = store.clone();
            let vault_id = vault_id.clone();
            handles.push(tokio::spawn(async move {
                store.deposit(&id("admin"), &vault_id, 10).await
            }));
        }
        for handle in handles {
            handle.await.unwrap().unwrap();
        }

        assert_eq!(store.get_total_balance(&vault_id).await.unwrap(), 200);
        assert_eq!(store.tracked_locks(), 0);
    }

    #[tokio::test]
    async fn test_event_sequences_are_contiguous() {
        let (store, _) = setup().await;
        let vault_id = id("admin");
        store.deposit(&id("admin"), &vault_id, 1000).await.unwrap();
        store
            .allocate(&id("admin"), &vault_id, &id("recipient"), 400)
            .await
            .unwrap();
        store.claim(&id("recipient"), &vault_id).await.unwrap();
        store.withdraw(&id("admin"), &vault_id, 100).await.unwrap();

        let vault = store.get_vault(&vault_id).await.unwrap();
        let sequences: Vec<_> = vault.events.ordered().iter().map(VaultEvent::sequence).collect();
        assert_eq!(sequences, vec![1, 2, 3, 4]);
        assert_eq!(vault.version, 4);
    }

    #[tokio::test]
    async fn test_list_vaults() {
        let (store, _) = setup().await;
        store.init(&id("second"), &id("custody-2")).await.unwrap();

        let ids = store.list_vaults().await.unwrap();
        assert_eq!(ids, vec![id("admin"), id("second")]);
    }
}
