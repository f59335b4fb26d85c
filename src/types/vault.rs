//! Vault Record
//!
//! One record per vault: the admin, the custodial address holding the pooled
//! tokens, the unallocated balance, outstanding allocations and the event logs.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use super::events::VaultEvents;
use super::identity::{Identity, VaultId};

/// Current unix time in seconds
pub fn unix_now() -> u64 {
    chrono::Utc::now().timestamp().max(0) as u64
}

/// A custodial token vault
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Vault {
    /// Key of this vault in the store (the creating admin's identity)
    pub id: VaultId,
    /// Account allowed to deposit, allocate, withdraw and hand over ownership
    pub admin: Identity,
    /// Ledger account where pooled tokens are custodied; fixed at creation
    pub vault_address: Identity,
    /// Pooled tokens not yet allocated to any recipient
    pub total_balance: u64,
    /// Outstanding, unclaimed allocations by recipient
    pub allocations: BTreeMap<Identity, u64>,
    pub events: VaultEvents,
    /// Write counter; storage only accepts an update carrying the stored version
    pub version: u64,
    pub created_at: u64,
    pub updated_at: u64,
}

impl Vault {
    /// Create a fresh vault owned by `admin`
    pub fn new(admin: Identity, vault_address: Identity) -> Self {
        let now = unix_now();
        Self {
            id: admin.clone(),
            admin,
            vault_address,
            total_balance: 0,
            allocations: BTreeMap::new(),
            events: VaultEvents::default(),
            version: 0,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn is_admin(&self, caller: &Identity) -> bool {
        &self.admin == caller
    }

    /// Outstanding allocation for `recipient`, if any
    pub fn allocation_of(&self, recipient: &Identity) -> Option<u64> {
        self.allocations.get(recipient).copied()
    }

    /// Sum of all outstanding allocations
    pub fn total_allocated(&self) -> u128 {
        self.allocations.values().map(|&a| u128::from(a)).sum()
    }

    /// Sequence number for the next recorded event
    pub fn next_sequence(&self) -> u64 {
        self.events.len() as u64 + 1
    }

    /// Sequence number of the most recent event (0 if none)
    pub fn last_sequence(&self) -> u64 {
        self.events.len() as u64
    }

    pub fn touch(&mut self) {
        self.updated_at = unix_now();
    }
}
