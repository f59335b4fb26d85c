//! Shared Types Module
//!
//! Data types shared across the token vault: caller identities, the vault
//! record and its append-only event logs.

pub mod events;
pub mod identity;
pub mod vault;

// Re-exports for convenience
pub use events::{
    AllocatedEvent, ClaimedEvent, DepositedEvent, VaultEvent, VaultEventKind, VaultEvents,
    WithdrawnEvent,
};
pub use identity::{Identity, IdentityError, VaultId};
pub use vault::{unix_now, Vault};
