//! Vault Event Logs
//!
//! Four append-only logs, one per mutating operation kind. Every entry carries
//! a per-vault `sequence` shared across all four logs, so the overall order of
//! operations on a vault can be reconstructed.

use serde::{Deserialize, Serialize};

use super::identity::Identity;

/// Kind of a recorded vault event
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VaultEventKind {
    Deposited,
    Withdrawn,
    Allocated,
    Claimed,
}

impl std::fmt::Display for VaultEventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Deposited => "deposited",
            Self::Withdrawn => "withdrawn",
            Self::Allocated => "allocated",
            Self::Claimed => "claimed",
        };
        write!(f, "{}", s)
    }
}

impl std::str::FromStr for VaultEventKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "deposited" => Ok(Self::Deposited),
            "withdrawn" => Ok(Self::Withdrawn),
            "allocated" => Ok(Self::Allocated),
            "claimed" => Ok(Self::Claimed),
            _ => Err(format!("unknown event kind: {}", s)),
        }
    }
}

/// Tokens entered the pool
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DepositedEvent {
    pub sequence: u64,
    pub amount: u64,
    pub recorded_at: u64,
}

/// Unallocated tokens left the pool to the admin
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WithdrawnEvent {
    pub sequence: u64,
    pub amount: u64,
    pub recorded_at: u64,
}

/// Tokens earmarked for a recipient
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AllocatedEvent {
    pub sequence: u64,
    pub recipient: Identity,
    pub amount: u64,
    pub recorded_at: u64,
}

/// A recipient collected their allocation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClaimedEvent {
    pub sequence: u64,
    pub recipient: Identity,
    pub amount: u64,
    pub recorded_at: u64,
}

/// A single event of any kind
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum VaultEvent {
    Deposited(DepositedEvent),
    Withdrawn(WithdrawnEvent),
    Allocated(AllocatedEvent),
    Claimed(ClaimedEvent),
}

impl VaultEvent {
    pub fn kind(&self) -> VaultEventKind {
        match self {
            Self::Deposited(_) => VaultEventKind::Deposited,
            Self::Withdrawn(_) => VaultEventKind::Withdrawn,
            Self::Allocated(_) => VaultEventKind::Allocated,
            Self::Claimed(_) => VaultEventKind::Claimed,
        }
    }

    pub fn sequence(&self) -> u64 {
        match self {
            Self::Deposited(e) => e.sequence,
            Self::Withdrawn(e) => e.sequence,
            Self::Allocated(e) => e.sequence,
            Self::Claimed(e) => e.sequence,
        }
    }

    pub fn amount(&self) -> u64 {
        match self {
            Self::Deposited(e) => e.amount,
            Self::Withdrawn(e) => e.amount,
            Self::Allocated(e) => e.amount,
            Self::Claimed(e) => e.amount,
        }
    }

    /// Recipient for allocate/claim events
    pub fn recipient(&self) -> Option<&Identity> {
        match self {
            Self::Allocated(e) => Some(&e.recipient),
            Self::Claimed(e) => Some(&e.recipient),
            Self::Deposited(_) | Self::Withdrawn(_) => None,
        }
    }

    pub fn recorded_at(&self) -> u64 {
        match self {
            Self::Deposited(e) => e.recorded_at,
            Self::Withdrawn(e) => e.recorded_at,
            Self::Allocated(e) => e.recorded_at,
            Self::Claimed(e) => e.recorded_at,
        }
    }
}

/// The four append-only event logs of a vault
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct VaultEvents {
    pub deposited: Vec<DepositedEvent>,
    pub withdrawn: Vec<WithdrawnEvent>,
    pub allocated: Vec<AllocatedEvent>,
    pub claimed: Vec<ClaimedEvent>,
}

impl VaultEvents {
    /// Append an event to the log matching its kind
    pub fn append(&mut self, event: VaultEvent) {
        match event {
            VaultEvent::Deposited(e) => self.deposited.push(e),
            VaultEvent::Withdrawn(e) => self.withdrawn.push(e),
            VaultEvent::Allocated(e) => self.allocated.push(e),
            VaultEvent::Claimed(e) => self.claimed.push(e),
        }
    }

    /// Total number of events across all logs
    pub fn len(&self) -> usize {
        self.deposited.len() + self.withdrawn.len() + self.allocated.len() + self.claimed.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// All events merged into operation order
    pub fn ordered(&self) -> Vec<VaultEvent> {
        let mut all: Vec<VaultEvent> = self
            .deposited
            .iter()
            .cloned()
            .map(VaultEvent::Deposited)
            .chain(self.withdrawn.iter().cloned().map(VaultEvent::Withdrawn))
            .chain(self.allocated.iter().cloned().map(VaultEvent::Allocated))
            .chain(self.claimed.iter().cloned().map(VaultEvent::Claimed))
            .collect();
        all.sort_by_key(VaultEvent::sequence);
        all
    }

    /// Events with a sequence number above `after`
    pub fn since(&self, after: u64) -> Vec<VaultEvent> {
        self.ordered()
            .into_iter()
            .filter(|e| e.sequence() > after)
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_append_routes_by_kind_and_orders_by_sequence() {
        let mut events = VaultEvents::default();
        events.append(VaultEvent::Deposited(DepositedEvent {
            sequence: 1,
            amount: 1000,
            recorded_at: 0,
        }));
        events.append(VaultEvent::Claimed(ClaimedEvent {
            sequence: 3,
            recipient: Identity::from("r"),
            amount: 400,
            recorded_at: 0,
        }));
        events.append(VaultEvent::Allocated(AllocatedEvent {
            sequence: 2,
            recipient: Identity::from("r"),
            amount: 400,
            recorded_at: 0,
        }));

        assert_eq!(events.deposited.len(), 1);
        assert_eq!(events.allocated.len(), 1);
        assert_eq!(events.claimed.len(), 1);
        assert!(events.withdrawn.is_empty());

        let kinds: Vec<_> = events.ordered().iter().map(VaultEvent::kind).collect();
        assert_eq!(
            kinds,
            vec![
                VaultEventKind::Deposited,
                VaultEventKind::Allocated,
                VaultEventKind::Claimed
            ]
        );
        assert_eq!(events.since(1).len(), 2);
    }

    #[test]
    fn test_kind_round_trips_through_str() {
        for kind in [
            VaultEventKind::Deposited,
            VaultEventKind::Withdrawn,
            VaultEventKind::Allocated,
            VaultEventKind::Claimed,
        ] {
            assert_eq!(kind.to_string().parse::<VaultEventKind>(), Ok(kind));
        }
        assert!("minted".parse::<VaultEventKind>().is_err());
    }
}
