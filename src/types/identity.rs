//! Account identities
//!
//! An `Identity` names an account on the token ledger: an admin, a recipient
//! or the custodial address holding the pooled funds. The caller identity of
//! every vault operation is attested upstream and taken as given here.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Identity validation errors
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum IdentityError {
    #[error("identity must not be empty")]
    Empty,

    #[error("identity must not contain whitespace: {0:?}")]
    Whitespace(String),
}

/// Account identity on the ledger
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Identity(String);

/// Vaults are keyed by their admin's identity at creation time
pub type VaultId = Identity;

impl Identity {
    /// Parse and validate an identity from user input
    pub fn parse(s: &str) -> Result<Self, IdentityError> {
        let trimmed = s.trim();
        if trimmed.is_empty() {
            return Err(IdentityError::Empty);
        }
        if trimmed.chars().any(char::is_whitespace) {
            return Err(IdentityError::Whitespace(trimmed.to_string()));
        }
        Ok(Self(trimmed.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for Identity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl std::str::FromStr for Identity {
    type Err = IdentityError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl From<&str> for Identity {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for Identity {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl AsRef<str> for Identity {
    fn as_ref(&self) -> &str {
        &self.0
    }
}
