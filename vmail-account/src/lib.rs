pub mod address;
pub mod credential;

// An account is composed of 3 things:
// - An address (the identity, also the storage key)
// - A credential (plaintext, only ever held in memory)
// - Some forwarding rules
use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use address::Address;
pub use credential::{Argon2Hasher, ArcHasher, CredentialHasher};

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum AccountError {
    #[error("invalid address {0:?}")]
    InvalidAddress(String),
    #[error("credential is empty or shorter than {min_length} characters")]
    WeakOrEmptyCredential { min_length: usize },
    #[error("hashed credential is malformed")]
    MalformedHash,
    #[error("argon2 error: {0}")]
    Hashing(String),
}

/// Snapshot of an account record at the moment of a lifecycle event.
///
/// The persistence layer owns the record; this side only reads it, so the
/// address and destinations are kept as raw strings and validated when the
/// snapshot is processed.
#[derive(Clone, Debug)]
pub struct Account {
    pub address: String,
    pub credential: Credential,
    pub forwarding_rules: Vec<ForwardingRule>,
}

impl Account {
    pub fn new(
        address: impl Into<String>,
        credential: impl Into<Credential>,
        forwarding_rules: Vec<ForwardingRule>,
    ) -> Self {
        Self {
            address: address.into(),
            credential: credential.into(),
            forwarding_rules,
        }
    }

    /// Checks the address and every forwarding destination.
    pub fn validate(&self) -> Result<Address, AccountError> {
        let address = Address::parse(&self.address)?;
        for rule in self.forwarding_rules.iter() {
            Address::parse(&rule.destination)?;
        }
        Ok(address)
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ForwardingRule {
    pub destination: String,
}

impl ForwardingRule {
    pub fn new(destination: impl Into<String>) -> Self {
        Self {
            destination: destination.into(),
        }
    }
}

/// Plaintext secret. Never printed, never serialized.
#[derive(Clone, PartialEq, Eq)]
pub struct Credential(String);

impl Credential {
    pub fn expose(&self) -> &str {
        self.0.as_str()
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Credential(<redacted>)")
    }
}

impl From<String> for Credential {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for Credential {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}
