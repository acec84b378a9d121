//! PartyId - Opaque address of a borrower or lender

use serde::{Deserialize, Serialize};
use std::fmt;

/// Opaque, address-like party identifier.
///
/// The engine does not interpret the contents; identity and sessions live
/// outside the ledger. Addresses compare exactly as given.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PartyId(String);

impl PartyId {
    pub fn new(address: impl Into<String>) -> Self {
        Self(address.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for PartyId {
    fn from(address: &str) -> Self {
        Self::new(address)
    }
}

impl From<String> for PartyId {
    fn from(address: String) -> Self {
        Self(address)
    }
}

impl fmt::Display for PartyId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
