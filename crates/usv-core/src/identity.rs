// crates/usv-core/src/identity.rs
//
// Account and asset identifiers.
//
// Every principal in the protocol (administrator, depositors, the treasury,
// the staking contract, barter depositories) and every asset ledger is named
// by a 32-byte `Address`. Addresses of protocol-owned accounts are derived
// deterministically from a label with SHA-256 so that a restarted node
// reconstructs the same identities.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::error::UsvError;

/// A 32-byte account or asset identifier.
///
/// Serialized as a `0x`-prefixed hex string so it can be used as a JSON map key.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(into = "String", try_from = "String")]
pub struct Address(pub [u8; 32]);

impl Address {
    /// The all-zero address. Never holds a balance and never receives a grant.
    pub const ZERO: Address = Address([0u8; 32]);

    /// Derive an address from a human-readable label (`sha256(label)`).
    pub fn derive(label: &str) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(b"usv:address:");
        hasher.update(label.as_bytes());
        let digest = hasher.finalize();
        let mut bytes = [0u8; 32];
        bytes.copy_from_slice(&digest);
        Address(bytes)
    }

    /// Whether this is the zero address.
    pub fn is_zero(&self) -> bool {
        self.0 == [0u8; 32]
    }

    /// Hex encoding without the `0x` prefix.
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    /// Short form used in log lines: `0x1234abcd`.
    pub fn short(&self) -> String {
        format!("0x{}", &self.to_hex()[..8])
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{}", self.to_hex())
    }
}

impl fmt::Debug for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Address({})", self.short())
    }
}

impl FromStr for Address {
    type Err = UsvError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.strip_prefix("0x").unwrap_or(s);
        let bytes = hex::decode(trimmed)
            .map_err(|e| UsvError::Serialization(format!("Invalid address hex {}: {}", s, e)))?;
        let array: [u8; 32] = bytes.try_into().map_err(|_| {
            UsvError::Serialization(format!("Address must be exactly 32 bytes: {}", s))
        })?;
        Ok(Address(array))
    }
}

impl From<Address> for String {
    fn from(addr: Address) -> Self {
        addr.to_string()
    }
}

impl TryFrom<String> for Address {
    type Error = UsvError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}
