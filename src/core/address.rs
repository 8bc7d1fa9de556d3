//! Participant Addresses
//!
//! 20-byte account identifiers. Implements Ord so every per-market table
//! can live in a BTreeMap with deterministic iteration order.

use std::fmt;
use std::str::FromStr;
use serde::{Serialize, Serializer, Deserialize, Deserializer};

use super::hash::{DomainHasher, ADDRESS_DOMAIN};

/// Account identifier (participant, originator or custody).
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Address(pub [u8; 20]);

impl Address {
    /// The all-zero address.
    pub const ZERO: Self = Self([0; 20]);

    /// Create from raw bytes.
    pub const fn new(bytes: [u8; 20]) -> Self {
        Self(bytes)
    }

    /// Derive a deterministic address from an external subject
    /// (e.g. a JWT `sub` claim).
    pub fn from_subject(subject: &str) -> Self {
        let mut hasher = DomainHasher::new(ADDRESS_DOMAIN);
        hasher.update_bytes(subject.as_bytes());
        let hash = hasher.finalize();

        let mut bytes = [0u8; 20];
        bytes.copy_from_slice(&hash[12..]);
        Self(bytes)
    }

    /// Get raw bytes.
    pub fn as_bytes(&self) -> &[u8; 20] {
        &self.0
    }

    /// Short form for logs (first 4 bytes).
    pub fn short(&self) -> String {
        hex::encode(&self.0[..4])
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{}", hex::encode(self.0))
    }
}

impl fmt::Debug for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Address(0x{})", hex::encode(self.0))
    }
}

/// Error parsing an address from text.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid address: expected 20 hex bytes")]
pub struct ParseAddressError;

impl FromStr for Address {
    type Err = ParseAddressError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.strip_prefix("0x").unwrap_or(s);
        let bytes = hex::decode(s).map_err(|_| ParseAddressError)?;
        if bytes.len() != 20 {
            return Err(ParseAddressError);
        }
        let mut arr = [0u8; 20];
        arr.copy_from_slice(&bytes);
        Ok(Self(arr))
    }
}

// Serialized as a 0x-prefixed hex string, so addresses can key JSON maps.
impl Serialize for Address {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for Address {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let text = String::deserialize(deserializer)?;
        text.parse().map_err(serde::de::Error::custom)
    }
}
