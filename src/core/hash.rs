//! Domain-Separated Hashing
//!
//! Provides deterministic SHA-256 hashing for:
//! - Bet commitments `H(choice, salt, participant)`
//! - Anti-sniping close checks
//! - Block randomness chaining
//! - Address derivation from external identities

use sha2::{Sha256, Digest};

/// Hash output type (256 bits / 32 bytes)
pub type Digest32 = [u8; 32];

/// Domain separator for bet commitments.
pub const COMMIT_DOMAIN: &[u8] = b"HELIX_COMMIT_V1";

/// Domain separator for random-close checks.
pub const ENTROPY_DOMAIN: &[u8] = b"HELIX_CLOSE_CHECK_V1";

/// Domain separator for block randomness.
pub const BLOCK_DOMAIN: &[u8] = b"HELIX_BLOCK_V1";

/// Domain separator for subject -> address derivation.
pub const ADDRESS_DOMAIN: &[u8] = b"HELIX_ADDRESS_V1";

/// Deterministic hasher with a domain prefix.
///
/// Wraps SHA-256 with typed update helpers.
/// Order of updates is part of the hash definition.
pub struct DomainHasher {
    hasher: Sha256,
}

impl DomainHasher {
    /// Create a new hasher with domain separator.
    pub fn new(domain: &[u8]) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(domain);
        Self { hasher }
    }

    /// Create hasher for bet commitments.
    pub fn for_commitment() -> Self {
        Self::new(COMMIT_DOMAIN)
    }

    /// Create hasher for close checks.
    pub fn for_close_check() -> Self {
        Self::new(ENTROPY_DOMAIN)
    }

    /// Update with raw bytes.
    #[inline]
    pub fn update_bytes(&mut self, bytes: &[u8]) {
        self.hasher.update(bytes);
    }

    /// Update with a u8 value.
    #[inline]
    pub fn update_u8(&mut self, value: u8) {
        self.hasher.update([value]);
    }

    /// Update with a u64 value (big-endian).
    #[inline]
    pub fn update_u64(&mut self, value: u64) {
        self.hasher.update(value.to_be_bytes());
    }

    /// Update with a 32-byte digest.
    #[inline]
    pub fn update_digest(&mut self, digest: &Digest32) {
        self.hasher.update(digest);
    }

    /// Finalize and return the hash.
    pub fn finalize(self) -> Digest32 {
        self.hasher.finalize().into()
    }
}

/// Compute a simple hash of arbitrary data.
pub fn hash_bytes(data: &[u8]) -> Digest32 {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hasher.finalize().into()
}

/// Compute hash with domain separator.
pub fn hash_with_domain(domain: &[u8], data: &[u8]) -> Digest32 {
    let mut hasher = Sha256::new();
    hasher.update(domain);
    hasher.update(data);
    hasher.finalize().into()
}

/// Read the leading 16 bytes of a digest as a big-endian integer.
///
/// Used to compare a hash against a difficulty target.
#[inline]
pub fn digest_prefix_u128(digest: &Digest32) -> u128 {
    let mut prefix = [0u8; 16];
    prefix.copy_from_slice(&digest[..16]);
    u128::from_be_bytes(prefix)
}

/// Parse a 32-byte value from a hex string (optional `0x` prefix).
pub fn digest_from_hex(s: &str) -> Option<Digest32> {
    let s = s.strip_prefix("0x").unwrap_or(s);
    let bytes = hex::decode(s).ok()?;
    if bytes.len() != 32 {
        return None;
    }
    let mut out = [0u8; 32];
    out.copy_from_slice(&bytes);
    Some(out)
}

// =============================================================================
// TESTS
// =============================================================================
