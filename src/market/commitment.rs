//! Commit-Reveal Binding
//!
//! A bet is hidden behind `H(choice, salt, participant)` until the reveal
//! window. Binding the participant address into the preimage stops anyone
//! from copying another participant's commitment hash.

use serde::{Serialize, Deserialize};

use crate::core::{Address, Amount, Digest32, DomainHasher};
use super::choice::Choice;

/// Secret blinding value chosen by the participant.
pub type Salt = [u8; 32];

/// A stored, not yet revealed bet.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Commitment {
    /// Binding hash.
    pub hash: Digest32,
    /// Stake held in custody.
    pub amount: Amount,
}

impl Commitment {
    /// Create a commitment record.
    pub fn new(hash: Digest32, amount: Amount) -> Self {
        Self { hash, amount }
    }

    /// Check whether `(tag, salt)` opens this commitment for `participant`.
    pub fn opens(&self, tag: u8, salt: &Salt, participant: &Address) -> bool {
        commitment_hash(tag, salt, participant) == self.hash
    }
}

/// Hash a raw choice tag, salt and participant.
///
/// The raw tag is hashed, not a validated [`Choice`], so a reveal can match
/// its hash and still be rejected for an out-of-range choice.
pub fn commitment_hash(tag: u8, salt: &Salt, participant: &Address) -> Digest32 {
    let mut hasher = DomainHasher::for_commitment();
    hasher.update_u8(tag);
    hasher.update_bytes(salt);
    hasher.update_bytes(participant.as_bytes());
    hasher.finalize()
}

/// Client-side helper: hash a typed choice.
pub fn commit_choice(choice: Choice, salt: &Salt, participant: &Address) -> Digest32 {
    commitment_hash(choice.as_u8(), salt, participant)
}

/// Generate a fresh random salt (two v4 UUIDs).
pub fn generate_salt() -> Salt {
    let mut salt = [0u8; 32];
    salt[..16].copy_from_slice(uuid::Uuid::new_v4().as_bytes());
    salt[16..].copy_from_slice(uuid::Uuid::new_v4().as_bytes());
    salt
}
