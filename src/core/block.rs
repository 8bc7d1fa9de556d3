//! Block Context
//!
//! Every transaction executes inside a block: a number, a wall-clock
//! timestamp (seconds) and a 32-byte randomness value. The randomness is
//! ambient: no caller chooses it, which is what the close checks rely on.
//!
//! `BlockProducer` chains the randomness by hashing the previous value with
//! the new block's number and timestamp. Given the same seed it produces the
//! same chain on every platform.

use serde::{Serialize, Deserialize};

use super::hash::{Digest32, DomainHasher, BLOCK_DOMAIN};

/// Ambient execution context for one block.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockContext {
    /// Block height.
    pub number: u64,
    /// Block timestamp (Unix seconds).
    pub timestamp: u64,
    /// Unpredictable per-block randomness.
    pub prevrandao: Digest32,
}

impl BlockContext {
    /// Create a context from explicit parts.
    pub const fn new(number: u64, timestamp: u64, prevrandao: Digest32) -> Self {
        Self { number, timestamp, prevrandao }
    }

    /// Context with randomness derived from number and timestamp only.
    ///
    /// Deterministic; intended for tests and scripted runs.
    pub fn at(number: u64, timestamp: u64) -> Self {
        Self {
            number,
            timestamp,
            prevrandao: chain_randomness(&[0; 32], number, timestamp),
        }
    }
}

/// Derive the next randomness value in the chain.
pub fn chain_randomness(previous: &Digest32, number: u64, timestamp: u64) -> Digest32 {
    let mut hasher = DomainHasher::new(BLOCK_DOMAIN);
    hasher.update_digest(previous);
    hasher.update_u64(number);
    hasher.update_u64(timestamp);
    hasher.finalize()
}

/// Produces consecutive blocks with chained randomness.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct BlockProducer {
    current: BlockContext,
}

impl BlockProducer {
    /// Start a chain from a secret seed at the given timestamp.
    pub fn new(seed: Digest32, timestamp: u64) -> Self {
        Self {
            current: BlockContext {
                number: 0,
                timestamp,
                prevrandao: chain_randomness(&seed, 0, timestamp),
            },
        }
    }

    /// Resume a chain from a previously produced block.
    pub fn resume(current: BlockContext) -> Self {
        Self { current }
    }

    /// The block transactions currently execute in.
    pub fn current(&self) -> &BlockContext {
        &self.current
    }

    /// Seal the current block and open the next one.
    ///
    /// Timestamps never move backwards, even if the wall clock does.
    pub fn advance(&mut self, timestamp: u64) -> &BlockContext {
        let number = self.current.number + 1;
        let timestamp = timestamp.max(self.current.timestamp);
        self.current = BlockContext {
            number,
            timestamp,
            prevrandao: chain_randomness(&self.current.prevrandao, number, timestamp),
        };
        &self.current
    }
}
