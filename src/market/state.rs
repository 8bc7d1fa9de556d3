//! Market State Definitions
//!
//! All per-market state lives in one [`MarketRecord`]: the market header,
//! its pending commitments and its revealed positions. Records are held in
//! a [`MarketBook`] indexed by market id. Uses BTreeMap for deterministic
//! iteration order.

use std::collections::BTreeMap;
use serde::{Serialize, Deserialize};

use crate::core::{Address, Amount};
use super::choice::{Choice, Outcome};
use super::commitment::Commitment;
use super::entropy::RandomClose;
use super::error::{MarketError, MarketResult};
use super::pool::PoolTotals;

/// Market identifier (sequential from 0).
pub type MarketId = u64;

// =============================================================================
// MARKET
// =============================================================================

/// One statement and its settlement state.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Market {
    /// Market id.
    pub id: MarketId,

    /// Content reference (e.g. an IPFS CID), 1..=128 bytes.
    pub content_ref: String,

    /// Submitter; receives the originator fee.
    pub originator: Address,

    /// Creation timestamp.
    pub created_at: u64,

    /// Fixed commit deadline. `None` for random-close markets.
    pub fixed_commit_end: Option<u64>,

    /// Reveal window length, counted from the commit end.
    pub reveal_duration: u64,

    /// Revealed stake per choice.
    pub pools: PoolTotals,

    /// Frozen result once resolved.
    pub outcome: Option<Outcome>,

    /// Fee paid to the originator at resolution.
    pub originator_fee: Amount,

    /// Amount distributed among claimants.
    pub reward_pool: Amount,

    /// Winning stake already claimed.
    pub claimed_winning_stake: Amount,

    /// Reward already paid out.
    pub claimed_reward_paid: Amount,

    /// Random-close configuration, if enabled.
    pub random_close: Option<RandomClose>,

    /// Escrowed ping bounty still held for this market.
    pub ping_bounty: Amount,
}

impl Market {
    /// Effective commit end: the fixed deadline, or the latched close time.
    pub fn commit_end(&self) -> Option<u64> {
        match &self.random_close {
            Some(rc) => rc.closed_at,
            None => self.fixed_commit_end,
        }
    }

    /// Reveal deadline, once the commit end is known.
    pub fn reveal_end(&self) -> Option<u64> {
        self.commit_end()
            .map(|end| end.saturating_add(self.reveal_duration))
    }

    /// Whether `resolve` has run.
    #[inline]
    pub fn is_resolved(&self) -> bool {
        self.outcome.is_some()
    }

    /// Whether random close is enabled.
    #[inline]
    pub fn has_random_close(&self) -> bool {
        self.random_close.is_some()
    }

    /// Total stake on the winning side (0 for ties and unresolved markets).
    pub fn winning_pool(&self) -> Amount {
        self.outcome
            .and_then(Outcome::winning_choice)
            .map(|choice| self.pools.get(choice))
            .unwrap_or(0)
    }
}

// =============================================================================
// POSITION
// =============================================================================

/// Revealed stakes of one participant in one market.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Position {
    /// Revealed stake, indexed by [`Choice::index`].
    pub stakes: [Amount; 3],

    /// Whether the payout has been claimed.
    pub claimed: bool,
}

impl Position {
    /// Stake on one choice.
    #[inline]
    pub fn stake(&self, choice: Choice) -> Amount {
        self.stakes[choice.index()]
    }

    /// Sum of all revealed stakes.
    pub fn total(&self) -> Amount {
        self.stakes.iter().fold(0, |acc, s| acc.saturating_add(*s))
    }
}

// =============================================================================
// RECORD + BOOK
// =============================================================================

/// Everything stored for one market.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct MarketRecord {
    /// Header and accounting.
    pub market: Market,

    /// Pending (unrevealed) commitments. Removed once revealed or withdrawn.
    pub commitments: BTreeMap<Address, Commitment>,

    /// Revealed positions.
    pub positions: BTreeMap<Address, Position>,
}

impl MarketRecord {
    /// Wrap a fresh market.
    pub fn new(market: Market) -> Self {
        Self {
            market,
            commitments: BTreeMap::new(),
            positions: BTreeMap::new(),
        }
    }

    /// Stake still sitting in pending commitments.
    pub fn pending_stake(&self) -> Amount {
        self.commitments
            .values()
            .fold(0, |acc, c| acc.saturating_add(c.amount))
    }
}

/// All markets, indexed by id.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MarketBook {
    records: Vec<MarketRecord>,
}

impl MarketBook {
    /// Empty book.
    pub fn new() -> Self {
        Self::default()
    }

    /// Id the next market will receive.
    pub fn next_id(&self) -> MarketId {
        self.records.len() as MarketId
    }

    /// Number of markets.
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Whether no market exists.
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Append a market. Its id must equal [`Self::next_id`].
    pub fn insert(&mut self, market: Market) -> MarketId {
        debug_assert_eq!(market.id, self.next_id());
        let id = market.id;
        self.records.push(MarketRecord::new(market));
        id
    }

    /// Look up a record.
    pub fn get(&self, id: MarketId) -> MarketResult<&MarketRecord> {
        usize::try_from(id)
            .ok()
            .and_then(|index| self.records.get(index))
            .ok_or(MarketError::InvalidMarket(id))
    }

    /// Look up a record mutably.
    pub fn get_mut(&mut self, id: MarketId) -> MarketResult<&mut MarketRecord> {
        usize::try_from(id)
            .ok()
            .and_then(|index| self.records.get_mut(index))
            .ok_or(MarketError::InvalidMarket(id))
    }

    /// Iterate records in id order.
    pub fn iter(&self) -> impl Iterator<Item = &MarketRecord> {
        self.records.iter()
    }
}
