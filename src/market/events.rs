//! Market Events
//!
//! Emitted on every successful state transition, in execution order.
//! Hosts forward them to subscribers and to an off-chain indexer.

use serde::{Serialize, Deserialize};

use crate::core::{Address, Amount, BlockContext};
use super::choice::{Choice, Outcome};
use super::state::MarketId;

/// What caused an early close.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum CloseTrigger {
    /// A `commit_bet` call ran the winning check.
    Commit,
    /// A `ping_market` call ran the winning check.
    Ping,
}

/// Event payload.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum MarketEventData {
    /// New market opened.
    StatementCreated {
        market_id: MarketId,
        originator: Address,
        content_ref: String,
        /// Fixed commit end, absent for random-close markets.
        commit_end: Option<u64>,
        reveal_duration: u64,
        random_close: bool,
    },

    /// Stake pulled into custody behind a commitment.
    BetCommitted {
        market_id: MarketId,
        participant: Address,
        amount: Amount,
    },

    /// Commitment opened and stake routed into a pool.
    BetRevealed {
        market_id: MarketId,
        participant: Address,
        choice: Choice,
        amount: Amount,
    },

    /// Random close latched.
    CommitPhaseClosed {
        market_id: MarketId,
        closed_at: u64,
        trigger: CloseTrigger,
        triggered_by: Address,
    },

    /// Outcome frozen.
    MarketResolved {
        market_id: MarketId,
        outcome: Outcome,
        yes: Amount,
        no: Amount,
        unaligned: Amount,
        originator_fee: Amount,
    },

    /// Winner (or tie participant) paid.
    RewardClaimed {
        market_id: MarketId,
        participant: Address,
        amount: Amount,
    },

    /// Unrevealed stake forfeited.
    UnrevealedWithdrawn {
        market_id: MarketId,
        participant: Address,
        burned: Amount,
        returned: Amount,
    },

    /// Eligible close check forced by a ping.
    MarketPinged {
        market_id: MarketId,
        pinger: Address,
        closed: bool,
        reward: Amount,
    },
}

impl MarketEventData {
    /// Market the event belongs to.
    pub fn market_id(&self) -> MarketId {
        match self {
            MarketEventData::StatementCreated { market_id, .. }
            | MarketEventData::BetCommitted { market_id, .. }
            | MarketEventData::BetRevealed { market_id, .. }
            | MarketEventData::CommitPhaseClosed { market_id, .. }
            | MarketEventData::MarketResolved { market_id, .. }
            | MarketEventData::RewardClaimed { market_id, .. }
            | MarketEventData::UnrevealedWithdrawn { market_id, .. }
            | MarketEventData::MarketPinged { market_id, .. } => *market_id,
        }
    }
}

/// An event with its block position.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct MarketEvent {
    /// Block number the transition executed in.
    pub block_number: u64,

    /// Block timestamp.
    pub timestamp: u64,

    /// Event data.
    pub data: MarketEventData,
}

impl MarketEvent {
    /// Stamp event data with its block.
    pub fn new(block: &BlockContext, data: MarketEventData) -> Self {
        Self {
            block_number: block.number,
            timestamp: block.timestamp,
            data,
        }
    }

    /// Market the event belongs to.
    pub fn market_id(&self) -> MarketId {
        self.data.market_id()
    }
}
