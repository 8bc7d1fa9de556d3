//! Truth-market settlement.
//!
//! Leaves first:
//! - `commitment`: commit-reveal binding
//! - `pool`: per-choice revealed stake
//! - `phase`: COMMIT → REVEAL → RESOLVED gates
//! - `entropy`: anti-sniping random close
//! - `payout`: resolution, pro-rata claims, forfeiture
//! - `engine`: entrypoints and views over a [`crate::ledger::TokenLedger`]

pub mod choice;
pub mod commitment;
pub mod config;
pub mod engine;
pub mod entropy;
pub mod error;
pub mod events;
pub mod payout;
pub mod phase;
pub mod pool;
pub mod state;

pub use choice::{Choice, Outcome};
pub use commitment::{Commitment, Salt, commit_choice, commitment_hash, generate_salt};
pub use config::MarketConfig;
pub use engine::{
    CallContext, ClosePreview, CommitOutcome, HelixMarket, MarketView, PingOutcome,
    RandomCloseStatus,
};
pub use error::{ErrorKind, MarketError, MarketResult};
pub use events::{CloseTrigger, MarketEvent, MarketEventData};
pub use payout::{Forfeiture, Settlement};
pub use phase::Phase;
pub use state::{Market, MarketBook, MarketId, Position};
