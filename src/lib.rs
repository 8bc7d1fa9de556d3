//! # Helix Market
//!
//! Commit-reveal settlement engine for Helix truth markets.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                       HELIX MARKET                           │
//! ├─────────────────────────────────────────────────────────────┤
//! │  core/           - Deterministic primitives                  │
//! │  ├── amount.rs   - Integer token amounts, bps math           │
//! │  ├── address.rs  - 20-byte participant addresses             │
//! │  ├── hash.rs     - Domain-separated SHA-256                  │
//! │  └── block.rs    - Block context and randomness chain        │
//! │                                                              │
//! │  ledger/         - Token custody behind a trait              │
//! │  └── memory.rs   - In-memory ledger                          │
//! │                                                              │
//! │  market/         - Settlement logic (deterministic)          │
//! │  ├── commitment  - Commit-reveal binding                     │
//! │  ├── phase.rs    - COMMIT → REVEAL → RESOLVED gates          │
//! │  ├── entropy.rs  - Anti-sniping random close                 │
//! │  ├── payout.rs   - Resolution, pro-rata claims, forfeiture   │
//! │  └── engine.rs   - Entrypoints and views                     │
//! │                                                              │
//! │  network/        - Node (non-deterministic)                  │
//! │  ├── sequencer.rs- Block production, command ordering        │
//! │  ├── server.rs   - WebSocket gateway                         │
//! │  ├── protocol.rs - Message types                             │
//! │  └── auth.rs     - JWT / dev-mode caller identity            │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Determinism Guarantee
//!
//! The `core/`, `ledger/` and `market/` modules are **deterministic**:
//! - Integer arithmetic only, every step checked
//! - No HashMap (BTreeMap for sorted iteration)
//! - No system time: timestamps come from the block
//! - No OS randomness: close checks hash block randomness
//!
//! Replaying the same calls in the same blocks yields the same state
//! and the same events on any platform.

#![warn(missing_docs)]
#![warn(clippy::all)]
#![deny(unsafe_code)]

pub mod core;
pub mod ledger;
pub mod market;
pub mod network;

// Re-export commonly used types
pub use crate::core::{Address, Amount, BlockContext, Digest32, ONE_TOKEN};
pub use crate::ledger::{InMemoryLedger, LedgerError, TokenLedger};
pub use crate::market::{
    CallContext, Choice, HelixMarket, MarketConfig, MarketError, MarketEvent, MarketId, Outcome,
};

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
