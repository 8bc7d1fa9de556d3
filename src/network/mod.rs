//! Network Layer
//!
//! WebSocket node in front of the market engine.
//! This layer is **non-deterministic**: wall clock, uuid seeds and socket
//! ordering all live here. Every state change goes through `market/`.

pub mod auth;
pub mod protocol;
pub mod sequencer;
pub mod server;

pub use auth::{AuthConfig, TokenClaims, AuthError, authenticate, validate_token};
pub use protocol::{ClientMessage, ServerMessage, ErrorCode, TxReceipt, TxResult};
pub use sequencer::{NodeSnapshot, Query, Sequencer, SequencerConfig, SequencerError, SequencerHandle, Transaction};
pub use server::{ClientSession, NodeConfig, NodeError, NodeServer, dispatch};
