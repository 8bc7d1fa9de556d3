//! Protocol Messages
//!
//! Wire format for client-node communication over WebSocket.
//! All messages are JSON with a `type` tag. Hashes, salts and addresses
//! travel as 0x-prefixed hex strings; amounts as integer smallest units.

use serde::{Serialize, Deserialize};

use crate::core::{Address, Amount, Digest32};
use crate::core::hash::digest_from_hex;
use crate::market::{
    Choice, ClosePreview, CommitOutcome, ErrorKind, Forfeiture, MarketEvent, MarketId,
    MarketView, PingOutcome, RandomCloseStatus, Salt, Settlement,
};

// =============================================================================
// CLIENT -> NODE MESSAGES
// =============================================================================

/// Messages sent from client to node.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    /// Authenticate (JWT, or a hex address in dev mode).
    Auth(AuthRequest),

    // ===== TRANSACTIONS =====
    /// Open a fixed-duration market.
    SubmitStatement {
        content_ref: String,
        commit_duration: u64,
        reveal_duration: u64,
    },

    /// Open a market with optional random close.
    SubmitStatementWithRandomClose {
        content_ref: String,
        min_commit_duration: u64,
        reveal_duration: u64,
        enable_random_close: bool,
        avg_commit_duration: u64,
    },

    /// Commit a hashed bet.
    CommitBet {
        market_id: MarketId,
        /// Hex `H(choice, salt, participant)`.
        commit_hash: String,
        amount: Amount,
    },

    /// Reveal a committed bet.
    RevealBet {
        market_id: MarketId,
        choice: u8,
        /// Hex 32-byte salt.
        salt: String,
    },

    /// Freeze a market's outcome.
    Resolve { market_id: MarketId },

    /// Claim winnings or a tie refund.
    Claim { market_id: MarketId },

    /// Forfeit an unrevealed stake.
    WithdrawUnrevealed { market_id: MarketId },

    /// Force a close check.
    PingMarket { market_id: MarketId },

    /// Set the allowance granted to the engine's custody.
    Approve { amount: Amount },

    /// Dev faucet: mint the configured amount to the caller.
    Faucet,

    // ===== QUERIES =====
    /// Market state.
    GetMarket { market_id: MarketId },

    /// A participant's stakes (defaults to the caller).
    GetPosition {
        market_id: MarketId,
        #[serde(default)]
        participant: Option<Address>,
    },

    /// Token balance and allowance (defaults to the caller).
    GetBalance {
        #[serde(default)]
        account: Option<Address>,
    },

    /// Close check preview against the current block.
    PreviewCloseCheck { market_id: MarketId },

    /// Random-close configuration.
    GetRandomCloseStatus { market_id: MarketId },

    /// Number of markets.
    GetMarketCount,

    // ===== SESSION =====
    /// Stream events for one market, or all markets when `market_id` is None.
    Subscribe {
        #[serde(default)]
        market_id: Option<MarketId>,
    },

    /// Stop streaming events.
    Unsubscribe,

    /// Latency probe.
    Ping { timestamp: u64 },
}

/// Authentication request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthRequest {
    /// JWT, or a hex address when the node runs without auth.
    pub token: String,
    /// Client version for compatibility check.
    pub client_version: String,
}

/// Parse a hex commitment hash.
pub fn parse_digest(text: &str) -> Option<Digest32> {
    digest_from_hex(text)
}

/// Parse a hex salt.
pub fn parse_salt(text: &str) -> Option<Salt> {
    digest_from_hex(text)
}

// =============================================================================
// NODE -> CLIENT MESSAGES
// =============================================================================

/// Messages sent from node to client.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    /// Authentication result.
    AuthResult(AuthResult),

    /// Transaction executed.
    Receipt(TxReceipt),

    /// Market state.
    Market(MarketView),

    /// Participant stakes.
    Position(PositionView),

    /// Account balance.
    Balance(BalanceView),

    /// Close check preview.
    ClosePreview(ClosePreviewView),

    /// Random-close configuration.
    RandomCloseStatus(RandomCloseView),

    /// Market count.
    MarketCount { count: u64 },

    /// Subscription acknowledged. `None` means all markets.
    Subscribed { market_id: Option<MarketId> },

    /// Event stream stopped.
    Unsubscribed,

    /// Streamed market event.
    Event(MarketEvent),

    /// Pong response.
    Pong { timestamp: u64, server_time: u64 },

    /// Error message.
    Error(ServerError),

    /// Node is shutting down.
    Shutdown { reason: String },
}

/// Authentication result.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthResult {
    /// Whether auth succeeded.
    pub success: bool,
    /// Address the connection acts as.
    pub address: Option<Address>,
    /// Error message if failed.
    pub error: Option<String>,
    /// Node version.
    pub server_version: String,
}

/// Receipt for an executed transaction.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TxReceipt {
    /// Unique transaction id (uuid v4).
    pub tx_id: String,
    /// Block the transaction executed in.
    pub block_number: u64,
    /// Block timestamp.
    pub timestamp: u64,
    /// Entrypoint result.
    pub result: TxResult,
}

/// Per-entrypoint result payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TxResult {
    MarketCreated { market_id: MarketId },
    Committed { outcome: CommitOutcome },
    Revealed { choice: Choice },
    Resolved { settlement: Settlement },
    Claimed { amount: Amount },
    Withdrawn { forfeiture: Forfeiture },
    Pinged { outcome: PingOutcome },
    Approved { amount: Amount },
    Funded { amount: Amount },
}

/// Stakes of one participant in one market.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PositionView {
    pub market_id: MarketId,
    pub participant: Address,
    pub no: Amount,
    pub yes: Amount,
    pub unaligned: Amount,
    /// Unrevealed stake.
    pub committed: Amount,
    pub has_committed: bool,
    pub claimed: bool,
}

/// Token balance view.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BalanceView {
    pub account: Address,
    pub balance: Amount,
    /// Allowance granted to custody.
    pub allowance: Amount,
}

/// Close check preview with hex hash.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClosePreviewView {
    pub market_id: MarketId,
    pub block_number: u64,
    pub candidate_hash: String,
    pub would_close: bool,
    pub eligible: bool,
}

impl ClosePreviewView {
    /// Wrap an engine preview.
    pub fn new(market_id: MarketId, block_number: u64, preview: &ClosePreview) -> Self {
        Self {
            market_id,
            block_number,
            candidate_hash: format!("0x{}", hex::encode(preview.candidate_hash)),
            would_close: preview.would_close,
            eligible: preview.eligible,
        }
    }
}

/// Random-close status. The 128-bit target travels as hex, since JSON
/// numbers lose precision past 2^53.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RandomCloseView {
    pub market_id: MarketId,
    pub enabled: bool,
    pub min_duration: u64,
    pub avg_duration: u64,
    pub difficulty_target: String,
    pub accumulator: String,
    /// 0 while open.
    pub closed_at: u64,
    pub eligible_from: u64,
}

impl RandomCloseView {
    /// Wrap engine status.
    pub fn new(market_id: MarketId, status: &RandomCloseStatus) -> Self {
        Self {
            market_id,
            enabled: status.enabled,
            min_duration: status.min_duration,
            avg_duration: status.avg_duration,
            difficulty_target: format!("0x{:032x}", status.difficulty_target),
            accumulator: format!("0x{}", hex::encode(status.accumulator)),
            closed_at: status.closed_at,
            eligible_from: status.eligible_from,
        }
    }
}

/// Error payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerError {
    /// Error code.
    pub code: ErrorCode,
    /// Human-readable message.
    pub message: String,
}

/// Error codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    /// Authentication failed.
    AuthFailed,
    /// Not authenticated.
    NotAuthenticated,
    /// JWT has expired.
    TokenExpired,
    /// Invalid JWT.
    InvalidToken,
    /// Malformed message or field.
    InvalidInput,
    /// Rejected argument.
    Validation,
    /// Wrong market phase.
    Phase,
    /// Reveal does not match the commitment.
    Integrity,
    /// Nothing to claim or withdraw.
    Entitlement,
    /// Token ledger refused.
    Ledger,
    /// Internal error.
    InternalError,
}

impl From<ErrorKind> for ErrorCode {
    fn from(kind: ErrorKind) -> Self {
        match kind {
            ErrorKind::Validation => ErrorCode::Validation,
            ErrorKind::Phase => ErrorCode::Phase,
            ErrorKind::Integrity => ErrorCode::Integrity,
            ErrorKind::Entitlement => ErrorCode::Entitlement,
            ErrorKind::Ledger => ErrorCode::Ledger,
        }
    }
}

impl ServerMessage {
    /// Build an error message.
    pub fn error(code: ErrorCode, message: impl Into<String>) -> Self {
        ServerMessage::Error(ServerError { code, message: message.into() })
    }
}

// =============================================================================
// SERIALIZATION HELPERS
// =============================================================================

impl ClientMessage {
    /// Serialize to JSON string.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// Deserialize from JSON string.
    pub fn from_json(s: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(s)
    }
}

impl ServerMessage {
    /// Serialize to JSON string.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// Deserialize from JSON string.
    pub fn from_json(s: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(s)
    }
}
