//! Market Errors
//!
//! Every rejection is a named variant. A rejected call leaves no state
//! change behind, so callers never need to roll anything back.

use thiserror::Error;

use crate::ledger::LedgerError;

/// Broad failure category, used for wire error codes and metrics labels.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Malformed or out-of-range arguments.
    Validation,
    /// Operation not allowed in the market's current phase.
    Phase,
    /// Reveal does not open the stored commitment.
    Integrity,
    /// Caller has nothing to act on.
    Entitlement,
    /// Token ledger refused a transfer or burn.
    Ledger,
}

/// Engine rejection.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MarketError {
    // ===== VALIDATION =====
    /// Empty content reference.
    #[error("content reference empty")]
    ContentEmpty,

    /// Content reference over the length bound.
    #[error("content reference too long: {len} > {max}")]
    ContentTooLong { len: usize, max: usize },

    #[error("commit duration too short: {duration}s < {min}s")]
    CommitDurationTooShort { duration: u64, min: u64 },

    #[error("commit duration too long: {duration}s > {max}s")]
    CommitDurationTooLong { duration: u64, max: u64 },

    #[error("reveal duration too short: {duration}s < {min}s")]
    RevealDurationTooShort { duration: u64, min: u64 },

    #[error("reveal duration too long: {duration}s > {max}s")]
    RevealDurationTooLong { duration: u64, max: u64 },

    /// Average duration below the minimum.
    #[error("average commit duration {avg}s below minimum {min}s")]
    InvalidAverageDuration { avg: u64, min: u64 },

    /// Unknown market id.
    #[error("invalid market {0}")]
    InvalidMarket(u64),

    /// Zero-amount commitment.
    #[error("amount must be positive")]
    ZeroAmount,

    /// Engine parameters out of range.
    #[error("invalid market config: {0}")]
    InvalidConfig(&'static str),

    // ===== PHASE =====
    /// Fixed commit window elapsed.
    #[error("commit phase over")]
    CommitPhaseOver,

    /// Random close already latched.
    #[error("commit phase closed early")]
    CommitPhaseClosed,

    /// Reveal attempted while commits are still open.
    #[error("commit phase not over")]
    CommitPhaseActive,

    #[error("reveal phase over")]
    RevealPhaseOver,

    /// Random-close market whose commit phase never closed.
    #[error("reveal not started")]
    RevealNotStarted,

    #[error("reveal phase not over")]
    RevealPhaseNotOver,

    #[error("market already resolved")]
    AlreadyResolved,

    #[error("market not resolved")]
    NotResolved,

    // ===== INTEGRITY =====
    /// Hash mismatch between reveal and commitment.
    #[error("invalid hash/reveal")]
    InvalidReveal,

    /// Tag outside the three valid choices.
    #[error("invalid choice {0}")]
    InvalidChoice(u8),

    /// Internal accounting would overflow.
    #[error("amount overflow")]
    Overflow,

    // ===== ENTITLEMENT =====
    #[error("already committed")]
    AlreadyCommitted,

    #[error("no commitment")]
    NoCommitment,

    #[error("no winning bet")]
    NoWinningBet,

    #[error("no unrevealed stake")]
    NoUnrevealedStake,

    /// The custody account cannot act as a participant.
    #[error("custody account cannot call the market")]
    CustodyCaller,

    // ===== COLLABORATOR =====
    #[error("ledger: {0}")]
    Ledger(#[from] LedgerError),
}

impl MarketError {
    /// Category of this error.
    pub fn kind(&self) -> ErrorKind {
        use MarketError::*;
        match self {
            ContentEmpty
            | ContentTooLong { .. }
            | CommitDurationTooShort { .. }
            | CommitDurationTooLong { .. }
            | RevealDurationTooShort { .. }
            | RevealDurationTooLong { .. }
            | InvalidAverageDuration { .. }
            | InvalidMarket(_)
            | ZeroAmount
            | InvalidConfig(_) => ErrorKind::Validation,

            CommitPhaseOver
            | CommitPhaseClosed
            | CommitPhaseActive
            | RevealPhaseOver
            | RevealNotStarted
            | RevealPhaseNotOver
            | AlreadyResolved
            | NotResolved => ErrorKind::Phase,

            InvalidReveal | InvalidChoice(_) | Overflow => ErrorKind::Integrity,

            AlreadyCommitted
            | NoCommitment
            | NoWinningBet
            | NoUnrevealedStake
            | CustodyCaller => ErrorKind::Entitlement,

            Ledger(_) => ErrorKind::Ledger,
        }
    }
}

/// Result alias for engine operations.
pub type MarketResult<T> = Result<T, MarketError>;
