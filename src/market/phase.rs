//! Phase State Machine
//!
//! ```text
//!   COMMIT ──(commit end)──► REVEAL ──(reveal end)──► SETTLING ──resolve──► RESOLVED
//! ```
//!
//! Fixed markets reach the commit end at a known timestamp. Random-close
//! markets stay in COMMIT until a close check latches `closed_at`, which
//! then behaves exactly like a fixed commit end.

use std::fmt;
use serde::{Serialize, Deserialize};

use super::error::{MarketError, MarketResult};
use super::state::Market;

/// Market lifecycle phase at a given timestamp.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Phase {
    /// Accepting commitments.
    Commit,
    /// Accepting reveals.
    Reveal,
    /// Reveal window elapsed; waiting for `resolve`.
    Settling,
    /// Outcome frozen; claims open.
    Resolved,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Phase::Commit => write!(f, "commit"),
            Phase::Reveal => write!(f, "reveal"),
            Phase::Settling => write!(f, "settling"),
            Phase::Resolved => write!(f, "resolved"),
        }
    }
}

/// Phase of `market` at `now`.
pub fn phase_at(market: &Market, now: u64) -> Phase {
    if market.is_resolved() {
        return Phase::Resolved;
    }
    match (market.commit_end(), market.reveal_end()) {
        (Some(commit_end), _) if now < commit_end => Phase::Commit,
        (Some(_), Some(reveal_end)) if now < reveal_end => Phase::Reveal,
        (Some(_), _) => Phase::Settling,
        (None, _) => Phase::Commit,
    }
}

/// Commitments accepted?
pub fn ensure_commit_open(market: &Market, now: u64) -> MarketResult<()> {
    match &market.random_close {
        Some(rc) if rc.is_closed() => Err(MarketError::CommitPhaseClosed),
        Some(_) => Ok(()),
        None => match market.fixed_commit_end {
            Some(end) if now < end => Ok(()),
            _ => Err(MarketError::CommitPhaseOver),
        },
    }
}

/// Reveals accepted?
pub fn ensure_reveal_open(market: &Market, now: u64) -> MarketResult<()> {
    if market.is_resolved() {
        return Err(MarketError::RevealPhaseOver);
    }
    let (commit_end, reveal_end) = match (market.commit_end(), market.reveal_end()) {
        (Some(c), Some(r)) => (c, r),
        _ => return Err(MarketError::CommitPhaseActive),
    };
    if now < commit_end {
        return Err(MarketError::CommitPhaseActive);
    }
    if now >= reveal_end {
        return Err(MarketError::RevealPhaseOver);
    }
    Ok(())
}

/// Reveal window fully elapsed? (Gate for `resolve` and `withdraw_unrevealed`.)
pub fn ensure_reveal_over(market: &Market, now: u64) -> MarketResult<()> {
    match market.reveal_end() {
        None => Err(MarketError::RevealNotStarted),
        Some(end) if now < end => Err(MarketError::RevealPhaseNotOver),
        Some(_) => Ok(()),
    }
}
