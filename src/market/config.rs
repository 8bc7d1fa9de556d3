//! Market Configuration
//!
//! Protocol constants and the [`MarketConfig`] that carries them into the
//! engine. All durations are in seconds, all amounts in smallest units.

use serde::{Serialize, Deserialize};

use crate::core::{Amount, tokens, BPS_DENOMINATOR};
use crate::market::error::{MarketError, MarketResult};

// =============================================================================
// CONSTANTS
// =============================================================================

/// Fee charged for submitting a statement.
pub const STATEMENT_FEE: Amount = tokens(100);

/// Originator fee on a decided market's total pool (1%).
pub const ORIGINATOR_FEE_BPS: u64 = 100;

/// Shortest commit window.
pub const MIN_COMMIT_DURATION: u64 = 60;

/// Shortest reveal window.
pub const MIN_REVEAL_DURATION: u64 = 3_600;

/// Longest commit or reveal window (52 weeks).
pub const MAX_DURATION: u64 = 52 * 7 * 24 * 3_600;

/// Content reference length bound, in bytes.
pub const MAX_CONTENT_LENGTH: usize = 128;

/// Bounty paid to a ping that closes a random-close market.
pub const PING_REWARD: Amount = tokens(1);

/// Nominal spacing of close checks used to calibrate difficulty.
pub const CLOSE_CHECK_INTERVAL: u64 = 60;

/// Share of a forfeited unrevealed stake that is destroyed.
pub const UNREVEALED_BURN_BPS: u64 = BPS_DENOMINATOR;

// =============================================================================
// CONFIG
// =============================================================================

/// Tunable protocol parameters.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct MarketConfig {
    /// Fee pulled from the originator on submission.
    pub statement_fee: Amount,
    /// Originator fee in basis points.
    pub originator_fee_bps: u64,
    /// Minimum commit (or random-close minimum) duration.
    pub min_commit_duration: u64,
    /// Minimum reveal duration.
    pub min_reveal_duration: u64,
    /// Maximum commit and reveal duration.
    pub max_duration: u64,
    /// Maximum content reference length.
    pub max_content_length: usize,
    /// Ping bounty, escrowed out of the statement fee.
    pub ping_reward: Amount,
    /// Close-check spacing for difficulty calibration.
    pub close_check_interval: u64,
    /// Burned share of an unrevealed stake; the rest returns to its owner.
    pub unrevealed_burn_bps: u64,
}

impl Default for MarketConfig {
    fn default() -> Self {
        Self {
            statement_fee: STATEMENT_FEE,
            originator_fee_bps: ORIGINATOR_FEE_BPS,
            min_commit_duration: MIN_COMMIT_DURATION,
            min_reveal_duration: MIN_REVEAL_DURATION,
            max_duration: MAX_DURATION,
            max_content_length: MAX_CONTENT_LENGTH,
            ping_reward: PING_REWARD,
            close_check_interval: CLOSE_CHECK_INTERVAL,
            unrevealed_burn_bps: UNREVEALED_BURN_BPS,
        }
    }
}

impl MarketConfig {
    /// Portion of the statement fee escrowed as a ping bounty.
    pub fn ping_escrow(&self) -> Amount {
        self.ping_reward.min(self.statement_fee)
    }

    /// Check internal consistency. Engines refuse configs that fail this.
    pub fn validate(&self) -> MarketResult<()> {
        let reason = if self.originator_fee_bps > BPS_DENOMINATOR {
            "originator fee above 10000 bps"
        } else if self.unrevealed_burn_bps > BPS_DENOMINATOR {
            "unrevealed burn above 10000 bps"
        } else if self.min_commit_duration > self.max_duration {
            "min commit duration above max duration"
        } else if self.min_reveal_duration > self.max_duration {
            "min reveal duration above max duration"
        } else if self.close_check_interval == 0 {
            "close check interval is zero"
        } else if self.max_content_length == 0 {
            "max content length is zero"
        } else {
            return Ok(());
        };
        Err(MarketError::InvalidConfig(reason))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_values() {
        let config = MarketConfig::default();
        assert_eq!(config.validate(), Ok(()));
        assert_eq!(config.statement_fee, tokens(100));
        assert_eq!(config.max_duration, 31_449_600);
        assert_eq!(config.unrevealed_burn_bps, 10_000);
    }

    #[test]
    fn test_ping_escrow_capped_by_fee() {
        let mut config = MarketConfig::default();
        assert_eq!(config.ping_escrow(), tokens(1));

        config.statement_fee = 10;
        assert_eq!(config.ping_escrow(), 10);
    }

    #[test]
    fn test_invalid_config() {
        let config = MarketConfig { close_check_interval: 0, ..Default::default() };
        assert_eq!(
            config.validate(),
            Err(MarketError::InvalidConfig("close check interval is zero"))
        );

        let config = MarketConfig { unrevealed_burn_bps: 10_001, ..Default::default() };
        assert!(config.validate().is_err());

        let config = MarketConfig { originator_fee_bps: 10_001, ..Default::default() };
        assert!(config.validate().is_err());
    }
}
