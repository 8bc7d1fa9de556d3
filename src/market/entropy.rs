//! Anti-Sniping Random Close
//!
//! A random-close market has no fixed commit deadline. After its minimum
//! duration, every eligible interaction runs a close check: a hash over the
//! market id, a rolling per-market accumulator and the ambient block
//! context. The check closes the commit phase when the hash's leading
//! 128 bits fall at or below a difficulty target.
//!
//! ## Calibration
//!
//! ```text
//! expected_checks = (avg - min) / close_check_interval
//! target          = u128::MAX / (expected_checks + 1)
//! P(close)        ≈ 1 / (expected_checks + 1)
//! ```
//!
//! The caller's address is never part of the hash, so a participant cannot
//! grind sender identities to steer the close.

use serde::{Serialize, Deserialize};

use crate::core::{BlockContext, Digest32, DomainHasher};
use crate::core::hash::digest_prefix_u128;

/// Derive the difficulty target for a `(min, avg)` pair.
pub fn difficulty_target(min_duration: u64, avg_duration: u64, check_interval: u64) -> u128 {
    let span = avg_duration.saturating_sub(min_duration);
    let expected_checks = (span / check_interval.max(1)) as u128;
    u128::MAX / (expected_checks + 1)
}

/// Hash one close check. Depends only on market state and block context.
pub fn close_check_hash(market_id: u64, accumulator: &Digest32, block: &BlockContext) -> Digest32 {
    let mut hasher = DomainHasher::for_close_check();
    hasher.update_u64(market_id);
    hasher.update_digest(accumulator);
    hasher.update_u64(block.number);
    hasher.update_u64(block.timestamp);
    hasher.update_digest(&block.prevrandao);
    hasher.finalize()
}

/// Whether a check hash meets the target.
#[inline]
pub fn meets_target(hash: &Digest32, target: u128) -> bool {
    digest_prefix_u128(hash) <= target
}

/// Result of evaluating (not applying) one close check.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CloseCheck {
    /// Candidate hash; becomes the new accumulator if applied.
    pub candidate_hash: Digest32,
    /// Whether applying the check closes the phase.
    pub would_close: bool,
}

/// Per-market random-close state.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RandomClose {
    /// Minimum commit duration.
    pub min_duration: u64,
    /// Target average commit duration.
    pub avg_duration: u64,
    /// First timestamp at which checks count.
    pub eligible_from: u64,
    /// Calibrated difficulty target.
    pub difficulty_target: u128,
    /// Rolling accumulator, replaced on every applied check.
    pub accumulator: Digest32,
    /// Latched close timestamp.
    pub closed_at: Option<u64>,
}

impl RandomClose {
    /// Configure random close for a market created at `created.timestamp`.
    ///
    /// The accumulator starts from the creation block's randomness.
    pub fn new(
        market_id: u64,
        created: &BlockContext,
        min_duration: u64,
        avg_duration: u64,
        check_interval: u64,
    ) -> Self {
        let mut hasher = DomainHasher::for_close_check();
        hasher.update_u64(market_id);
        hasher.update_digest(&created.prevrandao);

        Self {
            min_duration,
            avg_duration,
            eligible_from: created.timestamp.saturating_add(min_duration),
            difficulty_target: difficulty_target(min_duration, avg_duration, check_interval),
            accumulator: hasher.finalize(),
            closed_at: None,
        }
    }

    /// Whether the phase has been closed.
    #[inline]
    pub fn is_closed(&self) -> bool {
        self.closed_at.is_some()
    }

    /// Whether a check at `now` counts.
    pub fn is_eligible(&self, now: u64) -> bool {
        !self.is_closed() && now >= self.eligible_from
    }

    /// Evaluate a check without mutating state.
    pub fn evaluate(&self, market_id: u64, block: &BlockContext) -> CloseCheck {
        let candidate_hash = close_check_hash(market_id, &self.accumulator, block);
        CloseCheck {
            candidate_hash,
            would_close: meets_target(&candidate_hash, self.difficulty_target),
        }
    }

    /// Apply an evaluated check at `now`. Returns whether it closed the phase.
    pub fn apply(&mut self, check: &CloseCheck, now: u64) -> bool {
        self.accumulator = check.candidate_hash;
        if check.would_close {
            self.closed_at = Some(now);
        }
        check.would_close
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn block(number: u64, timestamp: u64) -> BlockContext {
        BlockContext::at(number, timestamp)
    }

    #[test]
    fn test_target_calibration() {
        // avg == min: every check closes
        assert_eq!(difficulty_target(3600, 3600, 60), u128::MAX);
        // 10 expected checks
        assert_eq!(difficulty_target(3600, 4200, 60), u128::MAX / 11);
        // Partial intervals floor
        assert_eq!(difficulty_target(0, 119, 60), u128::MAX / 2);
        // avg < min is treated as equal
        assert_eq!(difficulty_target(100, 50, 60), u128::MAX);
    }

    #[test]
    fn test_meets_target_inclusive() {
        let mut hash = [0u8; 32];
        hash[15] = 5;
        assert!(meets_target(&hash, 5));
        assert!(!meets_target(&hash, 4));
        assert!(meets_target(&[0xFF; 32], u128::MAX));
    }

    #[test]
    fn test_eligibility_window() {
        let rc = RandomClose::new(0, &block(1, 1_000), 3600, 7200, 60);
        assert!(!rc.is_eligible(1_000));
        assert!(!rc.is_eligible(4_599));
        assert!(rc.is_eligible(4_600));
    }

    #[test]
    fn test_apply_updates_accumulator_without_closing() {
        let mut rc = RandomClose::new(0, &block(1, 0), 60, 60, 60);
        rc.difficulty_target = 0;

        let before = rc.accumulator;
        let check = rc.evaluate(0, &block(2, 100));
        let closed = rc.apply(&CloseCheck { would_close: false, ..check }, 100);
        assert!(!closed);
        assert_ne!(rc.accumulator, before);
        assert_eq!(rc.accumulator, check.candidate_hash);
        assert!(!rc.is_closed());
    }

    #[test]
    fn test_max_target_closes_first_check() {
        let mut rc = RandomClose::new(3, &block(1, 0), 3600, 3600, 60);
        let check = rc.evaluate(3, &block(50, 3601));
        assert!(check.would_close);
        assert!(rc.apply(&check, 3601));
        assert_eq!(rc.closed_at, Some(3601));
        assert!(!rc.is_eligible(10_000));
    }

    #[test]
    fn test_evaluate_is_pure() {
        let rc = RandomClose::new(7, &block(1, 0), 60, 6000, 60);
        let b = block(9, 500);
        assert_eq!(rc.evaluate(7, &b), rc.evaluate(7, &b));
        // Different block, different candidate
        assert_ne!(rc.evaluate(7, &b).candidate_hash, rc.evaluate(7, &block(10, 500)).candidate_hash);
        // Different market, different candidate
        assert_ne!(rc.evaluate(7, &b).candidate_hash, rc.evaluate(8, &b).candidate_hash);
    }

    #[test]
    fn test_close_rate_roughly_matches_calibration() {
        // 9 expected checks -> P(close) = 1/10
        let target = difficulty_target(0, 540, 60);
        let acc = [0u8; 32];
        let closes = (0..2_000u64)
            .filter(|&i| meets_target(&close_check_hash(i, &acc, &block(i, i * 12)), target))
            .count();

        assert!(closes > 120 && closes < 300, "closes = {}", closes);
    }
}
