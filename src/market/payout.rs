//! Resolution & Payout Arithmetic
//!
//! Pure integer functions; the engine owns all state changes.
//!
//! ## Decided market
//!
//! ```text
//! total       = yes + no + unaligned
//! fee         = floor(total * fee_bps / 10_000)     (to originator)
//! reward_pool = total - fee
//! payout(s)   = floor(s * reward_pool / winning_pool)
//! last payout = reward_pool - already_paid           (exact remainder)
//! ```
//!
//! ## Tie
//!
//! No fee. Each participant gets back exactly what they revealed.

use serde::{Serialize, Deserialize};

use crate::core::{Amount, bps_of, mul_div_floor};
use super::choice::Outcome;
use super::pool::PoolTotals;

/// Frozen resolution figures.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Settlement {
    /// Majority outcome.
    pub outcome: Outcome,
    /// Fee owed to the originator.
    pub originator_fee: Amount,
    /// Amount shared by claimants.
    pub reward_pool: Amount,
}

/// Resolve pool totals into a settlement. `None` only on overflow.
pub fn settle(pools: &PoolTotals, fee_bps: u64) -> Option<Settlement> {
    let total = pools.total()?;
    let outcome = pools.outcome();

    let originator_fee = match outcome {
        Outcome::Tie => 0,
        Outcome::Yes | Outcome::No => bps_of(total, fee_bps),
    };

    Some(Settlement {
        outcome,
        originator_fee,
        reward_pool: total - originator_fee,
    })
}

/// Claim running totals for one market.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ClaimLedger {
    /// Total stake on the winning side.
    pub winning_pool: Amount,
    /// Amount distributed among winners.
    pub reward_pool: Amount,
    /// Winning stake already claimed.
    pub claimed_winning_stake: Amount,
    /// Reward already paid.
    pub claimed_reward_paid: Amount,
}

impl ClaimLedger {
    /// Payout for a winner holding `stake`.
    ///
    /// The claim that exhausts the winning pool receives whatever remains,
    /// so the sum of payouts equals the reward pool exactly.
    pub fn payout(&self, stake: Amount) -> Option<Amount> {
        let claimed_after = self.claimed_winning_stake.checked_add(stake)?;
        if claimed_after > self.winning_pool {
            return None;
        }
        if claimed_after == self.winning_pool {
            return self.reward_pool.checked_sub(self.claimed_reward_paid);
        }
        mul_div_floor(stake, self.reward_pool, self.winning_pool)
    }

    /// Running totals after paying `amount` for `stake`.
    pub fn record(&self, stake: Amount, amount: Amount) -> Option<ClaimLedger> {
        Some(ClaimLedger {
            claimed_winning_stake: self.claimed_winning_stake.checked_add(stake)?,
            claimed_reward_paid: self.claimed_reward_paid.checked_add(amount)?,
            ..*self
        })
    }
}

/// How a forfeited unrevealed stake is split.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Forfeiture {
    /// Destroyed via the ledger's burn.
    pub burned: Amount,
    /// Returned to the participant.
    pub returned: Amount,
}

/// Split `amount` under a burn policy of `burn_bps`.
pub fn forfeiture_split(amount: Amount, burn_bps: u64) -> Forfeiture {
    let burned = bps_of(amount, burn_bps);
    Forfeiture {
        burned,
        returned: amount - burned,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_settle_decided() {
        let s = settle(&PoolTotals { yes: 200, no: 100, unaligned: 0 }, 100).unwrap();
        assert_eq!(s.outcome, Outcome::Yes);
        assert_eq!(s.originator_fee, 3);
        assert_eq!(s.reward_pool, 297);

        let s = settle(&PoolTotals { yes: 101, no: 100, unaligned: 50 }, 100).unwrap();
        assert_eq!(s.originator_fee, 2);
        assert_eq!(s.reward_pool, 249);
    }

    #[test]
    fn test_settle_tie_has_no_fee() {
        let s = settle(&PoolTotals { yes: 150, no: 150, unaligned: 40 }, 100).unwrap();
        assert_eq!(s.outcome, Outcome::Tie);
        assert_eq!(s.originator_fee, 0);
        assert_eq!(s.reward_pool, 340);

        let empty = settle(&PoolTotals::default(), 100).unwrap();
        assert_eq!(empty.outcome, Outcome::Tie);
        assert_eq!(empty.reward_pool, 0);
    }

    #[test]
    fn test_last_claimant_gets_remainder() {
        // Three equal winners sharing 100: 33 + 33 + 34
        let mut ledger = ClaimLedger { winning_pool: 3, reward_pool: 100, ..Default::default() };

        let a = ledger.payout(1).unwrap();
        ledger = ledger.record(1, a).unwrap();
        let b = ledger.payout(1).unwrap();
        ledger = ledger.record(1, b).unwrap();
        let c = ledger.payout(1).unwrap();

        assert_eq!((a, b, c), (33, 33, 34));
    }

    #[test]
    fn test_payout_rejects_excess_stake() {
        let ledger = ClaimLedger { winning_pool: 10, reward_pool: 100, claimed_winning_stake: 8, claimed_reward_paid: 80 };
        assert_eq!(ledger.payout(3), None);
        assert_eq!(ledger.payout(2), Some(20));
    }

    #[test]
    fn test_forfeiture_split() {
        assert_eq!(forfeiture_split(100, 10_000), Forfeiture { burned: 100, returned: 0 });
        assert_eq!(forfeiture_split(100, 5_000), Forfeiture { burned: 50, returned: 50 });
        assert_eq!(forfeiture_split(101, 5_000), Forfeiture { burned: 50, returned: 51 });
        assert_eq!(forfeiture_split(100, 0), Forfeiture { burned: 0, returned: 100 });
    }

    proptest! {
        #[test]
        fn prop_claims_conserve_pool(
            stakes in prop::collection::vec(1u64..1_000_000_000_000, 1..20),
            losing in 0u64..1_000_000_000_000,
            unaligned in 0u64..1_000_000_000_000,
            fee_bps in 0u64..=10_000,
        ) {
            let winning: u64 = stakes.iter().sum();
            let no = losing.min(winning.saturating_sub(1));
            let pools = PoolTotals { yes: winning, no, unaligned };
            let s = settle(&pools, fee_bps).unwrap();
            prop_assert_eq!(s.outcome, Outcome::Yes);

            let mut ledger = ClaimLedger { winning_pool: winning, reward_pool: s.reward_pool, ..Default::default() };
            let mut paid = 0u64;
            for stake in &stakes {
                let amount = ledger.payout(*stake).unwrap();
                paid += amount;
                ledger = ledger.record(*stake, amount).unwrap();
            }

            prop_assert_eq!(paid + s.originator_fee, pools.total().unwrap());
        }

        #[test]
        fn prop_payout_proportional(
            a in 1u64..1_000_000_000,
            b in 1u64..1_000_000_000,
            rest in 1u64..1_000_000_000,
            reward in 0u64..10_000_000_000,
        ) {
            let (small, large) = if a <= b { (a, b) } else { (b, a) };
            let ledger = ClaimLedger {
                winning_pool: small + large + rest,
                reward_pool: reward,
                ..Default::default()
            };

            let p_small = ledger.payout(small).unwrap();
            let p_large = ledger.payout(large).unwrap();
            prop_assert!(p_small <= p_large);

            // p_large / p_small tracks large / small up to one unit of flooring each
            let lhs = u128::from(p_large) * u128::from(small);
            let rhs = u128::from(p_small) * u128::from(large);
            prop_assert!(lhs.abs_diff(rhs) <= u128::from(large));
        }

        #[test]
        fn prop_forfeiture_sums(amount in any::<u64>(), bps in 0u64..=10_000) {
            let f = forfeiture_split(amount, bps);
            prop_assert_eq!(f.burned + f.returned, amount);
        }
    }
}
