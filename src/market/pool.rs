//! Pool Accountant
//!
//! Three running sums per market, one per choice. A pool only grows, and
//! only when a stake is revealed into it. After resolution the totals are
//! frozen history used to compute payout ratios.

use serde::{Serialize, Deserialize};

use crate::core::Amount;
use super::choice::{Choice, Outcome};

/// Revealed stake per choice.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PoolTotals {
    /// Aligned-NO stake.
    pub no: Amount,
    /// Aligned-YES stake.
    pub yes: Amount,
    /// Unaligned stake.
    pub unaligned: Amount,
}

impl PoolTotals {
    /// Total for one choice.
    pub fn get(&self, choice: Choice) -> Amount {
        match choice {
            Choice::No => self.no,
            Choice::Yes => self.yes,
            Choice::Unaligned => self.unaligned,
        }
    }

    /// Sum of all three pools, or `None` on overflow.
    pub fn total(&self) -> Option<Amount> {
        self.yes.checked_add(self.no)?.checked_add(self.unaligned)
    }

    /// Record a revealed stake. Returns `None` (and leaves totals alone)
    /// if either the pool or the grand total would overflow.
    pub fn checked_add(&self, choice: Choice, amount: Amount) -> Option<PoolTotals> {
        let mut next = *self;
        let slot = match choice {
            Choice::No => &mut next.no,
            Choice::Yes => &mut next.yes,
            Choice::Unaligned => &mut next.unaligned,
        };
        *slot = slot.checked_add(amount)?;
        next.total()?;
        Some(next)
    }

    /// Majority rule over the aligned pools. UNALIGNED never decides.
    pub fn outcome(&self) -> Outcome {
        use std::cmp::Ordering;
        match self.yes.cmp(&self.no) {
            Ordering::Greater => Outcome::Yes,
            Ordering::Less => Outcome::No,
            Ordering::Equal => Outcome::Tie,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_add_routes_to_choice() {
        let pools = PoolTotals::default()
            .checked_add(Choice::Yes, 101).unwrap()
            .checked_add(Choice::No, 100).unwrap()
            .checked_add(Choice::Unaligned, 50).unwrap()
            .checked_add(Choice::Yes, 9).unwrap();

        assert_eq!(pools.get(Choice::Yes), 110);
        assert_eq!(pools.get(Choice::No), 100);
        assert_eq!(pools.get(Choice::Unaligned), 50);
        assert_eq!(pools.total(), Some(260));
    }

    #[test]
    fn test_overflow_rejected() {
        let pools = PoolTotals { yes: u64::MAX - 1, ..Default::default() };
        assert_eq!(pools.checked_add(Choice::Yes, 2), None);
        // Grand total overflow also counts
        assert_eq!(pools.checked_add(Choice::No, 2), None);
        assert!(pools.checked_add(Choice::No, 1).is_some());
    }

    #[test]
    fn test_outcome() {
        let yes = PoolTotals { yes: 200, no: 100, unaligned: 0 };
        let no = PoolTotals { yes: 10, no: 11, unaligned: 500 };
        let tie = PoolTotals { yes: 150, no: 150, unaligned: 40 };

        assert_eq!(yes.outcome(), Outcome::Yes);
        assert_eq!(no.outcome(), Outcome::No);
        assert_eq!(tie.outcome(), Outcome::Tie);
        assert_eq!(PoolTotals::default().outcome(), Outcome::Tie);
    }
}
