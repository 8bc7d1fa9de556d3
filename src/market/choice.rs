//! Bet Choices and Outcomes

use std::fmt;
use serde::{Serialize, Deserialize};

/// Position a participant stakes on.
///
/// The discriminant is the raw tag hashed into commitments.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum Choice {
    /// The statement is false.
    No = 0,
    /// The statement is true.
    Yes = 1,
    /// Neither; stake is swept by whichever side wins.
    Unaligned = 2,
}

impl Choice {
    /// All choices in tag order.
    pub const ALL: [Choice; 3] = [Choice::No, Choice::Yes, Choice::Unaligned];

    /// Parse a raw tag.
    pub fn from_u8(tag: u8) -> Option<Choice> {
        match tag {
            0 => Some(Choice::No),
            1 => Some(Choice::Yes),
            2 => Some(Choice::Unaligned),
            _ => None,
        }
    }

    /// Raw tag.
    #[inline]
    pub fn as_u8(self) -> u8 {
        self as u8
    }

    /// Index into per-choice arrays.
    #[inline]
    pub fn index(self) -> usize {
        self as usize
    }
}

impl TryFrom<u8> for Choice {
    type Error = u8;

    fn try_from(tag: u8) -> Result<Self, Self::Error> {
        Choice::from_u8(tag).ok_or(tag)
    }
}

impl fmt::Display for Choice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Choice::No => "NO",
            Choice::Yes => "YES",
            Choice::Unaligned => "UNALIGNED",
        };
        f.write_str(name)
    }
}

/// Frozen result of a resolved market.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Outcome {
    /// YES pool strictly larger.
    Yes,
    /// NO pool strictly larger.
    No,
    /// Equal aligned pools; everyone is refunded.
    Tie,
}

impl Outcome {
    /// The choice that collects the pool, if any.
    pub fn winning_choice(self) -> Option<Choice> {
        match self {
            Outcome::Yes => Some(Choice::Yes),
            Outcome::No => Some(Choice::No),
            Outcome::Tie => None,
        }
    }

    /// Whether this is a tie.
    pub fn is_tie(self) -> bool {
        matches!(self, Outcome::Tie)
    }
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Outcome::Yes => f.write_str("YES"),
            Outcome::No => f.write_str("NO"),
            Outcome::Tie => f.write_str("TIE"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tags() {
        assert_eq!(Choice::No.as_u8(), 0);
        assert_eq!(Choice::Yes.as_u8(), 1);
        assert_eq!(Choice::Unaligned.as_u8(), 2);

        for choice in Choice::ALL {
            assert_eq!(Choice::from_u8(choice.as_u8()), Some(choice));
        }
    }

    #[test]
    fn test_out_of_range_tag() {
        assert_eq!(Choice::from_u8(3), None);
        assert_eq!(Choice::try_from(255u8), Err(255));
    }

    #[test]
    fn test_winning_choice() {
        assert_eq!(Outcome::Yes.winning_choice(), Some(Choice::Yes));
        assert_eq!(Outcome::No.winning_choice(), Some(Choice::No));
        assert_eq!(Outcome::Tie.winning_choice(), None);
        assert!(Outcome::Tie.is_tie());
    }
}
