//! Token Ledger Collaborator
//!
//! The settlement engine never owns token balances itself. It talks to an
//! external fungible-token ledger through the [`TokenLedger`] trait. All
//! calls act on behalf of the engine's custody account:
//!
//! - `transfer_from(payer, amount)`: pull from `payer` into custody (needs allowance)
//! - `transfer(recipient, amount)`: pay out of custody
//! - `burn(amount)`: destroy tokens held in custody

pub mod memory;

use thiserror::Error;

use crate::core::{Address, Amount};

pub use memory::InMemoryLedger;

/// Errors raised by a token ledger.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LedgerError {
    /// Account balance too low.
    #[error("insufficient balance: needed {needed}, available {available}")]
    InsufficientBalance {
        /// Amount requested.
        needed: Amount,
        /// Balance held.
        available: Amount,
    },

    /// Allowance toward the custody account too low.
    #[error("insufficient allowance: needed {needed}, approved {approved}")]
    InsufficientAllowance {
        /// Amount requested.
        needed: Amount,
        /// Amount approved.
        approved: Amount,
    },

    /// Supply or balance overflow.
    #[error("token amount overflow")]
    Overflow,
}

/// Primitives the engine consumes from the stake-token ledger.
pub trait TokenLedger {
    /// Pull `amount` from `payer` into custody, spending the payer's allowance.
    fn transfer_from(&mut self, payer: &Address, amount: Amount) -> Result<(), LedgerError>;

    /// Send `amount` from custody to `recipient`.
    fn transfer(&mut self, recipient: &Address, amount: Amount) -> Result<(), LedgerError>;

    /// Destroy `amount` held in custody.
    fn burn(&mut self, amount: Amount) -> Result<(), LedgerError>;

    /// Balance of any account.
    fn balance_of(&self, account: &Address) -> Amount;

    /// Remaining allowance `owner` has granted to custody.
    fn allowance(&self, owner: &Address) -> Amount;

    /// The custody account these primitives operate on.
    fn custody(&self) -> Address;
}
