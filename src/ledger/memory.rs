//! In-Memory Token Ledger
//!
//! Reference implementation of [`TokenLedger`] used by tests, the demo run
//! and the dev node. Balances and allowances live in BTreeMaps so snapshots
//! serialize deterministically.

use std::collections::BTreeMap;
use serde::{Serialize, Deserialize};

use crate::core::{Address, Amount};
use super::{LedgerError, TokenLedger};

/// Balances, allowances toward custody, and total supply.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct InMemoryLedger {
    custody: Address,
    balances: BTreeMap<Address, Amount>,
    allowances: BTreeMap<Address, Amount>,
    total_supply: Amount,
}

impl InMemoryLedger {
    /// Create an empty ledger whose engine custody is `custody`.
    pub fn new(custody: Address) -> Self {
        Self {
            custody,
            balances: BTreeMap::new(),
            allowances: BTreeMap::new(),
            total_supply: 0,
        }
    }

    /// Mint new tokens to `account`.
    pub fn mint(&mut self, account: &Address, amount: Amount) -> Result<(), LedgerError> {
        let supply = self.total_supply.checked_add(amount).ok_or(LedgerError::Overflow)?;
        let balance = self.balance_of(account).checked_add(amount).ok_or(LedgerError::Overflow)?;
        self.total_supply = supply;
        self.balances.insert(*account, balance);
        Ok(())
    }

    /// Set the allowance `owner` grants to custody (overwrites).
    pub fn approve(&mut self, owner: &Address, amount: Amount) {
        self.allowances.insert(*owner, amount);
    }

    /// Current total supply.
    pub fn total_supply(&self) -> Amount {
        self.total_supply
    }

    /// Move tokens between two accounts.
    fn move_balance(&mut self, from: &Address, to: &Address, amount: Amount) -> Result<(), LedgerError> {
        let available = self.balance_of(from);
        if available < amount {
            return Err(LedgerError::InsufficientBalance { needed: amount, available });
        }
        if from == to {
            return Ok(());
        }
        let credited = self.balance_of(to).checked_add(amount).ok_or(LedgerError::Overflow)?;
        self.balances.insert(*from, available - amount);
        self.balances.insert(*to, credited);
        Ok(())
    }
}

impl TokenLedger for InMemoryLedger {
    fn transfer_from(&mut self, payer: &Address, amount: Amount) -> Result<(), LedgerError> {
        let approved = self.allowance(payer);
        if approved < amount {
            return Err(LedgerError::InsufficientAllowance { needed: amount, approved });
        }
        let custody = self.custody;
        self.move_balance(payer, &custody, amount)?;
        self.allowances.insert(*payer, approved - amount);
        Ok(())
    }

    fn transfer(&mut self, recipient: &Address, amount: Amount) -> Result<(), LedgerError> {
        let custody = self.custody;
        self.move_balance(&custody, recipient, amount)
    }

    fn burn(&mut self, amount: Amount) -> Result<(), LedgerError> {
        let available = self.balance_of(&self.custody);
        if available < amount {
            return Err(LedgerError::InsufficientBalance { needed: amount, available });
        }
        self.balances.insert(self.custody, available - amount);
        self.total_supply -= amount;
        Ok(())
    }

    fn balance_of(&self, account: &Address) -> Amount {
        self.balances.get(account).copied().unwrap_or(0)
    }

    fn allowance(&self, owner: &Address) -> Amount {
        self.allowances.get(owner).copied().unwrap_or(0)
    }

    fn custody(&self) -> Address {
        self.custody
    }
}
