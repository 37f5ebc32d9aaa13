use std::collections::BTreeMap;

use tracing::error;

use crate::error::{BetError, IntegrityError};

/// Opaque identifier of a chat user.
pub type UserId = String;

/// Per-user coin balances.
///
/// Every balance effect of the betting flow goes through [`Ledger::debit`] and
/// [`Ledger::credit`]; [`Ledger::set_balance`] is reserved for admin overrides.
#[derive(Debug, Clone)]
pub struct Ledger {
    starting_balance: u64,
    balances: BTreeMap<UserId, u64>,
    changed: bool,
}

impl Ledger {
    /// Create an empty ledger where unseen users start with `starting_balance` coins.
    pub fn new(starting_balance: u64) -> Self {
        Self {
            starting_balance,
            balances: BTreeMap::new(),
            changed: false,
        }
    }

    /// Rebuild a ledger from persisted balances.
    pub fn from_balances(starting_balance: u64, balances: BTreeMap<UserId, u64>) -> Self {
        Self {
            starting_balance,
            balances,
            changed: false,
        }
    }

    /// Coins a user currently holds, defaulting to the starting balance.
    pub fn get_balance(&self, user_id: &str) -> u64 {
        self.balances
            .get(user_id)
            .copied()
            .unwrap_or(self.starting_balance)
    }

    /// Remove `amount` coins, failing closed when the user cannot cover it.
    pub fn debit(&mut self, user_id: &str, amount: u64) -> Result<u64, BetError> {
        let balance = self.get_balance(user_id);
        let Some(next) = balance.checked_sub(amount) else {
            return Err(BetError::InsufficientFunds {
                balance,
                requested: amount,
                shortfall: amount - balance,
                refunded_previous: None,
            });
        };
        self.write(user_id, next);
        Ok(next)
    }

    /// Add `amount` coins (refunds and payouts).
    pub fn credit(&mut self, user_id: &str, amount: u64) -> Result<u64, IntegrityError> {
        let balance = self.get_balance(user_id);
        let Some(next) = balance.checked_add(amount) else {
            error!(user_id, balance, amount, "ledger credit would overflow");
            return Err(IntegrityError::BalanceOverflow {
                user_id: user_id.to_string(),
                balance,
                amount,
            });
        };
        self.write(user_id, next);
        Ok(next)
    }

    /// Administrative override that bypasses debit/credit symmetry.
    pub fn set_balance(&mut self, user_id: &str, amount: u64) {
        self.write(user_id, amount);
    }

    /// All balances that have been touched at least once.
    pub fn balances(&self) -> &BTreeMap<UserId, u64> {
        &self.balances
    }

    /// Return and reset the "mutated since last commit" flag.
    pub fn take_changed(&mut self) -> bool {
        std::mem::take(&mut self.changed)
    }

    fn write(&mut self, user_id: &str, amount: u64) {
        self.balances.insert(user_id.to_string(), amount);
        self.changed = true;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unseen_user_gets_starting_balance() {
        let ledger = Ledger::new(10_000);
        assert_eq!(ledger.get_balance("u1"), 10_000);
        assert!(ledger.balances().is_empty());
    }

    #[test]
    fn debit_exact_balance_succeeds() {
        let mut ledger = Ledger::new(100);
        assert_eq!(ledger.debit("u1", 100).unwrap(), 0);
        assert_eq!(ledger.get_balance("u1"), 0);
    }

    #[test]
    fn debit_fails_closed() {
        let mut ledger = Ledger::new(100);
        let err = ledger.debit("u1", 150).unwrap_err();
        match err {
            BetError::InsufficientFunds {
                balance,
                requested,
                shortfall,
                ..
            } => {
                assert_eq!(balance, 100);
                assert_eq!(requested, 150);
                assert_eq!(shortfall, 50);
            }
            other => panic!("unexpected error: {other:?}"),
        }
        assert_eq!(ledger.get_balance("u1"), 100);
        assert!(!ledger.take_changed());
    }

    #[test]
    fn credit_and_set_balance() {
        let mut ledger = Ledger::new(0);
        ledger.credit("u1", 40).unwrap();
        assert_eq!(ledger.get_balance("u1"), 40);
        ledger.set_balance("u1", 7);
        assert_eq!(ledger.get_balance("u1"), 7);
        assert!(ledger.take_changed());
        assert!(!ledger.take_changed());
    }

    #[test]
    fn credit_overflow_is_an_integrity_error() {
        let mut ledger = Ledger::new(u64::MAX);
        assert!(ledger.credit("u1", 1).is_err());
        assert_eq!(ledger.get_balance("u1"), u64::MAX);
    }
}
