//! In-memory account balances.
//!
//! Every replica applies the same transactions in the same order, so every
//! replica's ledger goes through the same sequence of states. A rejected
//! transaction leaves the balances untouched.

use {
    crate::{
        error::LedgerError,
        transaction::{Deposit, Transaction, Transfer},
    },
    log::debug,
    std::collections::BTreeMap,
};

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Ledger {
    balances: BTreeMap<String, i64>,
}

impl Ledger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn balance(&self, account: &str) -> Option<i64> {
        self.balances.get(account).copied()
    }

    /// All balances, ordered by account name.
    pub fn balances(&self) -> &BTreeMap<String, i64> {
        &self.balances
    }

    pub fn apply(&mut self, transaction: &Transaction) -> Result<(), LedgerError> {
        match transaction {
            Transaction::Deposit(Deposit { account, amount }) => {
                self.deposit(account, *amount).map(|_| ())
            }
            Transaction::Transfer(Transfer {
                from_account,
                to_account,
                amount,
            }) => self.transfer(from_account, to_account, *amount),
        }
    }

    /// Credit `account`, creating it if needed. Returns the new balance.
    pub fn deposit(&mut self, account: &str, amount: i64) -> Result<i64, LedgerError> {
        if amount < 0 {
            return Err(LedgerError::NegativeAmount(amount));
        }
        let current = self.balance(account);
        let updated = current
            .unwrap_or(0)
            .checked_add(amount)
            .ok_or_else(|| LedgerError::Overflow(account.to_string()))?;
        if current.is_none() {
            debug!("account [{}] not exists, create with amount [{}]", account, amount);
        }
        self.balances.insert(account.to_string(), updated);
        Ok(updated)
    }

    /// Move `amount` from an existing account to any account.
    pub fn transfer(&mut self, from: &str, to: &str, amount: i64) -> Result<(), LedgerError> {
        if amount < 0 {
            return Err(LedgerError::NegativeAmount(amount));
        }
        let from_balance = self
            .balance(from)
            .ok_or_else(|| LedgerError::UnknownAccount(from.to_string()))?;
        let remaining = from_balance
            .checked_sub(amount)
            .filter(|remaining| *remaining >= 0)
            .ok_or_else(|| LedgerError::InsufficientFunds {
                account: from.to_string(),
                balance: from_balance,
                amount,
            })?;
        if from == to {
            return Ok(());
        }
        let credited = self
            .balance(to)
            .unwrap_or(0)
            .checked_add(amount)
            .ok_or_else(|| LedgerError::Overflow(to.to_string()))?;

        self.balances.insert(from.to_string(), remaining);
        self.balances.insert(to.to_string(), credited);
        Ok(())
    }

    /// `BALANCES a:1 b:2`, accounts in lexicographic order.
    pub fn snapshot_line(&self) -> String {
        let mut line = String::from("BALANCES");
        for (account, amount) in &self.balances {
            line.push_str(&format!(" {account}:{amount}"));
        }
        line
    }
}

// ── Tests ───────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use {super::*, assert_matches::assert_matches};

    #[test]
    fn test_deposits_accumulate() {
        let mut ledger = Ledger::new();
        assert_eq!(ledger.deposit("A", 100), Ok(100));
        assert_eq!(ledger.deposit("A", 50), Ok(150));
        assert_eq!(ledger.snapshot_line(), "BALANCES A:150");
    }

    #[test]
    fn test_transfer_creates_destination() {
        let mut ledger = Ledger::new();
        ledger.deposit("A", 150).unwrap();
        ledger.transfer("A", "B", 30).unwrap();
        assert_eq!(ledger.snapshot_line(), "BALANCES A:120 B:30");
    }

    #[test]
    fn test_insufficient_funds_leaves_balances() {
        let mut ledger = Ledger::new();
        ledger.deposit("A", 120).unwrap();
        let before = ledger.clone();
        assert_matches!(
            ledger.transfer("A", "B", 1000),
            Err(LedgerError::InsufficientFunds { balance: 120, amount: 1000, .. })
        );
        assert_eq!(ledger, before);
        assert_eq!(ledger.balance("B"), None);
    }

    #[test]
    fn test_negative_amounts_rejected() {
        let mut ledger = Ledger::new();
        ledger.deposit("A", 10).unwrap();
        let before = ledger.clone();
        assert_eq!(ledger.deposit("A", -1), Err(LedgerError::NegativeAmount(-1)));
        assert_eq!(
            ledger.transfer("A", "B", -1),
            Err(LedgerError::NegativeAmount(-1))
        );
        assert_eq!(ledger, before);
    }

    #[test]
    fn test_unknown_source() {
        let mut ledger = Ledger::new();
        assert_eq!(
            ledger.transfer("ghost", "B", 0),
            Err(LedgerError::UnknownAccount("ghost".to_string()))
        );
        assert!(ledger.balances().is_empty());
    }

    #[test]
    fn test_overflow_rejected() {
        let mut ledger = Ledger::new();
        ledger.deposit("A", i64::MAX).unwrap();
        ledger.deposit("B", 1).unwrap();
        assert_eq!(ledger.deposit("A", 1), Err(LedgerError::Overflow("A".to_string())));
        assert_eq!(
            ledger.transfer("B", "A", 1),
            Err(LedgerError::Overflow("A".to_string()))
        );
        assert_eq!(ledger.balance("B"), Some(1));
    }

    #[test]
    fn test_self_transfer_is_noop() {
        let mut ledger = Ledger::new();
        ledger.deposit("A", 5).unwrap();
        ledger.transfer("A", "A", 5).unwrap();
        assert_eq!(ledger.balance("A"), Some(5));
        assert!(ledger.transfer("A", "A", 6).is_err());
    }

    #[test]
    fn test_apply_and_sorted_snapshot() {
        let mut ledger = Ledger::new();
        for tx in [
            Transaction::deposit("zeta", 3),
            Transaction::deposit("alpha", 9),
            Transaction::transfer("alpha", "mu", 4),
        ] {
            ledger.apply(&tx).unwrap();
        }
        assert_eq!(ledger.snapshot_line(), "BALANCES alpha:5 mu:4 zeta:3");
        assert_eq!(Ledger::new().snapshot_line(), "BALANCES");
    }
}
