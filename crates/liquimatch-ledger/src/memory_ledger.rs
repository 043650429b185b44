//! Deterministic in-memory [`Ledger`].
//!
//! Balances live in `BTreeMap`s so that iteration (and therefore any digest
//! or report built from it) is identical on every node. All mutations are
//! atomic: either the full adjustment succeeds or the balance is unchanged.

use std::collections::BTreeMap;

use liquimatch_types::{AccountName, Asset, LiquimatchError, Result, Symbol};

use crate::ledger::Ledger;
use crate::supply::SupplyConservation;

#[derive(Debug, Clone, Default)]
pub struct InMemoryLedger {
    liquid: BTreeMap<(AccountName, Symbol), i64>,
    pending: BTreeMap<Symbol, i64>,
    supply: SupplyConservation,
}

impl InMemoryLedger {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Genesis-style funding: issue `amount` straight into `account`.
    pub fn fund(&mut self, account: &str, amount: Asset) -> Result<()> {
        self.issue(&AccountName::new(account), &amount)
    }

    /// Liquid amount only, by plain names.
    #[must_use]
    pub fn balance(&self, account: &str, symbol: &str) -> i64 {
        self.get_liquid_balance(&AccountName::new(account), &Symbol::new(symbol))
            .amount
    }

    #[must_use]
    pub fn supply(&self) -> &SupplyConservation {
        &self.supply
    }

    fn liquid_sum(&self, symbol: &Symbol) -> i128 {
        self.liquid
            .iter()
            .filter(|((_, s), _)| s == symbol)
            .map(|(_, v)| i128::from(*v))
            .sum()
    }

    /// Check `Σ liquid + pending == issued - burned` for every symbol seen.
    pub fn verify_conservation(&self) -> Result<()> {
        let mut symbols = self.supply.tracked_symbols();
        symbols.extend(self.pending.keys().cloned());
        symbols.extend(self.liquid.keys().map(|(_, s)| s.clone()));
        for symbol in &symbols {
            let pending = i128::from(self.pending.get(symbol).copied().unwrap_or(0));
            self.supply
                .verify(symbol, self.liquid_sum(symbol) + pending)?;
        }
        Ok(())
    }
}

impl Ledger for InMemoryLedger {
    fn holders(&self, symbol: &Symbol) -> Vec<(AccountName, i64)> {
        self.liquid
            .iter()
            .filter(|((_, s), v)| s == symbol && **v != 0)
            .map(|((a, _), v)| (a.clone(), *v))
            .collect()
    }

    fn get_liquid_balance(&self, account: &AccountName, symbol: &Symbol) -> Asset {
        let amount = self
            .liquid
            .get(&(account.clone(), symbol.clone()))
            .copied()
            .unwrap_or(0);
        Asset::new(amount, symbol.clone())
    }

    fn adjust_liquid_balance(&mut self, account: &AccountName, delta: &Asset) -> Result<()> {
        if delta.amount == 0 {
            return Ok(());
        }
        let key = (account.clone(), delta.symbol.clone());
        let current = self.liquid.get(&key).copied().unwrap_or(0);
        let next = current
            .checked_add(delta.amount)
            .ok_or(LiquimatchError::ArithmeticOverflow { op: "liquid balance" })?;
        if next < 0 {
            return Err(LiquimatchError::InsufficientBalance {
                account: account.clone(),
                needed: delta.negated(),
                available: delta.with_amount(current),
            });
        }
        if next == 0 {
            self.liquid.remove(&key);
        } else {
            self.liquid.insert(key, next);
        }
        Ok(())
    }

    fn adjust_pending_supply(&mut self, delta: &Asset) -> Result<()> {
        if delta.amount == 0 {
            return Ok(());
        }
        let current = self.pending.get(&delta.symbol).copied().unwrap_or(0);
        let next = current
            .checked_add(delta.amount)
            .ok_or(LiquimatchError::ArithmeticOverflow { op: "pending supply" })?;
        if next < 0 {
            return Err(LiquimatchError::InsufficientPendingSupply {
                needed: delta.negated(),
                available: delta.with_amount(current),
            });
        }
        self.pending.insert(delta.symbol.clone(), next);
        Ok(())
    }

    fn adjust_issued_supply(&mut self, delta: &Asset) -> Result<()> {
        self.supply.record(delta);
        Ok(())
    }

    fn pending_supply(&self, symbol: &Symbol) -> Asset {
        Asset::new(self.pending.get(symbol).copied().unwrap_or(0), symbol.clone())
    }

    fn total_supply(&self, symbol: &Symbol) -> Asset {
        let total = self.liquid_sum(symbol)
            + i128::from(self.pending.get(symbol).copied().unwrap_or(0));
        Asset::new(i64::try_from(total).unwrap_or(i64::MAX), symbol.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn alice() -> AccountName {
        AccountName::new("alice")
    }

    #[test]
    fn fund_increases_liquid_and_supply() {
        let mut l = InMemoryLedger::new();
        l.fund("alice", Asset::new(1_000, "USD")).unwrap();
        assert_eq!(l.balance("alice", "USD"), 1_000);
        assert_eq!(l.total_supply(&Symbol::new("USD")).amount, 1_000);
        l.verify_conservation().unwrap();
    }

    #[test]
    fn overdraw_rejected_and_balance_unchanged() {
        let mut l = InMemoryLedger::new();
        l.fund("alice", Asset::new(100, "USD")).unwrap();
        let err = l
            .adjust_liquid_balance(&alice(), &Asset::new(-200, "USD"))
            .unwrap_err();
        assert!(matches!(err, LiquimatchError::InsufficientBalance { .. }));
        assert_eq!(l.balance("alice", "USD"), 100);
    }

    #[test]
    fn lock_and_release_conserve_supply() {
        let mut l = InMemoryLedger::new();
        l.fund("alice", Asset::new(100, "USD")).unwrap();
        l.lock(&alice(), &Asset::new(60, "USD")).unwrap();
        assert_eq!(l.pending_supply(&Symbol::new("USD")).amount, 60);
        l.verify_conservation().unwrap();
        l.release(&AccountName::new("bob"), &Asset::new(60, "USD")).unwrap();
        assert_eq!(l.balance("bob", "USD"), 60);
        l.verify_conservation().unwrap();
    }

    #[test]
    fn release_beyond_pending_is_fatal() {
        let mut l = InMemoryLedger::new();
        let err = l
            .release(&alice(), &Asset::new(1, "USD"))
            .unwrap_err();
        assert!(err.is_fatal());
    }

    #[test]
    fn unrecorded_credit_breaks_conservation() {
        let mut l = InMemoryLedger::new();
        l.fund("alice", Asset::new(100, "USD")).unwrap();
        l.adjust_liquid_balance(&alice(), &Asset::new(1, "USD")).unwrap();
        assert!(matches!(
            l.verify_conservation(),
            Err(LiquimatchError::SupplyInvariantViolation { .. })
        ));
    }

    #[test]
    fn burn_pending_reduces_expected_supply() {
        let mut l = InMemoryLedger::new();
        l.fund("alice", Asset::new(100, "USD")).unwrap();
        l.lock(&alice(), &Asset::new(10, "USD")).unwrap();
        l.burn_pending(&Asset::new(10, "USD")).unwrap();
        assert_eq!(l.supply().expected_supply(&Symbol::new("USD")), 90);
        l.verify_conservation().unwrap();
    }

    #[test]
    fn holders_listed_in_name_order() {
        let mut l = InMemoryLedger::new();
        l.fund("carol", Asset::new(3, "USD")).unwrap();
        l.fund("alice", Asset::new(1, "USD")).unwrap();
        let holders = l.holders(&Symbol::new("USD"));
        assert_eq!(holders[0].0.as_str(), "alice");
        assert_eq!(holders[1].1, 3);
    }

    #[test]
    fn random_movements_conserve_supply() {
        use rand::{Rng, SeedableRng, rngs::StdRng};

        let mut l = InMemoryLedger::new();
        let accounts = [alice(), AccountName::new("bob"), AccountName::new("carol")];
        for a in &accounts {
            l.fund(a.as_str(), Asset::new(1_000_000, "USD")).unwrap();
        }
        let mut rng = StdRng::seed_from_u64(3);
        for _ in 0..1_000 {
            let who = &accounts[rng.gen_range(0..accounts.len())];
            let amount = Asset::new(rng.gen_range(1..200_000), "USD");
            // Failed movements must leave no partial change behind.
            let _ = match rng.gen_range(0..5) {
                0 => l.lock(who, &amount),
                1 => l.release(who, &amount),
                2 => l.issue(who, &amount),
                3 => l.burn(who, &amount),
                _ => l.burn_pending(&amount),
            };
            l.verify_conservation().unwrap();
        }
        let usd = Symbol::new("USD");
        assert_eq!(i128::from(l.total_supply(&usd).amount), l.supply().expected_supply(&usd));
    }
}
