//! Supply conservation invariant checker.
//!
//! Invariant enforced after every transaction:
//! ```text
//! ∀ symbol: Σ(liquid) + pending == Σ(issued) - Σ(burned)
//! ```
//!
//! Swaps, fills, loans and settlements only move value between accounts and
//! engine objects. Any drift means the engine created or destroyed value
//! outside an explicit issuance/burn path, and block processing must halt.

use std::collections::{BTreeMap, BTreeSet};

use liquimatch_types::{Asset, LiquimatchError, Result, Symbol};

/// Per-symbol issuance and burn totals.
#[derive(Debug, Clone, Default)]
pub struct SupplyConservation {
    issued: BTreeMap<Symbol, i128>,
    burned: BTreeMap<Symbol, i128>,
}

impl SupplyConservation {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Record issuance (positive) or burn (negative).
    pub fn record(&mut self, delta: &Asset) {
        let amount = i128::from(delta.amount);
        if amount >= 0 {
            *self.issued.entry(delta.symbol.clone()).or_insert(0) += amount;
        } else {
            *self.burned.entry(delta.symbol.clone()).or_insert(0) -= amount;
        }
    }

    #[must_use]
    pub fn total_issued(&self, symbol: &Symbol) -> i128 {
        self.issued.get(symbol).copied().unwrap_or(0)
    }

    #[must_use]
    pub fn total_burned(&self, symbol: &Symbol) -> i128 {
        self.burned.get(symbol).copied().unwrap_or(0)
    }

    /// Expected circulating supply: issued - burned.
    #[must_use]
    pub fn expected_supply(&self, symbol: &Symbol) -> i128 {
        self.total_issued(symbol) - self.total_burned(symbol)
    }

    /// Verify the measured supply of `symbol`.
    ///
    /// # Errors
    /// Returns [`LiquimatchError::SupplyInvariantViolation`] if actual ≠ expected.
    pub fn verify(&self, symbol: &Symbol, actual_supply: i128) -> Result<()> {
        let expected = self.expected_supply(symbol);
        if actual_supply != expected {
            return Err(LiquimatchError::SupplyInvariantViolation {
                reason: format!(
                    "Asset {symbol}: actual supply {actual_supply} != expected {expected} \
                     (issued={}, burned={})",
                    self.total_issued(symbol),
                    self.total_burned(symbol),
                ),
            });
        }
        Ok(())
    }

    #[must_use]
    pub fn tracked_symbols(&self) -> BTreeSet<Symbol> {
        self.issued
            .keys()
            .chain(self.burned.keys())
            .cloned()
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn usd() -> Symbol {
        Symbol::new("USD")
    }

    #[test]
    fn empty_supply_is_zero() {
        let sc = SupplyConservation::new();
        assert_eq!(sc.expected_supply(&usd()), 0);
        assert!(sc.verify(&usd(), 0).is_ok());
    }

    #[test]
    fn issuance_minus_burn() {
        let mut sc = SupplyConservation::new();
        sc.record(&Asset::new(1_000, "USD"));
        sc.record(&Asset::new(500, "USD"));
        sc.record(&Asset::new(-300, "USD"));
        assert_eq!(sc.expected_supply(&usd()), 1_200);
        assert_eq!(sc.total_burned(&usd()), 300);
    }

    #[test]
    fn verify_fails_when_imbalanced() {
        let mut sc = SupplyConservation::new();
        sc.record(&Asset::new(10, "USD"));
        let err = sc.verify(&usd(), 11).unwrap_err();
        assert!(matches!(err, LiquimatchError::SupplyInvariantViolation { .. }));
        assert!(err.is_fatal());
    }

    #[test]
    fn symbols_independent() {
        let mut sc = SupplyConservation::new();
        sc.record(&Asset::new(5, "COIN"));
        sc.record(&Asset::new(50_000, "USD"));
        assert!(sc.verify(&Symbol::new("COIN"), 5).is_ok());
        assert!(sc.verify(&usd(), 50_000).is_ok());
        assert_eq!(sc.tracked_symbols().len(), 2);
    }
}
