//! Asset symbols and signed fixed-point amounts.
//!
//! An [`Asset`] is an `i64` amount paired with its [`Symbol`]. Arithmetic
//! between assets of different symbols is a validation error, and every
//! sum is overflow-checked.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::{LiquimatchError, Result};

// ---------------------------------------------------------------------------
// Symbol
// ---------------------------------------------------------------------------

/// Ticker symbol of an asset (e.g. `"COIN"`, `"USD"`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Ord, PartialOrd, Serialize, Deserialize)]
pub struct Symbol(pub String);

impl Symbol {
    #[must_use]
    pub fn new(s: &str) -> Self {
        Self(s.to_string())
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for Symbol {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

impl fmt::Display for Symbol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

// ---------------------------------------------------------------------------
// Asset
// ---------------------------------------------------------------------------

/// An amount of a specific asset.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Asset {
    pub amount: i64,
    pub symbol: Symbol,
}

impl Asset {
    #[must_use]
    pub fn new(amount: i64, symbol: impl Into<Symbol>) -> Self {
        Self {
            amount,
            symbol: symbol.into(),
        }
    }

    #[must_use]
    pub fn zero(symbol: &Symbol) -> Self {
        Self {
            amount: 0,
            symbol: symbol.clone(),
        }
    }

    #[must_use]
    pub fn is_zero(&self) -> bool {
        self.amount == 0
    }

    /// Same symbol, different amount.
    #[must_use]
    pub fn with_amount(&self, amount: i64) -> Self {
        Self {
            amount,
            symbol: self.symbol.clone(),
        }
    }

    #[must_use]
    pub fn negated(&self) -> Self {
        self.with_amount(-self.amount)
    }

    fn expect_symbol(&self, other: &Asset) -> Result<()> {
        if self.symbol != other.symbol {
            return Err(LiquimatchError::SymbolMismatch {
                expected: self.symbol.clone(),
                actual: other.symbol.clone(),
            });
        }
        Ok(())
    }

    pub fn checked_add(&self, other: &Asset) -> Result<Asset> {
        self.expect_symbol(other)?;
        let amount = self
            .amount
            .checked_add(other.amount)
            .ok_or(LiquimatchError::ArithmeticOverflow { op: "asset add" })?;
        Ok(self.with_amount(amount))
    }

    pub fn checked_sub(&self, other: &Asset) -> Result<Asset> {
        self.expect_symbol(other)?;
        let amount = self
            .amount
            .checked_sub(other.amount)
            .ok_or(LiquimatchError::ArithmeticOverflow { op: "asset sub" })?;
        Ok(self.with_amount(amount))
    }

    /// In-place add, used on object fields.
    pub fn add_assign(&mut self, other: &Asset) -> Result<()> {
        *self = self.checked_add(other)?;
        Ok(())
    }

    pub fn sub_assign(&mut self, other: &Asset) -> Result<()> {
        *self = self.checked_sub(other)?;
        Ok(())
    }

    /// `self * numerator / denominator` with truncation.
    pub fn scale(&self, numerator: i64, denominator: i64) -> Result<Asset> {
        let wide = crate::math::mul_div(
            crate::math::widen(self.amount)?,
            crate::math::widen(numerator)?,
            crate::math::widen(denominator)?,
        )?;
        Ok(self.with_amount(crate::math::narrow(wide)?))
    }

    /// Minimum of two same-symbol assets.
    pub fn min(&self, other: &Asset) -> Result<Asset> {
        self.expect_symbol(other)?;
        Ok(if self.amount <= other.amount {
            self.clone()
        } else {
            other.clone()
        })
    }
}

impl fmt::Display for Asset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.amount, self.symbol)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn add_and_sub_same_symbol() {
        let a = Asset::new(100, "USD");
        let b = Asset::new(40, "USD");
        assert_eq!(a.checked_add(&b).unwrap().amount, 140);
        assert_eq!(a.checked_sub(&b).unwrap().amount, 60);
    }

    #[test]
    fn mismatched_symbols_rejected() {
        let a = Asset::new(100, "USD");
        let b = Asset::new(40, "COIN");
        assert!(matches!(
            a.checked_add(&b),
            Err(LiquimatchError::SymbolMismatch { .. })
        ));
    }

    #[test]
    fn add_overflow_detected() {
        let a = Asset::new(i64::MAX, "USD");
        let b = Asset::new(1, "USD");
        assert!(matches!(
            a.checked_add(&b),
            Err(LiquimatchError::ArithmeticOverflow { .. })
        ));
    }

    #[test]
    fn scale_truncates() {
        let a = Asset::new(1_000, "USD");
        assert_eq!(a.scale(10, 10_000).unwrap().amount, 1);
        assert_eq!(Asset::new(999, "USD").scale(10, 10_000).unwrap().amount, 0);
    }

    #[test]
    fn display_format() {
        assert_eq!(Asset::new(5, "COIN").to_string(), "5 COIN");
    }
}
