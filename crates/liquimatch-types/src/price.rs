//! Exchange-rate ratios between two assets.
//!
//! A [`Price`] is the ratio `base.amount : quote.amount`. Converting an
//! amount of one leg into the other is always a `u128` multiply followed by
//! a truncating divide; [`Price::mul_round_up`] is the explicit ceiling form
//! used for the counter-leg of a fill.
//!
//! ## Ordering
//!
//! Prices are ordered first by `(base.symbol, quote.symbol)` and then by the
//! ratio `base / quote`, compared by cross-multiplication:
//!
//! ```text
//! a < b  <=>  a.base * b.quote < b.base * a.quote
//! ```
//!
//! Two prices with equal ratios compare equal even when their raw amounts
//! differ (`1:2 == 2:4`).

use std::cmp::Ordering;
use std::fmt;
use std::ops::Not;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::math::{mul_div, mul_div_ceil, narrow, widen};
use crate::{Asset, LiquimatchError, Result, Symbol};

/// Ratio between two amounts of different assets.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Price {
    pub base: Asset,
    pub quote: Asset,
}

impl Price {
    #[must_use]
    pub fn new(base: Asset, quote: Asset) -> Self {
        Self { base, quote }
    }

    /// A price with either leg zero carries no information.
    #[must_use]
    pub fn is_null(&self) -> bool {
        self.base.amount <= 0 || self.quote.amount <= 0
    }

    /// Swap base and quote.
    #[must_use]
    pub fn invert(&self) -> Price {
        Price {
            base: self.quote.clone(),
            quote: self.base.clone(),
        }
    }

    /// This price with `symbol` as its base, inverting when needed.
    pub fn oriented(&self, base_symbol: &Symbol) -> Result<Price> {
        if self.base.symbol == *base_symbol {
            Ok(self.clone())
        } else if self.quote.symbol == *base_symbol {
            Ok(self.invert())
        } else {
            Err(LiquimatchError::SymbolMismatch {
                expected: base_symbol.clone(),
                actual: self.base.symbol.clone(),
            })
        }
    }

    /// Whether both prices quote the same ordered pair.
    #[must_use]
    pub fn same_pair(&self, other: &Price) -> bool {
        self.base.symbol == other.base.symbol && self.quote.symbol == other.quote.symbol
    }

    fn convert(&self, amount: &Asset, round_up: bool) -> Result<Asset> {
        if self.is_null() {
            return Err(LiquimatchError::InvalidPrice {
                reason: format!("null price {self}"),
            });
        }
        let (num, den, out) = if amount.symbol == self.base.symbol {
            (&self.quote, &self.base, &self.quote.symbol)
        } else if amount.symbol == self.quote.symbol {
            (&self.base, &self.quote, &self.base.symbol)
        } else {
            return Err(LiquimatchError::SymbolMismatch {
                expected: self.base.symbol.clone(),
                actual: amount.symbol.clone(),
            });
        };
        let a = widen(amount.amount)?;
        let n = widen(num.amount)?;
        let d = widen(den.amount)?;
        let wide = if round_up {
            mul_div_ceil(a, n, d)?
        } else {
            mul_div(a, n, d)?
        };
        Ok(Asset::new(narrow(wide)?, out.clone()))
    }

    /// Convert `amount` through this price, rounding down.
    pub fn mul(&self, amount: &Asset) -> Result<Asset> {
        self.convert(amount, false)
    }

    /// Convert `amount` through this price, rounding up.
    pub fn mul_round_up(&self, amount: &Asset) -> Result<Asset> {
        self.convert(amount, true)
    }

    /// `base * numerator : quote * denominator`, reduced so both legs fit.
    pub fn scale_ratio(&self, numerator: u32, denominator: u32) -> Result<Price> {
        let mut b = widen(self.base.amount)? * u128::from(numerator);
        let mut q = widen(self.quote.amount)? * u128::from(denominator);
        let g = gcd(b, q);
        if g > 1 {
            b /= g;
            q /= g;
        }
        let limit = u128::from(u64::MAX >> 1);
        while b > limit || q > limit {
            b >>= 1;
            q >>= 1;
        }
        if b == 0 || q == 0 {
            return Err(LiquimatchError::InvalidPrice {
                reason: format!("ratio scaling of {self} underflowed"),
            });
        }
        Ok(Price::new(
            self.base.with_amount(narrow(b)?),
            self.quote.with_amount(narrow(q)?),
        ))
    }

    /// `base / quote` as a decimal, for logging and display only.
    #[must_use]
    pub fn to_decimal(&self) -> Decimal {
        if self.quote.amount == 0 {
            return Decimal::ZERO;
        }
        Decimal::from(self.base.amount) / Decimal::from(self.quote.amount)
    }

    fn ratio_cmp(&self, other: &Price) -> Ordering {
        let lhs = i128::from(self.base.amount) * i128::from(other.quote.amount);
        let rhs = i128::from(other.base.amount) * i128::from(self.quote.amount);
        lhs.cmp(&rhs)
    }
}

fn gcd(mut a: u128, mut b: u128) -> u128 {
    while b != 0 {
        let t = a % b;
        a = b;
        b = t;
    }
    a
}

impl PartialEq for Price {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Price {}

impl PartialOrd for Price {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Price {
    fn cmp(&self, other: &Self) -> Ordering {
        self.base
            .symbol
            .cmp(&other.base.symbol)
            .then_with(|| self.quote.symbol.cmp(&other.quote.symbol))
            .then_with(|| self.ratio_cmp(other))
    }
}

impl Not for Price {
    type Output = Price;

    fn not(self) -> Price {
        self.invert()
    }
}

impl Not for &Price {
    type Output = Price;

    fn not(self) -> Price {
        self.invert()
    }
}

impl fmt::Display for Price {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.base, self.quote)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn p(b: i64, bs: &str, q: i64, qs: &str) -> Price {
        Price::new(Asset::new(b, bs), Asset::new(q, qs))
    }

    #[test]
    fn mul_converts_both_directions() {
        let price = p(2, "USD", 1, "COIN");
        assert_eq!(price.mul(&Asset::new(10, "USD")).unwrap(), Asset::new(5, "COIN"));
        assert_eq!(price.mul(&Asset::new(10, "COIN")).unwrap(), Asset::new(20, "USD"));
    }

    #[test]
    fn mul_rounds_down_and_up() {
        let price = p(3, "USD", 1, "COIN");
        assert_eq!(price.mul(&Asset::new(10, "USD")).unwrap().amount, 3);
        assert_eq!(price.mul_round_up(&Asset::new(10, "USD")).unwrap().amount, 4);
    }

    #[test]
    fn mul_foreign_symbol_rejected() {
        let price = p(3, "USD", 1, "COIN");
        assert!(price.mul(&Asset::new(10, "EUR")).is_err());
    }

    #[test]
    fn equal_ratios_compare_equal() {
        assert_eq!(p(1, "USD", 2, "COIN"), p(2, "USD", 4, "COIN"));
        assert!(p(1, "USD", 2, "COIN") < p(1, "USD", 1, "COIN"));
    }

    #[test]
    fn invert_swaps_legs() {
        let price = !p(1, "USD", 2, "COIN");
        assert_eq!(price.base.symbol, Symbol::new("COIN"));
        assert_eq!(price.base.amount, 2);
    }

    #[test]
    fn scale_ratio_applies_numerator_to_base() {
        let price = p(100, "USD", 100, "COIN").scale_ratio(1000, 1500).unwrap();
        assert_eq!(price, p(2, "USD", 3, "COIN"));
    }

    #[test]
    fn oriented_flips_when_needed() {
        let price = p(1, "USD", 2, "COIN");
        let o = price.oriented(&Symbol::new("COIN")).unwrap();
        assert_eq!(o.base.symbol.as_str(), "COIN");
        assert!(price.oriented(&Symbol::new("EUR")).is_err());
    }

    #[test]
    fn decimal_view() {
        assert_eq!(p(3, "USD", 2, "COIN").to_decimal(), Decimal::new(15, 1));
    }
}
