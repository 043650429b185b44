//! Option strikes and the orders that write them.
//!
//! An option asset names one [`OptionStrike`]: the right to trade
//! `multiple` units of the quote asset at `strike_price` until
//! `expiration`. Each written unit locks its underlying in an
//! [`OptionOrder`]:
//!
//! ```text
//! call: writer locks quote,  holder pays base  (strike) to take quote
//! put:  writer locks base,   holder pays quote          to take base (strike)
//! ```

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::constants::OPTION_ASSET_PREFIX;
use crate::{AccountName, Asset, LiquimatchError, OrderId, Price, Result, Symbol};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OptionStrike {
    /// `base : quote`, quoted per `quote.amount` units of the quote asset.
    pub strike_price: Price,
    pub call: bool,
    /// Quote units covered by one option unit.
    pub multiple: i64,
    pub expiration: DateTime<Utc>,
}

impl OptionStrike {
    #[must_use]
    pub fn new(strike_price: Price, call: bool, multiple: i64, expiration: DateTime<Utc>) -> Self {
        Self {
            strike_price,
            call,
            multiple,
            expiration,
        }
    }

    /// `OPT.C.COIN.105000000.USD.20270101`: side, quote, strike, base, expiry.
    #[must_use]
    pub fn symbol(&self) -> Symbol {
        let side = if self.call { "C" } else { "P" };
        Symbol(format!(
            "{OPTION_ASSET_PREFIX}{side}.{}.{}.{}.{}",
            self.strike_price.quote.symbol,
            self.strike_price.base.amount,
            self.strike_price.base.symbol,
            self.expiration.format("%Y%m%d")
        ))
    }

    #[must_use]
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expiration <= now
    }

    /// The asset a writer locks: quote for calls, base for puts.
    #[must_use]
    pub fn underlying_symbol(&self) -> &Symbol {
        if self.call {
            &self.strike_price.quote.symbol
        } else {
            &self.strike_price.base.symbol
        }
    }

    /// The asset an exercising holder pays.
    #[must_use]
    pub fn payment_symbol(&self) -> &Symbol {
        if self.call {
            &self.strike_price.base.symbol
        } else {
            &self.strike_price.quote.symbol
        }
    }

    fn quote_units(&self, units: i64) -> Result<Asset> {
        let amount = units
            .checked_mul(self.multiple)
            .ok_or(LiquimatchError::ArithmeticOverflow { op: "option units" })?;
        Ok(Asset::new(amount, self.strike_price.quote.symbol.clone()))
    }

    /// Underlying backing `units` options; what the holder receives on
    /// exercise.
    pub fn underlying(&self, units: i64) -> Result<Asset> {
        let quote = self.quote_units(units)?;
        if self.call {
            Ok(quote)
        } else {
            self.strike_price.mul(&quote)
        }
    }

    /// What exercising `units` options costs the holder. The call leg
    /// rounds up against the holder.
    pub fn exercise_payment(&self, units: i64) -> Result<Asset> {
        let quote = self.quote_units(units)?;
        if self.call {
            self.strike_price.mul_round_up(&quote)
        } else {
            Ok(quote)
        }
    }
}

/// Options written by one account against locked underlying.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OptionOrder {
    pub id: OrderId,
    pub option_symbol: Symbol,
    /// Option units outstanding against this order.
    pub units: i64,
    pub underlying: Asset,
    pub created: DateTime<Utc>,
    pub last_updated: DateTime<Utc>,
}

impl OptionOrder {
    #[must_use]
    pub fn owner(&self) -> &AccountName {
        &self.id.owner
    }

    #[must_use]
    pub fn option_position(&self) -> Asset {
        Asset::new(self.units, self.option_symbol.clone())
    }
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use super::*;

    fn strike(call: bool) -> OptionStrike {
        OptionStrike::new(
            Price::new(Asset::new(105, "USD"), Asset::new(100, "COIN")),
            call,
            100,
            Utc.with_ymd_and_hms(2027, 1, 1, 0, 0, 0).unwrap(),
        )
    }

    #[test]
    fn symbol_encodes_series() {
        assert_eq!(strike(true).symbol().as_str(), "OPT.C.COIN.105.USD.20270101");
        assert_eq!(strike(false).symbol().as_str(), "OPT.P.COIN.105.USD.20270101");
    }

    #[test]
    fn call_legs() {
        let s = strike(true);
        assert_eq!(s.underlying(3).unwrap(), Asset::new(300, "COIN"));
        assert_eq!(s.exercise_payment(3).unwrap(), Asset::new(315, "USD"));
    }

    #[test]
    fn put_legs() {
        let s = strike(false);
        assert_eq!(s.underlying(3).unwrap(), Asset::new(315, "USD"));
        assert_eq!(s.exercise_payment(3).unwrap(), Asset::new(300, "COIN"));
        assert_eq!(s.underlying_symbol(), &Symbol::new("USD"));
    }

    #[test]
    fn expires_at_expiration() {
        let s = strike(true);
        assert!(!s.is_expired(s.expiration - chrono::Duration::seconds(1)));
        assert!(s.is_expired(s.expiration));
    }
}
