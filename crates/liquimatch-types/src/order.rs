//! Order records: limit orders, margin orders, call orders and
//! force-settlement requests.
//!
//! ## Price conventions
//!
//! ```text
//! LimitOrder.sell_price     = for_sale_symbol / receive_symbol
//! MarginOrder.sell_price    = sold_symbol / bought_symbol   (flips when liquidating)
//! CallOrder.collateralization() = collateral / debt
//! ```
//!
//! A higher `sell_price` is a more generous offer; book indices keep the
//! highest first.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::constants::COLLATERAL_RATIO_DENOM;
use crate::math::{mul_div_ceil, widen};
use crate::{AccountName, Asset, OrderId, Price, Result, Symbol};

// ---------------------------------------------------------------------------
// LimitOrder
// ---------------------------------------------------------------------------

/// A resting offer to sell `for_sale` units at `sell_price` or better.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LimitOrder {
    pub id: OrderId,
    /// Book insertion sequence; breaks ties between equal prices.
    pub seq: u64,
    pub sell_price: Price,
    pub for_sale: i64,
    pub expiration: DateTime<Utc>,
    pub interface: Option<AccountName>,
    pub created: DateTime<Utc>,
}

impl LimitOrder {
    #[must_use]
    pub fn seller(&self) -> &AccountName {
        &self.id.owner
    }

    #[must_use]
    pub fn amount_for_sale(&self) -> Asset {
        self.sell_price.base.with_amount(self.for_sale)
    }

    /// What the remaining balance buys at the order's own price, rounded down.
    pub fn amount_to_receive(&self) -> Result<Asset> {
        self.sell_price.mul(&self.amount_for_sale())
    }

    #[must_use]
    pub fn sell_symbol(&self) -> &Symbol {
        &self.sell_price.base.symbol
    }

    #[must_use]
    pub fn receive_symbol(&self) -> &Symbol {
        &self.sell_price.quote.symbol
    }
}

// ---------------------------------------------------------------------------
// MarginOrder
// ---------------------------------------------------------------------------

/// A leveraged position: `debt` borrowed from a credit pool, traded into
/// `position`, secured by `collateral`.
///
/// While open, the order sells `debt_balance` for the position asset. Once
/// `liquidating`, it sells `position_balance` back for the debt asset.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MarginOrder {
    pub id: OrderId,
    pub seq: u64,
    pub sell_price: Price,
    pub collateral: Asset,
    /// Total owed to the credit pool, including accrued interest.
    pub debt: Asset,
    /// Unspent borrowed funds plus proceeds of liquidation sales.
    pub debt_balance: Asset,
    pub position_balance: Asset,
    pub interest: Asset,
    pub stop_loss_price: Option<Price>,
    pub take_profit_price: Option<Price>,
    pub limit_stop_loss_price: Option<Price>,
    pub limit_take_profit_price: Option<Price>,
    /// `(equity - debt) * PERCENT_100 / debt`.
    pub collateralization: i64,
    /// Equity in debt terms minus debt.
    pub unrealized_value: Asset,
    pub liquidating: bool,
    pub last_interest_rate: i64,
    pub last_interest_time: DateTime<Utc>,
    pub expiration: DateTime<Utc>,
    pub interface: Option<AccountName>,
    pub created: DateTime<Utc>,
}

impl MarginOrder {
    #[must_use]
    pub fn owner(&self) -> &AccountName {
        &self.id.owner
    }

    #[must_use]
    pub fn debt_symbol(&self) -> &Symbol {
        &self.debt.symbol
    }

    #[must_use]
    pub fn position_symbol(&self) -> &Symbol {
        &self.position_balance.symbol
    }

    #[must_use]
    pub fn collateral_symbol(&self) -> &Symbol {
        &self.collateral.symbol
    }

    /// The balance currently offered on the book.
    #[must_use]
    pub fn amount_for_sale(&self) -> Asset {
        if self.liquidating {
            self.position_balance.clone()
        } else {
            self.debt_balance.clone()
        }
    }

    pub fn amount_to_receive(&self) -> Result<Asset> {
        self.sell_price.mul(&self.amount_for_sale())
    }

    /// Whether the order has nothing left to trade in its current direction.
    #[must_use]
    pub fn filled(&self) -> bool {
        self.amount_for_sale().amount == 0
    }
}

// ---------------------------------------------------------------------------
// CallOrder
// ---------------------------------------------------------------------------

/// A collateralized debt position in a synthetic asset.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CallOrder {
    pub borrower: AccountName,
    pub debt: Asset,
    pub collateral: Asset,
    /// Collateral ratio a margin call restores the position to, instead of
    /// closing it outright (`COLLATERAL_RATIO_DENOM` scale).
    pub target_collateral_ratio: Option<u16>,
    pub interface: Option<AccountName>,
    pub created: DateTime<Utc>,
}

impl CallOrder {
    #[must_use]
    pub fn debt_symbol(&self) -> &Symbol {
        &self.debt.symbol
    }

    #[must_use]
    pub fn collateral_symbol(&self) -> &Symbol {
        &self.collateral.symbol
    }

    /// `collateral / debt`; lower is riskier.
    #[must_use]
    pub fn collateralization(&self) -> Price {
        Price::new(self.collateral.clone(), self.debt.clone())
    }

    /// How much debt a margin call may buy back at `match_price`.
    ///
    /// Without a target ratio the whole debt is callable. With one, only
    /// enough debt is covered to lift the position back above
    /// `max(target, mcr)` at the feed price; any case the closed form cannot
    /// resolve (negative denominator, overflow) falls back to the whole debt.
    pub fn max_debt_to_cover(
        &self,
        match_price: &Price,
        feed_price: &Price,
        maintenance_collateral_ratio: u16,
        maintenance_collateralization: &Price,
    ) -> Result<i64> {
        if self.collateralization() > *maintenance_collateralization {
            return Ok(0);
        }
        let Some(target) = self.target_collateral_ratio else {
            return Ok(self.debt.amount);
        };
        let tcr = u128::from(target.max(maintenance_collateral_ratio));
        let denom = u128::from(COLLATERAL_RATIO_DENOM);

        let feed = feed_price.oriented(self.collateral_symbol())?;
        let matched = match_price.oriented(self.collateral_symbol())?;
        let (fp_coll, fp_debt) = (widen(feed.base.amount)?, widen(feed.quote.amount)?);
        let (mp_coll, mp_debt) = (widen(matched.base.amount)?, widen(matched.quote.amount)?);
        let debt = widen(self.debt.amount)?;
        let collateral = widen(self.collateral.amount)?;

        let closed_form = || -> Option<u128> {
            let lhs = fp_coll.checked_mul(mp_debt)?.checked_mul(debt)?.checked_mul(tcr)?;
            let rhs = fp_debt
                .checked_mul(mp_debt)?
                .checked_mul(collateral)?
                .checked_mul(denom)?;
            let numerator = lhs.checked_sub(rhs)?;
            let d_lhs = fp_coll.checked_mul(mp_debt)?.checked_mul(tcr)?;
            let d_rhs = fp_debt.checked_mul(mp_coll)?.checked_mul(denom)?;
            let denominator = d_lhs.checked_sub(d_rhs).filter(|d| *d > 0)?;
            Some(numerator / denominator + 1)
        };

        let Some(to_cover) = closed_form() else {
            return Ok(self.debt.amount);
        };
        if to_cover >= debt {
            return Ok(self.debt.amount);
        }
        // Collateral paid for `to_cover`, rounded in favour of the buyer.
        let to_pay = mul_div_ceil(to_cover, mp_coll, mp_debt)?;
        if to_pay >= collateral {
            return Ok(self.debt.amount);
        }
        // Remaining position must clear the target at the feed price:
        // (collateral - to_pay) * fp_debt * DENOM >= (debt - to_cover) * fp_coll * tcr
        let lhs = (collateral - to_pay)
            .checked_mul(fp_debt)
            .and_then(|v| v.checked_mul(denom));
        let rhs = (debt - to_cover)
            .checked_mul(fp_coll)
            .and_then(|v| v.checked_mul(tcr));
        match (lhs, rhs) {
            (Some(l), Some(r)) if l >= r => Ok(to_cover as i64),
            _ => Ok(self.debt.amount),
        }
    }
}

// ---------------------------------------------------------------------------
// ForceSettlement
// ---------------------------------------------------------------------------

/// A holder's request to redeem a synthetic asset for collateral after a
/// delay.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ForceSettlement {
    pub id: OrderId,
    pub balance: Asset,
    pub settlement_date: DateTime<Utc>,
    pub interface: Option<AccountName>,
    pub created: DateTime<Utc>,
}

impl ForceSettlement {
    #[must_use]
    pub fn owner(&self) -> &AccountName {
        &self.id.owner
    }

    #[must_use]
    pub fn settlement_symbol(&self) -> &Symbol {
        &self.balance.symbol
    }
}

#[cfg(any(test, feature = "test-helpers"))]
impl LimitOrder {
    /// A limit order selling `for_sale` of `sell` at `sell_amount:receive_amount`.
    #[must_use]
    pub fn dummy(owner: &str, name: &str, sell: Asset, receive: Asset, for_sale: i64) -> Self {
        let now = DateTime::<Utc>::UNIX_EPOCH;
        Self {
            id: OrderId::new(&AccountName::new(owner), name),
            seq: 0,
            sell_price: Price::new(sell, receive),
            for_sale,
            expiration: now + chrono::Duration::days(365),
            interface: None,
            created: now,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn call(debt: i64, collateral: i64, tcr: Option<u16>) -> CallOrder {
        CallOrder {
            borrower: AccountName::new("bob"),
            debt: Asset::new(debt, "USD"),
            collateral: Asset::new(collateral, "COIN"),
            target_collateral_ratio: tcr,
            interface: None,
            created: DateTime::<Utc>::UNIX_EPOCH,
        }
    }

    fn feed() -> Price {
        // 1 USD = 1 COIN
        Price::new(Asset::new(1, "USD"), Asset::new(1, "COIN"))
    }

    fn mc() -> Price {
        Price::new(Asset::new(7, "COIN"), Asset::new(4, "USD"))
    }

    #[test]
    fn limit_order_amounts() {
        let order = LimitOrder::dummy(
            "alice",
            "o1",
            Asset::new(1, "COIN"),
            Asset::new(2, "USD"),
            10,
        );
        assert_eq!(order.amount_for_sale(), Asset::new(10, "COIN"));
        assert_eq!(order.amount_to_receive().unwrap(), Asset::new(20, "USD"));
        assert_eq!(order.seller().as_str(), "alice");
    }

    #[test]
    fn healthy_call_covers_nothing() {
        let c = call(100, 200, None);
        let to_cover = c
            .max_debt_to_cover(&feed().scale_ratio(1000, 1500).unwrap(), &feed(), 1750, &mc())
            .unwrap();
        assert_eq!(to_cover, 0);
    }

    #[test]
    fn call_without_target_covers_everything() {
        let c = call(100, 150, None);
        let to_cover = c
            .max_debt_to_cover(&feed(), &feed(), 1750, &mc())
            .unwrap();
        assert_eq!(to_cover, 100);
    }

    #[test]
    fn target_ratio_covers_part_of_debt() {
        let c = call(1_000, 1_600, Some(2_000));
        let to_cover = c
            .max_debt_to_cover(&feed(), &feed(), 1750, &mc())
            .unwrap();
        assert!(to_cover > 0 && to_cover < 1_000, "got {to_cover}");
        // Remaining position clears 2.0x at the feed.
        let remaining_coll = 1_600 - to_cover;
        let remaining_debt = 1_000 - to_cover;
        assert!(remaining_coll * 1_000 >= remaining_debt * 2_000);
    }

    #[test]
    fn margin_order_side_flips_when_liquidating() {
        let now = DateTime::<Utc>::UNIX_EPOCH;
        let mut m = MarginOrder {
            id: OrderId::new(&AccountName::new("alice"), "m1"),
            seq: 0,
            sell_price: Price::new(Asset::new(1, "USD"), Asset::new(1, "COIN")),
            collateral: Asset::new(50, "USD"),
            debt: Asset::new(100, "USD"),
            debt_balance: Asset::new(100, "USD"),
            position_balance: Asset::new(0, "COIN"),
            interest: Asset::new(0, "USD"),
            stop_loss_price: None,
            take_profit_price: None,
            limit_stop_loss_price: None,
            limit_take_profit_price: None,
            collateralization: 0,
            unrealized_value: Asset::new(0, "USD"),
            liquidating: false,
            last_interest_rate: 0,
            last_interest_time: now,
            expiration: now,
            interface: None,
            created: now,
        };
        assert_eq!(m.amount_for_sale().symbol.as_str(), "USD");
        m.liquidating = true;
        m.position_balance = Asset::new(5, "COIN");
        assert_eq!(m.amount_for_sale(), Asset::new(5, "COIN"));
    }
}
