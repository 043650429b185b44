//! Price feeds and per-synthetic-asset settlement state.
//!
//! Feed prices are quoted `debt / collateral`: base is the synthetic asset,
//! quote its backing collateral.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::constants::{COLLATERAL_RATIO_DENOM, PERCENT_100};
use crate::{Asset, LiquimatchError, Price, Result, Symbol};

/// Median of externally published feeds for one synthetic asset.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PriceFeed {
    /// `debt / collateral`.
    pub settlement_price: Price,
    pub maintenance_collateral_ratio: u16,
    pub max_short_squeeze_ratio: u16,
}

impl PriceFeed {
    #[must_use]
    pub fn is_null(&self) -> bool {
        self.settlement_price.is_null()
    }

    /// Worst price a margin call may be forced to pay, `debt / collateral`.
    ///
    /// Scales the debt leg by `DENOM / mssr`, so a call pays at most `mssr`
    /// times the feed's collateral per unit of debt.
    pub fn max_short_squeeze_price(&self) -> Result<Price> {
        self.settlement_price
            .scale_ratio(COLLATERAL_RATIO_DENOM, u32::from(self.max_short_squeeze_ratio))
    }

    /// Collateralization at which a call becomes callable, `collateral / debt`.
    pub fn maintenance_collateralization(&self) -> Result<Price> {
        self.settlement_price
            .invert()
            .scale_ratio(u32::from(self.maintenance_collateral_ratio), COLLATERAL_RATIO_DENOM)
    }
}

/// Settlement state of a synthetic (bitasset) asset.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BitassetData {
    pub symbol: Symbol,
    /// Collateral asset backing every call order of this synthetic.
    pub backing: Symbol,
    pub feed: Option<PriceFeed>,
    /// Fixed once by global settlement, `debt / collateral`.
    pub settlement_price: Option<Price>,
    /// Collateral gathered at global settlement, redeemable at
    /// `settlement_price`.
    pub settlement_fund: i64,
    /// Debt force-settled during the current sweep period.
    pub force_settled_volume: i64,
    pub feed_updated: Option<DateTime<Utc>>,
    /// Seconds a published feed stays usable.
    pub feed_lifetime_secs: i64,
}

impl BitassetData {
    #[must_use]
    pub fn new(symbol: &Symbol, backing: &Symbol, feed_lifetime_secs: i64) -> Self {
        Self {
            symbol: symbol.clone(),
            backing: backing.clone(),
            feed: None,
            settlement_price: None,
            settlement_fund: 0,
            force_settled_volume: 0,
            feed_updated: None,
            feed_lifetime_secs,
        }
    }

    #[must_use]
    pub fn has_settlement(&self) -> bool {
        self.settlement_price.is_some()
    }

    /// When the current feed stops being usable.
    #[must_use]
    pub fn feed_expiration(&self) -> Option<DateTime<Utc>> {
        self.feed_updated
            .map(|published| published + Duration::seconds(self.feed_lifetime_secs))
    }

    #[must_use]
    pub fn feed_is_expired(&self, now: DateTime<Utc>) -> bool {
        self.feed_expiration().is_some_and(|expires| expires <= now)
    }

    /// The current feed if it carries a price and has not expired at `now`.
    #[must_use]
    pub fn live_feed(&self, now: DateTime<Utc>) -> Option<&PriceFeed> {
        if self.feed_is_expired(now) {
            return None;
        }
        self.feed.as_ref().filter(|f| !f.is_null())
    }

    pub fn require_feed(&self, now: DateTime<Utc>) -> Result<&PriceFeed> {
        self.live_feed(now)
            .ok_or_else(|| LiquimatchError::NoPriceFeed(self.symbol.clone()))
    }

    /// Per-sweep force-settlement cap: `supply * max_volume_percent / 100%`.
    pub fn max_force_settlement_volume(&self, total_supply: i64, max_volume_percent: i64) -> Result<i64> {
        Ok(Asset::new(total_supply, self.symbol.clone())
            .scale(max_volume_percent, PERCENT_100)?
            .amount)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn feed() -> PriceFeed {
        PriceFeed {
            settlement_price: Price::new(Asset::new(1, "USD"), Asset::new(2, "COIN")),
            maintenance_collateral_ratio: 1_750,
            max_short_squeeze_ratio: 1_500,
        }
    }

    #[test]
    fn squeeze_price_pays_more_collateral() {
        let f = feed();
        let squeeze = f.max_short_squeeze_price().unwrap();
        // 1 USD : 3 COIN
        assert_eq!(squeeze, Price::new(Asset::new(1, "USD"), Asset::new(3, "COIN")));
        assert!(squeeze < f.settlement_price);
    }

    #[test]
    fn maintenance_collateralization_scales_collateral() {
        let mc = feed().maintenance_collateralization().unwrap();
        // 2 COIN per USD * 1.75 = 3.5 COIN per USD
        assert_eq!(mc, Price::new(Asset::new(7, "COIN"), Asset::new(2, "USD")));
    }

    #[test]
    fn null_feed_is_not_live() {
        let now = DateTime::<Utc>::UNIX_EPOCH;
        let mut data = BitassetData::new(&Symbol::new("USD"), &Symbol::new("COIN"), 86_400);
        assert!(data.require_feed(now).is_err());
        let mut f = feed();
        f.settlement_price.base.amount = 0;
        data.feed = Some(f);
        data.feed_updated = Some(now);
        assert!(data.live_feed(now).is_none());
    }

    #[test]
    fn feed_expires_after_lifetime() {
        let t0 = DateTime::<Utc>::UNIX_EPOCH;
        let mut data = BitassetData::new(&Symbol::new("USD"), &Symbol::new("COIN"), 3_600);
        data.feed = Some(feed());
        data.feed_updated = Some(t0);
        assert!(data.live_feed(t0 + Duration::seconds(3_599)).is_some());
        assert!(data.feed_is_expired(t0 + Duration::seconds(3_600)));
        assert!(data.live_feed(t0 + Duration::seconds(3_600)).is_none());
        assert!(matches!(
            data.require_feed(t0 + Duration::seconds(7_200)),
            Err(LiquimatchError::NoPriceFeed(_))
        ));
    }

    #[test]
    fn force_settlement_volume_cap() {
        let data = BitassetData::new(&Symbol::new("USD"), &Symbol::new("COIN"), 86_400);
        assert_eq!(data.max_force_settlement_volume(10_000, 2_000).unwrap(), 2_000);
    }
}
