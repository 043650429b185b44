//! Trading-fee splitting.
//!
//! Fees are charged on the asset a trader receives. The total is
//! `amount * trading_fee_percent / PERCENT_100`, then divided between the
//! network (burned), interface accounts and, for pool swaps, the pool itself.
//!
//! ```text
//! pool swap : total = network + interface + pool      (residual -> pool)
//! book fill : total = network + maker_if + taker_if   (residual -> network)
//! ```
//!
//! A share whose interface account is absent is folded into the network share.

use liquimatch_types::constants::PERCENT_100;
use liquimatch_types::math::{mul_div, narrow, widen};
use liquimatch_types::{FeeConfig, Result};
use serde::{Deserialize, Serialize};

/// One fee, divided between its recipients. All parts are in the asset the
/// fee was charged in.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeeSplit {
    pub total: i64,
    pub network: i64,
    pub maker_interface: i64,
    pub taker_interface: i64,
    pub pool: i64,
}

fn percent_of(amount: i64, percent: i64) -> Result<i64> {
    narrow(mul_div(
        widen(amount)?,
        widen(percent)?,
        widen(PERCENT_100)?,
    )?)
}

impl FeeSplit {
    /// Total trading fee on `amount`, rounded down.
    pub fn trading_fee(amount: i64, fees: &FeeConfig) -> Result<i64> {
        percent_of(amount, fees.trading_fee_percent)
    }

    /// Split `total` for a pool swap. The caller's interface, if any, takes
    /// the taker share; the pool keeps what the other shares leave behind.
    pub fn pool_swap(total: i64, fees: &FeeConfig, has_interface: bool) -> Result<Self> {
        let (network_percent, interface) = if has_interface {
            (
                fees.network_percent,
                percent_of(total, fees.taker_interface_percent)?,
            )
        } else {
            (fees.network_percent + fees.taker_interface_percent, 0)
        };
        let network = percent_of(total, network_percent)?;
        Ok(Self {
            total,
            network,
            maker_interface: 0,
            taker_interface: interface,
            pool: total - network - interface,
        })
    }

    /// Split the fee on a book fill of `receives`. The network absorbs
    /// truncation and any share whose interface is missing.
    pub fn book_fill(
        receives: i64,
        fees: &FeeConfig,
        maker_interface: bool,
        taker_interface: bool,
    ) -> Result<Self> {
        let total = Self::trading_fee(receives, fees)?;
        let maker = if maker_interface {
            percent_of(total, fees.maker_interface_percent)?
        } else {
            0
        };
        let taker = if taker_interface {
            percent_of(total, fees.taker_interface_percent)?
        } else {
            0
        };
        Ok(Self {
            total,
            network: total - maker - taker,
            maker_interface: maker,
            taker_interface: taker,
            pool: 0,
        })
    }

    #[must_use]
    pub fn parts_sum(&self) -> i64 {
        self.network + self.maker_interface + self.taker_interface + self.pool
    }
}

#[cfg(test)]
mod tests {
    use rand::{Rng, SeedableRng, rngs::StdRng};

    use super::*;

    #[test]
    fn pool_fee_with_interface() {
        let f = FeeSplit::pool_swap(9, &FeeConfig::default(), true).unwrap();
        assert_eq!((f.network, f.taker_interface, f.pool), (4, 2, 3));
    }

    #[test]
    fn pool_fee_without_interface_goes_to_network() {
        let f = FeeSplit::pool_swap(9, &FeeConfig::default(), false).unwrap();
        assert_eq!((f.network, f.taker_interface, f.pool), (6, 0, 3));
    }

    #[test]
    fn book_fee_residual_to_network() {
        let f = FeeSplit::book_fill(9_999, &FeeConfig::default(), true, true).unwrap();
        assert_eq!(f.total, 9);
        assert_eq!((f.maker_interface, f.taker_interface), (2, 2));
        assert_eq!(f.network, 5);
        assert_eq!(f.pool, 0);
    }

    #[test]
    fn shares_always_sum_to_total() {
        let cfg = FeeConfig::default();
        let mut rng = StdRng::seed_from_u64(42);
        for _ in 0..2_000 {
            let amount: i64 = rng.gen_range(0..1_000_000_000);
            let total = FeeSplit::trading_fee(amount, &cfg).unwrap();
            for iface in [true, false] {
                let p = FeeSplit::pool_swap(total, &cfg, iface).unwrap();
                assert_eq!(p.parts_sum(), total);
                assert!(p.pool >= 0);
                let b = FeeSplit::book_fill(amount, &cfg, iface, !iface).unwrap();
                assert_eq!(b.parts_sum(), b.total);
            }
        }
    }
}
