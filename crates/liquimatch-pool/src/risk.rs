//! Margin Risk Checker.
//!
//! A loan or margin position is only opened if a liquidation several times
//! its size could still be absorbed by the pools. Both sides are stressed by
//! `check_multiplier`:
//!
//! ```text
//! debt_coin    = core needed to buy back  m * debt        (through pools)
//! backing_coin = core raised by selling   m * collateral  (+ m * position)
//!
//! pass iff  debt pool reserve       >= m * debt
//!       and borrowed + debt         <= debt pool reserve * max_credit_ratio
//!       and core:credit core reserve >= debt_coin
//!       and backing_coin            >= debt_coin
//! ```
//!
//! Quotes are fee-free and read-only.

use liquimatch_types::constants::PERCENT_100;
use liquimatch_types::{Asset, EngineConfig, LiquimatchError, Result, Symbol};

use crate::pools::PoolSet;

/// Pre-trade check for a credit loan of `debt` against `collateral`.
pub fn credit_check(pools: &PoolSet, config: &EngineConfig, debt: &Asset, collateral: &Asset) -> Result<()> {
    stress(pools, config, debt, &[collateral])
        .map_err(|reason| LiquimatchError::CreditCheckFailed { reason })
}

/// Pre-trade check for a margin position: `debt` traded into `position`,
/// secured by `collateral`.
pub fn margin_check(
    pools: &PoolSet,
    config: &EngineConfig,
    debt: &Asset,
    position: &Asset,
    collateral: &Asset,
) -> Result<()> {
    stress(pools, config, debt, &[collateral, position])
        .map_err(|reason| LiquimatchError::MarginCheckFailed { reason })
}

fn stress(pools: &PoolSet, config: &EngineConfig, debt: &Asset, backing: &[&Asset]) -> std::result::Result<(), String> {
    let m = config.credit.check_multiplier;
    let core = &config.core_symbol;
    let stressed_debt = debt.scale(m, 1).map_err(|e| e.to_string())?;

    // The debt asset's own market: its pool against core, or for core debt
    // the core:credit pool.
    let market_pair: &Symbol = if debt.symbol == *core {
        &config.credit_symbol
    } else {
        core
    };
    let market = pools
        .liquidity_pool(&debt.symbol, market_pair)
        .map_err(|_| format!("no {}:{market_pair} pool to liquidate into", debt.symbol))?;
    let depth = market.balance(&debt.symbol);
    if depth.amount < stressed_debt.amount {
        return Err(format!(
            "{} pool holds {depth}, needs {stressed_debt}",
            debt.symbol
        ));
    }
    if let Ok(credit) = pools.credit_pool(&debt.symbol) {
        let cap = depth
            .scale(config.credit.market_max_credit_ratio, PERCENT_100)
            .map_err(|e| e.to_string())?;
        let outstanding = i128::from(credit.borrowed_balance) + i128::from(debt.amount);
        if outstanding > i128::from(cap.amount) {
            return Err(format!(
                "{} borrowing {outstanding} would exceed market cap {}",
                debt.symbol, cap.amount
            ));
        }
    }

    let debt_coin = pools
        .quote_acquire(&stressed_debt, core, core)
        .map_err(|e| format!("cannot price {stressed_debt} in {core}: {e}"))?;

    let backstop = pools
        .liquidity_pool(core, &config.credit_symbol)
        .map_err(|_| format!("no {core}:{} pool", config.credit_symbol))?
        .balance(core);
    if backstop.amount < debt_coin.amount {
        return Err(format!("credit backstop {backstop} below {debt_coin}"));
    }

    let mut backing_coin: i64 = 0;
    for asset in backing {
        if asset.amount == 0 {
            continue;
        }
        let stressed = asset.scale(m, 1).map_err(|e| e.to_string())?;
        let value = pools
            .quote_exchange(&stressed, core, core, config.precision)
            .map_err(|e| format!("cannot sell {stressed} for {core}: {e}"))?;
        backing_coin = backing_coin.saturating_add(value.amount);
    }
    if backing_coin < debt_coin.amount {
        return Err(format!(
            "backing worth {backing_coin} {core} cannot cover {debt_coin}"
        ));
    }
    tracing::trace!(debt = %debt, debt_coin = debt_coin.amount, backing_coin, "Risk check passed");
    Ok(())
}

#[cfg(test)]
mod tests {
    use liquimatch_types::{CreditConfig, MedianConfig};

    use super::*;
    use crate::credit_pool::CreditPool;
    use crate::liquidity_pool::LiquidityPool;

    fn pool(a: Asset, b: Asset) -> LiquidityPool {
        LiquidityPool::new(&a, &b, &MedianConfig::default()).unwrap()
    }

    fn market() -> PoolSet {
        let mut pools = PoolSet::new();
        pools.insert_liquidity_pool(pool(Asset::new(1_000_000_000, "COIN"), Asset::new(1_000_000_000, "USD")));
        pools.insert_liquidity_pool(pool(Asset::new(1_000_000_000, "COIN"), Asset::new(1_000_000_000, "CREDIT")));
        pools.insert_liquidity_pool(pool(Asset::new(1_000_000_000, "COIN"), Asset::new(1_000_000_000, "EUR")));
        let mut usd = CreditPool::new(&Symbol::new("USD"), &CreditConfig::default());
        usd.lend(&Asset::new(100_000_000, "USD")).unwrap();
        pools.insert_credit_pool(usd);
        pools
    }

    fn cfg() -> EngineConfig {
        EngineConfig::with_precision(1_000_000)
    }

    #[test]
    fn well_collateralized_loan_passes() {
        credit_check(&market(), &cfg(), &Asset::new(1_000_000, "USD"), &Asset::new(2_000_000, "COIN")).unwrap();
        credit_check(&market(), &cfg(), &Asset::new(1_000_000, "USD"), &Asset::new(2_000_000, "EUR")).unwrap();
    }

    #[test]
    fn thin_collateral_fails() {
        let err = credit_check(&market(), &cfg(), &Asset::new(1_000_000, "USD"), &Asset::new(1_000_000, "COIN"))
            .unwrap_err();
        assert!(matches!(err, LiquimatchError::CreditCheckFailed { .. }));
    }

    #[test]
    fn shallow_pool_fails() {
        // 10x the debt exceeds the pool's USD reserve.
        let err = credit_check(
            &market(),
            &cfg(),
            &Asset::new(200_000_000, "USD"),
            &Asset::new(900_000_000, "COIN"),
        )
        .unwrap_err();
        assert!(matches!(err, LiquimatchError::CreditCheckFailed { .. }));
    }

    #[test]
    fn market_cap_limits_borrowing() {
        let mut pools = market();
        pools
            .credit_pool_mut(&Symbol::new("USD"))
            .unwrap()
            .draw(&Asset::new(99_500_000, "USD"))
            .unwrap();
        // Borrowed 99.5M of a 500M cap is fine; pushing past the cap is not.
        credit_check(&pools, &cfg(), &Asset::new(1_000_000, "USD"), &Asset::new(3_000_000, "COIN")).unwrap();
        let mut big = CreditPool::new(&Symbol::new("USD"), &CreditConfig::default());
        big.lend(&Asset::new(600_000_000, "USD")).unwrap();
        big.draw(&Asset::new(499_500_000, "USD")).unwrap();
        pools.insert_credit_pool(big);
        let err = credit_check(&pools, &cfg(), &Asset::new(1_000_000, "USD"), &Asset::new(3_000_000, "COIN"))
            .unwrap_err();
        assert!(matches!(err, LiquimatchError::CreditCheckFailed { .. }));
    }

    #[test]
    fn missing_backstop_pool_fails() {
        let mut pools = PoolSet::new();
        pools.insert_liquidity_pool(pool(Asset::new(1_000_000_000, "COIN"), Asset::new(1_000_000_000, "USD")));
        let err = credit_check(&pools, &cfg(), &Asset::new(1_000, "USD"), &Asset::new(5_000, "COIN")).unwrap_err();
        assert!(matches!(err, LiquimatchError::CreditCheckFailed { .. }));
    }

    #[test]
    fn margin_position_counts_as_backing() {
        let debt = Asset::new(1_000_000, "USD");
        let collateral = Asset::new(300_000, "USD");
        let position = Asset::new(1_000_000, "EUR");
        let err = credit_check(&market(), &cfg(), &debt, &collateral).unwrap_err();
        assert!(matches!(err, LiquimatchError::CreditCheckFailed { .. }));
        margin_check(&market(), &cfg(), &debt, &position, &collateral).unwrap();
    }
}
