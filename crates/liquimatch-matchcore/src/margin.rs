//! Margin orders: leveraged positions funded by a credit pool.
//!
//! ```text
//! open      : collateral locked, debt drawn, order sells debt for position
//! edit      : add collateral, replace exit triggers
//! close     : position sold for debt, shortfall taken from collateral,
//!             remaining deficit written off, profit returned as collateral
//! liquidate : position offered at any price, remainder closed via pools
//! ```
//!
//! The borrowed debt never leaves the engine: `debt_balance` and
//! `position_balance` stay pending until the order closes and repays the
//! credit pool.

use chrono::{DateTime, Utc};
use liquimatch_ledger::TxContext;
use liquimatch_pool::{PoolSet, final_output, interest_due, margin_check};
use liquimatch_types::constants::PERCENT_100;
use liquimatch_types::{
    AccountName, Asset, EngineConfig, LiquimatchError, MarginOrder, OrderId, Price, Result, Symbol, VirtualOp,
};
use serde::{Deserialize, Serialize};

use crate::market::MarketState;
use crate::matcher::{BookOrder, apply_order};

/// Exit prices of a margin position, each `debt / position` (what one unit
/// of the position is worth in debt).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MarginTriggers {
    /// Market exit once the position is worth this or less.
    pub stop_loss: Option<Price>,
    /// Market exit once the position is worth this or more.
    pub take_profit: Option<Price>,
    /// Like `stop_loss`, but the exit is a limit sale at this price.
    pub limit_stop_loss: Option<Price>,
    /// Like `take_profit`, but the exit is a limit sale at this price.
    pub limit_take_profit: Option<Price>,
}

/// Which exit a price crossed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MarginExit {
    /// Sell the whole position at any price.
    Market,
    /// Sell the position no cheaper than this `debt / position` price.
    Limit(Price),
}

impl MarginTriggers {
    fn validate(&self, debt: &Symbol, position: &Symbol) -> Result<()> {
        let all = [
            &self.stop_loss,
            &self.take_profit,
            &self.limit_stop_loss,
            &self.limit_take_profit,
        ];
        for price in all.into_iter().flatten() {
            if price.is_null() || price.base.symbol != *debt || price.quote.symbol != *position {
                return Err(LiquimatchError::InvalidPrice {
                    reason: format!("exit price {price} must be a non-null {debt}/{position} price"),
                });
            }
        }
        for (stop, take) in [
            (&self.stop_loss, &self.take_profit),
            (&self.limit_stop_loss, &self.limit_take_profit),
        ] {
            if let (Some(stop), Some(take)) = (stop, take) {
                if stop >= take {
                    return Err(LiquimatchError::InvalidPrice {
                        reason: format!("stop loss {stop} is not below take profit {take}"),
                    });
                }
            }
        }
        Ok(())
    }

    /// The exit crossed by a position now worth `price` (`debt / position`).
    /// Market exits win over limit exits.
    #[must_use]
    pub fn triggered(&self, price: &Price) -> Option<MarginExit> {
        let low = |p: &Option<Price>| p.as_ref().is_some_and(|p| price <= p);
        let high = |p: &Option<Price>| p.as_ref().is_some_and(|p| price >= p);
        if low(&self.stop_loss) || high(&self.take_profit) {
            return Some(MarginExit::Market);
        }
        if low(&self.limit_stop_loss) {
            return self.limit_stop_loss.clone().map(MarginExit::Limit);
        }
        if high(&self.limit_take_profit) {
            return self.limit_take_profit.clone().map(MarginExit::Limit);
        }
        None
    }

    /// The triggers stored on `order`.
    #[must_use]
    pub fn of(order: &MarginOrder) -> Self {
        Self {
            stop_loss: order.stop_loss_price.clone(),
            take_profit: order.take_profit_price.clone(),
            limit_stop_loss: order.limit_stop_loss_price.clone(),
            limit_take_profit: order.limit_take_profit_price.clone(),
        }
    }

    fn apply(self, order: &mut MarginOrder) {
        order.stop_loss_price = self.stop_loss;
        order.take_profit_price = self.take_profit;
        order.limit_stop_loss_price = self.limit_stop_loss;
        order.limit_take_profit_price = self.limit_take_profit;
    }
}

/// Parameters of a new margin order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MarginOrderRequest {
    pub owner: AccountName,
    pub name: String,
    pub collateral: Asset,
    /// Amount borrowed from the debt asset's credit pool.
    pub debt: Asset,
    /// Least position the whole debt must buy.
    pub min_position: Asset,
    pub triggers: MarginTriggers,
    pub expiration: DateTime<Utc>,
    pub interface: Option<AccountName>,
}

// =====================================================================
// Valuation
// =====================================================================

/// Collateralization `(equity - debt) * PERCENT_100 / debt` and unrealized
/// value `debt_balance + position - debt`, all valued in the debt asset at
/// median prices.
pub fn margin_collateralization(pools: &PoolSet, config: &EngineConfig, order: &MarginOrder) -> Result<(i64, Asset)> {
    let core = &config.core_symbol;
    let debt_symbol = order.debt_symbol();
    let position_value = pools.median_value(&order.position_balance, debt_symbol, core)?;
    let collateral_value = pools.median_value(&order.collateral, debt_symbol, core)?;
    let unrealized = order
        .debt_balance
        .checked_add(&position_value)?
        .checked_sub(&order.debt)?;
    if order.debt.amount == 0 {
        return Ok((i64::MAX, unrealized));
    }
    let surplus = i128::from(unrealized.amount) + i128::from(collateral_value.amount);
    let ratio = surplus * i128::from(PERCENT_100) / i128::from(order.debt.amount);
    let ratio = i64::try_from(ratio).map_err(|_| LiquimatchError::ArithmeticOverflow { op: "collateralization" })?;
    Ok((ratio, unrealized))
}

/// Recompute and store the order's collateralization. Returns it.
pub fn refresh_margin_valuation(state: &mut MarketState, config: &EngineConfig, id: &OrderId) -> Result<i64> {
    let (ratio, unrealized) = margin_collateralization(&state.pools, config, state.book.margin(id)?)?;
    let order = state.book.margin_mut(id)?;
    order.collateralization = ratio;
    order.unrealized_value = unrealized;
    Ok(ratio)
}

/// Value of one unit of the position in the debt asset at median prices,
/// as a `debt / position` price.
pub fn position_price(pools: &PoolSet, config: &EngineConfig, order: &MarginOrder) -> Result<Price> {
    pools.median_price(
        order.debt_symbol(),
        order.position_symbol(),
        &config.core_symbol,
        config.precision,
    )
}

// =====================================================================
// Operations
// =====================================================================

/// Open a margin position and send its debt into the market.
pub fn open_margin_order(state: &mut MarketState, ctx: &mut TxContext<'_>, req: MarginOrderRequest) -> Result<OrderId> {
    let config = ctx.config;
    liquimatch_types::ensure_positive(&req.collateral, "margin collateral")?;
    liquimatch_types::ensure_positive(&req.debt, "margin debt")?;
    liquimatch_types::ensure_positive(&req.min_position, "margin position")?;
    if req.debt.symbol == req.min_position.symbol {
        return Err(LiquimatchError::InvalidOrder {
            reason: format!("margin position cannot be held in its own debt asset {}", req.debt.symbol),
        });
    }
    for symbol in [&req.collateral.symbol, &req.debt.symbol, &req.min_position.symbol] {
        ctx.registry.get(symbol)?;
    }
    if req.expiration <= ctx.now {
        return Err(LiquimatchError::InvalidOrder {
            reason: format!("expiration {} is not after block time {}", req.expiration, ctx.now),
        });
    }
    req.triggers.validate(&req.debt.symbol, &req.min_position.symbol)?;
    let id = OrderId::new(&req.owner, &req.name);
    if state.book.margin(&id).is_ok() {
        return Err(LiquimatchError::DuplicateOrder(id));
    }
    if state.pools.has_defaulted(&req.owner) {
        return Err(LiquimatchError::MarginCheckFailed {
            reason: format!("{} has unpaid credit defaults", req.owner),
        });
    }
    let collateral_value = state
        .pools
        .median_value(&req.collateral, &req.debt.symbol, &config.core_symbol)?;
    let required = req.debt.scale(config.credit.margin_open_ratio, PERCENT_100)?;
    if collateral_value.amount < required.amount {
        return Err(LiquimatchError::InsufficientCollateral {
            reason: format!(
                "{} is worth {collateral_value}, margin of {} needs {required}",
                req.collateral, req.debt
            ),
        });
    }
    margin_check(&state.pools, config, &req.debt, &req.min_position, &req.collateral)?;

    let rate = state
        .pools
        .credit_pool(&req.debt.symbol)?
        .interest_rate(&config.credit, config.precision)?;
    ctx.ledger.lock(&req.owner, &req.collateral)?;
    state.pools.credit_pool_mut(&req.debt.symbol)?.draw(&req.debt)?;

    let mut order = MarginOrder {
        id: id.clone(),
        seq: 0,
        sell_price: Price::new(req.debt.clone(), req.min_position.clone()),
        collateral: req.collateral.clone(),
        debt: req.debt.clone(),
        debt_balance: req.debt.clone(),
        position_balance: Asset::zero(&req.min_position.symbol),
        interest: Asset::zero(&req.debt.symbol),
        stop_loss_price: None,
        take_profit_price: None,
        limit_stop_loss_price: None,
        limit_take_profit_price: None,
        collateralization: 0,
        unrealized_value: Asset::zero(&req.debt.symbol),
        liquidating: false,
        last_interest_rate: rate,
        last_interest_time: ctx.now,
        expiration: req.expiration,
        interface: req.interface,
        created: ctx.now,
    };
    req.triggers.apply(&mut order);
    let (ratio, unrealized) = margin_collateralization(&state.pools, config, &order)?;
    order.collateralization = ratio;
    order.unrealized_value = unrealized;

    tracing::info!(
        order = %id,
        debt = %req.debt,
        collateral = %req.collateral,
        min_position = %req.min_position,
        rate,
        "Margin order opened"
    );
    ctx.emit(VirtualOp::MarginOpened {
        order: id.clone(),
        debt: req.debt,
        collateral: req.collateral,
    });
    state.book.insert_margin(order)?;
    apply_order(state, ctx, &BookOrder::Margin(id.clone()))?;
    Ok(id)
}

/// Add collateral and/or replace the exit triggers of an open position.
pub fn edit_margin_order(
    state: &mut MarketState,
    ctx: &mut TxContext<'_>,
    id: &OrderId,
    add_collateral: Option<&Asset>,
    triggers: Option<MarginTriggers>,
) -> Result<()> {
    let order = state.book.margin(id)?;
    if let Some(triggers) = &triggers {
        triggers.validate(order.debt_symbol(), order.position_symbol())?;
    }
    if let Some(extra) = add_collateral {
        liquimatch_types::ensure_positive(extra, "added collateral")?;
        if extra.symbol != *order.collateral_symbol() {
            return Err(LiquimatchError::SymbolMismatch {
                expected: order.collateral_symbol().clone(),
                actual: extra.symbol.clone(),
            });
        }
        ctx.ledger.lock(&id.owner, extra)?;
        state.book.margin_mut(id)?.collateral.add_assign(extra)?;
    }
    if let Some(triggers) = triggers {
        triggers.apply(state.book.margin_mut(id)?);
    }
    refresh_margin_valuation(state, ctx.config, id)?;
    tracing::debug!(order = %id, collateral = %state.book.margin(id)?.collateral, "Margin order edited");
    Ok(())
}

/// Charge interest since the last accrual at the debt pool's current rate.
/// Returns the interest added.
pub fn accrue_margin(state: &mut MarketState, ctx: &TxContext<'_>, id: &OrderId) -> Result<Asset> {
    let config = ctx.config;
    let order = state.book.margin(id)?;
    let debt_symbol = order.debt_symbol().clone();
    let rate = state
        .pools
        .credit_pool(&debt_symbol)?
        .interest_rate(&config.credit, config.precision)?;
    let interest = order.debt.with_amount(interest_due(
        order.debt.amount,
        rate,
        order.last_interest_time,
        ctx.now,
        &config.credit,
    )?);
    if interest.amount == 0 {
        return Ok(interest);
    }
    state.pools.credit_pool_mut(&debt_symbol)?.accrue(&interest)?;
    let order = state.book.margin_mut(id)?;
    order.debt.add_assign(&interest)?;
    order.interest.add_assign(&interest)?;
    order.last_interest_rate = rate;
    order.last_interest_time = ctx.now;
    Ok(interest)
}

/// Exit a position on the owner's request. Without a limit the position is
/// closed at once through the pools; with one, it is offered for sale at no
/// less than `limit` (`debt / position`) and closes when sold.
pub fn close_margin_position(
    state: &mut MarketState,
    ctx: &mut TxContext<'_>,
    id: &OrderId,
    limit: Option<&Price>,
) -> Result<()> {
    let order = state.book.margin(id)?;
    let Some(limit) = limit else {
        return close_margin_order(state, ctx, id);
    };
    if order.liquidating {
        return Err(LiquimatchError::InvalidOrder {
            reason: format!("margin order {id} is already being closed"),
        });
    }
    if order.position_balance.amount == 0 {
        return close_margin_order(state, ctx, id);
    }
    let limit = limit.oriented(order.debt_symbol())?;
    if limit.is_null() || limit.quote.symbol != *order.position_symbol() {
        return Err(LiquimatchError::InvalidPrice {
            reason: format!("exit price {limit} is not a {}/{} price", order.debt_symbol(), order.position_symbol()),
        });
    }
    // Sell the whole position at `limit`: position per debt, position as base.
    let position = order.position_balance.clone();
    let sell_price = Price::new(position.clone(), limit.mul_round_up(&position)?);
    start_liquidating(state, id, sell_price)?;
    tracing::info!(order = %id, position = %position, limit = %limit, "Margin position offered for close");
    apply_order(state, ctx, &BookOrder::Margin(id.clone()))?;
    Ok(())
}

/// Force a position out: offer the whole position at any price, then close
/// whatever the book and pools did not take.
pub fn liquidate_margin_order(state: &mut MarketState, ctx: &mut TxContext<'_>, id: &OrderId) -> Result<()> {
    let order = state.book.margin(id)?;
    tracing::info!(
        order = %id,
        collateralization = order.collateralization,
        position = %order.position_balance,
        debt = %order.debt,
        "Margin order liquidated"
    );
    if order.position_balance.amount > 0 {
        let sell_price = Price::new(order.position_balance.clone(), Asset::new(1, order.debt_symbol().clone()));
        start_liquidating(state, id, sell_price)?;
        apply_order(state, ctx, &BookOrder::Margin(id.clone()))?;
    }
    if state.book.margin(id).is_ok() {
        close_margin_order(state, ctx, id)?;
    }
    Ok(())
}

fn start_liquidating(state: &mut MarketState, id: &OrderId, sell_price: Price) -> Result<()> {
    let order = state.book.margin_mut(id)?;
    let old_price = std::mem::replace(&mut order.sell_price, sell_price);
    order.liquidating = true;
    state.book.relist_margin(id, &old_price)
}

/// Settle a margin order: sell what is left of the position, repay the
/// credit pool and return the collateral.
pub fn close_margin_order(state: &mut MarketState, ctx: &mut TxContext<'_>, id: &OrderId) -> Result<()> {
    accrue_margin(state, ctx, id)?;
    let order = state.book.remove_margin(id)?;
    let debt_symbol = order.debt_symbol().clone();
    let owner = order.owner().clone();
    let iface = order.interface.as_ref();

    let mut available = order.debt_balance.clone();
    if order.position_balance.amount > 0 {
        let swaps = state
            .pools
            .swap_pending(ctx, &order.position_balance, &debt_symbol, iface)?;
        available.add_assign(&final_output(&swaps, &debt_symbol))?;
    }

    let mut collateral = order.collateral.clone();
    let shortfall = order.debt.amount - available.amount;
    if shortfall > 0 && collateral.amount > 0 {
        let wanted = Asset::new(shortfall, debt_symbol.clone());
        if collateral.symbol == debt_symbol {
            let taken = wanted.min(&collateral)?;
            collateral.sub_assign(&taken)?;
            available.add_assign(&taken)?;
        } else {
            let cost = state
                .pools
                .quote_acquire_cost(ctx, &wanted, &collateral.symbol, iface.is_some());
            match cost {
                Ok(cost) if cost.amount <= collateral.amount => {
                    state
                        .pools
                        .acquire_pending(ctx, &wanted, &collateral.symbol, iface)?;
                    collateral.sub_assign(&cost)?;
                    available.add_assign(&wanted)?;
                }
                _ => {
                    let swaps = state.pools.swap_pending(ctx, &collateral, &debt_symbol, iface)?;
                    available.add_assign(&final_output(&swaps, &debt_symbol))?;
                    collateral.amount = 0;
                }
            }
        }
    }

    let deficit = Asset::new((order.debt.amount - available.amount).max(0), debt_symbol.clone());
    state.pools.record_default(ctx, &owner, &deficit)?;
    available.add_assign(&deficit)?;

    let surplus = available.checked_sub(&order.debt)?;
    if surplus.amount > 0 {
        if surplus.symbol == collateral.symbol {
            collateral.add_assign(&surplus)?;
        } else {
            let swaps = state.pools.swap_pending(ctx, &surplus, &collateral.symbol, iface)?;
            collateral.add_assign(&final_output(&swaps, &collateral.symbol))?;
        }
    }

    let interest_paid = order.interest.min(&order.debt)?;
    let fee = PoolSet::interest_fee(&interest_paid, ctx.config.fees.interest_fee_percent)?;
    ctx.ledger.burn_pending(&fee)?;
    state
        .pools
        .credit_pool_mut(&debt_symbol)?
        .settle(&order.debt, &order.debt.checked_sub(&fee)?)?;
    ctx.ledger.release(&owner, &collateral)?;

    let debt_repaid = order.debt.checked_sub(&deficit)?;
    tracing::info!(
        order = %id,
        debt = %order.debt,
        interest_fee = %fee,
        collateral_returned = %collateral,
        default = %deficit,
        "Margin order closed"
    );
    ctx.emit(VirtualOp::MarginClosed {
        order: id.clone(),
        debt_repaid,
        collateral_returned: collateral,
        default: deficit,
    });
    Ok(())
}

#[cfg(test)]
mod tests {
    use liquimatch_ledger::{InMemoryLedger, MemoryOpLog};
    use liquimatch_types::{AssetRegistry, AssetType};

    use super::*;

    struct Fixture {
        config: EngineConfig,
        registry: AssetRegistry,
        ledger: InMemoryLedger,
        ops: MemoryOpLog,
        state: MarketState,
        now: DateTime<Utc>,
    }

    impl Fixture {
        fn new() -> Self {
            let mut registry = AssetRegistry::new();
            for s in ["COIN", "USD", "CREDIT"] {
                registry.register(&Symbol::new(s), AssetType::Currency);
            }
            let mut ledger = InMemoryLedger::new();
            for s in ["COIN", "USD", "CREDIT"] {
                ledger.fund("lp", Asset::new(100_000_000_000, s)).unwrap();
            }
            ledger.fund("bob", Asset::new(10_000_000, "COIN")).unwrap();
            let mut f = Self {
                config: EngineConfig::with_precision(1_000_000),
                registry,
                ledger,
                ops: MemoryOpLog::new(),
                state: MarketState::new(),
                now: DateTime::<Utc>::UNIX_EPOCH,
            };
            let lp = AccountName::new("lp");
            f.run(|s, ctx| {
                let pools = &mut s.pools;
                pools.create_liquidity_pool(ctx, &lp, &Asset::new(1_000_000_000, "COIN"), &Asset::new(1_000_000_000, "USD"))?;
                pools.create_liquidity_pool(ctx, &lp, &Asset::new(1_000_000_000, "COIN"), &Asset::new(1_000_000_000, "CREDIT"))?;
                pools.create_credit_pool(ctx, &Symbol::new("USD"))?;
                pools.credit_lend(ctx, &lp, &Asset::new(100_000_000, "USD"))?;
                Ok(())
            })
            .unwrap();
            f
        }

        fn run<T>(&mut self, f: impl FnOnce(&mut MarketState, &mut TxContext<'_>) -> Result<T>) -> Result<T> {
            let mut ctx = TxContext::new(&self.config, &self.registry, &mut self.ledger, &mut self.ops, self.now);
            f(&mut self.state, &mut ctx)
        }

        fn open(&mut self, collateral: i64, triggers: MarginTriggers) -> Result<OrderId> {
            let req = MarginOrderRequest {
                owner: AccountName::new("bob"),
                name: "long".into(),
                collateral: Asset::new(collateral, "COIN"),
                debt: Asset::new(1_000_000, "USD"),
                min_position: Asset::new(900_000, "COIN"),
                triggers,
                expiration: self.now + chrono::Duration::days(30),
                interface: None,
            };
            self.run(|s, ctx| open_margin_order(s, ctx, req))
        }

        fn usd_pool(&self) -> &liquimatch_pool::CreditPool {
            self.state.pools.credit_pool(&Symbol::new("USD")).unwrap()
        }
    }

    fn usd_per_coin(usd: i64, coin: i64) -> Price {
        Price::new(Asset::new(usd, "USD"), Asset::new(coin, "COIN"))
    }

    #[test]
    fn open_buys_position_from_pool() {
        let mut f = Fixture::new();
        let id = f.open(500_000, MarginTriggers::default()).unwrap();
        let order = f.state.book.margin(&id).unwrap();
        // 1_000_000 USD buys 1_000_000 COIN gross at precision 1e6; the
        // 0.1% fee leaves 999_000.
        assert_eq!(order.debt_balance.amount, 0);
        assert_eq!(order.position_balance, Asset::new(999_000, "COIN"));
        assert!(!f.state.book.is_margin_listed(&id));
        assert_eq!(f.usd_pool().borrowed_balance, 1_000_000);
        assert_eq!(f.ledger.balance("bob", "COIN"), 9_500_000);
        assert_eq!(f.ledger.balance("bob", "USD"), 0);
        assert_eq!(f.ops.by_name("margin_opened").count(), 1);
        f.ledger.verify_conservation().unwrap();
    }

    #[test]
    fn collateralization_counts_collateral_and_position() {
        let mut f = Fixture::new();
        let id = f.open(500_000, MarginTriggers::default()).unwrap();
        let order = f.state.book.margin(&id).unwrap();
        let (ratio, unrealized) = margin_collateralization(&f.state.pools, &f.config, order).unwrap();
        // equity 999_000 + 500_000 against 1_000_000 debt
        assert_eq!(ratio, 4_990);
        assert_eq!(unrealized, Asset::new(-1_000, "USD"));
    }

    #[test]
    fn open_requires_collateral_ratio() {
        let mut f = Fixture::new();
        // 20% of 1_000_000 USD is 200_000.
        let err = f.open(199_999, MarginTriggers::default()).unwrap_err();
        assert!(matches!(err, LiquimatchError::InsufficientCollateral { .. }));
        assert_eq!(f.ledger.balance("bob", "COIN"), 10_000_000);
        assert_eq!(f.usd_pool().borrowed_balance, 0);
        f.open(200_000, MarginTriggers::default()).unwrap();
    }

    #[test]
    fn triggers_validated_and_crossed() {
        let mut f = Fixture::new();
        let crossed = MarginTriggers {
            stop_loss: Some(usd_per_coin(11, 10)),
            take_profit: Some(usd_per_coin(10, 10)),
            ..MarginTriggers::default()
        };
        assert!(matches!(
            f.open(500_000, crossed).unwrap_err(),
            LiquimatchError::InvalidPrice { .. }
        ));

        let triggers = MarginTriggers {
            stop_loss: Some(usd_per_coin(8, 10)),
            limit_take_profit: Some(usd_per_coin(12, 10)),
            ..MarginTriggers::default()
        };
        assert_eq!(triggers.triggered(&usd_per_coin(1, 1)), None);
        assert_eq!(triggers.triggered(&usd_per_coin(8, 10)), Some(MarginExit::Market));
        assert_eq!(
            triggers.triggered(&usd_per_coin(13, 10)),
            Some(MarginExit::Limit(usd_per_coin(12, 10)))
        );
    }

    #[test]
    fn close_repays_pool_from_position_and_collateral() {
        let mut f = Fixture::new();
        let id = f.open(500_000, MarginTriggers::default()).unwrap();
        f.run(|s, ctx| close_margin_position(s, ctx, &id, None)).unwrap();

        assert!(f.state.book.margin(&id).is_err());
        assert_eq!(f.usd_pool().borrowed_balance, 0);
        assert_eq!(f.usd_pool().base_balance, 100_000_000);
        // Whatever the position sale leaves unpaid comes out of the collateral.
        let returned = f.ledger.balance("bob", "COIN") - 9_500_000;
        assert!(returned > 490_000 && returned < 500_000, "returned {returned}");
        let closed: Vec<&VirtualOp> = f.ops.by_name("margin_closed").collect();
        assert!(matches!(
            closed.as_slice(),
            [VirtualOp::MarginClosed { default, .. }] if default.amount == 0
        ));
        f.ledger.verify_conservation().unwrap();
    }

    #[test]
    fn interest_accrues_and_fee_is_burned_on_close() {
        let mut f = Fixture::new();
        let id = f.open(500_000, MarginTriggers::default()).unwrap();
        f.now += chrono::Duration::seconds(liquimatch_types::constants::SECONDS_PER_YEAR);

        // rate = 100 + 400 * (1_000_000 + P) / (99_000_000 + P) = 108
        let interest = f.run(|s, ctx| accrue_margin(s, ctx, &id)).unwrap();
        assert_eq!(interest, Asset::new(10_800, "USD"));
        assert_eq!(f.state.book.margin(&id).unwrap().debt.amount, 1_010_800);
        assert_eq!(f.usd_pool().borrowed_balance, 1_010_800);

        f.run(|s, ctx| close_margin_order(s, ctx, &id)).unwrap();
        // 25% of the interest is burned; the rest grows the pool.
        assert_eq!(f.usd_pool().base_balance, 99_000_000 + 1_010_800 - 2_700);
        assert_eq!(f.usd_pool().borrowed_balance, 0);
        f.ledger.verify_conservation().unwrap();
    }

    #[test]
    fn limit_close_rests_until_bought() {
        let mut f = Fixture::new();
        let id = f.open(500_000, MarginTriggers::default()).unwrap();
        // Ask 2 USD per COIN: far above the pool.
        let limit = usd_per_coin(2, 1);
        f.run(|s, ctx| close_margin_position(s, ctx, &id, Some(&limit))).unwrap();
        let order = f.state.book.margin(&id).unwrap();
        assert!(order.liquidating);
        assert!(f.state.book.is_margin_listed(&id));
        let again = f.run(|s, ctx| close_margin_position(s, ctx, &id, Some(&limit)));
        assert!(matches!(again, Err(LiquimatchError::InvalidOrder { .. })));
        f.ledger.verify_conservation().unwrap();
    }

    #[test]
    fn liquidation_sells_position_and_closes() {
        let mut f = Fixture::new();
        let id = f.open(500_000, MarginTriggers::default()).unwrap();
        f.run(|s, ctx| liquidate_margin_order(s, ctx, &id)).unwrap();
        assert!(f.state.book.margin(&id).is_err());
        assert_eq!(f.usd_pool().borrowed_balance, 0);
        assert_eq!(f.ops.by_name("margin_closed").count(), 1);
        f.ledger.verify_conservation().unwrap();
    }

    #[test]
    fn added_collateral_raises_collateralization() {
        let mut f = Fixture::new();
        let id = f.open(500_000, MarginTriggers::default()).unwrap();
        let extra = Asset::new(500_000, "COIN");
        f.run(|s, ctx| edit_margin_order(s, ctx, &id, Some(&extra), None)).unwrap();
        let order = f.state.book.margin(&id).unwrap();
        assert_eq!(order.collateral.amount, 1_000_000);
        assert_eq!(order.collateralization, 9_990);
        let wrong = Asset::new(1, "USD");
        assert!(f.run(|s, ctx| edit_margin_order(s, ctx, &id, Some(&wrong), None)).is_err());
    }
}
