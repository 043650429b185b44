//! Taker-vs-maker matching.
//!
//! A newly placed limit or margin order (the taker) repeatedly consumes the
//! single best-priced source of counter-liquidity until it is filled or no
//! source remains at an acceptable price:
//!
//! ```text
//! sources (tie-break order):  Limit  >  Margin  >  Pool  >  Call
//!
//! loop:
//!     best = max price over sources whose price is acceptable to the taker
//!     none -> taker rests on the book
//!     Limit / Margin -> discrete fill at the maker's price
//!     Pool           -> limit-priced swap bounded by the next-best source
//!     Call           -> margin call buys back debt at the squeeze price
//! ```
//!
//! All prices are compared with the receive asset as base: a higher price
//! gives the taker more per unit sold.
//!
//! ## Rounding
//!
//! The side whose remainder is computed first is rounded down and the
//! counter-leg rounded up, so neither party receives something for nothing.
//! A fill that would give the taker zero culls the taker instead.

use chrono::{DateTime, Utc};
use liquimatch_ledger::TxContext;
use liquimatch_pool::FeeSplit;
use liquimatch_types::{
    AccountName, Asset, CancelReason, LimitOrder, LiquimatchError, OrderId, OrderKind, Price, Result, Symbol,
    VirtualOp,
};

use serde::{Deserialize, Serialize};

use crate::calls::{call_match_amounts, fill_call};
use crate::margin::close_margin_order;
use crate::market::MarketState;

/// An order that can rest on the book and take liquidity.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum BookOrder {
    Limit(OrderId),
    Margin(OrderId),
}

impl BookOrder {
    #[must_use]
    pub fn id(&self) -> &OrderId {
        match self {
            Self::Limit(id) | Self::Margin(id) => id,
        }
    }

    #[must_use]
    pub fn kind(&self) -> OrderKind {
        match self {
            Self::Limit(_) => OrderKind::Limit,
            Self::Margin(_) => OrderKind::Margin,
        }
    }
}

/// Counter-liquidity available to a taker, declared in tie-break order.
#[derive(Debug, Clone, PartialEq, Eq)]
enum Source {
    Limit(OrderId),
    Margin(OrderId),
    Pool,
    Call(AccountName),
}

#[derive(Debug, Clone)]
struct Quote {
    source: Source,
    /// Receive asset per sold asset, receive asset as base.
    price: Price,
}

/// What the taker currently offers and the worst price it accepts.
struct TakerView {
    for_sale: Asset,
    receive: Symbol,
    limit: Price,
    interface: Option<AccountName>,
}

enum Step {
    Continue,
    PoolSpent,
    CallSpent,
    TakerDone,
}

/// Parameters of a new limit order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LimitOrderRequest {
    pub owner: AccountName,
    pub name: String,
    pub amount_to_sell: Asset,
    pub min_to_receive: Asset,
    pub expiration: DateTime<Utc>,
    pub interface: Option<AccountName>,
    /// Reject the whole transaction unless the order fills immediately.
    pub fill_or_kill: bool,
}

// =====================================================================
// Limit order lifecycle
// =====================================================================

/// Lock the seller's funds, rest the order on the book and match it.
pub fn place_limit_order(state: &mut MarketState, ctx: &mut TxContext<'_>, req: LimitOrderRequest) -> Result<OrderId> {
    liquimatch_types::ensure_positive(&req.amount_to_sell, "amount to sell")?;
    liquimatch_types::ensure_positive(&req.min_to_receive, "minimum to receive")?;
    if req.amount_to_sell.symbol == req.min_to_receive.symbol {
        return Err(LiquimatchError::InvalidOrder {
            reason: format!("cannot sell {} for itself", req.amount_to_sell.symbol),
        });
    }
    ctx.registry.get(&req.amount_to_sell.symbol)?;
    ctx.registry.get(&req.min_to_receive.symbol)?;
    if req.expiration <= ctx.now {
        return Err(LiquimatchError::InvalidOrder {
            reason: format!("expiration {} is not after block time {}", req.expiration, ctx.now),
        });
    }
    let id = OrderId::new(&req.owner, &req.name);
    if state.book.limit(&id).is_ok() {
        return Err(LiquimatchError::DuplicateOrder(id));
    }

    ctx.ledger.lock(&req.owner, &req.amount_to_sell)?;
    let order = LimitOrder {
        id: id.clone(),
        seq: 0,
        for_sale: req.amount_to_sell.amount,
        sell_price: Price::new(req.amount_to_sell, req.min_to_receive),
        expiration: req.expiration,
        interface: req.interface,
        created: ctx.now,
    };
    tracing::debug!(order = %id, price = %order.sell_price, "Limit order placed");
    state.book.insert_limit(order)?;

    let filled = apply_order(state, ctx, &BookOrder::Limit(id.clone()))?;
    if req.fill_or_kill && !filled {
        return Err(LiquimatchError::InvalidOrder {
            reason: format!("fill-or-kill order {id} was not filled"),
        });
    }
    Ok(id)
}

/// Remove a limit order and refund its remaining balance.
pub fn cancel_limit_order(
    state: &mut MarketState,
    ctx: &mut TxContext<'_>,
    id: &OrderId,
    reason: CancelReason,
) -> Result<Asset> {
    let order = state.book.remove_limit(id)?;
    let refunded = order.amount_for_sale();
    ctx.ledger.release(order.seller(), &refunded)?;
    if reason == CancelReason::Culled {
        tracing::warn!(order = %id, refunded = %refunded, "Limit order culled");
    } else {
        tracing::debug!(order = %id, refunded = %refunded, ?reason, "Limit order cancelled");
    }
    ctx.emit(VirtualOp::OrderCancelled {
        owner: order.seller().clone(),
        order: id.clone(),
        kind: OrderKind::Limit,
        refunded: refunded.clone(),
        reason,
    });
    Ok(refunded)
}

/// Cancel every limit order and close every margin order whose expiration
/// has passed. Returns how many orders were removed.
pub fn clear_expired_orders(state: &mut MarketState, ctx: &mut TxContext<'_>) -> Result<usize> {
    let limits = state.book.expired_limits(ctx.now);
    let margins = state.book.expired_margins(ctx.now);
    for id in &limits {
        cancel_limit_order(state, ctx, id, CancelReason::Expired)?;
    }
    for id in &margins {
        close_margin_order(state, ctx, id)?;
    }
    let removed = limits.len() + margins.len();
    if removed > 0 {
        tracing::info!(limits = limits.len(), margins = margins.len(), "Expired orders cleared");
    }
    Ok(removed)
}

/// Cancel every limit order trading `symbol`, ahead of its balances being
/// wiped. Returns how many orders were cancelled.
pub fn cancel_orders_trading(state: &mut MarketState, ctx: &mut TxContext<'_>, symbol: &Symbol) -> Result<usize> {
    let limits = state.book.limits_trading(symbol);
    for id in &limits {
        cancel_limit_order(state, ctx, id, CancelReason::Expired)?;
    }
    if !limits.is_empty() {
        tracing::info!(symbol = %symbol, limits = limits.len(), "Orders in expiring asset cancelled");
    }
    Ok(limits.len())
}

/// Take an order out of matching because its remainder buys nothing.
/// Limit orders are refunded; margin orders stop trading, or close if they
/// were liquidating.
pub(crate) fn cull(state: &mut MarketState, ctx: &mut TxContext<'_>, order: &BookOrder) -> Result<()> {
    match order {
        BookOrder::Limit(id) => {
            cancel_limit_order(state, ctx, id, CancelReason::Culled)?;
        }
        BookOrder::Margin(id) => {
            if state.book.margin(id)?.liquidating {
                close_margin_order(state, ctx, id)?;
            } else {
                tracing::warn!(order = %id, "Margin order culled from the book");
                state.book.unlist_margin(id)?;
            }
        }
    }
    Ok(())
}

// =====================================================================
// The matching loop
// =====================================================================

/// Match a resting order against the book, pools and callable positions.
/// Returns `true` once the order no longer trades (filled, culled or
/// closed), `false` if it rests with a remainder.
pub fn apply_order(state: &mut MarketState, ctx: &mut TxContext<'_>, taker: &BookOrder) -> Result<bool> {
    let mut pool_spent = false;
    let mut call_spent = false;
    loop {
        let Some(view) = taker_view(state, taker) else {
            return Ok(true);
        };
        let quotes = acceptable_quotes(state, &view, pool_spent, call_spent, ctx.now)?;
        let Some((best, runner_up)) = pick_best(quotes) else {
            return Ok(false);
        };
        let step = match &best.source {
            Source::Limit(id) => match_book(state, ctx, taker, &view, &BookOrder::Limit(id.clone()), &best.price)?,
            Source::Margin(id) => match_book(state, ctx, taker, &view, &BookOrder::Margin(id.clone()), &best.price)?,
            Source::Pool => {
                let bound = runner_up
                    .filter(|p| *p > view.limit)
                    .unwrap_or_else(|| view.limit.clone());
                match_pool(state, ctx, taker, &view, &bound)?
            }
            Source::Call(borrower) => match_call(state, ctx, taker, &view, borrower, &best.price)?,
        };
        match step {
            Step::TakerDone => return Ok(true),
            Step::Continue => pool_spent = false,
            Step::PoolSpent => pool_spent = true,
            Step::CallSpent => call_spent = true,
        }
    }
}

fn taker_view(state: &MarketState, taker: &BookOrder) -> Option<TakerView> {
    match taker {
        BookOrder::Limit(id) => {
            let order = state.book.limit(id).ok()?;
            (order.for_sale > 0).then(|| TakerView {
                for_sale: order.amount_for_sale(),
                receive: order.receive_symbol().clone(),
                limit: order.sell_price.invert(),
                interface: order.interface.clone(),
            })
        }
        BookOrder::Margin(id) => {
            let order = state.book.margin(id).ok()?;
            (!order.filled() && state.book.is_margin_listed(id)).then(|| TakerView {
                for_sale: order.amount_for_sale(),
                receive: order.sell_price.quote.symbol.clone(),
                limit: order.sell_price.invert(),
                interface: order.interface.clone(),
            })
        }
    }
}

fn acceptable_quotes(
    state: &MarketState,
    view: &TakerView,
    pool_spent: bool,
    call_spent: bool,
    now: DateTime<Utc>,
) -> Result<Vec<Quote>> {
    let sell = &view.for_sale.symbol;
    let receive = &view.receive;
    let mut quotes = Vec::with_capacity(4);

    if let Some(maker) = state.book.best_limit(receive, sell) {
        if maker.sell_price >= view.limit {
            quotes.push(Quote {
                source: Source::Limit(maker.id.clone()),
                price: maker.sell_price.clone(),
            });
        }
    }
    if let Some(maker) = state.book.best_margin(receive, sell) {
        if maker.sell_price >= view.limit {
            quotes.push(Quote {
                source: Source::Margin(maker.id.clone()),
                price: maker.sell_price.clone(),
            });
        }
    }
    if !pool_spent {
        if let Ok(pool) = state.pools.liquidity_pool(sell, receive) {
            let spot = pool.base_price(receive);
            if spot > view.limit {
                quotes.push(Quote {
                    source: Source::Pool,
                    price: spot,
                });
            }
        }
    }
    if !call_spent && state.calls_tradeable(sell, receive, now) {
        let feed = state.bitasset(sell)?.require_feed(now)?;
        let call_price = feed.max_short_squeeze_price()?.invert();
        if call_price >= view.limit {
            if let Some(call) = state.book.least_collateralized(sell) {
                if call.collateralization() <= feed.maintenance_collateralization()? {
                    quotes.push(Quote {
                        source: Source::Call(call.borrower.clone()),
                        price: call_price,
                    });
                }
            }
        }
    }
    Ok(quotes)
}

/// Highest price wins; equal prices go to the earlier source. Also returns
/// the best price among the other sources.
fn pick_best(mut quotes: Vec<Quote>) -> Option<(Quote, Option<Price>)> {
    let mut best = 0;
    for (i, quote) in quotes.iter().enumerate().skip(1) {
        if quote.price > quotes[best].price {
            best = i;
        }
    }
    if quotes.is_empty() {
        return None;
    }
    let chosen = quotes.remove(best);
    let runner_up = quotes.into_iter().map(|q| q.price).max();
    Some((chosen, runner_up))
}

// =====================================================================
// Matches
// =====================================================================

fn match_book(
    state: &mut MarketState,
    ctx: &mut TxContext<'_>,
    taker: &BookOrder,
    view: &TakerView,
    maker: &BookOrder,
    price: &Price,
) -> Result<Step> {
    let (maker_for_sale, maker_interface) = match maker {
        BookOrder::Limit(id) => {
            let o = state.book.limit(id)?;
            (o.amount_for_sale(), o.interface.clone())
        }
        BookOrder::Margin(id) => {
            let o = state.book.margin(id)?;
            (o.amount_for_sale(), o.interface.clone())
        }
    };
    let maker_wants = price.mul(&maker_for_sale)?;
    if maker_wants.amount == 0 {
        cull(state, ctx, maker)?;
        return Ok(Step::Continue);
    }

    let (taker_pays, taker_receives) = if view.for_sale.amount < maker_wants.amount {
        let receives = price.mul(&view.for_sale)?;
        if receives.amount == 0 {
            cull(state, ctx, taker)?;
            return Ok(Step::TakerDone);
        }
        (view.for_sale.clone(), receives)
    } else {
        (maker_wants, maker_for_sale)
    };

    let fee = FeeSplit::book_fill(
        taker_receives.amount,
        &ctx.config.fees,
        maker_interface.is_some(),
        view.interface.is_some(),
    )?;
    pay_book_fee(ctx, &taker_receives.symbol, &fee, maker_interface.as_ref(), view.interface.as_ref())?;

    let taker_done = fill_order(
        state,
        ctx,
        taker,
        &taker_pays,
        &taker_receives,
        &taker_receives.with_amount(fee.total),
        price,
        false,
    )?;
    fill_order(
        state,
        ctx,
        maker,
        &taker_receives,
        &taker_pays,
        &Asset::zero(&taker_pays.symbol),
        price,
        true,
    )?;
    Ok(if taker_done { Step::TakerDone } else { Step::Continue })
}

fn match_pool(
    state: &mut MarketState,
    ctx: &mut TxContext<'_>,
    taker: &BookOrder,
    view: &TakerView,
    bound: &Price,
) -> Result<Step> {
    let pool = state.pools.liquidity_pool(&view.for_sale.symbol, &view.receive)?;
    let pool_account = AccountName(pool.symbol_liquid.to_string());
    let swap = pool.quote_limit_exchange(
        &view.for_sale,
        bound,
        &ctx.config.fees,
        ctx.config.precision,
        view.interface.is_some(),
    )?;
    if swap.is_empty() || swap.received.amount == 0 {
        return Ok(Step::PoolSpent);
    }
    state.pools.settle_swap(ctx, &swap, view.interface.as_ref())?;
    let fill_price = Price::new(swap.gross.clone(), swap.paid.clone());
    ctx.emit(VirtualOp::Fill {
        owner: pool_account,
        order: None,
        kind: OrderKind::Pool,
        pays: swap.gross.clone(),
        receives: swap.paid.clone(),
        fee: Asset::zero(&swap.paid.symbol),
        fill_price: fill_price.clone(),
        is_maker: true,
    });
    let done = fill_order(
        state,
        ctx,
        taker,
        &swap.paid,
        &swap.gross,
        &swap.fee_asset(),
        &fill_price,
        false,
    )?;
    Ok(if done { Step::TakerDone } else { Step::PoolSpent })
}

fn match_call(
    state: &mut MarketState,
    ctx: &mut TxContext<'_>,
    taker: &BookOrder,
    view: &TakerView,
    borrower: &AccountName,
    match_price: &Price,
) -> Result<Step> {
    let feed = state.bitasset(&view.for_sale.symbol)?.require_feed(ctx.now)?.clone();
    let call = state
        .book
        .call(borrower, &view.for_sale.symbol)
        .cloned()
        .ok_or_else(|| LiquimatchError::CallOrderNotFound {
            borrower: borrower.clone(),
            symbol: view.for_sale.symbol.clone(),
        })?;
    let callable = feed.maintenance_collateralization()?;
    let to_buy = call.max_debt_to_cover(
        match_price,
        &feed.settlement_price,
        feed.maintenance_collateral_ratio,
        &callable,
    )?;
    if to_buy <= 0 {
        return Ok(Step::CallSpent);
    }
    let Some((call_receives, order_receives)) = call_match_amounts(to_buy, &view.for_sale, match_price)? else {
        cull(state, ctx, taker)?;
        return Ok(Step::TakerDone);
    };
    if order_receives.amount > call.collateral.amount {
        tracing::warn!(
            borrower = %borrower,
            debt = %call.debt,
            collateral = %call.collateral,
            "Call cannot cover its debt at the squeeze price"
        );
        return Ok(Step::CallSpent);
    }

    let fee = FeeSplit::book_fill(
        order_receives.amount,
        &ctx.config.fees,
        call.interface.is_some(),
        view.interface.is_some(),
    )?;
    pay_book_fee(ctx, &order_receives.symbol, &fee, call.interface.as_ref(), view.interface.as_ref())?;
    fill_call(state, ctx, borrower, &order_receives, &call_receives, match_price, true)?;
    let done = fill_order(
        state,
        ctx,
        taker,
        &call_receives,
        &order_receives,
        &order_receives.with_amount(fee.total),
        match_price,
        false,
    )?;
    Ok(if done { Step::TakerDone } else { Step::Continue })
}

/// Pay out a book-fill fee held as pending `symbol`.
fn pay_book_fee(
    ctx: &mut TxContext<'_>,
    symbol: &Symbol,
    fee: &FeeSplit,
    maker_interface: Option<&AccountName>,
    taker_interface: Option<&AccountName>,
) -> Result<()> {
    ctx.ledger.burn_pending(&Asset::new(fee.network, symbol.clone()))?;
    if let Some(iface) = maker_interface {
        ctx.ledger.release(iface, &Asset::new(fee.maker_interface, symbol.clone()))?;
    }
    if let Some(iface) = taker_interface {
        ctx.ledger.release(iface, &Asset::new(fee.taker_interface, symbol.clone()))?;
    }
    Ok(())
}

/// Apply one side of a fill: `pays` leaves the order, `receives - fee`
/// reaches its owner (limit) or its balances (margin). Fees have already
/// been paid out. Returns `true` when the order stopped trading.
#[allow(clippy::too_many_arguments)]
pub(crate) fn fill_order(
    state: &mut MarketState,
    ctx: &mut TxContext<'_>,
    order: &BookOrder,
    pays: &Asset,
    receives: &Asset,
    fee: &Asset,
    fill_price: &Price,
    is_maker: bool,
) -> Result<bool> {
    let net = receives.checked_sub(fee)?;
    let owner = order.id().owner.clone();
    match order {
        BookOrder::Limit(id) => {
            let limit = state.book.limit_mut(id)?;
            limit.for_sale = limit
                .for_sale
                .checked_sub(pays.amount)
                .filter(|v| *v >= 0)
                .ok_or_else(|| LiquimatchError::InvariantViolation {
                    reason: format!("limit order {id} paid {pays} with only {} for sale", limit.for_sale),
                })?;
            ctx.ledger.release(&owner, &net)?;
        }
        BookOrder::Margin(id) => {
            let margin = state.book.margin_mut(id)?;
            let (sold, bought) = if margin.liquidating {
                (&mut margin.position_balance, &mut margin.debt_balance)
            } else {
                (&mut margin.debt_balance, &mut margin.position_balance)
            };
            sold.sub_assign(pays)?;
            bought.add_assign(&net)?;
            if sold.amount < 0 {
                return Err(LiquimatchError::InvariantViolation {
                    reason: format!("margin order {id} sold more than it held"),
                });
            }
        }
    }
    tracing::debug!(
        order = %order.id(),
        pays = %pays,
        receives = %receives,
        fee = %fee,
        is_maker,
        "Fill"
    );
    ctx.emit(VirtualOp::Fill {
        owner,
        order: Some(order.id().clone()),
        kind: order.kind(),
        pays: pays.clone(),
        receives: receives.clone(),
        fee: fee.clone(),
        fill_price: fill_price.clone(),
        is_maker,
    });

    match order {
        BookOrder::Limit(id) => {
            let limit = state.book.limit(id)?;
            if limit.for_sale == 0 {
                state.book.remove_limit(id)?;
                return Ok(true);
            }
            if limit.amount_to_receive()?.amount == 0 {
                cull(state, ctx, order)?;
                return Ok(true);
            }
        }
        BookOrder::Margin(id) => {
            let margin = state.book.margin(id)?;
            if margin.filled() {
                if margin.liquidating {
                    close_margin_order(state, ctx, id)?;
                } else {
                    state.book.unlist_margin(id)?;
                }
                return Ok(true);
            }
            if margin.amount_to_receive()?.amount == 0 {
                cull(state, ctx, order)?;
                return Ok(true);
            }
        }
    }
    Ok(false)
}

#[cfg(test)]
mod tests {
    use liquimatch_ledger::{InMemoryLedger, MemoryOpLog};
    use liquimatch_pool::LiquidityPool;
    use liquimatch_types::{AssetRegistry, AssetType, EngineConfig, MedianConfig};

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
            for s in ["COIN", "USD", "EUR"] {
                registry.register(&Symbol::new(s), AssetType::Currency);
            }
            let mut ledger = InMemoryLedger::new();
            for who in ["alice", "bob", "carol"] {
                for s in ["COIN", "USD", "EUR"] {
                    ledger.fund(who, Asset::new(1_000_000_000, s)).unwrap();
                }
            }
            Self {
                config: EngineConfig::with_precision(1_000_000),
                registry,
                ledger,
                ops: MemoryOpLog::new(),
                state: MarketState::new(),
                now: DateTime::<Utc>::UNIX_EPOCH,
            }
        }

        fn run<T>(&mut self, f: impl FnOnce(&mut MarketState, &mut TxContext<'_>) -> Result<T>) -> Result<T> {
            let mut ctx = TxContext::new(&self.config, &self.registry, &mut self.ledger, &mut self.ops, self.now);
            f(&mut self.state, &mut ctx)
        }

        fn place(&mut self, owner: &str, name: &str, sell: Asset, receive: Asset) -> Result<OrderId> {
            let req = LimitOrderRequest {
                owner: AccountName::new(owner),
                name: name.to_string(),
                amount_to_sell: sell,
                min_to_receive: receive,
                expiration: self.now + chrono::Duration::days(1),
                interface: None,
                fill_or_kill: false,
            };
            self.run(|s, ctx| place_limit_order(s, ctx, req))
        }

        /// Pool seeded outside the ledger, balanced by a matching pending
        /// deposit so conservation still holds.
        fn seed_pool(&mut self, a: Asset, b: Asset) {
            use liquimatch_ledger::Ledger;
            let lp = AccountName::new("carol");
            self.ledger.lock(&lp, &a).unwrap();
            self.ledger.lock(&lp, &b).unwrap();
            self.state
                .pools
                .insert_liquidity_pool(LiquidityPool::new(&a, &b, &MedianConfig::default()).unwrap());
        }

        fn balance(&self, who: &str, sym: &str) -> i64 {
            self.ledger.balance(who, sym)
        }
    }

    fn coin(n: i64) -> Asset {
        Asset::new(n, "COIN")
    }

    fn usd(n: i64) -> Asset {
        Asset::new(n, "USD")
    }

    #[test]
    fn non_crossing_order_rests() {
        let mut f = Fixture::new();
        f.place("alice", "ask", coin(100), usd(200)).unwrap();
        let bid = f.place("bob", "bid", usd(100), coin(100)).unwrap();
        assert!(f.state.book.limit(&bid).is_ok());
        assert_eq!(f.ops.by_name("fill").count(), 0);
        assert_eq!(f.balance("alice", "COIN"), 1_000_000_000 - 100);
    }

    #[test]
    fn orders_in_a_symbol_cancelled_both_sides() {
        let mut f = Fixture::new();
        f.place("alice", "ask", coin(100), usd(200)).unwrap();
        f.place("bob", "bid", usd(100), coin(100)).unwrap();
        f.place("carol", "eur", Asset::new(50, "EUR"), usd(60)).unwrap();

        let cancelled = f.run(|s, ctx| cancel_orders_trading(s, ctx, &Symbol::new("COIN"))).unwrap();
        assert_eq!(cancelled, 2);
        assert_eq!(f.balance("alice", "COIN"), 1_000_000_000);
        assert_eq!(f.balance("bob", "USD"), 1_000_000_000);
        assert_eq!(f.state.book.order_count(), 1);
        assert_eq!(f.ops.by_name("order_cancelled").count(), 2);
        assert!(
            f.ops
                .by_name("order_cancelled")
                .all(|op| matches!(op, VirtualOp::OrderCancelled { reason: CancelReason::Expired, .. }))
        );
        f.ledger.verify_conservation().unwrap();
    }

    #[test]
    fn crossing_order_fills_at_maker_price() {
        let mut f = Fixture::new();
        // alice sells 1000 COIN at 2 USD each.
        f.place("alice", "ask", coin(1_000), usd(2_000)).unwrap();
        // bob pays up to 3 USD per COIN for 300 COIN worth.
        let bid = f.place("bob", "bid", usd(900), coin(300)).unwrap();

        // bob's 900 USD buy 450 COIN at alice's price; fee 0.1% = 0.
        assert!(f.state.book.limit(&bid).is_err());
        assert_eq!(f.balance("bob", "COIN"), 1_000_000_000 + 450);
        assert_eq!(f.balance("alice", "USD"), 1_000_000_000 + 900);
        let ask = f.state.book.best_limit(&Symbol::new("COIN"), &Symbol::new("USD")).unwrap();
        assert_eq!(ask.for_sale, 550);
        assert_eq!(f.ops.by_name("fill").count(), 2);
        f.ledger.verify_conservation().unwrap();
    }

    #[test]
    fn taker_fee_burned_without_interfaces() {
        let mut f = Fixture::new();
        f.place("alice", "ask", coin(100_000), usd(100_000)).unwrap();
        f.place("bob", "bid", usd(100_000), coin(100_000)).unwrap();
        // 0.1% of 100_000 COIN
        assert_eq!(f.balance("bob", "COIN"), 1_000_000_000 + 99_900);
        assert_eq!(f.ledger.supply().total_burned(&Symbol::new("COIN")), 100);
        f.ledger.verify_conservation().unwrap();
    }

    #[test]
    fn best_price_consumed_first_then_time_priority() {
        let mut f = Fixture::new();
        f.place("alice", "cheap_first", coin(100), usd(100)).unwrap();
        f.place("carol", "dear", coin(100), usd(300)).unwrap();
        f.place("alice", "mid", coin(100), usd(200)).unwrap();
        f.place("carol", "cheap_second", coin(100), usd(100)).unwrap();
        f.place("bob", "sweep", usd(1_000), coin(250)).unwrap();

        let makers: Vec<String> = f
            .ops
            .by_name("fill")
            .filter_map(|op| match op {
                VirtualOp::Fill { order: Some(id), is_maker: true, .. } => Some(id.name.clone()),
                _ => None,
            })
            .collect();
        assert_eq!(makers, ["cheap_first", "cheap_second", "mid", "dear"]);
        // 300 USD left over rests as a bid.
        let bid = f.state.book.best_limit(&Symbol::new("USD"), &Symbol::new("COIN")).unwrap();
        assert_eq!(bid.for_sale, 300);
    }

    #[test]
    fn pool_fills_between_book_levels() {
        let mut f = Fixture::new();
        f.seed_pool(coin(1_000_000), usd(1_000_000));
        // Book ask at 1 COIN : 1.1 USD is worse than the pool's 1:1 spot.
        f.place("alice", "ask", coin(1_000), usd(1_100)).unwrap();
        f.place("bob", "bid", usd(200_000), coin(100_000)).unwrap();

        let kinds: Vec<OrderKind> = f
            .ops
            .by_name("fill")
            .filter_map(|op| match op {
                VirtualOp::Fill { kind, is_maker: true, .. } => Some(*kind),
                _ => None,
            })
            .collect();
        assert_eq!(kinds.first(), Some(&OrderKind::Pool));
        assert!(kinds.contains(&OrderKind::Limit));
        let pool = f
            .state
            .pools
            .liquidity_pool(&Symbol::new("COIN"), &Symbol::new("USD"))
            .unwrap();
        assert!(pool.balance_b > 1_000_000);
        f.ledger.verify_conservation().unwrap();
    }

    #[test]
    fn pool_stops_at_taker_limit() {
        let mut f = Fixture::new();
        f.seed_pool(coin(1_000_000_000), usd(1_000_000_000));
        // Willing to pay at most 100 USD per 99 COIN.
        let bid = f.place("bob", "bid", usd(100_000_000), coin(99_000_000)).unwrap();

        // sqrt(1e18 * 100 / 99) - 1e9 USD go in; 5_013_000 COIN come out
        // before the 0.1% fee.
        let rest = f.state.book.limit(&bid).unwrap();
        assert_eq!(rest.for_sale, 100_000_000 - 5_037_815);
        assert_eq!(f.balance("bob", "COIN"), 1_000_000_000 + 5_007_987);
        assert_eq!(f.ops.by_name("fill").count(), 2);
        f.ledger.verify_conservation().unwrap();
    }

    #[test]
    fn taker_remainder_buying_nothing_is_culled() {
        let mut f = Fixture::new();
        f.place("alice", "ask", coin(9), usd(9)).unwrap();
        // bob wants at least 5 COIN for 10 USD; after buying 9 COIN for
        // 9 USD the last 1 USD is worth floor(1 * 5 / 10) = 0 COIN.
        f.place("bob", "bid", usd(10), coin(5)).unwrap();

        assert!(f.state.book.is_empty());
        assert_eq!(f.balance("bob", "USD"), 1_000_000_000 - 9);
        assert_eq!(f.balance("bob", "COIN"), 1_000_000_000 + 9);
        let culled: Vec<&VirtualOp> = f.ops.by_name("order_cancelled").collect();
        assert!(matches!(
            culled.as_slice(),
            [VirtualOp::OrderCancelled { reason: CancelReason::Culled, .. }]
        ));
        f.ledger.verify_conservation().unwrap();
    }

    #[test]
    fn fill_or_kill_rejected_when_unfilled() {
        let mut f = Fixture::new();
        let req = LimitOrderRequest {
            owner: AccountName::new("bob"),
            name: "fok".into(),
            amount_to_sell: usd(100),
            min_to_receive: coin(100),
            expiration: f.now + chrono::Duration::days(1),
            interface: None,
            fill_or_kill: true,
        };
        let err = f.run(|s, ctx| place_limit_order(s, ctx, req)).unwrap_err();
        assert!(matches!(err, LiquimatchError::InvalidOrder { .. }));
    }

    #[test]
    fn invalid_orders_rejected_before_mutation() {
        let mut f = Fixture::new();
        assert!(f.place("bob", "zero", usd(0), coin(1)).is_err());
        assert!(f.place("bob", "self", usd(10), usd(1)).is_err());
        assert!(matches!(
            f.place("bob", "unknown", usd(10), Asset::new(1, "XYZ")),
            Err(LiquimatchError::AssetNotFound(_))
        ));
        f.place("bob", "dup", usd(10), coin(1)).unwrap();
        assert!(matches!(
            f.place("bob", "dup", usd(10), coin(1)),
            Err(LiquimatchError::DuplicateOrder(_))
        ));
        assert_eq!(f.balance("bob", "USD"), 1_000_000_000 - 10);
    }

    #[test]
    fn cancel_and_expiry_refund() {
        let mut f = Fixture::new();
        let a = f.place("alice", "a", coin(100), usd(500)).unwrap();
        f.place("alice", "b", coin(50), usd(500)).unwrap();
        let refunded = f
            .run(|s, ctx| cancel_limit_order(s, ctx, &a, CancelReason::Requested))
            .unwrap();
        assert_eq!(refunded, coin(100));

        f.now += chrono::Duration::days(2);
        assert_eq!(f.run(|s, ctx| clear_expired_orders(s, ctx)).unwrap(), 1);
        assert_eq!(f.balance("alice", "COIN"), 1_000_000_000);
        assert!(f.state.book.is_empty());
    }

    #[test]
    fn random_flow_conserves_supply_and_leaves_book_uncrossed() {
        use rand::{Rng, SeedableRng, rngs::StdRng};

        let mut f = Fixture::new();
        f.seed_pool(coin(10_000_000), usd(20_000_000));
        let mut rng = StdRng::seed_from_u64(7);
        for i in 0..200 {
            let owner = ["alice", "bob", "carol"][rng.gen_range(0..3)];
            let amount: i64 = rng.gen_range(1..50_000);
            // USD per 100 COIN
            let price: i64 = rng.gen_range(150..250);
            let name = format!("o{i}");
            if rng.gen_bool(0.5) {
                f.place(owner, &name, coin(amount), usd(amount * price / 100)).unwrap();
            } else {
                f.place(owner, &name, usd(amount * price / 100), coin(amount)).unwrap();
            }
        }
        f.ledger.verify_conservation().unwrap();

        let (coin_sym, usd_sym) = (Symbol::new("COIN"), Symbol::new("USD"));
        if let (Some(ask), Some(bid)) = (
            f.state.book.best_limit(&coin_sym, &usd_sym),
            f.state.book.best_limit(&usd_sym, &coin_sym),
        ) {
            assert!(ask.sell_price < bid.sell_price.invert());
        }
    }

    #[test]
    fn pick_best_prefers_earlier_source_on_ties() {
        let p = |n: i64| Price::new(Asset::new(n, "COIN"), Asset::new(10, "USD"));
        let quotes = vec![
            Quote { source: Source::Margin(OrderId::new(&AccountName::new("m"), "m")), price: p(5) },
            Quote { source: Source::Pool, price: p(7) },
            Quote { source: Source::Call(AccountName::new("c")), price: p(7) },
        ];
        let (best, runner_up) = pick_best(quotes).unwrap();
        assert_eq!(best.source, Source::Pool);
        assert_eq!(runner_up, Some(p(7)));
        assert!(pick_best(Vec::new()).is_none());
    }
}
