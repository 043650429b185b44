//! The object store for every resting order, with per-market price indices.
//!
//! Uses `BTreeMap` for price-level ordering, one side per directed market
//! `(sell_symbol, receive_symbol)`:
//!
//! ```text
//! limit  side: BTreeMap<Reverse<Price>, PriceLevel>   highest sell_price first
//! margin side: BTreeMap<Reverse<Price>, PriceLevel>   unfilled orders only
//! calls      : BTreeSet<(collateralization, borrower)> lowest ratio first
//! ```
//!
//! A maker offering the best price to a taker selling `X` for `Y` is the
//! first entry of the `(Y, X)` side. Order bodies live in id-keyed maps;
//! price levels hold ids. Callers may mutate balances through the `_mut`
//! accessors but must go through [`OrderBook::relist_margin`] to change a
//! margin order's price or direction.

use std::cmp::Reverse;
use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Utc};
use liquimatch_types::{
    AccountName, CallOrder, ForceSettlement, LimitOrder, LiquimatchError, MarginOrder, OrderId,
    Price, Result, Symbol,
};

use crate::price_level::PriceLevel;

/// `(sell_symbol, receive_symbol)`.
pub type Market = (Symbol, Symbol);

type Side = BTreeMap<Reverse<Price>, PriceLevel>;

#[derive(Debug, Clone, Default)]
pub struct OrderBook {
    limits: BTreeMap<OrderId, LimitOrder>,
    limit_sides: BTreeMap<Market, Side>,
    margins: BTreeMap<OrderId, MarginOrder>,
    margin_sides: BTreeMap<Market, Side>,
    calls: BTreeMap<(AccountName, Symbol), CallOrder>,
    call_index: BTreeMap<Symbol, BTreeSet<(Price, AccountName)>>,
    settlements: BTreeMap<OrderId, ForceSettlement>,
    next_seq: u64,
}

fn market_of(price: &Price) -> Market {
    (price.base.symbol.clone(), price.quote.symbol.clone())
}

fn side_insert(sides: &mut BTreeMap<Market, Side>, price: &Price, id: &OrderId) {
    sides
        .entry(market_of(price))
        .or_default()
        .entry(Reverse(price.clone()))
        .or_insert_with(|| PriceLevel::new(price.clone()))
        .push_back(id.clone());
}

fn side_remove(sides: &mut BTreeMap<Market, Side>, price: &Price, id: &OrderId) -> bool {
    let market = market_of(price);
    let Some(side) = sides.get_mut(&market) else {
        return false;
    };
    let key = Reverse(price.clone());
    let Some(level) = side.get_mut(&key) else {
        return false;
    };
    let removed = level.remove_order(id);
    if level.is_empty() {
        side.remove(&key);
    }
    if side.is_empty() {
        sides.remove(&market);
    }
    removed
}

fn side_best<'a>(sides: &'a BTreeMap<Market, Side>, sell: &Symbol, receive: &Symbol) -> Option<&'a OrderId> {
    sides
        .get(&(sell.clone(), receive.clone()))
        .and_then(|side| side.values().next())
        .and_then(PriceLevel::front)
}

fn side_ids(sides: &BTreeMap<Market, Side>, sell: &Symbol, receive: &Symbol) -> Vec<OrderId> {
    sides
        .get(&(sell.clone(), receive.clone()))
        .map(|side| side.values().flat_map(|l| l.orders.iter().cloned()).collect())
        .unwrap_or_default()
}

impl OrderBook {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn take_seq(&mut self) -> u64 {
        let seq = self.next_seq;
        self.next_seq += 1;
        seq
    }

    // =================================================================
    // Limit orders
    // =================================================================

    /// Index a new limit order behind every order already at its price.
    pub fn insert_limit(&mut self, mut order: LimitOrder) -> Result<()> {
        if self.limits.contains_key(&order.id) {
            return Err(LiquimatchError::DuplicateOrder(order.id));
        }
        order.seq = self.take_seq();
        side_insert(&mut self.limit_sides, &order.sell_price, &order.id);
        self.limits.insert(order.id.clone(), order);
        Ok(())
    }

    pub fn limit(&self, id: &OrderId) -> Result<&LimitOrder> {
        self.limits
            .get(id)
            .ok_or_else(|| LiquimatchError::OrderNotFound(id.clone()))
    }

    /// Mutable access for balance updates; the price must not change.
    pub fn limit_mut(&mut self, id: &OrderId) -> Result<&mut LimitOrder> {
        self.limits
            .get_mut(id)
            .ok_or_else(|| LiquimatchError::OrderNotFound(id.clone()))
    }

    pub fn remove_limit(&mut self, id: &OrderId) -> Result<LimitOrder> {
        let order = self
            .limits
            .remove(id)
            .ok_or_else(|| LiquimatchError::OrderNotFound(id.clone()))?;
        side_remove(&mut self.limit_sides, &order.sell_price, id);
        Ok(order)
    }

    /// Best limit order selling `sell` for `receive`.
    #[must_use]
    pub fn best_limit(&self, sell: &Symbol, receive: &Symbol) -> Option<&LimitOrder> {
        side_best(&self.limit_sides, sell, receive).and_then(|id| self.limits.get(id))
    }

    /// Every limit order selling `sell` for `receive`, best first.
    #[must_use]
    pub fn limit_ids(&self, sell: &Symbol, receive: &Symbol) -> Vec<OrderId> {
        side_ids(&self.limit_sides, sell, receive)
    }

    pub fn limit_orders(&self) -> impl Iterator<Item = &LimitOrder> {
        self.limits.values()
    }

    #[must_use]
    pub fn expired_limits(&self, now: DateTime<Utc>) -> Vec<OrderId> {
        self.limits
            .values()
            .filter(|o| o.expiration <= now)
            .map(|o| o.id.clone())
            .collect()
    }

    /// Limit orders selling or buying `symbol`.
    #[must_use]
    pub fn limits_trading(&self, symbol: &Symbol) -> Vec<OrderId> {
        self.limits
            .values()
            .filter(|o| o.sell_symbol() == symbol || o.receive_symbol() == symbol)
            .map(|o| o.id.clone())
            .collect()
    }

    // =================================================================
    // Margin orders
    // =================================================================

    /// Store a margin order; it is listed on the book while unfilled.
    pub fn insert_margin(&mut self, mut order: MarginOrder) -> Result<()> {
        if self.margins.contains_key(&order.id) {
            return Err(LiquimatchError::DuplicateOrder(order.id));
        }
        order.seq = self.take_seq();
        if !order.filled() {
            side_insert(&mut self.margin_sides, &order.sell_price, &order.id);
        }
        self.margins.insert(order.id.clone(), order);
        Ok(())
    }

    pub fn margin(&self, id: &OrderId) -> Result<&MarginOrder> {
        self.margins
            .get(id)
            .ok_or_else(|| LiquimatchError::OrderNotFound(id.clone()))
    }

    /// Mutable access for balance updates; use [`Self::relist_margin`]
    /// after changing `sell_price` or `liquidating`.
    pub fn margin_mut(&mut self, id: &OrderId) -> Result<&mut MarginOrder> {
        self.margins
            .get_mut(id)
            .ok_or_else(|| LiquimatchError::OrderNotFound(id.clone()))
    }

    /// Take a margin order off the book, leaving it open.
    pub fn unlist_margin(&mut self, id: &OrderId) -> Result<()> {
        let price = self.margin(id)?.sell_price.clone();
        side_remove(&mut self.margin_sides, &price, id);
        Ok(())
    }

    /// Take the order off the book under `old_price` and list it again at
    /// its current price, behind everything already there.
    pub fn relist_margin(&mut self, id: &OrderId, old_price: &Price) -> Result<()> {
        side_remove(&mut self.margin_sides, old_price, id);
        let seq = self.take_seq();
        let order = self
            .margins
            .get_mut(id)
            .ok_or_else(|| LiquimatchError::OrderNotFound(id.clone()))?;
        order.seq = seq;
        if !order.filled() {
            side_insert(&mut self.margin_sides, &order.sell_price, id);
        }
        Ok(())
    }

    pub fn remove_margin(&mut self, id: &OrderId) -> Result<MarginOrder> {
        let order = self
            .margins
            .remove(id)
            .ok_or_else(|| LiquimatchError::OrderNotFound(id.clone()))?;
        side_remove(&mut self.margin_sides, &order.sell_price, id);
        Ok(order)
    }

    #[must_use]
    pub fn best_margin(&self, sell: &Symbol, receive: &Symbol) -> Option<&MarginOrder> {
        side_best(&self.margin_sides, sell, receive).and_then(|id| self.margins.get(id))
    }

    #[must_use]
    pub fn is_margin_listed(&self, id: &OrderId) -> bool {
        self.margins.get(id).is_some_and(|o| {
            self.margin_sides
                .get(&market_of(&o.sell_price))
                .and_then(|side| side.get(&Reverse(o.sell_price.clone())))
                .is_some_and(|level| level.orders.contains(id))
        })
    }

    pub fn margin_orders(&self) -> impl Iterator<Item = &MarginOrder> {
        self.margins.values()
    }

    #[must_use]
    pub fn expired_margins(&self, now: DateTime<Utc>) -> Vec<OrderId> {
        self.margins
            .values()
            .filter(|o| o.expiration <= now)
            .map(|o| o.id.clone())
            .collect()
    }

    // =================================================================
    // Call orders
    // =================================================================

    #[must_use]
    pub fn call(&self, borrower: &AccountName, debt: &Symbol) -> Option<&CallOrder> {
        self.calls.get(&(borrower.clone(), debt.clone()))
    }

    /// Insert or replace a borrower's call order, re-indexing its
    /// collateralization. A call with no debt left is removed.
    pub fn put_call(&mut self, call: CallOrder) {
        let key = (call.borrower.clone(), call.debt.symbol.clone());
        self.remove_call(&key.0, &key.1);
        if call.debt.amount == 0 {
            return;
        }
        self.call_index
            .entry(key.1.clone())
            .or_default()
            .insert((call.collateralization(), key.0.clone()));
        self.calls.insert(key, call);
    }

    pub fn remove_call(&mut self, borrower: &AccountName, debt: &Symbol) -> Option<CallOrder> {
        let call = self.calls.remove(&(borrower.clone(), debt.clone()))?;
        if let Some(index) = self.call_index.get_mut(debt) {
            index.remove(&(call.collateralization(), borrower.clone()));
            if index.is_empty() {
                self.call_index.remove(debt);
            }
        }
        Some(call)
    }

    /// The riskiest call order in `debt`.
    #[must_use]
    pub fn least_collateralized(&self, debt: &Symbol) -> Option<&CallOrder> {
        let (_, borrower) = self.call_index.get(debt)?.iter().next()?;
        self.call(borrower, debt)
    }

    /// Borrowers in `debt`, lowest collateralization first.
    #[must_use]
    pub fn call_borrowers(&self, debt: &Symbol) -> Vec<AccountName> {
        self.call_index
            .get(debt)
            .map(|index| index.iter().map(|(_, b)| b.clone()).collect())
            .unwrap_or_default()
    }

    pub fn calls_for<'a>(&'a self, debt: &'a Symbol) -> impl Iterator<Item = &'a CallOrder> + 'a {
        self.calls.values().filter(move |c| c.debt.symbol == *debt)
    }

    // =================================================================
    // Force settlements
    // =================================================================

    pub fn insert_settlement(&mut self, request: ForceSettlement) -> Result<()> {
        if self.settlements.contains_key(&request.id) {
            return Err(LiquimatchError::DuplicateOrder(request.id));
        }
        self.settlements.insert(request.id.clone(), request);
        Ok(())
    }

    pub fn settlement(&self, id: &OrderId) -> Result<&ForceSettlement> {
        self.settlements
            .get(id)
            .ok_or_else(|| LiquimatchError::OrderNotFound(id.clone()))
    }

    pub fn settlement_mut(&mut self, id: &OrderId) -> Result<&mut ForceSettlement> {
        self.settlements
            .get_mut(id)
            .ok_or_else(|| LiquimatchError::OrderNotFound(id.clone()))
    }

    pub fn remove_settlement(&mut self, id: &OrderId) -> Result<ForceSettlement> {
        self.settlements
            .remove(id)
            .ok_or_else(|| LiquimatchError::OrderNotFound(id.clone()))
    }

    /// Requests in `symbol`, earliest settlement date first.
    #[must_use]
    pub fn settlements_by_date(&self, symbol: &Symbol) -> Vec<OrderId> {
        let mut due: Vec<&ForceSettlement> = self
            .settlements
            .values()
            .filter(|s| s.balance.symbol == *symbol)
            .collect();
        due.sort_by(|a, b| a.settlement_date.cmp(&b.settlement_date).then_with(|| a.id.cmp(&b.id)));
        due.into_iter().map(|s| s.id.clone()).collect()
    }

    pub fn settlements(&self) -> impl Iterator<Item = &ForceSettlement> {
        self.settlements.values()
    }

    // =================================================================
    // Queries
    // =================================================================

    /// Limit plus margin orders currently stored.
    #[must_use]
    pub fn order_count(&self) -> usize {
        self.limits.len() + self.margins.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.limits.is_empty() && self.margins.is_empty() && self.calls.is_empty() && self.settlements.is_empty()
    }
}
