//! Option pools: monthly call and put series listed around a liquidity
//! pool's day median price, and the option orders that write them.
//!
//! ```text
//! create   : list `series_months` monthly expirations at the day median
//! write    : writer locks underlying, receives option units
//! exercise : holder burns units and pays the strike, writers deliver FIFO
//! expire   : orders closed (underlying back to writers), option balances
//!            wiped, the series relisted `series_months` later
//! ```
//!
//! Option units in circulation always equal the units outstanding across
//! that series' orders.

use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Datelike, Months, NaiveDate, Utc};
use liquimatch_ledger::TxContext;
use liquimatch_types::constants::PERCENT_100;
use liquimatch_types::math::{mul_div, narrow, widen};
use liquimatch_types::{
    AccountName, Asset, CancelReason, DerivativeConfig, LiquimatchError, OptionOrder, OptionStrike, OrderId,
    OrderKind, Price, Result, Symbol, VirtualOp,
};
use serde::{Deserialize, Serialize};

use crate::pools::{PoolSet, clear_asset_balances, pair_key};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OptionPool {
    pub base_symbol: Symbol,
    pub quote_symbol: Symbol,
    /// Listed series by option symbol.
    pub series: BTreeMap<Symbol, OptionStrike>,
}

impl OptionPool {
    #[must_use]
    pub fn new(base: &Symbol, quote: &Symbol) -> Self {
        Self {
            base_symbol: base.clone(),
            quote_symbol: quote.clone(),
            series: BTreeMap::new(),
        }
    }

    /// List a call and a put at `mid ± i * width` for `i` in
    /// `-num_strikes..=num_strikes`. Returns the symbols not already listed.
    pub fn add_strikes(
        &mut self,
        mid: &Price,
        expiration: DateTime<Utc>,
        config: &DerivativeConfig,
        multiple: i64,
    ) -> Result<Vec<Symbol>> {
        let width = mid.base.scale(config.strike_width_percent, PERCENT_100)?.amount;
        let n = i64::from(config.num_strikes);
        let mut listed = Vec::new();
        for i in -n..=n {
            let amount = i
                .checked_mul(width)
                .and_then(|offset| mid.base.amount.checked_add(offset))
                .ok_or(LiquimatchError::ArithmeticOverflow { op: "strike ladder" })?;
            if amount <= 0 {
                continue;
            }
            let strike_price = Price::new(mid.base.with_amount(amount), mid.quote.clone());
            for call in [true, false] {
                let strike = OptionStrike::new(strike_price.clone(), call, multiple, expiration);
                let symbol = strike.symbol();
                if !self.series.contains_key(&symbol) {
                    self.series.insert(symbol.clone(), strike);
                    listed.push(symbol);
                }
            }
        }
        Ok(listed)
    }

    /// Unlist and return every series expired at `now`.
    pub fn expire_strikes(&mut self, now: DateTime<Utc>) -> Vec<OptionStrike> {
        let expired: Vec<Symbol> = self
            .series
            .iter()
            .filter(|(_, strike)| strike.is_expired(now))
            .map(|(symbol, _)| symbol.clone())
            .collect();
        expired
            .iter()
            .filter_map(|symbol| self.series.remove(symbol))
            .collect()
    }

    #[must_use]
    pub fn expirations(&self) -> BTreeSet<DateTime<Utc>> {
        self.series.values().map(|s| s.expiration).collect()
    }
}

/// Midnight UTC on the first day of each of the `months` months after `now`.
pub fn series_expirations(now: DateTime<Utc>, months: u32) -> Result<Vec<DateTime<Utc>>> {
    let first = NaiveDate::from_ymd_opt(now.year(), now.month(), 1)
        .ok_or_else(|| LiquimatchError::Internal(format!("no first of month for {now}")))?;
    (1..=months)
        .map(|m| {
            first
                .checked_add_months(Months::new(m))
                .and_then(|d| d.and_hms_opt(0, 0, 0))
                .map(|d| d.and_utc())
                .ok_or_else(|| LiquimatchError::Internal(format!("expiration {m} months after {now} overflows")))
        })
        .collect()
}

/// What one option expiry pass did.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct OptionExpiry {
    pub expired: Vec<Symbol>,
    pub listed: Vec<Symbol>,
    pub orders_closed: usize,
}

impl PoolSet {
    pub fn option_pool(&self, base: &Symbol, quote: &Symbol) -> Result<&OptionPool> {
        self.options
            .get(&pair_key(base, quote))
            .ok_or_else(|| LiquimatchError::OptionPoolNotFound {
                a: base.clone(),
                b: quote.clone(),
            })
    }

    pub fn option_pools(&self) -> impl Iterator<Item = &OptionPool> {
        self.options.values()
    }

    pub fn option_order(&self, id: &OrderId) -> Result<&OptionOrder> {
        self.option_orders
            .get(id)
            .ok_or_else(|| LiquimatchError::OrderNotFound(id.clone()))
    }

    pub fn option_orders(&self) -> impl Iterator<Item = &OptionOrder> {
        self.option_orders.values()
    }

    /// The listed series behind an option symbol.
    pub fn option_strike(&self, symbol: &Symbol) -> Result<&OptionStrike> {
        self.options
            .values()
            .find_map(|pool| pool.series.get(symbol))
            .ok_or_else(|| LiquimatchError::OptionNotFound(symbol.clone()))
    }

    /// Day median of the `base / quote` liquidity pool, quoted per
    /// `precision` units of quote.
    fn option_mid_price(&self, base: &Symbol, quote: &Symbol, precision: i64) -> Result<Price> {
        let unit = Asset::new(precision, quote.clone());
        let mid = self.liquidity_pool(base, quote)?.day_median_price.mul(&unit)?;
        if mid.amount <= 0 {
            return Err(LiquimatchError::InsufficientLiquidity {
                reason: format!("no day median for {base}/{quote} to list options at"),
            });
        }
        Ok(Price::new(mid, unit))
    }

    fn option_multiple(ctx: &TxContext<'_>) -> Result<i64> {
        ctx.config
            .derivatives
            .option_multiple
            .checked_mul(ctx.config.precision)
            .ok_or(LiquimatchError::ArithmeticOverflow { op: "option multiple" })
    }

    /// Open the option pool over the pair of an existing liquidity pool and
    /// list its first year of series. Returns the listed option symbols; the
    /// caller registers them.
    pub fn create_option_pool(&mut self, ctx: &mut TxContext<'_>, base: &Symbol, quote: &Symbol) -> Result<Vec<Symbol>> {
        let key = pair_key(base, quote);
        if self.options.contains_key(&key) {
            return Err(LiquimatchError::DuplicatePool { a: key.0, b: key.1 });
        }
        let derivatives = &ctx.config.derivatives;
        let mid = self.option_mid_price(base, quote, ctx.config.precision)?;
        let multiple = Self::option_multiple(ctx)?;
        let mut pool = OptionPool::new(base, quote);
        let mut listed = Vec::new();
        for expiration in series_expirations(ctx.now, derivatives.series_months)? {
            listed.extend(pool.add_strikes(&mid, expiration, derivatives, multiple)?);
        }
        tracing::info!(base = %base, quote = %quote, mid = %mid, series = listed.len(), "Option pool created");
        self.options.insert(key, pool);
        Ok(listed)
    }

    /// Write more options (positive `delta`) or buy written options back
    /// (negative). An order bought back to zero units is closed.
    pub fn update_option_order(&mut self, ctx: &mut TxContext<'_>, id: OrderId, delta: &Asset) -> Result<()> {
        if delta.amount == 0 {
            return Err(LiquimatchError::InvalidAmount {
                reason: format!("option order {id} change is zero"),
            });
        }
        let strike = self.option_strike(&delta.symbol)?.clone();
        if strike.is_expired(ctx.now) {
            return Err(LiquimatchError::OptionExpired(delta.symbol.clone()));
        }
        let mut order = match self.option_orders.get(&id) {
            Some(existing) if existing.option_symbol != delta.symbol => {
                return Err(LiquimatchError::SymbolMismatch {
                    expected: existing.option_symbol.clone(),
                    actual: delta.symbol.clone(),
                });
            }
            Some(existing) => existing.clone(),
            None if delta.amount < 0 => return Err(LiquimatchError::OrderNotFound(id)),
            None => OptionOrder {
                id: id.clone(),
                option_symbol: delta.symbol.clone(),
                units: 0,
                underlying: Asset::zero(strike.underlying_symbol()),
                created: ctx.now,
                last_updated: ctx.now,
            },
        };

        let underlying_delta = if delta.amount > 0 {
            let locked = strike.underlying(delta.amount)?;
            ctx.ledger.lock(order.owner(), &locked)?;
            ctx.ledger.issue(order.owner(), delta)?;
            order.underlying.add_assign(&locked)?;
            order.units += delta.amount;
            locked
        } else {
            let units = -delta.amount;
            if units > order.units {
                return Err(LiquimatchError::InvalidAmount {
                    reason: format!("order {id} has {} units written, cannot buy back {units}", order.units),
                });
            }
            let released = writer_share(&order, units)?;
            ctx.ledger.burn(order.owner(), &delta.negated())?;
            ctx.ledger.release(order.owner(), &released)?;
            order.underlying.sub_assign(&released)?;
            order.units -= units;
            released.negated()
        };
        order.last_updated = ctx.now;
        tracing::debug!(order = %id, option = %delta, underlying = %underlying_delta, "Option order updated");
        ctx.emit(VirtualOp::OptionWritten {
            order: id.clone(),
            option: delta.clone(),
            underlying: underlying_delta,
        });
        if order.units == 0 {
            self.option_orders.remove(&id);
        } else {
            self.option_orders.insert(id, order);
        }
        Ok(())
    }

    /// Exercise `option` units held by `account`: the holder pays the strike
    /// and takes the underlying from the series' writers, oldest order
    /// first. Returns the underlying received.
    pub fn exercise_option(
        &mut self,
        ctx: &mut TxContext<'_>,
        account: &AccountName,
        option: &Asset,
    ) -> Result<Asset> {
        liquimatch_types::ensure_positive(option, "options exercised")?;
        let strike = self.option_strike(&option.symbol)?.clone();
        if strike.is_expired(ctx.now) {
            return Err(LiquimatchError::OptionExpired(option.symbol.clone()));
        }
        let payment = strike.exercise_payment(option.amount)?;
        ctx.ledger.burn(account, option)?;
        ctx.ledger.lock(account, &payment)?;

        let mut writers: Vec<&OptionOrder> = self
            .option_orders
            .values()
            .filter(|o| o.option_symbol == option.symbol)
            .collect();
        writers.sort_by(|a, b| (a.created, &a.id).cmp(&(b.created, &b.id)));
        let writers: Vec<OrderId> = writers.into_iter().map(|o| o.id.clone()).collect();

        let mut remaining = option.amount;
        let mut payment_left = payment.clone();
        let mut received = Asset::zero(strike.underlying_symbol());
        for id in writers {
            if remaining == 0 {
                break;
            }
            let order = self.option_order(&id)?.clone();
            let units = remaining.min(order.units);
            let delivered = writer_share(&order, units)?;
            let paid = if units == remaining {
                payment_left.clone()
            } else {
                payment.with_amount(narrow(mul_div(
                    widen(payment.amount)?,
                    widen(units)?,
                    widen(option.amount)?,
                )?)?)
            };
            ctx.ledger.release(order.owner(), &paid)?;
            payment_left.sub_assign(&paid)?;
            received.add_assign(&delivered)?;
            remaining -= units;
            ctx.emit(VirtualOp::OptionAssigned {
                order: id.clone(),
                delivered: delivered.clone(),
                received: paid,
            });
            if units == order.units {
                self.option_orders.remove(&id);
            } else if let Some(o) = self.option_orders.get_mut(&id) {
                o.units -= units;
                o.underlying.sub_assign(&delivered)?;
                o.last_updated = ctx.now;
            }
        }
        liquimatch_types::ensure_invariant(remaining == 0, || {
            format!("{remaining} units of {} exercised without a writer", option.symbol)
        })?;
        ctx.ledger.release(account, &received)?;
        tracing::debug!(account = %account, option = %option, paid = %payment, received = %received, "Option exercised");
        ctx.emit(VirtualOp::OptionExercised {
            account: account.clone(),
            option: option.clone(),
            paid: payment,
            received: received.clone(),
        });
        Ok(received)
    }

    /// Option symbols whose series have expired at `now`.
    #[must_use]
    pub fn expired_option_series(&self, now: DateTime<Utc>) -> Vec<Symbol> {
        self.options
            .values()
            .flat_map(|pool| pool.series.iter())
            .filter(|(_, strike)| strike.is_expired(now))
            .map(|(symbol, _)| symbol.clone())
            .collect()
    }

    /// Close every expired series: orders return their underlying, option
    /// balances are wiped, and each expired month is relisted at the current
    /// day median `series_months` later. Book orders in the expired symbols
    /// must already be cancelled.
    pub fn expire_option_series(&mut self, ctx: &mut TxContext<'_>) -> Result<OptionExpiry> {
        let mut expiry = OptionExpiry::default();
        let keys: Vec<(Symbol, Symbol)> = self.options.keys().cloned().collect();
        let multiple = Self::option_multiple(ctx)?;
        for key in keys {
            let Some(pool) = self.options.get_mut(&key) else {
                continue;
            };
            let expired = pool.expire_strikes(ctx.now);
            if expired.is_empty() {
                continue;
            }
            let (base, quote) = (pool.base_symbol.clone(), pool.quote_symbol.clone());
            for strike in &expired {
                let symbol = strike.symbol();
                expiry.orders_closed += self.close_option_orders(ctx, &symbol)?;
                clear_asset_balances(ctx, &symbol)?;
                expiry.expired.push(symbol);
            }

            let months = Months::new(ctx.config.derivatives.series_months);
            let relist: BTreeSet<DateTime<Utc>> = expired
                .iter()
                .map(|s| s.expiration.checked_add_months(months))
                .collect::<Option<_>>()
                .ok_or(LiquimatchError::ArithmeticOverflow { op: "option relist date" })?;
            let mid = self.option_mid_price(&base, &quote, ctx.config.precision)?;
            let pool = self
                .options
                .get_mut(&key)
                .ok_or_else(|| LiquimatchError::OptionPoolNotFound { a: base.clone(), b: quote.clone() })?;
            for expiration in relist {
                expiry
                    .listed
                    .extend(pool.add_strikes(&mid, expiration, &ctx.config.derivatives, multiple)?);
            }
            tracing::info!(
                base = %base,
                quote = %quote,
                expired = expired.len(),
                listed = expiry.listed.len(),
                "Option series rolled"
            );
        }
        Ok(expiry)
    }

    fn close_option_orders(&mut self, ctx: &mut TxContext<'_>, symbol: &Symbol) -> Result<usize> {
        let ids: Vec<OrderId> = self
            .option_orders
            .values()
            .filter(|o| o.option_symbol == *symbol)
            .map(|o| o.id.clone())
            .collect();
        for id in &ids {
            let Some(order) = self.option_orders.remove(id) else {
                continue;
            };
            ctx.ledger.release(order.owner(), &order.underlying)?;
            ctx.emit(VirtualOp::OrderCancelled {
                owner: order.owner().clone(),
                order: id.clone(),
                kind: OrderKind::Option,
                refunded: order.underlying.clone(),
                reason: CancelReason::Expired,
            });
        }
        Ok(ids.len())
    }
}

/// The part of an order's locked underlying backing `units` of its options.
/// Taking every unit takes the whole balance.
fn writer_share(order: &OptionOrder, units: i64) -> Result<Asset> {
    if units == order.units {
        return Ok(order.underlying.clone());
    }
    let share = mul_div(
        widen(order.underlying.amount)?,
        widen(units)?,
        widen(order.units)?,
    )?;
    Ok(order.underlying.with_amount(narrow(share)?))
}
