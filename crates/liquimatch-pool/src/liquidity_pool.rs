//! Two-asset constant-function liquidity pool.
//!
//! ## Curve
//!
//! ```text
//! exchange : out  = rb * (P - P*ib / (ib + in)) / P
//! acquire  : in   = ceil(ib * gross / (rb - gross))
//! limit    : in  <= sqrt(ib * rb * lim_in / lim_out) - ib
//! fund     : mint = supply * (sqrt(P² + P²*in/ib) - P) / P
//! withdraw : out  = rb * (P² - (P - shares*P/supply)²) / P²
//! ```
//!
//! `ib` / `rb` are the input and output reserves, `P` the fixed-point
//! precision. Everything is computed in `u128` with truncating division, so
//! results are identical on every node.
//!
//! ## Fees
//!
//! Swaps charge the trading fee on the gross output. The pool keeps its
//! share, so the output reserve only drops by `gross - fee.pool`.

use liquimatch_types::constants::PERCENT_100;
use liquimatch_types::math::{approx_sqrt, checked_mul, mul_div, mul_div_ceil, narrow, widen};
use liquimatch_types::{Asset, FeeConfig, LiquimatchError, MedianConfig, Price, Result, Symbol};
use serde::{Deserialize, Serialize};

use crate::fees::FeeSplit;
use crate::median::PriceHistory;

// =====================================================================
// Curve math
// =====================================================================

/// Gross output of an exact-input swap, before fees.
pub fn exchange_output(in_reserve: u128, out_reserve: u128, input: u128, precision: u128) -> Result<u128> {
    let denom = in_reserve
        .checked_add(input)
        .ok_or(LiquimatchError::ArithmeticOverflow { op: "exchange reserve" })?;
    let kept = mul_div(precision, in_reserve, denom)?;
    mul_div(out_reserve, precision - kept, precision)
}

/// Input required for a gross output of `gross`, rounded in the pool's favour.
pub fn acquire_input(in_reserve: u128, out_reserve: u128, gross: u128) -> Result<u128> {
    if gross >= out_reserve {
        return Err(LiquimatchError::InsufficientLiquidity {
            reason: format!("cannot acquire {gross} from a reserve of {out_reserve}"),
        });
    }
    mul_div_ceil(in_reserve, gross, out_reserve - gross)
}

/// Largest input whose marginal price still pays at least `lim_out` per
/// `lim_in`.
pub fn limit_amount(in_reserve: u128, out_reserve: u128, lim_in: u128, lim_out: u128) -> Result<u128> {
    let k = checked_mul(in_reserve, out_reserve)?;
    let target = approx_sqrt(mul_div(k, lim_in, lim_out)?);
    Ok(target.saturating_sub(in_reserve))
}

/// Shares minted for a single-sided deposit.
pub fn fund_return(supply: u128, in_reserve: u128, input: u128, precision: u128) -> Result<u128> {
    let p2 = checked_mul(precision, precision)?;
    let growth = mul_div(p2, input, in_reserve)?;
    let root = approx_sqrt(
        p2.checked_add(growth)
            .ok_or(LiquimatchError::ArithmeticOverflow { op: "fund" })?,
    );
    mul_div(supply, root - precision, precision)
}

/// Amount of one asset returned for burning `shares`.
pub fn withdraw_return(supply: u128, out_reserve: u128, shares: u128, precision: u128) -> Result<u128> {
    if shares > supply {
        return Err(LiquimatchError::InvalidAmount {
            reason: format!("withdrawing {shares} shares of a supply of {supply}"),
        });
    }
    let p2 = checked_mul(precision, precision)?;
    let remaining = precision - mul_div(shares, precision, supply)?;
    let remaining_sq = checked_mul(remaining, remaining)?;
    mul_div(out_reserve, p2 - remaining_sq, p2)
}

// =====================================================================
// Swap result
// =====================================================================

/// A priced swap against one pool, computed before it is applied.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Swap {
    pub paid: Asset,
    /// Output before fees.
    pub gross: Asset,
    /// Fee split, in the output asset.
    pub fee: FeeSplit,
    /// Output delivered to the trader: `gross - fee.total`.
    pub received: Asset,
}

impl Swap {
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.paid.amount == 0
    }

    fn empty(input: &Symbol, output: &Symbol) -> Self {
        Self {
            paid: Asset::zero(input),
            gross: Asset::zero(output),
            fee: FeeSplit::default(),
            received: Asset::zero(output),
        }
    }

    #[must_use]
    pub fn fee_asset(&self) -> Asset {
        self.gross.with_amount(self.fee.total)
    }
}

// =====================================================================
// LiquidityPool
// =====================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LiquidityPool {
    pub symbol_a: Symbol,
    pub symbol_b: Symbol,
    pub symbol_liquid: Symbol,
    pub balance_a: i64,
    pub balance_b: i64,
    pub balance_liquid: i64,
    pub hour_median_price: Price,
    pub day_median_price: Price,
    pub price_history: PriceHistory,
}

impl LiquidityPool {
    /// Share asset symbol of the pool over an ordered pair.
    #[must_use]
    pub fn share_symbol(a: &Symbol, b: &Symbol) -> Symbol {
        Symbol(format!("LIQ.{a}.{b}"))
    }

    /// Seed a pool. Symbols are stored in ascending order; initial share
    /// supply is the larger of the two deposits.
    pub fn new(first: &Asset, second: &Asset, median: &MedianConfig) -> Result<Self> {
        if first.symbol == second.symbol {
            return Err(LiquimatchError::InvalidAmount {
                reason: format!("pool needs two distinct assets, got {first} and {second}"),
            });
        }
        for amount in [first, second] {
            liquimatch_types::ensure_positive(amount, "pool reserve")?;
        }
        let (a, b) = if first.symbol < second.symbol {
            (first, second)
        } else {
            (second, first)
        };
        let current = Price::new(a.clone(), b.clone());
        let mut price_history = PriceHistory::new(median.day_window, median.hour_window);
        price_history.record(current.clone());
        Ok(Self {
            symbol_liquid: Self::share_symbol(&a.symbol, &b.symbol),
            symbol_a: a.symbol.clone(),
            symbol_b: b.symbol.clone(),
            balance_a: a.amount,
            balance_b: b.amount,
            balance_liquid: a.amount.max(b.amount),
            hour_median_price: current.clone(),
            day_median_price: current,
            price_history,
        })
    }

    #[must_use]
    pub fn contains(&self, symbol: &Symbol) -> bool {
        *symbol == self.symbol_a || *symbol == self.symbol_b
    }

    fn expect_member(&self, symbol: &Symbol) -> Result<()> {
        if self.contains(symbol) {
            Ok(())
        } else {
            Err(LiquimatchError::SymbolMismatch {
                expected: self.symbol_a.clone(),
                actual: symbol.clone(),
            })
        }
    }

    /// The pool's other asset.
    #[must_use]
    pub fn other(&self, symbol: &Symbol) -> &Symbol {
        if *symbol == self.symbol_a {
            &self.symbol_b
        } else {
            &self.symbol_a
        }
    }

    #[must_use]
    pub fn balance(&self, symbol: &Symbol) -> Asset {
        let amount = if *symbol == self.symbol_a {
            self.balance_a
        } else if *symbol == self.symbol_b {
            self.balance_b
        } else {
            0
        };
        Asset::new(amount, symbol.clone())
    }

    fn adjust_balance(&mut self, delta: &Asset) -> Result<()> {
        self.expect_member(&delta.symbol)?;
        let slot = if delta.symbol == self.symbol_a {
            &mut self.balance_a
        } else {
            &mut self.balance_b
        };
        let next = slot
            .checked_add(delta.amount)
            .ok_or(LiquimatchError::ArithmeticOverflow { op: "pool balance" })?;
        if next <= 0 {
            return Err(LiquimatchError::InsufficientLiquidity {
                reason: format!("pool {} would be drained of {}", self.symbol_liquid, delta.symbol),
            });
        }
        *slot = next;
        Ok(())
    }

    /// `balance_a / balance_b`.
    #[must_use]
    pub fn current_price(&self) -> Price {
        Price::new(self.balance(&self.symbol_a), self.balance(&self.symbol_b))
    }

    /// Spot price with `symbol` as base: what the pool gives of `symbol` per
    /// unit of the other asset.
    #[must_use]
    pub fn base_price(&self, symbol: &Symbol) -> Price {
        Price::new(self.balance(symbol), self.balance(self.other(symbol)))
    }

    fn reserves(&self, input: &Symbol) -> Result<(u128, u128)> {
        self.expect_member(input)?;
        Ok((
            widen(self.balance(input).amount)?,
            widen(self.balance(self.other(input)).amount)?,
        ))
    }

    // -----------------------------------------------------------------
    // Quotes
    // -----------------------------------------------------------------

    fn priced(&self, paid: Asset, gross: i64, fees: &FeeConfig, interface: bool) -> Result<Swap> {
        let out = self.other(&paid.symbol).clone();
        let total = FeeSplit::trading_fee(gross, fees)?;
        let fee = FeeSplit::pool_swap(total, fees, interface)?;
        Ok(Swap {
            paid,
            gross: Asset::new(gross, out.clone()),
            received: Asset::new(gross - total, out),
            fee,
        })
    }

    /// Exact-input swap of `input`.
    pub fn quote_exchange(&self, input: &Asset, fees: &FeeConfig, precision: i64, interface: bool) -> Result<Swap> {
        liquimatch_types::ensure_positive(input, "exchange input")?;
        let (ib, rb) = self.reserves(&input.symbol)?;
        let gross = narrow(exchange_output(ib, rb, widen(input.amount)?, widen(precision)?)?)?;
        self.priced(input.clone(), gross, fees, interface)
    }

    /// Exact-output swap delivering `receive` net of fees.
    pub fn quote_acquire(&self, receive: &Asset, fees: &FeeConfig, interface: bool) -> Result<Swap> {
        liquimatch_types::ensure_positive(receive, "acquire amount")?;
        self.expect_member(&receive.symbol)?;
        let input_symbol = self.other(&receive.symbol).clone();
        let (ib, rb) = self.reserves(&input_symbol)?;
        let gross = narrow(mul_div_ceil(
            widen(receive.amount)?,
            widen(PERCENT_100)?,
            widen(PERCENT_100 - fees.trading_fee_percent)?,
        )?)?;
        let input = narrow(acquire_input(ib, rb, widen(gross)?)?)?;
        let total = gross - receive.amount;
        Ok(Swap {
            paid: Asset::new(input, input_symbol),
            gross: receive.with_amount(gross),
            fee: FeeSplit::pool_swap(total, fees, interface)?,
            received: receive.clone(),
        })
    }

    /// Swap at most `input`, stopping where the marginal price would fall
    /// below `limit`. `limit` may be given in either orientation; it is read
    /// as input per output the way a sell price is. An empty swap means the
    /// pool cannot beat the limit.
    pub fn quote_limit_exchange(
        &self,
        input: &Asset,
        limit: &Price,
        fees: &FeeConfig,
        precision: i64,
        interface: bool,
    ) -> Result<Swap> {
        liquimatch_types::ensure_positive(input, "limit exchange input")?;
        let (ib, rb) = self.reserves(&input.symbol)?;
        let out = self.other(&input.symbol).clone();
        let lim = limit.oriented(&input.symbol)?;
        if lim.quote.symbol != out {
            return Err(LiquimatchError::SymbolMismatch {
                expected: out,
                actual: lim.quote.symbol,
            });
        }
        let (lim_in, lim_out) = (widen(lim.base.amount)?, widen(lim.quote.amount)?);
        // Spot must be strictly better than the limit to trade at all.
        if checked_mul(rb, lim_in)? <= checked_mul(ib, lim_out)? {
            return Ok(Swap::empty(&input.symbol, &out));
        }
        let bound = limit_amount(ib, rb, lim_in, lim_out)?;
        let amount = narrow(bound.min(widen(input.amount)?))?;
        if amount == 0 {
            return Ok(Swap::empty(&input.symbol, &out));
        }
        self.quote_exchange(&input.with_amount(amount), fees, precision, interface)
    }

    /// Apply a previously quoted swap to the reserves.
    pub fn apply_swap(&mut self, swap: &Swap) -> Result<()> {
        if swap.is_empty() {
            return Ok(());
        }
        self.adjust_balance(&swap.paid)?;
        self.adjust_balance(&swap.gross.with_amount(-(swap.gross.amount - swap.fee.pool)))
    }

    // -----------------------------------------------------------------
    // Liquidity
    // -----------------------------------------------------------------

    /// Deposit one asset; returns shares minted.
    pub fn fund(&mut self, input: &Asset, precision: i64) -> Result<Asset> {
        liquimatch_types::ensure_positive(input, "fund amount")?;
        let (ib, _) = self.reserves(&input.symbol)?;
        let minted = narrow(fund_return(
            widen(self.balance_liquid)?,
            ib,
            widen(input.amount)?,
            widen(precision)?,
        )?)?;
        if minted == 0 {
            return Err(LiquimatchError::InvalidAmount {
                reason: format!("deposit of {input} mints no shares"),
            });
        }
        self.adjust_balance(input)?;
        self.balance_liquid += minted;
        Ok(Asset::new(minted, self.symbol_liquid.clone()))
    }

    /// Burn `shares` for one asset; returns the amount paid out.
    pub fn withdraw(&mut self, shares: &Asset, receive: &Symbol, precision: i64) -> Result<Asset> {
        liquimatch_types::ensure_positive(shares, "withdraw shares")?;
        if shares.symbol != self.symbol_liquid {
            return Err(LiquimatchError::SymbolMismatch {
                expected: self.symbol_liquid.clone(),
                actual: shares.symbol.clone(),
            });
        }
        self.expect_member(receive)?;
        let out = narrow(withdraw_return(
            widen(self.balance_liquid)?,
            widen(self.balance(receive).amount)?,
            widen(shares.amount)?,
            widen(precision)?,
        )?)?;
        if out == 0 {
            return Err(LiquimatchError::InvalidAmount {
                reason: format!("burning {shares} returns nothing"),
            });
        }
        let out = Asset::new(out, receive.clone());
        self.adjust_balance(&out.negated())?;
        self.balance_liquid -= shares.amount;
        Ok(out)
    }

    // -----------------------------------------------------------------
    // Medians
    // -----------------------------------------------------------------

    /// Sample the current price and refresh both medians.
    pub fn update_median_prices(&mut self) {
        self.price_history.record(self.current_price());
        if let Some(hour) = self.price_history.hour_median() {
            self.hour_median_price = hour;
        }
        if let Some(day) = self.price_history.day_median() {
            self.day_median_price = day;
        }
    }
}
