//! Interest-bearing credit pool for one base asset.
//!
//! Lenders deposit the base asset and receive credit shares at the pool's
//! current exchange rate `(base + borrowed) / credit`. Interest accrued on
//! loans raises `borrowed` without minting shares, which is how lenders earn.

use chrono::{DateTime, Utc};
use liquimatch_types::constants::PERCENT_100;
use liquimatch_types::math::{mul_div, narrow, widen};
use liquimatch_types::{Asset, CreditConfig, LiquimatchError, Price, Result, Symbol};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreditPool {
    pub base_symbol: Symbol,
    pub credit_symbol: Symbol,
    /// Lent-in funds not currently out on loan.
    pub base_balance: i64,
    /// Outstanding loan principal plus accrued interest.
    pub borrowed_balance: i64,
    pub credit_balance: i64,
    /// Base per credit share at the last lend or withdraw.
    pub last_price: Price,
    pub last_interest_rate: i64,
}

impl CreditPool {
    #[must_use]
    pub fn share_symbol(base: &Symbol) -> Symbol {
        Symbol(format!("CR.{base}"))
    }

    #[must_use]
    pub fn new(base: &Symbol, config: &CreditConfig) -> Self {
        let credit_symbol = Self::share_symbol(base);
        Self {
            base_symbol: base.clone(),
            last_price: Price::new(Asset::new(1, base.clone()), Asset::new(1, credit_symbol.clone())),
            credit_symbol,
            base_balance: 0,
            borrowed_balance: 0,
            credit_balance: 0,
            last_interest_rate: config.min_interest,
        }
    }

    /// `base_balance + borrowed_balance`.
    pub fn total_base(&self) -> Result<i64> {
        self.base_balance
            .checked_add(self.borrowed_balance)
            .ok_or(LiquimatchError::ArithmeticOverflow { op: "credit pool total" })
    }

    /// Base per credit share; 1:1 while the pool is empty.
    pub fn current_price(&self) -> Result<Price> {
        if self.credit_balance == 0 {
            return Ok(Price::new(
                Asset::new(1, self.base_symbol.clone()),
                Asset::new(1, self.credit_symbol.clone()),
            ));
        }
        Ok(Price::new(
            Asset::new(self.total_base()?, self.base_symbol.clone()),
            Asset::new(self.credit_balance, self.credit_symbol.clone()),
        ))
    }

    /// Deposit `input`; returns the credit shares minted.
    pub fn lend(&mut self, input: &Asset) -> Result<Asset> {
        self.expect_base(input)?;
        liquimatch_types::ensure_positive(input, "lend amount")?;
        let total = self.total_base()?;
        let shares = if self.credit_balance == 0 || total == 0 {
            input.amount
        } else {
            narrow(mul_div(
                widen(input.amount)?,
                widen(self.credit_balance)?,
                widen(total)?,
            )?)?
        };
        if shares == 0 {
            return Err(LiquimatchError::InvalidAmount {
                reason: format!("lending {input} mints no credit shares"),
            });
        }
        self.base_balance += input.amount;
        self.credit_balance += shares;
        self.last_price = self.current_price()?;
        Ok(Asset::new(shares, self.credit_symbol.clone()))
    }

    /// Burn `shares`; returns the base asset owed. Only the un-borrowed
    /// balance can be paid out.
    pub fn withdraw(&mut self, shares: &Asset) -> Result<Asset> {
        if shares.symbol != self.credit_symbol {
            return Err(LiquimatchError::SymbolMismatch {
                expected: self.credit_symbol.clone(),
                actual: shares.symbol.clone(),
            });
        }
        liquimatch_types::ensure_positive(shares, "credit shares")?;
        if shares.amount > self.credit_balance {
            return Err(LiquimatchError::InvalidAmount {
                reason: format!("{shares} exceeds credit supply {}", self.credit_balance),
            });
        }
        let amount = narrow(mul_div(
            widen(shares.amount)?,
            widen(self.total_base()?)?,
            widen(self.credit_balance)?,
        )?)?;
        if amount > self.base_balance {
            return Err(LiquimatchError::InsufficientLiquidity {
                reason: format!(
                    "credit pool {} holds {} un-borrowed, {amount} requested",
                    self.base_symbol, self.base_balance
                ),
            });
        }
        self.base_balance -= amount;
        self.credit_balance -= shares.amount;
        self.last_price = self.current_price()?;
        Ok(Asset::new(amount, self.base_symbol.clone()))
    }

    /// `min(min + var * (borrowed + P) / (base + P), max)`.
    pub fn interest_rate(&self, config: &CreditConfig, precision: i64) -> Result<i64> {
        let variable = mul_div(
            widen(config.variable_interest)?,
            widen(self.borrowed_balance)? + widen(precision)?,
            widen(self.base_balance)? + widen(precision)?,
        )?;
        let rate = widen(config.min_interest)?.saturating_add(variable);
        narrow(rate.min(widen(config.max_interest)?))
    }

    /// Move `amount` from the idle balance to borrowed.
    pub fn draw(&mut self, amount: &Asset) -> Result<()> {
        self.expect_base(amount)?;
        if amount.amount > self.base_balance {
            return Err(LiquimatchError::InsufficientLiquidity {
                reason: format!(
                    "credit pool {} holds {}, cannot lend {amount}",
                    self.base_symbol, self.base_balance
                ),
            });
        }
        self.base_balance -= amount.amount;
        self.borrowed_balance += amount.amount;
        Ok(())
    }

    /// Settle `debt` of outstanding borrowing with `returned` base asset.
    /// `returned` may be less than `debt` (interest fee withheld).
    pub fn settle(&mut self, debt: &Asset, returned: &Asset) -> Result<()> {
        self.expect_base(debt)?;
        self.expect_base(returned)?;
        self.borrowed_balance = self
            .borrowed_balance
            .checked_sub(debt.amount)
            .filter(|b| *b >= 0)
            .ok_or_else(|| LiquimatchError::InvariantViolation {
                reason: format!(
                    "credit pool {} repaid {debt} with only {} borrowed",
                    self.base_symbol, self.borrowed_balance
                ),
            })?;
        self.base_balance += returned.amount;
        Ok(())
    }

    /// Record accrued interest as additional borrowing.
    pub fn accrue(&mut self, interest: &Asset) -> Result<()> {
        self.expect_base(interest)?;
        self.borrowed_balance = self
            .borrowed_balance
            .checked_add(interest.amount)
            .ok_or(LiquimatchError::ArithmeticOverflow { op: "accrue" })?;
        Ok(())
    }

    fn expect_base(&self, amount: &Asset) -> Result<()> {
        if amount.symbol != self.base_symbol {
            return Err(LiquimatchError::SymbolMismatch {
                expected: self.base_symbol.clone(),
                actual: amount.symbol.clone(),
            });
        }
        Ok(())
    }
}

/// Interest owed on `debt` at `rate` for `elapsed_secs`.
pub fn accrued_interest(debt: i64, rate: i64, elapsed_secs: i64) -> Result<i64> {
    let per_year = widen(liquimatch_types::constants::SECONDS_PER_YEAR)? * widen(PERCENT_100)?;
    let numerator = widen(debt)?
        .checked_mul(widen(rate)?)
        .ok_or(LiquimatchError::ArithmeticOverflow { op: "interest" })?;
    narrow(mul_div(numerator, widen(elapsed_secs)?, per_year)?)
}

/// Interest to charge now, or zero while the interval has not elapsed or
/// the amount does not exceed the dust floor.
pub fn interest_due(
    debt: i64,
    rate: i64,
    last: DateTime<Utc>,
    now: DateTime<Utc>,
    config: &CreditConfig,
) -> Result<i64> {
    let elapsed = (now - last).num_seconds();
    if elapsed < config.interest_min_interval_secs {
        return Ok(0);
    }
    let interest = accrued_interest(debt, rate, elapsed)?;
    Ok(if interest <= config.interest_min_amount { 0 } else { interest })
}
