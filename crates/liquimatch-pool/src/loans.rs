//! Credit loans: borrowing from a credit pool against collateral.
//!
//! ```text
//! open      : collateral locked, debt drawn from the pool and released
//! update    : borrow more / repay part / add or remove collateral
//! close     : debt + interest repaid, interest fee burned, collateral back
//! liquidate : collateral sold through the pools, deficit written off
//! ```
//!
//! Loans opened as flash loans must be closed in the same transaction.

use chrono::{DateTime, Utc};
use liquimatch_ledger::TxContext;
use liquimatch_types::constants::PERCENT_100;
use liquimatch_types::{
    Asset, CreditConfig, CreditLoan, EngineConfig, LiquimatchError, OrderId, Price, Result, Symbol,
    VirtualOp,
};

use crate::credit_pool::interest_due;
use crate::pools::{PoolSet, final_output};
use crate::risk::credit_check;

impl PoolSet {
    pub fn loan(&self, id: &OrderId) -> Result<&CreditLoan> {
        self.loans
            .get(id)
            .ok_or_else(|| LiquimatchError::LoanNotFound(id.clone()))
    }

    pub fn loan_mut(&mut self, id: &OrderId) -> Result<&mut CreditLoan> {
        self.loans
            .get_mut(id)
            .ok_or_else(|| LiquimatchError::LoanNotFound(id.clone()))
    }

    pub fn loans(&self) -> impl Iterator<Item = &CreditLoan> {
        self.loans.values()
    }

    /// Loan ids ordered by debt symbol, then collateral symbol, then id.
    #[must_use]
    pub fn loan_ids_by_debt(&self) -> Vec<(Symbol, Vec<OrderId>)> {
        let mut keyed: Vec<(&Symbol, &Symbol, &OrderId)> = self
            .loans
            .values()
            .map(|l| (l.debt_symbol(), l.collateral_symbol(), &l.id))
            .collect();
        keyed.sort();
        let mut groups: Vec<(Symbol, Vec<OrderId>)> = Vec::new();
        for (debt, _, id) in keyed {
            match groups.last_mut() {
                Some((symbol, ids)) if symbol == debt => ids.push(id.clone()),
                _ => groups.push((debt.clone(), vec![id.clone()])),
            }
        }
        groups
    }

    /// `collateral / max_debt`, where `max_debt` is the median value of the
    /// collateral divided by the liquidation ratio. A loan whose
    /// `collateral / debt` falls below this is liquidated.
    pub fn liquidation_price(&self, config: &EngineConfig, collateral: &Asset, debt_symbol: &Symbol) -> Result<Price> {
        let value = self.median_value(collateral, debt_symbol, &config.core_symbol)?;
        let max_debt = value.scale(PERCENT_100, config.credit.credit_liquidation_ratio)?;
        Ok(Price::new(collateral.clone(), max_debt))
    }

    fn ensure_open_ratio(&self, config: &EngineConfig, debt: &Asset, collateral: &Asset) -> Result<()> {
        let value = self.median_value(collateral, &debt.symbol, &config.core_symbol)?;
        let required = debt.scale(config.credit.credit_open_ratio, PERCENT_100)?;
        if value.amount < required.amount {
            return Err(LiquimatchError::InsufficientCollateral {
                reason: format!("{collateral} is worth {value}, loan of {debt} needs {required}"),
            });
        }
        Ok(())
    }

    /// Charge interest on one loan at `rate`. Returns the interest added.
    pub fn accrue_loan(&mut self, id: &OrderId, rate: i64, now: DateTime<Utc>, config: &CreditConfig) -> Result<Asset> {
        let loan = self.loan(id)?;
        let interest = loan.debt.with_amount(interest_due(
            loan.debt.amount,
            rate,
            loan.last_interest_time,
            now,
            config,
        )?);
        if interest.amount == 0 {
            return Ok(interest);
        }
        self.credit_pool_mut(&interest.symbol)?.accrue(&interest)?;
        let loan = self.loan_mut(id)?;
        loan.debt.add_assign(&interest)?;
        loan.interest.add_assign(&interest)?;
        loan.last_interest_time = now;
        loan.last_interest_rate = rate;
        loan.refresh_loan_price();
        Ok(interest)
    }

    fn accrue_at_pool_rate(&mut self, ctx: &TxContext<'_>, id: &OrderId) -> Result<()> {
        let config = ctx.config;
        let symbol = self.loan(id)?.debt_symbol().clone();
        let rate = self
            .credit_pool(&symbol)?
            .interest_rate(&config.credit, config.precision)?;
        self.accrue_loan(id, rate, ctx.now, &config.credit)?;
        Ok(())
    }

    /// Take `repaid` from the owner into the pool. Interest is repaid first;
    /// the network's fee on it is burned. Returns the fee.
    fn repay_into_pool(&mut self, ctx: &mut TxContext<'_>, loan: &mut CreditLoan, repaid: &Asset) -> Result<Asset> {
        ctx.ledger.lock(loan.owner(), repaid)?;
        let interest_part = repaid.min(&loan.interest)?;
        let fee = Self::interest_fee(&interest_part, ctx.config.fees.interest_fee_percent)?;
        self.credit_pool_mut(&repaid.symbol)?
            .settle(repaid, &repaid.checked_sub(&fee)?)?;
        ctx.ledger.burn_pending(&fee)?;
        loan.interest.sub_assign(&interest_part)?;
        Ok(fee)
    }

    // =================================================================
    // Operations
    // =================================================================

    pub fn open_credit_loan(
        &mut self,
        ctx: &mut TxContext<'_>,
        id: OrderId,
        debt: &Asset,
        collateral: &Asset,
        flash_loan: bool,
    ) -> Result<()> {
        let config = ctx.config;
        if self.loans.contains_key(&id) {
            return Err(LiquimatchError::DuplicateOrder(id));
        }
        liquimatch_types::ensure_positive(debt, "loan amount")?;
        liquimatch_types::ensure_positive(collateral, "loan collateral")?;
        if debt.symbol == collateral.symbol {
            return Err(LiquimatchError::InvalidAmount {
                reason: format!("loan of {debt} cannot be collateralized by itself"),
            });
        }
        if self.has_defaulted(&id.owner) {
            return Err(LiquimatchError::CreditCheckFailed {
                reason: format!("{} has unpaid credit defaults", id.owner),
            });
        }
        credit_check(self, config, debt, collateral)?;
        self.ensure_open_ratio(config, debt, collateral)?;

        let rate = self
            .credit_pool(&debt.symbol)?
            .interest_rate(&config.credit, config.precision)?;
        self.credit_pool_mut(&debt.symbol)?.draw(debt)?;
        ctx.ledger.lock(&id.owner, collateral)?;
        ctx.ledger.release(&id.owner, debt)?;

        let loan = CreditLoan {
            id: id.clone(),
            debt: debt.clone(),
            interest: Asset::zero(&debt.symbol),
            collateral: collateral.clone(),
            loan_price: Price::new(collateral.clone(), debt.clone()),
            liquidation_price: self.liquidation_price(config, collateral, &debt.symbol)?,
            last_interest_rate: rate,
            last_interest_time: ctx.now,
            flash_loan,
            created: ctx.now,
        };
        tracing::info!(loan = %id, debt = %debt, collateral = %collateral, flash_loan, "Credit loan opened");
        ctx.emit(VirtualOp::LoanOpened {
            loan: id.clone(),
            debt: debt.clone(),
            collateral: collateral.clone(),
        });
        self.loans.insert(id, loan);
        Ok(())
    }

    /// Borrow more (`debt_delta > 0`), repay part (`< 0`), and add or remove
    /// collateral. Repaying the whole debt closes the loan.
    pub fn update_credit_loan(
        &mut self,
        ctx: &mut TxContext<'_>,
        id: &OrderId,
        debt_delta: &Asset,
        collateral_delta: &Asset,
    ) -> Result<()> {
        let config = ctx.config;
        self.accrue_at_pool_rate(ctx, id)?;
        let mut loan = self.loan(id)?.clone();
        if debt_delta.symbol != loan.debt.symbol || collateral_delta.symbol != loan.collateral.symbol {
            return Err(LiquimatchError::SymbolMismatch {
                expected: loan.debt.symbol.clone(),
                actual: debt_delta.symbol.clone(),
            });
        }
        if debt_delta.is_zero() && collateral_delta.is_zero() {
            return Err(LiquimatchError::InvalidAmount {
                reason: "loan update changes nothing".into(),
            });
        }
        let new_debt = loan.debt.checked_add(debt_delta)?;
        let new_collateral = loan.collateral.checked_add(collateral_delta)?;
        if new_debt.amount < 0 || new_collateral.amount < 0 {
            return Err(LiquimatchError::InvalidAmount {
                reason: format!("loan {id} cannot go to {new_debt} against {new_collateral}"),
            });
        }
        if new_debt.amount == 0 {
            if collateral_delta.amount > 0 {
                return Err(LiquimatchError::InvalidAmount {
                    reason: "cannot add collateral while repaying in full".into(),
                });
            }
            self.close_credit_loan(ctx, id)?;
            return Ok(());
        }
        if debt_delta.amount > 0 || collateral_delta.amount < 0 {
            if debt_delta.amount > 0 && self.has_defaulted(&id.owner) {
                return Err(LiquimatchError::CreditCheckFailed {
                    reason: format!("{} has unpaid credit defaults", id.owner),
                });
            }
            credit_check(self, config, &new_debt, &new_collateral)?;
            self.ensure_open_ratio(config, &new_debt, &new_collateral)?;
        }

        if debt_delta.amount > 0 {
            self.credit_pool_mut(&debt_delta.symbol)?.draw(debt_delta)?;
            ctx.ledger.release(&id.owner, debt_delta)?;
        } else if debt_delta.amount < 0 {
            self.repay_into_pool(ctx, &mut loan, &debt_delta.negated())?;
        }
        if collateral_delta.amount > 0 {
            ctx.ledger.lock(&id.owner, collateral_delta)?;
        } else {
            ctx.ledger.release(&id.owner, &collateral_delta.negated())?;
        }

        loan.debt = new_debt;
        loan.collateral = new_collateral;
        loan.refresh_loan_price();
        loan.liquidation_price = self.liquidation_price(config, &loan.collateral, loan.debt_symbol())?;
        tracing::debug!(loan = %id, debt = %loan.debt, collateral = %loan.collateral, "Credit loan updated");
        ctx.emit(VirtualOp::LoanUpdated {
            loan: id.clone(),
            debt: loan.debt.clone(),
            collateral: loan.collateral.clone(),
        });
        self.loans.insert(id.clone(), loan);
        Ok(())
    }

    /// Repay the loan in full and return its collateral. Returns the amount
    /// repaid.
    pub fn close_credit_loan(&mut self, ctx: &mut TxContext<'_>, id: &OrderId) -> Result<Asset> {
        self.accrue_at_pool_rate(ctx, id)?;
        let mut loan = self
            .loans
            .remove(id)
            .ok_or_else(|| LiquimatchError::LoanNotFound(id.clone()))?;
        let repaid = loan.debt.clone();
        let interest = loan.interest.clone();
        let fee = self.repay_into_pool(ctx, &mut loan, &repaid)?;
        ctx.ledger.release(&id.owner, &loan.collateral)?;
        tracing::info!(loan = %id, repaid = %repaid, interest = %interest, fee = %fee, "Credit loan closed");
        ctx.emit(VirtualOp::LoanRepaid {
            loan: id.clone(),
            repaid: repaid.clone(),
            interest_fee: fee,
            collateral_returned: loan.collateral,
        });
        Ok(repaid)
    }

    /// Sell the collateral for the debt asset and repay the pool. A
    /// shortfall is issued to the pool and recorded against the borrower; a
    /// surplus stays with the pool's lenders.
    pub fn liquidate_credit_loan(&mut self, ctx: &mut TxContext<'_>, id: &OrderId) -> Result<()> {
        let loan = self
            .loans
            .remove(id)
            .ok_or_else(|| LiquimatchError::LoanNotFound(id.clone()))?;
        let swaps = self.swap_pending(ctx, &loan.collateral, loan.debt_symbol(), None)?;
        let proceeds = final_output(&swaps, loan.debt_symbol());
        let deficit = loan
            .debt
            .with_amount((loan.debt.amount - proceeds.amount).max(0));
        self.record_default(ctx, &id.owner, &deficit)?;
        let returned = proceeds.checked_add(&deficit)?;
        self.credit_pool_mut(loan.debt_symbol())?
            .settle(&loan.debt, &returned)?;
        let debt_repaid = proceeds.min(&loan.debt)?;
        tracing::info!(
            loan = %id,
            collateral = %loan.collateral,
            proceeds = %proceeds,
            deficit = %deficit,
            "Credit loan liquidated"
        );
        ctx.emit(VirtualOp::LoanLiquidated {
            loan: id.clone(),
            collateral_sold: loan.collateral,
            debt_repaid,
            default: deficit,
        });
        Ok(())
    }

    /// Every flash loan must be gone by the end of its transaction.
    pub fn check_flash_loans(&self) -> Result<()> {
        if let Some(loan) = self.loans.values().find(|l| l.flash_loan) {
            tracing::error!(loan = %loan.id, debt = %loan.debt, "Flash loan left unpaid");
            return Err(LiquimatchError::UnpaidFlashLoan(loan.id.clone()));
        }
        Ok(())
    }
}
