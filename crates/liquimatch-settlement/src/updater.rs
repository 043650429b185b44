//! Periodic interest accrual and liquidation of credit loans and margin
//! orders.
//!
//! Positions are visited grouped by debt asset so the pool's interest rate
//! is read once per group. Each visit accrues interest, revalues the
//! position at median prices and liquidates it when it has fallen below its
//! liquidation threshold:
//!
//! ```text
//! credit loan  : collateral / debt  <  liquidation price
//! margin order : collateralization  <  margin_liquidation_ratio
//!                or a stop-loss / take-profit trigger is crossed
//! ```

use std::collections::BTreeMap;

use liquimatch_ledger::TxContext;
use liquimatch_matchcore::{
    MarginExit, MarginTriggers, MarketState, accrue_margin, close_margin_position, liquidate_margin_order,
    position_price, refresh_margin_valuation,
};
use liquimatch_types::{Asset, OrderId, Result, Symbol, VirtualOp};
use serde::Serialize;

/// Counts from one updater pass.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct UpdateSummary {
    /// Positions charged non-zero interest.
    pub accrued: usize,
    /// Positions liquidated for falling below their threshold.
    pub liquidated: usize,
    /// Margin orders closed by a stop-loss or take-profit trigger.
    pub triggered: usize,
}

/// Accrue interest on every credit loan and liquidate undercollateralized
/// ones.
pub fn update_credit_loans(state: &mut MarketState, ctx: &mut TxContext<'_>) -> Result<UpdateSummary> {
    let config = ctx.config;
    let mut summary = UpdateSummary::default();
    for (debt_symbol, ids) in state.pools.loan_ids_by_debt() {
        let rate = state
            .pools
            .credit_pool(&debt_symbol)?
            .interest_rate(&config.credit, config.precision)?;
        let mut total = Asset::zero(&debt_symbol);
        for id in &ids {
            if state.pools.loan(id)?.flash_loan {
                continue;
            }
            let interest = state.pools.accrue_loan(id, rate, ctx.now, &config.credit)?;
            if interest.amount > 0 {
                total.add_assign(&interest)?;
                summary.accrued += 1;
            }
            let loan = state.pools.loan(id)?;
            let liquidation_price = state
                .pools
                .liquidation_price(config, &loan.collateral, &debt_symbol)?;
            let undercollateralized = loan.loan_price < liquidation_price;
            state.pools.loan_mut(id)?.liquidation_price = liquidation_price;
            if undercollateralized {
                state.pools.liquidate_credit_loan(ctx, id)?;
                summary.liquidated += 1;
            }
        }
        emit_accrual(ctx, &debt_symbol, total, rate);
    }
    if summary != UpdateSummary::default() {
        tracing::info!(accrued = summary.accrued, liquidated = summary.liquidated, "Credit loans updated");
    }
    Ok(summary)
}

/// Accrue interest on every margin order, revalue it, and liquidate or exit
/// it when its collateralization or one of its triggers says so.
pub fn update_margin_orders(state: &mut MarketState, ctx: &mut TxContext<'_>) -> Result<UpdateSummary> {
    let config = ctx.config;
    let mut groups: BTreeMap<Symbol, Vec<(Symbol, OrderId)>> = BTreeMap::new();
    for order in state.book.margin_orders() {
        groups
            .entry(order.debt_symbol().clone())
            .or_default()
            .push((order.position_symbol().clone(), order.id.clone()));
    }

    let mut summary = UpdateSummary::default();
    for (debt_symbol, mut ids) in groups {
        ids.sort();
        let rate = state
            .pools
            .credit_pool(&debt_symbol)?
            .interest_rate(&config.credit, config.precision)?;
        let mut total = Asset::zero(&debt_symbol);
        for (_, id) in &ids {
            if state.book.margin(id).is_err() {
                // Closed by an earlier liquidation in this pass.
                continue;
            }
            let interest = accrue_margin(state, ctx, id)?;
            if interest.amount > 0 {
                total.add_assign(&interest)?;
                summary.accrued += 1;
            }
            let collateralization = refresh_margin_valuation(state, config, id)?;
            let order = state.book.margin(id)?;
            if order.liquidating {
                continue;
            }
            if collateralization < config.credit.margin_liquidation_ratio {
                liquidate_margin_order(state, ctx, id)?;
                summary.liquidated += 1;
                continue;
            }
            if order.position_balance.amount == 0 {
                continue;
            }
            let price = position_price(&state.pools, config, order)?;
            match MarginTriggers::of(order).triggered(&price) {
                Some(MarginExit::Market) => {
                    tracing::info!(order = %id, price = %price.to_decimal(), "Margin exit triggered");
                    close_margin_position(state, ctx, id, None)?;
                    summary.triggered += 1;
                }
                Some(MarginExit::Limit(limit)) => {
                    tracing::info!(order = %id, limit = %limit.to_decimal(), "Margin limit exit triggered");
                    close_margin_position(state, ctx, id, Some(&limit))?;
                    summary.triggered += 1;
                }
                None => {}
            }
        }
        emit_accrual(ctx, &debt_symbol, total, rate);
    }
    if summary != UpdateSummary::default() {
        tracing::info!(
            accrued = summary.accrued,
            liquidated = summary.liquidated,
            triggered = summary.triggered,
            "Margin orders updated"
        );
    }
    Ok(summary)
}

fn emit_accrual(ctx: &mut TxContext<'_>, debt_symbol: &Symbol, total: Asset, rate: i64) {
    if total.amount == 0 {
        return;
    }
    ctx.emit(VirtualOp::InterestAccrued {
        debt_symbol: debt_symbol.clone(),
        total,
        rate,
    });
}
