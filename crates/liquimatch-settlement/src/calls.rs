//! Borrowing synthetic assets against collateral.

use liquimatch_ledger::TxContext;
use liquimatch_matchcore::{CallCheck, MarketState, check_call_orders};
use liquimatch_types::{AccountName, Asset, CallOrder, LiquimatchError, Result, Symbol, VirtualOp};

use crate::global::{check_for_blackswan, globally_settle_asset};

/// Change a borrower's position in `delta_debt.symbol` by the given signed
/// amounts. Positive debt issues the synthetic to the borrower, negative
/// debt burns it from them; positive collateral is locked, negative
/// released. A position that takes on risk must stay above the feed's
/// maintenance collateralization.
pub fn update_call_order(
    state: &mut MarketState,
    ctx: &mut TxContext<'_>,
    borrower: &AccountName,
    delta_collateral: &Asset,
    delta_debt: &Asset,
    target_collateral_ratio: Option<u16>,
) -> Result<()> {
    let symbol = delta_debt.symbol.clone();
    let bitasset = state.bitasset(&symbol)?;
    if bitasset.has_settlement() {
        return Err(LiquimatchError::AssetGloballySettled(symbol));
    }
    if delta_collateral.symbol != bitasset.backing {
        return Err(LiquimatchError::SymbolMismatch {
            expected: bitasset.backing.clone(),
            actual: delta_collateral.symbol.clone(),
        });
    }
    if delta_collateral.is_zero() && delta_debt.is_zero() && target_collateral_ratio.is_none() {
        return Err(LiquimatchError::InvalidOrder {
            reason: format!("call order update for {borrower} changes nothing"),
        });
    }
    let feed = bitasset.require_feed(ctx.now)?.clone();

    let mut call = state.book.call(borrower, &symbol).cloned().unwrap_or_else(|| CallOrder {
        borrower: borrower.clone(),
        debt: Asset::zero(&symbol),
        collateral: Asset::zero(&delta_collateral.symbol),
        target_collateral_ratio: None,
        interface: None,
        created: ctx.now,
    });
    call.debt.add_assign(delta_debt)?;
    call.collateral.add_assign(delta_collateral)?;
    if target_collateral_ratio.is_some() {
        call.target_collateral_ratio = target_collateral_ratio;
    }
    if call.debt.amount < 0 || call.collateral.amount < 0 {
        return Err(LiquimatchError::InvalidAmount {
            reason: format!("call of {borrower} would hold {} against {}", call.collateral, call.debt),
        });
    }
    if call.debt.amount == 0 && call.collateral.amount != 0 {
        return Err(LiquimatchError::InvalidOrder {
            reason: format!("closing the call of {borrower} must withdraw all {}", call.collateral),
        });
    }
    if call.debt.amount > 0 && call.collateral.amount == 0 {
        return Err(LiquimatchError::InsufficientCollateral {
            reason: format!("{} of debt without collateral", call.debt),
        });
    }
    let takes_risk = delta_debt.amount > 0 || delta_collateral.amount < 0;
    if takes_risk && call.debt.amount > 0 && call.collateralization() <= feed.maintenance_collateralization()? {
        return Err(LiquimatchError::InsufficientCollateral {
            reason: format!(
                "{} against {} is at or below maintenance collateralization",
                call.collateral, call.debt
            ),
        });
    }

    if delta_collateral.amount > 0 {
        ctx.ledger.lock(borrower, delta_collateral)?;
    }
    if delta_debt.amount < 0 {
        ctx.ledger.burn(borrower, &delta_debt.negated())?;
    }
    if delta_debt.amount > 0 {
        ctx.ledger.issue(borrower, delta_debt)?;
    }
    if delta_collateral.amount < 0 {
        ctx.ledger.release(borrower, &delta_collateral.negated())?;
    }

    tracing::debug!(borrower = %borrower, debt = %call.debt, collateral = %call.collateral, "Call order updated");
    ctx.emit(VirtualOp::CallUpdated {
        borrower: borrower.clone(),
        debt: call.debt.clone(),
        collateral: call.collateral.clone(),
    });
    state.book.put_call(call);
    run_call_checks(state, ctx, &symbol)?;
    Ok(())
}

/// Execute due margin calls in `symbol`, then settle the asset globally if
/// the riskiest call is underwater. Returns whether the asset was settled.
pub fn run_call_checks(state: &mut MarketState, ctx: &mut TxContext<'_>, symbol: &Symbol) -> Result<bool> {
    match check_call_orders(state, ctx, symbol)? {
        CallCheck::Matched(_) => check_for_blackswan(state, ctx, symbol),
        CallCheck::Insolvent { borrower } => {
            let Some(call) = state.book.call(&borrower, symbol) else {
                return Err(LiquimatchError::CallOrderNotFound {
                    borrower,
                    symbol: symbol.clone(),
                });
            };
            let price = call.collateralization().invert();
            globally_settle_asset(state, ctx, symbol, &price)?;
            Ok(true)
        }
    }
}
