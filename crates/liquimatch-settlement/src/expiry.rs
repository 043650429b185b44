//! Periodic close-out of expiring assets.
//!
//! Option series and prediction pools create temporary assets that are
//! wiped when they mature. Each sweep first cancels book orders in the
//! maturing symbols, so every unit is back in a liquid balance before the
//! pool pays out and burns it.

use liquimatch_ledger::TxContext;
use liquimatch_matchcore::{MarketState, cancel_orders_trading};
use liquimatch_pool::{OptionExpiry, PredictionClose};
use liquimatch_types::Result;

/// Close every option series expired at block time and relist it a year
/// out. The returned `listed` symbols still need registering.
pub fn expire_option_series(state: &mut MarketState, ctx: &mut TxContext<'_>) -> Result<OptionExpiry> {
    let expired = state.pools.expired_option_series(ctx.now);
    if expired.is_empty() {
        return Ok(OptionExpiry::default());
    }
    let mut cancelled = 0;
    for symbol in &expired {
        cancelled += cancel_orders_trading(state, ctx, symbol)?;
    }
    let expiry = state.pools.expire_option_series(ctx)?;
    tracing::info!(
        expired = expiry.expired.len(),
        listed = expiry.listed.len(),
        option_orders = expiry.orders_closed,
        book_orders = cancelled,
        "Option series expired"
    );
    Ok(expiry)
}

/// Close every prediction pool whose resolution window has ended.
pub fn close_prediction_pools(state: &mut MarketState, ctx: &mut TxContext<'_>) -> Result<Vec<PredictionClose>> {
    let due = state.pools.due_prediction_pools(ctx.now);
    let mut closed = Vec::with_capacity(due.len());
    for prediction in due {
        let pool = state.pools.prediction_pool(&prediction)?;
        let mut symbols = vec![pool.prediction_symbol.clone()];
        symbols.extend(pool.outcomes.iter().cloned());
        for symbol in &symbols {
            cancel_orders_trading(state, ctx, symbol)?;
        }
        closed.push(state.pools.close_prediction_pool(ctx, &prediction)?);
    }
    Ok(closed)
}
