//! Black swan detection and global settlement.
//!
//! A synthetic asset is globally settled once even the best exit available
//! to its riskiest call cannot buy back that call's debt:
//!
//! ```text
//! least  = inverse(collateralization of the riskiest call)      debt / collateral
//! best   = max(feed settlement price, best bid selling debt)      debt / collateral
//! fires iff best <= least
//! price  = feed price if least == feed price, otherwise least
//! ```
//!
//! Every call is then closed at the settlement price: its debt stays in
//! circulation and the collateral it owes moves into the settlement fund,
//! from which holders redeem at the fixed price from then on.

use liquimatch_ledger::TxContext;
use liquimatch_matchcore::MarketState;
use liquimatch_types::{Asset, CancelReason, LiquimatchError, OrderKind, Price, Result, Symbol, VirtualOp};

use crate::force::cancel_force_settlement;

/// Settle `symbol` globally if its riskiest call is underwater at the best
/// available price. Returns whether settlement happened.
pub fn check_for_blackswan(state: &mut MarketState, ctx: &mut TxContext<'_>, symbol: &Symbol) -> Result<bool> {
    let Some(bitasset) = state.bitassets.get(symbol) else {
        return Ok(false);
    };
    if bitasset.has_settlement() {
        return Ok(false);
    }
    let Some(feed) = bitasset.live_feed(ctx.now) else {
        return Ok(false);
    };
    let Some(call) = state.book.least_collateralized(symbol) else {
        return Ok(false);
    };
    let feed_price = feed.settlement_price.clone();
    let least = call.collateralization().invert();

    let mut highest = feed_price.clone();
    if let Some(bid) = state.book.best_limit(symbol, &bitasset.backing) {
        if bid.sell_price > highest {
            highest = bid.sell_price.clone();
        }
    }
    if least < highest {
        return Ok(false);
    }

    let settle_at = if least <= feed_price { feed_price } else { least };
    tracing::warn!(
        symbol = %symbol,
        borrower = %call.borrower,
        debt = %call.debt,
        collateral = %call.collateral,
        highest_bid = %highest.to_decimal(),
        "Black swan detected"
    );
    globally_settle_asset(state, ctx, symbol, &settle_at)?;
    Ok(true)
}

/// Close every call in `symbol` at `price` (`debt / collateral`) and freeze
/// the asset against the gathered collateral.
pub fn globally_settle_asset(
    state: &mut MarketState,
    ctx: &mut TxContext<'_>,
    symbol: &Symbol,
    price: &Price,
) -> Result<()> {
    let bitasset = state.bitasset(symbol)?;
    if bitasset.has_settlement() {
        return Err(LiquimatchError::AssetGloballySettled(symbol.clone()));
    }
    let backing = bitasset.backing.clone();
    if price.is_null() {
        return Err(LiquimatchError::InvalidPrice {
            reason: format!("cannot settle {symbol} at a null price"),
        });
    }

    let mut gathered = Asset::zero(&backing);
    for borrower in state.book.call_borrowers(symbol) {
        let Some(call) = state.book.remove_call(&borrower, symbol) else {
            continue;
        };
        let owed = price.mul_round_up(&call.debt)?;
        let pays = owed.min(&call.collateral)?;
        gathered.add_assign(&pays)?;
        ctx.ledger.release(&borrower, &call.collateral.checked_sub(&pays)?)?;
        ctx.emit(VirtualOp::Fill {
            owner: borrower,
            order: None,
            kind: OrderKind::Call,
            pays,
            receives: call.debt.clone(),
            fee: Asset::zero(symbol),
            fill_price: price.clone(),
            is_maker: false,
        });
    }

    let supply = ctx.ledger.total_supply(symbol);
    let settlement_price = if supply.amount > 0 && gathered.amount > 0 {
        Price::new(supply.clone(), gathered.clone())
    } else {
        price.clone()
    };

    let bitasset = state.bitasset_mut(symbol)?;
    bitasset.settlement_price = Some(settlement_price.clone());
    bitasset.settlement_fund = gathered.amount;

    for id in state.book.settlements_by_date(symbol) {
        cancel_force_settlement(state, ctx, &id, CancelReason::SettlementHalted)?;
    }

    tracing::info!(
        symbol = %symbol,
        supply = %supply,
        fund = %gathered,
        price = %settlement_price.to_decimal(),
        "Asset globally settled"
    );
    ctx.emit(VirtualOp::GlobalSettlement {
        symbol: symbol.clone(),
        settlement_price,
        settlement_fund: gathered,
    });
    Ok(())
}
