//! Margin-call execution for synthetic (bitasset) debt positions.
//!
//! A call order is callable once its collateralization falls to the feed's
//! maintenance collateralization. It then buys back debt from the book at
//! no worse than the max short-squeeze price:
//!
//! ```text
//! callable   : collateral / debt      <= maintenance_collateralization
//! acceptable : maker.sell_price       >= max_short_squeeze_price     (debt / collateral)
//! insolvent  : debt at match price    >  collateral                  -> global settlement
//! ```
//!
//! [`check_call_orders`] only takes liquidity from resting limit orders.
//! Pools and margin orders never fill a call on their own initiative; a call
//! meets them only as a maker inside [`crate::apply_order`], when a taker
//! sells the synthetic for its backing collateral and the call's squeeze
//! price beats every other source.

use liquimatch_ledger::TxContext;
use liquimatch_types::{
    AccountName, Asset, CallOrder, LiquimatchError, OrderKind, Price, Result, Symbol, VirtualOp,
};

use crate::market::MarketState;
use crate::matcher::{BookOrder, cull, fill_order};

/// Outcome of a margin-call pass over one synthetic asset.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CallCheck {
    /// Number of call fills executed.
    Matched(usize),
    /// The least collateralized call cannot cover its debt at the best
    /// available price; the asset must be globally settled.
    Insolvent { borrower: AccountName },
}

/// How much debt the call buys and how much collateral it pays for one
/// match against `counter_for_sale` debt at `match_price`. `None` when the
/// counterparty's remainder buys no collateral.
pub(crate) fn call_match_amounts(
    to_buy: i64,
    counter_for_sale: &Asset,
    match_price: &Price,
) -> Result<Option<(Asset, Asset)>> {
    if to_buy > counter_for_sale.amount {
        let collateral = match_price.mul(counter_for_sale)?;
        if collateral.amount == 0 {
            return Ok(None);
        }
        let debt = match_price.mul_round_up(&collateral)?;
        Ok(Some((debt.min(counter_for_sale)?, collateral)))
    } else {
        let debt = counter_for_sale.with_amount(to_buy);
        let collateral = match_price.mul_round_up(&debt)?;
        Ok(Some((debt, collateral)))
    }
}

/// Apply one side of a fill to a call order: `pays` collateral out,
/// `receives` debt in. The repaid debt is burned; a call with no debt left
/// returns its collateral and is removed.
pub fn fill_call(
    state: &mut MarketState,
    ctx: &mut TxContext<'_>,
    borrower: &AccountName,
    pays: &Asset,
    receives: &Asset,
    fill_price: &Price,
    is_maker: bool,
) -> Result<()> {
    let mut call: CallOrder = state
        .book
        .call(borrower, &receives.symbol)
        .cloned()
        .ok_or_else(|| LiquimatchError::CallOrderNotFound {
            borrower: borrower.clone(),
            symbol: receives.symbol.clone(),
        })?;
    call.debt.sub_assign(receives)?;
    call.collateral.sub_assign(pays)?;
    if call.debt.amount < 0 || call.collateral.amount < 0 {
        return Err(LiquimatchError::InvariantViolation {
            reason: format!("call of {borrower} over-filled: debt {}, collateral {}", call.debt, call.collateral),
        });
    }
    ctx.ledger.burn_pending(receives)?;
    if call.debt.amount == 0 {
        ctx.ledger.release(borrower, &call.collateral)?;
        call.collateral.amount = 0;
    }
    tracing::debug!(
        borrower = %borrower,
        pays = %pays,
        receives = %receives,
        debt = %call.debt,
        "Call order filled"
    );
    ctx.emit(VirtualOp::Fill {
        owner: borrower.clone(),
        order: None,
        kind: OrderKind::Call,
        pays: pays.clone(),
        receives: receives.clone(),
        fee: Asset::zero(&receives.symbol),
        fill_price: fill_price.clone(),
        is_maker,
    });
    ctx.emit(VirtualOp::CallUpdated {
        borrower: borrower.clone(),
        debt: call.debt.clone(),
        collateral: call.collateral.clone(),
    });
    state.book.put_call(call);
    Ok(())
}

/// Match callable positions in `debt` against limit orders selling the
/// synthetic for its backing, riskiest call first. Calls are takers here and
/// pay no trading fee.
pub fn check_call_orders(state: &mut MarketState, ctx: &mut TxContext<'_>, debt: &Symbol) -> Result<CallCheck> {
    let Some(bitasset) = state.bitassets.get(debt) else {
        return Ok(CallCheck::Matched(0));
    };
    if bitasset.has_settlement() {
        return Ok(CallCheck::Matched(0));
    }
    let Some(feed) = bitasset.live_feed(ctx.now).cloned() else {
        return Ok(CallCheck::Matched(0));
    };
    let backing = bitasset.backing.clone();
    let squeeze = feed.max_short_squeeze_price()?;
    let callable = feed.maintenance_collateralization()?;

    let mut matched = 0;
    loop {
        let Some(call) = state.book.least_collateralized(debt).cloned() else {
            break;
        };
        if call.collateralization() > callable {
            break;
        }
        let Some(maker) = state.book.best_limit(debt, &backing).cloned() else {
            break;
        };
        if maker.sell_price < squeeze {
            break;
        }
        let match_price = maker.sell_price.clone();
        if match_price.mul_round_up(&call.debt)?.amount > call.collateral.amount {
            tracing::warn!(
                borrower = %call.borrower,
                debt = %call.debt,
                collateral = %call.collateral,
                price = %match_price.to_decimal(),
                "Call cannot cover its debt at the best price"
            );
            return Ok(CallCheck::Insolvent {
                borrower: call.borrower,
            });
        }
        let to_buy = call.max_debt_to_cover(
            &match_price,
            &feed.settlement_price,
            feed.maintenance_collateral_ratio,
            &callable,
        )?;
        if to_buy <= 0 {
            break;
        }
        let maker_ref = BookOrder::Limit(maker.id.clone());
        let Some((call_receives, order_receives)) =
            call_match_amounts(to_buy, &maker.amount_for_sale(), &match_price)?
        else {
            cull(state, ctx, &maker_ref)?;
            continue;
        };
        fill_call(state, ctx, &call.borrower, &order_receives, &call_receives, &match_price, false)?;
        fill_order(
            state,
            ctx,
            &maker_ref,
            &call_receives,
            &order_receives,
            &Asset::zero(&order_receives.symbol),
            &match_price,
            true,
        )?;
        matched += 1;
    }
    if matched > 0 {
        tracing::info!(symbol = %debt, matched, "Margin calls executed");
    }
    Ok(CallCheck::Matched(matched))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn price(debt: i64, coll: i64) -> Price {
        Price::new(Asset::new(debt, "USD"), Asset::new(coll, "COIN"))
    }

    #[test]
    fn small_counterparty_rounds_collateral_down_and_debt_up() {
        // 2 USD per 3 COIN; counterparty sells 10 USD.
        let (debt, coll) = call_match_amounts(100, &Asset::new(10, "USD"), &price(2, 3))
            .unwrap()
            .unwrap();
        assert_eq!(coll, Asset::new(15, "COIN"));
        assert_eq!(debt, Asset::new(10, "USD"));

        let (debt, coll) = call_match_amounts(100, &Asset::new(11, "USD"), &price(2, 3))
            .unwrap()
            .unwrap();
        // floor(16.5) = 16 COIN, ceil(16 * 2 / 3) = 11 USD
        assert_eq!(coll, Asset::new(16, "COIN"));
        assert_eq!(debt, Asset::new(11, "USD"));
    }

    #[test]
    fn call_limited_by_debt_to_cover() {
        let (debt, coll) = call_match_amounts(7, &Asset::new(100, "USD"), &price(2, 3))
            .unwrap()
            .unwrap();
        assert_eq!(debt, Asset::new(7, "USD"));
        // ceil(10.5)
        assert_eq!(coll, Asset::new(11, "COIN"));
    }

    #[test]
    fn dust_counterparty_buys_nothing() {
        assert!(call_match_amounts(100, &Asset::new(1, "USD"), &price(3, 1))
            .unwrap()
            .is_none());
    }
}
