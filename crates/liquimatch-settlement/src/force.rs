//! Force settlement: redeeming a synthetic asset for its backing collateral.
//!
//! While the asset trades normally a request waits `delay_secs`, then the
//! sweep fills it against the least collateralized calls at the feed price
//! less `offset_percent`, capped at `max_volume_percent` of supply per
//! sweep. Once the asset is globally settled, requests redeem at once from
//! the settlement fund instead.

use liquimatch_ledger::TxContext;
use liquimatch_matchcore::{MarketState, fill_call};
use liquimatch_types::constants::PERCENT_100;
use liquimatch_types::{
    AccountName, Asset, CancelReason, ForceSettlement, LiquimatchError, OrderId, OrderKind, Price, Result, Symbol,
    VirtualOp,
};

/// What a settlement request did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SettleOutcome {
    /// A request was created or resized and waits for the sweep.
    Queued(OrderId),
    /// A pending request was withdrawn.
    Removed(OrderId),
    /// Redeemed immediately from a global settlement fund.
    Redeemed { paid: Asset, received: Asset },
}

/// Request settlement of `amount`. A holder has at most one pending request
/// per asset: asking again resizes it, asking for zero withdraws it.
pub fn request_force_settlement(
    state: &mut MarketState,
    ctx: &mut TxContext<'_>,
    owner: &AccountName,
    amount: &Asset,
    interface: Option<AccountName>,
) -> Result<SettleOutcome> {
    let symbol = &amount.symbol;
    ctx.registry.get(symbol)?;
    if amount.amount < 0 {
        return Err(LiquimatchError::InvalidAmount {
            reason: format!("settlement amount {amount} is negative"),
        });
    }
    if state.bitasset(symbol)?.has_settlement() {
        return redeem_from_fund(state, ctx, owner, amount);
    }

    let id = OrderId::new(owner, symbol.as_str());
    let delay = chrono::Duration::seconds(ctx.config.settlement.delay_secs);
    let Ok(existing) = state.book.settlement(&id) else {
        liquimatch_types::ensure_positive(amount, "settlement amount")?;
        ctx.ledger.lock(owner, amount)?;
        state.book.insert_settlement(ForceSettlement {
            id: id.clone(),
            balance: amount.clone(),
            settlement_date: ctx.now + delay,
            interface,
            created: ctx.now,
        })?;
        tracing::info!(owner = %owner, amount = %amount, "Force settlement requested");
        return Ok(SettleOutcome::Queued(id));
    };

    let delta = amount.checked_sub(&existing.balance)?;
    if amount.amount == 0 {
        cancel_force_settlement(state, ctx, &id, CancelReason::Requested)?;
        return Ok(SettleOutcome::Removed(id));
    }
    if delta.amount > 0 {
        ctx.ledger.lock(owner, &delta)?;
    } else {
        ctx.ledger.release(owner, &delta.negated())?;
    }
    let request = state.book.settlement_mut(&id)?;
    request.balance = amount.clone();
    request.settlement_date = ctx.now + delay;
    tracing::info!(owner = %owner, amount = %amount, "Force settlement resized");
    Ok(SettleOutcome::Queued(id))
}

/// Exchange `amount` of a settled asset for its share of the fund, rounding
/// in the fund's favour. Redeeming the whole remaining supply empties the
/// fund exactly.
fn redeem_from_fund(
    state: &mut MarketState,
    ctx: &mut TxContext<'_>,
    owner: &AccountName,
    amount: &Asset,
) -> Result<SettleOutcome> {
    liquimatch_types::ensure_positive(amount, "settlement amount")?;
    let symbol = &amount.symbol;
    let bitasset = state.bitasset(symbol)?;
    let Some(price) = bitasset.settlement_price.clone() else {
        return Err(LiquimatchError::InvariantViolation {
            reason: format!("{symbol} has no settlement price"),
        });
    };
    let fund = Asset::new(bitasset.settlement_fund, bitasset.backing.clone());
    let held = ctx.ledger.get_liquid_balance(owner, symbol);
    if held.amount < amount.amount {
        return Err(LiquimatchError::InsufficientBalance {
            account: owner.clone(),
            needed: amount.clone(),
            available: held,
        });
    }

    let whole_supply = *amount == ctx.ledger.total_supply(symbol);
    let received = if whole_supply { fund.clone() } else { price.mul(amount)? };
    if received.amount > fund.amount {
        return Err(LiquimatchError::SettlementFundExceeded {
            reason: format!("{amount} redeems {received}, fund holds {fund}"),
        });
    }
    if received.amount == 0 {
        return Err(LiquimatchError::InvalidAmount {
            reason: format!("{amount} redeems nothing at {price}"),
        });
    }
    let paid = if whole_supply {
        amount.clone()
    } else {
        price.mul_round_up(&received)?
    };

    ctx.ledger.burn(owner, &paid)?;
    ctx.ledger.release(owner, &received)?;
    state.bitasset_mut(symbol)?.settlement_fund -= received.amount;
    tracing::info!(owner = %owner, paid = %paid, received = %received, "Settled asset redeemed");
    ctx.emit(VirtualOp::SettlementRedeemed {
        account: owner.clone(),
        paid: paid.clone(),
        received: received.clone(),
    });
    Ok(SettleOutcome::Redeemed { paid, received })
}

/// Withdraw a pending request and refund its balance.
pub fn cancel_force_settlement(
    state: &mut MarketState,
    ctx: &mut TxContext<'_>,
    id: &OrderId,
    reason: CancelReason,
) -> Result<Asset> {
    let request = state.book.remove_settlement(id)?;
    ctx.ledger.release(request.owner(), &request.balance)?;
    if reason == CancelReason::Requested {
        tracing::debug!(request = %id, refunded = %request.balance, "Force settlement withdrawn");
    } else {
        tracing::warn!(request = %id, refunded = %request.balance, ?reason, "Force settlement cancelled");
    }
    ctx.emit(VirtualOp::OrderCancelled {
        owner: request.owner().clone(),
        order: id.clone(),
        kind: OrderKind::ForceSettlement,
        refunded: request.balance.clone(),
        reason,
    });
    Ok(request.balance)
}

/// Execute due settlement requests of every synthetic asset. Returns the
/// number of fills.
pub fn execute_force_settlements(state: &mut MarketState, ctx: &mut TxContext<'_>) -> Result<usize> {
    let symbols: Vec<Symbol> = state.bitassets.keys().cloned().collect();
    let mut fills = 0;
    for symbol in &symbols {
        fills += settle_asset_requests(state, ctx, symbol)?;
    }
    Ok(fills)
}

fn settle_asset_requests(state: &mut MarketState, ctx: &mut TxContext<'_>, symbol: &Symbol) -> Result<usize> {
    let bitasset = state.bitasset(symbol)?;
    let requests = state.book.settlements_by_date(symbol);
    if requests.is_empty() {
        return Ok(0);
    }
    if bitasset.has_settlement() {
        for id in &requests {
            cancel_force_settlement(state, ctx, id, CancelReason::SettlementHalted)?;
        }
        return Ok(0);
    }
    let mut due = Vec::new();
    for id in requests {
        if state.book.settlement(&id)?.settlement_date <= ctx.now {
            due.push(id);
        }
    }
    if due.is_empty() {
        return Ok(0);
    }
    let Some(feed) = state.bitasset(symbol)?.live_feed(ctx.now).cloned() else {
        for id in &due {
            cancel_force_settlement(state, ctx, id, CancelReason::SettlementHalted)?;
        }
        return Ok(0);
    };

    let offset = ctx.config.settlement.offset_percent;
    let to_u32 = |v: i64| {
        u32::try_from(v).map_err(|_| LiquimatchError::Configuration(format!("settlement offset {offset} out of range")))
    };
    // Collateral per unit of debt reduced by the offset.
    let fill_price = feed
        .settlement_price
        .scale_ratio(to_u32(PERCENT_100)?, to_u32(PERCENT_100 - offset)?)?;

    let supply = ctx.ledger.total_supply(symbol).amount;
    let max_volume = state
        .bitasset(symbol)?
        .max_force_settlement_volume(supply, ctx.config.settlement.max_volume_percent)?;
    let mut settled = 0;
    let mut fills = 0;
    'requests: for id in due {
        while settled < max_volume {
            let Ok(request) = state.book.settlement(&id) else {
                continue 'requests;
            };
            if request.balance.amount == 0 {
                tracing::warn!(request = %id, "Zero force settlement detected");
                cancel_force_settlement(state, ctx, &id, CancelReason::Culled)?;
                continue 'requests;
            }
            let Some(borrower) = state.book.least_collateralized(symbol).map(|c| c.borrower.clone()) else {
                break 'requests;
            };
            let filled = match_call_settlement(state, ctx, &borrower, &id, &fill_price, max_volume - settled)?;
            if filled == 0 {
                if state.book.settlement(&id).is_ok() {
                    break 'requests;
                }
                continue 'requests;
            }
            settled += filled;
            fills += 1;
        }
        // Volume cap reached.
        break;
    }
    state.bitasset_mut(symbol)?.force_settled_volume = settled;
    if fills > 0 {
        tracing::info!(symbol = %symbol, settled, fills, "Force settlements executed");
    }
    Ok(fills)
}

/// Fill one request against one call at `price` (`debt / collateral`).
/// Returns the debt settled; zero means the request cannot progress.
fn match_call_settlement(
    state: &mut MarketState,
    ctx: &mut TxContext<'_>,
    borrower: &AccountName,
    id: &OrderId,
    price: &Price,
    max_settlement: i64,
) -> Result<i64> {
    let request = state.book.settlement(id)?.clone();
    let symbol = request.settlement_symbol().clone();
    let Some(call) = state.book.call(borrower, &symbol).cloned() else {
        return Ok(0);
    };

    let for_sale = request.balance.amount.min(max_settlement);
    let mut call_receives = request.balance.with_amount(for_sale.min(call.debt.amount));
    let mut call_pays = price.mul(&call_receives)?;
    let mut cull_request = false;

    if call_pays.amount == 0 {
        if call_receives == call.debt {
            tracing::warn!(borrower = %borrower, request = %id, "Call would pay nothing, paying one unit");
            call_pays.amount = 1;
        } else {
            if call_receives == request.balance {
                tracing::warn!(request = %id, "Force settlement too small to receive anything");
                cancel_force_settlement(state, ctx, id, CancelReason::Culled)?;
            }
            return Ok(0);
        }
    } else if call_receives == call.debt {
        call_pays = price.mul_round_up(&call_receives)?;
    } else {
        cull_request = call_receives == request.balance;
        call_receives = price.mul_round_up(&call_pays)?;
        if call_receives == request.balance {
            cull_request = false;
        }
    }
    if call_pays.amount > call.collateral.amount {
        tracing::warn!(
            borrower = %borrower,
            pays = %call_pays,
            collateral = %call.collateral,
            "Call cannot cover a force settlement"
        );
        return Ok(0);
    }

    fill_call(state, ctx, borrower, &call_pays, &call_receives, price, true)?;
    ctx.ledger.release(request.owner(), &call_pays)?;
    let remaining = request.balance.checked_sub(&call_receives)?;
    tracing::debug!(request = %id, pays = %call_receives, receives = %call_pays, "Force settlement filled");
    ctx.emit(VirtualOp::Fill {
        owner: request.owner().clone(),
        order: Some(id.clone()),
        kind: OrderKind::ForceSettlement,
        pays: call_receives.clone(),
        receives: call_pays,
        fee: Asset::zero(&symbol),
        fill_price: price.clone(),
        is_maker: false,
    });
    if remaining.amount == 0 {
        state.book.remove_settlement(id)?;
    } else {
        state.book.settlement_mut(id)?.balance = remaining;
        if cull_request {
            cancel_force_settlement(state, ctx, id, CancelReason::Culled)?;
        }
    }
    Ok(call_receives.amount)
}
