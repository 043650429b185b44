//! Price feed publication for synthetic assets.

use liquimatch_ledger::TxContext;
use liquimatch_matchcore::MarketState;
use liquimatch_types::constants::COLLATERAL_RATIO_DENOM;
use liquimatch_types::{LiquimatchError, PriceFeed, Result, Symbol};

use crate::calls::run_call_checks;

/// Replace the feed of `symbol`, then run margin calls and the black swan
/// check against it. A null feed is accepted and halts call matching.
/// Returns whether the asset was globally settled.
pub fn publish_feed(state: &mut MarketState, ctx: &mut TxContext<'_>, symbol: &Symbol, feed: PriceFeed) -> Result<bool> {
    let bitasset = state.bitasset(symbol)?;
    if bitasset.has_settlement() {
        return Err(LiquimatchError::AssetGloballySettled(symbol.clone()));
    }
    let price = &feed.settlement_price;
    if price.base.symbol != *symbol || price.quote.symbol != bitasset.backing {
        return Err(LiquimatchError::InvalidPrice {
            reason: format!("feed for {symbol} must be quoted {symbol}/{}, got {price}", bitasset.backing),
        });
    }
    for (name, ratio) in [
        ("maintenance collateral ratio", feed.maintenance_collateral_ratio),
        ("max short squeeze ratio", feed.max_short_squeeze_ratio),
    ] {
        if u32::from(ratio) <= COLLATERAL_RATIO_DENOM {
            return Err(LiquimatchError::InvalidPrice {
                reason: format!("{name} {ratio} must exceed {COLLATERAL_RATIO_DENOM}"),
            });
        }
    }

    tracing::info!(
        symbol = %symbol,
        price = %feed.settlement_price.to_decimal(),
        mcr = feed.maintenance_collateral_ratio,
        mssr = feed.max_short_squeeze_ratio,
        "Price feed published"
    );
    let bitasset = state.bitasset_mut(symbol)?;
    bitasset.feed = Some(feed);
    bitasset.feed_updated = Some(ctx.now);
    if bitasset.live_feed(ctx.now).is_none() {
        return Ok(false);
    }
    run_call_checks(state, ctx, symbol)
}
