//! # liquimatch-matchcore
//!
//! **Order book and matching engine for Liquimatch.**
//!
//! Every placed order is matched immediately against the best-priced
//! counter-liquidity available to it, in one deterministic loop:
//!
//! ```text
//!                 ┌──────────── OrderBook ────────────┐
//!   taker ──────► │ limit side │ margin side │ calls  │ ◄── PoolSet (AMM)
//!                 └────────────────────────────────────┘
//!                          │ fills, culls, closes
//!                          ▼
//!                    Ledger (pending ⇄ liquid) + virtual ops
//! ```
//!
//! - **Price priority**: the best price among limit orders, margin orders,
//!   the pair's liquidity pool and callable debt positions always trades first
//! - **Time priority**: equal prices fill in insertion order
//! - **No value from nothing**: fills round against the party whose remainder
//!   is computed, and orders that would receive nothing are culled
//! - **Margin orders**: leveraged positions borrowed from credit pools,
//!   closed through the pools when liquidated
//! - **Margin calls**: under-collateralized synthetic-asset positions buy back
//!   their debt at up to the max short-squeeze price

pub mod calls;
pub mod margin;
pub mod market;
pub mod matcher;
pub mod orderbook;
pub mod price_level;

pub use calls::{CallCheck, check_call_orders, fill_call};
pub use margin::{
    MarginExit, MarginOrderRequest, MarginTriggers, accrue_margin, close_margin_order, close_margin_position,
    edit_margin_order, liquidate_margin_order, margin_collateralization, open_margin_order, position_price,
    refresh_margin_valuation,
};
pub use market::MarketState;
pub use matcher::{
    BookOrder, LimitOrderRequest, apply_order, cancel_limit_order, cancel_orders_trading, clear_expired_orders,
    place_limit_order,
};
pub use orderbook::{Market, OrderBook};
pub use price_level::PriceLevel;
