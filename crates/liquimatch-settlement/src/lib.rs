//! # liquimatch-settlement
//!
//! **Risk and settlement plane**: the [`Engine`] facade, synthetic asset
//! settlement, and the periodic updaters run between blocks.
//!
//! ## Architecture
//!
//! Every operation runs inside [`Engine::transact`], all-or-nothing:
//! 1. Snapshot market state, ledger and the virtual-op log position
//! 2. Apply the operation (orders, pools, loans, calls, feeds)
//! 3. Check no flash loan is left open
//! 4. Check supply conservation
//! 5. Restore the snapshot on any error
//!
//! ## Synthetic assets
//!
//! - **Calls**: debt positions issuing the synthetic against collateral
//! - **Force settlement**: delayed redemption at the feed price, volume capped
//! - **Global settlement**: a black swan closes every call into a fund that
//!   holders redeem from at a fixed price
//!
//! ## Periodic tasks
//!
//! [`Engine::process_block`] runs median sampling, credit and margin
//! updates, force settlement and order expiry at the cadences in
//! [`ScheduleConfig`](liquimatch_types::ScheduleConfig). Expired option
//! series and resolved prediction pools are closed out on their own
//! cadence, returning locked balances to their holders.

pub mod calls;
pub mod engine;
pub mod expiry;
pub mod feeds;
pub mod force;
pub mod global;
pub mod schedule;
pub mod telemetry;
pub mod updater;

pub use calls::{run_call_checks, update_call_order};
pub use engine::{BlockReport, Engine};
pub use expiry::{close_prediction_pools, expire_option_series};
pub use feeds::publish_feed;
pub use force::{SettleOutcome, cancel_force_settlement, execute_force_settlements, request_force_settlement};
pub use global::{check_for_blackswan, globally_settle_asset};
pub use schedule::{PeriodicTask, due_tasks};
pub use telemetry::{init_test_tracing, init_tracing};
pub use updater::{UpdateSummary, update_credit_loans, update_margin_orders};
