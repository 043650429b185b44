//! # liquimatch-pool
//!
//! **Liquidity plane**: constant-function AMM pools, interest-bearing credit
//! pools, credit loans and the pre-trade risk checker that guards them, plus
//! the option and prediction pools whose assets expire.
//!
//! ## Components
//!
//! 1. **LiquidityPool**: curve math, quotes and reserve updates
//! 2. **CreditPool**: lend / withdraw at a floating share price, interest rate
//! 3. **PriceHistory**: bounded sample ring with `len / 2` median selection
//! 4. **FeeSplit**: network / interface / pool division of trading fees
//! 5. **PoolSet**: the pool store and every ledger-facing pool operation,
//!    including credit loans and default bookkeeping
//! 6. **risk**: credit and margin checks against stressed pool liquidity
//! 7. **OptionPool**: monthly call / put series around a pool's day median,
//!    option orders, exercise and expiry
//! 8. **PredictionPool**: outcome markets on collateral, vote resolution and
//!    payout at close

pub mod credit_pool;
pub mod fees;
pub mod liquidity_pool;
pub mod loans;
pub mod median;
pub mod option_pool;
pub mod pools;
pub mod prediction_pool;
pub mod risk;

pub use credit_pool::{CreditPool, accrued_interest, interest_due};
pub use fees::FeeSplit;
pub use liquidity_pool::{LiquidityPool, Swap};
pub use median::PriceHistory;
pub use option_pool::{OptionExpiry, OptionPool, series_expirations};
pub use pools::{Hop, PoolSet, clear_asset_balances, final_output};
pub use prediction_pool::{PredictionClose, PredictionPool, PredictionPoolRequest};
pub use risk::{credit_check, margin_check};
