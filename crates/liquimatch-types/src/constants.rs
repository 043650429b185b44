//! Protocol constants. Every node of a network must agree on these values;
//! the configurable ones are defaults for [`crate::EngineConfig`].

/// Fixed-point scale: `PRECISION` units == 1.0.
pub const PRECISION: i64 = 100_000_000;

/// 100% in basis-point style percent units.
pub const PERCENT_100: i64 = 10_000;

/// 1% in percent units.
pub const PERCENT_1: i64 = PERCENT_100 / 100;

/// 0.1% in percent units.
pub const PERCENT_10_OF_PERCENT_1: i64 = PERCENT_1 / 10;

// ---------------------------------------------------------------------------
// Trading fees
// ---------------------------------------------------------------------------

/// Fee charged on the output of every pool swap and book fill (0.1%).
pub const TRADING_FEE_PERCENT: i64 = PERCENT_10_OF_PERCENT_1;

/// Network share of a trading fee.
pub const NETWORK_TRADING_FEE_PERCENT: i64 = 5_000;

/// Maker-interface share of a trading fee.
pub const MAKER_TRADING_FEE_PERCENT: i64 = 2_500;

/// Taker-interface share of a trading fee.
pub const TAKER_TRADING_FEE_PERCENT: i64 = 2_500;

/// Network share of interest paid on loan repayment.
pub const INTEREST_FEE_PERCENT: i64 = 2_500;

// ---------------------------------------------------------------------------
// Collateral
// ---------------------------------------------------------------------------

/// Denominator of collateral ratios (1000 == 1.0x).
pub const COLLATERAL_RATIO_DENOM: u32 = 1_000;

pub const MIN_COLLATERAL_RATIO: u16 = 1_001;

pub const MAX_COLLATERAL_RATIO: u16 = 32_000;

/// Call orders at or below 1.75x are eligible for margin calls.
pub const MAINTENANCE_COLLATERAL_RATIO: u16 = 1_750;

/// Margin calls never pay more than 1.5x the feed price.
pub const MAX_SHORT_SQUEEZE_RATIO: u16 = 1_500;

// ---------------------------------------------------------------------------
// Margin and credit (PERCENT_100 scale)
// ---------------------------------------------------------------------------

pub const MARGIN_OPEN_RATIO: i64 = 2_000;

pub const MARGIN_LIQUIDATION_RATIO: i64 = 1_000;

pub const CREDIT_OPEN_RATIO: i64 = 12_500;

pub const CREDIT_LIQUIDATION_RATIO: i64 = 11_000;

pub const CREDIT_MIN_INTEREST: i64 = 100;

pub const CREDIT_VARIABLE_INTEREST: i64 = 400;

/// Interest rates never exceed 50% APR.
pub const CREDIT_MAX_INTEREST: i64 = 50 * PERCENT_1;

/// Outstanding debt may not exceed 50% of the debt pool's reserve.
pub const MARKET_MAX_CREDIT_RATIO: i64 = 5_000;

/// Collateral and debt are stress-tested at this multiple of their size.
pub const CREDIT_CHECK_MULTIPLIER: i64 = 10;

// ---------------------------------------------------------------------------
// Time
// ---------------------------------------------------------------------------

pub const SECONDS_PER_YEAR: i64 = 31_536_000;

pub const SECONDS_PER_DAY: i64 = 86_400;

pub const SECONDS_PER_HOUR: i64 = 3_600;

/// Interest is not accrued more often than this.
pub const INTEREST_MIN_INTERVAL_SECS: i64 = 60;

/// Interest at or below this amount is deferred to a later pass.
pub const INTEREST_MIN_AMOUNT: i64 = 10;

/// Price-history sample period.
pub const MEDIAN_LIQUIDITY_INTERVAL_SECS: i64 = 600;

pub const FORCE_SETTLEMENT_DELAY_SECS: i64 = SECONDS_PER_DAY;

pub const FORCE_SETTLEMENT_OFFSET: i64 = 0;

/// Maximum share of supply settled per sweep (20%).
pub const FORCE_SETTLEMENT_MAX_VOLUME: i64 = 2_000;

/// A published price feed stops being usable after this long.
pub const PRICE_FEED_LIFETIME_SECS: i64 = SECONDS_PER_DAY;

pub const MIN_FEED_LIFETIME_SECS: i64 = 60;

/// Nominal block interval in microseconds.
pub const BLOCK_INTERVAL_MICROS: i64 = 788_400;

// ---------------------------------------------------------------------------
// Options and prediction markets
// ---------------------------------------------------------------------------

pub const OPTION_ASSET_PREFIX: &str = "OPT.";

/// Strikes above and below the median price per series and side.
pub const OPTION_NUM_STRIKES: u32 = 5;

/// Spacing between adjacent strikes (5%).
pub const OPTION_STRIKE_WIDTH_PERCENT: i64 = 500;

/// Quote units covered by one option unit.
pub const OPTION_ASSET_MULTIPLE: i64 = 100;

/// Monthly series listed per option pool; an expired series is relisted
/// this many months later.
pub const OPTION_SERIES_MONTHS: u32 = 12;

/// Window after the outcome time in which resolvers vote.
pub const PREDICTION_RESOLUTION_SECS: i64 = 7 * SECONDS_PER_DAY;

pub const PREDICTION_MIN_OUTCOMES: usize = 2;

/// Suffix of the outcome every prediction pool carries for unresolvable markets.
pub const INVALID_OUTCOME: &str = "INVALID";

// ---------------------------------------------------------------------------
// Scheduling (blocks)
// ---------------------------------------------------------------------------

pub const MEDIAN_UPDATE_BLOCKS: u64 = 20;

pub const CREDIT_UPDATE_BLOCKS: u64 = 20;

pub const MARGIN_UPDATE_BLOCKS: u64 = 20;

pub const SETTLEMENT_SWEEP_BLOCKS: u64 = 1;

pub const EXPIRY_SWEEP_BLOCKS: u64 = 1;

pub const OPTION_SWEEP_BLOCKS: u64 = 20;

pub const PREDICTION_SWEEP_BLOCKS: u64 = 20;

// ---------------------------------------------------------------------------
// Accounts and symbols
// ---------------------------------------------------------------------------

pub const CORE_SYMBOL: &str = "COIN";

/// Network credit asset; its pool against the core asset backs every credit check.
pub const CREDIT_SYMBOL: &str = "CREDIT";

/// Receives credit-default write-offs.
pub const NETWORK_ACCOUNT: &str = "network";
