//! Engine configuration.
//!
//! Every value here feeds consensus arithmetic or scheduling, so all nodes of
//! one network must load identical configuration. Defaults come from
//! [`crate::constants`].

use serde::{Deserialize, Serialize};

use crate::{AccountName, LiquimatchError, Result, Symbol, constants};

/// Trading and interest fee percentages (`PERCENT_100` scale).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeeConfig {
    pub trading_fee_percent: i64,
    pub network_percent: i64,
    pub maker_interface_percent: i64,
    pub taker_interface_percent: i64,
    pub interest_fee_percent: i64,
}

impl Default for FeeConfig {
    fn default() -> Self {
        Self {
            trading_fee_percent: constants::TRADING_FEE_PERCENT,
            network_percent: constants::NETWORK_TRADING_FEE_PERCENT,
            maker_interface_percent: constants::MAKER_TRADING_FEE_PERCENT,
            taker_interface_percent: constants::TAKER_TRADING_FEE_PERCENT,
            interest_fee_percent: constants::INTEREST_FEE_PERCENT,
        }
    }
}

/// Synthetic-asset collateral ratios (`COLLATERAL_RATIO_DENOM` scale).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CollateralConfig {
    pub maintenance_collateral_ratio: u16,
    pub max_short_squeeze_ratio: u16,
}

impl Default for CollateralConfig {
    fn default() -> Self {
        Self {
            maintenance_collateral_ratio: constants::MAINTENANCE_COLLATERAL_RATIO,
            max_short_squeeze_ratio: constants::MAX_SHORT_SQUEEZE_RATIO,
        }
    }
}

/// Credit pool, loan and margin parameters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreditConfig {
    pub margin_open_ratio: i64,
    pub margin_liquidation_ratio: i64,
    pub credit_open_ratio: i64,
    pub credit_liquidation_ratio: i64,
    pub min_interest: i64,
    pub variable_interest: i64,
    pub max_interest: i64,
    pub market_max_credit_ratio: i64,
    pub check_multiplier: i64,
    pub interest_min_interval_secs: i64,
    pub interest_min_amount: i64,
}

impl Default for CreditConfig {
    fn default() -> Self {
        Self {
            margin_open_ratio: constants::MARGIN_OPEN_RATIO,
            margin_liquidation_ratio: constants::MARGIN_LIQUIDATION_RATIO,
            credit_open_ratio: constants::CREDIT_OPEN_RATIO,
            credit_liquidation_ratio: constants::CREDIT_LIQUIDATION_RATIO,
            min_interest: constants::CREDIT_MIN_INTEREST,
            variable_interest: constants::CREDIT_VARIABLE_INTEREST,
            max_interest: constants::CREDIT_MAX_INTEREST,
            market_max_credit_ratio: constants::MARKET_MAX_CREDIT_RATIO,
            check_multiplier: constants::CREDIT_CHECK_MULTIPLIER,
            interest_min_interval_secs: constants::INTEREST_MIN_INTERVAL_SECS,
            interest_min_amount: constants::INTEREST_MIN_AMOUNT,
        }
    }
}

/// Price-history sampling.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MedianConfig {
    pub interval_secs: i64,
    pub day_window: usize,
    pub hour_window: usize,
}

impl Default for MedianConfig {
    fn default() -> Self {
        let interval = constants::MEDIAN_LIQUIDITY_INTERVAL_SECS;
        Self {
            interval_secs: interval,
            day_window: 1 + (constants::SECONDS_PER_DAY / interval) as usize,
            hour_window: 1 + (constants::SECONDS_PER_HOUR / interval) as usize,
        }
    }
}

/// Force-settlement and feed parameters applied to every synthetic asset.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SettlementConfig {
    pub delay_secs: i64,
    pub offset_percent: i64,
    pub max_volume_percent: i64,
    pub feed_lifetime_secs: i64,
}

impl Default for SettlementConfig {
    fn default() -> Self {
        Self {
            delay_secs: constants::FORCE_SETTLEMENT_DELAY_SECS,
            offset_percent: constants::FORCE_SETTLEMENT_OFFSET,
            max_volume_percent: constants::FORCE_SETTLEMENT_MAX_VOLUME,
            feed_lifetime_secs: constants::PRICE_FEED_LIFETIME_SECS,
        }
    }
}

/// Option series listing and prediction market windows.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DerivativeConfig {
    pub num_strikes: u32,
    pub strike_width_percent: i64,
    pub option_multiple: i64,
    pub series_months: u32,
    pub resolution_secs: i64,
}

impl Default for DerivativeConfig {
    fn default() -> Self {
        Self {
            num_strikes: constants::OPTION_NUM_STRIKES,
            strike_width_percent: constants::OPTION_STRIKE_WIDTH_PERCENT,
            option_multiple: constants::OPTION_ASSET_MULTIPLE,
            series_months: constants::OPTION_SERIES_MONTHS,
            resolution_secs: constants::PREDICTION_RESOLUTION_SECS,
        }
    }
}

/// Cadence of the periodic tasks, in blocks.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScheduleConfig {
    pub median_blocks: u64,
    pub credit_blocks: u64,
    pub margin_blocks: u64,
    pub settlement_blocks: u64,
    pub expiry_blocks: u64,
    pub option_blocks: u64,
    pub prediction_blocks: u64,
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self {
            median_blocks: constants::MEDIAN_UPDATE_BLOCKS,
            credit_blocks: constants::CREDIT_UPDATE_BLOCKS,
            margin_blocks: constants::MARGIN_UPDATE_BLOCKS,
            settlement_blocks: constants::SETTLEMENT_SWEEP_BLOCKS,
            expiry_blocks: constants::EXPIRY_SWEEP_BLOCKS,
            option_blocks: constants::OPTION_SWEEP_BLOCKS,
            prediction_blocks: constants::PREDICTION_SWEEP_BLOCKS,
        }
    }
}

/// Top-level engine configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Fixed-point scale for prices and ratios.
    pub precision: i64,
    /// Intermediate asset for two-hop pool routing.
    pub core_symbol: Symbol,
    /// Network credit asset paired with the core asset.
    pub credit_symbol: Symbol,
    /// Account charged with credit defaults.
    pub network_account: AccountName,
    pub fees: FeeConfig,
    pub collateral: CollateralConfig,
    pub credit: CreditConfig,
    pub median: MedianConfig,
    pub settlement: SettlementConfig,
    pub derivatives: DerivativeConfig,
    pub schedule: ScheduleConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            precision: constants::PRECISION,
            core_symbol: Symbol::new(constants::CORE_SYMBOL),
            credit_symbol: Symbol::new(constants::CREDIT_SYMBOL),
            network_account: AccountName::new(constants::NETWORK_ACCOUNT),
            fees: FeeConfig::default(),
            collateral: CollateralConfig::default(),
            credit: CreditConfig::default(),
            median: MedianConfig::default(),
            settlement: SettlementConfig::default(),
            derivatives: DerivativeConfig::default(),
            schedule: ScheduleConfig::default(),
        }
    }
}

impl EngineConfig {
    /// Defaults with a different fixed-point scale.
    #[must_use]
    pub fn with_precision(precision: i64) -> Self {
        Self {
            precision,
            ..Self::default()
        }
    }

    pub fn from_json(json: &str) -> Result<Self> {
        let cfg: Self = serde_json::from_str(json)?;
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Reject configurations that would break consensus arithmetic.
    pub fn validate(&self) -> Result<()> {
        let bad = |msg: &str| Err(LiquimatchError::Configuration(msg.to_string()));
        if self.precision <= 0 {
            return bad("precision must be positive");
        }
        if self.core_symbol == self.credit_symbol {
            return bad("core and credit symbols must differ");
        }
        let f = &self.fees;
        if f.trading_fee_percent < 0 || f.trading_fee_percent > constants::PERCENT_100 {
            return bad("trading fee percent out of range");
        }
        if f.network_percent + f.maker_interface_percent + f.taker_interface_percent
            != constants::PERCENT_100
        {
            return bad("trading fee shares must sum to PERCENT_100");
        }
        if f.interest_fee_percent < 0 || f.interest_fee_percent > constants::PERCENT_100 {
            return bad("interest fee percent out of range");
        }
        let c = &self.collateral;
        if c.maintenance_collateral_ratio < constants::MIN_COLLATERAL_RATIO
            || c.maintenance_collateral_ratio > constants::MAX_COLLATERAL_RATIO
        {
            return bad("maintenance collateral ratio out of range");
        }
        if c.max_short_squeeze_ratio < constants::MIN_COLLATERAL_RATIO
            || c.max_short_squeeze_ratio > constants::MAX_COLLATERAL_RATIO
        {
            return bad("max short squeeze ratio out of range");
        }
        let cr = &self.credit;
        if cr.margin_liquidation_ratio >= cr.margin_open_ratio {
            return bad("margin liquidation ratio must be below the open ratio");
        }
        if cr.credit_liquidation_ratio >= cr.credit_open_ratio {
            return bad("credit liquidation ratio must be below the open ratio");
        }
        if cr.check_multiplier <= 0 || cr.interest_min_interval_secs < 0 {
            return bad("credit check parameters must be positive");
        }
        let m = &self.median;
        if m.interval_secs <= 0 || m.hour_window == 0 || m.day_window < m.hour_window {
            return bad("median windows are inconsistent");
        }
        let s = &self.schedule;
        if [
            s.median_blocks,
            s.credit_blocks,
            s.margin_blocks,
            s.settlement_blocks,
            s.expiry_blocks,
            s.option_blocks,
            s.prediction_blocks,
        ]
        .contains(&0)
        {
            return bad("schedule cadences must be non-zero");
        }
        if self.settlement.max_volume_percent <= 0
            || self.settlement.max_volume_percent > constants::PERCENT_100
        {
            return bad("force settlement volume out of range");
        }
        if self.settlement.feed_lifetime_secs < constants::MIN_FEED_LIFETIME_SECS {
            return bad("feed lifetime below the minimum");
        }
        let d = &self.derivatives;
        if d.strike_width_percent <= 0 || d.option_multiple <= 0 || d.series_months == 0 {
            return bad("option series parameters must be positive");
        }
        if i64::from(d.num_strikes) * d.strike_width_percent >= constants::PERCENT_100 {
            return bad("lowest option strike must stay above zero");
        }
        if d.resolution_secs <= 0 {
            return bad("prediction resolution window must be positive");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let cfg = EngineConfig::default();
        cfg.validate().unwrap();
        assert_eq!(cfg.median.day_window, 145);
        assert_eq!(cfg.median.hour_window, 7);
        assert_eq!(cfg.fees.trading_fee_percent, 10);
    }

    #[test]
    fn fee_shares_must_sum() {
        let mut cfg = EngineConfig::default();
        cfg.fees.network_percent = 4_000;
        assert!(matches!(
            cfg.validate(),
            Err(LiquimatchError::Configuration(_))
        ));
    }

    #[test]
    fn liquidation_above_open_rejected() {
        let mut cfg = EngineConfig::default();
        cfg.credit.credit_liquidation_ratio = cfg.credit.credit_open_ratio;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn short_feed_lifetime_rejected() {
        let mut cfg = EngineConfig::default();
        cfg.settlement.feed_lifetime_secs = 59;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn strike_ladder_must_stay_positive() {
        let mut cfg = EngineConfig::default();
        cfg.derivatives.num_strikes = 20;
        assert!(cfg.validate().is_err());
        cfg.derivatives.num_strikes = 19;
        cfg.validate().unwrap();
    }

    #[test]
    fn json_roundtrip() {
        let cfg = EngineConfig::with_precision(1_000_000);
        let json = cfg.to_json().unwrap();
        let back = EngineConfig::from_json(&json).unwrap();
        assert_eq!(cfg, back);
    }

    #[test]
    fn partial_json_fills_defaults() {
        let cfg = EngineConfig::from_json(r#"{ "precision": 1000000, "core_symbol": "BASE" }"#)
            .unwrap();
        assert_eq!(cfg.precision, 1_000_000);
        assert_eq!(cfg.core_symbol, Symbol::new("BASE"));
        assert_eq!(cfg.fees, FeeConfig::default());
    }
}
