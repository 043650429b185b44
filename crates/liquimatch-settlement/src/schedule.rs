//! Block-count cadence of the periodic tasks.

use liquimatch_types::ScheduleConfig;
use serde::{Deserialize, Serialize};

/// Work run between transactions, in the order it runs within a block.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum PeriodicTask {
    /// Sample pool prices and refresh the hour / day medians.
    MedianPrices,
    /// Accrue interest on credit loans, liquidate the undercollateralized.
    CreditLoans,
    /// Accrue, revalue and liquidate or exit margin orders.
    MarginOrders,
    /// Execute due force settlements.
    ForceSettlements,
    /// Cancel expired limit orders and close expired margin orders.
    OrderExpiry,
    /// Close expired option series and relist them.
    OptionSeries,
    /// Settle prediction pools whose resolution window has ended.
    PredictionPools,
}

impl PeriodicTask {
    pub const ALL: [Self; 7] = [
        Self::MedianPrices,
        Self::CreditLoans,
        Self::MarginOrders,
        Self::ForceSettlements,
        Self::OrderExpiry,
        Self::OptionSeries,
        Self::PredictionPools,
    ];

    /// Run every this many blocks.
    #[must_use]
    pub fn cadence(self, schedule: &ScheduleConfig) -> u64 {
        match self {
            Self::MedianPrices => schedule.median_blocks,
            Self::CreditLoans => schedule.credit_blocks,
            Self::MarginOrders => schedule.margin_blocks,
            Self::ForceSettlements => schedule.settlement_blocks,
            Self::OrderExpiry => schedule.expiry_blocks,
            Self::OptionSeries => schedule.option_blocks,
            Self::PredictionPools => schedule.prediction_blocks,
        }
    }
}

/// Tasks due at `block_num`, in run order. Medians come first so the
/// updaters value positions at fresh prices.
#[must_use]
pub fn due_tasks(schedule: &ScheduleConfig, block_num: u64) -> Vec<PeriodicTask> {
    PeriodicTask::ALL
        .into_iter()
        .filter(|task| {
            let cadence = task.cadence(schedule);
            cadence > 0 && block_num % cadence == 0
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_cadence() {
        let schedule = ScheduleConfig::default();
        assert_eq!(
            due_tasks(&schedule, 1),
            vec![PeriodicTask::ForceSettlements, PeriodicTask::OrderExpiry]
        );
        assert_eq!(due_tasks(&schedule, 40), PeriodicTask::ALL.to_vec());
    }

    #[test]
    fn custom_cadence() {
        let schedule = ScheduleConfig {
            median_blocks: 3,
            credit_blocks: 6,
            margin_blocks: 4,
            settlement_blocks: 5,
            expiry_blocks: 7,
            option_blocks: 24,
            prediction_blocks: 8,
        };
        assert_eq!(due_tasks(&schedule, 12), vec![
            PeriodicTask::MedianPrices,
            PeriodicTask::CreditLoans,
            PeriodicTask::MarginOrders,
        ]);
        assert_eq!(due_tasks(&schedule, 24), vec![
            PeriodicTask::MedianPrices,
            PeriodicTask::CreditLoans,
            PeriodicTask::MarginOrders,
            PeriodicTask::OptionSeries,
            PeriodicTask::PredictionPools,
        ]);
        assert!(due_tasks(&schedule, 1).is_empty());
    }
}
