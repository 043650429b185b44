//! Virtual operations: the write-only audit record of every economically
//! meaningful state change.
//!
//! The engine emits exactly one [`VirtualOp`] per change: one per side of a
//! fill, one per pool operation, one per liquidation or settlement. The
//! [`VirtualOpLog`] sink assigns ids; see `liquimatch-ledger`.

use serde::{Deserialize, Serialize};

use crate::{AccountName, Asset, OrderId, Price, Symbol};

/// Which kind of order took part in a fill.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OrderKind {
    Limit,
    Margin,
    Call,
    ForceSettlement,
    Pool,
    Option,
}

/// Why an order left the book without filling.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CancelReason {
    Requested,
    Expired,
    /// Remaining balance too small to buy anything at its own price.
    Culled,
    /// Asset was globally settled or lost its feed.
    SettlementHalted,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum VirtualOp {
    /// One side of a match.
    Fill {
        owner: AccountName,
        order: Option<OrderId>,
        kind: OrderKind,
        pays: Asset,
        receives: Asset,
        fee: Asset,
        fill_price: Price,
        is_maker: bool,
    },
    /// Exact-input, exact-output or limit swap against a liquidity pool.
    PoolSwap {
        account: AccountName,
        pool_share: Symbol,
        paid: Asset,
        received: Asset,
        fee: Asset,
    },
    LiquidityFund {
        account: AccountName,
        paid: Asset,
        shares: Asset,
    },
    LiquidityWithdraw {
        account: AccountName,
        shares: Asset,
        received: Asset,
    },
    CreditLend {
        account: AccountName,
        paid: Asset,
        shares: Asset,
    },
    CreditWithdraw {
        account: AccountName,
        shares: Asset,
        received: Asset,
    },
    LoanOpened {
        loan: OrderId,
        debt: Asset,
        collateral: Asset,
    },
    /// Borrowed more, repaid part, or moved collateral.
    LoanUpdated {
        loan: OrderId,
        debt: Asset,
        collateral: Asset,
    },
    LoanRepaid {
        loan: OrderId,
        repaid: Asset,
        interest_fee: Asset,
        collateral_returned: Asset,
    },
    InterestAccrued {
        debt_symbol: Symbol,
        total: Asset,
        rate: i64,
    },
    LoanLiquidated {
        loan: OrderId,
        collateral_sold: Asset,
        debt_repaid: Asset,
        default: Asset,
    },
    MarginOpened {
        order: OrderId,
        debt: Asset,
        collateral: Asset,
    },
    MarginClosed {
        order: OrderId,
        debt_repaid: Asset,
        collateral_returned: Asset,
        default: Asset,
    },
    OrderCancelled {
        owner: AccountName,
        order: OrderId,
        kind: OrderKind,
        refunded: Asset,
        reason: CancelReason,
    },
    CallUpdated {
        borrower: AccountName,
        debt: Asset,
        collateral: Asset,
    },
    GlobalSettlement {
        symbol: Symbol,
        settlement_price: Price,
        settlement_fund: Asset,
    },
    SettlementRedeemed {
        account: AccountName,
        paid: Asset,
        received: Asset,
    },
    PredictionPoolCreated {
        creator: AccountName,
        prediction: Symbol,
        bond: Asset,
    },
    /// Options written (positive) or bought back (negative) against an order.
    OptionWritten {
        order: OrderId,
        option: Asset,
        underlying: Asset,
    },
    OptionExercised {
        account: AccountName,
        option: Asset,
        paid: Asset,
        received: Asset,
    },
    /// A writer's share of an exercise.
    OptionAssigned {
        order: OrderId,
        delivered: Asset,
        received: Asset,
    },
    /// A temporary asset balance wiped at expiry or pool close.
    BalanceCleared {
        account: AccountName,
        cleared: Asset,
    },
    PredictionExchange {
        account: AccountName,
        collateral: Asset,
        exchange_base: bool,
        withdraw: bool,
    },
    PredictionResolved {
        account: AccountName,
        outcome: Symbol,
        amount: Asset,
    },
    /// Collateral paid out of a closing prediction pool.
    PredictionPayout {
        account: AccountName,
        received: Asset,
        bond: bool,
    },
    PredictionClosed {
        prediction: Symbol,
        outcome: Symbol,
        collateral: Asset,
    },
}

impl VirtualOp {
    /// Accounts named by this record.
    #[must_use]
    pub fn participants(&self) -> Vec<&AccountName> {
        match self {
            Self::Fill { owner, .. } | Self::OrderCancelled { owner, .. } => vec![owner],
            Self::PoolSwap { account, .. }
            | Self::LiquidityFund { account, .. }
            | Self::LiquidityWithdraw { account, .. }
            | Self::CreditLend { account, .. }
            | Self::CreditWithdraw { account, .. }
            | Self::SettlementRedeemed { account, .. }
            | Self::OptionExercised { account, .. }
            | Self::BalanceCleared { account, .. }
            | Self::PredictionExchange { account, .. }
            | Self::PredictionResolved { account, .. }
            | Self::PredictionPayout { account, .. } => vec![account],
            Self::LoanOpened { loan, .. }
            | Self::LoanUpdated { loan, .. }
            | Self::LoanRepaid { loan, .. }
            | Self::LoanLiquidated { loan, .. } => vec![&loan.owner],
            Self::MarginOpened { order, .. }
            | Self::MarginClosed { order, .. }
            | Self::OptionWritten { order, .. }
            | Self::OptionAssigned { order, .. } => vec![&order.owner],
            Self::CallUpdated { borrower, .. } => vec![borrower],
            Self::PredictionPoolCreated { creator, .. } => vec![creator],
            Self::InterestAccrued { .. } | Self::GlobalSettlement { .. } | Self::PredictionClosed { .. } => {
                Vec::new()
            }
        }
    }

    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            Self::Fill { .. } => "fill",
            Self::PoolSwap { .. } => "pool_swap",
            Self::LiquidityFund { .. } => "liquidity_fund",
            Self::LiquidityWithdraw { .. } => "liquidity_withdraw",
            Self::CreditLend { .. } => "credit_lend",
            Self::CreditWithdraw { .. } => "credit_withdraw",
            Self::LoanOpened { .. } => "loan_opened",
            Self::LoanUpdated { .. } => "loan_updated",
            Self::LoanRepaid { .. } => "loan_repaid",
            Self::InterestAccrued { .. } => "interest_accrued",
            Self::LoanLiquidated { .. } => "loan_liquidated",
            Self::MarginOpened { .. } => "margin_opened",
            Self::MarginClosed { .. } => "margin_closed",
            Self::OrderCancelled { .. } => "order_cancelled",
            Self::CallUpdated { .. } => "call_updated",
            Self::GlobalSettlement { .. } => "global_settlement",
            Self::SettlementRedeemed { .. } => "settlement_redeemed",
            Self::PredictionPoolCreated { .. } => "prediction_pool_created",
            Self::OptionWritten { .. } => "option_written",
            Self::OptionExercised { .. } => "option_exercised",
            Self::OptionAssigned { .. } => "option_assigned",
            Self::BalanceCleared { .. } => "balance_cleared",
            Self::PredictionExchange { .. } => "prediction_exchange",
            Self::PredictionResolved { .. } => "prediction_resolved",
            Self::PredictionPayout { .. } => "prediction_payout",
            Self::PredictionClosed { .. } => "prediction_closed",
        }
    }
}

/// Write-only sink for virtual operations.
pub trait VirtualOpLog {
    fn push(&mut self, op: VirtualOp);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fill_participants_is_owner() {
        let op = VirtualOp::Fill {
            owner: AccountName::new("alice"),
            order: None,
            kind: OrderKind::Pool,
            pays: Asset::new(1, "USD"),
            receives: Asset::new(1, "COIN"),
            fee: Asset::new(0, "COIN"),
            fill_price: Price::new(Asset::new(1, "USD"), Asset::new(1, "COIN")),
            is_maker: false,
        };
        assert_eq!(op.participants(), vec![&AccountName::new("alice")]);
        assert_eq!(op.name(), "fill");
    }

    #[test]
    fn serde_tagged_roundtrip() {
        let op = VirtualOp::InterestAccrued {
            debt_symbol: Symbol::new("USD"),
            total: Asset::new(12, "USD"),
            rate: 150,
        };
        let json = serde_json::to_string(&op).unwrap();
        let back: VirtualOp = serde_json::from_str(&json).unwrap();
        assert_eq!(op, back);
    }
}
