//! Credit loans drawn against a credit pool.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{AccountName, Asset, OrderId, Price, Symbol};

/// Debt borrowed from the credit pool of `debt.symbol`, secured by
/// `collateral`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreditLoan {
    pub id: OrderId,
    /// Principal plus accrued interest.
    pub debt: Asset,
    /// Interest accrued over the life of the loan.
    pub interest: Asset,
    pub collateral: Asset,
    /// `collateral / debt`.
    pub loan_price: Price,
    /// The loan is liquidated when `loan_price` falls below this.
    pub liquidation_price: Price,
    pub last_interest_rate: i64,
    pub last_interest_time: DateTime<Utc>,
    /// Must be repaid within the transaction that opened it.
    pub flash_loan: bool,
    pub created: DateTime<Utc>,
}

impl CreditLoan {
    #[must_use]
    pub fn owner(&self) -> &AccountName {
        &self.id.owner
    }

    #[must_use]
    pub fn debt_symbol(&self) -> &Symbol {
        &self.debt.symbol
    }

    #[must_use]
    pub fn collateral_symbol(&self) -> &Symbol {
        &self.collateral.symbol
    }

    /// Recompute `loan_price` from the current balances.
    pub fn refresh_loan_price(&mut self) {
        self.loan_price = Price::new(self.collateral.clone(), self.debt.clone());
    }
}
