//! Error types for the Liquimatch engine.
//!
//! All errors use the `LM_ERR_` prefix convention for easy grepping in logs.
//! Error codes are grouped by subsystem:
//! - 1xx: Validation (malformed input, unknown objects)
//! - 2xx: Balance errors
//! - 3xx: Liquidity / solvency errors
//! - 4xx: Synthetic asset / settlement errors
//! - 5xx: Matching errors
//! - 8xx: Consensus invariant violations (fatal)
//! - 9xx: General / internal errors
//!
//! Validation and solvency errors reject the enclosing transaction with no
//! state change. Fatal errors mean the engine itself is wrong and block
//! processing must stop; see [`LiquimatchError::class`].

use thiserror::Error;

use crate::{AccountName, Asset, OrderId, Symbol};

/// How the caller must react to an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// Bad input. Reject the transaction.
    Validation,
    /// Valid input the ledger cannot afford. Reject the transaction.
    Solvency,
    /// Consensus bug. Abort block processing.
    Fatal,
}

/// Central error enum for all Liquimatch operations.
#[derive(Debug, Error)]
pub enum LiquimatchError {
    // =================================================================
    // Validation Errors (1xx)
    // =================================================================
    #[error("LM_ERR_100: Invalid amount: {reason}")]
    InvalidAmount { reason: String },

    #[error("LM_ERR_101: Symbol mismatch: expected {expected}, got {actual}")]
    SymbolMismatch { expected: Symbol, actual: Symbol },

    #[error("LM_ERR_102: Liquidity pool not found: {a}/{b}")]
    PoolNotFound { a: Symbol, b: Symbol },

    #[error("LM_ERR_103: Credit pool not found: {0}")]
    CreditPoolNotFound(Symbol),

    #[error("LM_ERR_104: Order not found: {0}")]
    OrderNotFound(OrderId),

    #[error("LM_ERR_105: Order already exists: {0}")]
    DuplicateOrder(OrderId),

    #[error("LM_ERR_106: Asset not found: {0}")]
    AssetNotFound(Symbol),

    #[error("LM_ERR_107: Invalid price: {reason}")]
    InvalidPrice { reason: String },

    #[error("LM_ERR_108: Invalid order: {reason}")]
    InvalidOrder { reason: String },

    #[error("LM_ERR_109: Credit loan not found: {0}")]
    LoanNotFound(OrderId),

    #[error("LM_ERR_110: Call order not found: {borrower} in {symbol}")]
    CallOrderNotFound { borrower: AccountName, symbol: Symbol },

    #[error("LM_ERR_111: Pool already exists: {a}/{b}")]
    DuplicatePool { a: Symbol, b: Symbol },

    #[error("LM_ERR_112: Option pool not found: {a}/{b}")]
    OptionPoolNotFound { a: Symbol, b: Symbol },

    #[error("LM_ERR_113: Option series not found: {0}")]
    OptionNotFound(Symbol),

    #[error("LM_ERR_114: Option series has expired: {0}")]
    OptionExpired(Symbol),

    #[error("LM_ERR_115: Prediction pool not found: {0}")]
    PredictionPoolNotFound(Symbol),

    // =================================================================
    // Balance Errors (2xx)
    // =================================================================
    #[error("LM_ERR_200: Insufficient balance for {account}: need {needed}, have {available}")]
    InsufficientBalance {
        account: AccountName,
        needed: Asset,
        available: Asset,
    },

    #[error("LM_ERR_201: Insufficient pending supply: need {needed}, have {available}")]
    InsufficientPendingSupply { needed: Asset, available: Asset },

    // =================================================================
    // Liquidity / Solvency Errors (3xx)
    // =================================================================
    #[error("LM_ERR_300: Insufficient liquidity: {reason}")]
    InsufficientLiquidity { reason: String },

    #[error("LM_ERR_301: Credit check failed: {reason}")]
    CreditCheckFailed { reason: String },

    #[error("LM_ERR_302: Margin check failed: {reason}")]
    MarginCheckFailed { reason: String },

    #[error("LM_ERR_303: Insufficient collateral: {reason}")]
    InsufficientCollateral { reason: String },

    // =================================================================
    // Synthetic Asset / Settlement Errors (4xx)
    // =================================================================
    #[error("LM_ERR_400: No price feed for {0}")]
    NoPriceFeed(Symbol),

    #[error("LM_ERR_401: Asset has been globally settled: {0}")]
    AssetGloballySettled(Symbol),

    #[error("LM_ERR_402: Settlement fund exceeded: {reason}")]
    SettlementFundExceeded { reason: String },

    #[error("LM_ERR_403: Asset is not a synthetic asset: {0}")]
    NotSynthetic(Symbol),

    // =================================================================
    // Matching Errors (5xx)
    // =================================================================
    #[error("LM_ERR_500: Matching failed: {reason}")]
    MatchingFailed { reason: String },

    // =================================================================
    // Consensus Invariants (8xx)
    // =================================================================
    #[error("LM_ERR_800: Invariant violation: {reason}")]
    InvariantViolation { reason: String },

    #[error("LM_ERR_801: Supply invariant violation: {reason}")]
    SupplyInvariantViolation { reason: String },

    #[error("LM_ERR_802: Arithmetic overflow in {op}")]
    ArithmeticOverflow { op: &'static str },

    #[error("LM_ERR_803: Flash loan left unpaid: {0}")]
    UnpaidFlashLoan(OrderId),

    #[error("LM_ERR_804: Determinism violation: expected {expected}, got {actual}")]
    DeterminismViolation { expected: String, actual: String },

    // =================================================================
    // General / Internal (9xx)
    // =================================================================
    #[error("LM_ERR_900: Internal error: {0}")]
    Internal(String),

    #[error("LM_ERR_901: Serialization error: {0}")]
    Serialization(String),

    #[error("LM_ERR_902: Configuration error: {0}")]
    Configuration(String),
}

impl LiquimatchError {
    /// Map this error onto the rejection / abort taxonomy.
    #[must_use]
    pub fn class(&self) -> ErrorClass {
        match self {
            Self::InsufficientBalance { .. }
            | Self::InsufficientLiquidity { .. }
            | Self::CreditCheckFailed { .. }
            | Self::MarginCheckFailed { .. }
            | Self::InsufficientCollateral { .. }
            | Self::SettlementFundExceeded { .. } => ErrorClass::Solvency,
            Self::InsufficientPendingSupply { .. }
            | Self::InvariantViolation { .. }
            | Self::SupplyInvariantViolation { .. }
            | Self::ArithmeticOverflow { .. }
            | Self::UnpaidFlashLoan(_)
            | Self::DeterminismViolation { .. }
            | Self::Internal(_) => ErrorClass::Fatal,
            _ => ErrorClass::Validation,
        }
    }

    #[must_use]
    pub fn is_fatal(&self) -> bool {
        self.class() == ErrorClass::Fatal
    }

    pub(crate) fn invalid_amount(reason: impl Into<String>) -> Self {
        Self::InvalidAmount {
            reason: reason.into(),
        }
    }
}

/// Crate-wide `Result` alias.
pub type Result<T> = std::result::Result<T, LiquimatchError>;

impl From<serde_json::Error> for LiquimatchError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

/// Reject non-positive amounts.
pub fn ensure_positive(asset: &Asset, what: &str) -> Result<()> {
    if asset.amount <= 0 {
        return Err(LiquimatchError::invalid_amount(format!(
            "{what} must be positive, got {asset}"
        )));
    }
    Ok(())
}

/// Fail with an invariant violation unless `cond` holds.
pub fn ensure_invariant(cond: bool, reason: impl FnOnce() -> String) -> Result<()> {
    if !cond {
        return Err(LiquimatchError::InvariantViolation { reason: reason() });
    }
    Ok(())
}
