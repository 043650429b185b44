//! Asset metadata lookup.
//!
//! The engine only needs to know what kind of asset a symbol names, to pick
//! the accounting path (synthetic assets have call orders and settlement,
//! pool share assets are minted and burned by their pool).

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::{LiquimatchError, Result, Symbol};

/// Asset classes known to the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AssetType {
    Standard,
    Currency,
    Equity,
    Credit,
    /// Price-pegged synthetic backed by collateral in call orders.
    Bitasset,
    /// Share asset of a liquidity pool.
    LiquidityPool,
    /// Share asset of a credit pool.
    CreditPool,
    /// Option series; cleared when the series expires.
    Option,
    /// Prediction pool asset or one of its outcomes; cleared when the pool closes.
    Prediction,
}

impl AssetType {
    /// Share assets cannot themselves be pooled or lent.
    #[must_use]
    pub fn is_pool_share(self) -> bool {
        matches!(self, Self::LiquidityPool | Self::CreditPool)
    }

    /// Assets whose every balance is wiped at expiry.
    #[must_use]
    pub fn is_temporary(self) -> bool {
        matches!(self, Self::Option | Self::Prediction)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssetRecord {
    pub symbol: Symbol,
    pub asset_type: AssetType,
}

/// Symbol -> metadata table.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AssetRegistry {
    assets: BTreeMap<Symbol, AssetRecord>,
}

impl AssetRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, symbol: &Symbol, asset_type: AssetType) {
        self.assets.insert(
            symbol.clone(),
            AssetRecord {
                symbol: symbol.clone(),
                asset_type,
            },
        );
    }

    pub fn get(&self, symbol: &Symbol) -> Result<&AssetRecord> {
        self.assets
            .get(symbol)
            .ok_or_else(|| LiquimatchError::AssetNotFound(symbol.clone()))
    }

    #[must_use]
    pub fn contains(&self, symbol: &Symbol) -> bool {
        self.assets.contains_key(symbol)
    }

    #[must_use]
    pub fn is_bitasset(&self, symbol: &Symbol) -> bool {
        self.assets
            .get(symbol)
            .is_some_and(|r| r.asset_type == AssetType::Bitasset)
    }
}
