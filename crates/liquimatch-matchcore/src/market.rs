//! Everything the matching engine reads and writes besides the ledger.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use liquimatch_pool::PoolSet;
use liquimatch_types::{BitassetData, LiquimatchError, Result, Symbol};

use crate::orderbook::OrderBook;

/// Order book, pool store and synthetic-asset state of one engine.
#[derive(Debug, Clone, Default)]
pub struct MarketState {
    pub book: OrderBook,
    pub pools: PoolSet,
    pub bitassets: BTreeMap<Symbol, BitassetData>,
}

impl MarketState {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn bitasset(&self, symbol: &Symbol) -> Result<&BitassetData> {
        self.bitassets
            .get(symbol)
            .ok_or_else(|| LiquimatchError::NotSynthetic(symbol.clone()))
    }

    pub fn bitasset_mut(&mut self, symbol: &Symbol) -> Result<&mut BitassetData> {
        self.bitassets
            .get_mut(symbol)
            .ok_or_else(|| LiquimatchError::NotSynthetic(symbol.clone()))
    }

    /// Whether `debt` is a synthetic backed by `collateral` whose calls can
    /// be matched at `now`.
    #[must_use]
    pub fn calls_tradeable(&self, debt: &Symbol, collateral: &Symbol, now: DateTime<Utc>) -> bool {
        self.bitassets
            .get(debt)
            .is_some_and(|b| b.backing == *collateral && !b.has_settlement() && b.live_feed(now).is_some())
    }
}
