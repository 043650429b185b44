//! The transactional engine facade.
//!
//! [`Engine`] owns every piece of engine state and applies operations to it
//! all-or-nothing:
//!
//! ```text
//! transact(op):
//!     snapshot book, pools, ledger; remember op log length
//!     run op
//!     check flash loans repaid, check supply conservation
//!     any error -> restore snapshot, drop emitted ops
//! ```
//!
//! [`Engine::process_block`] advances block time and runs the periodic
//! tasks due at that height, each as its own transaction.

use chrono::{DateTime, Utc};
use liquimatch_ledger::{InMemoryLedger, MemoryOpLog, TxContext};
use liquimatch_matchcore::{
    LimitOrderRequest, MarginOrderRequest, MarginTriggers, MarketState, cancel_limit_order, clear_expired_orders,
    close_margin_position, edit_margin_order, open_margin_order, place_limit_order,
};
use liquimatch_pool::{OptionExpiry, PredictionPoolRequest};
use liquimatch_types::{
    AccountName, Asset, AssetRegistry, AssetType, BitassetData, CancelReason, EngineConfig, LiquimatchError, OrderId,
    Price, PriceFeed, Result, Symbol,
};
use serde::Serialize;

use crate::calls::{run_call_checks, update_call_order};
use crate::expiry::{close_prediction_pools, expire_option_series};
use crate::feeds::publish_feed;
use crate::force::{SettleOutcome, execute_force_settlements, request_force_settlement};
use crate::schedule::{PeriodicTask, due_tasks};
use crate::updater::{UpdateSummary, update_credit_loans, update_margin_orders};

/// What the periodic tasks of one block did.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct BlockReport {
    pub block_num: u64,
    pub tasks: Vec<PeriodicTask>,
    pub credit: UpdateSummary,
    pub margin: UpdateSummary,
    pub force_settlement_fills: usize,
    pub expired_orders: usize,
    pub options: OptionExpiry,
    pub predictions_closed: Vec<Symbol>,
}

pub struct Engine {
    config: EngineConfig,
    registry: AssetRegistry,
    ledger: InMemoryLedger,
    ops: MemoryOpLog,
    state: MarketState,
    block_num: u64,
    now: DateTime<Utc>,
}

impl Engine {
    /// An empty engine at block 0. The core and credit assets are
    /// registered.
    pub fn new(config: EngineConfig, genesis: DateTime<Utc>) -> Result<Self> {
        config.validate()?;
        let mut registry = AssetRegistry::new();
        registry.register(&config.core_symbol, AssetType::Currency);
        registry.register(&config.credit_symbol, AssetType::Credit);
        Ok(Self {
            config,
            registry,
            ledger: InMemoryLedger::new(),
            ops: MemoryOpLog::new(),
            state: MarketState::new(),
            block_num: 0,
            now: genesis,
        })
    }

    #[must_use]
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    #[must_use]
    pub fn registry(&self) -> &AssetRegistry {
        &self.registry
    }

    #[must_use]
    pub fn ledger(&self) -> &InMemoryLedger {
        &self.ledger
    }

    #[must_use]
    pub fn ops(&self) -> &MemoryOpLog {
        &self.ops
    }

    #[must_use]
    pub fn state(&self) -> &MarketState {
        &self.state
    }

    #[must_use]
    pub fn block_num(&self) -> u64 {
        self.block_num
    }

    #[must_use]
    pub fn now(&self) -> DateTime<Utc> {
        self.now
    }

    // =================================================================
    // Assets
    // =================================================================

    pub fn register_asset(&mut self, symbol: &Symbol, asset_type: AssetType) -> Result<()> {
        if self.registry.contains(symbol) {
            return Err(LiquimatchError::Configuration(format!("asset {symbol} is already registered")));
        }
        if asset_type == AssetType::Bitasset {
            return Err(LiquimatchError::Configuration(format!(
                "synthetic {symbol} needs a backing asset, use create_bitasset"
            )));
        }
        self.registry.register(symbol, asset_type);
        tracing::info!(symbol = %symbol, ?asset_type, "Asset registered");
        Ok(())
    }

    /// Register a synthetic asset backed by `backing`.
    pub fn create_bitasset(&mut self, symbol: &Symbol, backing: &Symbol) -> Result<()> {
        if self.registry.contains(symbol) {
            return Err(LiquimatchError::Configuration(format!("asset {symbol} is already registered")));
        }
        let backing_type = self.registry.get(backing)?.asset_type;
        if backing_type.is_pool_share()
            || backing_type.is_temporary()
            || self.registry.is_bitasset(backing)
            || symbol == backing
        {
            return Err(LiquimatchError::Configuration(format!("{backing} cannot back synthetic {symbol}")));
        }
        self.registry.register(symbol, AssetType::Bitasset);
        self.state
            .bitassets
            .insert(symbol.clone(), BitassetData::new(symbol, backing, self.config.settlement.feed_lifetime_secs));
        tracing::info!(symbol = %symbol, backing = %backing, "Synthetic asset created");
        Ok(())
    }

    /// Genesis allocation: issue `amount` straight into `account`.
    pub fn fund(&mut self, account: &str, amount: Asset) -> Result<()> {
        self.registry.get(&amount.symbol)?;
        self.ledger.fund(account, amount)
    }

    // =================================================================
    // Transactions
    // =================================================================

    /// Run `op` atomically. On any error every change it made, including
    /// emitted virtual operations, is undone.
    pub fn transact<T>(&mut self, op: impl FnOnce(&mut MarketState, &mut TxContext<'_>) -> Result<T>) -> Result<T> {
        let state_snapshot = self.state.clone();
        let ledger_snapshot = self.ledger.clone();
        let ops_mark = self.ops.len();

        let result = {
            let mut ctx = TxContext::new(&self.config, &self.registry, &mut self.ledger, &mut self.ops, self.now);
            op(&mut self.state, &mut ctx)
        };
        let result = result.and_then(|value| {
            self.state.pools.check_flash_loans()?;
            self.ledger.verify_conservation()?;
            Ok(value)
        });

        if let Err(err) = &result {
            self.state = state_snapshot;
            self.ledger = ledger_snapshot;
            self.ops.rollback_to(ops_mark);
            if err.is_fatal() {
                tracing::error!(block = self.block_num, error = %err, "Transaction aborted by invariant violation");
            } else {
                tracing::debug!(block = self.block_num, error = %err, "Transaction rejected");
            }
        }
        result
    }

    // =================================================================
    // Blocks
    // =================================================================

    /// Advance to `block_num` at time `now` and run the periodic tasks due
    /// at that height. A failing task aborts the block.
    pub fn process_block(&mut self, block_num: u64, now: DateTime<Utc>) -> Result<BlockReport> {
        if block_num <= self.block_num || now < self.now {
            return Err(LiquimatchError::InvalidOrder {
                reason: format!(
                    "block {block_num} at {now} does not follow block {} at {}",
                    self.block_num, self.now
                ),
            });
        }
        self.block_num = block_num;
        self.now = now;
        self.ops.begin_block(block_num);

        let mut report = BlockReport {
            block_num,
            ..BlockReport::default()
        };
        for task in due_tasks(&self.config.schedule, block_num) {
            match task {
                PeriodicTask::MedianPrices => self.transact(|s, _| {
                    s.pools.update_median_prices();
                    Ok(())
                })?,
                PeriodicTask::CreditLoans => report.credit = self.transact(|s, ctx| update_credit_loans(s, ctx))?,
                PeriodicTask::MarginOrders => report.margin = self.transact(|s, ctx| update_margin_orders(s, ctx))?,
                PeriodicTask::ForceSettlements => {
                    report.force_settlement_fills = self.transact(|s, ctx| execute_force_settlements(s, ctx))?;
                }
                PeriodicTask::OrderExpiry => {
                    report.expired_orders = self.transact(|s, ctx| clear_expired_orders(s, ctx))?;
                }
                PeriodicTask::OptionSeries => {
                    report.options = self.transact(|s, ctx| expire_option_series(s, ctx))?;
                    self.register_all(&report.options.listed, AssetType::Option);
                }
                PeriodicTask::PredictionPools => {
                    let closed = self.transact(|s, ctx| close_prediction_pools(s, ctx))?;
                    report.predictions_closed = closed.into_iter().map(|c| c.prediction).collect();
                }
            }
            report.tasks.push(task);
        }
        tracing::debug!(block_num, tasks = report.tasks.len(), ops = self.ops.len(), "Block processed");
        Ok(report)
    }

    // =================================================================
    // Order book
    // =================================================================

    /// Place a limit order. Trading a synthetic asset against its backing
    /// can make calls matchable, so margin calls run afterwards.
    pub fn place_limit_order(&mut self, req: LimitOrderRequest) -> Result<OrderId> {
        self.transact(|s, ctx| {
            let symbols = [req.amount_to_sell.symbol.clone(), req.min_to_receive.symbol.clone()];
            let id = place_limit_order(s, ctx, req)?;
            for symbol in &symbols {
                if s.bitassets.contains_key(symbol) {
                    run_call_checks(s, ctx, symbol)?;
                }
            }
            Ok(id)
        })
    }

    pub fn cancel_limit_order(&mut self, id: &OrderId) -> Result<Asset> {
        self.transact(|s, ctx| cancel_limit_order(s, ctx, id, CancelReason::Requested))
    }

    pub fn open_margin_order(&mut self, req: MarginOrderRequest) -> Result<OrderId> {
        self.transact(|s, ctx| open_margin_order(s, ctx, req))
    }

    pub fn edit_margin_order(
        &mut self,
        id: &OrderId,
        add_collateral: Option<&Asset>,
        triggers: Option<MarginTriggers>,
    ) -> Result<()> {
        self.transact(|s, ctx| edit_margin_order(s, ctx, id, add_collateral, triggers))
    }

    /// Close a margin position now, or offer it at `limit`.
    pub fn close_margin_position(&mut self, id: &OrderId, limit: Option<&Price>) -> Result<()> {
        self.transact(|s, ctx| close_margin_position(s, ctx, id, limit))
    }

    // =================================================================
    // Liquidity pools
    // =================================================================

    /// Seed a new pool from `account`. Returns the pool's share symbol, which
    /// is registered as a pool share asset.
    pub fn create_liquidity_pool(&mut self, account: &AccountName, first: &Asset, second: &Asset) -> Result<Symbol> {
        let share = self.transact(|s, ctx| s.pools.create_liquidity_pool(ctx, account, first, second))?;
        self.registry.register(&share, AssetType::LiquidityPool);
        Ok(share)
    }

    pub fn liquid_fund(&mut self, account: &AccountName, amount: &Asset, pair: &Symbol) -> Result<Asset> {
        self.transact(|s, ctx| s.pools.liquid_fund(ctx, account, amount, pair))
    }

    pub fn liquid_withdraw(&mut self, account: &AccountName, shares: &Asset, receive: &Symbol) -> Result<Asset> {
        self.transact(|s, ctx| s.pools.liquid_withdraw(ctx, account, shares, receive))
    }

    pub fn liquid_exchange(
        &mut self,
        account: &AccountName,
        amount: &Asset,
        receive: &Symbol,
        interface: Option<&AccountName>,
    ) -> Result<Asset> {
        self.transact(|s, ctx| s.pools.liquid_exchange(ctx, account, amount, receive, interface))
    }

    pub fn liquid_acquire(
        &mut self,
        account: &AccountName,
        receive: &Asset,
        pay: &Symbol,
        interface: Option<&AccountName>,
    ) -> Result<Asset> {
        self.transact(|s, ctx| s.pools.liquid_acquire(ctx, account, receive, pay, interface))
    }

    pub fn liquid_limit_exchange(
        &mut self,
        account: &AccountName,
        amount: &Asset,
        limit: &Price,
        interface: Option<&AccountName>,
    ) -> Result<(Asset, Asset)> {
        self.transact(|s, ctx| s.pools.liquid_limit_exchange(ctx, account, amount, limit, interface))
    }

    // =================================================================
    // Credit
    // =================================================================

    /// Open the credit pool lending `base`; its share asset is registered.
    pub fn create_credit_pool(&mut self, base: &Symbol) -> Result<Symbol> {
        let share = self.transact(|s, ctx| s.pools.create_credit_pool(ctx, base))?;
        self.registry.register(&share, AssetType::CreditPool);
        Ok(share)
    }

    pub fn credit_lend(&mut self, account: &AccountName, amount: &Asset) -> Result<Asset> {
        self.transact(|s, ctx| s.pools.credit_lend(ctx, account, amount))
    }

    pub fn credit_withdraw(&mut self, account: &AccountName, shares: &Asset) -> Result<Asset> {
        self.transact(|s, ctx| s.pools.credit_withdraw(ctx, account, shares))
    }

    /// Borrow `debt` against `collateral`. A flash loan opened here on its
    /// own is always rejected; flash loans are repaid inside a single
    /// [`Engine::transact`].
    pub fn open_credit_loan(
        &mut self,
        owner: &AccountName,
        name: &str,
        debt: &Asset,
        collateral: &Asset,
        flash_loan: bool,
    ) -> Result<OrderId> {
        let id = OrderId::new(owner, name);
        self.transact(|s, ctx| s.pools.open_credit_loan(ctx, id.clone(), debt, collateral, flash_loan))?;
        Ok(id)
    }

    pub fn update_credit_loan(&mut self, id: &OrderId, debt_delta: &Asset, collateral_delta: &Asset) -> Result<()> {
        self.transact(|s, ctx| s.pools.update_credit_loan(ctx, id, debt_delta, collateral_delta))
    }

    pub fn close_credit_loan(&mut self, id: &OrderId) -> Result<Asset> {
        self.transact(|s, ctx| s.pools.close_credit_loan(ctx, id))
    }

    // =================================================================
    // Options
    // =================================================================

    /// Open the option pool over an existing liquidity pool pair. Returns
    /// the listed option symbols, registered as option assets.
    pub fn create_option_pool(&mut self, base: &Symbol, quote: &Symbol) -> Result<Vec<Symbol>> {
        let listed = self.transact(|s, ctx| s.pools.create_option_pool(ctx, base, quote))?;
        self.register_all(&listed, AssetType::Option);
        Ok(listed)
    }

    /// Write (positive `delta`) or buy back (negative) options under `name`.
    pub fn update_option_order(&mut self, owner: &AccountName, name: &str, delta: &Asset) -> Result<OrderId> {
        let id = OrderId::new(owner, name);
        self.transact(|s, ctx| s.pools.update_option_order(ctx, id.clone(), delta))?;
        Ok(id)
    }

    pub fn exercise_option(&mut self, account: &AccountName, option: &Asset) -> Result<Asset> {
        self.transact(|s, ctx| s.pools.exercise_option(ctx, account, option))
    }

    // =================================================================
    // Prediction markets
    // =================================================================

    /// Open a prediction pool. Its prediction and outcome assets are
    /// registered and returned, prediction symbol first.
    pub fn create_prediction_pool(&mut self, req: PredictionPoolRequest) -> Result<Vec<Symbol>> {
        let symbols = self.transact(|s, ctx| s.pools.create_prediction_pool(ctx, req))?;
        self.register_all(&symbols, AssetType::Prediction);
        Ok(symbols)
    }

    pub fn prediction_exchange(
        &mut self,
        account: &AccountName,
        prediction: &Symbol,
        collateral: &Asset,
        exchange_base: bool,
        withdraw: bool,
    ) -> Result<()> {
        self.transact(|s, ctx| {
            s.pools
                .prediction_exchange(ctx, account, prediction, collateral, exchange_base, withdraw)
        })
    }

    pub fn prediction_resolve(&mut self, account: &AccountName, amount: &Asset, outcome: &Symbol) -> Result<()> {
        self.transact(|s, ctx| s.pools.prediction_resolve(ctx, account, amount, outcome))
    }

    fn register_all(&mut self, symbols: &[Symbol], asset_type: AssetType) {
        for symbol in symbols {
            self.registry.register(symbol, asset_type);
        }
    }

    // =================================================================
    // Synthetic assets
    // =================================================================

    pub fn update_call_order(
        &mut self,
        borrower: &AccountName,
        delta_collateral: &Asset,
        delta_debt: &Asset,
        target_collateral_ratio: Option<u16>,
    ) -> Result<()> {
        self.transact(|s, ctx| {
            update_call_order(s, ctx, borrower, delta_collateral, delta_debt, target_collateral_ratio)
        })
    }

    /// Returns whether the new feed globally settled the asset.
    pub fn publish_feed(&mut self, symbol: &Symbol, feed: PriceFeed) -> Result<bool> {
        self.transact(|s, ctx| publish_feed(s, ctx, symbol, feed))
    }

    pub fn request_force_settlement(
        &mut self,
        owner: &AccountName,
        amount: &Asset,
        interface: Option<AccountName>,
    ) -> Result<SettleOutcome> {
        self.transact(|s, ctx| request_force_settlement(s, ctx, owner, amount, interface))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn engine() -> Engine {
        let mut engine = Engine::new(EngineConfig::with_precision(1_000_000), DateTime::<Utc>::UNIX_EPOCH).unwrap();
        engine.register_asset(&Symbol::new("USD"), AssetType::Currency).unwrap();
        engine.fund("alice", Asset::new(10_000_000, "COIN")).unwrap();
        engine.fund("alice", Asset::new(10_000_000, "USD")).unwrap();
        engine
    }

    fn limit(name: &str, sell: Asset, receive: Asset, expires_in: i64) -> LimitOrderRequest {
        LimitOrderRequest {
            owner: AccountName::new("alice"),
            name: name.into(),
            amount_to_sell: sell,
            min_to_receive: receive,
            expiration: DateTime::<Utc>::UNIX_EPOCH + chrono::Duration::seconds(expires_in),
            interface: None,
            fill_or_kill: false,
        }
    }

    #[test]
    fn failed_transaction_leaves_no_trace() {
        let mut e = engine();
        let ops_before = e.ops().len();
        let err = e
            .transact(|s, ctx| {
                place_limit_order(s, ctx, limit("a", Asset::new(100, "COIN"), Asset::new(100, "USD"), 3_600))?;
                Err::<(), _>(LiquimatchError::Internal("boom".into()))
            })
            .unwrap_err();
        assert!(err.is_fatal());
        assert!(e.state().book.is_empty());
        assert_eq!(e.ledger().balance("alice", "COIN"), 10_000_000);
        assert_eq!(e.ops().len(), ops_before);
    }

    #[test]
    fn unknown_asset_cannot_be_funded() {
        let mut e = engine();
        assert!(matches!(
            e.fund("alice", Asset::new(1, "EUR")),
            Err(LiquimatchError::AssetNotFound(_))
        ));
    }

    #[test]
    fn blocks_must_advance() {
        let mut e = engine();
        let t = e.now();
        e.process_block(1, t).unwrap();
        assert!(e.process_block(1, t).is_err());
        assert!(e.process_block(2, t - chrono::Duration::seconds(1)).is_err());
    }

    #[test]
    fn expiry_sweep_refunds_expired_orders() {
        let mut e = engine();
        e.place_limit_order(limit("a", Asset::new(100, "COIN"), Asset::new(100, "USD"), 10))
            .unwrap();
        assert_eq!(e.ledger().balance("alice", "COIN"), 9_999_900);

        let report = e.process_block(1, e.now() + chrono::Duration::seconds(5)).unwrap();
        assert_eq!(report.expired_orders, 0);
        let report = e.process_block(2, e.now() + chrono::Duration::seconds(5)).unwrap();
        assert_eq!(report.expired_orders, 1);
        assert_eq!(e.ledger().balance("alice", "COIN"), 10_000_000);
        assert!(e.state().book.is_empty());
    }

    #[test]
    fn pool_and_credit_shares_are_registered() {
        let mut e = engine();
        let alice = AccountName::new("alice");
        let share = e
            .create_liquidity_pool(&alice, &Asset::new(1_000_000, "COIN"), &Asset::new(1_000_000, "USD"))
            .unwrap();
        assert_eq!(e.registry().get(&share).unwrap().asset_type, AssetType::LiquidityPool);
        let credit = e.create_credit_pool(&Symbol::new("USD")).unwrap();
        assert_eq!(e.registry().get(&credit).unwrap().asset_type, AssetType::CreditPool);
    }

    #[test]
    fn expiring_assets_cannot_back_synthetics() {
        let mut e = engine();
        let option = Symbol::new("OPT.C.COIN.2000000.USD.19700201");
        e.register_asset(&option, AssetType::Option).unwrap();
        assert!(matches!(
            e.create_bitasset(&Symbol::new("BITOPT"), &option),
            Err(LiquimatchError::Configuration(_))
        ));
    }
}
