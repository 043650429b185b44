//! The pool store: every liquidity pool, credit pool, credit loan, option
//! pool and prediction pool, plus the ledger-facing operations on them.
//!
//! ## Value Flow
//!
//! ```text
//! trader --lock--> pool reserve --release--> trader
//!                       |-- network fee: burned from pending
//!                       |-- interface fee: released to the interface
//!                       '-- pool fee: stays in the reserve
//! ```
//!
//! Reserves, credit-pool balances and loan collateral are all held as
//! pending supply in the ledger. Internal swaps (`swap_pending`,
//! `acquire_pending`) move value that is already pending and emit nothing;
//! the public operations emit one virtual op each.

use std::collections::BTreeMap;

use liquimatch_ledger::TxContext;
use liquimatch_types::math::{mul_div, narrow, widen};
use liquimatch_types::{
    AccountName, Asset, CreditLoan, LiquimatchError, OptionOrder, OrderId, Price, Result, Symbol, VirtualOp,
};

use crate::credit_pool::CreditPool;
use crate::liquidity_pool::{LiquidityPool, Swap, acquire_input, exchange_output};
use crate::option_pool::OptionPool;
use crate::prediction_pool::PredictionPool;

/// `(input, output)` of one pool hop.
pub type Hop = (Symbol, Symbol);

#[derive(Debug, Clone, Default)]
pub struct PoolSet {
    liquidity: BTreeMap<(Symbol, Symbol), LiquidityPool>,
    credit: BTreeMap<Symbol, CreditPool>,
    pub(crate) loans: BTreeMap<OrderId, CreditLoan>,
    pub(crate) loan_defaults: BTreeMap<(AccountName, Symbol), i64>,
    pub(crate) options: BTreeMap<(Symbol, Symbol), OptionPool>,
    pub(crate) option_orders: BTreeMap<OrderId, OptionOrder>,
    pub(crate) predictions: BTreeMap<Symbol, PredictionPool>,
}

pub(crate) fn pair_key(a: &Symbol, b: &Symbol) -> (Symbol, Symbol) {
    if a < b {
        (a.clone(), b.clone())
    } else {
        (b.clone(), a.clone())
    }
}

impl PoolSet {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    // =================================================================
    // Lookup
    // =================================================================

    #[must_use]
    pub fn has_liquidity_pool(&self, a: &Symbol, b: &Symbol) -> bool {
        self.liquidity.contains_key(&pair_key(a, b))
    }

    pub fn liquidity_pool(&self, a: &Symbol, b: &Symbol) -> Result<&LiquidityPool> {
        self.liquidity
            .get(&pair_key(a, b))
            .ok_or_else(|| LiquimatchError::PoolNotFound {
                a: a.clone(),
                b: b.clone(),
            })
    }

    fn liquidity_pool_mut(&mut self, a: &Symbol, b: &Symbol) -> Result<&mut LiquidityPool> {
        self.liquidity
            .get_mut(&pair_key(a, b))
            .ok_or_else(|| LiquimatchError::PoolNotFound {
                a: a.clone(),
                b: b.clone(),
            })
    }

    pub fn liquidity_pools(&self) -> impl Iterator<Item = &LiquidityPool> {
        self.liquidity.values()
    }

    fn pool_key_by_share(&self, share: &Symbol) -> Result<(Symbol, Symbol)> {
        self.liquidity
            .iter()
            .find(|(_, p)| p.symbol_liquid == *share)
            .map(|(k, _)| k.clone())
            .ok_or_else(|| LiquimatchError::AssetNotFound(share.clone()))
    }

    pub fn credit_pool(&self, base: &Symbol) -> Result<&CreditPool> {
        self.credit
            .get(base)
            .ok_or_else(|| LiquimatchError::CreditPoolNotFound(base.clone()))
    }

    pub fn credit_pool_mut(&mut self, base: &Symbol) -> Result<&mut CreditPool> {
        self.credit
            .get_mut(base)
            .ok_or_else(|| LiquimatchError::CreditPoolNotFound(base.clone()))
    }

    pub fn credit_pools(&self) -> impl Iterator<Item = &CreditPool> {
        self.credit.values()
    }

    /// Hops from `from` to `to`: the direct pool, or two hops through the
    /// core asset.
    pub fn route(&self, from: &Symbol, to: &Symbol, core: &Symbol) -> Result<Vec<Hop>> {
        if from == to {
            return Err(LiquimatchError::InvalidAmount {
                reason: format!("cannot exchange {from} for itself"),
            });
        }
        if self.has_liquidity_pool(from, to) {
            return Ok(vec![(from.clone(), to.clone())]);
        }
        if from != core
            && to != core
            && self.has_liquidity_pool(from, core)
            && self.has_liquidity_pool(core, to)
        {
            return Ok(vec![
                (from.clone(), core.clone()),
                (core.clone(), to.clone()),
            ]);
        }
        Err(LiquimatchError::PoolNotFound {
            a: from.clone(),
            b: to.clone(),
        })
    }

    // =================================================================
    // Liquidity pools
    // =================================================================

    /// Create the pool for an asset pair, seeded by `account`. Returns the
    /// new share symbol; the caller registers it.
    pub fn create_liquidity_pool(
        &mut self,
        ctx: &mut TxContext<'_>,
        account: &AccountName,
        first: &Asset,
        second: &Asset,
    ) -> Result<Symbol> {
        for amount in [first, second] {
            let asset_type = ctx.registry.get(&amount.symbol)?.asset_type;
            if asset_type.is_pool_share() || asset_type.is_temporary() {
                return Err(LiquimatchError::InvalidAmount {
                    reason: format!("{:?} asset {} cannot be pooled", asset_type, amount.symbol),
                });
            }
        }
        let key = pair_key(&first.symbol, &second.symbol);
        if self.liquidity.contains_key(&key) {
            return Err(LiquimatchError::DuplicatePool { a: key.0, b: key.1 });
        }
        let pool = LiquidityPool::new(first, second, &ctx.config.median)?;
        let shares = Asset::new(pool.balance_liquid, pool.symbol_liquid.clone());
        ctx.ledger.lock(account, first)?;
        ctx.ledger.lock(account, second)?;
        ctx.ledger.issue(account, &shares)?;
        tracing::info!(pool = %shares.symbol, a = %first, b = %second, "Liquidity pool created");
        ctx.emit(VirtualOp::LiquidityFund {
            account: account.clone(),
            paid: first.clone(),
            shares: shares.clone(),
        });
        ctx.emit(VirtualOp::LiquidityFund {
            account: account.clone(),
            paid: second.clone(),
            shares: shares.with_amount(0),
        });
        self.liquidity.insert(key, pool);
        Ok(shares.symbol)
    }

    /// Deposit `amount` into the pool it forms with `pair`.
    pub fn liquid_fund(
        &mut self,
        ctx: &mut TxContext<'_>,
        account: &AccountName,
        amount: &Asset,
        pair: &Symbol,
    ) -> Result<Asset> {
        let precision = ctx.config.precision;
        let pool = self.liquidity_pool_mut(&amount.symbol, pair)?;
        let mut staged = pool.clone();
        let shares = staged.fund(amount, precision)?;
        ctx.ledger.lock(account, amount)?;
        ctx.ledger.issue(account, &shares)?;
        *pool = staged;
        tracing::debug!(account = %account, paid = %amount, shares = %shares, "Liquidity funded");
        ctx.emit(VirtualOp::LiquidityFund {
            account: account.clone(),
            paid: amount.clone(),
            shares: shares.clone(),
        });
        Ok(shares)
    }

    /// Burn pool shares for one of the pool's assets.
    pub fn liquid_withdraw(
        &mut self,
        ctx: &mut TxContext<'_>,
        account: &AccountName,
        shares: &Asset,
        receive: &Symbol,
    ) -> Result<Asset> {
        let precision = ctx.config.precision;
        let (a, b) = self.pool_key_by_share(&shares.symbol)?;
        let pool = self.liquidity_pool_mut(&a, &b)?;
        let mut staged = pool.clone();
        let received = staged.withdraw(shares, receive, precision)?;
        ctx.ledger.burn(account, shares)?;
        ctx.ledger.release(account, &received)?;
        *pool = staged;
        tracing::debug!(account = %account, shares = %shares, received = %received, "Liquidity withdrawn");
        ctx.emit(VirtualOp::LiquidityWithdraw {
            account: account.clone(),
            shares: shares.clone(),
            received: received.clone(),
        });
        Ok(received)
    }

    /// Apply a quoted swap and pay out its fees. The swap's input must
    /// already be pending; its net output is left pending for the caller.
    pub fn settle_swap(
        &mut self,
        ctx: &mut TxContext<'_>,
        swap: &Swap,
        interface: Option<&AccountName>,
    ) -> Result<()> {
        if swap.is_empty() {
            return Ok(());
        }
        let pool = self.liquidity_pool_mut(&swap.paid.symbol, &swap.gross.symbol)?;
        pool.apply_swap(swap)?;
        ctx.ledger
            .burn_pending(&swap.gross.with_amount(swap.fee.network))?;
        if let Some(iface) = interface {
            ctx.ledger
                .release(iface, &swap.gross.with_amount(swap.fee.taker_interface))?;
        }
        Ok(())
    }

    /// Exact-input swap of pending `amount`, routed. Returns the final hop's
    /// swap record alongside every hop.
    pub fn swap_pending(
        &mut self,
        ctx: &mut TxContext<'_>,
        amount: &Asset,
        receive: &Symbol,
        interface: Option<&AccountName>,
    ) -> Result<Vec<Swap>> {
        let hops = self.route(&amount.symbol, receive, &ctx.config.core_symbol)?;
        let mut input = amount.clone();
        let mut swaps = Vec::with_capacity(hops.len());
        for (from, to) in hops {
            let swap = self.liquidity_pool(&from, &to)?.quote_exchange(
                &input,
                &ctx.config.fees,
                ctx.config.precision,
                interface.is_some(),
            )?;
            self.settle_swap(ctx, &swap, interface)?;
            input = swap.received.clone();
            swaps.push(swap);
        }
        Ok(swaps)
    }

    /// Exact-output swap, routed: buy `receive` with pending `pay` funds.
    /// The caller must hold at least the first swap's `paid` as pending.
    pub fn acquire_pending(
        &mut self,
        ctx: &mut TxContext<'_>,
        receive: &Asset,
        pay: &Symbol,
        interface: Option<&AccountName>,
    ) -> Result<Vec<Swap>> {
        let swaps = self.quote_acquire_path(ctx, receive, pay, interface.is_some())?;
        for swap in &swaps {
            self.settle_swap(ctx, swap, interface)?;
        }
        Ok(swaps)
    }

    /// What `acquire_pending` would charge in `pay`, fees included.
    pub fn quote_acquire_cost(
        &self,
        ctx: &TxContext<'_>,
        receive: &Asset,
        pay: &Symbol,
        interface: bool,
    ) -> Result<Asset> {
        self.quote_acquire_path(ctx, receive, pay, interface)?
            .first()
            .map(|s| s.paid.clone())
            .ok_or_else(|| LiquimatchError::Internal("empty acquire route".into()))
    }

    fn quote_acquire_path(
        &self,
        ctx: &TxContext<'_>,
        receive: &Asset,
        pay: &Symbol,
        interface: bool,
    ) -> Result<Vec<Swap>> {
        let hops = self.route(pay, &receive.symbol, &ctx.config.core_symbol)?;
        let mut wanted = receive.clone();
        let mut swaps = Vec::with_capacity(hops.len());
        for (from, to) in hops.iter().rev() {
            let swap = self
                .liquidity_pool(from, to)?
                .quote_acquire(&wanted, &ctx.config.fees, interface)?;
            wanted = swap.paid.clone();
            swaps.push(swap);
        }
        swaps.reverse();
        Ok(swaps)
    }

    /// Sell `amount` for `receive` through the pools.
    pub fn liquid_exchange(
        &mut self,
        ctx: &mut TxContext<'_>,
        account: &AccountName,
        amount: &Asset,
        receive: &Symbol,
        interface: Option<&AccountName>,
    ) -> Result<Asset> {
        liquimatch_types::ensure_positive(amount, "exchange amount")?;
        ctx.ledger.lock(account, amount)?;
        let swaps = self.swap_pending(ctx, amount, receive, interface)?;
        self.emit_swaps(ctx, account, &swaps);
        let received = final_output(&swaps, receive);
        ctx.ledger.release(account, &received)?;
        Ok(received)
    }

    /// Buy exactly `receive`, paying in `pay`. Returns what was paid.
    pub fn liquid_acquire(
        &mut self,
        ctx: &mut TxContext<'_>,
        account: &AccountName,
        receive: &Asset,
        pay: &Symbol,
        interface: Option<&AccountName>,
    ) -> Result<Asset> {
        let swaps = self.quote_acquire_path(ctx, receive, pay, interface.is_some())?;
        let paid = swaps
            .first()
            .map(|s| s.paid.clone())
            .ok_or_else(|| LiquimatchError::Internal("empty acquire route".into()))?;
        ctx.ledger.lock(account, &paid)?;
        for swap in &swaps {
            self.settle_swap(ctx, swap, interface)?;
        }
        self.emit_swaps(ctx, account, &swaps);
        ctx.ledger.release(account, receive)?;
        Ok(paid)
    }

    /// Sell up to `amount` directly against one pool without the price
    /// moving past `limit`. Returns `(paid, received)`; both are zero when
    /// the pool is already at or beyond the limit.
    pub fn liquid_limit_exchange(
        &mut self,
        ctx: &mut TxContext<'_>,
        account: &AccountName,
        amount: &Asset,
        limit: &Price,
        interface: Option<&AccountName>,
    ) -> Result<(Asset, Asset)> {
        let receive = if limit.base.symbol == amount.symbol {
            limit.quote.symbol.clone()
        } else {
            limit.base.symbol.clone()
        };
        let swap = self.liquidity_pool(&amount.symbol, &receive)?.quote_limit_exchange(
            amount,
            limit,
            &ctx.config.fees,
            ctx.config.precision,
            interface.is_some(),
        )?;
        if swap.is_empty() {
            return Ok((swap.paid, swap.received));
        }
        ctx.ledger.lock(account, &swap.paid)?;
        self.settle_swap(ctx, &swap, interface)?;
        ctx.ledger.release(account, &swap.received)?;
        self.emit_swaps(ctx, account, std::slice::from_ref(&swap));
        Ok((swap.paid, swap.received))
    }

    fn emit_swaps(&self, ctx: &mut TxContext<'_>, account: &AccountName, swaps: &[Swap]) {
        for swap in swaps {
            let (a, b) = pair_key(&swap.paid.symbol, &swap.gross.symbol);
            let pool_share = LiquidityPool::share_symbol(&a, &b);
            tracing::debug!(
                account = %account,
                pool = %pool_share,
                paid = %swap.paid,
                received = %swap.received,
                fee = swap.fee.total,
                "Pool swap"
            );
            ctx.emit(VirtualOp::PoolSwap {
                account: account.clone(),
                pool_share,
                paid: swap.paid.clone(),
                received: swap.received.clone(),
                fee: swap.fee_asset(),
            });
        }
    }

    // =================================================================
    // Read-only quotes
    // =================================================================

    /// Fee-free routed output for selling `amount`.
    pub fn quote_exchange(&self, amount: &Asset, receive: &Symbol, core: &Symbol, precision: i64) -> Result<Asset> {
        if amount.symbol == *receive {
            return Ok(amount.clone());
        }
        let mut value = amount.clone();
        for (from, to) in self.route(&amount.symbol, receive, core)? {
            let pool = self.liquidity_pool(&from, &to)?;
            let out = exchange_output(
                widen(pool.balance(&from).amount)?,
                widen(pool.balance(&to).amount)?,
                widen(value.amount)?,
                widen(precision)?,
            )?;
            value = Asset::new(narrow(out)?, to);
        }
        Ok(value)
    }

    /// Fee-free routed input needed to buy `receive` with `pay`.
    pub fn quote_acquire(&self, receive: &Asset, pay: &Symbol, core: &Symbol) -> Result<Asset> {
        if receive.symbol == *pay {
            return Ok(receive.clone());
        }
        let mut wanted = receive.clone();
        for (from, to) in self.route(pay, &receive.symbol, core)?.iter().rev() {
            let pool = self.liquidity_pool(from, to)?;
            let input = acquire_input(
                widen(pool.balance(from).amount)?,
                widen(pool.balance(to).amount)?,
                widen(wanted.amount)?,
            )?;
            wanted = Asset::new(narrow(input)?, from.clone());
        }
        Ok(wanted)
    }

    /// Value of `amount` in `to`, through the pools' hour median prices.
    pub fn median_value(&self, amount: &Asset, to: &Symbol, core: &Symbol) -> Result<Asset> {
        if amount.symbol == *to {
            return Ok(amount.clone());
        }
        let mut value = amount.clone();
        for (from, hop_to) in self.route(&amount.symbol, to, core)? {
            value = self
                .liquidity_pool(&from, &hop_to)?
                .hour_median_price
                .mul(&value)?;
        }
        Ok(value)
    }

    /// Hour-median price `base / quote` between two assets, routed.
    pub fn median_price(&self, base: &Symbol, quote: &Symbol, core: &Symbol, precision: i64) -> Result<Price> {
        let unit = Asset::new(precision, quote.clone());
        let value = self.median_value(&unit, base, core)?;
        Ok(Price::new(value, unit))
    }

    /// Sample every pool's price and refresh its medians.
    pub fn update_median_prices(&mut self) {
        for pool in self.liquidity.values_mut() {
            pool.update_median_prices();
        }
        tracing::debug!(pools = self.liquidity.len(), "Median prices refreshed");
    }

    // =================================================================
    // Credit pools
    // =================================================================

    /// Open the credit pool lending `base`. Returns the credit share symbol.
    pub fn create_credit_pool(&mut self, ctx: &mut TxContext<'_>, base: &Symbol) -> Result<Symbol> {
        let asset_type = ctx.registry.get(base)?.asset_type;
        if asset_type.is_pool_share() || asset_type.is_temporary() {
            return Err(LiquimatchError::InvalidAmount {
                reason: format!("{asset_type:?} asset {base} cannot back a credit pool"),
            });
        }
        if self.credit.contains_key(base) {
            return Err(LiquimatchError::DuplicatePool {
                a: base.clone(),
                b: CreditPool::share_symbol(base),
            });
        }
        let pool = CreditPool::new(base, &ctx.config.credit);
        let share = pool.credit_symbol.clone();
        tracing::info!(base = %base, share = %share, "Credit pool created");
        self.credit.insert(base.clone(), pool);
        Ok(share)
    }

    pub fn credit_lend(&mut self, ctx: &mut TxContext<'_>, account: &AccountName, amount: &Asset) -> Result<Asset> {
        let pool = self.credit_pool_mut(&amount.symbol)?;
        let mut staged = pool.clone();
        let shares = staged.lend(amount)?;
        ctx.ledger.lock(account, amount)?;
        ctx.ledger.issue(account, &shares)?;
        *pool = staged;
        tracing::debug!(account = %account, paid = %amount, shares = %shares, "Credit lent");
        ctx.emit(VirtualOp::CreditLend {
            account: account.clone(),
            paid: amount.clone(),
            shares: shares.clone(),
        });
        Ok(shares)
    }

    pub fn credit_withdraw(&mut self, ctx: &mut TxContext<'_>, account: &AccountName, shares: &Asset) -> Result<Asset> {
        let base = self
            .credit
            .values()
            .find(|p| p.credit_symbol == shares.symbol)
            .map(|p| p.base_symbol.clone())
            .ok_or_else(|| LiquimatchError::AssetNotFound(shares.symbol.clone()))?;
        let pool = self.credit_pool_mut(&base)?;
        let mut staged = pool.clone();
        let received = staged.withdraw(shares)?;
        ctx.ledger.burn(account, shares)?;
        ctx.ledger.release(account, &received)?;
        *pool = staged;
        tracing::debug!(account = %account, shares = %shares, received = %received, "Credit withdrawn");
        ctx.emit(VirtualOp::CreditWithdraw {
            account: account.clone(),
            shares: shares.clone(),
            received: received.clone(),
        });
        Ok(received)
    }

    // =================================================================
    // Defaults
    // =================================================================

    /// Unrecovered debt written off against `account` in `symbol`.
    #[must_use]
    pub fn loan_default(&self, account: &AccountName, symbol: &Symbol) -> i64 {
        self.loan_defaults
            .get(&(account.clone(), symbol.clone()))
            .copied()
            .unwrap_or(0)
    }

    #[must_use]
    pub fn has_defaulted(&self, account: &AccountName) -> bool {
        self.loan_defaults
            .iter()
            .any(|((a, _), v)| a == account && *v > 0)
    }

    /// Cover `deficit` of pending debt by issuing it and recording the
    /// write-off against `account`.
    pub fn record_default(&mut self, ctx: &mut TxContext<'_>, account: &AccountName, deficit: &Asset) -> Result<()> {
        if deficit.amount <= 0 {
            return Ok(());
        }
        ctx.ledger.issue_pending(deficit)?;
        *self
            .loan_defaults
            .entry((account.clone(), deficit.symbol.clone()))
            .or_insert(0) += deficit.amount;
        tracing::warn!(
            account = %account,
            deficit = %deficit,
            network = %ctx.config.network_account,
            "Credit default written off"
        );
        Ok(())
    }

    /// Network's cut of `interest` repaid.
    pub fn interest_fee(interest: &Asset, fee_percent: i64) -> Result<Asset> {
        let fee = mul_div(
            widen(interest.amount)?,
            widen(fee_percent)?,
            widen(liquimatch_types::constants::PERCENT_100)?,
        )?;
        Ok(interest.with_amount(narrow(fee)?))
    }
}

/// Burn every liquid balance of a temporary asset. Anything still held as
/// pending must have been released by the caller first. Returns the total
/// burned.
pub fn clear_asset_balances(ctx: &mut TxContext<'_>, symbol: &Symbol) -> Result<Asset> {
    let mut cleared = Asset::zero(symbol);
    for (account, amount) in ctx.ledger.holders(symbol) {
        let balance = Asset::new(amount, symbol.clone());
        ctx.ledger.burn(&account, &balance)?;
        cleared.add_assign(&balance)?;
        ctx.emit(VirtualOp::BalanceCleared {
            account,
            cleared: balance,
        });
    }
    let pending = ctx.ledger.pending_supply(symbol);
    liquimatch_types::ensure_invariant(pending.amount == 0, || {
        format!("{pending} still pending after clearing {symbol}")
    })?;
    tracing::info!(symbol = %symbol, cleared = %cleared, "Asset balances cleared");
    Ok(cleared)
}

/// Net output of the last hop, or zero of `receive` for an empty route.
#[must_use]
pub fn final_output(swaps: &[Swap], receive: &Symbol) -> Asset {
    swaps
        .last()
        .map_or_else(|| Asset::zero(receive), |s| s.received.clone())
}

#[cfg(any(test, feature = "test-helpers"))]
impl PoolSet {
    /// Insert a pool without touching any ledger.
    pub fn insert_liquidity_pool(&mut self, pool: LiquidityPool) {
        self.liquidity
            .insert(pair_key(&pool.symbol_a, &pool.symbol_b), pool);
    }

    pub fn insert_credit_pool(&mut self, pool: CreditPool) {
        self.credit.insert(pool.base_symbol.clone(), pool);
    }
}

#[cfg(test)]
mod tests {
    use chrono::{DateTime, Utc};
    use liquimatch_ledger::{InMemoryLedger, Ledger, MemoryOpLog};
    use liquimatch_types::{AssetRegistry, AssetType, EngineConfig};

    use super::*;

    struct Fixture {
        config: EngineConfig,
        registry: AssetRegistry,
        ledger: InMemoryLedger,
        ops: MemoryOpLog,
        pools: PoolSet,
    }

    impl Fixture {
        fn new() -> Self {
            let mut registry = AssetRegistry::new();
            for s in ["COIN", "USD", "EUR"] {
                registry.register(&Symbol::new(s), AssetType::Currency);
            }
            let mut ledger = InMemoryLedger::new();
            for s in ["COIN", "USD", "EUR"] {
                ledger.fund("lp", Asset::new(100_000_000_000, s)).unwrap();
                ledger.fund("alice", Asset::new(1_000_000_000, s)).unwrap();
            }
            Self {
                config: EngineConfig::with_precision(1_000_000),
                registry,
                ledger,
                ops: MemoryOpLog::new(),
                pools: PoolSet::new(),
            }
        }

        fn run<T>(&mut self, f: impl FnOnce(&mut PoolSet, &mut TxContext<'_>) -> Result<T>) -> Result<T> {
            let mut ctx = TxContext::new(
                &self.config,
                &self.registry,
                &mut self.ledger,
                &mut self.ops,
                DateTime::<Utc>::UNIX_EPOCH,
            );
            f(&mut self.pools, &mut ctx)
        }

        fn seed(&mut self, a: &str, b: &str, amount: i64) {
            let lp = AccountName::new("lp");
            self.run(|p, ctx| {
                p.create_liquidity_pool(ctx, &lp, &Asset::new(amount, a), &Asset::new(amount, b))
            })
            .unwrap();
        }
    }

    fn alice() -> AccountName {
        AccountName::new("alice")
    }

    #[test]
    fn reference_exchange_through_ledger() {
        let mut f = Fixture::new();
        f.seed("COIN", "USD", 1_000_000);
        let iface = AccountName::new("wallet");
        let got = f
            .run(|p, ctx| {
                p.liquid_exchange(ctx, &alice(), &Asset::new(10_000, "COIN"), &Symbol::new("USD"), Some(&iface))
            })
            .unwrap();
        assert_eq!(got, Asset::new(9_892, "USD"));
        assert_eq!(f.ledger.balance("wallet", "USD"), 2);
        assert_eq!(f.ledger.supply().total_burned(&Symbol::new("USD")), 4);
        let pool = f.pools.liquidity_pool(&Symbol::new("COIN"), &Symbol::new("USD")).unwrap();
        assert_eq!(pool.balance_b, 1_000_000 - 9_901 + 3);
        assert_eq!(f.ops.by_name("pool_swap").count(), 1);
        f.ledger.verify_conservation().unwrap();
    }

    #[test]
    fn duplicate_pool_rejected() {
        let mut f = Fixture::new();
        f.seed("COIN", "USD", 1_000_000);
        let lp = AccountName::new("lp");
        let err = f
            .run(|p, ctx| {
                p.create_liquidity_pool(ctx, &lp, &Asset::new(5, "USD"), &Asset::new(5, "COIN"))
            })
            .unwrap_err();
        assert!(matches!(err, LiquimatchError::DuplicatePool { .. }));
    }

    #[test]
    fn pool_share_cannot_be_pooled() {
        let mut f = Fixture::new();
        f.seed("COIN", "USD", 1_000_000);
        f.registry.register(&Symbol::new("LIQ.COIN.USD"), AssetType::LiquidityPool);
        let lp = AccountName::new("lp");
        let err = f
            .run(|p, ctx| {
                p.create_liquidity_pool(ctx, &lp, &Asset::new(5, "LIQ.COIN.USD"), &Asset::new(5, "EUR"))
            })
            .unwrap_err();
        assert!(matches!(err, LiquimatchError::InvalidAmount { .. }));
    }

    #[test]
    fn exchange_routes_through_core() {
        let mut f = Fixture::new();
        f.seed("COIN", "USD", 1_000_000_000);
        f.seed("COIN", "EUR", 1_000_000_000);
        let got = f
            .run(|p, ctx| {
                p.liquid_exchange(ctx, &alice(), &Asset::new(1_000_000, "USD"), &Symbol::new("EUR"), None)
            })
            .unwrap();
        assert_eq!(got.symbol.as_str(), "EUR");
        assert!(got.amount > 990_000 && got.amount < 1_000_000);
        assert_eq!(f.ops.by_name("pool_swap").count(), 2);
        f.ledger.verify_conservation().unwrap();
    }

    #[test]
    fn acquire_delivers_exact_amount_routed() {
        let mut f = Fixture::new();
        f.seed("COIN", "USD", 1_000_000_000);
        f.seed("COIN", "EUR", 1_000_000_000);
        let before = f.ledger.balance("alice", "USD");
        let paid = f
            .run(|p, ctx| {
                p.liquid_acquire(ctx, &alice(), &Asset::new(500_000, "EUR"), &Symbol::new("USD"), None)
            })
            .unwrap();
        assert_eq!(f.ledger.balance("alice", "EUR"), 1_000_000_000 + 500_000);
        assert_eq!(f.ledger.balance("alice", "USD"), before - paid.amount);
        assert!(paid.amount > 500_000);
        f.ledger.verify_conservation().unwrap();
    }

    #[test]
    fn missing_route_is_pool_not_found() {
        let mut f = Fixture::new();
        f.seed("COIN", "USD", 1_000_000);
        let err = f
            .run(|p, ctx| {
                p.liquid_exchange(ctx, &alice(), &Asset::new(10, "USD"), &Symbol::new("EUR"), None)
            })
            .unwrap_err();
        assert!(matches!(err, LiquimatchError::PoolNotFound { .. }));
    }

    #[test]
    fn fund_and_withdraw_move_shares() {
        let mut f = Fixture::new();
        f.seed("COIN", "USD", 1_000_000_000);
        let shares = f
            .run(|p, ctx| p.liquid_fund(ctx, &alice(), &Asset::new(10_000_000, "USD"), &Symbol::new("COIN")))
            .unwrap();
        assert_eq!(f.ledger.balance("alice", "LIQ.COIN.USD"), shares.amount);
        let back = f
            .run(|p, ctx| p.liquid_withdraw(ctx, &alice(), &shares, &Symbol::new("USD")))
            .unwrap();
        assert!(back.amount <= 10_000_000);
        assert_eq!(f.ledger.balance("alice", "LIQ.COIN.USD"), 0);
        f.ledger.verify_conservation().unwrap();
    }

    #[test]
    fn limit_exchange_respects_price() {
        let mut f = Fixture::new();
        f.seed("COIN", "USD", 1_000_000_000);
        let limit = Price::new(Asset::new(100, "COIN"), Asset::new(99, "USD"));
        let (paid, received) = f
            .run(|p, ctx| {
                p.liquid_limit_exchange(ctx, &alice(), &Asset::new(500_000_000, "COIN"), &limit, None)
            })
            .unwrap();
        assert!(paid.amount < 500_000_000);
        assert!(received.amount * 100 >= paid.amount * 99);
        f.ledger.verify_conservation().unwrap();
    }

    #[test]
    fn credit_lend_and_withdraw() {
        let mut f = Fixture::new();
        let share = f
            .run(|p, ctx| p.create_credit_pool(ctx, &Symbol::new("USD")))
            .unwrap();
        assert_eq!(share.as_str(), "CR.USD");
        let shares = f
            .run(|p, ctx| p.credit_lend(ctx, &alice(), &Asset::new(1_000, "USD")))
            .unwrap();
        assert_eq!(shares, Asset::new(1_000, "CR.USD"));
        assert_eq!(f.ledger.pending_supply(&Symbol::new("USD")).amount, 1_000);
        let back = f
            .run(|p, ctx| p.credit_withdraw(ctx, &alice(), &Asset::new(400, "CR.USD")))
            .unwrap();
        assert_eq!(back, Asset::new(400, "USD"));
        f.ledger.verify_conservation().unwrap();
    }

    #[test]
    fn unfunded_deposits_leave_pools_untouched() {
        let mut f = Fixture::new();
        f.seed("COIN", "USD", 1_000_000_000);
        f.run(|p, ctx| p.create_credit_pool(ctx, &Symbol::new("USD"))).unwrap();
        let before = f.pools.clone();
        let bob = AccountName::new("bob");

        let err = f
            .run(|p, ctx| p.liquid_fund(ctx, &bob, &Asset::new(10_000, "USD"), &Symbol::new("COIN")))
            .unwrap_err();
        assert!(matches!(err, LiquimatchError::InsufficientBalance { .. }));
        let err = f
            .run(|p, ctx| p.liquid_withdraw(ctx, &bob, &Asset::new(10_000, "LIQ.COIN.USD"), &Symbol::new("USD")))
            .unwrap_err();
        assert!(matches!(err, LiquimatchError::InsufficientBalance { .. }));
        let err = f
            .run(|p, ctx| p.credit_lend(ctx, &bob, &Asset::new(10_000, "USD")))
            .unwrap_err();
        assert!(matches!(err, LiquimatchError::InsufficientBalance { .. }));

        let pair = (Symbol::new("COIN"), Symbol::new("USD"));
        assert_eq!(
            f.pools.liquidity_pool(&pair.0, &pair.1).unwrap(),
            before.liquidity_pool(&pair.0, &pair.1).unwrap()
        );
        assert_eq!(
            f.pools.credit_pool(&pair.1).unwrap(),
            before.credit_pool(&pair.1).unwrap()
        );
    }

    #[test]
    fn median_value_uses_hour_median() {
        let mut f = Fixture::new();
        f.seed("COIN", "USD", 1_000_000_000);
        // A large swap moves spot but not the seeded median.
        f.run(|p, ctx| {
            p.liquid_exchange(ctx, &alice(), &Asset::new(500_000_000, "COIN"), &Symbol::new("USD"), None)
        })
        .unwrap();
        let core = Symbol::new("COIN");
        let value = f
            .pools
            .median_value(&Asset::new(1_000, "COIN"), &Symbol::new("USD"), &core)
            .unwrap();
        assert_eq!(value, Asset::new(1_000, "USD"));
    }

    #[test]
    fn recorded_default_issues_deficit() {
        let mut f = Fixture::new();
        let bob = AccountName::new("bob");
        f.run(|p, ctx| p.record_default(ctx, &bob, &Asset::new(25, "USD")))
            .unwrap();
        assert_eq!(f.pools.loan_default(&bob, &Symbol::new("USD")), 25);
        assert!(f.pools.has_defaulted(&bob));
        assert_eq!(f.ledger.pending_supply(&Symbol::new("USD")).amount, 25);
        f.ledger.verify_conservation().unwrap();
    }
}
