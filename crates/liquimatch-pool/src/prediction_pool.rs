//! Prediction pools: collateral-backed markets on a set of outcomes,
//! resolved by vote.
//!
//! ```text
//! exchange : collateral 1:1 for the prediction asset, or for one unit of
//!            every outcome asset (and back)
//! resolve  : prediction asset locked as a vote for one outcome, weighted
//!            by its square root, between outcome time and resolution time
//! close    : top-voted outcome wins; its resolvers split the bond, its
//!            holders and prediction asset holders redeem 1:1, every
//!            prediction and outcome balance is wiped
//! ```
//!
//! Every pool carries an `INVALID` outcome; it wins when nobody voted.

use std::collections::BTreeMap;

use chrono::{DateTime, Duration, Utc};
use liquimatch_ledger::TxContext;
use liquimatch_types::constants::{INVALID_OUTCOME, PREDICTION_MIN_OUTCOMES};
use liquimatch_types::math::{approx_sqrt, mul_div, narrow, widen};
use liquimatch_types::{AccountName, Asset, LiquimatchError, Result, Symbol, VirtualOp};
use serde::{Deserialize, Serialize};

use crate::pools::{PoolSet, clear_asset_balances};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PredictionPool {
    pub prediction_symbol: Symbol,
    pub collateral_symbol: Symbol,
    pub creator: AccountName,
    /// Outcome assets in listing order, `INVALID` last.
    pub outcomes: Vec<Symbol>,
    pub collateral_pool: Asset,
    pub bond_pool: Asset,
    pub outcome_time: DateTime<Utc>,
    pub resolution_time: DateTime<Utc>,
    /// Prediction asset locked per `(outcome, resolver)`.
    pub resolutions: BTreeMap<(Symbol, AccountName), i64>,
}

impl PredictionPool {
    #[must_use]
    pub fn outcome_symbol(prediction: &Symbol, suffix: &str) -> Symbol {
        Symbol(format!("{prediction}.{suffix}"))
    }

    #[must_use]
    pub fn invalid_outcome(&self) -> Symbol {
        Self::outcome_symbol(&self.prediction_symbol, INVALID_OUTCOME)
    }

    #[must_use]
    pub fn is_outcome(&self, symbol: &Symbol) -> bool {
        self.outcomes.contains(symbol)
    }

    #[must_use]
    pub fn resolution_open(&self, now: DateTime<Utc>) -> bool {
        self.outcome_time <= now && now < self.resolution_time
    }

    /// The outcome with the most `√amount` votes summed over its resolvers,
    /// with the prediction asset locked behind it. Ties go to the outcome
    /// that sorts first.
    pub fn top_outcome(&self) -> Result<(Symbol, i64)> {
        let mut votes: BTreeMap<&Symbol, (u128, i64)> = BTreeMap::new();
        for ((outcome, _), amount) in &self.resolutions {
            let entry = votes.entry(outcome).or_insert((0, 0));
            entry.0 += approx_sqrt(widen(*amount)?);
            entry.1 = entry
                .1
                .checked_add(*amount)
                .ok_or(LiquimatchError::ArithmeticOverflow { op: "resolution shares" })?;
        }
        let mut top: Option<(&Symbol, u128, i64)> = None;
        for (outcome, (weight, shares)) in votes {
            if top.is_none_or(|(_, best, _)| weight > best) {
                top = Some((outcome, weight, shares));
            }
        }
        Ok(match top {
            Some((outcome, _, shares)) => (outcome.clone(), shares),
            None => (self.invalid_outcome(), 0),
        })
    }

    fn resolution_total(&self) -> i64 {
        self.resolutions.values().sum()
    }
}

/// Parameters of a new prediction pool.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PredictionPoolRequest {
    pub creator: AccountName,
    pub prediction_symbol: Symbol,
    pub collateral_symbol: Symbol,
    /// Outcome suffixes; `INVALID` is added.
    pub outcomes: Vec<String>,
    pub outcome_time: DateTime<Utc>,
    pub bond: Asset,
}

/// How a prediction pool closed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PredictionClose {
    pub prediction: Symbol,
    pub outcome: Symbol,
    pub bond_paid: Asset,
    pub collateral_paid: Asset,
}

impl PoolSet {
    pub fn prediction_pool(&self, prediction: &Symbol) -> Result<&PredictionPool> {
        self.predictions
            .get(prediction)
            .ok_or_else(|| LiquimatchError::PredictionPoolNotFound(prediction.clone()))
    }

    pub fn prediction_pools(&self) -> impl Iterator<Item = &PredictionPool> {
        self.predictions.values()
    }

    fn prediction_pool_mut(&mut self, prediction: &Symbol) -> Result<&mut PredictionPool> {
        self.predictions
            .get_mut(prediction)
            .ok_or_else(|| LiquimatchError::PredictionPoolNotFound(prediction.clone()))
    }

    /// Open a prediction pool, locking the creator's bond. Returns the
    /// prediction symbol followed by every outcome symbol; the caller
    /// registers them.
    pub fn create_prediction_pool(&mut self, ctx: &mut TxContext<'_>, req: PredictionPoolRequest) -> Result<Vec<Symbol>> {
        let collateral_type = ctx.registry.get(&req.collateral_symbol)?.asset_type;
        if collateral_type.is_pool_share() || collateral_type.is_temporary() {
            return Err(LiquimatchError::InvalidAmount {
                reason: format!(
                    "{collateral_type:?} asset {} cannot collateralize a prediction pool",
                    req.collateral_symbol
                ),
            });
        }
        if ctx.registry.contains(&req.prediction_symbol) || self.predictions.contains_key(&req.prediction_symbol) {
            return Err(LiquimatchError::InvalidOrder {
                reason: format!("prediction symbol {} is taken", req.prediction_symbol),
            });
        }
        let mut suffixes = req.outcomes.clone();
        suffixes.sort();
        suffixes.dedup();
        if suffixes.len() != req.outcomes.len()
            || req.outcomes.len() < PREDICTION_MIN_OUTCOMES
            || req.outcomes.iter().any(|s| s.is_empty() || s == INVALID_OUTCOME)
        {
            return Err(LiquimatchError::InvalidOrder {
                reason: format!(
                    "prediction {} needs {PREDICTION_MIN_OUTCOMES} or more distinct outcomes",
                    req.prediction_symbol
                ),
            });
        }
        if req.outcome_time <= ctx.now {
            return Err(LiquimatchError::InvalidOrder {
                reason: format!("outcome time {} is not after block time {}", req.outcome_time, ctx.now),
            });
        }
        liquimatch_types::ensure_positive(&req.bond, "prediction bond")?;
        if req.bond.symbol != req.collateral_symbol {
            return Err(LiquimatchError::SymbolMismatch {
                expected: req.collateral_symbol,
                actual: req.bond.symbol,
            });
        }

        let mut outcomes: Vec<Symbol> = req
            .outcomes
            .iter()
            .map(|s| PredictionPool::outcome_symbol(&req.prediction_symbol, s))
            .collect();
        outcomes.push(PredictionPool::outcome_symbol(&req.prediction_symbol, INVALID_OUTCOME));
        ctx.ledger.lock(&req.creator, &req.bond)?;
        let pool = PredictionPool {
            prediction_symbol: req.prediction_symbol.clone(),
            collateral_symbol: req.collateral_symbol.clone(),
            creator: req.creator.clone(),
            outcomes: outcomes.clone(),
            collateral_pool: Asset::zero(&req.collateral_symbol),
            bond_pool: req.bond.clone(),
            outcome_time: req.outcome_time,
            resolution_time: req.outcome_time + Duration::seconds(ctx.config.derivatives.resolution_secs),
            resolutions: BTreeMap::new(),
        };
        tracing::info!(
            prediction = %pool.prediction_symbol,
            outcomes = outcomes.len(),
            resolution_time = %pool.resolution_time,
            "Prediction pool created"
        );
        ctx.emit(VirtualOp::PredictionPoolCreated {
            creator: req.creator,
            prediction: req.prediction_symbol.clone(),
            bond: req.bond,
        });
        self.predictions.insert(req.prediction_symbol.clone(), pool);
        let mut symbols = vec![req.prediction_symbol];
        symbols.extend(outcomes);
        Ok(symbols)
    }

    /// Trade `collateral` for the prediction asset (`exchange_base`) or for
    /// one unit of each outcome, or back again when `withdraw`. Deposits
    /// stop at the outcome time.
    pub fn prediction_exchange(
        &mut self,
        ctx: &mut TxContext<'_>,
        account: &AccountName,
        prediction: &Symbol,
        collateral: &Asset,
        exchange_base: bool,
        withdraw: bool,
    ) -> Result<()> {
        liquimatch_types::ensure_positive(collateral, "prediction exchange")?;
        let pool = self.prediction_pool(prediction)?;
        if collateral.symbol != pool.collateral_symbol {
            return Err(LiquimatchError::SymbolMismatch {
                expected: pool.collateral_symbol.clone(),
                actual: collateral.symbol.clone(),
            });
        }
        if !withdraw && ctx.now >= pool.outcome_time {
            return Err(LiquimatchError::InvalidOrder {
                reason: format!("prediction {prediction} no longer takes deposits"),
            });
        }
        let symbols = if exchange_base {
            vec![pool.prediction_symbol.clone()]
        } else {
            pool.outcomes.clone()
        };

        if withdraw {
            for symbol in &symbols {
                ctx.ledger.burn(account, &Asset::new(collateral.amount, symbol.clone()))?;
            }
            ctx.ledger.release(account, collateral)?;
            self.prediction_pool_mut(prediction)?.collateral_pool.sub_assign(collateral)?;
        } else {
            ctx.ledger.lock(account, collateral)?;
            for symbol in &symbols {
                ctx.ledger.issue(account, &Asset::new(collateral.amount, symbol.clone()))?;
            }
            self.prediction_pool_mut(prediction)?.collateral_pool.add_assign(collateral)?;
        }
        tracing::debug!(
            account = %account,
            prediction = %prediction,
            collateral = %collateral,
            exchange_base,
            withdraw,
            "Prediction exchange"
        );
        ctx.emit(VirtualOp::PredictionExchange {
            account: account.clone(),
            collateral: collateral.clone(),
            exchange_base,
            withdraw,
        });
        Ok(())
    }

    /// Lock `amount` of a prediction asset as a vote for `outcome`.
    pub fn prediction_resolve(
        &mut self,
        ctx: &mut TxContext<'_>,
        account: &AccountName,
        amount: &Asset,
        outcome: &Symbol,
    ) -> Result<()> {
        liquimatch_types::ensure_positive(amount, "resolution amount")?;
        let pool = self.prediction_pool(&amount.symbol)?;
        if !pool.is_outcome(outcome) {
            return Err(LiquimatchError::AssetNotFound(outcome.clone()));
        }
        if !pool.resolution_open(ctx.now) {
            return Err(LiquimatchError::InvalidOrder {
                reason: format!(
                    "{} resolves between {} and {}",
                    amount.symbol, pool.outcome_time, pool.resolution_time
                ),
            });
        }
        ctx.ledger.lock(account, amount)?;
        let pool = self.prediction_pool_mut(&amount.symbol)?;
        let slot = pool
            .resolutions
            .entry((outcome.clone(), account.clone()))
            .or_insert(0);
        *slot = slot
            .checked_add(amount.amount)
            .ok_or(LiquimatchError::ArithmeticOverflow { op: "resolution amount" })?;
        tracing::debug!(account = %account, outcome = %outcome, amount = %amount, "Prediction resolution");
        ctx.emit(VirtualOp::PredictionResolved {
            account: account.clone(),
            outcome: outcome.clone(),
            amount: amount.clone(),
        });
        Ok(())
    }

    /// Prediction pools whose resolution window has closed at `now`.
    #[must_use]
    pub fn due_prediction_pools(&self, now: DateTime<Utc>) -> Vec<Symbol> {
        self.predictions
            .values()
            .filter(|p| p.resolution_time <= now)
            .map(|p| p.prediction_symbol.clone())
            .collect()
    }

    /// Settle and remove a prediction pool. Book orders in its assets must
    /// already be cancelled.
    ///
    /// Resolvers of the winning outcome split the bond by their locked
    /// amount; any bond left over returns to the creator. Winning-outcome
    /// holders, prediction asset holders and resolvers then redeem 1:1 from
    /// the collateral, capped at what remains, and whatever is left returns
    /// to the creator.
    pub fn close_prediction_pool(&mut self, ctx: &mut TxContext<'_>, prediction: &Symbol) -> Result<PredictionClose> {
        let pool = self
            .predictions
            .remove(prediction)
            .ok_or_else(|| LiquimatchError::PredictionPoolNotFound(prediction.clone()))?;
        let (outcome, top_shares) = pool.top_outcome()?;

        let mut bond_left = pool.bond_pool.clone();
        for ((voted, account), amount) in &pool.resolutions {
            if *voted != outcome || bond_left.amount == 0 {
                continue;
            }
            let split = narrow(mul_div(
                widen(*amount)?,
                widen(pool.bond_pool.amount)?,
                widen(top_shares)?,
            )?)?;
            let paid = bond_left.with_amount(split.min(bond_left.amount));
            pay_out(ctx, account, &paid, true)?;
            bond_left.sub_assign(&paid)?;
        }
        let bond_paid = pool.bond_pool.checked_sub(&bond_left)?;
        pay_out(ctx, &pool.creator, &bond_left, true)?;

        let mut collateral_left = pool.collateral_pool.clone();
        let mut claims: Vec<(AccountName, i64)> = ctx.ledger.holders(&outcome);
        claims.extend(ctx.ledger.holders(&pool.prediction_symbol));
        let mut locked: BTreeMap<&AccountName, i64> = BTreeMap::new();
        for ((_, account), amount) in &pool.resolutions {
            *locked.entry(account).or_insert(0) += amount;
        }
        claims.extend(locked.into_iter().map(|(a, v)| (a.clone(), v)));
        for (account, amount) in claims {
            if collateral_left.amount == 0 {
                break;
            }
            let paid = collateral_left.with_amount(amount.min(collateral_left.amount));
            pay_out(ctx, &account, &paid, false)?;
            collateral_left.sub_assign(&paid)?;
        }
        let collateral_paid = pool.collateral_pool.checked_sub(&collateral_left)?;
        pay_out(ctx, &pool.creator, &collateral_left, false)?;

        ctx.ledger
            .burn_pending(&Asset::new(pool.resolution_total(), pool.prediction_symbol.clone()))?;
        clear_asset_balances(ctx, &pool.prediction_symbol)?;
        for symbol in &pool.outcomes {
            clear_asset_balances(ctx, symbol)?;
        }
        tracing::info!(
            prediction = %prediction,
            outcome = %outcome,
            bond_paid = %bond_paid,
            collateral_paid = %collateral_paid,
            "Prediction pool closed"
        );
        ctx.emit(VirtualOp::PredictionClosed {
            prediction: prediction.clone(),
            outcome: outcome.clone(),
            collateral: pool.collateral_pool.clone(),
        });
        Ok(PredictionClose {
            prediction: prediction.clone(),
            outcome,
            bond_paid,
            collateral_paid,
        })
    }
}

fn pay_out(ctx: &mut TxContext<'_>, account: &AccountName, amount: &Asset, bond: bool) -> Result<()> {
    if amount.amount == 0 {
        return Ok(());
    }
    ctx.ledger.release(account, amount)?;
    ctx.emit(VirtualOp::PredictionPayout {
        account: account.clone(),
        received: amount.clone(),
        bond,
    });
    Ok(())
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;
    use liquimatch_ledger::{InMemoryLedger, Ledger, MemoryOpLog};
    use liquimatch_types::{AssetRegistry, AssetType, EngineConfig};

    use super::*;

    struct Fixture {
        config: EngineConfig,
        registry: AssetRegistry,
        ledger: InMemoryLedger,
        ops: MemoryOpLog,
        pools: PoolSet,
        now: DateTime<Utc>,
    }

    impl Fixture {
        /// `RAIN` on USD collateral, outcomes YES / NO, bond 1000 from carol.
        fn new() -> Self {
            let mut registry = AssetRegistry::new();
            registry.register(&Symbol::new("USD"), AssetType::Currency);
            let mut ledger = InMemoryLedger::new();
            for who in ["alice", "bob", "carol"] {
                ledger.fund(who, Asset::new(1_000_000, "USD")).unwrap();
            }
            let mut f = Self {
                config: EngineConfig::with_precision(1_000_000),
                registry,
                ledger,
                ops: MemoryOpLog::new(),
                pools: PoolSet::new(),
                now: Utc.with_ymd_and_hms(2026, 10, 17, 0, 0, 0).unwrap(),
            };
            let req = PredictionPoolRequest {
                creator: AccountName::new("carol"),
                prediction_symbol: Symbol::new("RAIN"),
                collateral_symbol: Symbol::new("USD"),
                outcomes: vec!["YES".into(), "NO".into()],
                outcome_time: f.now + Duration::days(1),
                bond: usd(1_000),
            };
            let symbols = f.run(|p, ctx| p.create_prediction_pool(ctx, req)).unwrap();
            for symbol in &symbols {
                f.registry.register(symbol, AssetType::Prediction);
            }
            f
        }

        fn run<T>(&mut self, f: impl FnOnce(&mut PoolSet, &mut TxContext<'_>) -> Result<T>) -> Result<T> {
            let mut ctx = TxContext::new(&self.config, &self.registry, &mut self.ledger, &mut self.ops, self.now);
            f(&mut self.pools, &mut ctx)
        }

        fn exchange(&mut self, who: &str, amount: i64, exchange_base: bool, withdraw: bool) -> Result<()> {
            let account = AccountName::new(who);
            self.run(|p, ctx| {
                p.prediction_exchange(ctx, &account, &Symbol::new("RAIN"), &usd(amount), exchange_base, withdraw)
            })
        }

        fn resolve(&mut self, who: &str, amount: i64, outcome: &str) -> Result<()> {
            let account = AccountName::new(who);
            self.run(|p, ctx| {
                p.prediction_resolve(ctx, &account, &Asset::new(amount, "RAIN"), &Symbol::new(outcome))
            })
        }
    }

    fn usd(n: i64) -> Asset {
        Asset::new(n, "USD")
    }

    #[test]
    fn creation_lists_invalid_outcome() {
        let f = Fixture::new();
        let pool = f.pools.prediction_pool(&Symbol::new("RAIN")).unwrap();
        assert_eq!(pool.outcomes, vec![
            Symbol::new("RAIN.YES"),
            Symbol::new("RAIN.NO"),
            Symbol::new("RAIN.INVALID"),
        ]);
        assert_eq!(pool.bond_pool, usd(1_000));
        assert_eq!(f.ledger.balance("carol", "USD"), 999_000);
    }

    #[test]
    fn single_outcome_rejected() {
        let mut f = Fixture::new();
        let req = PredictionPoolRequest {
            creator: AccountName::new("carol"),
            prediction_symbol: Symbol::new("SNOW"),
            collateral_symbol: Symbol::new("USD"),
            outcomes: vec!["YES".into()],
            outcome_time: f.now + Duration::days(1),
            bond: usd(10),
        };
        let err = f.run(|p, ctx| p.create_prediction_pool(ctx, req)).unwrap_err();
        assert!(matches!(err, LiquimatchError::InvalidOrder { .. }));
    }

    #[test]
    fn outcome_sets_mint_and_redeem() {
        let mut f = Fixture::new();
        f.exchange("alice", 500, false, false).unwrap();
        assert_eq!(f.ledger.balance("alice", "RAIN.YES"), 500);
        assert_eq!(f.ledger.balance("alice", "RAIN.INVALID"), 500);
        f.exchange("alice", 200, false, true).unwrap();
        assert_eq!(f.ledger.balance("alice", "RAIN.NO"), 300);
        assert_eq!(f.ledger.balance("alice", "USD"), 999_700);
        let pool = f.pools.prediction_pool(&Symbol::new("RAIN")).unwrap();
        assert_eq!(pool.collateral_pool, usd(300));
        f.ledger.verify_conservation().unwrap();
    }

    #[test]
    fn deposits_close_at_outcome_time() {
        let mut f = Fixture::new();
        f.now += Duration::days(1);
        assert!(f.exchange("alice", 10, true, false).is_err());
    }

    #[test]
    fn votes_only_inside_resolution_window() {
        let mut f = Fixture::new();
        f.exchange("bob", 100, true, false).unwrap();
        assert!(f.resolve("bob", 100, "RAIN.YES").is_err());
        f.now += Duration::days(1);
        f.resolve("bob", 100, "RAIN.YES").unwrap();
        assert_eq!(f.ledger.balance("bob", "RAIN"), 0);
        assert!(matches!(
            f.resolve("bob", 1, "RAIN.MAYBE"),
            Err(LiquimatchError::AssetNotFound(_))
        ));
    }

    #[test]
    fn square_root_weighting_favours_breadth() {
        let mut f = Fixture::new();
        for who in ["alice", "bob", "carol"] {
            f.exchange(who, 10_000, true, false).unwrap();
        }
        f.now += Duration::days(1);
        // 10_000 on NO weighs 100; 3_600 and 2_500 on YES weigh 60 + 50.
        f.resolve("alice", 10_000, "RAIN.NO").unwrap();
        f.resolve("bob", 3_600, "RAIN.YES").unwrap();
        f.resolve("carol", 2_500, "RAIN.YES").unwrap();
        let pool = f.pools.prediction_pool(&Symbol::new("RAIN")).unwrap();
        let (outcome, shares) = pool.top_outcome().unwrap();
        assert_eq!(outcome, Symbol::new("RAIN.YES"));
        assert_eq!(shares, 6_100);
    }

    #[test]
    fn no_votes_resolve_invalid() {
        let f = Fixture::new();
        let pool = f.pools.prediction_pool(&Symbol::new("RAIN")).unwrap();
        assert_eq!(pool.top_outcome().unwrap(), (Symbol::new("RAIN.INVALID"), 0));
    }

    #[test]
    fn close_pays_winners_and_resolvers() {
        let mut f = Fixture::new();
        f.exchange("alice", 600, false, false).unwrap();
        f.exchange("bob", 400, true, false).unwrap();
        // alice sells her NO side to carol off-book.
        f.run(|_, ctx| {
            ctx.ledger.adjust_liquid_balance(&AccountName::new("alice"), &Asset::new(-600, "RAIN.NO"))?;
            ctx.ledger.adjust_liquid_balance(&AccountName::new("carol"), &Asset::new(600, "RAIN.NO"))
        })
        .unwrap();
        f.now += Duration::days(1);
        f.resolve("bob", 300, "RAIN.YES").unwrap();
        f.now += Duration::days(7);
        assert_eq!(f.pools.due_prediction_pools(f.now), vec![Symbol::new("RAIN")]);

        let close = f.run(|p, ctx| p.close_prediction_pool(ctx, &Symbol::new("RAIN"))).unwrap();
        assert_eq!(close.outcome, Symbol::new("RAIN.YES"));
        assert_eq!(close.bond_paid, usd(1_000));
        assert_eq!(close.collateral_paid, usd(1_000));
        // alice: 600 YES redeemed. bob: bond, 100 free + 300 voted RAIN.
        assert_eq!(f.ledger.balance("alice", "USD"), 1_000_000);
        assert_eq!(f.ledger.balance("bob", "USD"), 1_001_000);
        assert_eq!(f.ledger.balance("carol", "USD"), 999_000);
        for symbol in ["RAIN", "RAIN.YES", "RAIN.NO", "RAIN.INVALID"] {
            assert_eq!(f.ledger.total_supply(&Symbol::new(symbol)).amount, 0, "{symbol}");
        }
        assert!(f.pools.prediction_pool(&Symbol::new("RAIN")).is_err());
        assert_eq!(f.ops.by_name("prediction_closed").count(), 1);
        f.ledger.verify_conservation().unwrap();
    }

    #[test]
    fn unresolved_pool_returns_bond_to_creator() {
        let mut f = Fixture::new();
        f.exchange("alice", 50, false, false).unwrap();
        f.now += Duration::days(8);
        let close = f.run(|p, ctx| p.close_prediction_pool(ctx, &Symbol::new("RAIN"))).unwrap();
        assert_eq!(close.outcome, Symbol::new("RAIN.INVALID"));
        assert_eq!(close.bond_paid, usd(0));
        assert_eq!(f.ledger.balance("carol", "USD"), 1_000_000);
        assert_eq!(f.ledger.balance("alice", "USD"), 1_000_000);
        f.ledger.verify_conservation().unwrap();
    }
}
