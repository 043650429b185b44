//! The Ledger Accessor contract.
//!
//! The engine never touches balances directly. Every movement of value goes
//! through a [`Ledger`], which tracks three quantities per symbol:
//!
//! ```text
//! liquid   : per-account spendable balances
//! pending  : value held by engine objects (pools, orders, loans, funds)
//! issued   : net supply created minus supply destroyed
//! ```
//!
//! and must keep `Σ liquid + pending == issued` for every symbol. Moving
//! value between an account and an engine object is a paired
//! liquid/pending adjustment; only explicit issuance and burn touch `issued`.

use liquimatch_types::{AccountName, Asset, Result, Symbol};

pub trait Ledger {
    fn get_liquid_balance(&self, account: &AccountName, symbol: &Symbol) -> Asset;

    /// Fails with `InsufficientBalance` if the balance would go negative.
    fn adjust_liquid_balance(&mut self, account: &AccountName, delta: &Asset) -> Result<()>;

    /// Fails with `InsufficientPendingSupply` if pending would go negative.
    fn adjust_pending_supply(&mut self, delta: &Asset) -> Result<()>;

    /// Net issuance (positive) or burn (negative).
    fn adjust_issued_supply(&mut self, delta: &Asset) -> Result<()>;

    fn pending_supply(&self, symbol: &Symbol) -> Asset;

    /// `Σ liquid + pending` for `symbol`.
    fn total_supply(&self, symbol: &Symbol) -> Asset;

    /// Accounts holding a non-zero liquid balance of `symbol`, in name order.
    fn holders(&self, symbol: &Symbol) -> Vec<(AccountName, i64)>;

    // -----------------------------------------------------------------
    // Paired movements
    // -----------------------------------------------------------------

    /// Account -> engine object.
    fn lock(&mut self, account: &AccountName, amount: &Asset) -> Result<()> {
        if amount.amount == 0 {
            return Ok(());
        }
        self.adjust_liquid_balance(account, &amount.negated())?;
        self.adjust_pending_supply(amount)
    }

    /// Engine object -> account.
    fn release(&mut self, account: &AccountName, amount: &Asset) -> Result<()> {
        if amount.amount == 0 {
            return Ok(());
        }
        self.adjust_pending_supply(&amount.negated())?;
        self.adjust_liquid_balance(account, amount)
    }

    /// Create new supply directly into an account.
    fn issue(&mut self, account: &AccountName, amount: &Asset) -> Result<()> {
        if amount.amount == 0 {
            return Ok(());
        }
        self.adjust_issued_supply(amount)?;
        self.adjust_liquid_balance(account, amount)
    }

    /// Create new supply held by an engine object.
    fn issue_pending(&mut self, amount: &Asset) -> Result<()> {
        if amount.amount == 0 {
            return Ok(());
        }
        self.adjust_issued_supply(amount)?;
        self.adjust_pending_supply(amount)
    }

    /// Destroy supply held by an engine object.
    fn burn_pending(&mut self, amount: &Asset) -> Result<()> {
        if amount.amount == 0 {
            return Ok(());
        }
        self.adjust_pending_supply(&amount.negated())?;
        self.adjust_issued_supply(&amount.negated())
    }

    /// Destroy supply from an account.
    fn burn(&mut self, account: &AccountName, amount: &Asset) -> Result<()> {
        if amount.amount == 0 {
            return Ok(());
        }
        self.adjust_liquid_balance(account, &amount.negated())?;
        self.adjust_issued_supply(&amount.negated())
    }
}
