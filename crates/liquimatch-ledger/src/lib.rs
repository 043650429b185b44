//! # liquimatch-ledger
//!
//! **Ledger plane**: the balance accessor every engine component moves value
//! through, plus the bookkeeping that proves no value was created or lost.
//!
//! ## Components
//!
//! 1. **Ledger**: liquid / pending / issued accounting contract
//! 2. **InMemoryLedger**: deterministic `BTreeMap` implementation
//! 3. **SupplyConservation**: issuance and burn totals, conservation check
//! 4. **MemoryOpLog**: virtual-operation sink with deterministic ids and op root
//! 5. **TxContext**: the bundle handed to every engine operation
//!
//! ## Value Flow
//!
//! ```text
//! account --lock--> pending (pools, orders, loans) --release--> account
//!          issue / burn only through explicit paths
//! ```

pub mod context;
pub mod ledger;
pub mod memory_ledger;
pub mod op_log;
pub mod supply;

pub use context::TxContext;
pub use ledger::Ledger;
pub use memory_ledger::InMemoryLedger;
pub use op_log::{MemoryOpLog, OpRecord, compute_op_root, verify_op_root};
pub use supply::SupplyConservation;
