//! Per-operation execution context.

use chrono::{DateTime, Utc};
use liquimatch_types::{AssetRegistry, EngineConfig, VirtualOp, VirtualOpLog};

use crate::ledger::Ledger;

/// Everything an operation may read or write besides the object store:
/// configuration, asset metadata, the ledger, the op log and block time.
pub struct TxContext<'a> {
    pub config: &'a EngineConfig,
    pub registry: &'a AssetRegistry,
    pub ledger: &'a mut dyn Ledger,
    pub ops: &'a mut dyn VirtualOpLog,
    pub now: DateTime<Utc>,
}

impl<'a> TxContext<'a> {
    pub fn new(
        config: &'a EngineConfig,
        registry: &'a AssetRegistry,
        ledger: &'a mut dyn Ledger,
        ops: &'a mut dyn VirtualOpLog,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            config,
            registry,
            ledger,
            ops,
            now,
        }
    }

    pub fn emit(&mut self, op: VirtualOp) {
        self.ops.push(op);
    }
}
