//! In-memory virtual-operation log and op-root digest.
//!
//! Every node applying the same block must emit the same operations in the
//! same order. The `op_root` is a SHA-256 over all records that enables quick
//! cross-node comparison without exchanging full payloads.

use liquimatch_types::{LiquimatchError, OpId, Result, VirtualOp, VirtualOpLog};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// A virtual operation with its deterministic id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OpRecord {
    pub id: OpId,
    pub block_num: u64,
    pub seq: u64,
    pub op: VirtualOp,
}

#[derive(Debug, Clone, Default)]
pub struct MemoryOpLog {
    block_num: u64,
    next_seq: u64,
    records: Vec<OpRecord>,
}

impl MemoryOpLog {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Start numbering operations for a new block.
    pub fn begin_block(&mut self, block_num: u64) {
        if block_num != self.block_num {
            self.block_num = block_num;
            self.next_seq = 0;
        }
    }

    /// Discard everything emitted after the first `len` records of the
    /// current block, rewinding the sequence with them.
    pub fn rollback_to(&mut self, len: usize) {
        let dropped = self.records.len().saturating_sub(len);
        self.records.truncate(len);
        self.next_seq = self.next_seq.saturating_sub(dropped as u64);
    }

    #[must_use]
    pub fn records(&self) -> &[OpRecord] {
        &self.records
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.records.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Records whose op name matches, for tests and reporting.
    pub fn by_name<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a VirtualOp> + 'a {
        self.records
            .iter()
            .map(|r| &r.op)
            .filter(move |op| op.name() == name)
    }

    /// Hash of every record in emission order.
    pub fn op_root(&self) -> Result<[u8; 32]> {
        compute_op_root(&self.records)
    }
}

impl VirtualOpLog for MemoryOpLog {
    fn push(&mut self, op: VirtualOp) {
        let seq = self.next_seq;
        self.next_seq += 1;
        tracing::trace!(block = self.block_num, seq, op = op.name(), "Virtual op");
        self.records.push(OpRecord {
            id: OpId::deterministic(self.block_num, seq),
            block_num: self.block_num,
            seq,
            op,
        });
    }
}

/// `SHA-256("liquimatch:op_root:v1:" || len || json(record)...)`.
pub fn compute_op_root(records: &[OpRecord]) -> Result<[u8; 32]> {
    let mut hasher = Sha256::new();
    hasher.update(b"liquimatch:op_root:v1:");
    hasher.update((records.len() as u64).to_le_bytes());
    for record in records {
        hasher.update(record.id.0);
        hasher.update(serde_json::to_vec(&record.op)?);
    }
    let mut root = [0u8; 32];
    root.copy_from_slice(&hasher.finalize());
    Ok(root)
}

/// Compare a locally computed root with one received from a peer.
pub fn verify_op_root(records: &[OpRecord], expected: &[u8; 32]) -> Result<()> {
    let actual = compute_op_root(records)?;
    if actual != *expected {
        return Err(LiquimatchError::DeterminismViolation {
            expected: hex::encode(expected),
            actual: hex::encode(actual),
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use liquimatch_types::{Asset, Symbol};

    use super::*;

    fn op(n: i64) -> VirtualOp {
        VirtualOp::InterestAccrued {
            debt_symbol: Symbol::new("USD"),
            total: Asset::new(n, "USD"),
            rate: 100,
        }
    }

    #[test]
    fn empty_log_deterministic() {
        assert_eq!(
            MemoryOpLog::new().op_root().unwrap(),
            MemoryOpLog::new().op_root().unwrap()
        );
    }

    #[test]
    fn ids_restart_each_block() {
        let mut log = MemoryOpLog::new();
        log.begin_block(1);
        log.push(op(1));
        log.push(op(2));
        log.begin_block(2);
        log.push(op(3));
        assert_eq!(log.records()[1].seq, 1);
        assert_eq!(log.records()[2].seq, 0);
        assert_eq!(log.records()[2].id, OpId::deterministic(2, 0));
    }

    #[test]
    fn rollback_rewinds_sequence() {
        let mut log = MemoryOpLog::new();
        log.begin_block(4);
        log.push(op(1));
        let mark = log.len();
        log.push(op(2));
        log.push(op(3));
        log.rollback_to(mark);
        log.push(op(4));
        assert_eq!(log.len(), 2);
        assert_eq!(log.records()[1].id, OpId::deterministic(4, 1));
    }

    #[test]
    fn different_order_different_root() {
        let mut a = MemoryOpLog::new();
        a.push(op(1));
        a.push(op(2));
        let mut b = MemoryOpLog::new();
        b.push(op(2));
        b.push(op(1));
        assert_ne!(a.op_root().unwrap(), b.op_root().unwrap());
    }

    #[test]
    fn verify_detects_tampering() {
        let mut log = MemoryOpLog::new();
        log.push(op(1));
        let root = log.op_root().unwrap();
        assert!(verify_op_root(log.records(), &root).is_ok());
        let mut tampered = log.records().to_vec();
        tampered[0].op = op(2);
        assert!(matches!(
            verify_op_root(&tampered, &root),
            Err(LiquimatchError::DeterminismViolation { .. })
        ));
    }

    #[test]
    fn by_name_filters() {
        let mut log = MemoryOpLog::new();
        log.push(op(1));
        assert_eq!(log.by_name("interest_accrued").count(), 1);
        assert_eq!(log.by_name("fill").count(), 0);
    }
}
