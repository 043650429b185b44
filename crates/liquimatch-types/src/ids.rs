//! Identifiers used throughout Liquimatch.
//!
//! Every identifier is derived from ledger content (account names, caller
//! supplied order names, block numbers). Nothing is random or time-derived,
//! so every node assigns the same ids to the same objects.

use std::fmt;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

// ---------------------------------------------------------------------------
// AccountName
// ---------------------------------------------------------------------------

/// Name of a ledger account.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Ord, PartialOrd, Serialize, Deserialize)]
pub struct AccountName(pub String);

impl AccountName {
    #[must_use]
    pub fn new(name: &str) -> Self {
        Self(name.to_string())
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for AccountName {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

impl fmt::Display for AccountName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

// ---------------------------------------------------------------------------
// OrderId
// ---------------------------------------------------------------------------

/// Identifier of an owned object: the owner plus a caller-chosen name.
///
/// Shared by limit orders, margin orders, credit loans and force-settlement
/// requests; each lives in its own index, so the same `OrderId` may name one
/// object of each kind.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Ord, PartialOrd, Serialize, Deserialize)]
pub struct OrderId {
    pub owner: AccountName,
    pub name: String,
}

impl OrderId {
    #[must_use]
    pub fn new(owner: &AccountName, name: &str) -> Self {
        Self {
            owner: owner.clone(),
            name: name.to_string(),
        }
    }
}

impl fmt::Display for OrderId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.owner, self.name)
    }
}

// ---------------------------------------------------------------------------
// OpId
// ---------------------------------------------------------------------------

/// Identifier of an emitted virtual operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Ord, PartialOrd, Serialize, Deserialize)]
pub struct OpId(pub [u8; 32]);

impl OpId {
    /// `SHA-256("liquimatch:op_id:v1:" || block || seq)`.
    #[must_use]
    pub fn deterministic(block_num: u64, seq: u64) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(b"liquimatch:op_id:v1:");
        hasher.update(block_num.to_le_bytes());
        hasher.update(seq.to_le_bytes());
        let digest = hasher.finalize();
        let mut bytes = [0u8; 32];
        bytes.copy_from_slice(&digest);
        Self(bytes)
    }

    #[must_use]
    pub fn short(&self) -> String {
        hex::encode(&self.0[..4])
    }
}

impl fmt::Display for OpId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "op:{}", hex::encode(&self.0[..8]))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn op_id_is_deterministic() {
        assert_eq!(OpId::deterministic(10, 3), OpId::deterministic(10, 3));
        assert_ne!(OpId::deterministic(10, 3), OpId::deterministic(10, 4));
        assert_ne!(OpId::deterministic(10, 3), OpId::deterministic(11, 3));
    }

    #[test]
    fn order_ids_order_by_owner_then_name() {
        let alice = AccountName::new("alice");
        let bob = AccountName::new("bob");
        assert!(OrderId::new(&alice, "z") < OrderId::new(&bob, "a"));
        assert!(OrderId::new(&alice, "a") < OrderId::new(&alice, "b"));
    }

    #[test]
    fn display_formats() {
        let id = OrderId::new(&AccountName::new("alice"), "o1");
        assert_eq!(id.to_string(), "alice/o1");
        assert!(OpId::deterministic(1, 1).to_string().starts_with("op:"));
    }
}
