//! On-chain records as seen by a storage provider.
//!
//! These mirror what the chain client returns; the engine never mutates
//! them, it only reads them to validate assignments and migrations.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::OrderId;

/// Order/shard operation: store new content.
pub const OP_NEW: u8 = 1;
/// Order/shard operation: update content in place.
pub const OP_UPDATE: u8 = 2;
/// Order/shard operation: extend storage of content already held.
pub const OP_RENEW: u8 = 3;

/// Prefix of a successful per-data-id migration result.
pub const MIGRATE_SUCCESS: &str = "SUCCESS";

/// Lifecycle of one provider's copy of an order's content.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ShardStatus {
    /// Assigned, completion not yet reported.
    Waiting,
    /// Provider reported completion.
    Completed,
    /// Being handed over to this provider from `from`.
    Migrating,
    /// Removed from the order.
    Terminated,
}

/// One provider's copy of an order's content.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderShard {
    /// Chain-wide shard identifier.
    pub id: u64,
    pub order_id: OrderId,
    /// Content address, textual as stored on chain.
    pub cid: String,
    /// Provider holding this copy.
    pub provider: String,
    /// Previous holder when the shard was migrated in, empty otherwise.
    pub from: String,
    pub size: u64,
    pub status: ShardStatus,
}

/// A storage commitment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Order {
    pub id: OrderId,
    pub owner: String,
    /// Client-facing coordinator that supplies the content.
    pub gateway: String,
    pub data_id: String,
    pub cid: String,
    pub operation: u8,
    pub shard_operation: u8,
    /// Height by which shards must be completed (0 = no deadline).
    pub timeout: u64,
    pub shards: Vec<OrderShard>,
}

impl Order {
    /// Shards held (or to be held) by `provider`.
    pub fn shards_for<'a>(&'a self, provider: &'a str) -> impl Iterator<Item = &'a OrderShard> {
        self.shards.iter().filter(move |s| s.provider == provider)
    }
}

/// Transaction message types a provider needs to recognise.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TxType {
    Store,
    Ready,
    Migrate,
    Complete,
}

/// A message inside a committed transaction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TxMessage {
    pub kind: TxType,
    pub order_id: OrderId,
    pub data_ids: Vec<String>,
}

/// A committed transaction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChainTx {
    pub hash: String,
    pub height: u64,
    /// Execution result, 0 on success.
    pub code: u32,
    pub messages: Vec<TxMessage>,
    /// Raw response payload, JSON-encoded by message type.
    pub response: Vec<u8>,
}

impl ChainTx {
    /// Whether the transaction executed successfully.
    pub fn is_success(&self) -> bool {
        self.code == 0
    }

    /// Whether the transaction carries a message of `kind` for `order_id`.
    pub fn has_message(&self, kind: TxType, order_id: OrderId) -> bool {
        self.messages
            .iter()
            .any(|m| m.kind == kind && m.order_id == order_id)
    }
}

/// Response payload of a migrate transaction.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MigrateTxResponse {
    /// Per-data-id outcome; success values start with [`MIGRATE_SUCCESS`].
    pub results: BTreeMap<String, String>,
}

impl MigrateTxResponse {
    /// Whether the migration of `data_id` succeeded.
    pub fn succeeded(&self, data_id: &str) -> bool {
        self.results
            .get(data_id)
            .is_some_and(|r| r.starts_with(MIGRATE_SUCCESS))
    }
}

/// An on-chain account.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Account {
    pub address: String,
    /// ed25519 verifying key.
    pub public_key: [u8; 32],
}

/// A versioned decentralized-identity document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SidDocument {
    pub version_id: String,
    /// Identity the document belongs to.
    pub did: String,
    /// ed25519 verifying keys valid for this version.
    pub keys: Vec<[u8; 32]>,
}
