//! Error types for the engine.

use harbor_types::{Cid, MigrateKey, OrderId, ResponseCode, ShardKey};

use crate::chain::ChainError;

/// Errors that can occur during engine operations.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    /// Failed to access the state store.
    #[error("metadata error: {0}")]
    Meta(#[from] harbor_meta::MetaError),

    /// Failed to access the content store.
    #[error("store error: {0}")]
    Store(#[from] harbor_store::StoreError),

    /// No response from the counterpart.
    #[error("network error: {0}")]
    Net(#[from] harbor_net::NetError),

    #[error("chain error: {0}")]
    Chain(#[from] ChainError),

    #[error("json error: {0}")]
    Serde(#[from] serde_json::Error),

    /// Fetched bytes do not hash to the expected address.
    #[error("invalid cid: expected {expected}, got {actual}")]
    InvalidCid { expected: Cid, actual: Cid },

    /// Renew of content this node does not hold.
    #[error("data missing: {0}")]
    DataMissing(Cid),

    /// The counterpart answered with a non-zero code.
    #[error("remote refused with {code}: {message}")]
    Remote { code: ResponseCode, message: String },

    /// The chain has no transport identity for a node.
    #[error("unknown peer for node {0}")]
    UnknownPeer(String),

    #[error("order {0} not found")]
    OrderNotFound(OrderId),

    /// The order does not list the shard this node expected.
    #[error("order {order_id} lists no shard {cid} for this node")]
    ShardNotInOrder { order_id: OrderId, cid: Cid },

    /// A broadcast was included but did not execute.
    #[error("transaction {hash} failed with code {code}")]
    TxFailed { hash: String, code: u32 },

    #[error("shard not found: {0}")]
    ShardNotFound(ShardKey),

    #[error("migration not found: {0}")]
    MigrateNotFound(MigrateKey),

    #[error("engine already started")]
    AlreadyStarted,
}

/// A request refused with a protocol code.
#[derive(Debug)]
pub(crate) struct Rejection {
    pub code: ResponseCode,
    pub message: String,
}

impl Rejection {
    pub fn new(code: ResponseCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    /// Local trouble, reported as [`ResponseCode::InternalErr`].
    pub fn internal(err: impl std::fmt::Display) -> Self {
        Self::new(ResponseCode::InternalErr, err.to_string())
    }
}
