//! Requests and responses of the storage protocol.
//!
//! Every type has a stable field set so it decodes identically under both
//! [`WireCodec`](crate::WireCodec) encodings.

use harbor_types::{
    Cid, JwsSignature, OrderId, QueryProposal, RelayProposal, ResponseCode, TxType,
};
use serde::{Deserialize, Serialize};

use crate::error::NetError;

/// Ask the gateway for an order's shard bytes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShardStoreRequest {
    /// Owner of the order.
    pub owner: String,
    pub data_id: String,
    pub order_id: OrderId,
    pub cid: Cid,
    /// Address of the provider asking.
    pub provider: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShardStoreResponse {
    pub code: ResponseCode,
    pub message: String,
    pub content: Vec<u8>,
}

/// Tell the gateway a shard has been completed on chain.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShardCompleteRequest {
    pub order_id: OrderId,
    pub data_id: String,
    pub cids: Vec<Cid>,
    pub tx_hash: String,
    pub height: u64,
    /// Address of the completing provider.
    pub provider: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShardCompleteResponse {
    pub code: ResponseCode,
    pub message: String,
    /// Whether resending the notification could succeed.
    pub recoverable: bool,
}

/// Hand a shard's bytes to its new holder.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShardMigrateRequest {
    /// Provider the shard is migrating away from.
    pub migrate_from: String,
    pub order_id: OrderId,
    pub data_id: String,
    /// Hash of the accepted migrate transaction.
    pub tx_hash: String,
    pub tx_height: u64,
    pub cid: Cid,
    pub content: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShardMigrateResponse {
    pub code: ResponseCode,
    pub message: String,
    pub complete_tx_hash: String,
    pub complete_tx_height: u64,
}

/// The chain assigned an order's shards to `assignee`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShardAssignRequest {
    pub order_id: OrderId,
    pub assignee: String,
    /// Transaction that created the assignment.
    pub tx_hash: String,
    pub height: u64,
    /// Expected message type of that transaction (`Store` or `Ready`).
    pub tx_type: TxType,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShardAssignResponse {
    pub code: ResponseCode,
    pub message: String,
}

/// Read stored content under a signed proposal.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShardLoadRequest {
    pub cid: Cid,
    pub proposal: QueryProposal,
    pub signature: JwsSignature,
    /// Present when the request reaches this node through a relay.
    pub relay: Option<RelayProposal>,
    pub relay_signature: Option<JwsSignature>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShardLoadResponse {
    pub code: ResponseCode,
    pub message: String,
    pub content: Vec<u8>,
}

macro_rules! failure_ctor {
    ($ty:ident { $($field:ident: $default:expr),* }) => {
        impl $ty {
            /// A response carrying `code` and nothing else.
            pub fn failure(code: ResponseCode, message: impl Into<String>) -> Self {
                Self {
                    code,
                    message: message.into(),
                    $($field: $default),*
                }
            }
        }
    };
}

failure_ctor!(ShardStoreResponse { content: Vec::new() });
failure_ctor!(ShardCompleteResponse { recoverable: false });
failure_ctor!(ShardMigrateResponse {
    complete_tx_hash: String::new(),
    complete_tx_height: 0
});
failure_ctor!(ShardAssignResponse {});
failure_ctor!(ShardLoadResponse { content: Vec::new() });

impl ShardAssignResponse {
    pub fn success() -> Self {
        Self::failure(ResponseCode::Success, "")
    }
}

impl ShardCompleteResponse {
    pub fn success() -> Self {
        Self::failure(ResponseCode::Success, "")
    }
}

/// Everything that travels in a frame.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum HarborMessage {
    ShardStore(ShardStoreRequest),
    ShardStoreResult(ShardStoreResponse),
    ShardComplete(ShardCompleteRequest),
    ShardCompleteResult(ShardCompleteResponse),
    ShardMigrate(ShardMigrateRequest),
    ShardMigrateResult(ShardMigrateResponse),
    ShardAssign(ShardAssignRequest),
    ShardAssignResult(ShardAssignResponse),
    ShardLoad(ShardLoadRequest),
    ShardLoadResult(ShardLoadResponse),
    /// The responder could not interpret the request.
    Rejected { message: String },
}

impl HarborMessage {
    /// Short name for logs.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::ShardStore(_) => "shard-store",
            Self::ShardStoreResult(_) => "shard-store-result",
            Self::ShardComplete(_) => "shard-complete",
            Self::ShardCompleteResult(_) => "shard-complete-result",
            Self::ShardMigrate(_) => "shard-migrate",
            Self::ShardMigrateResult(_) => "shard-migrate-result",
            Self::ShardAssign(_) => "shard-assign",
            Self::ShardAssignResult(_) => "shard-assign-result",
            Self::ShardLoad(_) => "shard-load",
            Self::ShardLoadResult(_) => "shard-load-result",
            Self::Rejected { .. } => "rejected",
        }
    }
}

macro_rules! response_accessor {
    ($fn:ident, $variant:ident, $ty:ident) => {
        /// Unwrap the expected response, surfacing `Rejected` as an error.
        pub fn $fn(self) -> Result<$ty, NetError> {
            match self {
                Self::$variant(resp) => Ok(resp),
                Self::Rejected { message } => Err(NetError::Rejected(message)),
                other => Err(NetError::UnexpectedResponse {
                    expected: stringify!($variant),
                    got: other.kind(),
                }),
            }
        }
    };
}

impl HarborMessage {
    response_accessor!(into_store_result, ShardStoreResult, ShardStoreResponse);
    response_accessor!(into_complete_result, ShardCompleteResult, ShardCompleteResponse);
    response_accessor!(into_migrate_result, ShardMigrateResult, ShardMigrateResponse);
    response_accessor!(into_assign_result, ShardAssignResult, ShardAssignResponse);
    response_accessor!(into_load_result, ShardLoadResult, ShardLoadResponse);
}
