//! Outbound and inbound protocol seams.

use crate::error::NetError;
use crate::message::{
    ShardAssignRequest, ShardAssignResponse, ShardCompleteRequest, ShardCompleteResponse,
    ShardLoadRequest, ShardLoadResponse, ShardMigrateRequest, ShardMigrateResponse,
    ShardStoreRequest, ShardStoreResponse,
};

/// Requests a provider sends to its counterpart.
///
/// `peer` is whatever the variant routes by: ignored by
/// [`LocalProtocol`](crate::LocalProtocol), an endpoint address for
/// [`StreamProtocol`](crate::StreamProtocol). An `Err` means no response
/// was obtained; an `Ok` may still carry a non-zero code.
#[async_trait::async_trait]
pub trait StorageProtocol: Send + Sync {
    async fn request_shard_store(
        &self,
        peer: &str,
        req: ShardStoreRequest,
    ) -> Result<ShardStoreResponse, NetError>;

    async fn request_shard_complete(
        &self,
        peer: &str,
        req: ShardCompleteRequest,
    ) -> Result<ShardCompleteResponse, NetError>;

    async fn request_shard_migrate(
        &self,
        peer: &str,
        req: ShardMigrateRequest,
    ) -> Result<ShardMigrateResponse, NetError>;
}

/// Inbound side of a storage provider. Never fails: every problem is a code.
#[async_trait::async_trait]
pub trait ShardProvider: Send + Sync {
    async fn handle_shard_assign(&self, req: ShardAssignRequest) -> ShardAssignResponse;

    /// `remote_peer` is the transport identity the request arrived from.
    async fn handle_shard_load(&self, remote_peer: &str, req: ShardLoadRequest)
    -> ShardLoadResponse;

    async fn handle_shard_migrate(&self, req: ShardMigrateRequest) -> ShardMigrateResponse;
}

/// Inbound side of a gateway: supplies bytes, takes completion notices.
#[async_trait::async_trait]
pub trait ShardGateway: Send + Sync {
    async fn handle_shard_store(&self, req: ShardStoreRequest) -> ShardStoreResponse;

    async fn handle_shard_complete(&self, req: ShardCompleteRequest) -> ShardCompleteResponse;
}
