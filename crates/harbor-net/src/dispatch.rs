//! Routing of inbound requests to the node's handlers.

use std::sync::Arc;

use harbor_types::ResponseCode;
use tracing::debug;

use crate::message::{HarborMessage, ShardCompleteResponse, ShardStoreResponse};
use crate::protocol::{ShardGateway, ShardProvider};

/// The handlers one node answers requests with.
///
/// `gateway` is `None` on nodes that never supply content.
#[derive(Clone)]
pub struct Handlers {
    pub provider: Arc<dyn ShardProvider>,
    pub gateway: Option<Arc<dyn ShardGateway>>,
}

impl std::fmt::Debug for Handlers {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Handlers")
            .field("gateway", &self.gateway.is_some())
            .finish_non_exhaustive()
    }
}

impl Handlers {
    /// Answer one request. Responses are never dropped: a message that is
    /// not a request comes back as [`HarborMessage::Rejected`].
    pub async fn dispatch(&self, remote_peer: &str, msg: HarborMessage) -> HarborMessage {
        debug!(kind = msg.kind(), remote = remote_peer, "dispatching request");
        match msg {
            HarborMessage::ShardAssign(req) => {
                HarborMessage::ShardAssignResult(self.provider.handle_shard_assign(req).await)
            }
            HarborMessage::ShardLoad(req) => HarborMessage::ShardLoadResult(
                self.provider.handle_shard_load(remote_peer, req).await,
            ),
            HarborMessage::ShardMigrate(req) => {
                HarborMessage::ShardMigrateResult(self.provider.handle_shard_migrate(req).await)
            }
            HarborMessage::ShardStore(req) => HarborMessage::ShardStoreResult(match &self.gateway {
                Some(gateway) => gateway.handle_shard_store(req).await,
                None => ShardStoreResponse::failure(
                    ResponseCode::InvalidRequest,
                    "node does not serve content",
                ),
            }),
            HarborMessage::ShardComplete(req) => {
                HarborMessage::ShardCompleteResult(match &self.gateway {
                    Some(gateway) => gateway.handle_shard_complete(req).await,
                    None => ShardCompleteResponse::failure(
                        ResponseCode::InvalidRequest,
                        "node does not serve content",
                    ),
                })
            }
            other => HarborMessage::Rejected {
                message: format!("{} is not a request", other.kind()),
            },
        }
    }
}
