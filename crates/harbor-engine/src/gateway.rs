//! A gateway that serves content staged on this node.
//!
//! Used when a node is its own gateway (single-node development, tests):
//! content is staged under its address before the order is created, and
//! the most recent completion notices are kept.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use bytes::Bytes;
use harbor_net::{
    ShardCompleteRequest, ShardCompleteResponse, ShardGateway, ShardStoreRequest,
    ShardStoreResponse,
};
use harbor_store::{ContentStore, StoreError};
use harbor_types::{Cid, ResponseCode};
use tracing::{debug, info, warn};

/// Completion notices kept before the oldest is dropped.
pub const COMPLETIONS_KEPT: usize = 1024;

pub struct StagingGateway {
    staged: Arc<dyn ContentStore>,
    completions: Mutex<VecDeque<ShardCompleteRequest>>,
}

impl StagingGateway {
    pub fn new(staged: Arc<dyn ContentStore>) -> Self {
        Self {
            staged,
            completions: Mutex::new(VecDeque::new()),
        }
    }

    /// Stage `data` for providers to fetch. Returns its address.
    pub async fn stage(&self, data: impl Into<Bytes>) -> Result<Cid, StoreError> {
        let data = data.into();
        let cid = Cid::from_data(&data);
        self.staged.store(cid, data).await?;
        debug!(%cid, "content staged");
        Ok(cid)
    }

    /// The last [`COMPLETIONS_KEPT`] completion notices, oldest first.
    pub fn completions(&self) -> Vec<ShardCompleteRequest> {
        self.completions
            .lock()
            .expect("completions lock poisoned")
            .iter()
            .cloned()
            .collect()
    }
}

#[async_trait::async_trait]
impl ShardGateway for StagingGateway {
    async fn handle_shard_store(&self, req: ShardStoreRequest) -> ShardStoreResponse {
        match self.staged.get(req.cid).await {
            Ok(Some(content)) => ShardStoreResponse {
                code: ResponseCode::Success,
                message: String::new(),
                content: content.to_vec(),
            },
            Ok(None) => {
                warn!(cid = %req.cid, provider = %req.provider, "requested content not staged");
                ShardStoreResponse::failure(ResponseCode::InternalErr, "content not staged")
            }
            Err(e) => ShardStoreResponse::failure(ResponseCode::InternalErr, e.to_string()),
        }
    }

    async fn handle_shard_complete(&self, req: ShardCompleteRequest) -> ShardCompleteResponse {
        info!(
            order_id = req.order_id,
            provider = %req.provider,
            tx = %req.tx_hash,
            "provider completed shard"
        );
        let mut completions = self.completions.lock().expect("completions lock poisoned");
        if completions.len() == COMPLETIONS_KEPT {
            completions.pop_front();
        }
        completions.push_back(req);
        ShardCompleteResponse::success()
    }
}
