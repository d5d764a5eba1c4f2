//! Same-process hand-off for shards whose counterpart is this node.
//!
//! [`LocalProtocol`] pushes each request into an mpsc inbox together with a
//! oneshot for the reply; [`serve_local`] drains the inbox against the
//! node's [`Handlers`].

use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::dispatch::Handlers;
use crate::error::NetError;
use crate::message::{
    HarborMessage, ShardCompleteRequest, ShardCompleteResponse, ShardMigrateRequest,
    ShardMigrateResponse, ShardStoreRequest, ShardStoreResponse,
};
use crate::protocol::StorageProtocol;

/// Remote identity reported to handlers for in-process requests.
pub const LOCAL_PEER: &str = "local";

const INBOX_CAPACITY: usize = 64;

struct LocalRequest {
    msg: HarborMessage,
    reply: oneshot::Sender<HarborMessage>,
}

/// Receiving end of a [`LocalProtocol`].
pub struct LocalInbox {
    rx: mpsc::Receiver<LocalRequest>,
}

/// Sending end: a [`StorageProtocol`] that never leaves the process.
#[derive(Clone)]
pub struct LocalProtocol {
    tx: mpsc::Sender<LocalRequest>,
}

impl LocalProtocol {
    /// Create a connected protocol/inbox pair.
    pub fn channel() -> (Self, LocalInbox) {
        let (tx, rx) = mpsc::channel(INBOX_CAPACITY);
        (Self { tx }, LocalInbox { rx })
    }

    async fn call(&self, msg: HarborMessage) -> Result<HarborMessage, NetError> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(LocalRequest { msg, reply })
            .await
            .map_err(|_| NetError::LocalClosed)?;
        rx.await.map_err(|_| NetError::LocalClosed)
    }
}

#[async_trait::async_trait]
impl StorageProtocol for LocalProtocol {
    async fn request_shard_store(
        &self,
        _peer: &str,
        req: ShardStoreRequest,
    ) -> Result<ShardStoreResponse, NetError> {
        self.call(HarborMessage::ShardStore(req))
            .await?
            .into_store_result()
    }

    async fn request_shard_complete(
        &self,
        _peer: &str,
        req: ShardCompleteRequest,
    ) -> Result<ShardCompleteResponse, NetError> {
        self.call(HarborMessage::ShardComplete(req))
            .await?
            .into_complete_result()
    }

    async fn request_shard_migrate(
        &self,
        _peer: &str,
        req: ShardMigrateRequest,
    ) -> Result<ShardMigrateResponse, NetError> {
        self.call(HarborMessage::ShardMigrate(req))
            .await?
            .into_migrate_result()
    }
}

/// Answer local requests until `cancel` fires or every sender is dropped.
///
/// Each request is handled on its own task so a slow handler cannot block
/// the inbox.
pub async fn serve_local(mut inbox: LocalInbox, handlers: Handlers, cancel: CancellationToken) {
    info!("local protocol started");
    loop {
        let request = tokio::select! {
            _ = cancel.cancelled() => break,
            request = inbox.rx.recv() => match request {
                Some(request) => request,
                None => break,
            },
        };
        let handlers = handlers.clone();
        tokio::spawn(async move {
            let response = handlers.dispatch(LOCAL_PEER, request.msg).await;
            if request.reply.send(response).is_err() {
                debug!("local requester went away before the reply");
            }
        });
    }
    info!("local protocol stopped");
}
