//! Cross-node transport on iroh QUIC.
//!
//! Every request opens a bi-directional stream on a pooled connection,
//! writes one frame, finishes the send side and reads one response frame.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;

use iroh::endpoint::{Connection, RecvStream, SendStream};
use iroh::{Endpoint, EndpointAddr, EndpointId, SecretKey};
use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::codec::{self, HEADER_LEN, WireCodec};
use crate::dispatch::Handlers;
use crate::error::NetError;
use crate::message::{
    HarborMessage, ShardAssignRequest, ShardAssignResponse, ShardCompleteRequest,
    ShardCompleteResponse, ShardLoadRequest, ShardLoadResponse, ShardMigrateRequest,
    ShardMigrateResponse, ShardStoreRequest, ShardStoreResponse,
};
use crate::protocol::StorageProtocol;

/// ALPN of the storage protocol.
pub const HARBOR_ALPN: &[u8] = b"harbor/shard/0";

/// Parse `<endpoint-id>[@<ip:port>]` into an address iroh can dial.
pub fn parse_peer(peer: &str) -> Result<EndpointAddr, NetError> {
    let invalid = |reason: String| NetError::InvalidPeer {
        peer: peer.to_string(),
        reason,
    };
    let (id_str, addr_str) = match peer.split_once('@') {
        Some((id, addr)) => (id, Some(addr)),
        None => (peer, None),
    };
    let id: EndpointId = id_str
        .parse()
        .map_err(|e| invalid(format!("endpoint id: {e}")))?;
    let mut addr = EndpointAddr::new(id);
    if let Some(sock) = addr_str {
        let sock: SocketAddr = sock
            .parse()
            .map_err(|e| invalid(format!("socket address: {e}")))?;
        addr = addr.with_ip_addr(sock);
    }
    Ok(addr)
}

/// [`StorageProtocol`] over iroh streams.
pub struct StreamProtocol {
    endpoint: Endpoint,
    /// Held across connect so concurrent callers share one connection.
    connections: Arc<Mutex<HashMap<EndpointId, Connection>>>,
    codec: WireCodec,
}

impl StreamProtocol {
    /// Bind a fresh endpoint accepting [`HARBOR_ALPN`].
    pub async fn bind(
        secret_key: SecretKey,
        relay_mode: iroh::RelayMode,
        codec: WireCodec,
    ) -> Result<Self, NetError> {
        let endpoint = Endpoint::builder()
            .secret_key(secret_key)
            .alpns(vec![HARBOR_ALPN.to_vec()])
            .relay_mode(relay_mode)
            .bind()
            .await
            .map_err(|e| NetError::Endpoint(e.to_string()))?;
        Ok(Self::from_endpoint(endpoint, codec))
    }

    /// Wrap an endpoint shared with an iroh `Router` that handles inbound
    /// connections; this side only dials.
    pub fn from_endpoint(endpoint: Endpoint, codec: WireCodec) -> Self {
        Self {
            endpoint,
            connections: Arc::new(Mutex::new(HashMap::new())),
            codec,
        }
    }

    pub fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    pub fn endpoint_id(&self) -> EndpointId {
        self.endpoint.id()
    }

    async fn get_connection(&self, addr: EndpointAddr) -> Result<Connection, NetError> {
        let remote_id = addr.id;
        let mut cache = self.connections.lock().await;
        if let Some(conn) = cache.get(&remote_id)
            && conn.close_reason().is_none()
        {
            return Ok(conn.clone());
        }
        debug!(remote = %remote_id.fmt_short(), "connecting to peer");
        let conn = self
            .endpoint
            .connect(addr, HARBOR_ALPN)
            .await
            .map_err(|e| NetError::Connect(e.to_string()))?;
        cache.insert(remote_id, conn.clone());
        Ok(conn)
    }

    async fn remove_connection(&self, id: &EndpointId) {
        self.connections.lock().await.remove(id);
    }

    /// Send one request frame and wait for the response frame.
    pub async fn call(
        &self,
        peer: &str,
        msg: &HarborMessage,
    ) -> Result<HarborMessage, NetError> {
        let addr = parse_peer(peer)?;
        let remote_id = addr.id;
        let conn = self.get_connection(addr).await?;
        let result = async {
            let (mut send, mut recv) = conn
                .open_bi()
                .await
                .map_err(|e| NetError::StreamOpen(e.to_string()))?;
            send_frame(&mut send, self.codec, msg).await?;
            let (_, response) = recv_frame(&mut recv).await?;
            Ok::<_, NetError>(response)
        }
        .await;
        if result.is_err() && conn.close_reason().is_some() {
            self.remove_connection(&remote_id).await;
        }
        result
    }

    /// Push an assignment notice to a provider.
    pub async fn request_shard_assign(
        &self,
        peer: &str,
        req: ShardAssignRequest,
    ) -> Result<ShardAssignResponse, NetError> {
        self.call(peer, &HarborMessage::ShardAssign(req))
            .await?
            .into_assign_result()
    }

    /// Read content from a provider under a signed proposal.
    pub async fn request_shard_load(
        &self,
        peer: &str,
        req: ShardLoadRequest,
    ) -> Result<ShardLoadResponse, NetError> {
        self.call(peer, &HarborMessage::ShardLoad(req))
            .await?
            .into_load_result()
    }
}

#[async_trait::async_trait]
impl StorageProtocol for StreamProtocol {
    async fn request_shard_store(
        &self,
        peer: &str,
        req: ShardStoreRequest,
    ) -> Result<ShardStoreResponse, NetError> {
        self.call(peer, &HarborMessage::ShardStore(req))
            .await?
            .into_store_result()
    }

    async fn request_shard_complete(
        &self,
        peer: &str,
        req: ShardCompleteRequest,
    ) -> Result<ShardCompleteResponse, NetError> {
        self.call(peer, &HarborMessage::ShardComplete(req))
            .await?
            .into_complete_result()
    }

    async fn request_shard_migrate(
        &self,
        peer: &str,
        req: ShardMigrateRequest,
    ) -> Result<ShardMigrateResponse, NetError> {
        self.call(peer, &HarborMessage::ShardMigrate(req))
            .await?
            .into_migrate_result()
    }
}

/// Write one frame and finish the stream.
pub async fn send_frame(
    send: &mut SendStream,
    codec: WireCodec,
    msg: &HarborMessage,
) -> Result<(), NetError> {
    let frame = codec::encode_frame(codec, msg)?;
    send.write_all(&frame).await?;
    send.finish()?;
    Ok(())
}

/// Read one frame.
pub async fn recv_frame(recv: &mut RecvStream) -> Result<(WireCodec, HarborMessage), NetError> {
    let mut header = [0u8; HEADER_LEN];
    recv.read_exact(&mut header).await?;
    let (codec, len) = codec::decode_header(&header)?;
    let payload = recv.read_to_end(len).await?;
    Ok((codec, codec.decode(&payload)?))
}

/// Serve every bi-stream on `conn` until it closes.
///
/// Each stream carries one request; the reply uses the request's codec.
pub async fn handle_bi_streams(conn: Connection, handlers: Handlers) {
    let remote = conn.remote_id().to_string();
    loop {
        match conn.accept_bi().await {
            Ok((mut send, mut recv)) => {
                let handlers = handlers.clone();
                let remote = remote.clone();
                tokio::spawn(async move {
                    match recv_frame(&mut recv).await {
                        Ok((codec, request)) => {
                            let response = handlers.dispatch(&remote, request).await;
                            if let Err(e) = send_frame(&mut send, codec, &response).await {
                                warn!(%remote, "failed to send response: {e}");
                            }
                        }
                        Err(e) => warn!(%remote, "failed to decode request: {e}"),
                    }
                });
            }
            Err(e) => {
                debug!(%remote, "connection closed: {e}");
                break;
            }
        }
    }
}
