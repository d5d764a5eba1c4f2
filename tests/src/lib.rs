//! Shared test harness for Harbor integration tests.
//!
//! Provides [`IntegrationCluster`]: N provider nodes sharing one
//! [`MemoryChain`], connected by a mock transport that pushes every request
//! through the real wire codec and the real inbound dispatch. Every node is
//! also a gateway for the content staged on it.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use ed25519_dalek::SigningKey;
use harbor_engine::{
    Backoff, MemoryChain, NewOrder, ShardEngine, ShardEngineConfig, StagingGateway, auth,
};
use harbor_meta::StateStore;
use harbor_net::codec::{decode_frame, encode_frame};
use harbor_net::{
    Handlers, HarborMessage, LocalProtocol, NetError, ShardAssignRequest, ShardAssignResponse,
    ShardCompleteRequest, ShardCompleteResponse, ShardLoadRequest, ShardLoadResponse,
    ShardMigrateRequest, ShardMigrateResponse, ShardStoreRequest, ShardStoreResponse,
    StorageProtocol, WireCodec, serve_local,
};
use harbor_store::MemoryStore;
use harbor_types::{
    ChainTx, Cid, Order, QueryProposal, ShardInfo, ShardKey, ShardState, SidDocument, TxType,
};
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Failed attempts before a shard is abandoned, unless overridden.
pub const DEFAULT_MAX_RETRIES: u32 = 5;

// =========================================================================
// Mock transport
// =========================================================================

/// Peers reachable over the mock transport.
///
/// Supports failure injection: peers in `down` are unreachable, both as
/// callers and as callees.
struct Fabric {
    handlers: RwLock<HashMap<String, Handlers>>,
    down: RwLock<HashSet<String>>,
    codec: WireCodec,
}

/// One node's outbound side of the fabric.
pub struct MockTransport {
    local_peer: String,
    fabric: Arc<Fabric>,
}

impl MockTransport {
    /// Deliver `msg` to `peer` as a frame and decode the reply frame.
    async fn call(&self, peer: &str, msg: HarborMessage) -> Result<HarborMessage, NetError> {
        {
            let down = self.fabric.down.read().await;
            if down.contains(peer) || down.contains(&self.local_peer) {
                return Err(NetError::Connect(format!("{peer} is down")));
            }
        }
        let handlers = self
            .fabric
            .handlers
            .read()
            .await
            .get(peer)
            .cloned()
            .ok_or_else(|| NetError::Connect(format!("no route to {peer}")))?;

        let codec = self.fabric.codec;
        let (_, request) = decode_frame(&encode_frame(codec, &msg)?)?;
        debug!(from = %self.local_peer, to = peer, kind = request.kind(), "mock call");
        let response = handlers.dispatch(&self.local_peer, request).await;
        let (_, response) = decode_frame(&encode_frame(codec, &response)?)?;
        Ok(response)
    }

    pub async fn request_shard_assign(
        &self,
        peer: &str,
        req: ShardAssignRequest,
    ) -> Result<ShardAssignResponse, NetError> {
        self.call(peer, HarborMessage::ShardAssign(req))
            .await?
            .into_assign_result()
    }

    pub async fn request_shard_load(
        &self,
        peer: &str,
        req: ShardLoadRequest,
    ) -> Result<ShardLoadResponse, NetError> {
        self.call(peer, HarborMessage::ShardLoad(req))
            .await?
            .into_load_result()
    }
}

#[async_trait]
impl StorageProtocol for MockTransport {
    async fn request_shard_store(
        &self,
        peer: &str,
        req: ShardStoreRequest,
    ) -> Result<ShardStoreResponse, NetError> {
        self.call(peer, HarborMessage::ShardStore(req))
            .await?
            .into_store_result()
    }

    async fn request_shard_complete(
        &self,
        peer: &str,
        req: ShardCompleteRequest,
    ) -> Result<ShardCompleteResponse, NetError> {
        self.call(peer, HarborMessage::ShardComplete(req))
            .await?
            .into_complete_result()
    }

    async fn request_shard_migrate(
        &self,
        peer: &str,
        req: ShardMigrateRequest,
    ) -> Result<ShardMigrateResponse, NetError> {
        self.call(peer, HarborMessage::ShardMigrate(req))
            .await?
            .into_migrate_result()
    }
}

// =========================================================================
// Integration cluster
// =========================================================================

/// One running node of an [`IntegrationCluster`].
pub struct ClusterNode {
    pub address: String,
    pub peer: String,
    pub engine: Arc<ShardEngine>,
    pub state: Arc<StateStore>,
    pub content: Arc<MemoryStore>,
    /// Content this node serves as a gateway.
    pub gateway: Arc<StagingGateway>,
    pub transport: Arc<MockTransport>,
    cancel: CancellationToken,
}

/// An N-node provider network over a mock transport and one shared ledger.
pub struct IntegrationCluster {
    nodes: Vec<ClusterNode>,
    chain: Arc<MemoryChain>,
    fabric: Arc<Fabric>,
    config: ShardEngineConfig,
}

impl IntegrationCluster {
    /// Create and start an N-node cluster with default tuning.
    pub async fn new(n: usize) -> Self {
        Self::with_max_retries(n, DEFAULT_MAX_RETRIES).await
    }

    /// Create and start an N-node cluster whose engines give up after
    /// `max_retries` failed attempts.
    pub async fn with_max_retries(n: usize, max_retries: u32) -> Self {
        assert!(n >= 1, "need at least 1 node");
        assert!(n <= 100, "too many nodes");

        let config = ShardEngineConfig {
            address: String::new(),
            window: 4,
            poll_interval: Duration::from_millis(10),
            max_retries,
            backoff: Backoff {
                base: Duration::from_millis(5),
                max: Duration::from_millis(50),
            },
            expire_interval: Duration::from_secs(3600),
            list_page_size: 3,
        };
        let fabric = Arc::new(Fabric {
            handlers: RwLock::new(HashMap::new()),
            down: RwLock::new(HashSet::new()),
            codec: WireCodec::Postcard,
        });
        let mut cluster = Self {
            nodes: Vec::with_capacity(n),
            chain: Arc::new(MemoryChain::new()),
            fabric,
            config,
        };
        for i in 0..n {
            let address = format!("provider-{i}");
            let peer = format!("peer-{i}");
            cluster.chain.register_node(&address, &peer);
            let node = cluster
                .spawn_node(
                    address,
                    peer,
                    Arc::new(StateStore::open_temporary().unwrap()),
                    Arc::new(MemoryStore::new()),
                    Arc::new(StagingGateway::new(Arc::new(MemoryStore::new()))),
                )
                .await;
            cluster.nodes.push(node);
        }
        cluster
    }

    async fn spawn_node(
        &self,
        address: String,
        peer: String,
        state: Arc<StateStore>,
        content: Arc<MemoryStore>,
        gateway: Arc<StagingGateway>,
    ) -> ClusterNode {
        let transport = Arc::new(MockTransport {
            local_peer: peer.clone(),
            fabric: self.fabric.clone(),
        });
        let (local, inbox) = LocalProtocol::channel();
        let engine = Arc::new(ShardEngine::new(
            ShardEngineConfig {
                address: address.clone(),
                ..self.config.clone()
            },
            state.clone(),
            content.clone(),
            self.chain.clone(),
            Arc::new(local),
            transport.clone(),
        ));
        let handlers = Handlers {
            provider: engine.clone(),
            gateway: Some(gateway.clone()),
        };
        self.fabric
            .handlers
            .write()
            .await
            .insert(peer.clone(), handlers.clone());

        let cancel = CancellationToken::new();
        tokio::spawn(serve_local(inbox, handlers, cancel.clone()));
        engine.start(cancel.clone()).unwrap();

        ClusterNode {
            address,
            peer,
            engine,
            state,
            content,
            gateway,
            transport,
            cancel,
        }
    }

    /// Get a reference to node `i`.
    pub fn node(&self, i: usize) -> &ClusterNode {
        &self.nodes[i]
    }

    /// Number of nodes in the cluster.
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// Returns `true` if the cluster has no nodes.
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn chain(&self) -> &MemoryChain {
        &self.chain
    }

    /// Stage `data` on node `gateway`, create an order naming `providers`
    /// and announce it to each provider from the gateway.
    ///
    /// Returns the order, the store transaction and each provider's reply.
    pub async fn place_order(
        &self,
        gateway: usize,
        data_id: &str,
        data: &[u8],
        providers: &[usize],
    ) -> (Order, ChainTx, Vec<Result<ShardAssignResponse, NetError>>) {
        let (order, tx) = self.create_order(gateway, data_id, data, providers).await;
        let mut replies = Vec::with_capacity(providers.len());
        for &p in providers {
            replies.push(self.announce(gateway, p, &order, &tx).await);
        }
        (order, tx, replies)
    }

    /// Stage `data` on node `gateway` and create an order naming
    /// `providers`, without announcing it.
    pub async fn create_order(
        &self,
        gateway: usize,
        data_id: &str,
        data: &[u8],
        providers: &[usize],
    ) -> (Order, ChainTx) {
        self.create_owned_order("owner", gateway, data_id, data, providers)
            .await
    }

    /// [`create_order`](Self::create_order) on behalf of `owner`.
    pub async fn create_owned_order(
        &self,
        owner: &str,
        gateway: usize,
        data_id: &str,
        data: &[u8],
        providers: &[usize],
    ) -> (Order, ChainTx) {
        self.nodes[gateway]
            .gateway
            .stage(data.to_vec())
            .await
            .unwrap();
        let addresses: Vec<&str> = providers
            .iter()
            .map(|&p| self.nodes[p].address.as_str())
            .collect();
        self.chain.create_order(NewOrder {
            owner,
            ..NewOrder::new(&self.nodes[gateway].address, data_id, data, &addresses)
        })
    }

    /// Send the assignment notice for `order` from node `from` to `provider`.
    pub async fn announce(
        &self,
        from: usize,
        provider: usize,
        order: &Order,
        tx: &ChainTx,
    ) -> Result<ShardAssignResponse, NetError> {
        self.nodes[from]
            .transport
            .request_shard_assign(
                &self.nodes[provider].peer,
                ShardAssignRequest {
                    order_id: order.id,
                    assignee: self.nodes[provider].address.clone(),
                    tx_hash: tx.hash.clone(),
                    height: tx.height,
                    tx_type: TxType::Store,
                },
            )
            .await
    }

    /// The shard record node `i` holds for `order`.
    pub fn shard(&self, i: usize, order: &Order) -> Option<ShardInfo> {
        let cid: Cid = order.cid.parse().ok()?;
        self.nodes[i]
            .engine
            .shard_status(order.id, cid)
            .ok()
            .flatten()
    }

    /// Wait until node `i` records `order`'s shard in `state`.
    pub async fn wait_for_state(&self, i: usize, order: &Order, state: ShardState) -> ShardInfo {
        wait_until(|| self.shard(i, order).is_some_and(|s| s.state == state)).await;
        self.shard(i, order).unwrap()
    }

    /// Mark a node as "down": transport calls to or from it fail.
    pub async fn kill_node(&self, i: usize) {
        self.fabric
            .down
            .write()
            .await
            .insert(self.nodes[i].peer.clone());
    }

    /// Mark a node as reachable again after being killed.
    pub async fn revive_node(&self, i: usize) {
        self.fabric.down.write().await.remove(&self.nodes[i].peer);
    }

    /// Stop node `i`'s engine and start a fresh one over the same state,
    /// content and staged data, as after a process restart.
    pub async fn restart_node(&mut self, i: usize) {
        self.nodes[i].cancel.cancel();
        let old = &self.nodes[i];
        let node = self
            .spawn_node(
                old.address.clone(),
                old.peer.clone(),
                old.state.clone(),
                old.content.clone(),
                old.gateway.clone(),
            )
            .await;
        self.nodes[i] = node;
    }

    /// Publish an identity document with `key` as its only key.
    pub fn register_owner(&self, did: &str, kid: &str, key: &SigningKey) {
        self.chain.put_sid_document(SidDocument {
            version_id: kid.to_string(),
            did: did.to_string(),
            keys: vec![key.verifying_key().to_bytes()],
        });
    }

    /// A load request for `cid` signed by the owner `did` under `kid`,
    /// relayed by node `gateway`.
    pub fn owner_load_request(
        &self,
        gateway: usize,
        did: &str,
        kid: &str,
        key: &SigningKey,
        cid: Cid,
        last_valid_height: u64,
    ) -> ShardLoadRequest {
        let proposal = QueryProposal {
            owner: did.to_string(),
            keyword: cid.to_string(),
            gateway: self.nodes[gateway].address.clone(),
            last_valid_height,
        };
        ShardLoadRequest {
            cid,
            signature: auth::sign(key, kid, &proposal).unwrap(),
            proposal,
            relay: None,
            relay_signature: None,
        }
    }

    /// Every shard key node `i` holds in `state`.
    pub fn keys_in_state(&self, i: usize, state: ShardState) -> Vec<ShardKey> {
        self.nodes[i]
            .engine
            .shard_list()
            .unwrap()
            .into_iter()
            .filter(|s| s.state == state)
            .map(|s| s.key())
            .collect()
    }
}

impl Drop for IntegrationCluster {
    fn drop(&mut self) {
        for node in &self.nodes {
            node.cancel.cancel();
        }
    }
}

/// Poll `cond` every 10 ms until it holds, failing the test after 10 s.
pub async fn wait_until(mut cond: impl FnMut() -> bool) {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(10);
    while !cond() {
        assert!(
            tokio::time::Instant::now() < deadline,
            "condition not reached in time"
        );
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

/// Generate deterministic test data with a specific seed (for unique content).
pub fn test_data_seeded(size: usize, seed: u32) -> Vec<u8> {
    let mut data = Vec::with_capacity(size);
    let mut state: u32 = seed;
    for _ in 0..size {
        state = state.wrapping_mul(1103515245).wrapping_add(12345);
        data.push((state >> 16) as u8);
    }
    data
}
