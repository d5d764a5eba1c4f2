//! [`ShardEngine`]: owns the node's state and drives every shard it is
//! responsible for from assignment to completion.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use harbor_meta::StateStore;
use harbor_net::{
    LOCAL_PEER, ShardAssignRequest, ShardAssignResponse, ShardLoadRequest, ShardLoadResponse,
    ShardMigrateRequest, ShardMigrateResponse, ShardProvider, StorageProtocol,
};
use harbor_store::{ContentStore, StoreError};
use harbor_types::events::EventBus;
use harbor_types::{
    Cid, MigrateInfo, MigrateKey, MigrateState, OrderId, ShardInfo, ShardKey, ShardState,
};
use tokio::sync::{Semaphore, mpsc};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::backoff::Backoff;
use crate::chain::ChainClient;
use crate::error::EngineError;
use crate::queue::WorkQueue;

/// Tunables of a [`ShardEngine`].
#[derive(Debug, Clone)]
pub struct ShardEngineConfig {
    /// This node's chain address.
    pub address: String,
    /// Maximum shards processed concurrently.
    pub window: usize,
    /// How often the scheduler polls the work queue.
    pub poll_interval: Duration,
    /// Failed attempts after which a shard or migration is abandoned.
    pub max_retries: u32,
    pub backoff: Backoff,
    /// Period of the expiration sweep.
    pub expire_interval: Duration,
    /// Page size when listing this node's shards on chain.
    pub list_page_size: u64,
}

impl Default for ShardEngineConfig {
    fn default() -> Self {
        Self {
            address: String::new(),
            window: 10,
            poll_interval: Duration::from_secs(1),
            max_retries: 10,
            backoff: Backoff::default(),
            expire_interval: Duration::from_secs(24 * 60 * 60),
            list_page_size: 100,
        }
    }
}

/// Where requests for a counterpart node go.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Route {
    /// The counterpart is this node.
    Local,
    /// The counterpart's transport identity.
    Stream(String),
}

/// A migration to (re)attempt.
#[derive(Debug, Clone)]
pub(crate) struct MigrateJob {
    pub key: MigrateKey,
}

/// The storage provider's shard fulfillment engine.
pub struct ShardEngine {
    pub(crate) config: ShardEngineConfig,
    pub(crate) state: Arc<StateStore>,
    pub(crate) content: Arc<dyn ContentStore>,
    pub(crate) chain: Arc<dyn ChainClient>,
    local: Arc<dyn StorageProtocol>,
    stream: Arc<dyn StorageProtocol>,
    pub(crate) queue: WorkQueue,
    pub(crate) events: EventBus,
    pub(crate) concurrency: Arc<Semaphore>,
    pub(crate) migrate_tx: mpsc::UnboundedSender<MigrateJob>,
    migrate_rx: Mutex<Option<mpsc::UnboundedReceiver<MigrateJob>>>,
}

impl ShardEngine {
    /// Create an engine. `local` carries requests whose counterpart is
    /// this node, `stream` every other request.
    pub fn new(
        config: ShardEngineConfig,
        state: Arc<StateStore>,
        content: Arc<dyn ContentStore>,
        chain: Arc<dyn ChainClient>,
        local: Arc<dyn StorageProtocol>,
        stream: Arc<dyn StorageProtocol>,
    ) -> Self {
        let (migrate_tx, migrate_rx) = mpsc::unbounded_channel();
        Self {
            concurrency: Arc::new(Semaphore::new(config.window.max(1))),
            config,
            state,
            content,
            chain,
            local,
            stream,
            queue: WorkQueue::new(),
            events: EventBus::new(),
            migrate_tx,
            migrate_rx: Mutex::new(Some(migrate_rx)),
        }
    }

    pub fn address(&self) -> &str {
        &self.config.address
    }

    pub fn config(&self) -> &ShardEngineConfig {
        &self.config
    }

    /// Lifecycle notifications.
    pub fn events(&self) -> &EventBus {
        &self.events
    }

    /// Number of shards waiting in the work queue.
    pub fn queue_len(&self) -> usize {
        self.queue.len()
    }

    /// Rebuild indices, restore pending work and spawn the scheduler,
    /// migration and expiration loops. Each loop stops when `cancel` fires.
    pub fn start(
        self: &Arc<Self>,
        cancel: CancellationToken,
    ) -> Result<Vec<JoinHandle<()>>, EngineError> {
        let migrate_rx = self
            .migrate_rx
            .lock()
            .expect("migrate lock poisoned")
            .take()
            .ok_or(EngineError::AlreadyStarted)?;

        self.state.rebuild_indices()?;
        let (shards, migrations) = self.restore()?;
        info!(
            address = %self.config.address,
            shards,
            migrations,
            "shard engine starting"
        );

        Ok(vec![
            tokio::spawn(self.clone().run_scheduler(cancel.clone())),
            tokio::spawn(self.clone().run_migrations(migrate_rx, cancel.clone())),
            tokio::spawn(self.clone().run_expiration(cancel)),
        ])
    }

    /// Queue every unfinished shard and re-dispatch unfinished migrations.
    fn restore(&self) -> Result<(usize, usize), EngineError> {
        let mut shards = 0;
        for shard in self.state.list_shards()? {
            if shard.state < ShardState::Complete && self.enqueue(shard) {
                shards += 1;
            }
        }
        let mut migrations = 0;
        for migrate in self.state.list_migrates()? {
            if migrate.state == MigrateState::TxSent {
                self.dispatch_migration(migrate.key());
                migrations += 1;
            }
        }
        Ok((shards, migrations))
    }

    /// Queue a shard for processing. Returns `false` if it is already
    /// queued or in flight, or needs no processing.
    pub(crate) fn enqueue(&self, shard: ShardInfo) -> bool {
        if shard.state.is_absorbing() {
            return false;
        }
        let key = shard.key();
        let queued = self.queue.push(shard);
        if !queued {
            debug!(%key, "shard already queued");
        }
        queued
    }

    pub(crate) fn dispatch_migration(&self, key: MigrateKey) {
        // Only fails once the migration loop has shut down.
        if self.migrate_tx.send(MigrateJob { key }).is_err() {
            debug!("migration loop stopped, job dropped");
        }
    }

    pub(crate) async fn route(&self, node: &str) -> Result<Route, EngineError> {
        if node == self.config.address {
            return Ok(Route::Local);
        }
        self.chain
            .get_node_peer(node)
            .await?
            .map(Route::Stream)
            .ok_or_else(|| EngineError::UnknownPeer(node.to_string()))
    }

    pub(crate) fn protocol<'a>(&'a self, route: &'a Route) -> (&'a dyn StorageProtocol, &'a str) {
        match route {
            Route::Local => (self.local.as_ref(), LOCAL_PEER),
            Route::Stream(peer) => (self.stream.as_ref(), peer.as_str()),
        }
    }

    // ----- Status operations -----

    pub fn shard_status(
        &self,
        order_id: OrderId,
        cid: Cid,
    ) -> Result<Option<ShardInfo>, EngineError> {
        Ok(self.state.get_shard(&ShardKey::new(order_id, cid))?)
    }

    pub fn shard_list(&self) -> Result<Vec<ShardInfo>, EngineError> {
        Ok(self.state.list_shards()?)
    }

    /// Re-derive a shard's progress from what is actually held, reset its
    /// retries and queue it again.
    pub async fn shard_fix(&self, order_id: OrderId, cid: Cid) -> Result<ShardInfo, EngineError> {
        let key = ShardKey::new(order_id, cid);
        let mut shard = self
            .state
            .get_shard(&key)?
            .ok_or(EngineError::ShardNotFound(key))?;
        if self.queue.contains(&key) {
            // Leave a queued or running attempt alone; it already holds
            // the only slot for this key.
            debug!(%key, "shard fix skipped, attempt pending");
            return Ok(shard);
        }
        rederive(&mut shard, self.content.as_ref()).await?;
        self.state.put_shard(&shard)?;
        info!(%key, state = %shard.state, "shard fixed");
        self.enqueue(shard.clone());
        Ok(shard)
    }

    pub fn migrate_list(&self) -> Result<Vec<MigrateInfo>, EngineError> {
        Ok(self.state.list_migrates()?)
    }
}

/// Reset `shard` to the furthest state its evidence supports: `TxSent` when
/// a completion was recorded, `Stored` when the content is held, otherwise
/// `Validated`. Retries and the last error are cleared.
///
/// Expired shards are left untouched: their content and chain entry are gone.
pub async fn rederive(shard: &mut ShardInfo, content: &dyn ContentStore) -> Result<(), StoreError> {
    if shard.state == ShardState::Expired {
        return Ok(());
    }
    shard.state = if !shard.complete_hash.is_empty() {
        ShardState::TxSent
    } else if content.is_exist(shard.cid).await? {
        ShardState::Stored
    } else {
        ShardState::Validated
    };
    shard.retries = 0;
    shard.retry_at = 0;
    shard.last_error.clear();
    shard.updated_at = harbor_types::now_millis();
    Ok(())
}

#[async_trait::async_trait]
impl ShardProvider for ShardEngine {
    async fn handle_shard_assign(&self, req: ShardAssignRequest) -> ShardAssignResponse {
        let order_id = req.order_id;
        match self.assign(req).await {
            Ok(queued) => {
                info!(order_id, queued, "shard assignment accepted");
                ShardAssignResponse::success()
            }
            Err(rejection) => {
                warn!(order_id, code = %rejection.code, message = %rejection.message, "shard assignment rejected");
                ShardAssignResponse::failure(rejection.code, rejection.message)
            }
        }
    }

    async fn handle_shard_load(&self, remote_peer: &str, req: ShardLoadRequest) -> ShardLoadResponse {
        let cid = req.cid;
        match self.load(remote_peer, req).await {
            Ok(resp) => resp,
            Err(rejection) => {
                warn!(%cid, remote = remote_peer, code = %rejection.code, message = %rejection.message, "shard load refused");
                ShardLoadResponse::failure(rejection.code, rejection.message)
            }
        }
    }

    async fn handle_shard_migrate(&self, req: ShardMigrateRequest) -> ShardMigrateResponse {
        let (order_id, from) = (req.order_id, req.migrate_from.clone());
        match self.accept_migration(req).await {
            Ok(resp) => resp,
            Err(rejection) => {
                warn!(order_id, %from, code = %rejection.code, message = %rejection.message, "inbound migration rejected");
                ShardMigrateResponse::failure(rejection.code, rejection.message)
            }
        }
    }
}
