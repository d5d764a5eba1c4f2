//! The chain collaborator.
//!
//! [`ChainClient`] is everything the engine asks of the ledger.
//! [`MemoryChain`] is an in-process ledger with the same semantics, used by
//! tests and single-node development runs.

use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};
use std::sync::Mutex;

use harbor_types::chain::{OP_NEW, ShardStatus};
use harbor_types::{
    Account, ChainTx, Cid, MigrateTxResponse, Order, OrderId, OrderShard, SidDocument, TxMessage,
    TxType,
};
use tracing::debug;

/// Errors from the chain collaborator.
#[derive(Debug, Clone, thiserror::Error)]
pub enum ChainError {
    /// The ledger could not be reached or answered garbage.
    #[error("chain unavailable: {0}")]
    Unavailable(String),

    /// The ledger refused to include a transaction.
    #[error("transaction rejected: {0}")]
    Rejected(String),
}

/// Ledger queries and broadcasts used by the engine.
///
/// Lookups return `Ok(None)` when the ledger answered and the record does
/// not exist; `Err` means no answer was obtained.
#[async_trait::async_trait]
pub trait ChainClient: Send + Sync {
    /// A committed transaction at `height`.
    async fn get_tx(&self, hash: &str, height: u64) -> Result<Option<ChainTx>, ChainError>;

    async fn get_order(&self, order_id: OrderId) -> Result<Option<Order>, ChainError>;

    async fn get_last_height(&self) -> Result<u64, ChainError>;

    /// Transport identity registered for a node address.
    async fn get_node_peer(&self, node: &str) -> Result<Option<String>, ChainError>;

    /// Addresses of the auditor ("fishmen") nodes.
    async fn get_fishmen(&self) -> Result<Vec<String>, ChainError>;

    async fn get_account(&self, address: &str) -> Result<Option<Account>, ChainError>;

    /// Broadcast completion of `provider`'s shard `cid` of `order_id`.
    async fn complete_order(
        &self,
        provider: &str,
        order_id: OrderId,
        cid: &Cid,
        size: u64,
    ) -> Result<ChainTx, ChainError>;

    /// Broadcast a migration of `provider`'s shards of `data_ids`.
    ///
    /// The transaction response is a JSON [`MigrateTxResponse`].
    async fn migrate_order(
        &self,
        provider: &str,
        data_ids: &[String],
    ) -> Result<ChainTx, ChainError>;

    /// A page of the live (not terminated) shards `provider` holds.
    async fn list_shards(
        &self,
        provider: &str,
        offset: u64,
        limit: u64,
    ) -> Result<Vec<OrderShard>, ChainError>;

    async fn get_sid_document(&self, version_id: &str) -> Result<Option<SidDocument>, ChainError>;
}

// ---------------------------------------------------------------------------
// In-memory ledger
// ---------------------------------------------------------------------------

#[derive(Default)]
struct Ledger {
    height: u64,
    tx_seq: u64,
    next_order_id: OrderId,
    next_shard_id: u64,
    txs: HashMap<String, ChainTx>,
    /// Hashes handed out to the next commits, before derived ones.
    scripted_hashes: VecDeque<String>,
    orders: BTreeMap<OrderId, Order>,
    /// Node address -> transport identity.
    nodes: BTreeMap<String, String>,
    fishmen: Vec<String>,
    accounts: HashMap<String, Account>,
    sid_documents: HashMap<String, SidDocument>,
    offline: bool,
    fail_completes: u32,
    complete_calls: u64,
}

impl Ledger {
    fn check_online(&self) -> Result<(), ChainError> {
        if self.offline {
            return Err(ChainError::Unavailable("ledger offline".into()));
        }
        Ok(())
    }

    fn commit(&mut self, messages: Vec<TxMessage>, response: Vec<u8>) -> ChainTx {
        self.height += 1;
        self.tx_seq += 1;
        let hash = self.scripted_hashes.pop_front().unwrap_or_else(|| {
            Cid::from_data(&self.tx_seq.to_be_bytes()).to_string()[..16].to_string()
        });
        let tx = ChainTx {
            hash: hash.clone(),
            height: self.height,
            code: 0,
            messages,
            response,
        };
        self.txs.insert(hash, tx.clone());
        tx
    }
}

/// In-process ledger.
///
/// Orders are created with [`MemoryChain::create_order`]; every broadcast
/// commits a transaction at the next height.
#[derive(Default)]
pub struct MemoryChain {
    ledger: Mutex<Ledger>,
}

/// Parameters of an order created on a [`MemoryChain`].
#[derive(Debug, Clone)]
pub struct NewOrder<'a> {
    pub owner: &'a str,
    pub gateway: &'a str,
    pub data_id: &'a str,
    pub cid: Cid,
    pub size: u64,
    pub providers: &'a [&'a str],
    pub operation: u8,
    /// Height by which the order must be completed (0 = none).
    pub timeout: u64,
}

impl<'a> NewOrder<'a> {
    pub fn new(gateway: &'a str, data_id: &'a str, content: &[u8], providers: &'a [&'a str]) -> Self {
        Self {
            owner: "owner",
            gateway,
            data_id,
            cid: Cid::from_data(content),
            size: content.len() as u64,
            providers,
            operation: OP_NEW,
            timeout: 0,
        }
    }
}

impl MemoryChain {
    pub fn new() -> Self {
        Self::default()
    }

    fn ledger(&self) -> std::sync::MutexGuard<'_, Ledger> {
        self.ledger.lock().expect("ledger lock poisoned")
    }

    /// Register a node address with its transport identity.
    pub fn register_node(&self, address: &str, peer: &str) {
        self.ledger()
            .nodes
            .insert(address.to_string(), peer.to_string());
    }

    pub fn add_fishmen(&self, address: &str) {
        self.ledger().fishmen.push(address.to_string());
    }

    pub fn put_account(&self, account: Account) {
        self.ledger()
            .accounts
            .insert(account.address.clone(), account);
    }

    pub fn put_sid_document(&self, doc: SidDocument) {
        self.ledger()
            .sid_documents
            .insert(doc.version_id.clone(), doc);
    }

    /// Create an order assigning one shard per provider, committed in a
    /// `Store` transaction. Returns the order and that transaction.
    pub fn create_order(&self, new: NewOrder<'_>) -> (Order, ChainTx) {
        let mut ledger = self.ledger();
        ledger.next_order_id += 1;
        let order_id = ledger.next_order_id;
        let mut shards = Vec::with_capacity(new.providers.len());
        for provider in new.providers {
            ledger.next_shard_id += 1;
            shards.push(OrderShard {
                id: ledger.next_shard_id,
                order_id,
                cid: new.cid.to_string(),
                provider: provider.to_string(),
                from: String::new(),
                size: new.size,
                status: ShardStatus::Waiting,
            });
        }
        let order = Order {
            id: order_id,
            owner: new.owner.to_string(),
            gateway: new.gateway.to_string(),
            data_id: new.data_id.to_string(),
            cid: new.cid.to_string(),
            operation: new.operation,
            shard_operation: new.operation,
            timeout: new.timeout,
            shards,
        };
        ledger.orders.insert(order_id, order.clone());
        let tx = ledger.commit(
            vec![TxMessage {
                kind: TxType::Store,
                order_id,
                data_ids: vec![new.data_id.to_string()],
            }],
            Vec::new(),
        );
        (order, tx)
    }

    /// Commit an arbitrary transaction (for malformed-tx scenarios).
    pub fn commit_tx(&self, messages: Vec<TxMessage>, code: u32) -> ChainTx {
        let mut ledger = self.ledger();
        let mut tx = ledger.commit(messages, Vec::new());
        tx.code = code;
        ledger.txs.insert(tx.hash.clone(), tx.clone());
        tx
    }

    /// Drop `provider`'s shard from `order_id` so it no longer lists.
    pub fn terminate_shard(&self, order_id: OrderId, provider: &str) {
        let mut ledger = self.ledger();
        if let Some(order) = ledger.orders.get_mut(&order_id) {
            for shard in order.shards.iter_mut().filter(|s| s.provider == provider) {
                shard.status = ShardStatus::Terminated;
            }
        }
    }

    /// The next order created gets `order_id`.
    pub fn set_next_order_id(&self, order_id: OrderId) {
        self.ledger().next_order_id = order_id.saturating_sub(1);
    }

    /// Use `hash` for the next committed transaction.
    pub fn script_tx_hash(&self, hash: &str) {
        self.ledger().scripted_hashes.push_back(hash.to_string());
    }

    /// Move the deadline of an order.
    pub fn extend_order(&self, order_id: OrderId, timeout: u64) {
        if let Some(order) = self.ledger().orders.get_mut(&order_id) {
            order.timeout = timeout;
        }
    }

    /// Replace the textual cid of `provider`'s shard entry.
    pub fn set_shard_cid(&self, order_id: OrderId, provider: &str, cid: &str) {
        if let Some(order) = self.ledger().orders.get_mut(&order_id) {
            for shard in order.shards.iter_mut().filter(|s| s.provider == provider) {
                shard.cid = cid.to_string();
            }
        }
    }

    /// Set the current height; the next commit lands at `height + 1`.
    pub fn set_height(&self, height: u64) {
        self.ledger().height = height;
    }

    pub fn advance_height(&self, blocks: u64) {
        self.ledger().height += blocks;
    }

    pub fn height(&self) -> u64 {
        self.ledger().height
    }

    /// Make every call fail with [`ChainError::Unavailable`].
    pub fn set_offline(&self, offline: bool) {
        self.ledger().offline = offline;
    }

    /// Reject the next `n` completion broadcasts.
    pub fn fail_next_completes(&self, n: u32) {
        self.ledger().fail_completes = n;
    }

    /// Number of completion broadcasts attempted.
    pub fn complete_calls(&self) -> u64 {
        self.ledger().complete_calls
    }

    pub fn order(&self, order_id: OrderId) -> Option<Order> {
        self.ledger().orders.get(&order_id).cloned()
    }
}

#[async_trait::async_trait]
impl ChainClient for MemoryChain {
    async fn get_tx(&self, hash: &str, height: u64) -> Result<Option<ChainTx>, ChainError> {
        let ledger = self.ledger();
        ledger.check_online()?;
        Ok(ledger
            .txs
            .get(hash)
            .filter(|tx| tx.height == height)
            .cloned())
    }

    async fn get_order(&self, order_id: OrderId) -> Result<Option<Order>, ChainError> {
        let ledger = self.ledger();
        ledger.check_online()?;
        Ok(ledger.orders.get(&order_id).cloned())
    }

    async fn get_last_height(&self) -> Result<u64, ChainError> {
        let ledger = self.ledger();
        ledger.check_online()?;
        Ok(ledger.height)
    }

    async fn get_node_peer(&self, node: &str) -> Result<Option<String>, ChainError> {
        let ledger = self.ledger();
        ledger.check_online()?;
        Ok(ledger.nodes.get(node).cloned())
    }

    async fn get_fishmen(&self) -> Result<Vec<String>, ChainError> {
        let ledger = self.ledger();
        ledger.check_online()?;
        Ok(ledger.fishmen.clone())
    }

    async fn get_account(&self, address: &str) -> Result<Option<Account>, ChainError> {
        let ledger = self.ledger();
        ledger.check_online()?;
        Ok(ledger.accounts.get(address).cloned())
    }

    async fn complete_order(
        &self,
        provider: &str,
        order_id: OrderId,
        cid: &Cid,
        size: u64,
    ) -> Result<ChainTx, ChainError> {
        let mut ledger = self.ledger();
        ledger.check_online()?;
        ledger.complete_calls += 1;
        if ledger.fail_completes > 0 {
            ledger.fail_completes -= 1;
            return Err(ChainError::Unavailable("broadcast timed out".into()));
        }
        let height = ledger.height;
        let cid_text = cid.to_string();
        let order = ledger
            .orders
            .get_mut(&order_id)
            .ok_or_else(|| ChainError::Rejected(format!("order {order_id} not found")))?;
        if order.timeout > 0 && height > order.timeout {
            return Err(ChainError::Rejected(format!("order {order_id} timed out")));
        }
        let shard = order
            .shards
            .iter_mut()
            .find(|s| {
                s.provider == provider
                    && s.cid == cid_text
                    && matches!(s.status, ShardStatus::Waiting | ShardStatus::Migrating)
            })
            .ok_or_else(|| {
                ChainError::Rejected(format!("{provider} holds no open shard of order {order_id}"))
            })?;
        let from = shard.from.clone();
        shard.status = ShardStatus::Completed;
        shard.size = size;
        if !from.is_empty() {
            // Custody moved: the previous holder's copy leaves the order.
            for old in order.shards.iter_mut().filter(|s| s.provider == from) {
                old.status = ShardStatus::Terminated;
            }
        }
        let data_id = order.data_id.clone();
        debug!(order_id, provider, "ledger: order completed");
        Ok(ledger.commit(
            vec![TxMessage {
                kind: TxType::Complete,
                order_id,
                data_ids: vec![data_id],
            }],
            Vec::new(),
        ))
    }

    async fn migrate_order(
        &self,
        provider: &str,
        data_ids: &[String],
    ) -> Result<ChainTx, ChainError> {
        let mut ledger = self.ledger();
        ledger.check_online()?;
        let nodes: Vec<String> = ledger.nodes.keys().cloned().collect();
        let mut response = MigrateTxResponse::default();
        let mut messages = Vec::new();
        let mut next_shard_id = ledger.next_shard_id;

        for data_id in data_ids {
            let Some(order) = ledger
                .orders
                .values_mut()
                .find(|o| &o.data_id == data_id)
            else {
                response
                    .results
                    .insert(data_id.clone(), "order not found".into());
                continue;
            };
            let Some(held) = order
                .shards
                .iter()
                .find(|s| s.provider == provider && s.status == ShardStatus::Completed)
                .cloned()
            else {
                response
                    .results
                    .insert(data_id.clone(), "no completed shard".into());
                continue;
            };
            let holders: HashSet<&str> = order
                .shards
                .iter()
                .filter(|s| s.status != ShardStatus::Terminated)
                .map(|s| s.provider.as_str())
                .collect();
            let Some(target) = nodes.iter().find(|n| !holders.contains(n.as_str())).cloned()
            else {
                response
                    .results
                    .insert(data_id.clone(), "no candidate provider".into());
                continue;
            };
            next_shard_id += 1;
            order.shards.push(OrderShard {
                id: next_shard_id,
                order_id: order.id,
                cid: held.cid.clone(),
                provider: target.clone(),
                from: provider.to_string(),
                size: held.size,
                status: ShardStatus::Migrating,
            });
            messages.push(TxMessage {
                kind: TxType::Migrate,
                order_id: order.id,
                data_ids: vec![data_id.clone()],
            });
            response
                .results
                .insert(data_id.clone(), format!("SUCCESS: {target}"));
        }
        ledger.next_shard_id = next_shard_id;
        let payload = serde_json::to_vec(&response)
            .map_err(|e| ChainError::Unavailable(e.to_string()))?;
        Ok(ledger.commit(messages, payload))
    }

    async fn list_shards(
        &self,
        provider: &str,
        offset: u64,
        limit: u64,
    ) -> Result<Vec<OrderShard>, ChainError> {
        let ledger = self.ledger();
        ledger.check_online()?;
        Ok(ledger
            .orders
            .values()
            .flat_map(|o| o.shards.iter())
            .filter(|s| s.provider == provider && s.status != ShardStatus::Terminated)
            .skip(offset as usize)
            .take(limit as usize)
            .cloned()
            .collect())
    }

    async fn get_sid_document(&self, version_id: &str) -> Result<Option<SidDocument>, ChainError> {
        let ledger = self.ledger();
        ledger.check_online()?;
        Ok(ledger.sid_documents.get(version_id).cloned())
    }
}
