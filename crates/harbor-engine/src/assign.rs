//! Inbound shard assignments.

use harbor_net::ShardAssignRequest;
use harbor_types::chain::ShardStatus;
use harbor_types::{Cid, ResponseCode, ShardInfo, ShardKey, ShardState, TxType};
use tracing::{debug, info};

use crate::engine::ShardEngine;
use crate::error::Rejection;

impl ShardEngine {
    /// Validate an assignment against the chain and queue every shard of
    /// the order assigned to this node. Returns how many were queued.
    pub(crate) async fn assign(&self, req: ShardAssignRequest) -> Result<usize, Rejection> {
        if req.assignee != self.config.address {
            return Err(Rejection::new(
                ResponseCode::InvalidShardAssignee,
                format!("assignment is for {}", req.assignee),
            ));
        }

        let tx = self
            .chain
            .get_tx(&req.tx_hash, req.height)
            .await
            .map_err(Rejection::internal)?
            .ok_or_else(|| Rejection::new(ResponseCode::InvalidTx, "transaction not found"))?;
        if !tx.is_success() {
            return Err(Rejection::new(
                ResponseCode::InvalidTx,
                format!("transaction failed with code {}", tx.code),
            ));
        }
        if !matches!(req.tx_type, TxType::Store | TxType::Ready) {
            return Err(Rejection::new(
                ResponseCode::InvalidTx,
                format!("{:?} transactions do not assign shards", req.tx_type),
            ));
        }
        if !tx.has_message(req.tx_type, req.order_id) {
            return Err(Rejection::new(
                ResponseCode::InvalidTx,
                format!("transaction has no {:?} message for the order", req.tx_type),
            ));
        }

        let order = self
            .chain
            .get_order(req.order_id)
            .await
            .map_err(Rejection::internal)?
            .ok_or_else(|| Rejection::new(ResponseCode::InvalidRequest, "order not found"))?;
        let assigned: Vec<_> = order
            .shards_for(&self.config.address)
            .filter(|s| s.status != ShardStatus::Terminated)
            .collect();
        if assigned.is_empty() {
            return Err(Rejection::new(
                ResponseCode::InvalidProvider,
                "order lists no shard for this node",
            ));
        }

        let mut queued = 0;
        for entry in assigned {
            let cid: Cid = entry
                .cid
                .parse()
                .map_err(|e| Rejection::new(ResponseCode::InvalidShardCid, format!("{e}")))?;
            if entry.status != ShardStatus::Waiting {
                debug!(order_id = order.id, %cid, status = ?entry.status, "shard not awaiting storage");
                continue;
            }

            let key = ShardKey::new(order.id, cid);
            let shard = match self.state.get_shard(&key).map_err(Rejection::internal)? {
                Some(mut existing) => {
                    if existing.state.is_absorbing() || existing.state == ShardState::Complete {
                        debug!(%key, state = %existing.state, "assignment for finished shard");
                        continue;
                    }
                    if existing.expire_at < order.timeout {
                        existing.expire_at = order.timeout;
                        existing.retries = 0;
                        existing.retry_at = 0;
                        existing.updated_at = harbor_types::now_millis();
                        self.state
                            .put_shard(&existing)
                            .map_err(Rejection::internal)?;
                        info!(%key, expire_at = existing.expire_at, "shard expiry refreshed");
                    }
                    existing
                }
                None => {
                    let mut shard = ShardInfo::new(order.id, cid);
                    shard.data_id = order.data_id.clone();
                    shard.owner = order.owner.clone();
                    shard.gateway = order.gateway.clone();
                    shard.operation = order.operation;
                    shard.shard_operation = order.shard_operation;
                    shard.chain_shard_id = entry.id;
                    shard.size = entry.size;
                    shard.expire_at = order.timeout;
                    self.state.put_shard(&shard).map_err(Rejection::internal)?;
                    shard
                }
            };
            if self.enqueue(shard) {
                queued += 1;
            }
        }
        Ok(queued)
    }
}
