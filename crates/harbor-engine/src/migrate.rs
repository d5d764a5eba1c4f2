//! Shard migration: handing custody of a shard to another provider.
//!
//! Outbound, [`ShardEngine::migrate`] broadcasts the migrate transaction
//! and records one [`MigrateInfo`] per accepted data id; a single consumer
//! loop then pushes the content to each destination. Inbound,
//! [`ShardProvider::handle_shard_migrate`](harbor_net::ShardProvider)
//! validates the hand-off and completes the order on this node's behalf.

use std::collections::BTreeMap;
use std::sync::Arc;

use bytes::Bytes;
use harbor_meta::ExpireEntry;
use harbor_net::{ShardMigrateRequest, ShardMigrateResponse};
use harbor_types::chain::ShardStatus;
use harbor_types::events::{MigrationCompleted, ShardCompleted};
use harbor_types::{
    Cid, MigrateInfo, MigrateKey, MigrateState, MigrateTxResponse, OrderId, ResponseCode,
    ShardInfo, ShardKey, ShardState, TxType,
};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::engine::{MigrateJob, ShardEngine};
use crate::error::{EngineError, Rejection};

impl ShardEngine {
    /// Ask the chain to move this node's shards of `data_ids` elsewhere.
    ///
    /// Returns the chain's per-data-id result. Every accepted data id whose
    /// shard this node holds gets a migration record and is handed to the
    /// migration loop.
    pub async fn migrate(
        &self,
        data_ids: &[String],
    ) -> Result<BTreeMap<String, String>, EngineError> {
        let tx = self
            .chain
            .migrate_order(&self.config.address, data_ids)
            .await?;
        if !tx.is_success() {
            return Err(EngineError::TxFailed {
                hash: tx.hash,
                code: tx.code,
            });
        }
        let response: MigrateTxResponse = serde_json::from_slice(&tx.response)?;
        let held = self.state.list_shards()?;

        for data_id in data_ids {
            if !response.succeeded(data_id) {
                continue;
            }
            let Some(shard) = held
                .iter()
                .find(|s| &s.data_id == data_id && s.state == ShardState::Complete)
            else {
                warn!(%data_id, "migration accepted for data this node does not hold");
                continue;
            };
            let mut info = MigrateInfo {
                data_id: data_id.clone(),
                order_id: shard.order_id,
                from: self.config.address.clone(),
                to: String::new(),
                cid: shard.cid,
                migrate_tx_hash: tx.hash.clone(),
                migrate_tx_height: tx.height,
                complete_tx_hash: String::new(),
                complete_tx_height: 0,
                retries: 0,
                last_error: String::new(),
                state: MigrateState::TxSent,
            };
            self.state.put_migrate(&info)?;
            // The loop resolves the destination itself if this lookup fails.
            match self.migration_target(shard.order_id, shard.cid).await {
                Ok(to) => {
                    info.to = to;
                    self.state.put_migrate(&info)?;
                }
                Err(e) => warn!(%data_id, error = %e, "migration destination not resolved yet"),
            }
            info!(%data_id, to = %info.to, tx = %tx.hash, "migration recorded");
            self.dispatch_migration(info.key());
        }
        Ok(response.results)
    }

    /// The provider the chain moved `cid` of `order_id` to from this node.
    async fn migration_target(&self, order_id: OrderId, cid: Cid) -> Result<String, EngineError> {
        let order = self
            .chain
            .get_order(order_id)
            .await?
            .ok_or(EngineError::OrderNotFound(order_id))?;
        let cid_text = cid.to_string();
        order
            .shards
            .iter()
            .find(|s| {
                s.status == ShardStatus::Migrating
                    && s.from == self.config.address
                    && s.cid == cid_text
            })
            .map(|s| s.provider.clone())
            .ok_or(EngineError::ShardNotInOrder { order_id, cid })
    }

    /// Single consumer of migration jobs; runs until `cancel` fires.
    pub(crate) async fn run_migrations(
        self: Arc<Self>,
        mut rx: mpsc::UnboundedReceiver<MigrateJob>,
        cancel: CancellationToken,
    ) {
        info!("migration loop started");
        loop {
            let job = tokio::select! {
                _ = cancel.cancelled() => break,
                job = rx.recv() => match job {
                    Some(job) => job,
                    None => break,
                },
            };
            self.run_migration(job.key, &cancel).await;
        }
        info!("migration loop stopped");
    }

    async fn run_migration(&self, key: MigrateKey, cancel: &CancellationToken) {
        let mut info = match self.state.get_migrate(&key) {
            Ok(Some(info)) if info.state == MigrateState::TxSent => info,
            Ok(Some(_)) => return,
            Ok(None) => {
                warn!(%key, "migration job without record");
                return;
            }
            Err(e) => {
                error!(%key, error = %e, "failed to read migration record");
                return;
            }
        };

        match self.hand_off(&mut info).await {
            Ok(()) => {
                info.state = MigrateState::Complete;
                info.last_error.clear();
                if let Err(e) = self.state.put_migrate(&info) {
                    error!(%key, error = %e, "failed to persist finished migration");
                    return;
                }
                info!(%key, to = %info.to, tx = %info.complete_tx_hash, "migration complete");
                self.events.emit(MigrationCompleted {
                    key,
                    cid: info.cid,
                    to: info.to,
                });
            }
            Err(e) => {
                info.retries += 1;
                info.last_error = e.to_string();
                if let Err(e) = self.state.put_migrate(&info) {
                    error!(%key, error = %e, "failed to persist migration error");
                }
                if info.retries >= self.config.max_retries {
                    error!(%key, retries = info.retries, error = %info.last_error, "migration abandoned");
                    return;
                }
                let delay = self.config.backoff.delay(info.retries);
                warn!(%key, retries = info.retries, error = %info.last_error, ?delay, "migration attempt failed");

                let tx = self.migrate_tx.clone();
                let cancel = cancel.clone();
                tokio::spawn(async move {
                    tokio::select! {
                        _ = cancel.cancelled() => {}
                        _ = tokio::time::sleep(delay) => {
                            let _ = tx.send(MigrateJob { key });
                        }
                    }
                });
            }
        }
    }

    /// Push the content to the destination and record its completion.
    async fn hand_off(&self, info: &mut MigrateInfo) -> Result<(), EngineError> {
        if info.to.is_empty() {
            info.to = self.migration_target(info.order_id, info.cid).await?;
            self.state.put_migrate(info)?;
        }
        let content = self
            .content
            .get(info.cid)
            .await?
            .ok_or(EngineError::DataMissing(info.cid))?;
        let route = self.route(&info.to).await?;
        let (protocol, peer) = self.protocol(&route);
        let resp = protocol
            .request_shard_migrate(
                peer,
                ShardMigrateRequest {
                    migrate_from: info.from.clone(),
                    order_id: info.order_id,
                    data_id: info.data_id.clone(),
                    tx_hash: info.migrate_tx_hash.clone(),
                    tx_height: info.migrate_tx_height,
                    cid: info.cid,
                    content: content.to_vec(),
                },
            )
            .await?;
        if !resp.code.is_success() {
            return Err(EngineError::Remote {
                code: resp.code,
                message: resp.message,
            });
        }
        info.complete_tx_hash = resp.complete_tx_hash;
        info.complete_tx_height = resp.complete_tx_height;
        Ok(())
    }

    /// Take custody of a shard migrating to this node.
    pub(crate) async fn accept_migration(
        &self,
        req: ShardMigrateRequest,
    ) -> Result<ShardMigrateResponse, Rejection> {
        let tx = self
            .chain
            .get_tx(&req.tx_hash, req.tx_height)
            .await
            .map_err(Rejection::internal)?
            .ok_or_else(|| Rejection::new(ResponseCode::InvalidTx, "migrate transaction not found"))?;
        if !tx.is_success() || !tx.has_message(TxType::Migrate, req.order_id) {
            return Err(Rejection::new(
                ResponseCode::InvalidTx,
                "not a successful migrate transaction for the order",
            ));
        }
        let results: MigrateTxResponse = serde_json::from_slice(&tx.response).map_err(|e| {
            Rejection::new(ResponseCode::InvalidTx, format!("malformed migrate response: {e}"))
        })?;
        if !results.succeeded(&req.data_id) {
            return Err(Rejection::new(
                ResponseCode::InvalidTx,
                format!("migration of {} was not accepted", req.data_id),
            ));
        }

        let order = self
            .chain
            .get_order(req.order_id)
            .await
            .map_err(Rejection::internal)?
            .ok_or_else(|| Rejection::new(ResponseCode::InvalidRequest, "order not found"))?;
        let entry = order
            .shards_for(&self.config.address)
            .find(|s| s.from == req.migrate_from)
            .ok_or_else(|| {
                Rejection::new(
                    ResponseCode::InvalidOrderProvider,
                    format!("order lists no shard moving here from {}", req.migrate_from),
                )
            })?;
        if entry.cid != req.cid.to_string() {
            return Err(Rejection::new(
                ResponseCode::InvalidShardCid,
                "declared cid does not match the order",
            ));
        }
        let actual = Cid::from_data(&req.content);
        if actual != req.cid {
            return Err(Rejection::new(
                ResponseCode::InvalidShardCid,
                format!("content hashes to {actual}"),
            ));
        }

        let key = ShardKey::new(order.id, req.cid);
        if let Some(existing) = self.state.get_shard(&key).map_err(Rejection::internal)?
            && existing.state == ShardState::Complete
        {
            return Ok(ShardMigrateResponse {
                code: ResponseCode::Success,
                message: String::new(),
                complete_tx_hash: existing.complete_hash,
                complete_tx_height: existing.complete_height,
            });
        }

        let size = req.content.len() as u64;
        self.content
            .store(req.cid, Bytes::from(req.content))
            .await
            .map_err(Rejection::internal)?;
        let done = self
            .chain
            .complete_order(&self.config.address, order.id, &req.cid, size)
            .await
            .map_err(Rejection::internal)?;
        if !done.is_success() {
            return Err(Rejection::new(
                ResponseCode::InternalErr,
                format!("completion failed with code {}", done.code),
            ));
        }

        let mut shard = ShardInfo::new(order.id, req.cid);
        shard.data_id = order.data_id.clone();
        shard.owner = order.owner.clone();
        shard.gateway = order.gateway.clone();
        shard.operation = order.operation;
        shard.shard_operation = order.shard_operation;
        shard.chain_shard_id = entry.id;
        shard.complete_hash = done.hash.clone();
        shard.complete_height = done.height;
        shard.size = size;
        shard.expire_at = order.timeout;
        shard.advance(ShardState::Complete);
        self.state.put_shard(&shard).map_err(Rejection::internal)?;
        self.state
            .put_expire(ExpireEntry {
                key,
                chain_shard_id: entry.id,
            })
            .map_err(Rejection::internal)?;

        info!(%key, from = %req.migrate_from, tx = %done.hash, "migrated shard accepted");
        self.events.emit(ShardCompleted {
            key,
            tx_hash: done.hash.clone(),
            height: done.height,
        });
        Ok(ShardMigrateResponse {
            code: ResponseCode::Success,
            message: String::new(),
            complete_tx_hash: done.hash,
            complete_tx_height: done.height,
        })
    }
}
