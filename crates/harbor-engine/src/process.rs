//! One processing attempt for one shard.

use bytes::Bytes;
use harbor_meta::ExpireEntry;
use harbor_net::{ShardCompleteRequest, ShardStoreRequest};
use harbor_types::events::{ShardCompleted, ShardStored, ShardTerminated};
use harbor_types::{Cid, ShardInfo, ShardState, now_millis};
use tracing::{debug, error, info, warn};

use crate::engine::ShardEngine;
use crate::error::EngineError;

/// Result of [`ShardEngine::process`].
#[derive(Debug)]
pub(crate) enum Outcome {
    /// Nothing left to do for now.
    Done,
    /// The attempt failed; the shard goes back on the queue.
    Retry(ShardInfo),
    /// The shard reached an absorbing state.
    Terminal,
}

impl ShardEngine {
    /// Run one attempt for `item`, persisting every transition.
    ///
    /// The persisted record wins over the queued copy, so a shard that
    /// advanced while queued is not redone.
    #[tracing::instrument(skip(self, item), fields(order_id = item.order_id, cid = %item.cid))]
    pub(crate) async fn process(&self, item: ShardInfo) -> Outcome {
        let key = item.key();
        let mut shard = match self.state.get_shard(&key) {
            Ok(Some(stored)) => stored,
            Ok(None) => item,
            Err(e) => {
                error!(error = %e, "failed to read shard record");
                return Outcome::Retry(item);
            }
        };

        match shard.state {
            ShardState::Terminate | ShardState::Expired => return Outcome::Terminal,
            ShardState::Complete => {
                self.notify_complete(&shard).await;
                return Outcome::Done;
            }
            _ => {}
        }

        if shard.retries >= self.config.max_retries {
            let reason = format!("retries exhausted: {}", shard.last_error);
            self.terminate(&mut shard, reason);
            return Outcome::Terminal;
        }

        shard.retries += 1;
        shard.retry_at = self.config.backoff.retry_at(now_millis(), shard.retries);
        if let Err(e) = self.state.put_shard(&shard) {
            error!(error = %e, "failed to persist attempt");
            return Outcome::Retry(shard);
        }

        if shard.expire_at > 0 {
            match self.chain.get_last_height().await {
                Ok(height) if height > shard.expire_at => {
                    let reason = format!("expired: height {height} past {}", shard.expire_at);
                    self.terminate(&mut shard, reason);
                    return Outcome::Terminal;
                }
                Ok(_) => {}
                Err(e) => return self.retry(shard, e.into()),
            }
        }

        match self.advance(&mut shard).await {
            Ok(()) => {
                self.notify_complete(&shard).await;
                Outcome::Done
            }
            Err(e) => self.retry(shard, e),
        }
    }

    /// Walk the remaining pipeline steps.
    async fn advance(&self, shard: &mut ShardInfo) -> Result<(), EngineError> {
        if shard.state < ShardState::Stored {
            if shard.is_renew() {
                if !self.content.is_exist(shard.cid).await? {
                    return Err(EngineError::DataMissing(shard.cid));
                }
            } else {
                // Only the fetch needs the gateway reachable.
                let route = self.route(&shard.gateway).await?;
                let (protocol, peer) = self.protocol(&route);
                let resp = protocol
                    .request_shard_store(
                        peer,
                        ShardStoreRequest {
                            owner: shard.owner.clone(),
                            data_id: shard.data_id.clone(),
                            order_id: shard.order_id,
                            cid: shard.cid,
                            provider: self.config.address.clone(),
                        },
                    )
                    .await?;
                if !resp.code.is_success() {
                    return Err(EngineError::Remote {
                        code: resp.code,
                        message: resp.message,
                    });
                }
                let actual = Cid::from_data(&resp.content);
                if actual != shard.cid {
                    return Err(EngineError::InvalidCid {
                        expected: shard.cid,
                        actual,
                    });
                }
                shard.size = resp.content.len() as u64;
                self.content
                    .store(shard.cid, Bytes::from(resp.content))
                    .await?;
            }
            shard.advance(ShardState::Stored);
            self.state.put_shard(shard)?;
            debug!(size = shard.size, "shard stored");
            self.events.emit(ShardStored {
                key: shard.key(),
                size: shard.size,
            });
        }

        if shard.state < ShardState::TxSent {
            let tx = self
                .chain
                .complete_order(&self.config.address, shard.order_id, &shard.cid, shard.size)
                .await?;
            if !tx.is_success() {
                return Err(EngineError::TxFailed {
                    hash: tx.hash,
                    code: tx.code,
                });
            }
            shard.complete_hash = tx.hash;
            shard.complete_height = tx.height;
            shard.advance(ShardState::TxSent);
            self.state.put_shard(shard)?;
            debug!(tx = %shard.complete_hash, height = shard.complete_height, "completion broadcast");
        }

        if shard.state < ShardState::Complete {
            let order = self
                .chain
                .get_order(shard.order_id)
                .await?
                .ok_or(EngineError::OrderNotFound(shard.order_id))?;
            let cid = shard.cid.to_string();
            let held = order
                .shards_for(&self.config.address)
                .find(|s| s.cid == cid)
                .ok_or(EngineError::ShardNotInOrder {
                    order_id: shard.order_id,
                    cid: shard.cid,
                })?;
            shard.chain_shard_id = held.id;
            self.state.put_expire(ExpireEntry {
                key: shard.key(),
                chain_shard_id: held.id,
            })?;
            shard.advance(ShardState::Complete);
            shard.last_error.clear();
            self.state.put_shard(shard)?;
            info!(tx = %shard.complete_hash, "shard complete");
            self.events.emit(ShardCompleted {
                key: shard.key(),
                tx_hash: shard.complete_hash.clone(),
                height: shard.complete_height,
            });
        }

        Ok(())
    }

    /// Record a failed attempt and hand the shard back for a retry.
    fn retry(&self, mut shard: ShardInfo, err: EngineError) -> Outcome {
        warn!(retries = shard.retries, error = %err, "shard attempt failed");
        shard.last_error = err.to_string();
        shard.updated_at = now_millis();
        if let Err(e) = self.state.put_shard(&shard) {
            error!(error = %e, "failed to persist shard error");
        }
        Outcome::Retry(shard)
    }

    fn terminate(&self, shard: &mut ShardInfo, reason: String) {
        warn!(%reason, retries = shard.retries, "shard terminated");
        shard.last_error = reason;
        shard.advance(ShardState::Terminate);
        if let Err(e) = self.state.put_shard(shard) {
            error!(error = %e, "failed to persist termination");
        }
        self.events.emit(ShardTerminated {
            key: shard.key(),
            reason: shard.last_error.clone(),
        });
    }

    /// Tell the gateway the shard is complete. Failures are only logged:
    /// the chain already has the completion.
    async fn notify_complete(&self, shard: &ShardInfo) {
        let req = ShardCompleteRequest {
            order_id: shard.order_id,
            data_id: shard.data_id.clone(),
            cids: vec![shard.cid],
            tx_hash: shard.complete_hash.clone(),
            height: shard.complete_height,
            provider: self.config.address.clone(),
        };
        let result = async {
            let route = self.route(&shard.gateway).await?;
            let (protocol, peer) = self.protocol(&route);
            Ok::<_, EngineError>(protocol.request_shard_complete(peer, req).await?)
        }
        .await;
        match result {
            Ok(resp) if resp.code.is_success() => debug!("gateway notified of completion"),
            Ok(resp) => warn!(
                code = %resp.code,
                message = %resp.message,
                recoverable = resp.recoverable,
                "gateway refused completion notice"
            ),
            Err(e) => warn!(error = %e, "failed to notify gateway of completion"),
        }
    }
}
