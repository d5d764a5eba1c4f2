//! Expiration sweep: drop shards the chain no longer lists for this node.

use std::collections::HashSet;
use std::sync::Arc;

use harbor_meta::ExpireEntry;
use harbor_types::events::ShardExpired;
use harbor_types::{Cid, ShardKey, ShardState};
use tokio::time::{Instant, MissedTickBehavior, interval_at};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::engine::ShardEngine;
use crate::error::EngineError;

/// What one sweep did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepReport {
    /// Entries in the expiration index when the sweep began.
    pub checked: usize,
    pub expired: usize,
    /// Entries that should have expired but could not be processed.
    pub failed: usize,
}

impl ShardEngine {
    /// Compare the expiration index against the chain's live shard list and
    /// expire every entry the chain dropped.
    ///
    /// Content shared with a shard that stays is kept. A failed chain page
    /// aborts the sweep before anything is removed.
    pub async fn sweep_expired(&self) -> Result<SweepReport, EngineError> {
        let entries = self.state.list_expire()?;
        let mut report = SweepReport {
            checked: entries.len(),
            ..Default::default()
        };
        if entries.is_empty() {
            return Ok(report);
        }

        let mut live_ids = HashSet::new();
        let mut live_keys = HashSet::new();
        let page_size = self.config.list_page_size.max(1);
        let mut offset = 0;
        loop {
            let page = self
                .chain
                .list_shards(&self.config.address, offset, page_size)
                .await?;
            let fetched = page.len() as u64;
            for shard in page {
                live_ids.insert(shard.id);
                if let Ok(cid) = shard.cid.parse::<Cid>() {
                    live_keys.insert(ShardKey::new(shard.order_id, cid));
                }
            }
            if fetched < page_size {
                break;
            }
            offset += fetched;
        }

        let (gone, kept): (Vec<ExpireEntry>, Vec<ExpireEntry>) =
            entries.into_iter().partition(|e| {
                !live_ids.contains(&e.chain_shard_id) && !live_keys.contains(&e.key)
            });
        if gone.is_empty() {
            debug!(checked = report.checked, "expiration sweep found nothing to drop");
            return Ok(report);
        }

        // Content of shards that stay, or are still being worked on.
        let mut referenced: HashSet<Cid> = kept.iter().map(|e| e.key.cid).collect();
        for shard in self.state.list_shards()? {
            if shard.state < ShardState::Complete {
                referenced.insert(shard.cid);
            }
        }

        for entry in gone {
            match self.expire_entry(entry, &referenced).await {
                Ok(()) => report.expired += 1,
                Err(e) => {
                    warn!(key = %entry.key, error = %e, "failed to expire shard");
                    report.failed += 1;
                }
            }
        }
        info!(
            checked = report.checked,
            expired = report.expired,
            failed = report.failed,
            "expiration sweep finished"
        );
        Ok(report)
    }

    async fn expire_entry(
        &self,
        entry: ExpireEntry,
        referenced: &HashSet<Cid>,
    ) -> Result<(), EngineError> {
        let key = entry.key;
        if !referenced.contains(&key.cid) {
            self.content.remove(key.cid).await?;
        }
        if let Some(mut shard) = self.state.get_shard(&key)?
            && shard.advance(ShardState::Expired)
        {
            self.state.put_shard(&shard)?;
        }
        self.state.remove_expire(&key)?;
        debug!(%key, "shard expired");
        self.events.emit(ShardExpired { key });
        Ok(())
    }

    /// Sweep every `expire_interval` until `cancel` fires. The first sweep
    /// runs one period after start.
    pub(crate) async fn run_expiration(self: Arc<Self>, cancel: CancellationToken) {
        let period = self.config.expire_interval;
        info!(?period, "expiration sweep scheduled");
        let mut tick = interval_at(Instant::now() + period, period);
        tick.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = tick.tick() => {}
            }
            if let Err(e) = self.sweep_expired().await {
                error!(error = %e, "expiration sweep failed");
            }
        }
        info!("expiration sweep stopped");
    }
}
