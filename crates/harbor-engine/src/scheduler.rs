//! Scheduler: polls the work queue and runs attempts under the window.

use std::sync::Arc;

use harbor_types::now_millis;
use tokio::time::{MissedTickBehavior, interval};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::engine::ShardEngine;
use crate::process::Outcome;

impl ShardEngine {
    /// Run the scheduler loop until `cancel` fires.
    ///
    /// Each tick drains the items queued at that moment. Items whose
    /// `retry_at` lies ahead go back untouched; the rest are processed on
    /// their own task once a window permit is free.
    pub(crate) async fn run_scheduler(self: Arc<Self>, cancel: CancellationToken) {
        info!(window = self.config.window, "shard scheduler started");
        let mut tick = interval(self.config.poll_interval);
        tick.set_missed_tick_behavior(MissedTickBehavior::Delay);

        'run: loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = tick.tick() => {}
            }

            let queued = self.queue.len();
            if queued == 0 {
                continue;
            }
            debug!(queued, "draining work queue");

            for _ in 0..queued {
                let Some(item) = self.queue.pop_front() else {
                    break;
                };
                if item.retry_at > now_millis() {
                    self.queue.requeue(item);
                    continue;
                }

                let permit = tokio::select! {
                    _ = cancel.cancelled() => {
                        self.queue.requeue(item);
                        break 'run;
                    }
                    permit = self.concurrency.clone().acquire_owned() => match permit {
                        Ok(p) => p,
                        Err(_) => break 'run,
                    },
                };

                let engine = self.clone();
                tokio::spawn(async move {
                    let _permit = permit;
                    let key = item.key();
                    match engine.process(item).await {
                        Outcome::Retry(shard) => engine.queue.requeue(shard),
                        Outcome::Done | Outcome::Terminal => engine.queue.release(&key),
                    }
                });
            }
        }
        info!("shard scheduler stopped");
    }
}
