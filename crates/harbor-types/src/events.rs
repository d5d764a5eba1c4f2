//! Typed pub/sub for shard lifecycle notifications.
//!
//! The engine emits one event per durable transition worth observing
//! (content stored, shard completed, terminated, expired, migration
//! handed off). Subscribers pick the event types they care about; each type
//! gets its own lazily created `broadcast` channel keyed by [`TypeId`].
//! Emitting with no subscriber is a no-op.

use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use tokio::sync::broadcast;
use tracing::warn;

use crate::{Cid, MigrateKey, ShardKey};

/// Marker trait for event payloads.
pub trait Event: Any + Send + Sync + Clone + std::fmt::Debug + 'static {}

/// Verified content for a shard was written to the content store.
#[derive(Clone, Debug)]
pub struct ShardStored {
    pub key: ShardKey,
    pub size: u64,
}
impl Event for ShardStored {}

/// A shard reached `Complete`.
#[derive(Clone, Debug)]
pub struct ShardCompleted {
    pub key: ShardKey,
    pub tx_hash: String,
    pub height: u64,
}
impl Event for ShardCompleted {}

/// A shard was terminated; `reason` is the retained error.
#[derive(Clone, Debug)]
pub struct ShardTerminated {
    pub key: ShardKey,
    pub reason: String,
}
impl Event for ShardTerminated {}

/// A shard the chain no longer lists was removed by the sweep.
#[derive(Clone, Debug)]
pub struct ShardExpired {
    pub key: ShardKey,
}
impl Event for ShardExpired {}

/// The destination accepted a migrated shard.
#[derive(Clone, Debug)]
pub struct MigrationCompleted {
    pub key: MigrateKey,
    pub cid: Cid,
    pub to: String,
}
impl Event for MigrationCompleted {}

const CHANNEL_CAPACITY: usize = 256;

/// Cloneable handle to a shared set of typed channels.
#[derive(Clone)]
pub struct EventBus {
    channels: Arc<Mutex<HashMap<TypeId, Box<dyn Any + Send + Sync>>>>,
}

impl EventBus {
    /// Create an empty bus.
    pub fn new() -> Self {
        Self {
            channels: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Deliver `event` to current subscribers of `E`.
    pub fn emit<E: Event>(&self, event: E) {
        let channels = self.channels.lock().expect("event bus lock poisoned");
        if let Some(sender) = channels
            .get(&TypeId::of::<E>())
            .and_then(|b| b.downcast_ref::<broadcast::Sender<E>>())
        {
            // Err only means every receiver has been dropped.
            let _ = sender.send(event);
        }
    }

    /// Subscribe to events of type `E`.
    pub fn subscribe<E: Event>(&self) -> EventReceiver<E> {
        let mut channels = self.channels.lock().expect("event bus lock poisoned");
        let entry = channels.entry(TypeId::of::<E>()).or_insert_with(|| {
            let (tx, _) = broadcast::channel::<E>(CHANNEL_CAPACITY);
            Box::new(tx)
        });
        let sender = entry
            .downcast_ref::<broadcast::Sender<E>>()
            .expect("channel registered under a foreign TypeId");
        EventReceiver {
            rx: sender.subscribe(),
        }
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for EventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let channels = self.channels.lock().expect("event bus lock poisoned");
        f.debug_struct("EventBus")
            .field("channels", &channels.len())
            .finish()
    }
}

/// Receiver for one event type.
pub struct EventReceiver<E: Event> {
    rx: broadcast::Receiver<E>,
}

impl<E: Event> EventReceiver<E> {
    /// Wait for the next event; `None` once the bus is gone.
    pub async fn recv(&mut self) -> Option<E> {
        loop {
            match self.rx.recv().await {
                Ok(event) => return Some(event),
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!(
                        skipped,
                        event_type = std::any::type_name::<E>(),
                        "event receiver lagged"
                    );
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }
}
