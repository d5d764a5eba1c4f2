//! In-memory work queue of shards awaiting processing.

use std::collections::{HashSet, VecDeque};
use std::sync::Mutex;

use harbor_types::{ShardInfo, ShardKey};

#[derive(Default)]
struct Inner {
    items: VecDeque<ShardInfo>,
    /// Keys queued or currently being processed.
    tracked: HashSet<ShardKey>,
}

/// FIFO of shards with at most one queued-or-in-flight entry per key.
///
/// A key is tracked from [`push`](WorkQueue::push) until
/// [`release`](WorkQueue::release); popping does not untrack it, so a shard
/// re-announced while its attempt runs is not queued twice.
#[derive(Default)]
pub struct WorkQueue {
    inner: Mutex<Inner>,
}

impl WorkQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a shard unless its key is already tracked.
    pub fn push(&self, item: ShardInfo) -> bool {
        let mut inner = self.inner.lock().expect("queue lock poisoned");
        if !inner.tracked.insert(item.key()) {
            return false;
        }
        inner.items.push_back(item);
        true
    }

    /// Put back an item that was popped and is still tracked.
    pub fn requeue(&self, item: ShardInfo) {
        let mut inner = self.inner.lock().expect("queue lock poisoned");
        inner.tracked.insert(item.key());
        inner.items.push_back(item);
    }

    /// Stop tracking a key whose processing is finished.
    pub fn release(&self, key: &ShardKey) {
        self.inner
            .lock()
            .expect("queue lock poisoned")
            .tracked
            .remove(key);
    }

    pub fn pop_front(&self) -> Option<ShardInfo> {
        self.inner.lock().expect("queue lock poisoned").items.pop_front()
    }

    /// Number of queued items (in-flight attempts excluded).
    pub fn len(&self) -> usize {
        self.inner.lock().expect("queue lock poisoned").items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Whether `key` is queued or in flight.
    pub fn contains(&self, key: &ShardKey) -> bool {
        self.inner
            .lock()
            .expect("queue lock poisoned")
            .tracked
            .contains(key)
    }
}
