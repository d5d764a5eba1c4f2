//! In-memory content store.

use std::collections::HashMap;
use std::sync::RwLock;

use bytes::Bytes;
use harbor_types::Cid;
use tracing::debug;

use crate::error::StoreError;
use crate::traits::ContentStore;

/// Content store backed by a `RwLock<HashMap>`.
#[derive(Default)]
pub struct MemoryStore {
    content: RwLock<HashMap<Cid, Bytes>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Total bytes held.
    pub fn used_bytes(&self) -> u64 {
        let map = self.content.read().expect("lock poisoned");
        map.values().map(|v| v.len() as u64).sum()
    }

    /// Overwrite the bytes filed under `cid` without any check.
    #[cfg(test)]
    pub(crate) fn put_raw(&self, cid: Cid, data: &'static [u8]) {
        let mut map = self.content.write().expect("lock poisoned");
        map.insert(cid, Bytes::from_static(data));
    }
}

#[async_trait::async_trait]
impl ContentStore for MemoryStore {
    async fn store(&self, cid: Cid, data: Bytes) -> Result<(), StoreError> {
        debug!(%cid, size = data.len(), "storing content in memory");
        let mut map = self.content.write().expect("lock poisoned");
        map.insert(cid, data);
        Ok(())
    }

    async fn get(&self, cid: Cid) -> Result<Option<Bytes>, StoreError> {
        let map = self.content.read().expect("lock poisoned");
        let Some(data) = map.get(&cid) else {
            return Ok(None);
        };
        let actual = Cid::from_data(data);
        if actual != cid {
            return Err(StoreError::Corrupt {
                expected: cid,
                actual,
            });
        }
        Ok(Some(data.clone()))
    }

    async fn remove(&self, cid: Cid) -> Result<(), StoreError> {
        let mut map = self.content.write().expect("lock poisoned");
        if map.remove(&cid).is_some() {
            debug!(%cid, "removed content from memory");
        }
        Ok(())
    }

    async fn is_exist(&self, cid: Cid) -> Result<bool, StoreError> {
        let map = self.content.read().expect("lock poisoned");
        Ok(map.contains_key(&cid))
    }

    async fn list(&self) -> Result<Vec<Cid>, StoreError> {
        let map = self.content.read().expect("lock poisoned");
        Ok(map.keys().copied().collect())
    }
}
