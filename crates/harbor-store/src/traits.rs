use bytes::Bytes;
use harbor_types::Cid;

use crate::error::StoreError;

/// Content-addressed byte storage.
///
/// Callers verify `Cid::from_data(bytes) == cid` before calling
/// [`ContentStore::store`]; backends may re-check on read.
#[async_trait::async_trait]
pub trait ContentStore: Send + Sync {
    /// Persist `data` under `cid`, replacing any previous copy.
    async fn store(&self, cid: Cid, data: Bytes) -> Result<(), StoreError>;

    /// Read the content for `cid`. `None` if absent.
    async fn get(&self, cid: Cid) -> Result<Option<Bytes>, StoreError>;

    /// Remove the content for `cid`. Removing absent content succeeds.
    async fn remove(&self, cid: Cid) -> Result<(), StoreError>;

    /// Whether content for `cid` is present.
    async fn is_exist(&self, cid: Cid) -> Result<bool, StoreError>;

    /// Every cid currently held.
    async fn list(&self) -> Result<Vec<Cid>, StoreError>;
}
