//! File-backed content store.
//!
//! Layout: `{base_dir}/{hex[0..2]}/{hex[2..4]}/{hex}`.

use std::path::{Path, PathBuf};

use bytes::Bytes;
use harbor_types::Cid;
use tracing::{debug, error};

use crate::error::StoreError;
use crate::traits::ContentStore;

/// One file per cid under a 2-level fan-out.
///
/// Writes go to a temporary sibling and are renamed into place, so a crash
/// never leaves a partial file under a cid name.
pub struct FileStore {
    base_dir: PathBuf,
}

impl FileStore {
    /// Open (creating if needed) a store rooted at `base_dir`.
    pub fn new(base_dir: impl AsRef<Path>) -> Result<Self, StoreError> {
        let base_dir = base_dir.as_ref().to_path_buf();
        std::fs::create_dir_all(&base_dir)?;
        Ok(Self { base_dir })
    }

    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    fn content_path(&self, cid: &Cid) -> PathBuf {
        let hex = cid.to_string();
        self.base_dir.join(&hex[0..2]).join(&hex[2..4]).join(&hex)
    }
}

#[async_trait::async_trait]
impl ContentStore for FileStore {
    async fn store(&self, cid: Cid, data: Bytes) -> Result<(), StoreError> {
        let path = self.content_path(&cid);
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let tmp_path = path.with_extension("tmp");
        tokio::fs::write(&tmp_path, &data).await?;
        tokio::fs::rename(&tmp_path, &path).await?;

        debug!(%cid, path = %path.display(), size = data.len(), "stored content to file");
        Ok(())
    }

    async fn get(&self, cid: Cid) -> Result<Option<Bytes>, StoreError> {
        let path = self.content_path(&cid);
        match tokio::fs::read(&path).await {
            Ok(data) => {
                let actual = Cid::from_data(&data);
                if actual != cid {
                    error!(expected = %cid, %actual, "content corruption detected on read");
                    return Err(StoreError::Corrupt {
                        expected: cid,
                        actual,
                    });
                }
                Ok(Some(Bytes::from(data)))
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(StoreError::Io(e)),
        }
    }

    async fn remove(&self, cid: Cid) -> Result<(), StoreError> {
        match tokio::fs::remove_file(self.content_path(&cid)).await {
            Ok(()) => {
                debug!(%cid, "removed content file");
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(StoreError::Io(e)),
        }
    }

    async fn is_exist(&self, cid: Cid) -> Result<bool, StoreError> {
        match tokio::fs::metadata(self.content_path(&cid)).await {
            Ok(meta) => Ok(meta.is_file()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(StoreError::Io(e)),
        }
    }

    async fn list(&self) -> Result<Vec<Cid>, StoreError> {
        let base = self.base_dir.clone();
        tokio::task::spawn_blocking(move || walk_fanout(&base))
            .await
            .map_err(|e| StoreError::Task(e.to_string()))?
    }
}

fn walk_fanout(base: &Path) -> Result<Vec<Cid>, StoreError> {
    let mut cids = Vec::new();
    for d0 in std::fs::read_dir(base)? {
        let d0 = d0?;
        if !d0.file_type()?.is_dir() {
            continue;
        }
        for d1 in std::fs::read_dir(d0.path())? {
            let d1 = d1?;
            if !d1.file_type()?.is_dir() {
                continue;
            }
            for entry in std::fs::read_dir(d1.path())? {
                let entry = entry?;
                if let Some(name) = entry.file_name().to_str()
                    && entry.file_type()?.is_file()
                    && let Ok(cid) = name.parse::<Cid>()
                {
                    cids.push(cid);
                }
            }
        }
    }
    Ok(cids)
}
