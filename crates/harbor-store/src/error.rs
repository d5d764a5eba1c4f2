//! Errors returned by content store backends.

use harbor_types::Cid;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// Bytes on disk no longer hash to the cid they are filed under.
    ///
    /// The content is withheld from the caller.
    #[error("corrupt content: expected {expected}, found {actual}")]
    Corrupt { expected: Cid, actual: Cid },

    /// The background task running a blocking operation was lost.
    #[error("store task failed: {0}")]
    Task(String),
}
