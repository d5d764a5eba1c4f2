//! Content storage for shard bytes.
//!
//! [`ContentStore`] is keyed by content address. Two backends:
//!
//! - [`MemoryStore`]: a `RwLock<HashMap>`, for tests and memory-only nodes.
//! - [`FileStore`]: one file per cid under a 2-level fan-out directory.

mod error;
mod file_store;
mod memory_store;
mod traits;

pub use error::StoreError;
pub use file_store::FileStore;
pub use memory_store::MemoryStore;
pub use traits::ContentStore;
