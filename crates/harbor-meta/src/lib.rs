//! Durable node state on Fjall.
//!
//! [`StateStore`] keeps five keyspaces:
//!
//! - `shards`: encoded [`ShardKey`](harbor_types::ShardKey) → [`ShardInfo`](harbor_types::ShardInfo)
//! - `shard_index`: every shard key ever written (empty values)
//! - `migrates`: encoded [`MigrateKey`](harbor_types::MigrateKey) → [`MigrateInfo`](harbor_types::MigrateInfo)
//! - `migrate_index`: every migrate key ever written
//! - `expire_index`: completed shard key → on-chain shard id (8 bytes BE)
//!
//! Records are the source of truth. The two `*_index` keyspaces are written
//! after their record and can be rebuilt from it.

mod error;
mod store;

pub use error::MetaError;
pub use store::{ExpireEntry, StateStore};
