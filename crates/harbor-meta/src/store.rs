//! [`StateStore`] implementation over Fjall keyspaces.

use std::path::Path;

use fjall::{Database, Keyspace, KeyspaceCreateOptions};
use harbor_types::{MigrateInfo, MigrateKey, ShardInfo, ShardKey};
use tempfile::TempDir;
use tracing::{debug, info, warn};

use crate::MetaError;

type Result<T> = std::result::Result<T, MetaError>;

const EMPTY: &[u8] = &[];

/// A completed shard registered for expiration checks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExpireEntry {
    pub key: ShardKey,
    /// Shard id the chain assigned when this node completed the shard.
    pub chain_shard_id: u64,
}

/// Shard, migration and expiration state for one node.
pub struct StateStore {
    #[allow(dead_code)]
    db: Database,
    shards: Keyspace,
    shard_index: Keyspace,
    migrates: Keyspace,
    migrate_index: Keyspace,
    expire_index: Keyspace,
    /// Held for temporary stores so the directory outlives the database.
    _tmp: Option<TempDir>,
}

impl StateStore {
    /// Open a persistent store at `path`.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let db = Database::builder(path).open()?;
        Self::init_keyspaces(db, None)
    }

    /// Open a store that is deleted on drop. Used by tests.
    pub fn open_temporary() -> Result<Self> {
        let tmp = tempfile::tempdir()?;
        let db = Database::builder(tmp.path()).temporary(true).open()?;
        Self::init_keyspaces(db, Some(tmp))
    }

    fn init_keyspaces(db: Database, tmp: Option<TempDir>) -> Result<Self> {
        let shards = db.keyspace("shards", KeyspaceCreateOptions::default)?;
        let shard_index = db.keyspace("shard_index", KeyspaceCreateOptions::default)?;
        let migrates = db.keyspace("migrates", KeyspaceCreateOptions::default)?;
        let migrate_index = db.keyspace("migrate_index", KeyspaceCreateOptions::default)?;
        let expire_index = db.keyspace("expire_index", KeyspaceCreateOptions::default)?;
        Ok(Self {
            db,
            shards,
            shard_index,
            migrates,
            migrate_index,
            expire_index,
            _tmp: tmp,
        })
    }

    // ----- Shards -----

    /// Write a shard record, then its index entry.
    pub fn put_shard(&self, shard: &ShardInfo) -> Result<()> {
        let key = shard.key().encode();
        let value = postcard::to_allocvec(shard)?;
        self.shards.insert(key.as_slice(), value.as_slice())?;
        self.shard_index.insert(key.as_slice(), EMPTY)?;
        debug!(key = %shard.key(), state = %shard.state, "stored shard");
        Ok(())
    }

    pub fn get_shard(&self, key: &ShardKey) -> Result<Option<ShardInfo>> {
        match self.shards.get(key.encode().as_slice())? {
            Some(bytes) => Ok(Some(postcard::from_bytes(&bytes)?)),
            None => Ok(None),
        }
    }

    /// Every shard named by the index, in key order.
    ///
    /// Index entries whose record is gone are skipped.
    pub fn list_shards(&self) -> Result<Vec<ShardInfo>> {
        let mut out = Vec::new();
        for guard in self.shard_index.iter() {
            let k = guard.key()?;
            let key = ShardKey::decode(&k).ok_or(MetaError::Corrupt {
                keyspace: "shard_index",
            })?;
            match self.get_shard(&key)? {
                Some(shard) => out.push(shard),
                None => warn!(%key, "shard index entry without record"),
            }
        }
        Ok(out)
    }

    /// Shards of one order.
    pub fn shards_of_order(&self, order_id: u64) -> Result<Vec<ShardInfo>> {
        let mut out = Vec::new();
        for guard in self.shards.prefix(order_id.to_be_bytes()) {
            let v = guard.value()?;
            out.push(postcard::from_bytes(&v)?);
        }
        Ok(out)
    }

    // ----- Migrations -----

    /// Write a migration record, then its index entry.
    pub fn put_migrate(&self, migrate: &MigrateInfo) -> Result<()> {
        let key = migrate.key().encode();
        let value = postcard::to_allocvec(migrate)?;
        self.migrates.insert(key.as_slice(), value.as_slice())?;
        self.migrate_index.insert(key.as_slice(), EMPTY)?;
        debug!(key = %migrate.key(), state = %migrate.state, "stored migration");
        Ok(())
    }

    pub fn get_migrate(&self, key: &MigrateKey) -> Result<Option<MigrateInfo>> {
        match self.migrates.get(key.encode().as_slice())? {
            Some(bytes) => Ok(Some(postcard::from_bytes(&bytes)?)),
            None => Ok(None),
        }
    }

    /// Every migration named by the index.
    pub fn list_migrates(&self) -> Result<Vec<MigrateInfo>> {
        let mut out = Vec::new();
        for guard in self.migrate_index.iter() {
            let k = guard.key()?;
            let key = MigrateKey::decode(&k).ok_or(MetaError::Corrupt {
                keyspace: "migrate_index",
            })?;
            match self.get_migrate(&key)? {
                Some(migrate) => out.push(migrate),
                None => warn!(%key, "migrate index entry without record"),
            }
        }
        Ok(out)
    }

    // ----- Expiration index -----

    pub fn put_expire(&self, entry: ExpireEntry) -> Result<()> {
        self.expire_index.insert(
            entry.key.encode().as_slice(),
            entry.chain_shard_id.to_be_bytes().as_slice(),
        )?;
        debug!(key = %entry.key, chain_shard_id = entry.chain_shard_id, "registered for expiration");
        Ok(())
    }

    pub fn remove_expire(&self, key: &ShardKey) -> Result<()> {
        self.expire_index.remove(key.encode().as_slice())?;
        Ok(())
    }

    pub fn list_expire(&self) -> Result<Vec<ExpireEntry>> {
        let mut out = Vec::new();
        for guard in self.expire_index.iter() {
            let (k, v) = guard.into_inner()?;
            let key = ShardKey::decode(&k).ok_or(MetaError::Corrupt {
                keyspace: "expire_index",
            })?;
            let id: [u8; 8] = v.as_ref().try_into().map_err(|_| MetaError::Corrupt {
                keyspace: "expire_index",
            })?;
            out.push(ExpireEntry {
                key,
                chain_shard_id: u64::from_be_bytes(id),
            });
        }
        Ok(out)
    }

    // ----- Maintenance -----

    /// Re-derive both indices from the record keyspaces.
    ///
    /// Returns `(shards, migrations)` indexed.
    pub fn rebuild_indices(&self) -> Result<(usize, usize)> {
        let shards = rebuild(&self.shards, &self.shard_index)?;
        let migrates = rebuild(&self.migrates, &self.migrate_index)?;
        info!(shards, migrates, "rebuilt state indices");
        Ok((shards, migrates))
    }
}

fn rebuild(records: &Keyspace, index: &Keyspace) -> Result<usize> {
    let mut stale = Vec::new();
    for guard in index.iter() {
        stale.push(guard.key()?);
    }
    for key in stale {
        index.remove(key)?;
    }
    let mut count = 0;
    for guard in records.iter() {
        let k = guard.key()?;
        index.insert(k, EMPTY)?;
        count += 1;
    }
    Ok(count)
}
