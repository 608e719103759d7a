//! # IndexDb: Persistent Storage Engine
//!
//! The on-disk store for chain data, trie nodes and root records, built on
//! sled's embedded key-value store.
//!
//! ## Tree Layout
//!
//! Everything lives in a single sled tree named `light`. Logical tables are
//! carved out with key prefixes (see [`Table`](super::kv::Table)) rather
//! than separate sled trees, because a trie commit must write nodes and the
//! root record in one atomic batch and sled batches are per tree.
//!
//! ## Thread Safety
//!
//! sled supports lock-free concurrent reads and serialized writes, so an
//! `IndexDb` can be shared across the indexer thread and readers via `Arc`
//! without external synchronization.

use std::path::Path;

use sled::{Batch, Db, Tree};

use super::kv::{BatchOp, KeyValueStore, StorageResult, WriteBatch};

/// Name of the sled tree holding all indexer data.
const TREE_NAME: &str = "light";

/// sled-backed implementation of [`KeyValueStore`].
#[derive(Debug, Clone)]
pub struct IndexDb {
    /// The underlying sled database handle.
    db: Db,
    /// The single tree every key lives in.
    tree: Tree,
}

impl IndexDb {
    /// Open or create a database at the given filesystem path.
    pub fn open<P: AsRef<Path>>(path: P) -> StorageResult<Self> {
        let db = sled::open(path)?;
        Self::from_db(db)
    }

    /// Create a temporary database that is removed when dropped.
    pub fn open_temporary() -> StorageResult<Self> {
        let db = sled::Config::new().temporary(true).open()?;
        Self::from_db(db)
    }

    fn from_db(db: Db) -> StorageResult<Self> {
        let tree = db.open_tree(TREE_NAME)?;
        Ok(Self { db, tree })
    }

    /// Number of keys stored.
    pub fn len(&self) -> usize {
        self.tree.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tree.is_empty()
    }

    /// Block until all pending writes are durable.
    pub fn flush(&self) -> StorageResult<()> {
        self.db.flush()?;
        Ok(())
    }
}

impl KeyValueStore for IndexDb {
    fn get(&self, key: &[u8]) -> StorageResult<Option<Vec<u8>>> {
        Ok(self.tree.get(key)?.map(|v| v.to_vec()))
    }

    fn put(&self, key: &[u8], value: &[u8]) -> StorageResult<()> {
        self.tree.insert(key, value)?;
        Ok(())
    }

    fn delete(&self, key: &[u8]) -> StorageResult<()> {
        self.tree.remove(key)?;
        Ok(())
    }

    fn write(&self, batch: WriteBatch) -> StorageResult<()> {
        let mut sled_batch = Batch::default();
        for op in batch.into_ops() {
            match op {
                BatchOp::Put { key, value } => sled_batch.insert(key, value),
                BatchOp::Delete { key } => sled_batch.remove(key),
            }
        }
        self.tree.apply_batch(sled_batch)?;
        Ok(())
    }
}
