//! # Key-Value Store Abstraction
//!
//! Everything the indexers persist goes through [`KeyValueStore`]: trie
//! nodes, root records, driver progress and the chain data they read.
//! Two implementations exist: [`MemoryStore`] for tests and ephemeral use,
//! and the sled-backed [`IndexDb`](super::db::IndexDb).
//!
//! A [`Table`] is a prefixed view over another store, so several logical
//! tables share one physical keyspace without colliding.
//!
//! ## Atomicity
//!
//! [`WriteBatch`] collects puts and deletes that land together or not at
//! all. A table can prefix a batch ([`Table::prefix_batch`]) so trie nodes
//! and the root record that references them commit in one write.

use std::collections::BTreeMap;
use std::sync::Arc;

use parking_lot::RwLock;
use thiserror::Error;

// ---------------------------------------------------------------------------
// Error Type
// ---------------------------------------------------------------------------

/// Errors that can occur during store operations.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("sled error: {0}")]
    Sled(#[from] sled::Error),

    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("corrupted entry under key {key}: {reason}")]
    Corrupted { key: String, reason: String },
}

impl StorageError {
    pub(crate) fn corrupted(key: &[u8], reason: impl Into<String>) -> Self {
        StorageError::Corrupted {
            key: hex::encode(key),
            reason: reason.into(),
        }
    }
}

impl From<bincode::Error> for StorageError {
    fn from(e: bincode::Error) -> Self {
        StorageError::Serialization(e.to_string())
    }
}

pub type StorageResult<T> = Result<T, StorageError>;

// ---------------------------------------------------------------------------
// WriteBatch
// ---------------------------------------------------------------------------

/// A single buffered mutation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BatchOp {
    Put { key: Vec<u8>, value: Vec<u8> },
    Delete { key: Vec<u8> },
}

/// An ordered set of mutations applied atomically by
/// [`KeyValueStore::write`]. Later operations on the same key win.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WriteBatch {
    ops: Vec<BatchOp>,
}

impl WriteBatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn put(&mut self, key: impl Into<Vec<u8>>, value: impl Into<Vec<u8>>) {
        self.ops.push(BatchOp::Put {
            key: key.into(),
            value: value.into(),
        });
    }

    pub fn delete(&mut self, key: impl Into<Vec<u8>>) {
        self.ops.push(BatchOp::Delete { key: key.into() });
    }

    /// Append every operation of `other` after the ones already buffered.
    pub fn extend(&mut self, other: WriteBatch) {
        self.ops.extend(other.ops);
    }

    pub fn len(&self) -> usize {
        self.ops.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    pub fn ops(&self) -> &[BatchOp] {
        &self.ops
    }

    pub fn into_ops(self) -> Vec<BatchOp> {
        self.ops
    }
}

// ---------------------------------------------------------------------------
// KeyValueStore
// ---------------------------------------------------------------------------

/// Minimal byte-oriented store. Implementations must allow concurrent
/// readers while a writer applies a batch.
pub trait KeyValueStore: Send + Sync {
    fn get(&self, key: &[u8]) -> StorageResult<Option<Vec<u8>>>;

    fn put(&self, key: &[u8], value: &[u8]) -> StorageResult<()>;

    fn delete(&self, key: &[u8]) -> StorageResult<()>;

    /// Apply every operation in `batch` atomically.
    fn write(&self, batch: WriteBatch) -> StorageResult<()>;

    fn contains(&self, key: &[u8]) -> StorageResult<bool> {
        Ok(self.get(key)?.is_some())
    }
}

/// Shared handle to a store, as held by every indexer component.
pub type SharedStore = Arc<dyn KeyValueStore>;

impl<T: KeyValueStore + ?Sized> KeyValueStore for Arc<T> {
    fn get(&self, key: &[u8]) -> StorageResult<Option<Vec<u8>>> {
        (**self).get(key)
    }

    fn put(&self, key: &[u8], value: &[u8]) -> StorageResult<()> {
        (**self).put(key, value)
    }

    fn delete(&self, key: &[u8]) -> StorageResult<()> {
        (**self).delete(key)
    }

    fn write(&self, batch: WriteBatch) -> StorageResult<()> {
        (**self).write(batch)
    }
}

// ---------------------------------------------------------------------------
// MemoryStore
// ---------------------------------------------------------------------------

/// In-memory store backed by an ordered map.
#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: RwLock<BTreeMap<Vec<u8>, Vec<u8>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Convenience constructor returning the store already shared.
    pub fn shared() -> SharedStore {
        Arc::new(Self::new())
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }

    /// Every key that starts with `prefix`, in order.
    pub fn keys_with_prefix(&self, prefix: &[u8]) -> Vec<Vec<u8>> {
        self.entries
            .read()
            .range(prefix.to_vec()..)
            .take_while(|(k, _)| k.starts_with(prefix))
            .map(|(k, _)| k.clone())
            .collect()
    }
}

impl KeyValueStore for MemoryStore {
    fn get(&self, key: &[u8]) -> StorageResult<Option<Vec<u8>>> {
        Ok(self.entries.read().get(key).cloned())
    }

    fn put(&self, key: &[u8], value: &[u8]) -> StorageResult<()> {
        self.entries.write().insert(key.to_vec(), value.to_vec());
        Ok(())
    }

    fn delete(&self, key: &[u8]) -> StorageResult<()> {
        self.entries.write().remove(key);
        Ok(())
    }

    fn write(&self, batch: WriteBatch) -> StorageResult<()> {
        let mut entries = self.entries.write();
        for op in batch.into_ops() {
            match op {
                BatchOp::Put { key, value } => {
                    entries.insert(key, value);
                }
                BatchOp::Delete { key } => {
                    entries.remove(&key);
                }
            }
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Table
// ---------------------------------------------------------------------------

/// A prefixed view over another store.
#[derive(Clone)]
pub struct Table {
    store: SharedStore,
    prefix: Vec<u8>,
}

impl Table {
    pub fn new(store: SharedStore, prefix: &[u8]) -> Self {
        Self {
            store,
            prefix: prefix.to_vec(),
        }
    }

    pub fn prefix(&self) -> &[u8] {
        &self.prefix
    }

    /// The store this table is a view of.
    pub fn inner(&self) -> &SharedStore {
        &self.store
    }

    fn full_key(&self, key: &[u8]) -> Vec<u8> {
        let mut full = Vec::with_capacity(self.prefix.len() + key.len());
        full.extend_from_slice(&self.prefix);
        full.extend_from_slice(key);
        full
    }

    /// Rewrite a batch of table-relative keys into keys of the inner store.
    pub fn prefix_batch(&self, batch: WriteBatch) -> WriteBatch {
        let mut out = WriteBatch::new();
        for op in batch.into_ops() {
            match op {
                BatchOp::Put { key, value } => out.put(self.full_key(&key), value),
                BatchOp::Delete { key } => out.delete(self.full_key(&key)),
            }
        }
        out
    }
}

impl KeyValueStore for Table {
    fn get(&self, key: &[u8]) -> StorageResult<Option<Vec<u8>>> {
        self.store.get(&self.full_key(key))
    }

    fn put(&self, key: &[u8], value: &[u8]) -> StorageResult<()> {
        self.store.put(&self.full_key(key), value)
    }

    fn delete(&self, key: &[u8]) -> StorageResult<()> {
        self.store.delete(&self.full_key(key))
    }

    fn write(&self, batch: WriteBatch) -> StorageResult<()> {
        self.store.write(self.prefix_batch(batch))
    }
}

impl std::fmt::Debug for Table {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Table")
            .field("prefix", &String::from_utf8_lossy(&self.prefix))
            .finish()
    }
}
