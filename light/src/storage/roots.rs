//! Root records: the externally consumable output of the indexers.
//!
//! A root record maps `(section, section_head)` to the root hash of the
//! trie covering every section up to and including `section`. Lookups
//! return `None` when no record exists; for a section that has not been
//! built yet that is the expected answer, not an error.

use super::kv::{KeyValueStore, StorageError, StorageResult, WriteBatch};
use crate::checkpoint::TrustedCheckpoint;
use crate::config::v1_section_from_v2;
use crate::keys::{bloom_trie_root_key, cht_root_key};
use crate::types::Hash;

fn read_root(store: &dyn KeyValueStore, key: &[u8]) -> StorageResult<Option<Hash>> {
    match store.get(key)? {
        Some(bytes) => {
            let root: Hash = bytes
                .try_into()
                .map_err(|_| StorageError::corrupted(key, "expected 32-byte root"))?;
            Ok(Some(root))
        }
        None => Ok(None),
    }
}

/// CHT root of `section` (in the numbering it was stored with).
pub fn cht_root(
    store: &dyn KeyValueStore,
    section: u64,
    section_head: &Hash,
) -> StorageResult<Option<Hash>> {
    read_root(store, &cht_root_key(section, section_head))
}

/// CHT root of a current-size section, read through the legacy record
/// that ends on the same block.
pub fn cht_v2_root(
    store: &dyn KeyValueStore,
    v2_section: u64,
    section_head: &Hash,
) -> StorageResult<Option<Hash>> {
    cht_root(store, v1_section_from_v2(v2_section), section_head)
}

pub fn store_cht_root(
    store: &dyn KeyValueStore,
    section: u64,
    section_head: &Hash,
    root: &Hash,
) -> StorageResult<()> {
    store.put(&cht_root_key(section, section_head), root)
}

/// Queue a CHT root record into `batch`.
pub fn batch_cht_root(batch: &mut WriteBatch, section: u64, section_head: &Hash, root: &Hash) {
    batch.put(cht_root_key(section, section_head), root.to_vec());
}

pub fn bloom_trie_root(
    store: &dyn KeyValueStore,
    section: u64,
    section_head: &Hash,
) -> StorageResult<Option<Hash>> {
    read_root(store, &bloom_trie_root_key(section, section_head))
}

pub fn store_bloom_trie_root(
    store: &dyn KeyValueStore,
    section: u64,
    section_head: &Hash,
    root: &Hash,
) -> StorageResult<()> {
    store.put(&bloom_trie_root_key(section, section_head), root)
}

/// Queue a Bloom Trie root record into `batch`.
pub fn batch_bloom_trie_root(
    batch: &mut WriteBatch,
    section: u64,
    section_head: &Hash,
    root: &Hash,
) {
    batch.put(bloom_trie_root_key(section, section_head), root.to_vec());
}

/// Record a checkpoint's roots so client-mode indexing can continue from
/// `checkpoint.section_index + 1` without rebuilding earlier sections.
pub fn install_checkpoint(
    store: &dyn KeyValueStore,
    checkpoint: &TrustedCheckpoint,
) -> StorageResult<()> {
    let mut batch = WriteBatch::new();
    batch_cht_root(
        &mut batch,
        checkpoint.section_index,
        &checkpoint.section_head,
        &checkpoint.cht_root,
    );
    batch_bloom_trie_root(
        &mut batch,
        checkpoint.section_index,
        &checkpoint.section_head,
        &checkpoint.bloom_trie_root,
    );
    store.write(batch)?;
    tracing::info!(
        name = %checkpoint.name,
        section = checkpoint.section_index,
        section_head = %hex::encode(checkpoint.section_head),
        "installed trusted checkpoint"
    );
    Ok(())
}
