//! # Canonical Hash Trie
//!
//! One trie accumulates every section: section `n` starts from the root
//! committed for section `n - 1` and adds one leaf per header,
//!
//! ```text
//! be_u64(number) → bincode(ChtNode { hash, td })
//! ```
//!
//! and its root is published under `chtRoot- ‖ u64(n) ‖ section_head`.
//! A header without a recorded total difficulty means the chain store is
//! corrupt. That is fatal: the backend poisons itself and will not commit
//! until the next reset.

use std::sync::Arc;

use num_bigint::BigUint;
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info};

use super::SectionBackend;
use crate::config::CHT_FREQUENCY;
use crate::error::{ChainCorruption, IndexError, IndexResult};
use crate::keys::{cht_leaf_key, CHT_TABLE_PREFIX};
use crate::storage::roots::{batch_cht_root, cht_root};
use crate::storage::{ChainStore, KeyValueStore, SharedStore, StorageError, Table, WriteBatch};
use crate::trie::Trie;
use crate::types::{Hash, Header, ZERO_HASH};

const NAME: &str = "cht";

/// Value of a CHT leaf.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChtNode {
    pub hash: Hash,
    /// Total difficulty up to and including this header.
    pub td: BigUint,
}

impl ChtNode {
    pub fn encode(&self) -> Result<Vec<u8>, StorageError> {
        Ok(bincode::serialize(self)?)
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, StorageError> {
        Ok(bincode::deserialize(bytes)?)
    }
}

/// Builds CHT sections. See the module docs.
pub struct ChtBackend {
    db: SharedStore,
    nodes: Table,
    chain: Arc<dyn ChainStore>,
    section_size: u64,

    section: u64,
    last_hash: Hash,
    trie: Option<Trie<Table>>,
    poisoned: bool,
}

impl ChtBackend {
    pub fn new(db: SharedStore, chain: Arc<dyn ChainStore>, section_size: u64) -> Self {
        Self {
            nodes: Table::new(db.clone(), CHT_TABLE_PREFIX),
            db,
            chain,
            section_size,
            section: 0,
            last_hash: ZERO_HASH,
            trie: None,
            poisoned: false,
        }
    }

    pub fn section_size(&self) -> u64 {
        self.section_size
    }

    /// Table holding the trie nodes, for serving lookups and proofs.
    pub fn node_table(&self) -> &Table {
        &self.nodes
    }
}

impl SectionBackend for ChtBackend {
    fn name(&self) -> &'static str {
        NAME
    }

    fn reset(&mut self, section: u64, last_section_head: &Hash) -> IndexResult<()> {
        self.trie = None;
        self.poisoned = false;
        self.section = section;
        self.last_hash = ZERO_HASH;

        let root = if section > 0 {
            cht_root(self.db.as_ref(), section - 1, last_section_head)?.ok_or(
                IndexError::MissingPriorRoot {
                    index: NAME,
                    section: section - 1,
                    head: *last_section_head,
                },
            )?
        } else {
            ZERO_HASH
        };
        let trie = Trie::new(root, self.nodes.clone())
            .map_err(|source| IndexError::TrieOpen { section, source })?;
        self.trie = Some(trie);
        Ok(())
    }

    fn process(&mut self, header: &Header) -> IndexResult<()> {
        let start = self.section * self.section_size;
        if header.number < start || header.number >= start + self.section_size {
            return Err(IndexError::HeaderOutOfSection {
                number: header.number,
                section: self.section,
            });
        }
        let trie = self.trie.as_mut().ok_or(IndexError::NotReset(NAME))?;

        let hash = header.hash();
        let td = match self.chain.total_difficulty(&hash, header.number)? {
            Some(td) => td,
            None => {
                self.poisoned = true;
                error!(
                    number = header.number,
                    hash = %hex::encode(hash),
                    "total difficulty missing for confirmed header"
                );
                return Err(ChainCorruption::MissingTotalDifficulty {
                    number: header.number,
                    hash,
                }
                .into());
            }
        };

        let value = ChtNode { hash, td }.encode()?;
        trie.update(&cht_leaf_key(header.number), &value)?;
        self.last_hash = hash;
        Ok(())
    }

    fn commit(&mut self) -> IndexResult<()> {
        if self.poisoned {
            return Err(IndexError::Poisoned(NAME));
        }
        let mut trie = self.trie.take().ok_or(IndexError::NotReset(NAME))?;

        let mut nodes = WriteBatch::new();
        let root = trie.commit(&mut nodes)?;
        let mut batch = self.nodes.prefix_batch(nodes);
        batch_cht_root(&mut batch, self.section, &self.last_hash, &root);
        let written = batch.len();
        self.db.write(batch)?;

        if ((self.section + 1) * self.section_size) % CHT_FREQUENCY == 0 {
            info!(
                idx = self.section * self.section_size / CHT_FREQUENCY,
                section_head = %hex::encode(self.last_hash),
                root = %hex::encode(root),
                "Storing CHT"
            );
        }
        debug!(section = self.section, writes = written, "cht section committed");
        Ok(())
    }
}

/// Read the CHT leaf for `number` from the trie at `root`.
pub fn cht_entry(nodes: Table, root: Hash, number: u64) -> IndexResult<Option<ChtNode>> {
    let trie = Trie::new(root, nodes)?;
    match trie.get(&cht_leaf_key(number))? {
        Some(bytes) => Ok(Some(ChtNode::decode(&bytes)?)),
        None => Ok(None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::indexer::test_chain;
    use crate::storage::roots::cht_root;
    use crate::storage::{ChainDb, MemoryStore};
    use crate::types::Bloom;

    fn backend(len: u64, size: u64) -> (ChtBackend, SharedStore, ChainDb, Vec<Header>) {
        let (store, chain, headers) = test_chain::build(len, |_| Bloom::zero());
        let backend = ChtBackend::new(store.clone(), Arc::new(chain.clone()), size);
        (backend, store, chain, headers)
    }

    fn run_section(backend: &mut ChtBackend, section: u64, last: &Hash, headers: &[Header]) {
        backend.reset(section, last).unwrap();
        for header in headers {
            backend.process(header).unwrap();
        }
        backend.commit().unwrap();
    }

    #[test]
    fn node_encoding_round_trips() {
        let node = ChtNode {
            hash: [5; 32],
            td: BigUint::from(123_456_789_u64) << 80,
        };
        assert_eq!(ChtNode::decode(&node.encode().unwrap()).unwrap(), node);
    }

    #[test]
    fn commit_stores_root_under_section_head() {
        let (mut backend, store, chain, headers) = backend(4, 4);
        run_section(&mut backend, 0, &ZERO_HASH, &headers);

        let head = headers[3].hash();
        let root = cht_root(store.as_ref(), 0, &head).unwrap().expect("root stored");
        let entry = cht_entry(backend.node_table().clone(), root, 2).unwrap().unwrap();
        assert_eq!(entry.hash, headers[2].hash());
        assert_eq!(
            Some(entry.td),
            chain.total_difficulty(&headers[2].hash(), 2).unwrap()
        );
    }

    #[test]
    fn sections_accumulate_in_one_trie() {
        let (mut backend, store, _, headers) = backend(8, 4);
        run_section(&mut backend, 0, &ZERO_HASH, &headers[..4]);
        run_section(&mut backend, 1, &headers[3].hash(), &headers[4..]);

        let root = cht_root(store.as_ref(), 1, &headers[7].hash()).unwrap().unwrap();
        for (n, header) in headers.iter().enumerate() {
            let entry = cht_entry(backend.node_table().clone(), root, n as u64).unwrap().unwrap();
            assert_eq!(entry.hash, header.hash());
        }
    }

    #[test]
    fn rebuilding_a_section_is_idempotent() {
        let (mut backend, store, _, headers) = backend(4, 4);
        run_section(&mut backend, 0, &ZERO_HASH, &headers);
        let first = cht_root(store.as_ref(), 0, &headers[3].hash()).unwrap();
        run_section(&mut backend, 0, &ZERO_HASH, &headers);
        let second = cht_root(store.as_ref(), 0, &headers[3].hash()).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn root_does_not_depend_on_header_order() {
        let (mut forward, forward_store, _, headers) = backend(8, 8);
        run_section(&mut forward, 0, &ZERO_HASH, &headers);

        // A second store holding the same chain, fed back to front.
        let (mut reversed, reversed_store, _, same) = backend(8, 8);
        assert_eq!(same, headers);
        let backwards: Vec<Header> = headers.iter().rev().cloned().collect();
        run_section(&mut reversed, 0, &ZERO_HASH, &backwards);

        // The root record is keyed by the last header processed.
        let forward_root = cht_root(forward_store.as_ref(), 0, &headers[7].hash()).unwrap();
        let reversed_root = cht_root(reversed_store.as_ref(), 0, &headers[0].hash()).unwrap();
        assert!(forward_root.is_some());
        assert_eq!(forward_root, reversed_root);
    }

    #[test]
    fn missing_prior_root_is_recoverable() {
        let (mut backend, _, _, headers) = backend(4, 4);
        let err = backend.reset(1, &headers[3].hash()).unwrap_err();
        assert!(matches!(err, IndexError::MissingPriorRoot { section: 0, .. }));
        assert!(!err.is_fatal());
    }

    #[test]
    fn missing_prior_nodes_fail_trie_open() {
        let (mut backend, store, _, headers) = backend(4, 4);
        crate::storage::roots::store_cht_root(store.as_ref(), 0, &headers[3].hash(), &[9; 32])
            .unwrap();
        let err = backend.reset(1, &headers[3].hash()).unwrap_err();
        assert!(matches!(err, IndexError::TrieOpen { section: 1, .. }));
    }

    #[test]
    fn missing_td_is_fatal_and_blocks_commit() {
        let store = MemoryStore::shared();
        let chain = ChainDb::new(store.clone());
        let header = test_chain::genesis();
        chain.insert_canonical(&header, None).unwrap();

        let mut backend = ChtBackend::new(store.clone(), Arc::new(chain), 1);
        backend.reset(0, &ZERO_HASH).unwrap();
        let err = backend.process(&header).unwrap_err();
        assert!(err.is_fatal());
        assert!(matches!(
            err,
            IndexError::Fatal(ChainCorruption::MissingTotalDifficulty { number: 0, .. })
        ));

        let err = backend.commit().unwrap_err();
        assert!(matches!(err, IndexError::Poisoned("cht")));
        assert_eq!(cht_root(store.as_ref(), 0, &header.hash()).unwrap(), None);
    }

    #[test]
    fn process_before_reset_is_rejected() {
        let (mut backend, _, _, headers) = backend(1, 4);
        assert!(matches!(
            backend.process(&headers[0]),
            Err(IndexError::NotReset("cht"))
        ));
        assert!(matches!(backend.commit(), Err(IndexError::NotReset("cht"))));
    }

    #[test]
    fn header_from_another_section_is_rejected() {
        let (mut backend, _, _, headers) = backend(6, 4);
        backend.reset(0, &ZERO_HASH).unwrap();
        assert!(matches!(
            backend.process(&headers[5]),
            Err(IndexError::HeaderOutOfSection { number: 5, section: 0 })
        ));
    }
}
