//! # Bloom Trie
//!
//! A Bloom Trie section spans `ratio` consecutive bloom-bits sections (its
//! parents). On commit, for each of the 2048 bloom bits, the parents'
//! bit-planes are decompressed, concatenated in section order and
//! recompressed into one leaf:
//!
//! ```text
//! u16(bit) ‖ u64(section) → compress(plane[section*ratio] ‖ … ‖ plane[section*ratio + ratio-1])
//! ```
//!
//! A plane that is zero across the whole section compresses to nothing and
//! its key is deleted rather than stored. Planes are assembled in parallel;
//! the trie itself is updated serially in bit order.

use std::sync::Arc;

use rayon::prelude::*;
use tracing::info;

use super::SectionBackend;
use crate::bitutil::{compress_bytes, decompress_bytes};
use crate::config::{BLOOM_BIT_LENGTH, BLOOM_TRIE_FREQUENCY};
use crate::error::{IndexError, IndexResult};
use crate::keys::{bloom_bit_key, BLOOM_TRIE_TABLE_PREFIX};
use crate::storage::roots::{batch_bloom_trie_root, bloom_trie_root};
use crate::storage::{ChainStore, KeyValueStore, SharedStore, Table, WriteBatch};
use crate::trie::Trie;
use crate::types::{Hash, Header, ZERO_HASH};

const NAME: &str = "bloomtrie";

/// Cumulative byte counts over every committed section.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CompressionStats {
    pub compressed: u64,
    pub decompressed: u64,
}

impl CompressionStats {
    /// Compressed size as a fraction of the raw size.
    pub fn ratio(&self) -> f64 {
        if self.decompressed == 0 {
            return 0.0;
        }
        self.compressed as f64 / self.decompressed as f64
    }
}

pub struct BloomTrieBackend {
    db: SharedStore,
    nodes: Table,
    chain: Arc<dyn ChainStore>,
    parent_size: u64,
    size: u64,
    ratio: u64,

    section: u64,
    heads: Vec<Hash>,
    trie: Option<Trie<Table>>,
    stats: CompressionStats,
}

impl BloomTrieBackend {
    /// A backend aggregating parent sections of `parent_size` headers into
    /// Bloom Trie sections of [`BLOOM_TRIE_FREQUENCY`] headers.
    pub fn new(db: SharedStore, chain: Arc<dyn ChainStore>, parent_size: u64) -> IndexResult<Self> {
        Self::with_section_size(db, chain, parent_size, BLOOM_TRIE_FREQUENCY)
    }

    /// As [`new`](Self::new), with an explicit section size.
    pub fn with_section_size(
        db: SharedStore,
        chain: Arc<dyn ChainStore>,
        parent_size: u64,
        size: u64,
    ) -> IndexResult<Self> {
        if parent_size == 0 || size == 0 || parent_size % 8 != 0 || size % parent_size != 0 {
            return Err(IndexError::SectionGeometry(format!(
                "bloom trie section size {size} is not a multiple of byte-aligned parent size {parent_size}"
            )));
        }
        Ok(Self {
            nodes: Table::new(db.clone(), BLOOM_TRIE_TABLE_PREFIX),
            db,
            chain,
            parent_size,
            size,
            ratio: size / parent_size,
            section: 0,
            heads: Vec::new(),
            trie: None,
            stats: CompressionStats::default(),
        })
    }

    /// Number of parent sections per Bloom Trie section.
    pub fn ratio(&self) -> u64 {
        self.ratio
    }

    pub fn section_size(&self) -> u64 {
        self.size
    }

    pub fn compression_stats(&self) -> CompressionStats {
        self.stats
    }

    /// Table holding the trie nodes, for serving lookups and proofs.
    pub fn node_table(&self) -> &Table {
        &self.nodes
    }

    /// Decompressed concatenation of every parent plane of `bit`.
    fn gather_plane(&self, bit: u16) -> IndexResult<Vec<u8>> {
        let plane_len = (self.parent_size / 8) as usize;
        let mut raw = Vec::with_capacity(plane_len * self.ratio as usize);
        for (j, head) in self.heads.iter().enumerate() {
            let parent = self.section * self.ratio + j as u64;
            let stored = self
                .chain
                .bloom_bits(bit, parent, head)?
                .ok_or(IndexError::MissingBloomBits {
                    bit,
                    section: parent,
                    head: *head,
                })?;
            let plane = decompress_bytes(&stored, plane_len).map_err(|source| {
                IndexError::Decompress {
                    bit,
                    section: parent,
                    source,
                }
            })?;
            raw.extend_from_slice(&plane);
        }
        Ok(raw)
    }
}

impl SectionBackend for BloomTrieBackend {
    fn name(&self) -> &'static str {
        NAME
    }

    fn reset(&mut self, section: u64, last_section_head: &Hash) -> IndexResult<()> {
        self.trie = None;
        self.section = section;
        self.heads = vec![ZERO_HASH; self.ratio as usize];

        let root = if section > 0 {
            bloom_trie_root(self.db.as_ref(), section - 1, last_section_head)?.ok_or(
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
        let offset = header
            .number
            .checked_sub(self.section * self.size)
            .filter(|offset| *offset < self.size)
            .ok_or(IndexError::HeaderOutOfSection {
                number: header.number,
                section: self.section,
            })?;
        if self.trie.is_none() {
            return Err(IndexError::NotReset(NAME));
        }
        if (offset + 1) % self.parent_size == 0 {
            self.heads[(offset / self.parent_size) as usize] = header.hash();
        }
        Ok(())
    }

    fn commit(&mut self) -> IndexResult<()> {
        let mut trie = self.trie.take().ok_or(IndexError::NotReset(NAME))?;

        let planes = (0..BLOOM_BIT_LENGTH as u16)
            .into_par_iter()
            .map(|bit| -> IndexResult<(u64, Vec<u8>)> {
                let raw = self.gather_plane(bit)?;
                Ok((raw.len() as u64, compress_bytes(&raw)))
            })
            .collect::<IndexResult<Vec<_>>>()?;

        let mut compressed_size = 0u64;
        let mut decompressed_size = 0u64;
        for (bit, (raw_len, compressed)) in planes.into_iter().enumerate() {
            decompressed_size += raw_len;
            compressed_size += compressed.len() as u64;

            let key = bloom_bit_key(bit as u16, self.section);
            if compressed.is_empty() {
                trie.delete(&key)?;
            } else {
                trie.update(&key, &compressed)?;
            }
        }

        let mut nodes = WriteBatch::new();
        let root = trie.commit(&mut nodes)?;
        let section_head = self.heads[self.heads.len() - 1];
        let mut batch = self.nodes.prefix_batch(nodes);
        batch_bloom_trie_root(&mut batch, self.section, &section_head, &root);
        self.db.write(batch)?;

        self.stats.compressed += compressed_size;
        self.stats.decompressed += decompressed_size;
        info!(
            section = self.section,
            section_head = %hex::encode(section_head),
            root = %hex::encode(root),
            compression_ratio = self.stats.ratio(),
            "Storing bloom trie"
        );
        Ok(())
    }
}

/// Read the Bloom Trie leaf for `(bit, section)` from the trie at `root`.
/// An absent key means the bit is zero across the whole section.
pub fn bloom_trie_entry(
    nodes: Table,
    root: Hash,
    bit: u16,
    section: u64,
) -> IndexResult<Option<Vec<u8>>> {
    let trie = Trie::new(root, nodes)?;
    Ok(trie.get(&bloom_bit_key(bit, section))?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::{ChainDb, MemoryStore};

    const PARENT: u64 = 16;
    const SIZE: u64 = 32;

    fn fixture() -> (Arc<MemoryStore>, ChainDb, BloomTrieBackend) {
        let store = Arc::new(MemoryStore::new());
        let chain = ChainDb::new(store.clone());
        let backend =
            BloomTrieBackend::with_section_size(store.clone(), Arc::new(chain.clone()), PARENT, SIZE)
                .unwrap();
        (store, chain, backend)
    }

    fn header(number: u64) -> Header {
        Header {
            number,
            ..crate::indexer::test_chain::genesis()
        }
    }

    /// Feed one Bloom Trie section; return the parent heads.
    fn feed(backend: &mut BloomTrieBackend, section: u64) -> Vec<Hash> {
        let mut heads = Vec::new();
        for number in section * SIZE..(section + 1) * SIZE {
            let h = header(number);
            backend.process(&h).unwrap();
            if (number + 1) % PARENT == 0 {
                heads.push(h.hash());
            }
        }
        heads
    }

    #[test]
    fn geometry_is_validated() {
        let store = MemoryStore::shared();
        let chain: Arc<dyn ChainStore> = Arc::new(ChainDb::new(store.clone()));
        assert!(BloomTrieBackend::with_section_size(store.clone(), chain.clone(), 12, 36).is_err());
        assert!(BloomTrieBackend::with_section_size(store.clone(), chain.clone(), 16, 40).is_err());
        let backend = BloomTrieBackend::new(store, chain, 4096).unwrap();
        assert_eq!(backend.ratio(), 8);
    }

    #[test]
    fn heads_fill_at_parent_boundaries() {
        let (_, _, mut backend) = fixture();
        backend.reset(0, &ZERO_HASH).unwrap();
        let heads = feed(&mut backend, 0);
        assert_eq!(backend.heads, heads);
    }

    #[test]
    fn out_of_section_header_is_rejected() {
        let (_, _, mut backend) = fixture();
        backend.reset(1, &ZERO_HASH).unwrap_err();
        backend.reset(0, &ZERO_HASH).unwrap();
        assert!(matches!(
            backend.process(&header(SIZE)),
            Err(IndexError::HeaderOutOfSection { number: 32, section: 0 })
        ));
    }

    #[test]
    fn aggregates_parent_planes_in_order() {
        let (store, chain, mut backend) = fixture();
        backend.reset(0, &ZERO_HASH).unwrap();
        let heads = feed(&mut backend, 0);

        // Bit 5: header 3 in parent 0, header 30 (offset 14) in parent 1.
        chain.write_bloom_bits(5, 0, &heads[0], &compress_bytes(&[0b0001_0000, 0])).unwrap();
        chain.write_bloom_bits(5, 1, &heads[1], &compress_bytes(&[0, 0b0000_0010])).unwrap();
        for bit in (0..BLOOM_BIT_LENGTH as u16).filter(|b| *b != 5) {
            chain.write_bloom_bits(bit, 0, &heads[0], &[]).unwrap();
            chain.write_bloom_bits(bit, 1, &heads[1], &[]).unwrap();
        }
        backend.commit().unwrap();

        let root = bloom_trie_root(store.as_ref(), 0, &heads[1]).unwrap().expect("root stored");
        let nodes = backend.node_table().clone();
        let leaf = bloom_trie_entry(nodes.clone(), root, 5, 0).unwrap().unwrap();
        assert_eq!(
            decompress_bytes(&leaf, 4).unwrap(),
            vec![0b0001_0000, 0, 0, 0b0000_0010]
        );
        assert_eq!(bloom_trie_entry(nodes, root, 6, 0).unwrap(), None);

        let stats = backend.compression_stats();
        assert_eq!(stats.decompressed, BLOOM_BIT_LENGTH as u64 * 4);
        assert_eq!(stats.compressed, leaf.len() as u64);
    }

    #[test]
    fn missing_parent_plane_persists_nothing() {
        let (store, _, mut backend) = fixture();
        backend.reset(0, &ZERO_HASH).unwrap();
        let heads = feed(&mut backend, 0);

        let err = backend.commit().unwrap_err();
        assert!(matches!(err, IndexError::MissingBloomBits { section: 0, .. }));
        assert!(!err.is_fatal());
        assert_eq!(bloom_trie_root(store.as_ref(), 0, &heads[1]).unwrap(), None);
        assert!(store.keys_with_prefix(BLOOM_TRIE_TABLE_PREFIX).is_empty());
    }

    #[test]
    fn corrupt_parent_plane_is_reported() {
        let (_, chain, mut backend) = fixture();
        backend.reset(0, &ZERO_HASH).unwrap();
        let heads = feed(&mut backend, 0);
        for bit in 0..BLOOM_BIT_LENGTH as u16 {
            chain.write_bloom_bits(bit, 0, &heads[0], &[]).unwrap();
            chain.write_bloom_bits(bit, 1, &heads[1], &[0xFF, 0xFF, 0xFF]).unwrap();
        }
        assert!(matches!(
            backend.commit(),
            Err(IndexError::Decompress { section: 1, .. })
        ));
    }
}
