//! # Index Service
//!
//! Owns the three section indexers and drives them from the chain head:
//!
//! ```text
//! chain head ──► CHT
//!            └─► bloom bits ──processed head──► Bloom Trie
//! ```
//!
//! Each poll runs every indexer as far as the head allows. A recoverable
//! failure stalls only the indexer it happened in, and is retried on the
//! next poll. A fatal failure is returned to the caller; [`IndexService::run`]
//! aborts the process on it.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tracing::{error, info, warn};

use light_index::checkpoint::CheckpointTable;
use light_index::config::{IndexerConfig, BLOOM_TRIE_FREQUENCY, CHT_FREQUENCY};
use light_index::indexer::{
    BloomBitsBackend, BloomTrieBackend, ChtBackend, SectionBackend, SectionIndexer,
};
use light_index::keys::{BLOOM_BITS_INDEX_PREFIX, BLOOM_TRIE_INDEX_PREFIX, CHT_INDEX_PREFIX};
use light_index::storage::roots::install_checkpoint;
use light_index::storage::{ChainDb, ChainStore, SharedStore, Table};
use light_index::trie::{Trie, TrieError};
use light_index::{Hash, IndexResult};

use crate::metrics::{NodeMetrics, SharedMetrics};

/// Section sizes and confirmation depths of the three indexers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Geometry {
    pub cht_size: u64,
    pub cht_confirmations: u64,
    pub bloom_bits_size: u64,
    pub bloom_bits_confirmations: u64,
    pub bloom_trie_size: u64,
    pub bloom_trie_confirmations: u64,
}

impl From<&IndexerConfig> for Geometry {
    fn from(config: &IndexerConfig) -> Self {
        Self {
            cht_size: config.cht_section_size(),
            cht_confirmations: config.cht_confirmations(),
            bloom_bits_size: config.bloom_bits_section_size(),
            bloom_bits_confirmations: config.bloom_bits_confirmations(),
            bloom_trie_size: BLOOM_TRIE_FREQUENCY,
            bloom_trie_confirmations: config.bloom_trie_confirmations(),
        }
    }
}

pub struct IndexService {
    store: SharedStore,
    chain: ChainDb,
    cht: SectionIndexer<ChtBackend>,
    bloom_bits: SectionIndexer<BloomBitsBackend>,
    bloom_trie: SectionIndexer<BloomTrieBackend>,
    metrics: SharedMetrics,
}

impl IndexService {
    pub fn new(store: SharedStore, geometry: Geometry, metrics: SharedMetrics) -> IndexResult<Self> {
        let chain = ChainDb::new(store.clone());
        let chain_store: Arc<dyn ChainStore> = Arc::new(chain.clone());

        let cht = SectionIndexer::new(
            ChtBackend::new(store.clone(), chain_store.clone(), geometry.cht_size),
            chain_store.clone(),
            store.clone(),
            CHT_INDEX_PREFIX,
            geometry.cht_size,
            geometry.cht_confirmations,
        )?;
        let bloom_bits = SectionIndexer::new(
            BloomBitsBackend::new(chain.clone(), geometry.bloom_bits_size),
            chain_store.clone(),
            store.clone(),
            BLOOM_BITS_INDEX_PREFIX,
            geometry.bloom_bits_size,
            geometry.bloom_bits_confirmations,
        )?;
        let bloom_trie = SectionIndexer::new(
            BloomTrieBackend::with_section_size(
                store.clone(),
                chain_store.clone(),
                geometry.bloom_bits_size,
                geometry.bloom_trie_size,
            )?,
            chain_store,
            store.clone(),
            BLOOM_TRIE_INDEX_PREFIX,
            geometry.bloom_trie_size,
            geometry.bloom_trie_confirmations,
        )?;

        Ok(Self {
            store,
            chain,
            cht,
            bloom_bits,
            bloom_trie,
            metrics,
        })
    }

    /// Install the trusted checkpoint of the indexed chain, if the table
    /// has one and the section geometry matches checkpoint units. Returns
    /// whether a checkpoint was installed.
    ///
    /// The next section after a checkpoint extends the checkpoint's tries,
    /// so their root nodes must already be in the node tables. Without
    /// them indexing would stall on every poll; such a checkpoint is
    /// skipped and indexing starts from section 0.
    pub fn install_checkpoint(&mut self, checkpoints: &CheckpointTable) -> IndexResult<bool> {
        let Some(genesis) = self.chain.canonical_hash(0)? else {
            return Ok(false);
        };
        let Some(checkpoint) = checkpoints.get(&genesis) else {
            info!(genesis = %hex::encode(genesis), "no trusted checkpoint for this chain");
            return Ok(false);
        };
        if self.cht.section_size() != CHT_FREQUENCY
            || self.bloom_trie.section_size() != BLOOM_TRIE_FREQUENCY
        {
            warn!(
                name = %checkpoint.name,
                "checkpoint skipped: sections are not in checkpoint units"
            );
            return Ok(false);
        }
        if !has_root_node(self.cht.backend().node_table(), &checkpoint.cht_root)?
            || !has_root_node(
                self.bloom_trie.backend().node_table(),
                &checkpoint.bloom_trie_root,
            )?
        {
            warn!(
                name = %checkpoint.name,
                section = checkpoint.section_index,
                "checkpoint skipped: trie nodes for its roots are not stored"
            );
            return Ok(false);
        }

        install_checkpoint(self.store.as_ref(), checkpoint)?;
        self.cht
            .add_checkpoint(checkpoint.section_index, &checkpoint.section_head)?;
        self.bloom_trie
            .add_checkpoint(checkpoint.section_index, &checkpoint.section_head)?;
        Ok(true)
    }

    /// Run every indexer once against the current chain head.
    pub fn poll(&mut self, shutdown: &AtomicBool) -> IndexResult<()> {
        let Some(head) = self.chain.head_header()? else {
            return Ok(());
        };
        self.metrics.chain_head.set(head.number as i64);

        step(&mut self.cht, head.number, shutdown, &self.metrics)?;
        step(&mut self.bloom_bits, head.number, shutdown, &self.metrics)?;
        if let Some(parent_head) = self.bloom_bits.processed_head()? {
            step(&mut self.bloom_trie, parent_head, shutdown, &self.metrics)?;
        }

        let stats = self.bloom_trie.backend().compression_stats();
        self.metrics
            .bloom_trie_compressed_bytes
            .set(stats.compressed as i64);
        self.metrics
            .bloom_trie_decompressed_bytes
            .set(stats.decompressed as i64);
        Ok(())
    }

    /// Poll until `shutdown` is raised. Aborts the process on a fatal
    /// error: the chain store contradicts itself and no further root may
    /// be published from it.
    pub fn run(mut self, poll_interval: Duration, shutdown: &AtomicBool) {
        info!("indexing loop starting");
        while !shutdown.load(Ordering::Relaxed) {
            if let Err(e) = self.poll(shutdown) {
                if e.is_fatal() {
                    error!(error = %e, "fatal indexing error, aborting");
                    std::process::abort();
                }
                warn!(error = %e, "indexing poll failed");
            }
            std::thread::sleep(poll_interval);
        }
        info!("indexing loop stopped");
    }

    pub fn cht(&self) -> &SectionIndexer<ChtBackend> {
        &self.cht
    }

    pub fn bloom_trie(&self) -> &SectionIndexer<BloomTrieBackend> {
        &self.bloom_trie
    }
}

/// Whether the node of a non-empty trie `root` is present in `nodes`.
fn has_root_node(nodes: &Table, root: &Hash) -> IndexResult<bool> {
    match Trie::new(*root, nodes.clone()) {
        Ok(_) => Ok(true),
        Err(TrieError::MissingNode(_)) => Ok(false),
        Err(e) => Err(e.into()),
    }
}

/// Advance one indexer. Recoverable errors are logged and counted; only
/// fatal errors propagate.
fn step<B: SectionBackend>(
    indexer: &mut SectionIndexer<B>,
    head: u64,
    shutdown: &AtomicBool,
    metrics: &NodeMetrics,
) -> IndexResult<()> {
    let name = indexer.name();
    match indexer.update(head, shutdown) {
        Ok(committed) => {
            metrics
                .sections_committed_total
                .with_label_values(&[name])
                .inc_by(committed);
            metrics
                .headers_processed_total
                .with_label_values(&[name])
                .inc_by(committed * indexer.section_size());
        }
        Err(e) if e.is_fatal() => return Err(e),
        Err(e) => {
            metrics.index_errors_total.with_label_values(&[name]).inc();
            warn!(indexer = name, error = %e, "indexing stalled, retrying on next poll");
        }
    }
    metrics
        .stored_sections
        .with_label_values(&[name])
        .set(indexer.stored_sections()? as i64);
    Ok(())
}
