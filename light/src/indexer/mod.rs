//! # Section Indexers
//!
//! The chain is cut into fixed-size sections. Once a section is buried
//! under enough confirmations it is immutable, and each indexer folds it
//! into its own derived structure exactly once.
//!
//! ## Architecture
//!
//! ```text
//! SectionIndexer<B>          : scheduling, progress, chain reads
//!   └── B: SectionBackend    : what a section turns into
//!         ├── ChtBackend        (cht.rs)        number → (hash, td) trie
//!         ├── BloomBitsBackend  (bloom_bits.rs) per-bit bloom bitmaps
//!         └── BloomTrieBackend  (bloom_trie.rs) (bit, section) → bitmap trie
//! ```
//!
//! ## Lifecycle
//!
//! For each newly confirmed section the driver calls `reset` with the head
//! of the previous section, feeds every canonical header of the section to
//! `process` in ascending order, then calls `commit`. Only after the
//! backend's commit has landed does the driver record the section as done,
//! so a crash in between just rebuilds the same section again.
//!
//! ## Dependencies between indexers
//!
//! The Bloom Trie reads what the bloom-bits indexer wrote. The node feeds
//! it [`SectionIndexer::processed_head`] of the bloom-bits indexer instead
//! of the chain head, so it never sees a parent section that is not done.

pub mod bloom_bits;
pub mod bloom_trie;
pub mod cht;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::error::{IndexError, IndexResult};
use crate::storage::{ChainStore, KeyValueStore, SharedStore, StorageError, Table, WriteBatch};
use crate::types::{Hash, Header, ZERO_HASH};

pub use bloom_bits::{BloomBitsBackend, BloomBitsGenerator};
pub use bloom_trie::{BloomTrieBackend, CompressionStats};
pub use cht::{ChtBackend, ChtNode};

/// One kind of derived index, built a section at a time.
pub trait SectionBackend: Send {
    /// Short name used in logs and errors.
    fn name(&self) -> &'static str;

    /// Start building `section`. `last_section_head` is the hash of the
    /// last header of `section - 1`, or all zeros for section 0.
    fn reset(&mut self, section: u64, last_section_head: &Hash) -> IndexResult<()>;

    /// Fold one header of the current section into the in-flight state.
    fn process(&mut self, header: &Header) -> IndexResult<()>;

    /// Persist the section atomically and drop the in-flight state.
    fn commit(&mut self) -> IndexResult<()>;
}

// ---------------------------------------------------------------------------
// Progress keys
// ---------------------------------------------------------------------------

const COUNT_KEY: &[u8] = b"count";
const SECTION_HEAD_PREFIX: &[u8] = b"shead";

fn section_head_key(section: u64) -> Vec<u8> {
    let mut key = SECTION_HEAD_PREFIX.to_vec();
    key.extend_from_slice(&section.to_be_bytes());
    key
}

// ---------------------------------------------------------------------------
// SectionIndexer
// ---------------------------------------------------------------------------

/// Drives a [`SectionBackend`] over the confirmed sections of a chain.
pub struct SectionIndexer<B: SectionBackend> {
    backend: B,
    chain: Arc<dyn ChainStore>,
    progress: Table,
    section_size: u64,
    confirmations: u64,
}

impl<B: SectionBackend> SectionIndexer<B> {
    /// `progress_prefix` separates this indexer's bookkeeping from every
    /// other table in `db`.
    pub fn new(
        backend: B,
        chain: Arc<dyn ChainStore>,
        db: SharedStore,
        progress_prefix: &[u8],
        section_size: u64,
        confirmations: u64,
    ) -> IndexResult<Self> {
        if section_size == 0 {
            return Err(IndexError::SectionGeometry(format!(
                "{} section size must be positive",
                backend.name()
            )));
        }
        Ok(Self {
            backend,
            chain,
            progress: Table::new(db, progress_prefix),
            section_size,
            confirmations,
        })
    }

    pub fn name(&self) -> &'static str {
        self.backend.name()
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub fn backend_mut(&mut self) -> &mut B {
        &mut self.backend
    }

    pub fn section_size(&self) -> u64 {
        self.section_size
    }

    pub fn confirmations(&self) -> u64 {
        self.confirmations
    }

    /// Number of sections finalized given a chain head at `head`.
    pub fn confirmed_sections(&self, head: u64) -> u64 {
        match (head + 1).checked_sub(self.confirmations) {
            Some(confirmed) => confirmed / self.section_size,
            None => 0,
        }
    }

    /// Number of sections committed so far.
    pub fn stored_sections(&self) -> IndexResult<u64> {
        match self.progress.get(COUNT_KEY)? {
            Some(bytes) => {
                let raw: [u8; 8] = bytes
                    .as_slice()
                    .try_into()
                    .map_err(|_| StorageError::corrupted(COUNT_KEY, "expected 8-byte count"))?;
                Ok(u64::from_be_bytes(raw))
            }
            None => Ok(0),
        }
    }

    /// Head hash recorded when `section` was committed.
    pub fn section_head(&self, section: u64) -> IndexResult<Option<Hash>> {
        let key = section_head_key(section);
        match self.progress.get(&key)? {
            Some(bytes) => {
                let hash: Hash = bytes
                    .try_into()
                    .map_err(|_| StorageError::corrupted(&key, "expected 32-byte head"))?;
                Ok(Some(hash))
            }
            None => Ok(None),
        }
    }

    /// Last block number covered by a committed section, if any.
    pub fn processed_head(&self) -> IndexResult<Option<u64>> {
        let stored = self.stored_sections()?;
        Ok(stored.checked_mul(self.section_size).and_then(|n| n.checked_sub(1)))
    }

    fn record_section(&self, section: u64, head: &Hash) -> IndexResult<()> {
        let mut batch = WriteBatch::new();
        batch.put(section_head_key(section), head.to_vec());
        batch.put(COUNT_KEY.to_vec(), (section + 1).to_be_bytes().to_vec());
        self.progress.write(batch)?;
        Ok(())
    }

    /// Mark every section up to `section` as done, ending at `section_head`.
    ///
    /// Used when roots for those sections come from a trusted checkpoint
    /// rather than from local processing. Never moves progress backwards.
    pub fn add_checkpoint(&mut self, section: u64, section_head: &Hash) -> IndexResult<()> {
        if self.stored_sections()? > section {
            return Ok(());
        }
        self.record_section(section, section_head)?;
        info!(
            indexer = self.name(),
            section,
            head = %hex::encode(section_head),
            "indexer progress set from checkpoint"
        );
        Ok(())
    }

    /// Build every section confirmed at chain head `head` that is not yet
    /// stored. Returns how many sections were committed.
    ///
    /// Stops early, without error, when `cancel` is raised; the section in
    /// flight is discarded. On error nothing of the failing section is
    /// persisted and earlier sections stay committed.
    pub fn update(&mut self, head: u64, cancel: &AtomicBool) -> IndexResult<u64> {
        let confirmed = self.confirmed_sections(head);
        let mut stored = self.stored_sections()?;
        let mut committed = 0;

        while stored < confirmed {
            if cancel.load(Ordering::Relaxed) {
                break;
            }
            let last_head = match stored {
                0 => ZERO_HASH,
                _ => self.section_head(stored - 1)?.ok_or_else(|| {
                    StorageError::corrupted(&section_head_key(stored - 1), "missing section head")
                })?,
            };

            let section_head = match self.process_section(stored, last_head, cancel) {
                Ok(Some(head)) => head,
                Ok(None) => {
                    debug!(indexer = self.name(), section = stored, "section cancelled");
                    break;
                }
                Err(e) => {
                    warn!(indexer = self.name(), section = stored, error = %e, "section failed");
                    return Err(e);
                }
            };

            self.record_section(stored, &section_head)?;
            info!(
                indexer = self.name(),
                section = stored,
                head = %hex::encode(section_head),
                "section processed"
            );
            stored += 1;
            committed += 1;
        }
        Ok(committed)
    }

    fn process_section(
        &mut self,
        section: u64,
        last_head: Hash,
        cancel: &AtomicBool,
    ) -> IndexResult<Option<Hash>> {
        self.backend.reset(section, &last_head)?;

        let first = section * self.section_size;
        let mut parent = last_head;
        for number in first..first + self.section_size {
            if cancel.load(Ordering::Relaxed) {
                return Ok(None);
            }
            let hash = self
                .chain
                .canonical_hash(number)?
                .ok_or(IndexError::MissingHeader(number))?;
            let header = self
                .chain
                .header(&hash, number)?
                .ok_or(IndexError::MissingHeader(number))?;
            if number > 0 && header.parent_hash != parent {
                return Err(IndexError::Reorged { number });
            }
            self.backend.process(&header)?;
            parent = hash;
        }

        self.backend.commit()?;
        Ok(Some(parent))
    }
}

impl<B: SectionBackend> std::fmt::Debug for SectionIndexer<B> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SectionIndexer")
            .field("name", &self.name())
            .field("section_size", &self.section_size)
            .field("confirmations", &self.confirmations)
            .finish()
    }
}


#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;

    /// Records the calls made to it.
    #[derive(Clone, Default)]
    struct Recorder {
        calls: Arc<Mutex<Vec<String>>>,
        fail_at: Option<u64>,
    }

    impl SectionBackend for Recorder {
        fn name(&self) -> &'static str {
            "recorder"
        }

        fn reset(&mut self, section: u64, last: &Hash) -> IndexResult<()> {
            self.calls
                .lock()
                .push(format!("reset {section} {}", hex::encode(&last[..2])));
            Ok(())
        }

        fn process(&mut self, header: &Header) -> IndexResult<()> {
            if Some(header.number) == self.fail_at {
                return Err(IndexError::MissingHeader(header.number));
            }
            self.calls.lock().push(format!("process {}", header.number));
            Ok(())
        }

        fn commit(&mut self) -> IndexResult<()> {
            self.calls.lock().push("commit".to_string());
            Ok(())
        }
    }

    fn indexer(
        backend: Recorder,
        len: u64,
        size: u64,
        confirmations: u64,
    ) -> (SectionIndexer<Recorder>, Vec<Header>) {
        let (store, chain, headers) = test_chain::build(len, |_| crate::types::Bloom::zero());
        let indexer =
            SectionIndexer::new(backend, Arc::new(chain), store, b"testIndex-", size, confirmations)
                .unwrap();
        (indexer, headers)
    }

    #[test]
    fn confirmation_arithmetic() {
        let (idx, _) = indexer(Recorder::default(), 1, 4, 2);
        assert_eq!(idx.confirmed_sections(0), 0);
        assert_eq!(idx.confirmed_sections(4), 0);
        assert_eq!(idx.confirmed_sections(5), 1);
        assert_eq!(idx.confirmed_sections(9), 2);

        let (zero_conf, _) = indexer(Recorder::default(), 1, 4, 0);
        assert_eq!(zero_conf.confirmed_sections(3), 1);
    }

    #[test]
    fn zero_section_size_is_rejected() {
        let (store, chain, _) = test_chain::build(1, |_| crate::types::Bloom::zero());
        let result = SectionIndexer::new(Recorder::default(), Arc::new(chain), store, b"x", 0, 0);
        assert!(matches!(result, Err(IndexError::SectionGeometry(_))));
    }

    #[test]
    fn drives_reset_process_commit_per_section() {
        let recorder = Recorder::default();
        let calls = recorder.calls.clone();
        let (mut idx, headers) = indexer(recorder, 10, 4, 1);

        let committed = idx.update(9, &AtomicBool::new(false)).unwrap();
        assert_eq!(committed, 2);
        assert_eq!(idx.stored_sections().unwrap(), 2);
        assert_eq!(idx.processed_head().unwrap(), Some(7));
        assert_eq!(idx.section_head(1).unwrap(), Some(headers[7].hash()));

        let calls = calls.lock();
        assert_eq!(calls[0], "reset 0 0000");
        assert_eq!(&calls[1..5], &["process 0", "process 1", "process 2", "process 3"]);
        assert_eq!(calls[5], "commit");
        assert_eq!(
            calls[6],
            format!("reset 1 {}", hex::encode(&headers[3].hash()[..2]))
        );
        assert_eq!(calls.len(), 12);
    }

    #[test]
    fn update_is_incremental() {
        let recorder = Recorder::default();
        let calls = recorder.calls.clone();
        let (mut idx, _) = indexer(recorder, 12, 4, 0);
        let cancel = AtomicBool::new(false);

        assert_eq!(idx.update(3, &cancel).unwrap(), 1);
        assert_eq!(idx.update(3, &cancel).unwrap(), 0);
        assert_eq!(idx.update(11, &cancel).unwrap(), 2);
        assert_eq!(calls.lock().iter().filter(|c| *c == "commit").count(), 3);
    }

    #[test]
    fn cancelled_update_commits_nothing() {
        let recorder = Recorder::default();
        let calls = recorder.calls.clone();
        let (mut idx, _) = indexer(recorder, 8, 4, 0);

        assert_eq!(idx.update(7, &AtomicBool::new(true)).unwrap(), 0);
        assert_eq!(idx.stored_sections().unwrap(), 0);
        assert_eq!(idx.processed_head().unwrap(), None);
        assert!(calls.lock().is_empty());
    }

    #[test]
    fn failing_section_is_not_recorded() {
        let recorder = Recorder {
            fail_at: Some(6),
            ..Recorder::default()
        };
        let (mut idx, _) = indexer(recorder, 8, 4, 0);

        let err = idx.update(7, &AtomicBool::new(false)).unwrap_err();
        assert!(matches!(err, IndexError::MissingHeader(6)));
        assert_eq!(idx.stored_sections().unwrap(), 1);
    }

    #[test]
    fn missing_headers_stop_the_driver() {
        let (mut idx, _) = indexer(Recorder::default(), 6, 4, 0);
        // Head claims 8 headers, the chain only has 6.
        let err = idx.update(7, &AtomicBool::new(false)).unwrap_err();
        assert!(matches!(err, IndexError::MissingHeader(6)));
        assert_eq!(idx.stored_sections().unwrap(), 1);
    }

    #[test]
    fn checkpoint_advances_progress() {
        let recorder = Recorder::default();
        let calls = recorder.calls.clone();
        let (mut idx, headers) = indexer(recorder, 12, 4, 0);

        idx.add_checkpoint(1, &headers[7].hash()).unwrap();
        assert_eq!(idx.stored_sections().unwrap(), 2);
        assert_eq!(idx.update(11, &AtomicBool::new(false)).unwrap(), 1);
        assert_eq!(
            calls.lock()[0],
            format!("reset 2 {}", hex::encode(&headers[7].hash()[..2]))
        );

        // An older checkpoint does not rewind.
        idx.add_checkpoint(0, &headers[3].hash()).unwrap();
        assert_eq!(idx.stored_sections().unwrap(), 3);
    }

    #[test]
    fn broken_parent_link_is_reported() {
        let (store, chain, headers) = test_chain::build(8, |_| crate::types::Bloom::zero());
        // Rewrite canonical #5 to a header that does not extend #4.
        let mut stray = headers[5].clone();
        stray.parent_hash = [0xEE; 32];
        chain.insert_canonical(&stray, None).unwrap();

        let mut idx =
            SectionIndexer::new(Recorder::default(), Arc::new(chain), store, b"t-", 4, 0).unwrap();
        let err = idx.update(7, &AtomicBool::new(false)).unwrap_err();
        assert!(matches!(err, IndexError::Reorged { number: 5 }));
    }
}
