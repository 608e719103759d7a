//! Error types for the section indexers.
//!
//! Two classes exist:
//!
//! - **Recoverable** errors (every other `IndexError` variant): a
//!   missing trie node, missing bloom bits for a parent section, a store
//!   write failure. The driver drops the in-flight section and may retry it
//!   later from scratch.
//! - **Fatal** errors (`IndexError::Fatal`, and `IndexError::Poisoned` for
//!   a backend that already hit one): the chain store contradicts itself,
//!   e.g. a confirmed header without a total difficulty. Continuing would
//!   commit a wrong root that still looks valid, so the process must stop.

use thiserror::Error;

use crate::bitutil::BitutilError;
use crate::storage::StorageError;
use crate::trie::TrieError;
use crate::types::Hash;

/// Invariant violations in the chain store.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ChainCorruption {
    /// A header handed to an indexer has no recorded total difficulty.
    #[error("missing total difficulty for confirmed header #{number} ({})", hex::encode(.hash))]
    MissingTotalDifficulty { number: u64, hash: Hash },
}

/// Errors raised while building a section.
#[derive(Debug, Error)]
pub enum IndexError {
    /// The trie of the previous section could not be opened.
    #[error("trie open failed for section {section}: {source}")]
    TrieOpen {
        section: u64,
        #[source]
        source: TrieError,
    },

    #[error("trie error: {0}")]
    Trie(#[from] TrieError),

    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    /// No root record exists for the section preceding the one being reset.
    #[error("no {index} root stored for section {section} at head {}", hex::encode(.head))]
    MissingPriorRoot {
        index: &'static str,
        section: u64,
        head: Hash,
    },

    /// A parent section's bloom bit-plane is not available (yet).
    #[error("bloom bits missing for bit {bit}, section {section}, head {}", hex::encode(.head))]
    MissingBloomBits { bit: u16, section: u64, head: Hash },

    /// A parent section's bloom bit-plane failed to decompress.
    #[error("bloom bits corrupt for bit {bit}, section {section}: {source}")]
    Decompress {
        bit: u16,
        section: u64,
        #[source]
        source: BitutilError,
    },

    /// The canonical chain does not (yet) contain a header the driver needs.
    #[error("canonical header #{0} unknown")]
    MissingHeader(u64),

    /// The chain changed under the driver while a section was being built.
    #[error("chain reorged during section processing at #{number}")]
    Reorged { number: u64 },

    /// A header was fed to a backend for a section it does not belong to.
    #[error("header #{number} is outside section {section}")]
    HeaderOutOfSection { number: u64, section: u64 },

    /// `process` or `commit` was called without a preceding `reset`.
    #[error("{0} backend used before reset")]
    NotReset(&'static str),

    /// Section sizes that do not divide evenly.
    #[error("invalid section geometry: {0}")]
    SectionGeometry(String),

    /// A bloom was added to the bloom-bits generator out of sequence.
    #[error("bloom for section offset {got} added, expected offset {expected}")]
    BloomOutOfOrder { expected: u64, got: u64 },

    /// Bit-planes were requested before every header of the section was added.
    #[error("bloom bits incomplete: {added} of {size} headers added")]
    IncompleteBloomBits { added: u64, size: u64 },

    /// The backend saw a fatal error earlier in this section and will not
    /// commit until it is reset.
    #[error("{0} backend poisoned by a fatal error")]
    Poisoned(&'static str),

    /// The chain store is inconsistent; the process must not continue.
    #[error("fatal: {0}")]
    Fatal(#[from] ChainCorruption),
}

impl IndexError {
    /// Whether this error must abort the process rather than be retried.
    pub fn is_fatal(&self) -> bool {
        matches!(self, IndexError::Fatal(_) | IndexError::Poisoned(_))
    }
}

pub type IndexResult<T> = Result<T, IndexError>;

/// Caller-visible lookup failures. Absence of an index entry is expected
/// for sections that have not been built, so those are plain signals; a
/// failing store is reported separately.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum LookupError {
    #[error("no trusted canonical hash trie for this chain")]
    NoTrustedCht,

    #[error("no trusted bloom trie for this chain")]
    NoTrustedBloomTrie,

    #[error("header not found")]
    HeaderNotFound,

    /// The store failed while looking; the entry may well exist.
    #[error("lookup failed: {0}")]
    Storage(String),
}

impl From<StorageError> for LookupError {
    fn from(e: StorageError) -> Self {
        LookupError::Storage(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn corruption_and_poisoning_are_fatal() {
        let fatal: IndexError = ChainCorruption::MissingTotalDifficulty {
            number: 5,
            hash: [1; 32],
        }
        .into();
        assert!(fatal.is_fatal());
        assert!(!IndexError::MissingHeader(5).is_fatal());
        assert!(!IndexError::NotReset("cht").is_fatal());
        assert!(IndexError::Poisoned("cht").is_fatal());
    }

    #[test]
    fn messages_name_the_missing_piece() {
        let err = IndexError::MissingBloomBits {
            bit: 12,
            section: 3,
            head: [0xAB; 32],
        };
        let msg = err.to_string();
        assert!(msg.contains("bit 12"));
        assert!(msg.contains("section 3"));
        assert!(msg.contains("abab"));
        assert_eq!(
            LookupError::NoTrustedCht.to_string(),
            "no trusted canonical hash trie for this chain"
        );
    }
}
