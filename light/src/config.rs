//! # Indexer Configuration & Constants
//!
//! Every section size and confirmation depth lives here. These numbers are
//! protocol-defined: a server and a client that disagree on any of them
//! will compute different section boundaries and therefore different roots.
//!
//! Two roles exist. A **server** generates CHTs with the legacy 4096-header
//! section size (so old clients keep working) and starts indexing after only
//! 256 confirmations. A **client** works with the 32768-header sections and
//! expects servers to have them available after 2048 confirmations.

use std::time::Duration;

// ---------------------------------------------------------------------------
// Canonical Hash Trie
// ---------------------------------------------------------------------------

/// Current CHT section size, in headers.
pub const CHT_FREQUENCY: u64 = 32_768;

/// Legacy CHT section size. Servers keep generating CHTs at this finer
/// granularity as long as legacy-protocol clients must be served.
pub const CHT_V1_FREQUENCY: u64 = 4_096;

// ---------------------------------------------------------------------------
// Confirmation Depths
// ---------------------------------------------------------------------------

/// Confirmations after which a client expects a server to have a helper
/// trie available.
pub const HELPER_TRIE_CONFIRMATIONS: u64 = 2_048;

/// Confirmations after which a server generates a helper trie.
pub const HELPER_TRIE_PROCESS_CONFIRMATIONS: u64 = 256;

// ---------------------------------------------------------------------------
// Bloom Trie
// ---------------------------------------------------------------------------

/// Bloom Trie section size, in headers.
pub const BLOOM_TRIE_FREQUENCY: u64 = 32_768;

/// Section size of the per-header bloom-bits index the Bloom Trie is
/// aggregated from on servers.
pub const BLOOM_BITS_SECTION_SIZE: u64 = 4_096;

/// Confirmations required before a bloom-bits section is generated.
pub const BLOOM_BITS_CONFIRMATIONS: u64 = 256;

/// Number of bits in a log bloom filter.
pub const BLOOM_BIT_LENGTH: usize = 2_048;

/// Number of bytes in a log bloom filter.
pub const BLOOM_BYTE_LENGTH: usize = BLOOM_BIT_LENGTH / 8;

// ---------------------------------------------------------------------------
// Driver
// ---------------------------------------------------------------------------

/// Default delay between two polls of the chain head by the node.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Convert a section index in current (32768) CHT numbering into the
/// legacy (4096) numbering of the same boundary.
///
/// Section `v2` ends at block `(v2 + 1) * 32768 - 1`, which is the last block
/// of legacy section `(v2 + 1) * 8 - 1`.
pub const fn v1_section_from_v2(v2: u64) -> u64 {
    (v2 + 1) * (CHT_FREQUENCY / CHT_V1_FREQUENCY) - 1
}

/// Which side of the light protocol the indexers are built for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum IndexMode {
    /// Light client: large sections, deep confirmations.
    Client,
    /// Serving node: legacy CHT sections, shallow confirmations.
    Server,
}

impl IndexMode {
    /// Parse a mode name. Accepts "client" or "server" (case-insensitive).
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_ascii_lowercase().as_str() {
            "client" => Some(IndexMode::Client),
            "server" => Some(IndexMode::Server),
            _ => None,
        }
    }
}

/// Section geometry for all three indexers, derived from the mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IndexerConfig {
    pub mode: IndexMode,
    pub poll_interval: Duration,
}

impl IndexerConfig {
    pub fn new(mode: IndexMode) -> Self {
        Self {
            mode,
            poll_interval: DEFAULT_POLL_INTERVAL,
        }
    }

    fn helper_trie_confirmations(&self) -> u64 {
        match self.mode {
            IndexMode::Client => HELPER_TRIE_CONFIRMATIONS,
            IndexMode::Server => HELPER_TRIE_PROCESS_CONFIRMATIONS,
        }
    }

    /// Headers per CHT section.
    pub fn cht_section_size(&self) -> u64 {
        match self.mode {
            IndexMode::Client => CHT_FREQUENCY,
            IndexMode::Server => CHT_V1_FREQUENCY,
        }
    }

    /// Confirmations before a CHT section is built.
    pub fn cht_confirmations(&self) -> u64 {
        self.helper_trie_confirmations()
    }

    /// Size of the parent sections aggregated into one Bloom Trie section.
    pub fn bloom_trie_parent_section_size(&self) -> u64 {
        match self.mode {
            IndexMode::Client => BLOOM_TRIE_FREQUENCY,
            IndexMode::Server => BLOOM_BITS_SECTION_SIZE,
        }
    }

    /// Confirmations before a Bloom Trie section is built.
    ///
    /// The bloom-bits confirmation depth is subtracted from the helper-trie
    /// depth. In server mode this yields zero: the Bloom Trie then runs as
    /// soon as the bloom-bits indexer has completed its parent sections.
    pub fn bloom_trie_confirmations(&self) -> u64 {
        self.helper_trie_confirmations() - BLOOM_BITS_CONFIRMATIONS
    }

    /// Headers per bloom-bits section. Always equal to the Bloom Trie's
    /// parent section size so the two indexers agree on boundaries.
    pub fn bloom_bits_section_size(&self) -> u64 {
        self.bloom_trie_parent_section_size()
    }

    /// Confirmations before a bloom-bits section is built.
    pub fn bloom_bits_confirmations(&self) -> u64 {
        BLOOM_BITS_CONFIRMATIONS
    }
}

impl Default for IndexerConfig {
    fn default() -> Self {
        Self::new(IndexMode::Server)
    }
}
