//! # Trusted Checkpoints
//!
//! A checkpoint pins the CHT and Bloom Trie roots of one section of a
//! known chain. A client that trusts it can verify proofs for any header
//! up to the end of that section without syncing headers first.
//!
//! The [`CheckpointTable`] is built once at startup, from the built-in
//! entries and optionally a JSON file, and is read-only afterwards. It is
//! keyed by genesis hash.
//!
//! ## JSON format
//!
//! ```json
//! [
//!   {
//!     "genesis": "0x…",
//!     "name": "mychain",
//!     "section_index": 12,
//!     "section_head": "0x…",
//!     "cht_root": "0x…",
//!     "bloom_trie_root": "0x…"
//!   }
//! ]
//! ```

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::config::CHT_FREQUENCY;
use crate::error::LookupError;
use crate::types::Hash;

/// Decode a 64-character hex literal at compile time.
const fn hex32(s: &str) -> Hash {
    const fn nibble(c: u8) -> u8 {
        match c {
            b'0'..=b'9' => c - b'0',
            b'a'..=b'f' => c - b'a' + 10,
            b'A'..=b'F' => c - b'A' + 10,
            _ => panic!("invalid hex digit"),
        }
    }
    let bytes = s.as_bytes();
    assert!(bytes.len() == 64, "expected 32-byte hex literal");
    let mut out = [0u8; 32];
    let mut i = 0;
    while i < 32 {
        out[i] = (nibble(bytes[2 * i]) << 4) | nibble(bytes[2 * i + 1]);
        i += 1;
    }
    out
}

pub const MAINNET_GENESIS_HASH: Hash =
    hex32("d4e56740f876aef8c010b86a40d5f56745a118d0906a34e69aec8c0db1cb8fa3");
pub const ROPSTEN_GENESIS_HASH: Hash =
    hex32("41941023680923e0fe4d74a34bdac8141f2540e3ae90623718e47d66d1ca4a2d");

/// Known-good roots for one section of one chain.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrustedCheckpoint {
    pub name: String,
    /// Section number in CHT (32768-block) units.
    pub section_index: u64,
    /// Hash of the last header in the section.
    #[serde(with = "hex_hash")]
    pub section_head: Hash,
    #[serde(with = "hex_hash")]
    pub cht_root: Hash,
    #[serde(with = "hex_hash")]
    pub bloom_trie_root: Hash,
}

impl TrustedCheckpoint {
    /// Number of the last block covered by this checkpoint.
    pub fn last_indexed_block(&self) -> u64 {
        (self.section_index + 1) * CHT_FREQUENCY - 1
    }
}

fn mainnet_checkpoint() -> TrustedCheckpoint {
    TrustedCheckpoint {
        name: "mainnet".to_string(),
        section_index: 153,
        section_head: hex32("04c2114a8cbe49ba5c37a03cc4b4b8d3adfc0bd2c78e0e726405dd84afca1d63"),
        cht_root: hex32("d7ec603e5d30b567a6e894ee7704e4603232f206d3e5a589794cec0c57bf318e"),
        bloom_trie_root: hex32("0b139b8fb692e21f663ff200da287192201c28ef5813c1ac6ba02a0a4799eef9"),
    }
}

fn ropsten_checkpoint() -> TrustedCheckpoint {
    TrustedCheckpoint {
        name: "ropsten".to_string(),
        section_index: 79,
        section_head: hex32("1b1ba890510e06411fdee9bb64ca7705c56a1a4ce3559ddb34b3680c526cb419"),
        cht_root: hex32("71d60207af74e5a22a3e1cfbfc89f9944f91b49aa980c86fba94d568369eaf44"),
        bloom_trie_root: hex32("70aca4b3b6d08dde8704c95cedb1420394453c1aec390947751e69ff8c436360"),
    }
}

#[derive(Debug, Error)]
pub enum CheckpointError {
    #[error("invalid checkpoint file: {0}")]
    Json(#[from] serde_json::Error),

    #[error("duplicate checkpoint for genesis {}", hex::encode(.0))]
    Duplicate(Hash),
}

/// One entry of a checkpoint file.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct CheckpointEntry {
    #[serde(with = "hex_hash")]
    genesis: Hash,
    #[serde(flatten)]
    checkpoint: TrustedCheckpoint,
}

/// Immutable genesis → checkpoint lookup.
#[derive(Debug, Clone, Default)]
pub struct CheckpointTable {
    entries: HashMap<Hash, TrustedCheckpoint>,
}

impl CheckpointTable {
    /// A table with no entries.
    pub fn empty() -> Self {
        Self::default()
    }

    /// The hardcoded mainnet and ropsten checkpoints.
    ///
    /// These are keyed by the public networks' genesis hashes. A header
    /// chain hashed by [`Header::hash`](crate::types::Header::hash) never
    /// produces those, so for a local chain they are informational (the
    /// `checkpoint` command prints them) and its own checkpoints come from
    /// [`from_json`](Self::from_json).
    pub fn builtin() -> Self {
        let mut entries = HashMap::new();
        entries.insert(MAINNET_GENESIS_HASH, mainnet_checkpoint());
        entries.insert(ROPSTEN_GENESIS_HASH, ropsten_checkpoint());
        Self { entries }
    }

    /// Parse a checkpoint file. Duplicate genesis hashes within the file
    /// are rejected.
    pub fn from_json(json: &str) -> Result<Self, CheckpointError> {
        let parsed: Vec<CheckpointEntry> = serde_json::from_str(json)?;
        let mut entries = HashMap::with_capacity(parsed.len());
        for entry in parsed {
            if entries.insert(entry.genesis, entry.checkpoint).is_some() {
                return Err(CheckpointError::Duplicate(entry.genesis));
            }
        }
        Ok(Self { entries })
    }

    /// Combine two tables. Entries of `other` replace entries of `self`
    /// for the same genesis.
    pub fn extend(mut self, other: CheckpointTable) -> Self {
        self.entries.extend(other.entries);
        self
    }

    pub fn with_checkpoint(mut self, genesis: Hash, checkpoint: TrustedCheckpoint) -> Self {
        self.entries.insert(genesis, checkpoint);
        self
    }

    pub fn get(&self, genesis: &Hash) -> Option<&TrustedCheckpoint> {
        self.entries.get(genesis)
    }

    /// Look a checkpoint up by its chain name.
    pub fn by_name(&self, name: &str) -> Option<(&Hash, &TrustedCheckpoint)> {
        self.entries.iter().find(|(_, cp)| cp.name == name)
    }

    /// Trusted CHT `(section, section_head, root)` for a chain.
    pub fn trusted_cht(&self, genesis: &Hash) -> Result<(u64, Hash, Hash), LookupError> {
        self.get(genesis)
            .map(|cp| (cp.section_index, cp.section_head, cp.cht_root))
            .ok_or(LookupError::NoTrustedCht)
    }

    /// Trusted Bloom Trie `(section, section_head, root)` for a chain.
    pub fn trusted_bloom_trie(&self, genesis: &Hash) -> Result<(u64, Hash, Hash), LookupError> {
        self.get(genesis)
            .map(|cp| (cp.section_index, cp.section_head, cp.bloom_trie_root))
            .ok_or(LookupError::NoTrustedBloomTrie)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Entries sorted by name.
    pub fn iter(&self) -> impl Iterator<Item = (&Hash, &TrustedCheckpoint)> {
        let mut all: Vec<_> = self.entries.iter().collect();
        all.sort_by(|a, b| a.1.name.cmp(&b.1.name));
        all.into_iter()
    }
}

/// Serde adapter writing hashes as `0x`-prefixed hex strings.
mod hex_hash {
    use serde::{de::Error, Deserialize, Deserializer, Serializer};

    use crate::crypto::hash::{hash_from_hex, hash_to_hex};
    use crate::types::Hash;

    pub fn serialize<S: Serializer>(hash: &Hash, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&format!("0x{}", hash_to_hex(hash)))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Hash, D::Error> {
        let s = String::deserialize(deserializer)?;
        hash_from_hex(&s).map_err(D::Error::custom)
    }
}
