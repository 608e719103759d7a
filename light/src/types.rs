//! # Headers and Log Blooms
//!
//! The indexers only look at a handful of header fields: the number, the
//! hash, the parent link and the log bloom. Everything else is carried so
//! that a header's hash commits to a realistic payload.
//!
//! ## Hash Computation
//!
//! The header hash is BLAKE3 over
//! `parent_hash || number || len(difficulty) || difficulty || timestamp
//! || logs_bloom || len(extra) || extra`, with integers big-endian and
//! lengths as `u32`. It is computed on demand and never stored inside the
//! header itself.

use std::fmt;

use num_bigint::BigUint;
use serde::de::{self, SeqAccess, Visitor};
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::config::{BLOOM_BIT_LENGTH, BLOOM_BYTE_LENGTH};
use crate::crypto::hash::{blake3_hash, blake3_hash_multi};

/// A 32-byte content hash.
pub type Hash = [u8; 32];

/// The all-zero hash. Doubles as the root of an empty trie and as the
/// "previous section head" of section 0.
pub const ZERO_HASH: Hash = [0u8; 32];

// ---------------------------------------------------------------------------
// Bloom
// ---------------------------------------------------------------------------

/// A 2048-bit log bloom filter.
///
/// Bit `i` lives in byte `255 - i / 8` under mask `1 << (i % 8)`, i.e. bit 0
/// is the least significant bit of the last byte.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct Bloom(pub [u8; BLOOM_BYTE_LENGTH]);

impl Bloom {
    /// The empty bloom: no bits set.
    pub const fn zero() -> Self {
        Bloom([0u8; BLOOM_BYTE_LENGTH])
    }

    /// Set bit `index` (0..2048).
    pub fn set_bit(&mut self, index: usize) {
        debug_assert!(index < BLOOM_BIT_LENGTH);
        self.0[BLOOM_BYTE_LENGTH - 1 - index / 8] |= 1 << (index % 8);
    }

    /// Whether bit `index` (0..2048) is set.
    pub fn bit(&self, index: usize) -> bool {
        self.0[BLOOM_BYTE_LENGTH - 1 - index / 8] & (1 << (index % 8)) != 0
    }

    /// Add an item (a log address or topic) to the filter. Three bit
    /// positions are taken from the first six bytes of its BLAKE3 hash.
    pub fn accrue(&mut self, input: &[u8]) {
        for index in Self::bit_positions(input) {
            self.set_bit(index);
        }
    }

    /// Whether every bit `input` would set is already set.
    pub fn contains_input(&self, input: &[u8]) -> bool {
        Self::bit_positions(input)
            .into_iter()
            .all(|index| self.bit(index))
    }

    fn bit_positions(input: &[u8]) -> [usize; 3] {
        let hash = blake3_hash(input);
        let mut positions = [0usize; 3];
        for (i, position) in positions.iter_mut().enumerate() {
            let pair = u16::from_be_bytes([hash[2 * i], hash[2 * i + 1]]);
            *position = (pair as usize) & (BLOOM_BIT_LENGTH - 1);
        }
        positions
    }

    pub fn is_zero(&self) -> bool {
        self.0.iter().all(|b| *b == 0)
    }
}

impl Default for Bloom {
    fn default() -> Self {
        Self::zero()
    }
}

impl fmt::Debug for Bloom {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Bloom({})", hex::encode(self.0))
    }
}

impl Serialize for Bloom {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_bytes(&self.0)
    }
}

impl<'de> Deserialize<'de> for Bloom {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct BloomVisitor;

        impl<'de> Visitor<'de> for BloomVisitor {
            type Value = Bloom;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{BLOOM_BYTE_LENGTH} bloom bytes")
            }

            fn visit_bytes<E: de::Error>(self, v: &[u8]) -> Result<Bloom, E> {
                let bytes: [u8; BLOOM_BYTE_LENGTH] = v
                    .try_into()
                    .map_err(|_| E::invalid_length(v.len(), &self))?;
                Ok(Bloom(bytes))
            }

            fn visit_seq<A: SeqAccess<'de>>(self, mut seq: A) -> Result<Bloom, A::Error> {
                let mut bytes = [0u8; BLOOM_BYTE_LENGTH];
                for (i, byte) in bytes.iter_mut().enumerate() {
                    *byte = seq
                        .next_element()?
                        .ok_or_else(|| de::Error::invalid_length(i, &self))?;
                }
                Ok(Bloom(bytes))
            }
        }

        deserializer.deserialize_bytes(BloomVisitor)
    }
}

// ---------------------------------------------------------------------------
// Header
// ---------------------------------------------------------------------------

/// A block header as seen by the indexers.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Header {
    /// Hash of the parent header. All zeros for genesis.
    pub parent_hash: Hash,
    /// Block number (genesis = 0).
    pub number: u64,
    /// Proof-of-work difficulty of this block alone.
    pub difficulty: BigUint,
    /// Unix timestamp in seconds.
    pub timestamp: u64,
    /// Union of the blooms of every log emitted in this block.
    pub logs_bloom: Bloom,
    /// Free-form extra data.
    pub extra: Vec<u8>,
}

impl Header {
    /// Compute the header hash. See the module docs for the preimage layout.
    pub fn hash(&self) -> Hash {
        let difficulty = self.difficulty.to_bytes_be();
        blake3_hash_multi(&[
            &self.parent_hash,
            &self.number.to_be_bytes(),
            &(difficulty.len() as u32).to_be_bytes(),
            &difficulty,
            &self.timestamp.to_be_bytes(),
            &self.logs_bloom.0,
            &(self.extra.len() as u32).to_be_bytes(),
            &self.extra,
        ])
    }

    /// Construct a child of `parent` with the given difficulty and bloom.
    pub fn child_of(parent: &Header, difficulty: BigUint, logs_bloom: Bloom) -> Self {
        Header {
            parent_hash: parent.hash(),
            number: parent.number + 1,
            difficulty,
            timestamp: parent.timestamp + 15,
            logs_bloom,
            extra: Vec::new(),
        }
    }

    /// Return the header hash as a hex string.
    pub fn hash_hex(&self) -> String {
        hex::encode(self.hash())
    }
}
