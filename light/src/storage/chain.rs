//! # Chain Store
//!
//! The indexers read headers, total difficulties and bloom bit-planes from
//! the header chain. [`ChainStore`] is the read side they depend on;
//! [`ChainDb`] implements it over any [`KeyValueStore`] and also offers the
//! writers used by header sync and by the bloom-bits indexer.
//!
//! ## Key Layout
//!
//! | Key                                   | Value                       |
//! |---------------------------------------|-----------------------------|
//! | `h ‖ u64(num) ‖ hash`                 | `bincode(Header)`           |
//! | `h ‖ u64(num) ‖ hash ‖ t`             | total difficulty (BE bytes) |
//! | `h ‖ u64(num) ‖ n`                    | canonical hash              |
//! | `H ‖ hash`                            | `u64(num)`                  |
//! | `B ‖ u16(bit) ‖ u64(section) ‖ head`  | compressed bit-plane        |
//! | `LastHeader`                          | head header hash            |

use num_bigint::BigUint;

use super::kv::{KeyValueStore, SharedStore, StorageError, StorageResult, WriteBatch};
use crate::error::LookupError;
use crate::types::{Hash, Header};

const HEADER_PREFIX: &[u8] = b"h";
const TD_SUFFIX: &[u8] = b"t";
const CANONICAL_SUFFIX: &[u8] = b"n";
const HEADER_NUMBER_PREFIX: &[u8] = b"H";
const BLOOM_BITS_PREFIX: &[u8] = b"B";
const HEAD_HEADER_KEY: &[u8] = b"LastHeader";

fn header_key(number: u64, hash: &Hash) -> Vec<u8> {
    let mut key = Vec::with_capacity(1 + 8 + 32);
    key.extend_from_slice(HEADER_PREFIX);
    key.extend_from_slice(&number.to_be_bytes());
    key.extend_from_slice(hash);
    key
}

fn td_key(number: u64, hash: &Hash) -> Vec<u8> {
    let mut key = header_key(number, hash);
    key.extend_from_slice(TD_SUFFIX);
    key
}

fn canonical_key(number: u64) -> Vec<u8> {
    let mut key = Vec::with_capacity(1 + 8 + 1);
    key.extend_from_slice(HEADER_PREFIX);
    key.extend_from_slice(&number.to_be_bytes());
    key.extend_from_slice(CANONICAL_SUFFIX);
    key
}

fn header_number_key(hash: &Hash) -> Vec<u8> {
    let mut key = Vec::with_capacity(1 + 32);
    key.extend_from_slice(HEADER_NUMBER_PREFIX);
    key.extend_from_slice(hash);
    key
}

/// `B ‖ be_u16(bit) ‖ be_u64(section) ‖ head`
pub fn bloom_bits_key(bit: u16, section: u64, head: &Hash) -> Vec<u8> {
    let mut key = Vec::with_capacity(1 + 2 + 8 + 32);
    key.extend_from_slice(BLOOM_BITS_PREFIX);
    key.extend_from_slice(&bit.to_be_bytes());
    key.extend_from_slice(&section.to_be_bytes());
    key.extend_from_slice(head);
    key
}

fn decode_hash(key: &[u8], bytes: Vec<u8>) -> StorageResult<Hash> {
    bytes
        .try_into()
        .map_err(|_| StorageError::corrupted(key, "expected 32-byte hash"))
}

/// Read access to the header chain, as needed by the indexers.
pub trait ChainStore: Send + Sync {
    /// Hash of the canonical header at `number`.
    fn canonical_hash(&self, number: u64) -> StorageResult<Option<Hash>>;

    fn header(&self, hash: &Hash, number: u64) -> StorageResult<Option<Header>>;

    /// Total difficulty of the chain up to and including the given header.
    fn total_difficulty(&self, hash: &Hash, number: u64) -> StorageResult<Option<BigUint>>;

    /// Compressed bit-plane of `bit` for a bloom-bits section.
    fn bloom_bits(&self, bit: u16, section: u64, head: &Hash) -> StorageResult<Option<Vec<u8>>>;

    /// The current head of the header chain.
    fn head_header(&self) -> StorageResult<Option<Header>>;

    /// Canonical header at `number`.
    fn header_by_number(&self, number: u64) -> StorageResult<Option<Header>> {
        match self.canonical_hash(number)? {
            Some(hash) => self.header(&hash, number),
            None => Ok(None),
        }
    }
}

/// [`ChainStore`] over a shared key-value store.
#[derive(Clone)]
pub struct ChainDb {
    store: SharedStore,
}

impl ChainDb {
    pub fn new(store: SharedStore) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &SharedStore {
        &self.store
    }

    /// Canonical header at `number`. [`LookupError::HeaderNotFound`] only
    /// when the header is absent; store failures are [`LookupError::Storage`].
    pub fn require_header(&self, number: u64) -> Result<Header, LookupError> {
        self.header_by_number(number)?
            .ok_or(LookupError::HeaderNotFound)
    }

    /// Number of the header with the given hash.
    pub fn header_number(&self, hash: &Hash) -> StorageResult<Option<u64>> {
        let key = header_number_key(hash);
        match self.store.get(&key)? {
            Some(bytes) => {
                let raw: [u8; 8] = bytes
                    .as_slice()
                    .try_into()
                    .map_err(|_| StorageError::corrupted(&key, "expected 8-byte number"))?;
                Ok(Some(u64::from_be_bytes(raw)))
            }
            None => Ok(None),
        }
    }

    // -- Writers ------------------------------------------------------------

    /// Queue a header and its hash → number mapping.
    pub fn batch_header(&self, batch: &mut WriteBatch, header: &Header) -> StorageResult<()> {
        let hash = header.hash();
        batch.put(header_key(header.number, &hash), bincode::serialize(header)?);
        batch.put(header_number_key(&hash), header.number.to_be_bytes().to_vec());
        Ok(())
    }

    pub fn batch_total_difficulty(
        &self,
        batch: &mut WriteBatch,
        hash: &Hash,
        number: u64,
        td: &BigUint,
    ) {
        batch.put(td_key(number, hash), td.to_bytes_be());
    }

    pub fn batch_canonical_hash(&self, batch: &mut WriteBatch, number: u64, hash: &Hash) {
        batch.put(canonical_key(number), hash.to_vec());
    }

    pub fn batch_bloom_bits(
        &self,
        batch: &mut WriteBatch,
        bit: u16,
        section: u64,
        head: &Hash,
        bits: Vec<u8>,
    ) {
        batch.put(bloom_bits_key(bit, section, head), bits);
    }

    /// Write a header as the new canonical head, with its total difficulty,
    /// in one atomic batch. `td = None` stores the header without one.
    pub fn insert_canonical(&self, header: &Header, td: Option<&BigUint>) -> StorageResult<()> {
        let hash = header.hash();
        let mut batch = WriteBatch::new();
        self.batch_header(&mut batch, header)?;
        if let Some(td) = td {
            self.batch_total_difficulty(&mut batch, &hash, header.number, td);
        }
        self.batch_canonical_hash(&mut batch, header.number, &hash);
        batch.put(HEAD_HEADER_KEY.to_vec(), hash.to_vec());
        self.store.write(batch)
    }

    pub fn write_bloom_bits(
        &self,
        bit: u16,
        section: u64,
        head: &Hash,
        bits: &[u8],
    ) -> StorageResult<()> {
        self.store.put(&bloom_bits_key(bit, section, head), bits)
    }
}

impl ChainStore for ChainDb {
    fn canonical_hash(&self, number: u64) -> StorageResult<Option<Hash>> {
        let key = canonical_key(number);
        self.store
            .get(&key)?
            .map(|bytes| decode_hash(&key, bytes))
            .transpose()
    }

    fn header(&self, hash: &Hash, number: u64) -> StorageResult<Option<Header>> {
        match self.store.get(&header_key(number, hash))? {
            Some(bytes) => Ok(Some(bincode::deserialize(&bytes)?)),
            None => Ok(None),
        }
    }

    fn total_difficulty(&self, hash: &Hash, number: u64) -> StorageResult<Option<BigUint>> {
        Ok(self
            .store
            .get(&td_key(number, hash))?
            .map(|bytes| BigUint::from_bytes_be(&bytes)))
    }

    fn bloom_bits(&self, bit: u16, section: u64, head: &Hash) -> StorageResult<Option<Vec<u8>>> {
        self.store.get(&bloom_bits_key(bit, section, head))
    }

    fn head_header(&self) -> StorageResult<Option<Header>> {
        let hash = match self.store.get(HEAD_HEADER_KEY)? {
            Some(bytes) => decode_hash(HEAD_HEADER_KEY, bytes)?,
            None => return Ok(None),
        };
        match self.header_number(&hash)? {
            Some(number) => self.header(&hash, number),
            None => Ok(None),
        }
    }
}
