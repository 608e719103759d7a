//! # Key Schema
//!
//! Byte-exact keys for everything the indexers persist. All integers are
//! big-endian so that the store's lexicographic order matches numeric
//! order and range scans over sections work naturally.
//!
//! | Key                                       | Width      | Value             |
//! |-------------------------------------------|------------|-------------------|
//! | `"chtRoot-" ‖ u64(section) ‖ head`        | 8 + 40 B   | CHT root          |
//! | `"bltRoot-" ‖ u64(section) ‖ head`        | 8 + 40 B   | Bloom Trie root   |
//! | `u16(bit) ‖ u64(section)` (trie key)      | 10 B       | compressed bitmap |
//! | `u64(number)` (trie key)                  | 8 B        | `{hash, td}`      |

use crate::types::Hash;

/// Prefix of CHT root records in the main database.
pub const CHT_ROOT_PREFIX: &[u8] = b"chtRoot-";

/// Prefix of Bloom Trie root records in the main database.
pub const BLOOM_TRIE_ROOT_PREFIX: &[u8] = b"bltRoot-";

/// Table holding CHT trie nodes.
pub const CHT_TABLE_PREFIX: &[u8] = b"cht-";

/// Table holding Bloom Trie nodes.
pub const BLOOM_TRIE_TABLE_PREFIX: &[u8] = b"blt-";

/// Driver progress tables, one per indexer.
pub const CHT_INDEX_PREFIX: &[u8] = b"chtIndex-";
pub const BLOOM_TRIE_INDEX_PREFIX: &[u8] = b"bltIndex-";
pub const BLOOM_BITS_INDEX_PREFIX: &[u8] = b"bbIndex-";

fn section_record_key(prefix: &[u8], section: u64, head: &Hash) -> Vec<u8> {
    let mut key = Vec::with_capacity(prefix.len() + 8 + 32);
    key.extend_from_slice(prefix);
    key.extend_from_slice(&section.to_be_bytes());
    key.extend_from_slice(head);
    key
}

/// `CHT_ROOT_PREFIX ‖ be_u64(section) ‖ section_head`
pub fn cht_root_key(section: u64, section_head: &Hash) -> Vec<u8> {
    section_record_key(CHT_ROOT_PREFIX, section, section_head)
}

/// `BLOOM_TRIE_ROOT_PREFIX ‖ be_u64(section) ‖ section_head`
pub fn bloom_trie_root_key(section: u64, section_head: &Hash) -> Vec<u8> {
    section_record_key(BLOOM_TRIE_ROOT_PREFIX, section, section_head)
}

/// Bloom Trie leaf key: `be_u16(bit) ‖ be_u64(section)`.
pub fn bloom_bit_key(bit: u16, section: u64) -> [u8; 10] {
    let mut key = [0u8; 10];
    key[0..2].copy_from_slice(&bit.to_be_bytes());
    key[2..10].copy_from_slice(&section.to_be_bytes());
    key
}

/// CHT leaf key: `be_u64(number)`.
pub fn cht_leaf_key(number: u64) -> [u8; 8] {
    number.to_be_bytes()
}
