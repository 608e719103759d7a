//! # Cryptographic Primitives
//!
//! Thin wrappers around BLAKE3. The indexer needs exactly one hash
//! function, used for header identities and trie node addressing.

pub mod hash;

pub use hash::{blake3_hash, blake3_hash_multi, hash_from_hex, hash_to_hex};
