// Copyright (c) 2026 Light Index Developers. MIT License.
// See LICENSE for details.

//! # Light Index: Helper Tries for Light Clients
//!
//! A light client cannot afford to download and verify every header it
//! might later need to reason about. Instead, servers build two Merkle
//! indexes over confirmed, fixed-size "sections" of the canonical chain and
//! commit to them by root hash:
//!
//! - the **Canonical Hash Trie (CHT)** maps a block number to the block's
//!   hash and total difficulty;
//! - the **Bloom Trie** maps a (bloom bit, section) pair to a compressed
//!   bitmap telling which headers in the section have that bloom bit set.
//!
//! Given a trusted root, a client can ask any server for a Merkle proof of
//! one entry and check it locally.
//!
//! ## Architecture
//!
//! - **keys**: Byte-exact key schema for root records and trie leaves.
//! - **config**: Section sizes, confirmation depths, indexer modes.
//! - **types**: Headers and 2048-bit log blooms.
//! - **storage**: Key-value stores (sled, in-memory), chain store, roots.
//! - **trie**: Merkle Patricia trie with content-addressed nodes.
//! - **bitutil**: Sparse bitmap compression used for bloom bit-planes.
//! - **indexer**: The section driver and its three backends.
//! - **checkpoint**: Hardcoded trust anchors per chain.
//!
//! ## Lifecycle
//!
//! ```text
//! reset(section, prior_head) → process(header) × section_size → commit()
//! ```
//!
//! Nothing is externally visible until `commit()` writes trie nodes and the
//! root record in a single atomic batch.

pub mod bitutil;
pub mod checkpoint;
pub mod config;
pub mod crypto;
pub mod error;
pub mod indexer;
pub mod keys;
pub mod storage;
pub mod trie;
pub mod types;

pub use checkpoint::{CheckpointTable, TrustedCheckpoint};
pub use config::{IndexMode, IndexerConfig};
pub use error::{ChainCorruption, IndexError, IndexResult, LookupError};
pub use indexer::{SectionBackend, SectionIndexer};
pub use types::{Bloom, Hash, Header, ZERO_HASH};
