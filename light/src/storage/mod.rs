//! # Storage Module
//!
//! Persistence for the indexers: the chain they read, the trie nodes they
//! write and the root records they publish.
//!
//! ## Architecture
//!
//! ```text
//! kv.rs    : KeyValueStore trait, WriteBatch, MemoryStore, prefixed Table
//! db.rs    : sled-backed IndexDb
//! chain.rs : ChainStore read trait and the ChainDb implementation
//! roots.rs : CHT / Bloom Trie root records and checkpoint installation
//! ```
//!
//! ## Keyspace
//!
//! One physical store holds everything. Logical tables are separated by
//! prefix: `cht-` and `blt-` for trie nodes, `chtRoot-` and `bltRoot-` for
//! root records, `*Index-` for driver progress, and single-letter prefixes
//! for chain data.

pub mod chain;
pub mod db;
pub mod kv;
pub mod roots;

pub use chain::{ChainDb, ChainStore};
pub use db::IndexDb;
pub use kv::{
    BatchOp, KeyValueStore, MemoryStore, SharedStore, StorageError, StorageResult, Table,
    WriteBatch,
};
