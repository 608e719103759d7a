//! # Merkle Patricia Trie
//!
//! A hex-nibble Patricia trie whose nodes are content addressed: a node is
//! stored under the BLAKE3 hash of its encoding, so the root hash commits
//! to every key and value below it.
//!
//! ## Node shapes
//!
//! ```text
//! Leaf      : remaining nibbles + value
//! Extension : shared nibbles + one child (always a branch)
//! Branch    : 16 children + optional value
//! ```
//!
//! The shape is canonical: inserting and deleting keep the trie in the one
//! form its key set admits, so the root hash depends only on the final
//! contents and never on the order of updates.
//!
//! ## Persistence
//!
//! Updates only touch memory. [`Trie::commit`] encodes every dirty node
//! into a caller-supplied [`WriteBatch`] and returns the new root; the
//! caller decides when (and together with what) the batch is written.
//! The empty trie has root [`ZERO_HASH`] and no stored nodes.

mod node;

use thiserror::Error;

use crate::storage::{KeyValueStore, StorageError, WriteBatch};
use crate::types::{Hash, ZERO_HASH};
use node::{
    common_prefix_len, decode_node, empty_children, encode_node, hash_ref, key_to_nibbles,
    Children, Node, NodeRef, NodeSink,
};

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

#[derive(Debug, Error)]
pub enum TrieError {
    /// A node referenced by hash is not in the node store.
    #[error("missing trie node {}", hex::encode(.0))]
    MissingNode(Hash),

    #[error("undecodable trie node {}: {reason}", hex::encode(.hash))]
    Decode { hash: Hash, reason: String },

    #[error("trie node encoding failed: {0}")]
    Encode(String),

    #[error("node store: {0}")]
    Storage(#[from] StorageError),
}

pub type TrieResult<T> = Result<T, TrieError>;

// ---------------------------------------------------------------------------
// Trie
// ---------------------------------------------------------------------------

/// A trie over a node store `S`.
///
/// After any method returns an error the in-memory state is unspecified
/// and the trie should be dropped; committed state in the store is never
/// affected.
pub struct Trie<S: KeyValueStore> {
    store: S,
    root: Option<NodeRef>,
}

impl<S: KeyValueStore> Trie<S> {
    /// An empty trie over `store`.
    pub fn empty(store: S) -> Self {
        Self { store, root: None }
    }

    /// Open the trie rooted at `root`. [`ZERO_HASH`] opens an empty trie;
    /// any other root must have its node present in `store`.
    pub fn new(root: Hash, store: S) -> TrieResult<Self> {
        if root == ZERO_HASH {
            return Ok(Self::empty(store));
        }
        let bytes = store.get(&root)?.ok_or(TrieError::MissingNode(root))?;
        decode_node(&root, &bytes)?;
        Ok(Self {
            store,
            root: Some(NodeRef::Hash(root)),
        })
    }

    pub fn is_empty(&self) -> bool {
        self.root.is_none()
    }

    /// The node store this trie reads from.
    pub fn store(&self) -> &S {
        &self.store
    }

    fn load(&self, hash: &Hash) -> TrieResult<Node> {
        let bytes = self
            .store
            .get(hash)?
            .ok_or(TrieError::MissingNode(*hash))?;
        decode_node(hash, &bytes)
    }

    fn resolve(&self, node_ref: NodeRef) -> TrieResult<Node> {
        match node_ref {
            NodeRef::Node(node) => Ok(*node),
            NodeRef::Hash(hash) => self.load(&hash),
        }
    }

    // ----- Reads -----

    /// Value stored under `key`, if any.
    pub fn get(&self, key: &[u8]) -> TrieResult<Option<Vec<u8>>> {
        match &self.root {
            None => Ok(None),
            Some(root) => self.get_at(root, &key_to_nibbles(key)),
        }
    }

    fn get_at(&self, node_ref: &NodeRef, path: &[u8]) -> TrieResult<Option<Vec<u8>>> {
        let loaded;
        let node = match node_ref {
            NodeRef::Node(node) => node.as_ref(),
            NodeRef::Hash(hash) => {
                loaded = self.load(hash)?;
                &loaded
            }
        };
        match node {
            Node::Leaf { path: rest, value } => {
                Ok((rest.as_slice() == path).then(|| value.clone()))
            }
            Node::Extension { path: shared, child } => {
                if path.starts_with(shared) {
                    self.get_at(child, &path[shared.len()..])
                } else {
                    Ok(None)
                }
            }
            Node::Branch { children, value } => match path.split_first() {
                None => Ok(value.clone()),
                Some((nibble, rest)) => match &children[*nibble as usize] {
                    Some(child) => self.get_at(child, rest),
                    None => Ok(None),
                },
            },
        }
    }

    /// Encoded nodes on the path from the root towards `key`, root first.
    ///
    /// For a present key the last node holds its value; for an absent key
    /// the path shows where the lookup diverges.
    pub fn prove(&self, key: &[u8]) -> TrieResult<Vec<Vec<u8>>> {
        let mut proof = Vec::new();
        if let Some(root) = &self.root {
            self.prove_at(root, &key_to_nibbles(key), &mut proof)?;
        }
        Ok(proof)
    }

    fn prove_at(&self, node_ref: &NodeRef, path: &[u8], proof: &mut Vec<Vec<u8>>) -> TrieResult<()> {
        let loaded;
        let node = match node_ref {
            NodeRef::Node(node) => {
                proof.push(encode_node(node, &mut NodeSink::new())?);
                node.as_ref()
            }
            NodeRef::Hash(hash) => {
                let bytes = self
                    .store
                    .get(hash)?
                    .ok_or(TrieError::MissingNode(*hash))?;
                loaded = decode_node(hash, &bytes)?;
                proof.push(bytes);
                &loaded
            }
        };
        match node {
            Node::Leaf { .. } => Ok(()),
            Node::Extension { path: shared, child } if path.starts_with(shared) => {
                self.prove_at(child, &path[shared.len()..], proof)
            }
            Node::Extension { .. } => Ok(()),
            Node::Branch { children, .. } => match path.split_first() {
                Some((nibble, rest)) => match &children[*nibble as usize] {
                    Some(child) => self.prove_at(child, rest, proof),
                    None => Ok(()),
                },
                None => Ok(()),
            },
        }
    }

    // ----- Writes -----

    /// Insert or replace the value under `key`. An empty value deletes.
    pub fn update(&mut self, key: &[u8], value: &[u8]) -> TrieResult<()> {
        if value.is_empty() {
            return self.delete(key);
        }
        let root = self.root.take();
        let node = self.insert_at(root, &key_to_nibbles(key), value.to_vec())?;
        self.root = Some(NodeRef::boxed(node));
        Ok(())
    }

    /// Remove `key`. Deleting an absent key leaves the trie untouched.
    pub fn delete(&mut self, key: &[u8]) -> TrieResult<()> {
        if self.get(key)?.is_none() {
            return Ok(());
        }
        if let Some(root) = self.root.take() {
            self.root = self
                .delete_at(root, &key_to_nibbles(key))?
                .map(NodeRef::boxed);
        }
        Ok(())
    }

    fn insert_at(&self, node_ref: Option<NodeRef>, path: &[u8], value: Vec<u8>) -> TrieResult<Node> {
        let node = match node_ref {
            None => {
                return Ok(Node::Leaf {
                    path: path.to_vec(),
                    value,
                })
            }
            Some(node_ref) => self.resolve(node_ref)?,
        };

        match node {
            Node::Leaf {
                path: leaf_path,
                value: leaf_value,
            } => {
                let shared = common_prefix_len(&leaf_path, path);
                if shared == leaf_path.len() && shared == path.len() {
                    return Ok(Node::Leaf {
                        path: leaf_path,
                        value,
                    });
                }
                let mut children = empty_children();
                let mut branch_value = None;
                place(&mut children, &mut branch_value, &leaf_path[shared..], leaf_value);
                place(&mut children, &mut branch_value, &path[shared..], value);
                Ok(with_extension(
                    &path[..shared],
                    Node::Branch {
                        children,
                        value: branch_value,
                    },
                ))
            }
            Node::Extension {
                path: ext_path,
                child,
            } => {
                let shared = common_prefix_len(&ext_path, path);
                if shared == ext_path.len() {
                    let child = self.insert_at(Some(child), &path[shared..], value)?;
                    return Ok(Node::Extension {
                        path: ext_path,
                        child: NodeRef::boxed(child),
                    });
                }
                // Split the extension at the first differing nibble.
                let mut children = empty_children();
                let mut branch_value = None;
                let tail = &ext_path[shared + 1..];
                children[ext_path[shared] as usize] = Some(if tail.is_empty() {
                    child
                } else {
                    NodeRef::boxed(Node::Extension {
                        path: tail.to_vec(),
                        child,
                    })
                });
                place(&mut children, &mut branch_value, &path[shared..], value);
                Ok(with_extension(
                    &path[..shared],
                    Node::Branch {
                        children,
                        value: branch_value,
                    },
                ))
            }
            Node::Branch {
                mut children,
                value: branch_value,
            } => match path.split_first() {
                None => Ok(Node::Branch {
                    children,
                    value: Some(value),
                }),
                Some((nibble, rest)) => {
                    let slot = *nibble as usize;
                    let child = self.insert_at(children[slot].take(), rest, value)?;
                    children[slot] = Some(NodeRef::boxed(child));
                    Ok(Node::Branch {
                        children,
                        value: branch_value,
                    })
                }
            },
        }
    }

    /// Delete a key known to be present below `node_ref`. Returns the
    /// replacement node, or `None` when the subtree becomes empty.
    fn delete_at(&self, node_ref: NodeRef, path: &[u8]) -> TrieResult<Option<Node>> {
        match self.resolve(node_ref)? {
            Node::Leaf { .. } => Ok(None),
            Node::Extension {
                path: ext_path,
                child,
            } => {
                let rest = &path[ext_path.len()..];
                match self.delete_at(child, rest)? {
                    None => Ok(None),
                    Some(child) => Ok(Some(prepend(ext_path, child))),
                }
            }
            Node::Branch {
                mut children,
                mut value,
            } => {
                match path.split_first() {
                    None => value = None,
                    Some((nibble, rest)) => {
                        let slot = *nibble as usize;
                        if let Some(child) = children[slot].take() {
                            children[slot] = self.delete_at(child, rest)?.map(NodeRef::boxed);
                        }
                    }
                }
                self.collapse(children, value)
            }
        }
    }

    /// Restore canonical shape for a branch that may have lost a child.
    fn collapse(&self, mut children: Box<Children>, value: Option<Vec<u8>>) -> TrieResult<Option<Node>> {
        let live = children.iter().filter(|c| c.is_some()).count();
        match (live, value) {
            (0, None) => Ok(None),
            (0, Some(value)) => Ok(Some(Node::Leaf {
                path: Vec::new(),
                value,
            })),
            (1, None) => {
                let only = children
                    .iter_mut()
                    .enumerate()
                    .find_map(|(slot, child)| child.take().map(|c| (slot, c)));
                match only {
                    Some((slot, child)) => {
                        let child = self.resolve(child)?;
                        Ok(Some(prepend(vec![slot as u8], child)))
                    }
                    None => Ok(None),
                }
            }
            (_, value) => Ok(Some(Node::Branch { children, value })),
        }
    }

    // ----- Hashing -----

    /// Root hash of the current contents, without persisting anything.
    pub fn hash(&self) -> TrieResult<Hash> {
        match &self.root {
            None => Ok(ZERO_HASH),
            Some(root) => hash_ref(root, &mut NodeSink::new()),
        }
    }

    /// Queue every node modified since the last commit into `batch` and
    /// return the new root. The trie keeps working from the committed root.
    pub fn commit(&mut self, batch: &mut WriteBatch) -> TrieResult<Hash> {
        let Some(root) = &self.root else {
            return Ok(ZERO_HASH);
        };
        let mut sink = NodeSink::new();
        let hash = hash_ref(root, &mut sink)?;
        for (node_hash, bytes) in sink {
            batch.put(node_hash.to_vec(), bytes);
        }
        self.root = Some(NodeRef::Hash(hash));
        Ok(hash)
    }
}

impl<S: KeyValueStore> std::fmt::Debug for Trie<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let root = match &self.root {
            None => "empty",
            Some(NodeRef::Hash(_)) => "committed",
            Some(NodeRef::Node(_)) => "dirty",
        };
        f.debug_struct("Trie").field("root", &root).finish()
    }
}

/// Put a value under `rest` in a branch being assembled.
fn place(children: &mut Children, branch_value: &mut Option<Vec<u8>>, rest: &[u8], value: Vec<u8>) {
    match rest.split_first() {
        None => *branch_value = Some(value),
        Some((nibble, tail)) => {
            children[*nibble as usize] = Some(NodeRef::boxed(Node::Leaf {
                path: tail.to_vec(),
                value,
            }))
        }
    }
}

fn with_extension(prefix: &[u8], branch: Node) -> Node {
    if prefix.is_empty() {
        branch
    } else {
        Node::Extension {
            path: prefix.to_vec(),
            child: NodeRef::boxed(branch),
        }
    }
}

/// Glue `prefix` in front of `node`, merging with leaf and extension paths.
fn prepend(mut prefix: Vec<u8>, node: Node) -> Node {
    match node {
        Node::Leaf { path, value } => {
            prefix.extend_from_slice(&path);
            Node::Leaf {
                path: prefix,
                value,
            }
        }
        Node::Extension { path, child } => {
            prefix.extend_from_slice(&path);
            Node::Extension {
                path: prefix,
                child,
            }
        }
        branch @ Node::Branch { .. } => Node::Extension {
            path: prefix,
            child: NodeRef::boxed(branch),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::hash::blake3_hash;
    use crate::storage::MemoryStore;
    use std::sync::Arc;

    fn entries() -> Vec<(Vec<u8>, Vec<u8>)> {
        (0u64..40)
            .map(|i| ((i * 37).to_be_bytes().to_vec(), format!("value-{i}").into_bytes()))
            .collect()
    }

    fn build(entries: &[(Vec<u8>, Vec<u8>)]) -> Trie<MemoryStore> {
        let mut trie = Trie::empty(MemoryStore::new());
        for (k, v) in entries {
            trie.update(k, v).unwrap();
        }
        trie
    }

    #[test]
    fn empty_trie_has_zero_root() {
        let trie = Trie::empty(MemoryStore::new());
        assert_eq!(trie.hash().unwrap(), ZERO_HASH);
        assert!(trie.get(b"anything").unwrap().is_none());
        assert!(trie.prove(b"anything").unwrap().is_empty());
    }

    #[test]
    fn get_returns_what_was_inserted() {
        let entries = entries();
        let trie = build(&entries);
        for (k, v) in &entries {
            assert_eq!(trie.get(k).unwrap().as_deref(), Some(v.as_slice()));
        }
        assert!(trie.get(&999_999u64.to_be_bytes()).unwrap().is_none());
    }

    #[test]
    fn update_replaces_value() {
        let mut trie = build(&entries());
        let key = 37u64.to_be_bytes();
        trie.update(&key, b"replaced").unwrap();
        assert_eq!(trie.get(&key).unwrap(), Some(b"replaced".to_vec()));
    }

    #[test]
    fn root_is_independent_of_insertion_order() {
        let entries = entries();
        let forward = build(&entries);
        let mut reversed = entries.clone();
        reversed.reverse();
        let backward = build(&reversed);
        assert_eq!(forward.hash().unwrap(), backward.hash().unwrap());
    }

    #[test]
    fn delete_restores_previous_root() {
        let entries = entries();
        let base = build(&entries[..30]);
        let mut trie = build(&entries);
        for (k, _) in &entries[30..] {
            trie.delete(k).unwrap();
        }
        assert_eq!(trie.hash().unwrap(), base.hash().unwrap());
    }

    #[test]
    fn deleting_everything_empties_the_trie() {
        let entries = entries();
        let mut trie = build(&entries);
        for (k, _) in &entries {
            trie.delete(k).unwrap();
        }
        assert!(trie.is_empty());
        assert_eq!(trie.hash().unwrap(), ZERO_HASH);
    }

    #[test]
    fn deleting_absent_key_is_a_no_op() {
        let mut trie = build(&entries());
        let before = trie.hash().unwrap();
        trie.delete(&5u64.to_be_bytes()).unwrap();
        assert_eq!(trie.hash().unwrap(), before);
    }

    #[test]
    fn empty_value_deletes() {
        let mut trie = build(&entries());
        let key = 74u64.to_be_bytes();
        trie.update(&key, &[]).unwrap();
        assert!(trie.get(&key).unwrap().is_none());
    }

    #[test]
    fn prefix_keys_coexist() {
        let mut trie = Trie::empty(MemoryStore::new());
        trie.update(&[0x12], b"short").unwrap();
        trie.update(&[0x12, 0x34], b"long").unwrap();
        assert_eq!(trie.get(&[0x12]).unwrap(), Some(b"short".to_vec()));
        assert_eq!(trie.get(&[0x12, 0x34]).unwrap(), Some(b"long".to_vec()));

        trie.delete(&[0x12]).unwrap();
        let mut only_long = Trie::empty(MemoryStore::new());
        only_long.update(&[0x12, 0x34], b"long").unwrap();
        assert_eq!(trie.hash().unwrap(), only_long.hash().unwrap());
    }

    #[test]
    fn commit_then_reopen() {
        let store = MemoryStore::shared();
        let entries = entries();
        let mut trie = Trie::empty(Arc::clone(&store));
        for (k, v) in &entries {
            trie.update(k, v).unwrap();
        }
        let expected = trie.hash().unwrap();
        let mut batch = WriteBatch::new();
        let root = trie.commit(&mut batch).unwrap();
        assert_eq!(root, expected);
        store.write(batch).unwrap();

        let reopened = Trie::new(root, Arc::clone(&store)).unwrap();
        for (k, v) in &entries {
            assert_eq!(reopened.get(k).unwrap().as_deref(), Some(v.as_slice()));
        }
    }

    #[test]
    fn second_commit_writes_only_dirty_nodes() {
        let store = MemoryStore::shared();
        let mut trie = Trie::empty(Arc::clone(&store));
        for (k, v) in entries() {
            trie.update(&k, &v).unwrap();
        }
        let mut batch = WriteBatch::new();
        trie.commit(&mut batch).unwrap();
        let first = batch.len();
        store.write(batch).unwrap();

        let mut batch = WriteBatch::new();
        trie.commit(&mut batch).unwrap();
        assert!(batch.is_empty());

        trie.update(&0u64.to_be_bytes(), b"changed").unwrap();
        let mut batch = WriteBatch::new();
        trie.commit(&mut batch).unwrap();
        assert!(!batch.is_empty());
        assert!(batch.len() < first);
    }

    #[test]
    fn opening_unknown_root_fails() {
        let err = Trie::new([0x42; 32], MemoryStore::new()).unwrap_err();
        assert!(matches!(err, TrieError::MissingNode(h) if h == [0x42; 32]));
    }

    #[test]
    fn missing_interior_node_surfaces_on_read() {
        let store = MemoryStore::shared();
        let mut trie = Trie::empty(Arc::clone(&store));
        for (k, v) in entries() {
            trie.update(&k, &v).unwrap();
        }
        let mut batch = WriteBatch::new();
        let root = trie.commit(&mut batch).unwrap();
        // Persist only the root node.
        let root_only: Vec<_> = batch
            .into_ops()
            .into_iter()
            .filter_map(|op| match op {
                crate::storage::BatchOp::Put { key, value } if key == root => Some(value),
                _ => None,
            })
            .collect();
        store.put(&root, &root_only[0]).unwrap();

        let reopened = Trie::new(root, store).unwrap();
        let err = reopened.get(&37u64.to_be_bytes()).unwrap_err();
        assert!(matches!(err, TrieError::MissingNode(_)));
    }

    #[test]
    fn proof_starts_at_root_and_ends_at_value() {
        let entries = entries();
        let mut trie = build(&entries);
        let (key, value) = &entries[7];
        let root = trie.hash().unwrap();

        let dirty_proof = trie.prove(key).unwrap();
        assert_eq!(blake3_hash(&dirty_proof[0]), root);

        let mut batch = WriteBatch::new();
        trie.commit(&mut batch).unwrap();
        trie.store().write(batch).unwrap();
        let proof = trie.prove(key).unwrap();
        assert_eq!(proof, dirty_proof);

        let last = proof.last().unwrap();
        match decode_node(&blake3_hash(last), last).unwrap() {
            Node::Leaf { value: v, .. } => assert_eq!(&v, value),
            other => panic!("proof should end at a leaf, got {other:?}"),
        }
    }
}
