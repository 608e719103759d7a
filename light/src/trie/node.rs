//! Trie nodes, their persisted encoding and nibble helpers.
//!
//! In memory a child is either a hash (not loaded yet) or an owned node
//! (loaded or modified since the last commit). On disk every child is a
//! hash: nodes are stored by the BLAKE3 hash of their bincode encoding.

use serde::{Deserialize, Serialize};

use super::{TrieError, TrieResult};
use crate::crypto::hash::blake3_hash;
use crate::types::Hash;

/// Reference from a parent to a child node.
#[derive(Clone, Debug)]
pub(crate) enum NodeRef {
    Hash(Hash),
    Node(Box<Node>),
}

impl NodeRef {
    pub(crate) fn boxed(node: Node) -> Self {
        NodeRef::Node(Box::new(node))
    }
}

pub(crate) type Children = [Option<NodeRef>; 16];

pub(crate) fn empty_children() -> Box<Children> {
    Box::new(std::array::from_fn(|_| None))
}

#[derive(Clone, Debug)]
pub(crate) enum Node {
    /// Remaining key nibbles and the value stored under the full key.
    Leaf { path: Vec<u8>, value: Vec<u8> },
    /// Shared nibbles followed by exactly one branch.
    Extension { path: Vec<u8>, child: NodeRef },
    /// Sixteen-way fork, plus the value of a key ending here.
    Branch {
        children: Box<Children>,
        value: Option<Vec<u8>>,
    },
}

/// The persisted form of a node.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub(crate) enum EncodedNode {
    Leaf {
        path: Vec<u8>,
        value: Vec<u8>,
    },
    Extension {
        path: Vec<u8>,
        child: Hash,
    },
    Branch {
        children: [Option<Hash>; 16],
        value: Option<Vec<u8>>,
    },
}

impl From<EncodedNode> for Node {
    fn from(encoded: EncodedNode) -> Self {
        match encoded {
            EncodedNode::Leaf { path, value } => Node::Leaf { path, value },
            EncodedNode::Extension { path, child } => Node::Extension {
                path,
                child: NodeRef::Hash(child),
            },
            EncodedNode::Branch { children, value } => {
                let mut refs = empty_children();
                for (slot, child) in refs.iter_mut().zip(children) {
                    *slot = child.map(NodeRef::Hash);
                }
                Node::Branch {
                    children: refs,
                    value,
                }
            }
        }
    }
}

/// Newly encoded nodes, collected during hashing so a commit can persist
/// them.
pub(crate) type NodeSink = Vec<(Hash, Vec<u8>)>;

/// Hash a child reference, encoding any in-memory subtree into `sink`.
pub(crate) fn hash_ref(node_ref: &NodeRef, sink: &mut NodeSink) -> TrieResult<Hash> {
    match node_ref {
        NodeRef::Hash(hash) => Ok(*hash),
        NodeRef::Node(node) => {
            let bytes = encode_node(node, sink)?;
            let hash = blake3_hash(&bytes);
            sink.push((hash, bytes));
            Ok(hash)
        }
    }
}

/// Encode one node. Its in-memory children are hashed (and pushed to
/// `sink`) first; the node itself is not.
pub(crate) fn encode_node(node: &Node, sink: &mut NodeSink) -> TrieResult<Vec<u8>> {
    let encoded = match node {
        Node::Leaf { path, value } => EncodedNode::Leaf {
            path: path.clone(),
            value: value.clone(),
        },
        Node::Extension { path, child } => EncodedNode::Extension {
            path: path.clone(),
            child: hash_ref(child, sink)?,
        },
        Node::Branch { children, value } => {
            let mut hashes = [None; 16];
            for (slot, child) in hashes.iter_mut().zip(children.iter()) {
                if let Some(child) = child {
                    *slot = Some(hash_ref(child, sink)?);
                }
            }
            EncodedNode::Branch {
                children: hashes,
                value: value.clone(),
            }
        }
    };
    bincode::serialize(&encoded).map_err(|e| TrieError::Encode(e.to_string()))
}

pub(crate) fn decode_node(hash: &Hash, bytes: &[u8]) -> TrieResult<Node> {
    let encoded: EncodedNode = bincode::deserialize(bytes).map_err(|e| TrieError::Decode {
        hash: *hash,
        reason: e.to_string(),
    })?;
    Ok(encoded.into())
}

/// Split each key byte into its high and low nibble.
pub(crate) fn key_to_nibbles(key: &[u8]) -> Vec<u8> {
    key.iter().flat_map(|b| [b >> 4, b & 0x0F]).collect()
}

pub(crate) fn common_prefix_len(a: &[u8], b: &[u8]) -> usize {
    a.iter().zip(b).take_while(|(x, y)| x == y).count()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn nibbles_split_high_then_low() {
        assert_eq!(key_to_nibbles(&[0xAB, 0x01]), vec![0xA, 0xB, 0x0, 0x1]);
        assert!(key_to_nibbles(&[]).is_empty());
    }

    #[test]
    fn prefix_length() {
        assert_eq!(common_prefix_len(&[1, 2, 3], &[1, 2, 4]), 2);
        assert_eq!(common_prefix_len(&[1, 2], &[1, 2, 4]), 2);
        assert_eq!(common_prefix_len(&[5], &[1]), 0);
    }

    #[test]
    fn encoding_round_trips_through_decode() {
        let mut children = empty_children();
        children[3] = Some(NodeRef::Hash([7; 32]));
        let branch = Node::Branch {
            children,
            value: Some(b"v".to_vec()),
        };
        let mut sink = NodeSink::new();
        let bytes = encode_node(&branch, &mut sink).unwrap();
        assert!(sink.is_empty(), "hash children are not re-encoded");

        let hash = blake3_hash(&bytes);
        match decode_node(&hash, &bytes).unwrap() {
            Node::Branch { children, value } => {
                assert!(matches!(children[3], Some(NodeRef::Hash(h)) if h == [7; 32]));
                assert_eq!(value, Some(b"v".to_vec()));
            }
            other => panic!("unexpected node {other:?}"),
        }
    }

    #[test]
    fn nested_nodes_land_in_sink() {
        let leaf = Node::Leaf {
            path: vec![1, 2],
            value: b"x".to_vec(),
        };
        let ext = Node::Extension {
            path: vec![0],
            child: NodeRef::boxed(leaf),
        };
        let mut sink = NodeSink::new();
        let root = hash_ref(&NodeRef::boxed(ext), &mut sink).unwrap();
        assert_eq!(sink.len(), 2);
        assert_eq!(sink.last().unwrap().0, root);
    }

    #[test]
    fn garbage_fails_to_decode() {
        assert!(matches!(
            decode_node(&[0; 32], &[0xFF, 0xFF, 0xFF, 0xFF, 0xFF]),
            Err(TrieError::Decode { .. })
        ));
    }
}
