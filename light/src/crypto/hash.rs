//! # Hashing Utilities
//!
//! Every content-addressed value in the indexer is a 32-byte BLAKE3
//! digest: header hashes, trie node hashes and therefore trie roots.
//!
//! Hashes travel through the code as plain `[u8; 32]` arrays. Hex helpers
//! live here too because checkpoints, logs and the CLI all speak hex.

use thiserror::Error;

/// Errors from parsing a hex-encoded 32-byte hash.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum HexHashError {
    #[error("invalid hex: {0}")]
    InvalidHex(String),

    #[error("expected 32 bytes, got {0}")]
    InvalidLength(usize),
}

/// Compute the BLAKE3 hash of the input data.
///
/// # Example
///
/// ```
/// use light_index::crypto::blake3_hash;
///
/// let hash = blake3_hash(b"section head");
/// assert_eq!(hash.len(), 32);
/// ```
pub fn blake3_hash(data: &[u8]) -> [u8; 32] {
    *blake3::hash(data).as_bytes()
}

/// Hash multiple byte slices together without concatenating them first.
pub fn blake3_hash_multi(parts: &[&[u8]]) -> [u8; 32] {
    let mut hasher = blake3::Hasher::new();
    for part in parts {
        hasher.update(part);
    }
    *hasher.finalize().as_bytes()
}

/// Parse a 64-character hex string (optionally `0x`-prefixed) into a hash.
pub fn hash_from_hex(s: &str) -> Result<[u8; 32], HexHashError> {
    let s = s.strip_prefix("0x").unwrap_or(s);
    let bytes = hex::decode(s).map_err(|e| HexHashError::InvalidHex(e.to_string()))?;
    let len = bytes.len();
    bytes
        .try_into()
        .map_err(|_| HexHashError::InvalidLength(len))
}

/// Render a hash as a 64-character lowercase hex string.
pub fn hash_to_hex(hash: &[u8; 32]) -> String {
    hex::encode(hash)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn blake3_deterministic() {
        assert_eq!(blake3_hash(b"cht"), blake3_hash(b"cht"));
        assert_ne!(blake3_hash(b"cht"), blake3_hash(b"blt"));
    }

    #[test]
    fn multi_matches_concatenation() {
        let joined = blake3_hash(b"chtRoot-section");
        let parts = blake3_hash_multi(&[b"chtRoot-", b"section"]);
        assert_eq!(joined, parts);
    }

    #[test]
    fn hex_round_trip() {
        let hash = blake3_hash(b"head");
        let encoded = hash_to_hex(&hash);
        assert_eq!(encoded.len(), 64);
        assert_eq!(hash_from_hex(&encoded).unwrap(), hash);
        assert_eq!(hash_from_hex(&format!("0x{encoded}")).unwrap(), hash);
    }

    #[test]
    fn hex_rejects_bad_input() {
        assert!(matches!(
            hash_from_hex("zz"),
            Err(HexHashError::InvalidHex(_))
        ));
        assert_eq!(hash_from_hex("abcd"), Err(HexHashError::InvalidLength(2)));
    }
}
