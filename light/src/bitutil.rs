//! # Sparse Bitmap Compression
//!
//! Bloom bit-planes are overwhelmingly zero, so they are stored with a
//! recursive sparse encoding:
//!
//! ```text
//! encode(data) = encode(nonzero_bitset(data)) ‖ nonzero_bytes(data)
//! ```
//!
//! `nonzero_bitset` has one bit per input byte (MSB first) telling whether
//! that byte is non-zero; `nonzero_bytes` lists those bytes in order. The
//! bitset is itself encoded the same way until it shrinks to one byte. An
//! all-zero input encodes to nothing at all.
//!
//! `compress_bytes` falls back to the raw input whenever the encoding would
//! not be smaller, and `decompress_bytes` recognizes that case by length:
//! a payload exactly as long as the target is raw data.

use thiserror::Error;

/// Failures while decoding a compressed bitmap.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum BitutilError {
    /// The payload would decode to more bytes than the target length.
    #[error("target data size exceeded")]
    ExceededTarget,

    /// The payload ends before every referenced byte is present.
    #[error("missing bytes on input")]
    MissingData,

    /// A byte referenced as non-zero is zero.
    #[error("zero byte in input content")]
    ZeroContent,

    /// The payload carries bytes that no bitset bit refers to.
    #[error("unreferenced data in input")]
    UnreferencedData,
}

/// Compress `data`, returning the raw bytes if compression does not help.
///
/// An all-zero (or empty) input compresses to an empty vector.
pub fn compress_bytes(data: &[u8]) -> Vec<u8> {
    let encoded = bitset_encode_bytes(data);
    if encoded.len() < data.len() {
        encoded
    } else {
        data.to_vec()
    }
}

fn bitset_encode_bytes(data: &[u8]) -> Vec<u8> {
    match data.len() {
        0 => return Vec::new(),
        1 if data[0] == 0 => return Vec::new(),
        1 => return data.to_vec(),
        _ => {}
    }

    let mut nonzero_bitset = vec![0u8; (data.len() + 7) / 8];
    let mut nonzero_bytes = Vec::with_capacity(data.len());
    for (i, byte) in data.iter().enumerate() {
        if *byte != 0 {
            nonzero_bytes.push(*byte);
            nonzero_bitset[i / 8] |= 1 << (7 - i % 8);
        }
    }
    if nonzero_bytes.is_empty() {
        return Vec::new();
    }

    let mut out = bitset_encode_bytes(&nonzero_bitset);
    out.extend_from_slice(&nonzero_bytes);
    out
}

/// Decompress `data` into exactly `target` bytes.
pub fn decompress_bytes(data: &[u8], target: usize) -> Result<Vec<u8>, BitutilError> {
    if data.len() > target {
        return Err(BitutilError::ExceededTarget);
    }
    if data.len() == target {
        return Ok(data.to_vec());
    }
    bitset_decode_bytes(data, target)
}

fn bitset_decode_bytes(data: &[u8], target: usize) -> Result<Vec<u8>, BitutilError> {
    let (out, consumed) = bitset_decode_partial_bytes(data, target)?;
    if consumed != data.len() {
        return Err(BitutilError::UnreferencedData);
    }
    Ok(out)
}

/// Decode a prefix of `data` into `target` bytes, returning the output and
/// how many input bytes were consumed.
fn bitset_decode_partial_bytes(
    data: &[u8],
    target: usize,
) -> Result<(Vec<u8>, usize), BitutilError> {
    if target == 0 {
        return Ok((Vec::new(), 0));
    }

    let mut decomp = vec![0u8; target];
    if data.is_empty() {
        return Ok((decomp, 0));
    }
    if target == 1 {
        decomp[0] = data[0];
        let consumed = usize::from(data[0] != 0);
        return Ok((decomp, consumed));
    }

    let (nonzero_bitset, mut ptr) = bitset_decode_partial_bytes(data, (target + 7) / 8)?;
    for i in 0..8 * nonzero_bitset.len() {
        if nonzero_bitset[i / 8] & (1 << (7 - i % 8)) != 0 {
            if ptr >= data.len() {
                return Err(BitutilError::MissingData);
            }
            if i >= decomp.len() {
                return Err(BitutilError::ExceededTarget);
            }
            if data[ptr] == 0 {
                return Err(BitutilError::ZeroContent);
            }
            decomp[i] = data[ptr];
            ptr += 1;
        }
    }
    Ok((decomp, ptr))
}
