//! Content-addressed naming for binary blobs.
//!
//! [`content_hash`] is SHA-256 truncated to its first 16 bytes (128 bits)
//! and rendered as 32 lowercase hex characters. Truncation keeps object keys
//! short enough to read in a URL; at 128 bits an accidental collision needs
//! on the order of 2^64 distinct images, far beyond any single store.

use sha2::{Digest, Sha256};

/// Number of digest bytes kept in a content hash.
pub const HASH_BYTES: usize = 16;

/// Hex length of a content hash.
pub const HASH_HEX_LEN: usize = HASH_BYTES * 2;

/// Hash `bytes` into a 32-character lowercase hex digest.
///
/// ```rust
/// let h = docparse_relay::hash::content_hash(b"abc");
/// assert_eq!(h, "ba7816bf8f01cfea414140de5dae2223");
/// ```
pub fn content_hash(bytes: &[u8]) -> String {
    let digest = Sha256::digest(bytes);
    hex::encode(&digest[..HASH_BYTES])
}
