//! Digest helpers for content addressing.
//!
//! Keys are mapped to disk locations by hashing them. SHA-1 is the default
//! (160 bits, 40 hex chars); BLAKE3 is available for stores that want a wider
//! digest. Neither is used for authentication.

use sha1::{Digest, Sha1};

/// SHA-1 digest of `data`.
pub fn sha1(data: &[u8]) -> [u8; 20] {
    Sha1::digest(data).into()
}

/// Lower-case hex SHA-1 digest of `data`.
pub fn sha1_hex(data: &[u8]) -> String {
    hex::encode(sha1(data))
}

/// BLAKE3 digest of `data`.
pub fn blake3(data: &[u8]) -> [u8; 32] {
    *blake3::hash(data).as_bytes()
}

/// Lower-case hex BLAKE3 digest of `data`.
pub fn blake3_hex(data: &[u8]) -> String {
    hex::encode(blake3(data))
}
