//! Hashing utilities
//!
//! SHA-256 helpers used for request digests, transaction hashes and
//! member-set lookups.

use sha2::{Digest, Sha256};

/// Computes SHA-256 hash of the input data
pub fn sha256(data: &[u8]) -> Vec<u8> {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hasher.finalize().to_vec()
}

/// Computes SHA-256 hash into a fixed array
pub fn sha256_array(data: &[u8]) -> [u8; 32] {
    Sha256::digest(data).into()
}

/// Computes SHA-256 hash and returns it as a hex string
pub fn sha256_hex(data: &[u8]) -> String {
    hex::encode(sha256(data))
}

/// Hash identifying a member set on the wire.
///
/// Members are sorted first so any ordering of the same set maps to the
/// same value.
pub fn members_hash<S: AsRef<str>>(members: &[S]) -> String {
    let mut sorted: Vec<&str> = members.iter().map(|m| m.as_ref()).collect();
    sorted.sort_unstable();
    sha256_hex(sorted.concat().as_bytes())
}
