//! Cryptographic utilities
//!
//! This module provides:
//! - SHA-256 hashing
//! - secp256k1 keys with PEM armor
//! - Ed25519 keys in compact base64url form

pub mod ed25519;
pub mod hash;
pub mod keys;

pub use ed25519::{decode_compact, verify_ed25519, verifying_key_from_compact, Ed25519Key};
pub use hash::{members_hash, sha256, sha256_array, sha256_hex};
pub use keys::{
    public_key_from_hex, sign_message, verify_signature, KeyError, KeyPair, PEM_MARKER,
};
