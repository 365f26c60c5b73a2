//! Ed25519 keys in compact encoding
//!
//! Keystores carry Ed25519 private keys as unpadded base64url text, either
//! the 32-byte seed or the 64-byte seed followed by the public key.

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use ed25519_dalek::{Signature, Signer, SigningKey, Verifier, VerifyingKey};
use rand::rngs::OsRng;

use super::keys::KeyError;

/// Size of a seed in bytes
pub const SEED_SIZE: usize = 32;

/// Size of a seed plus public key in bytes
pub const KEYPAIR_SIZE: usize = 64;

/// Size of a signature in bytes
pub const SIGNATURE_SIZE: usize = 64;

/// Decode compact key text into raw bytes without interpreting them.
///
/// Used for format sniffing: a keystore whose private key decodes here is
/// treated as Ed25519.
pub fn decode_compact(text: &str) -> Option<Vec<u8>> {
    URL_SAFE_NO_PAD.decode(text.trim()).ok()
}

/// An Ed25519 signing identity
#[derive(Clone)]
pub struct Ed25519Key {
    signing_key: SigningKey,
}

impl Ed25519Key {
    /// Generate a fresh key
    pub fn generate() -> Self {
        Self {
            signing_key: SigningKey::generate(&mut OsRng),
        }
    }

    /// Build from raw seed or seed‖public bytes
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, KeyError> {
        let signing_key = match bytes.len() {
            SEED_SIZE => {
                let mut seed = [0u8; SEED_SIZE];
                seed.copy_from_slice(bytes);
                SigningKey::from_bytes(&seed)
            }
            KEYPAIR_SIZE => {
                let mut pair = [0u8; KEYPAIR_SIZE];
                pair.copy_from_slice(bytes);
                // Rejects a public half that does not match the seed
                SigningKey::from_keypair_bytes(&pair).map_err(|_| KeyError::InvalidPrivateKey)?
            }
            _ => return Err(KeyError::InvalidPrivateKey),
        };
        Ok(Self { signing_key })
    }

    /// Parse compact base64url text
    pub fn from_compact(text: &str) -> Result<Self, KeyError> {
        let bytes = decode_compact(text).ok_or(KeyError::InvalidPrivateKey)?;
        Self::from_bytes(&bytes)
    }

    /// Encode as compact text (seed‖public key)
    pub fn to_compact(&self) -> String {
        URL_SAFE_NO_PAD.encode(self.signing_key.to_keypair_bytes())
    }

    /// The public half
    pub fn verifying_key(&self) -> VerifyingKey {
        self.signing_key.verifying_key()
    }

    /// Public key as compact text
    pub fn public_key_compact(&self) -> String {
        URL_SAFE_NO_PAD.encode(self.verifying_key().to_bytes())
    }

    pub fn sign(&self, message: &[u8]) -> [u8; SIGNATURE_SIZE] {
        self.signing_key.sign(message).to_bytes()
    }
}

impl std::fmt::Debug for Ed25519Key {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Ed25519Key({})", self.public_key_compact())
    }
}

/// Parse a compact public key
pub fn verifying_key_from_compact(text: &str) -> Result<VerifyingKey, KeyError> {
    let bytes = decode_compact(text).ok_or(KeyError::InvalidPublicKey)?;
    let bytes: [u8; 32] = bytes
        .as_slice()
        .try_into()
        .map_err(|_| KeyError::InvalidPublicKey)?;
    VerifyingKey::from_bytes(&bytes).map_err(|_| KeyError::InvalidPublicKey)
}

/// Verify a signature; malformed signatures verify as false
pub fn verify_ed25519(key: &VerifyingKey, message: &[u8], signature: &[u8]) -> bool {
    match Signature::from_slice(signature) {
        Ok(sig) => key.verify(message, &sig).is_ok(),
        Err(_) => false,
    }
}
