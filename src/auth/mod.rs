//! Request authentication
//!
//! Every outgoing call carries a token produced by a [`Signer`]; every
//! response is checked by a [`Verifier`] before its payload is trusted.
//!
//! # Example
//!
//! ```ignore
//! use multisig_custody::auth::{Credential, Keystore, KeyScheme, Signer};
//!
//! let keystore = Keystore::generate(KeyScheme::Ed25519)?;
//! let credential = Credential::from_keystore(&keystore)?;
//! let token = credential.sign(b"GET/me")?;
//! ```

pub mod keystore;
pub mod token;

pub use keystore::{oauth_server_key, Credential, KeyScheme, Keystore, OauthKeystore, FULL_SCOPE};
pub use token::{
    decode_token, AuthToken, Claims, ServerVerifier, SigningParams, TokenKey, TokenVerifier,
    DEFAULT_TOKEN_TTL,
};

use thiserror::Error;

/// Errors related to authentication
#[derive(Error, Debug)]
pub enum AuthError {
    #[error("Invalid key format: {0}")]
    InvalidKeyFormat(String),
    #[error("Signing failed: {0}")]
    SigningFailed(String),
    #[error("Response authentication failed: {0}")]
    ResponseAuthenticationFailed(String),
    #[error("Malformed token: {0}")]
    MalformedToken(String),
    #[error("Token expired")]
    TokenExpired,
    #[error("Keystore I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Keystore encoding error: {0}")]
    Encoding(#[from] serde_json::Error),
}

/// Produces the authentication token for one outgoing request
pub trait Signer: Send + Sync {
    /// Sign canonical request bytes with explicit time and nonce
    fn sign_with(&self, canonical: &[u8], params: &SigningParams) -> Result<AuthToken, AuthError>;

    /// Sign with the current time, a random nonce and the default lifetime
    fn sign(&self, canonical: &[u8]) -> Result<AuthToken, AuthError> {
        self.sign_with(canonical, &SigningParams::fresh(DEFAULT_TOKEN_TTL))
    }
}

/// Confirms a message was produced by the expected party
pub trait Verifier: Send + Sync {
    fn verify(&self, message: &[u8], signature: &str) -> Result<(), AuthError>;
}

/// Accepts everything; used when the flow does not need response authenticity
#[derive(Clone, Copy, Debug, Default)]
pub struct NopVerifier;

impl Verifier for NopVerifier {
    fn verify(&self, _message: &[u8], _signature: &str) -> Result<(), AuthError> {
        Ok(())
    }
}

/// Response verification chosen once per client
#[derive(Clone, Debug)]
pub enum ResponseVerifier {
    Nop(NopVerifier),
    Server(ServerVerifier),
}

impl Default for ResponseVerifier {
    fn default() -> Self {
        ResponseVerifier::Nop(NopVerifier)
    }
}

impl Verifier for ResponseVerifier {
    fn verify(&self, message: &[u8], signature: &str) -> Result<(), AuthError> {
        match self {
            ResponseVerifier::Nop(v) => v.verify(message, signature),
            ResponseVerifier::Server(v) => v.verify(message, signature),
        }
    }
}
