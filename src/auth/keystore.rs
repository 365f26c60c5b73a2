//! Keystores and credentials
//!
//! A keystore is the serialized bundle an identity is configured with. The
//! private key format is sniffed once, at construction, and the result is
//! kept as an explicit [`Credential`] variant.

use base64::{engine::general_purpose::STANDARD, Engine as _};
use rand::RngCore;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

use super::token::{
    encode_token, Algorithm, AuthToken, Claims, SigningParams, TokenKey, TokenVerifier,
};
use super::{AuthError, Signer};
use crate::crypto::{decode_compact, verifying_key_from_compact, Ed25519Key, KeyPair, PEM_MARKER};

/// Scope granted to keystore sessions
pub const FULL_SCOPE: &str = "FULL";

/// Key scheme of a credential
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum KeyScheme {
    /// secp256k1 key in an `EC PRIVATE KEY` PEM block
    Pem,
    /// Ed25519 key in compact base64url form
    Ed25519,
    /// Opaque bearer token
    AccessToken,
    /// Ed25519 key bound to an OAuth authorization
    Oauth,
}

impl std::fmt::Display for KeyScheme {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            KeyScheme::Pem => "pem",
            KeyScheme::Ed25519 => "ed25519",
            KeyScheme::AccessToken => "access-token",
            KeyScheme::Oauth => "oauth",
        };
        f.write_str(name)
    }
}

/// Serialized credential bundle for one identity
#[derive(Clone, Serialize, Deserialize)]
pub struct Keystore {
    pub client_id: String,
    pub session_id: String,
    pub private_key: String,
    /// Base64 session key used to encrypt PINs
    #[serde(default)]
    pub pin_token: String,
    #[serde(default)]
    pub scope: String,
}

impl Keystore {
    /// Load a keystore from a JSON file
    pub fn load(path: &Path) -> Result<Self, AuthError> {
        let data = fs::read(path)?;
        Ok(serde_json::from_slice(&data)?)
    }

    /// Write the keystore as pretty JSON
    pub fn save(&self, path: &Path) -> Result<(), AuthError> {
        fs::write(path, serde_json::to_vec_pretty(self)?)?;
        Ok(())
    }

    /// Generate a fresh identity with a random key and PIN session key
    pub fn generate(scheme: KeyScheme) -> Result<Self, AuthError> {
        let private_key = match scheme {
            KeyScheme::Pem => KeyPair::generate().to_pem(),
            KeyScheme::Ed25519 => Ed25519Key::generate().to_compact(),
            other => {
                return Err(AuthError::InvalidKeyFormat(format!(
                    "cannot generate a {} keystore",
                    other
                )))
            }
        };

        let mut pin_key = [0u8; 32];
        rand::thread_rng().fill_bytes(&mut pin_key);

        Ok(Self {
            client_id: uuid::Uuid::new_v4().to_string(),
            session_id: uuid::Uuid::new_v4().to_string(),
            private_key,
            pin_token: STANDARD.encode(pin_key),
            scope: FULL_SCOPE.to_string(),
        })
    }
}

impl std::fmt::Debug for Keystore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Keystore")
            .field("client_id", &self.client_id)
            .field("session_id", &self.session_id)
            .field("scope", &self.scope)
            .finish_non_exhaustive()
    }
}

/// Keystore for an OAuth-authorized application
#[derive(Clone, Serialize, Deserialize)]
pub struct OauthKeystore {
    pub client_id: String,
    pub authorization_id: String,
    pub scope: String,
    pub private_key: String,
    /// Compact Ed25519 key the service signs responses with
    pub server_public_key: String,
}

impl std::fmt::Debug for OauthKeystore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OauthKeystore")
            .field("client_id", &self.client_id)
            .field("authorization_id", &self.authorization_id)
            .field("scope", &self.scope)
            .finish_non_exhaustive()
    }
}

/// Session signed with a secp256k1 key
#[derive(Clone, Debug)]
pub struct EcdsaAuth {
    pub uid: String,
    pub sid: String,
    pub scope: String,
    key: KeyPair,
}

/// Session signed with an Ed25519 key
#[derive(Clone, Debug)]
pub struct Ed25519Auth {
    pub uid: String,
    pub sid: String,
    pub scope: String,
    key: Ed25519Key,
}

/// OAuth authorization signed with an Ed25519 key
#[derive(Clone, Debug)]
pub struct OauthAuth {
    pub client_id: String,
    pub authorization_id: String,
    pub scope: String,
    key: Ed25519Key,
}

/// Key material of one identity, dispatched by scheme
#[derive(Clone, Debug)]
pub enum Credential {
    Pem(EcdsaAuth),
    Ed25519(Ed25519Auth),
    AccessToken(AuthToken),
    Oauth(OauthAuth),
}

impl Credential {
    /// Build from a keystore, sniffing the private key format
    pub fn from_keystore(keystore: &Keystore) -> Result<Self, AuthError> {
        let scope = if keystore.scope.is_empty() {
            FULL_SCOPE.to_string()
        } else {
            keystore.scope.clone()
        };

        if keystore.private_key.contains(PEM_MARKER) {
            let key = KeyPair::from_pem(&keystore.private_key)
                .map_err(|e| AuthError::InvalidKeyFormat(format!("PEM keystore: {}", e)))?;
            return Ok(Credential::Pem(EcdsaAuth {
                uid: keystore.client_id.clone(),
                sid: keystore.session_id.clone(),
                scope,
                key,
            }));
        }

        if let Some(bytes) = decode_compact(&keystore.private_key) {
            let key = Ed25519Key::from_bytes(&bytes)
                .map_err(|e| AuthError::InvalidKeyFormat(format!("ed25519 keystore: {}", e)))?;
            return Ok(Credential::Ed25519(Ed25519Auth {
                uid: keystore.client_id.clone(),
                sid: keystore.session_id.clone(),
                scope,
                key,
            }));
        }

        Err(AuthError::InvalidKeyFormat(
            "unexpected private key format".to_string(),
        ))
    }

    pub fn from_access_token(token: impl Into<String>) -> Self {
        Credential::AccessToken(AuthToken::new(token))
    }

    pub fn from_oauth_keystore(keystore: &OauthKeystore) -> Result<Self, AuthError> {
        let key = Ed25519Key::from_compact(&keystore.private_key)
            .map_err(|e| AuthError::InvalidKeyFormat(format!("oauth keystore: {}", e)))?;
        Ok(Credential::Oauth(OauthAuth {
            client_id: keystore.client_id.clone(),
            authorization_id: keystore.authorization_id.clone(),
            scope: keystore.scope.clone(),
            key,
        }))
    }

    pub fn scheme(&self) -> KeyScheme {
        match self {
            Credential::Pem(_) => KeyScheme::Pem,
            Credential::Ed25519(_) => KeyScheme::Ed25519,
            Credential::AccessToken(_) => KeyScheme::AccessToken,
            Credential::Oauth(_) => KeyScheme::Oauth,
        }
    }

    /// Identity id, unknown for bare access tokens
    pub fn identity_id(&self) -> Option<&str> {
        match self {
            Credential::Pem(auth) => Some(&auth.uid),
            Credential::Ed25519(auth) => Some(&auth.uid),
            Credential::AccessToken(_) => None,
            Credential::Oauth(auth) => Some(&auth.client_id),
        }
    }

    /// Public half of the signing key: hex for secp256k1, compact for Ed25519
    pub fn public_key(&self) -> Option<String> {
        match self {
            Credential::Pem(auth) => Some(auth.key.public_key_hex()),
            Credential::Ed25519(auth) => Some(auth.key.public_key_compact()),
            Credential::Oauth(auth) => Some(auth.key.public_key_compact()),
            Credential::AccessToken(_) => None,
        }
    }

    /// Verifier for tokens this credential signs
    pub fn token_verifier(&self) -> Option<TokenVerifier> {
        match self {
            Credential::Pem(auth) => Some(TokenVerifier::new(TokenKey::Secp256k1(
                auth.key.public_key,
            ))),
            Credential::Ed25519(auth) => Some(TokenVerifier::new(TokenKey::Ed25519(
                auth.key.verifying_key(),
            ))),
            Credential::Oauth(auth) => Some(TokenVerifier::new(TokenKey::Ed25519(
                auth.key.verifying_key(),
            ))),
            Credential::AccessToken(_) => None,
        }
    }
}

impl Signer for Credential {
    fn sign_with(&self, canonical: &[u8], params: &SigningParams) -> Result<AuthToken, AuthError> {
        match self {
            Credential::Pem(auth) => {
                let claims = Claims::new(&auth.uid, &auth.sid, &auth.scope, canonical, params)?;
                encode_token(Algorithm::Es256k, &claims, |input| {
                    auth.key
                        .sign(input)
                        .map_err(|e| AuthError::SigningFailed(e.to_string()))
                })
            }
            Credential::Ed25519(auth) => {
                let claims = Claims::new(&auth.uid, &auth.sid, &auth.scope, canonical, params)?;
                encode_token(Algorithm::EdDsa, &claims, |input| {
                    Ok(auth.key.sign(input).to_vec())
                })
            }
            Credential::AccessToken(token) => Ok(token.clone()),
            Credential::Oauth(auth) => {
                let mut claims = Claims::new(&auth.client_id, "", &auth.scope, canonical, params)?;
                claims.aid = Some(auth.authorization_id.clone());
                encode_token(Algorithm::EdDsa, &claims, |input| {
                    Ok(auth.key.sign(input).to_vec())
                })
            }
        }
    }
}

/// Parse the server key out of an OAuth keystore
pub fn oauth_server_key(
    keystore: &OauthKeystore,
) -> Result<ed25519_dalek::VerifyingKey, AuthError> {
    verifying_key_from_compact(&keystore.server_public_key)
        .map_err(|e| AuthError::InvalidKeyFormat(format!("server public key: {}", e)))
}
