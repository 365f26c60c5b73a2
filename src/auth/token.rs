//! Signed request tokens
//!
//! A token is `header.claims.signature`, each part unpadded base64url. The
//! claims bind the token to one request through `sig`, the SHA-256 digest of
//! the canonical request bytes, and bound replay through `exp` and the
//! per-call `jti` nonce.

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use chrono::Utc;
use ed25519_dalek::VerifyingKey;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use super::{AuthError, Verifier};
use crate::crypto::{sha256_hex, verify_ed25519, verify_signature};

/// Default lifetime of a request token
pub const DEFAULT_TOKEN_TTL: Duration = Duration::from_secs(180);

/// Signature algorithm named in the token header
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Algorithm {
    /// ECDSA over secp256k1
    Es256k,
    /// Ed25519
    EdDsa,
}

impl Algorithm {
    pub fn as_str(&self) -> &'static str {
        match self {
            Algorithm::Es256k => "ES256K",
            Algorithm::EdDsa => "EdDSA",
        }
    }

    fn parse(s: &str) -> Option<Self> {
        match s {
            "ES256K" => Some(Algorithm::Es256k),
            "EdDSA" => Some(Algorithm::EdDsa),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct TokenHeader {
    alg: String,
    typ: String,
}

/// Claims carried by a request token
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Claims {
    /// Identity the request acts for
    pub uid: String,
    /// Session the key belongs to
    pub sid: String,
    /// Issued at, unix seconds
    pub iat: i64,
    /// Expires at, unix seconds
    pub exp: i64,
    /// One-time nonce
    pub jti: String,
    /// Hex SHA-256 of the canonical request bytes
    pub sig: String,
    /// Granted scope
    pub scp: String,
    /// OAuth authorization id
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub aid: Option<String>,
}

/// Per-call inputs that vary between otherwise identical requests
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SigningParams {
    pub issued_at: i64,
    pub ttl: Duration,
    pub nonce: String,
}

impl SigningParams {
    /// Current time and a random nonce
    pub fn fresh(ttl: Duration) -> Self {
        Self {
            issued_at: Utc::now().timestamp(),
            ttl,
            nonce: uuid::Uuid::new_v4().to_string(),
        }
    }
}

impl Claims {
    pub fn new(
        uid: &str,
        sid: &str,
        scope: &str,
        canonical: &[u8],
        params: &SigningParams,
    ) -> Result<Self, AuthError> {
        let exp = i64::try_from(params.ttl.as_secs())
            .ok()
            .and_then(|ttl| params.issued_at.checked_add(ttl))
            .ok_or_else(|| {
                AuthError::SigningFailed(format!("token ttl {:?} out of range", params.ttl))
            })?;
        Ok(Self {
            uid: uid.to_string(),
            sid: sid.to_string(),
            iat: params.issued_at,
            exp,
            jti: params.nonce.clone(),
            sig: sha256_hex(canonical),
            scp: scope.to_string(),
            aid: None,
        })
    }
}

/// An opaque authentication token attached to one request
#[derive(Clone, PartialEq, Eq)]
pub struct AuthToken(String);

impl AuthToken {
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Value for the `Authorization` header
    pub fn bearer(&self) -> String {
        format!("Bearer {}", self.0)
    }
}

impl std::fmt::Debug for AuthToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let shown = self.0.get(..12).unwrap_or(&self.0);
        write!(f, "AuthToken({}…)", shown)
    }
}

/// Encode and sign a token. `sign` receives the `header.claims` input.
pub fn encode_token<F>(alg: Algorithm, claims: &Claims, sign: F) -> Result<AuthToken, AuthError>
where
    F: FnOnce(&[u8]) -> Result<Vec<u8>, AuthError>,
{
    let header = TokenHeader {
        alg: alg.as_str().to_string(),
        typ: "JWT".to_string(),
    };
    let header = serde_json::to_vec(&header).map_err(|e| AuthError::SigningFailed(e.to_string()))?;
    let body = serde_json::to_vec(claims).map_err(|e| AuthError::SigningFailed(e.to_string()))?;

    let signing_input = format!(
        "{}.{}",
        URL_SAFE_NO_PAD.encode(header),
        URL_SAFE_NO_PAD.encode(body)
    );
    let signature = sign(signing_input.as_bytes())?;

    Ok(AuthToken(format!(
        "{}.{}",
        signing_input,
        URL_SAFE_NO_PAD.encode(signature)
    )))
}

/// A token split into its parts, signature not yet checked
#[derive(Debug, Clone)]
pub struct DecodedToken {
    pub algorithm: Algorithm,
    pub claims: Claims,
    signing_input: String,
    signature: Vec<u8>,
}

/// Split and parse a token without verifying it
pub fn decode_token(token: &str) -> Result<DecodedToken, AuthError> {
    let token = token.strip_prefix("Bearer ").unwrap_or(token);
    let mut parts = token.split('.');
    let (header_part, claims_part, signature_part) =
        match (parts.next(), parts.next(), parts.next(), parts.next()) {
            (Some(h), Some(c), Some(s), None) => (h, c, s),
            _ => return Err(AuthError::MalformedToken("expected three parts".to_string())),
        };

    let decode = |part: &str| {
        URL_SAFE_NO_PAD
            .decode(part)
            .map_err(|e| AuthError::MalformedToken(e.to_string()))
    };

    let header: TokenHeader = serde_json::from_slice(&decode(header_part)?)
        .map_err(|e| AuthError::MalformedToken(e.to_string()))?;
    let algorithm = Algorithm::parse(&header.alg)
        .ok_or_else(|| AuthError::MalformedToken(format!("unknown alg {}", header.alg)))?;
    let claims: Claims = serde_json::from_slice(&decode(claims_part)?)
        .map_err(|e| AuthError::MalformedToken(e.to_string()))?;

    Ok(DecodedToken {
        algorithm,
        claims,
        signing_input: format!("{}.{}", header_part, claims_part),
        signature: decode(signature_part)?,
    })
}

/// Public key able to check tokens from one identity
#[derive(Clone, Debug)]
pub enum TokenKey {
    Secp256k1(secp256k1::PublicKey),
    Ed25519(VerifyingKey),
}

/// Verifies tokens issued by the matching private key
#[derive(Clone, Debug)]
pub struct TokenVerifier {
    key: TokenKey,
}

impl TokenVerifier {
    pub fn new(key: TokenKey) -> Self {
        Self { key }
    }

    /// Check a token against the canonical request bytes it claims to cover.
    ///
    /// Returns the claims on success.
    pub fn verify_token(&self, canonical: &[u8], token: &str) -> Result<Claims, AuthError> {
        let decoded = decode_token(token)?;

        let valid = match (&self.key, decoded.algorithm) {
            (TokenKey::Secp256k1(pk), Algorithm::Es256k) => {
                verify_signature(pk, decoded.signing_input.as_bytes(), &decoded.signature)
                    .unwrap_or(false)
            }
            (TokenKey::Ed25519(vk), Algorithm::EdDsa) => {
                verify_ed25519(vk, decoded.signing_input.as_bytes(), &decoded.signature)
            }
            _ => false,
        };
        if !valid {
            return Err(AuthError::ResponseAuthenticationFailed(
                "token signature mismatch".to_string(),
            ));
        }

        if decoded.claims.sig != sha256_hex(canonical) {
            return Err(AuthError::ResponseAuthenticationFailed(
                "request digest mismatch".to_string(),
            ));
        }

        if decoded.claims.exp < Utc::now().timestamp() {
            return Err(AuthError::TokenExpired);
        }

        Ok(decoded.claims)
    }
}

impl Verifier for TokenVerifier {
    fn verify(&self, message: &[u8], signature: &str) -> Result<(), AuthError> {
        self.verify_token(message, signature).map(|_| ())
    }
}

/// Checks the service's own signature on responses
#[derive(Clone, Debug)]
pub struct ServerVerifier {
    server_key: VerifyingKey,
}

impl ServerVerifier {
    pub fn new(server_key: VerifyingKey) -> Self {
        Self { server_key }
    }
}

impl Verifier for ServerVerifier {
    fn verify(&self, message: &[u8], signature: &str) -> Result<(), AuthError> {
        let sig = URL_SAFE_NO_PAD.decode(signature).map_err(|_| {
            AuthError::ResponseAuthenticationFailed("undecodable response signature".to_string())
        })?;

        if verify_ed25519(&self.server_key, message, &sig) {
            Ok(())
        } else {
            Err(AuthError::ResponseAuthenticationFailed(
                "response signature mismatch".to_string(),
            ))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::{Ed25519Key, KeyPair};

    fn params() -> SigningParams {
        SigningParams {
            issued_at: Utc::now().timestamp(),
            ttl: DEFAULT_TOKEN_TTL,
            nonce: "nonce-1".to_string(),
        }
    }

    #[test]
    fn test_decode_rejects_wrong_shape() {
        assert!(matches!(
            decode_token("a.b"),
            Err(AuthError::MalformedToken(_))
        ));
        assert!(matches!(
            decode_token("a.b.c.d"),
            Err(AuthError::MalformedToken(_))
        ));
    }

    #[test]
    fn test_algorithm_must_match_key() {
        let ecdsa = KeyPair::generate();
        let ed = Ed25519Key::generate();
        let claims = Claims::new("u", "s", "FULL", b"GET/me", &params()).unwrap();
        let token = encode_token(Algorithm::EdDsa, &claims, |input| Ok(ed.sign(input).to_vec()))
            .unwrap();

        let wrong = TokenVerifier::new(TokenKey::Secp256k1(ecdsa.public_key));
        assert!(wrong.verify(b"GET/me", token.as_str()).is_err());

        let right = TokenVerifier::new(TokenKey::Ed25519(ed.verifying_key()));
        assert!(right.verify(b"GET/me", token.as_str()).is_ok());
    }

    #[test]
    fn test_oversized_ttl_fails_to_sign() {
        let mut p = params();
        p.ttl = Duration::from_secs(i64::MAX as u64);
        assert!(matches!(
            Claims::new("u", "s", "FULL", b"GET/me", &p),
            Err(AuthError::SigningFailed(_))
        ));

        p.ttl = Duration::from_secs(u64::MAX);
        assert!(Claims::new("u", "s", "FULL", b"GET/me", &p).is_err());
    }

    #[test]
    fn test_expired_token_rejected() {
        let ed = Ed25519Key::generate();
        let mut p = params();
        p.issued_at -= 3600;
        let claims = Claims::new("u", "s", "FULL", b"GET/me", &p).unwrap();
        let token = encode_token(Algorithm::EdDsa, &claims, |input| Ok(ed.sign(input).to_vec()))
            .unwrap();

        let verifier = TokenVerifier::new(TokenKey::Ed25519(ed.verifying_key()));
        assert!(matches!(
            verifier.verify_token(b"GET/me", token.as_str()),
            Err(AuthError::TokenExpired)
        ));
    }

    #[test]
    fn test_server_verifier() {
        let server = Ed25519Key::generate();
        let sig = URL_SAFE_NO_PAD.encode(server.sign(b"req-1{\"data\":{}}"));
        let verifier = ServerVerifier::new(server.verifying_key());

        assert!(verifier.verify(b"req-1{\"data\":{}}", &sig).is_ok());
        assert!(verifier.verify(b"req-2{\"data\":{}}", &sig).is_err());
        assert!(verifier.verify(b"req-1{\"data\":{}}", "").is_err());
    }

    #[test]
    fn test_bearer_header() {
        let token = AuthToken::new("abc");
        assert_eq!(token.bearer(), "Bearer abc");
        assert!(decode_token("Bearer x.y").is_err());
    }
}
