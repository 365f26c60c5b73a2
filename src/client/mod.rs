//! Authenticated API client
//!
//! A [`Client`] binds one identity's credential, response verifier and PIN
//! cipher to a [`Transport`]. Calls never read ambient state: each takes a
//! [`RequestContext`] carrying the signer and verifier for that call.

pub mod multisig;
pub mod outputs;
pub mod pin;

use log::debug;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

use crate::auth::{
    oauth_server_key, AuthError, AuthToken, Credential, Keystore, OauthKeystore,
    ResponseVerifier, ServerVerifier, Signer, SigningParams, Verifier, DEFAULT_TOKEN_TTL,
};
use crate::multisig::MultisigError;
use crate::network::{ApiError, ApiRequest, ApiResponse, Method, NetworkError, Transport};
use crate::pin::{PinCipher, PinError};

/// Errors surfaced by client calls
#[derive(Error, Debug)]
pub enum ClientError {
    #[error(transparent)]
    Auth(#[from] AuthError),
    #[error(transparent)]
    Pin(#[from] PinError),
    #[error(transparent)]
    Network(#[from] NetworkError),
    #[error(transparent)]
    Multisig(#[from] MultisigError),
    #[error("API error {0}")]
    Api(ApiError),
    #[error("Response decoding failed: {0}")]
    Decode(String),
}

impl ClientError {
    /// Whether retrying the same call may succeed
    pub fn is_transient(&self) -> bool {
        matches!(self, ClientError::Network(NetworkError::Transient(_)))
    }

    /// Service error code, if the service rejected the call
    pub fn api_code(&self) -> Option<u32> {
        match self {
            ClientError::Api(error) => Some(error.code),
            _ => None,
        }
    }
}

/// Client configuration
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Lifetime of each request token
    pub token_ttl: Duration,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            token_ttl: DEFAULT_TOKEN_TTL,
        }
    }
}

/// Signer and verifier for the calls made with it
pub struct RequestContext<'a> {
    signer: &'a dyn Signer,
    verifier: &'a dyn Verifier,
    token_ttl: Duration,
}

impl<'a> RequestContext<'a> {
    pub fn new(signer: &'a dyn Signer, verifier: &'a dyn Verifier, token_ttl: Duration) -> Self {
        Self {
            signer,
            verifier,
            token_ttl,
        }
    }

    /// Token for one outgoing request
    pub fn authorize(&self, canonical: &[u8]) -> Result<AuthToken, AuthError> {
        self.signer
            .sign_with(canonical, &SigningParams::fresh(self.token_ttl))
    }

    /// Check a response before its body is trusted
    pub fn authenticate_response(&self, response: &ApiResponse) -> Result<(), AuthError> {
        let signature = response.signature.as_deref().unwrap_or_default();
        self.verifier.verify(&response.canonical_bytes(), signature)
    }
}

#[derive(Deserialize)]
struct Envelope<T> {
    data: Option<T>,
    error: Option<ApiError>,
}

#[derive(Serialize)]
pub(crate) struct PinPayload {
    pub pin: String,
}

/// Client acting for one identity
pub struct Client {
    credential: Credential,
    verifier: ResponseVerifier,
    pin_cipher: Option<PinCipher>,
    transport: Arc<dyn Transport>,
    config: ClientConfig,
}

impl Client {
    /// Build from a keystore; the private key format decides the scheme
    pub fn from_keystore(
        keystore: &Keystore,
        transport: Arc<dyn Transport>,
    ) -> Result<Self, ClientError> {
        let credential = Credential::from_keystore(keystore)?;
        let pin_cipher = if keystore.pin_token.is_empty() {
            None
        } else {
            Some(PinCipher::from_pin_token(&keystore.pin_token)?)
        };

        Ok(Self {
            credential,
            verifier: ResponseVerifier::default(),
            pin_cipher,
            transport,
            config: ClientConfig::default(),
        })
    }

    /// Build around an opaque bearer token. PIN operations are unavailable.
    pub fn from_access_token(token: impl Into<String>, transport: Arc<dyn Transport>) -> Self {
        Self {
            credential: Credential::from_access_token(token),
            verifier: ResponseVerifier::default(),
            pin_cipher: None,
            transport,
            config: ClientConfig::default(),
        }
    }

    /// Build for an OAuth application. Responses must carry a valid service
    /// signature.
    pub fn from_oauth_keystore(
        keystore: &OauthKeystore,
        transport: Arc<dyn Transport>,
    ) -> Result<Self, ClientError> {
        let credential = Credential::from_oauth_keystore(keystore)?;
        let server_key = oauth_server_key(keystore)?;

        Ok(Self {
            credential,
            verifier: ResponseVerifier::Server(ServerVerifier::new(server_key)),
            pin_cipher: None,
            transport,
            config: ClientConfig::default(),
        })
    }

    pub fn with_config(mut self, config: ClientConfig) -> Self {
        self.config = config;
        self
    }

    /// Replace the response verifier
    pub fn with_verifier(mut self, verifier: ResponseVerifier) -> Self {
        self.verifier = verifier;
        self
    }

    pub fn credential(&self) -> &Credential {
        &self.credential
    }

    pub fn identity_id(&self) -> Option<&str> {
        self.credential.identity_id()
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// Context binding this client's signer and verifier
    pub fn request_context(&self) -> RequestContext<'_> {
        RequestContext::new(&self.credential, &self.verifier, self.config.token_ttl)
    }

    async fn call<T: DeserializeOwned>(
        &self,
        ctx: &RequestContext<'_>,
        method: Method,
        uri: &str,
        body: Vec<u8>,
    ) -> Result<T, ClientError> {
        let request_id = uuid::Uuid::new_v4().to_string();
        let mut request = ApiRequest::new(method, uri, body, request_id.clone());
        request.authorization = ctx.authorize(&request.canonical_bytes())?.bearer();

        debug!("{} {} ({})", method, uri, request_id);
        let response = self.transport.send(request).await?;

        if response.request_id != request_id {
            return Err(AuthError::ResponseAuthenticationFailed(format!(
                "request id mismatch: sent {}, got {}",
                request_id, response.request_id
            ))
            .into());
        }
        ctx.authenticate_response(&response)?;

        let envelope: Envelope<T> = serde_json::from_slice(&response.body).map_err(|e| {
            if response.status >= 500 {
                ClientError::Network(NetworkError::Transient(format!(
                    "status {}",
                    response.status
                )))
            } else {
                ClientError::Decode(e.to_string())
            }
        })?;

        if let Some(error) = envelope.error {
            if error.status >= 500 {
                return Err(NetworkError::Transient(error.to_string()).into());
            }
            return Err(ClientError::Api(error));
        }
        envelope
            .data
            .ok_or_else(|| ClientError::Decode("response carries no data".to_string()))
    }

    pub(crate) async fn get<T: DeserializeOwned>(
        &self,
        ctx: &RequestContext<'_>,
        uri: &str,
    ) -> Result<T, ClientError> {
        self.call(ctx, Method::Get, uri, Vec::new()).await
    }

    pub(crate) async fn post<B: Serialize + ?Sized, T: DeserializeOwned>(
        &self,
        ctx: &RequestContext<'_>,
        uri: &str,
        body: &B,
    ) -> Result<T, ClientError> {
        let body = serde_json::to_vec(body).map_err(|e| ClientError::Decode(e.to_string()))?;
        self.call(ctx, Method::Post, uri, body).await
    }
}

impl std::fmt::Debug for Client {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Client")
            .field("scheme", &self.credential.scheme())
            .field("identity", &self.identity_id())
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}


#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::{KeyScheme, NopVerifier};
    use crate::network::{codes, MemoryNetwork};
    use async_trait::async_trait;
    use serde::de::IgnoredAny;

    /// Returns a fixed response regardless of the request
    struct CannedTransport {
        status: u16,
        body: &'static str,
        echo_id: bool,
    }

    #[async_trait]
    impl Transport for CannedTransport {
        async fn send(&self, request: ApiRequest) -> Result<ApiResponse, NetworkError> {
            Ok(ApiResponse {
                status: self.status,
                request_id: if self.echo_id {
                    request.request_id
                } else {
                    "other".to_string()
                },
                body: self.body.as_bytes().to_vec(),
                signature: None,
            })
        }
    }

    fn client_with(transport: CannedTransport) -> Client {
        Client::from_access_token("token", Arc::new(transport))
    }

    #[tokio::test]
    async fn test_error_envelope_surfaces_api_error() {
        let client = client_with(CannedTransport {
            status: 404,
            body: r#"{"error":{"status":404,"code":404,"description":"missing"}}"#,
            echo_id: true,
        });
        let ctx = client.request_context();
        let err = client.get::<IgnoredAny>(&ctx, "/x").await.unwrap_err();
        assert_eq!(err.api_code(), Some(404));
        assert!(!err.is_transient());
    }

    #[tokio::test]
    async fn test_server_errors_are_transient() {
        let client = client_with(CannedTransport {
            status: 502,
            body: "<html>bad gateway</html>",
            echo_id: true,
        });
        let ctx = client.request_context();
        let err = client.get::<IgnoredAny>(&ctx, "/x").await.unwrap_err();
        assert!(err.is_transient());
    }

    #[tokio::test]
    async fn test_request_id_mismatch_rejected() {
        let client = client_with(CannedTransport {
            status: 200,
            body: r#"{"data":{}}"#,
            echo_id: false,
        });
        let ctx = client.request_context();
        let err = client.get::<IgnoredAny>(&ctx, "/x").await.unwrap_err();
        assert!(matches!(
            err,
            ClientError::Auth(AuthError::ResponseAuthenticationFailed(_))
        ));
    }

    #[tokio::test]
    async fn test_oauth_client_rejects_unsigned_success() {
        let network = MemoryNetwork::new();
        let keystore = network.authorize_oauth("user-1", "FULL");
        let client = Client::from_oauth_keystore(
            &keystore,
            Arc::new(CannedTransport {
                status: 200,
                body: r#"{"data":{}}"#,
                echo_id: true,
            }),
        )
        .unwrap();

        let ctx = client.request_context();
        let err = client.get::<IgnoredAny>(&ctx, "/x").await.unwrap_err();
        assert!(matches!(err, ClientError::Auth(_)));
    }

    #[tokio::test]
    async fn test_oauth_client_accepts_signed_responses() {
        let network = Arc::new(MemoryNetwork::new());
        let keystore = network.authorize_oauth("user-1", "FULL");
        let client = Client::from_oauth_keystore(&keystore, network.clone()).unwrap();

        let ctx = client.request_context();
        let err = client
            .get::<IgnoredAny>(&ctx, "/multisigs/requests/missing")
            .await
            .unwrap_err();
        // Authenticated and verified; the request just does not exist
        assert_eq!(err.api_code(), Some(codes::NOT_FOUND));
    }

    #[tokio::test]
    async fn test_context_carries_explicit_signer() {
        let network = Arc::new(MemoryNetwork::new());
        let keystore = Keystore::generate(KeyScheme::Pem).unwrap();
        network.register_keystore(&keystore).unwrap();
        let client = Client::from_keystore(&keystore, network.clone()).unwrap();

        // A context built from a different credential is rejected by the service
        let stranger = Credential::from_keystore(&Keystore::generate(KeyScheme::Pem).unwrap()).unwrap();
        let ctx = RequestContext::new(&stranger, &NopVerifier, DEFAULT_TOKEN_TTL);
        let err = client
            .get::<IgnoredAny>(&ctx, "/multisigs/requests/missing")
            .await
            .unwrap_err();
        assert_eq!(err.api_code(), Some(codes::UNAUTHORIZED));
    }
}
