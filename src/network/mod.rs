//! Network boundary
//!
//! The client speaks to the custodial service through a [`Transport`]. A
//! transport moves one signed request and returns the raw response; it does
//! not interpret bodies, sign, or verify. [`MemoryNetwork`] is an in-process
//! service honoring the same contract, used for local runs and tests.

pub mod memory;

pub use memory::MemoryNetwork;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Errors raised while moving a request
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum NetworkError {
    /// Safe to retry with backoff
    #[error("Transient network error: {0}")]
    Transient(String),
    #[error("Service unavailable: {0}")]
    Unavailable(String),
}

/// HTTP method of a call
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Method {
    Get,
    Post,
}

impl Method {
    pub fn as_str(&self) -> &'static str {
        match self {
            Method::Get => "GET",
            Method::Post => "POST",
        }
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One outgoing call
#[derive(Clone, Debug)]
pub struct ApiRequest {
    pub method: Method,
    /// Path including the query string
    pub uri: String,
    pub body: Vec<u8>,
    /// `Authorization` header value
    pub authorization: String,
    pub request_id: String,
}

impl ApiRequest {
    pub fn new(method: Method, uri: impl Into<String>, body: Vec<u8>, request_id: String) -> Self {
        Self {
            method,
            uri: uri.into(),
            body,
            authorization: String::new(),
            request_id,
        }
    }

    /// Bytes covered by the request token: method, uri, body
    pub fn canonical_bytes(&self) -> Vec<u8> {
        canonical_request(self.method, &self.uri, &self.body)
    }

    /// Path without the query string
    pub fn path(&self) -> &str {
        self.uri.split('?').next().unwrap_or_default()
    }

    /// Query parameters, undecoded
    pub fn query_pairs(&self) -> Vec<(&str, &str)> {
        match self.uri.split_once('?') {
            Some((_, query)) => query
                .split('&')
                .filter(|pair| !pair.is_empty())
                .map(|pair| pair.split_once('=').unwrap_or((pair, "")))
                .collect(),
            None => Vec::new(),
        }
    }
}

/// Canonical request bytes
pub fn canonical_request(method: Method, uri: &str, body: &[u8]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(method.as_str().len() + uri.len() + body.len());
    bytes.extend_from_slice(method.as_str().as_bytes());
    bytes.extend_from_slice(uri.as_bytes());
    bytes.extend_from_slice(body);
    bytes
}

/// A raw response
#[derive(Clone, Debug)]
pub struct ApiResponse {
    pub status: u16,
    /// Echo of the request id
    pub request_id: String,
    pub body: Vec<u8>,
    /// Service signature over [`ApiResponse::canonical_bytes`], when provided
    pub signature: Option<String>,
}

impl ApiResponse {
    /// Bytes covered by the service signature: request id then body
    pub fn canonical_bytes(&self) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(self.request_id.len() + self.body.len());
        bytes.extend_from_slice(self.request_id.as_bytes());
        bytes.extend_from_slice(&self.body);
        bytes
    }
}

/// Error object carried in a response body
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct ApiError {
    pub status: u16,
    pub code: u32,
    pub description: String,
}

impl ApiError {
    pub fn new(status: u16, code: u32, description: impl Into<String>) -> Self {
        Self {
            status,
            code,
            description: description.into(),
        }
    }
}

impl fmt::Display for ApiError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({}): {}", self.status, self.code, self.description)
    }
}

/// Error codes returned by the service
pub mod codes {
    pub const BAD_REQUEST: u32 = 10002;
    pub const UNAUTHORIZED: u32 = 401;
    pub const FORBIDDEN: u32 = 403;
    pub const NOT_FOUND: u32 = 404;
    pub const INTERNAL: u32 = 500;
    pub const PIN_INCORRECT: u32 = 20119;
    pub const PIN_REPLAYED: u32 = 20120;
    pub const INVALID_STATE: u32 = 20121;
}

/// Moves requests to the service
#[async_trait]
pub trait Transport: Send + Sync {
    async fn send(&self, request: ApiRequest) -> Result<ApiResponse, NetworkError>;
}
