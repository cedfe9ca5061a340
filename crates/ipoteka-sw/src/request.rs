//! Request and response model plus the network seam.

use async_trait::async_trait;
use bytes::Bytes;
use hashbrown::HashMap;
use http::Method;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use url::Url;

use crate::ServiceWorkerError;

/// A request as seen by the worker: just a method and an absolute URL.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheableRequest {
    pub method: Method,
    pub url: Url,
}

impl CacheableRequest {
    /// Create a request.
    pub fn new(method: Method, url: Url) -> Self {
        Self { method, url }
    }

    /// Create a GET request.
    pub fn get(url: Url) -> Self {
        Self::new(Method::GET, url)
    }

    /// Parse a method name and absolute URL.
    pub fn parse(method: &str, url: &str) -> Result<Self, ServiceWorkerError> {
        let method = Method::from_bytes(method.as_bytes())
            .map_err(|e| ServiceWorkerError::InvalidRequest(format!("{method}: {e}")))?;
        let url =
            Url::parse(url).map_err(|e| ServiceWorkerError::InvalidRequest(format!("{url}: {e}")))?;
        Ok(Self { method, url })
    }

    /// Whether this is a GET request.
    pub fn is_get(&self) -> bool {
        self.method == Method::GET
    }

    /// Key under which the request is stored in a cache.
    pub fn cache_key(&self) -> String {
        cache_key(self.method.as_str(), self.url.as_str())
    }
}

pub(crate) fn cache_key(method: &str, url: &str) -> String {
    format!("{method} {url}")
}

/// Response type, following the Fetch standard.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResponseType {
    /// Same-origin response.
    #[default]
    Basic,
    /// Cross-origin response with CORS.
    Cors,
    /// Cross-origin response without CORS; status and body are hidden.
    Opaque,
    /// Network error placeholder.
    Error,
}

/// A response as seen by the worker.
#[derive(Debug, Clone, PartialEq)]
pub struct CacheableResponse {
    /// HTTP status code (0 for network errors and opaque responses).
    pub status: u16,

    /// Response type.
    pub response_type: ResponseType,

    /// Response headers.
    pub headers: HashMap<String, String>,

    /// Response body.
    pub body: Bytes,

    /// Whether this response was served from a cache.
    pub from_cache: bool,
}

impl CacheableResponse {
    /// Create a basic response.
    pub fn new(status: u16, body: impl Into<Bytes>) -> Self {
        Self {
            status,
            response_type: ResponseType::Basic,
            headers: HashMap::new(),
            body: body.into(),
            from_cache: false,
        }
    }

    /// Create a network error response.
    pub fn network_error() -> Self {
        Self {
            status: 0,
            response_type: ResponseType::Error,
            headers: HashMap::new(),
            body: Bytes::new(),
            from_cache: false,
        }
    }

    /// Set the response type.
    pub fn with_type(mut self, response_type: ResponseType) -> Self {
        self.response_type = response_type;
        self
    }

    /// Add a header.
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into().to_ascii_lowercase(), value.into());
        self
    }

    /// Check if the status is 2xx.
    pub fn ok(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// Check if this is a network error response.
    pub fn is_error(&self) -> bool {
        self.response_type == ResponseType::Error
    }

    /// Only a plain 200 that is not a network error may be cached.
    pub fn is_usable(&self) -> bool {
        self.status == 200 && !self.is_error()
    }
}

/// A rejected fetch: the request never produced a response.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum FetchError {
    #[error("Network unreachable: {0}")]
    Network(String),

    #[error("Request timed out")]
    Timeout,

    #[error("Invalid request: {0}")]
    InvalidRequest(String),
}

/// Performs real network fetches on behalf of the worker.
#[async_trait]
pub trait Fetcher: Send + Sync {
    /// Fetch a request. `Err` means the fetch was rejected (offline, DNS, timeout).
    async fn fetch(&self, request: &CacheableRequest) -> Result<CacheableResponse, FetchError>;
}
