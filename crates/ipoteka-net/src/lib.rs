//! # Ipoteka Net
//!
//! `reqwest`-backed network for the offline worker: every fetch the worker
//! decides to send to the network goes through [`HttpFetcher`].

use std::time::Duration;

use async_trait::async_trait;
use hashbrown::HashMap;
use ipoteka_sw::{CacheableRequest, CacheableResponse, FetchError, Fetcher, ResponseType};
use reqwest::Client;
use thiserror::Error;
use tracing::{debug, info, trace};
use url::Url;

/// Errors that can occur while setting up the network.
#[derive(Error, Debug)]
pub enum NetError {
    #[error("Failed to build HTTP client: {0}")]
    ClientBuild(#[from] reqwest::Error),
}

/// HTTP client configuration.
#[derive(Debug, Clone)]
pub struct LoaderConfig {
    /// User agent string.
    pub user_agent: String,
    /// Accept-Language header.
    pub accept_language: String,
    /// Per-request timeout. `None` waits as long as the server does.
    pub timeout: Option<Duration>,
    /// Maximum redirects.
    pub max_redirects: usize,
    /// Worker origin; responses from it are `basic`, others `cors`.
    pub origin: Option<Url>,
}

impl Default for LoaderConfig {
    fn default() -> Self {
        Self {
            user_agent: format!("ipoteka-sw/{}", env!("CARGO_PKG_VERSION")),
            accept_language: "ru-RU,ru;q=0.9,en;q=0.8".to_string(),
            timeout: None,
            max_redirects: 10,
            origin: None,
        }
    }
}

impl LoaderConfig {
    /// Default configuration for a worker on `origin`.
    pub fn for_origin(origin: Url) -> Self {
        Self {
            origin: Some(origin),
            ..Default::default()
        }
    }
}

/// Network backend over `reqwest`.
pub struct HttpFetcher {
    client: Client,
    config: LoaderConfig,
}

impl HttpFetcher {
    /// Create a fetcher.
    pub fn new(config: LoaderConfig) -> Result<Self, NetError> {
        let mut builder = Client::builder()
            .user_agent(&config.user_agent)
            .redirect(reqwest::redirect::Policy::limited(config.max_redirects));
        if let Some(timeout) = config.timeout {
            builder = builder.timeout(timeout);
        }
        let client = builder.build()?;

        info!(origin = ?config.origin.as_ref().map(Url::as_str), "HttpFetcher initialized");
        Ok(Self { client, config })
    }

    fn response_type(&self, url: &Url) -> ResponseType {
        match self.config.origin {
            Some(ref origin) if origin.origin() == url.origin() => ResponseType::Basic,
            Some(_) => ResponseType::Cors,
            None => ResponseType::Basic,
        }
    }
}

fn map_error(e: reqwest::Error) -> FetchError {
    if e.is_timeout() {
        FetchError::Timeout
    } else if e.is_builder() {
        FetchError::InvalidRequest(e.to_string())
    } else {
        FetchError::Network(e.to_string())
    }
}

#[async_trait]
impl Fetcher for HttpFetcher {
    async fn fetch(&self, request: &CacheableRequest) -> Result<CacheableResponse, FetchError> {
        debug!(method = %request.method, url = %request.url, "Fetching");

        let response = self
            .client
            .request(request.method.clone(), request.url.clone())
            .header("Accept-Language", &self.config.accept_language)
            .send()
            .await
            .map_err(map_error)?;

        let status = response.status().as_u16();
        let response_type = self.response_type(response.url());
        let headers: HashMap<String, String> = response
            .headers()
            .iter()
            .filter_map(|(name, value)| {
                value
                    .to_str()
                    .ok()
                    .map(|v| (name.as_str().to_string(), v.to_string()))
            })
            .collect();
        let body = response.bytes().await.map_err(map_error)?;

        trace!(url = %request.url, status, body_len = body.len(), "Response received");

        Ok(CacheableResponse {
            status,
            response_type,
            headers,
            body,
            from_cache: false,
        })
    }
}
