//! Fetch interception: picks a caching strategy per request.
//!
//! | Request | Strategy |
//! |---------|----------|
//! | non-GET | not intercepted |
//! | same origin | cache first, populate runtime store on miss |
//! | cross origin, matches an API pattern | network first, cache fallback when offline |
//! | any other cross origin | not intercepted |

use std::sync::Arc;

use regex::Regex;
use tokio::sync::RwLock;
use tracing::{debug, trace, warn};

use crate::cache::CacheStorage;
use crate::config::WorkerConfig;
use crate::request::{CacheableRequest, CacheableResponse, Fetcher};
use crate::ServiceWorkerError;

/// Strategy chosen for an intercepted request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Strategy {
    /// Serve from any cache; on a miss fetch and store usable responses.
    CacheFirst,
    /// Fetch; on a rejected fetch serve the cached copy.
    NetworkFirst,
}

/// Result of dispatching a fetch event.
#[derive(Debug, Clone, PartialEq)]
pub enum FetchOutcome {
    /// The worker did not respond; the page performs a normal network fetch.
    NotIntercepted,
    /// The worker responded.
    Respond(CacheableResponse),
}

impl FetchOutcome {
    pub fn response(&self) -> Option<&CacheableResponse> {
        match self {
            FetchOutcome::Respond(response) => Some(response),
            FetchOutcome::NotIntercepted => None,
        }
    }
}

/// Routes intercepted requests to a caching strategy.
pub struct FetchRouter {
    config: Arc<WorkerConfig>,
    api_patterns: Vec<Regex>,
    caches: Arc<RwLock<CacheStorage>>,
    fetcher: Arc<dyn Fetcher>,
}

impl FetchRouter {
    /// Create a router. Fails if an API pattern does not compile.
    pub fn new(
        config: Arc<WorkerConfig>,
        caches: Arc<RwLock<CacheStorage>>,
        fetcher: Arc<dyn Fetcher>,
    ) -> Result<Self, ServiceWorkerError> {
        let api_patterns = config.compile_patterns()?;
        Ok(Self {
            config,
            api_patterns,
            caches,
            fetcher,
        })
    }

    /// Pick a strategy, or `None` if the request is left to the network.
    pub fn classify(&self, request: &CacheableRequest) -> Option<Strategy> {
        if !request.is_get() {
            return None;
        }
        if self.config.is_same_origin(&request.url) {
            return Some(Strategy::CacheFirst);
        }
        let url = request.url.as_str();
        if self.api_patterns.iter().any(|p| p.is_match(url)) {
            return Some(Strategy::NetworkFirst);
        }
        None
    }

    /// Handle a fetch event.
    pub async fn handle(&self, request: &CacheableRequest) -> Result<FetchOutcome, ServiceWorkerError> {
        let Some(strategy) = self.classify(request) else {
            trace!(method = %request.method, url = %request.url, "Not intercepted");
            return Ok(FetchOutcome::NotIntercepted);
        };
        debug!(url = %request.url, ?strategy, "Intercepted fetch");

        let response = match strategy {
            Strategy::CacheFirst => self.cache_first(request).await?,
            Strategy::NetworkFirst => self.network_first(request).await?,
        };
        Ok(FetchOutcome::Respond(response))
    }

    async fn cache_first(&self, request: &CacheableRequest) -> Result<CacheableResponse, ServiceWorkerError> {
        if let Some(cached) = self.cached(request).await {
            debug!(url = %request.url, "Cache hit");
            return Ok(cached);
        }

        let response = self.fetcher.fetch(request).await?;
        if response.is_usable() {
            self.store_runtime(request, &response).await;
        } else {
            debug!(url = %request.url, status = response.status, "Not caching unusable response");
        }
        Ok(response)
    }

    async fn network_first(&self, request: &CacheableRequest) -> Result<CacheableResponse, ServiceWorkerError> {
        match self.fetcher.fetch(request).await {
            Ok(response) => {
                if response.is_usable() {
                    self.store_runtime(request, &response).await;
                } else {
                    debug!(url = %request.url, status = response.status, "Not caching unusable response");
                }
                Ok(response)
            }
            Err(e) => match self.cached(request).await {
                Some(cached) => {
                    warn!(url = %request.url, error = %e, "Network failed, serving cached copy");
                    Ok(cached)
                }
                None => {
                    warn!(url = %request.url, error = %e, "Network failed, nothing cached");
                    Err(e.into())
                }
            },
        }
    }

    async fn cached(&self, request: &CacheableRequest) -> Option<CacheableResponse> {
        let caches = self.caches.read().await;
        caches.match_request(request).map(|entry| entry.to_response())
    }

    async fn store_runtime(&self, request: &CacheableRequest, response: &CacheableResponse) {
        let mut caches = self.caches.write().await;
        caches.open(&self.config.runtime_cache).put(request, response);
        trace!(url = %request.url, cache = %self.config.runtime_cache, "Stored response");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::FakeNetwork;
    use url::Url;

    fn router(network: Arc<FakeNetwork>) -> (FetchRouter, Arc<RwLock<CacheStorage>>) {
        let caches = Arc::new(RwLock::new(CacheStorage::new()));
        let router = FetchRouter::new(
            Arc::new(WorkerConfig::default()),
            Arc::clone(&caches),
            network,
        )
        .unwrap();
        (router, caches)
    }

    fn get(url: &str) -> CacheableRequest {
        CacheableRequest::get(Url::parse(url).unwrap())
    }

    #[test]
    fn test_classify() {
        let (router, _) = router(Arc::new(FakeNetwork::new()));

        assert_eq!(router.classify(&get("https://ipoteka-krym.ru/catalog")), Some(Strategy::CacheFirst));
        assert_eq!(
            router.classify(&get("https://functions.poehali.dev/abc")),
            Some(Strategy::NetworkFirst)
        );
        assert_eq!(
            router.classify(&get("https://cdn.poehali.dev/files/logo.png")),
            Some(Strategy::NetworkFirst)
        );
        assert_eq!(router.classify(&get("https://mc.yandex.ru/watch")), None);
        assert_eq!(router.classify(&get("https://evil.example/https://cdn.poehali.dev/")), None);

        let post = CacheableRequest::parse("POST", "https://ipoteka-krym.ru/api").unwrap();
        assert_eq!(router.classify(&post), None);
    }

    #[tokio::test]
    async fn test_cache_hit_skips_network() {
        let network = Arc::new(FakeNetwork::new());
        let (router, caches) = router(Arc::clone(&network));
        let request = get("https://ipoteka-krym.ru/index.html");
        caches
            .write()
            .await
            .open("ipoteka-krym-v1")
            .put(&request, &CacheableResponse::new(200, "<html>cached</html>"));

        let outcome = router.handle(&request).await.unwrap();
        let response = outcome.response().unwrap();
        assert_eq!(&response.body[..], b"<html>cached</html>");
        assert!(response.from_cache);
        assert_eq!(network.calls(), 0);
    }

    #[tokio::test]
    async fn test_miss_populates_runtime() {
        let network = Arc::new(FakeNetwork::new());
        network.respond("https://ipoteka-krym.ru/about", CacheableResponse::new(200, "about"));
        let (router, caches) = router(Arc::clone(&network));
        let request = get("https://ipoteka-krym.ru/about");

        let first = router.handle(&request).await.unwrap();
        assert!(!first.response().unwrap().from_cache);
        let second = router.handle(&request).await.unwrap();
        assert!(second.response().unwrap().from_cache);
        assert_eq!(&second.response().unwrap().body[..], b"about");
        assert_eq!(network.calls(), 1);

        let caches = caches.read().await;
        assert!(caches.get("runtime-cache").unwrap().match_request(&request).is_some());
    }

    #[tokio::test]
    async fn test_unusable_response_not_cached() {
        let network = Arc::new(FakeNetwork::new());
        network.respond("https://ipoteka-krym.ru/missing", CacheableResponse::new(404, "nope"));
        let (router, caches) = router(Arc::clone(&network));
        let request = get("https://ipoteka-krym.ru/missing");

        let outcome = router.handle(&request).await.unwrap();
        assert_eq!(outcome.response().unwrap().status, 404);
        router.handle(&request).await.unwrap();
        assert_eq!(network.calls(), 2);
        assert!(caches.read().await.match_request(&request).is_none());
    }

    #[tokio::test]
    async fn test_same_origin_network_failure_propagates() {
        let network = Arc::new(FakeNetwork::new());
        let (router, _) = router(Arc::clone(&network));

        let err = router.handle(&get("https://ipoteka-krym.ru/offline")).await.unwrap_err();
        assert!(matches!(err, ServiceWorkerError::Network(_)));
    }

    #[tokio::test]
    async fn test_network_first_falls_back_to_cache() {
        let network = Arc::new(FakeNetwork::new());
        let url = "https://functions.poehali.dev/rates";
        network.respond(url, CacheableResponse::new(200, r#"{"rate": 6}"#));
        let (router, _) = router(Arc::clone(&network));
        let request = get(url);

        let live = router.handle(&request).await.unwrap();
        assert!(!live.response().unwrap().from_cache);

        network.go_offline();
        let fallback = router.handle(&request).await.unwrap();
        let response = fallback.response().unwrap();
        assert!(response.from_cache);
        assert_eq!(&response.body[..], br#"{"rate": 6}"#);
        assert_eq!(network.calls(), 2);
    }

    #[tokio::test]
    async fn test_network_first_prefers_live_data() {
        let network = Arc::new(FakeNetwork::new());
        let url = "https://functions.poehali.dev/rates";
        network.respond(url, CacheableResponse::new(200, "old"));
        let (router, _) = router(Arc::clone(&network));
        let request = get(url);
        router.handle(&request).await.unwrap();

        network.respond(url, CacheableResponse::new(200, "new"));
        let outcome = router.handle(&request).await.unwrap();
        assert_eq!(&outcome.response().unwrap().body[..], b"new");
    }

    #[tokio::test]
    async fn test_network_first_passes_error_status_through() {
        let network = Arc::new(FakeNetwork::new());
        let url = "https://functions.poehali.dev/rates";
        network.respond(url, CacheableResponse::new(200, "fresh"));
        let (router, caches) = router(Arc::clone(&network));
        let request = get(url);
        router.handle(&request).await.unwrap();

        network.respond(url, CacheableResponse::new(503, "maintenance"));
        let outcome = router.handle(&request).await.unwrap();
        let response = outcome.response().unwrap();
        assert_eq!(response.status, 503);
        assert_eq!(&response.body[..], b"maintenance");
        assert!(!response.from_cache);

        let caches = caches.read().await;
        let stored = caches.match_request(&request).unwrap();
        assert_eq!(stored.status, 200);
        assert_eq!(stored.body, b"fresh");
    }

    #[tokio::test]
    async fn test_network_first_without_cache_fails() {
        let network = Arc::new(FakeNetwork::new());
        let (router, _) = router(Arc::clone(&network));

        let result = router.handle(&get("https://cdn.poehali.dev/files/new.png")).await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_non_get_bypasses() {
        let network = Arc::new(FakeNetwork::new());
        let (router, caches) = router(Arc::clone(&network));

        for method in ["POST", "PUT", "DELETE"] {
            let request = CacheableRequest::parse(method, "https://ipoteka-krym.ru/api/lead").unwrap();
            assert_eq!(router.handle(&request).await.unwrap(), FetchOutcome::NotIntercepted);
        }
        assert_eq!(network.calls(), 0);
        assert!(caches.read().await.keys().is_empty());
    }
}
