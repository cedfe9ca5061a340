//! Scripted network for unit tests.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;

use crate::request::{CacheableRequest, CacheableResponse, FetchError, Fetcher};

/// Answers from a URL table; unknown URLs and offline mode reject the fetch.
#[derive(Default)]
pub struct FakeNetwork {
    responses: Mutex<HashMap<String, CacheableResponse>>,
    failing: Mutex<HashSet<String>>,
    offline: AtomicBool,
    calls: AtomicUsize,
}

impl FakeNetwork {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn respond(&self, url: &str, response: CacheableResponse) {
        self.responses.lock().unwrap().insert(url.to_string(), response);
    }

    pub fn fail(&self, url: &str) {
        self.failing.lock().unwrap().insert(url.to_string());
    }

    pub fn go_offline(&self) {
        self.offline.store(true, Ordering::SeqCst);
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Fetcher for FakeNetwork {
    async fn fetch(&self, request: &CacheableRequest) -> Result<CacheableResponse, FetchError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let url = request.url.as_str();
        if self.offline.load(Ordering::SeqCst) || self.failing.lock().unwrap().contains(url) {
            return Err(FetchError::Network(format!("{url} unreachable")));
        }
        self.responses
            .lock()
            .unwrap()
            .get(url)
            .cloned()
            .ok_or_else(|| FetchError::Network(format!("no route to {url}")))
    }
}
