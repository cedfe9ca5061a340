//! Cache API: named stores of request → response snapshots.
//!
//! ```text
//! CacheStorage (caches)
//!     └── Cache (by name, creation order preserved)
//!             └── "METHOD url" → CacheEntry
//! ```

use std::path::Path;

use chrono::{DateTime, Utc};
use hashbrown::HashMap;
use ipoteka_common::Result;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::request::{cache_key, CacheableRequest, CacheableResponse, ResponseType};

/// A cached request/response pair.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheEntry {
    /// Request URL.
    pub url: String,

    /// Request method.
    pub method: String,

    /// Response status.
    pub status: u16,

    /// Response type.
    #[serde(default)]
    pub response_type: ResponseType,

    /// Response headers.
    pub headers: HashMap<String, String>,

    /// Response body.
    pub body: Vec<u8>,

    /// When the entry was written.
    pub cached_at: DateTime<Utc>,
}

impl CacheEntry {
    /// Snapshot a response for `request`.
    pub fn new(request: &CacheableRequest, response: &CacheableResponse) -> Self {
        Self {
            url: request.url.to_string(),
            method: request.method.to_string(),
            status: response.status,
            response_type: response.response_type,
            headers: response.headers.clone(),
            body: response.body.to_vec(),
            cached_at: Utc::now(),
        }
    }

    fn key(&self) -> String {
        cache_key(&self.method, &self.url)
    }

    /// Rebuild the stored response.
    pub fn to_response(&self) -> CacheableResponse {
        CacheableResponse {
            status: self.status,
            response_type: self.response_type,
            headers: self.headers.clone(),
            body: self.body.clone().into(),
            from_cache: true,
        }
    }
}

/// A single named cache.
#[derive(Debug, Default, Clone, Serialize, Deserialize)]
pub struct Cache {
    /// Cache name.
    pub name: String,

    entries: HashMap<String, CacheEntry>,
}

impl Cache {
    /// Create a new, empty cache.
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            entries: HashMap::new(),
        }
    }

    /// Match a request.
    pub fn match_request(&self, request: &CacheableRequest) -> Option<&CacheEntry> {
        self.entries.get(&request.cache_key())
    }

    /// Store a response, replacing any previous entry for the same request.
    pub fn put(&mut self, request: &CacheableRequest, response: &CacheableResponse) {
        let entry = CacheEntry::new(request, response);
        self.entries.insert(entry.key(), entry);
    }

    /// All keys, as "METHOD url".
    pub fn keys(&self) -> Vec<&str> {
        self.entries.keys().map(|s| s.as_str()).collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// All named caches of an origin (the `caches` global).
#[derive(Debug, Default, Clone, Serialize, Deserialize)]
pub struct CacheStorage {
    caches: Vec<Cache>,
}

impl CacheStorage {
    /// Create new cache storage.
    pub fn new() -> Self {
        Self::default()
    }

    /// Open a cache, creating it if it doesn't exist.
    pub fn open(&mut self, name: &str) -> &mut Cache {
        let index = match self.caches.iter().position(|c| c.name == name) {
            Some(index) => index,
            None => {
                debug!(cache = name, "Creating cache");
                self.caches.push(Cache::new(name));
                self.caches.len() - 1
            }
        };
        &mut self.caches[index]
    }

    /// Get a cache by name.
    pub fn get(&self, name: &str) -> Option<&Cache> {
        self.caches.iter().find(|c| c.name == name)
    }

    /// Check if a cache exists.
    pub fn has(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    /// Delete a cache.
    pub fn delete(&mut self, name: &str) -> bool {
        let before = self.caches.len();
        self.caches.retain(|c| c.name != name);
        before != self.caches.len()
    }

    /// Cache names in creation order.
    pub fn keys(&self) -> Vec<&str> {
        self.caches.iter().map(|c| c.name.as_str()).collect()
    }

    /// Match across all caches, oldest cache first.
    pub fn match_request(&self, request: &CacheableRequest) -> Option<&CacheEntry> {
        self.caches
            .iter()
            .find_map(|cache| cache.match_request(request))
    }

    /// Write the storage to a JSON snapshot.
    pub fn save_to(&self, path: impl AsRef<Path>) -> Result<()> {
        let json = serde_json::to_vec_pretty(self)?;
        std::fs::write(path, json)?;
        Ok(())
    }

    /// Load storage from a JSON snapshot. A missing file yields empty storage.
    pub fn load_from(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            return Ok(Self::new());
        }
        let raw = std::fs::read(path)?;
        Ok(serde_json::from_slice(&raw)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use url::Url;

    fn get(url: &str) -> CacheableRequest {
        CacheableRequest::get(Url::parse(url).unwrap())
    }

    #[test]
    fn test_cache() {
        let mut cache = Cache::new("v1");
        cache.put(
            &get("https://example.com/style.css"),
            &CacheableResponse::new(200, "body{}"),
        );

        assert!(cache.match_request(&get("https://example.com/style.css")).is_some());
        assert!(cache.match_request(&get("https://example.com/other.css")).is_none());
    }

    #[test]
    fn test_cache_key_includes_method() {
        let mut cache = Cache::new("v1");
        let url = Url::parse("https://example.com/data").unwrap();
        cache.put(&CacheableRequest::get(url.clone()), &CacheableResponse::new(200, "x"));

        let head = CacheableRequest::new(http::Method::HEAD, url);
        assert!(cache.match_request(&head).is_none());
        assert_eq!(cache.keys(), vec!["GET https://example.com/data"]);
    }

    #[test]
    fn test_cache_put_overwrites() {
        let mut cache = Cache::new("runtime");
        let request = get("https://example.com/a.js");
        cache.put(&request, &CacheableResponse::new(200, "old"));
        cache.put(&request, &CacheableResponse::new(200, "new"));

        assert_eq!(cache.len(), 1);
        let response = cache.match_request(&request).unwrap().to_response();
        assert_eq!(&response.body[..], b"new");
        assert!(response.from_cache);
    }

    #[test]
    fn test_cache_storage() {
        let mut storage = CacheStorage::new();
        assert!(!storage.has("v1"));

        storage.open("v1");
        storage.open("runtime-cache");
        storage.open("v1");
        assert_eq!(storage.keys(), vec!["v1", "runtime-cache"]);

        assert!(storage.delete("v1"));
        assert!(!storage.has("v1"));
        assert!(!storage.delete("v1"));
    }

    #[test]
    fn test_storage_match_prefers_oldest_cache() {
        let mut storage = CacheStorage::new();
        let request = get("https://example.com/");
        storage.open("static").put(&request, &CacheableResponse::new(200, "static"));
        storage.open("runtime").put(&request, &CacheableResponse::new(200, "runtime"));

        let entry = storage.match_request(&request).unwrap();
        assert_eq!(entry.body, b"static");
    }

    #[test]
    fn test_snapshot_roundtrip_preserves_order() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("caches.json");

        let mut storage = CacheStorage::new();
        storage
            .open("ipoteka-krym-v1")
            .put(&get("https://ipoteka-krym.ru/"), &CacheableResponse::new(200, "<html>"));
        storage.open("runtime-cache");
        storage.save_to(&path).unwrap();

        let loaded = CacheStorage::load_from(&path).unwrap();
        assert_eq!(loaded.keys(), vec!["ipoteka-krym-v1", "runtime-cache"]);
        let entry = loaded.match_request(&get("https://ipoteka-krym.ru/")).unwrap();
        assert_eq!(entry.body, b"<html>");
    }

    #[test]
    fn test_load_missing_snapshot_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let loaded = CacheStorage::load_from(dir.path().join("absent.json")).unwrap();
        assert!(loaded.keys().is_empty());
    }
}
