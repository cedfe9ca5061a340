//! Worker configuration.
//!
//! Everything the deployed worker script hardcodes (store names, the static
//! asset list, remote-API patterns, notification defaults) lives here so it
//! can be injected per environment.

use std::path::Path;

use ipoteka_common::{IpotekaError, Result, ResultExt};
use regex::Regex;
use serde::{Deserialize, Serialize};
use url::Url;

/// Production origin of the site.
pub const DEFAULT_ORIGIN: &str = "https://ipoteka-krym.ru/";

/// Brand logo, used as the default icon and as the notification badge.
pub const BRAND_LOGO_URL: &str =
    "https://cdn.poehali.dev/files/с дескриптором черный вариант (2).png";

/// Default hero image shown in notifications.
pub const BRAND_IMAGE_URL: &str = "https://i.imgur.com/LxyQAtM.jpeg";

/// Immutable configuration for one deployed worker version.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkerConfig {
    /// Origin the worker is registered on. Same-origin requests are served cache-first.
    pub origin: Url,

    /// Name of the versioned static store. Bump on every deploy.
    pub static_cache: String,

    /// Name of the unversioned runtime store.
    pub runtime_cache: String,

    /// App shell assets populated at install time.
    pub static_assets: Vec<String>,

    /// Regular expressions selecting cross-origin URLs that get network-first caching.
    pub api_cache_patterns: Vec<String>,

    /// Request skip-waiting as soon as install succeeds.
    pub skip_waiting_on_install: bool,

    /// Fallbacks for push notifications.
    pub notifications: NotificationDefaults,
}

/// Fallback values for fields a push payload omits.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NotificationDefaults {
    pub title: String,
    pub body: String,
    pub icon: String,
    pub badge: String,
    pub image: String,
    pub tag: String,
    pub url: String,
    /// Vibration pattern in milliseconds (vibrate, pause, vibrate, ...).
    pub vibrate: Vec<u32>,
    pub open_action_title: String,
    pub close_action_title: String,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            origin: Url::parse(DEFAULT_ORIGIN).expect("default origin is a valid URL"),
            static_cache: "ipoteka-krym-v1".to_string(),
            runtime_cache: "runtime-cache".to_string(),
            static_assets: vec![
                "/".to_string(),
                "/index.html".to_string(),
                "/manifest.json".to_string(),
                BRAND_LOGO_URL.to_string(),
                BRAND_IMAGE_URL.to_string(),
            ],
            api_cache_patterns: vec![
                r"^https://functions\.poehali\.dev/".to_string(),
                r"^https://cdn\.poehali\.dev/".to_string(),
            ],
            skip_waiting_on_install: true,
            notifications: NotificationDefaults::default(),
        }
    }
}

impl Default for NotificationDefaults {
    fn default() -> Self {
        Self {
            title: "Ипотека Крым".to_string(),
            body: "Новая информация об ипотечных программах".to_string(),
            icon: BRAND_LOGO_URL.to_string(),
            badge: BRAND_LOGO_URL.to_string(),
            image: BRAND_IMAGE_URL.to_string(),
            tag: "mortgage-notification".to_string(),
            url: "/".to_string(),
            vibrate: vec![200, 100, 200],
            open_action_title: "Открыть".to_string(),
            close_action_title: "Закрыть".to_string(),
        }
    }
}

impl WorkerConfig {
    /// Create the default configuration for a different origin.
    pub fn for_origin(origin: Url) -> Self {
        Self {
            origin,
            ..Default::default()
        }
    }

    /// Load a configuration from a JSON file. Missing fields take defaults.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&raw)
            .config_context(format!("failed to parse {}", path.display()))?;
        config.validate()?;
        Ok(config)
    }

    /// Return a copy with a different static generation id.
    pub fn with_generation(mut self, static_cache: impl Into<String>) -> Self {
        self.static_cache = static_cache.into();
        self
    }

    /// Return a copy with a different static asset list.
    pub fn with_static_assets<I, S>(mut self, assets: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.static_assets = assets.into_iter().map(Into::into).collect();
        self
    }

    /// Check the configuration for values the worker cannot run with.
    pub fn validate(&self) -> Result<()> {
        if !matches!(self.origin.scheme(), "http" | "https") {
            return Err(IpotekaError::config(format!(
                "origin must be http(s), got {}",
                self.origin
            )));
        }
        if self.static_cache.is_empty() || self.runtime_cache.is_empty() {
            return Err(IpotekaError::config("store names must not be empty"));
        }
        if self.static_cache == self.runtime_cache {
            return Err(IpotekaError::config(format!(
                "static and runtime store share the name '{}'",
                self.static_cache
            )));
        }
        self.compile_patterns()?;
        self.resolve_static_assets()?;
        Ok(())
    }

    /// Compile the remote-API patterns.
    pub fn compile_patterns(&self) -> Result<Vec<Regex>> {
        self.api_cache_patterns
            .iter()
            .map(|pattern| {
                Regex::new(pattern)
                    .config_context(format!("invalid api cache pattern '{pattern}'"))
            })
            .collect()
    }

    /// Resolve the static asset list against the origin.
    pub fn resolve_static_assets(&self) -> Result<Vec<Url>> {
        self.static_assets
            .iter()
            .map(|asset| self.resolve(asset))
            .collect()
    }

    /// Resolve an absolute or root-relative URL against the origin.
    pub fn resolve(&self, url: &str) -> Result<Url> {
        self.origin
            .join(url)
            .config_context(format!("cannot resolve '{url}' against {}", self.origin))
    }

    /// Whether `url` has the same origin as the worker.
    pub fn is_same_origin(&self, url: &Url) -> bool {
        url.origin() == self.origin.origin()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_default_matches_deployed_constants() {
        let config = WorkerConfig::default();
        assert_eq!(config.static_cache, "ipoteka-krym-v1");
        assert_eq!(config.runtime_cache, "runtime-cache");
        assert_eq!(config.static_assets.len(), 5);
        assert_eq!(config.notifications.title, "Ипотека Крым");
        assert_eq!(config.notifications.url, "/");
        assert_eq!(config.notifications.vibrate, vec![200, 100, 200]);
        config.validate().unwrap();
    }

    #[test]
    fn test_resolve_static_assets() {
        let config = WorkerConfig::default();
        let urls = config.resolve_static_assets().unwrap();
        assert_eq!(urls[0].as_str(), "https://ipoteka-krym.ru/");
        assert_eq!(urls[1].as_str(), "https://ipoteka-krym.ru/index.html");
        assert_eq!(urls[4].as_str(), BRAND_IMAGE_URL);
        assert!(urls[3].as_str().starts_with("https://cdn.poehali.dev/files/"));
    }

    #[test]
    fn test_same_origin() {
        let config = WorkerConfig::default();
        assert!(config.is_same_origin(&Url::parse("https://ipoteka-krym.ru/catalog").unwrap()));
        assert!(!config.is_same_origin(&Url::parse("http://ipoteka-krym.ru/").unwrap()));
        assert!(!config.is_same_origin(&Url::parse("https://cdn.poehali.dev/x").unwrap()));
    }

    #[test]
    fn test_validate_rejects_shared_store_name() {
        let config = WorkerConfig::default().with_generation("runtime-cache");
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_bad_pattern() {
        let mut config = WorkerConfig::default();
        config.api_cache_patterns.push("^https://(".to_string());
        let err = config.validate().unwrap_err();
        assert_eq!(err.category(), "config");
    }

    #[test]
    fn test_from_file_fills_defaults() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"{{"origin": "http://localhost:8080/", "static_cache": "ipoteka-krym-v7"}}"#
        )
        .unwrap();

        let config = WorkerConfig::from_file(file.path()).unwrap();
        assert_eq!(config.origin.as_str(), "http://localhost:8080/");
        assert_eq!(config.static_cache, "ipoteka-krym-v7");
        assert_eq!(config.runtime_cache, "runtime-cache");
        assert_eq!(config.api_cache_patterns.len(), 2);
    }

    #[test]
    fn test_from_file_rejects_garbage() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "not json").unwrap();
        assert!(WorkerConfig::from_file(file.path()).is_err());
    }
}
