//! Worker configuration

use crate::types::{CacheVersion, KeyPolicy, UrlPattern};
use favcache_common::{FavCacheError, LogConfig};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::debug;
use url::Url;

/// Cache generation used when nothing else is configured.
pub const DEFAULT_CACHE_VERSION: &str = "1.0.0-broken";

/// Static assets cached at install time, relative to the scope.
pub const DEFAULT_PRECACHE: &[&str] = &[
    "gifs.html",
    "assets/blocks.js",
    "assets/star.svg",
    "assets/style.css",
    "assets/templates.js",
    "vendor/bem-components-dist-5.0.0/touch-phone/bem-components.dev.css",
    "vendor/bem-components-dist-5.0.0/touch-phone/bem-components.dev.js",
    "vendor/kv-keeper.js-1.0.4/kv-keeper.js",
    "vendor/kv-keeper.js-1.0.4/kv-keeper.typedef.js",
];

/// Worker configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkerConfig {
    /// Scope URL; precache paths resolve against it
    pub scope: String,

    /// Current cache generation
    pub cache_version: String,

    /// Precache manifest
    pub precache: Vec<String>,

    /// Keys matching any rule are persisted on fetch
    pub persist_rules: Vec<UrlPattern>,

    /// Cache key construction
    pub key_policy: KeyPolicy,

    /// Key-value namespace for favorite records
    pub favorites_prefix: String,

    /// Directory for the key-value file and cache snapshot
    pub data_dir: PathBuf,

    /// Network timeout; none means a hung fetch blocks its unit of work
    pub fetch_timeout_ms: Option<u64>,

    /// Serve a cache hit if the revalidating fetch takes longer than this
    pub revalidate_timeout_ms: Option<u64>,

    /// User agent string
    pub user_agent: String,

    /// Maximum number of redirects followed
    pub max_redirects: usize,

    /// Logging
    pub log: LogConfig,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            scope: "http://localhost:8080/".to_string(),
            cache_version: DEFAULT_CACHE_VERSION.to_string(),
            precache: DEFAULT_PRECACHE.iter().map(|s| s.to_string()).collect(),
            persist_rules: Self::default_persist_rules(),
            key_policy: KeyPolicy::default(),
            favorites_prefix: "favorites:".to_string(),
            data_dir: dirs::data_dir()
                .unwrap_or_else(|| PathBuf::from("."))
                .join("favcache"),
            fetch_timeout_ms: None,
            revalidate_timeout_ms: None,
            user_agent: format!("favcache/{}", env!("CARGO_PKG_VERSION")),
            max_redirects: 10,
            log: LogConfig::default(),
        }
    }
}

impl WorkerConfig {
    /// Static assets, vendored libraries, the main page and jQuery.
    pub fn default_persist_rules() -> Vec<UrlPattern> {
        vec![
            UrlPattern::contains("vendor/"),
            UrlPattern::contains("assets/"),
            UrlPattern::suffix("gifs.html"),
            UrlPattern::suffix("jquery.min.js"),
        ]
    }

    /// Parse a JSON config. Missing fields take their defaults.
    pub fn from_json(json: &str) -> Result<Self, FavCacheError> {
        serde_json::from_str(json)
            .map_err(|e| FavCacheError::config_with_source("invalid config JSON", e))
    }

    /// Load from a file, apply environment overrides and validate.
    pub fn load(path: &Path) -> Result<Self, FavCacheError> {
        debug!(path = %path.display(), "Loading worker config");
        let text = std::fs::read_to_string(path)?;
        let mut config = Self::from_json(&text)?;
        config.apply_env();
        config.validate()?;
        Ok(config)
    }

    /// `FAVCACHE_CACHE_VERSION` and `FAVCACHE_SCOPE` override the file.
    pub fn apply_env(&mut self) {
        if let Ok(version) = std::env::var("FAVCACHE_CACHE_VERSION") {
            self.cache_version = version;
        }
        if let Ok(scope) = std::env::var("FAVCACHE_SCOPE") {
            self.scope = scope;
        }
    }

    pub fn validate(&self) -> Result<(), FavCacheError> {
        if self.cache_version.trim().is_empty() {
            return Err(FavCacheError::config("cache_version must not be empty"));
        }
        if self.favorites_prefix.is_empty() {
            return Err(FavCacheError::config("favorites_prefix must not be empty"));
        }
        self.scope_url()?;
        self.precache_urls()?;
        Ok(())
    }

    pub fn scope_url(&self) -> Result<Url, FavCacheError> {
        Url::parse(&self.scope).map_err(|e| {
            FavCacheError::config_with_source(format!("invalid scope '{}'", self.scope), e)
        })
    }

    /// Precache entries resolved against the scope, in manifest order.
    pub fn precache_urls(&self) -> Result<Vec<Url>, FavCacheError> {
        let scope = self.scope_url()?;
        self.precache
            .iter()
            .map(|entry| {
                scope.join(entry).map_err(|e| {
                    let message = format!("invalid precache entry '{}'", entry);
                    FavCacheError::config_with_source(message, e)
                })
            })
            .collect()
    }

    pub fn version(&self) -> CacheVersion {
        CacheVersion::new(self.cache_version.clone())
    }

    pub fn fetch_timeout(&self) -> Option<Duration> {
        self.fetch_timeout_ms.map(Duration::from_millis)
    }

    pub fn revalidate_timeout(&self) -> Option<Duration> {
        self.revalidate_timeout_ms.map(Duration::from_millis)
    }

    /// Key-value file inside the data directory.
    pub fn store_path(&self) -> PathBuf {
        self.data_dir.join("kv-keeper.json")
    }

    /// Cache snapshot inside the data directory.
    pub fn caches_path(&self) -> PathBuf {
        self.data_dir.join("caches.json")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults() {
        let config = WorkerConfig::default();
        assert_eq!(config.version().as_str(), DEFAULT_CACHE_VERSION);
        assert_eq!(config.persist_rules.len(), 4);
        assert!(config.fetch_timeout().is_none());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_precache_resolves_against_scope() {
        let config = WorkerConfig {
            scope: "https://gifs.test/app/".to_string(),
            ..Default::default()
        };
        let urls = config.precache_urls().unwrap();
        assert_eq!(urls.len(), DEFAULT_PRECACHE.len());
        assert_eq!(urls[0].as_str(), "https://gifs.test/app/gifs.html");
        assert_eq!(urls[1].as_str(), "https://gifs.test/app/assets/blocks.js");
    }

    #[test]
    fn test_partial_json_keeps_defaults() {
        let config = WorkerConfig::from_json(
            r#"{
                "cache_version": "2.0.0",
                "key_policy": "sorted-query",
                "revalidate_timeout_ms": 250
            }"#,
        )
        .unwrap();
        assert_eq!(config.cache_version, "2.0.0");
        assert_eq!(config.key_policy, KeyPolicy::SortedQuery);
        assert_eq!(config.revalidate_timeout(), Some(Duration::from_millis(250)));
        assert_eq!(config.favorites_prefix, "favorites:");
    }

    #[test]
    fn test_persist_rules_from_json() {
        let config = WorkerConfig::from_json(
            r#"{"persist_rules": [{"type": "suffix", "pattern": ".css"}]}"#,
        )
        .unwrap();
        assert_eq!(config.persist_rules, vec![UrlPattern::suffix(".css")]);
    }

    #[test]
    fn test_validate_rejects_bad_scope() {
        let config = WorkerConfig {
            scope: "not a url".to_string(),
            ..Default::default()
        };
        assert!(matches!(
            config.validate(),
            Err(FavCacheError::Config { .. })
        ));
    }

    #[test]
    fn test_validate_rejects_empty_version() {
        let config = WorkerConfig {
            cache_version: "  ".to_string(),
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{"scope": "https://gifs.test/", "data_dir": "/tmp/fc"}}"#).unwrap();

        let config = WorkerConfig::load(file.path()).unwrap();
        assert_eq!(config.store_path(), PathBuf::from("/tmp/fc/kv-keeper.json"));
        assert_eq!(config.caches_path(), PathBuf::from("/tmp/fc/caches.json"));
    }
}
