//! Request routing: which responses are kept for offline use and under
//! which key.

use favcache_core::{KeyPolicy, UrlPattern, WorkerConfig};
use favcache_net::Request;
use tracing::trace;
use url::Url;

/// How an intercepted request is served.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Route {
    /// Revalidate from the network, store under `key`, fall back to the
    /// stored copy.
    Persist { key: String },
    /// Network first; on failure match the cache by the raw request URL.
    NetworkFirst { fallback_key: String },
}

/// Static allow-list of keys worth keeping offline, plus the key policy.
///
/// Matching is purely on the key string. Anything whose path happens to
/// match a rule is persisted, whatever its content type.
#[derive(Debug, Clone)]
pub struct RequestPolicy {
    persist_rules: Vec<UrlPattern>,
    key_policy: KeyPolicy,
}

impl RequestPolicy {
    pub fn new(persist_rules: Vec<UrlPattern>, key_policy: KeyPolicy) -> Self {
        Self {
            persist_rules,
            key_policy,
        }
    }

    pub fn from_config(config: &WorkerConfig) -> Self {
        Self::new(config.persist_rules.clone(), config.key_policy)
    }

    pub fn key_policy(&self) -> KeyPolicy {
        self.key_policy
    }

    /// Whether a normalized key is kept for offline use.
    pub fn should_persist(&self, key: &str) -> bool {
        self.persist_rules.iter().any(|rule| rule.matches(key))
    }

    /// Normalized cache key for a URL.
    pub fn cache_key(&self, url: &Url) -> String {
        self.key_policy.key_for(url)
    }

    /// Decide how to serve a request.
    ///
    /// The network-first fallback uses the raw URL, not the normalized key,
    /// so it only finds entries stored under their response URL.
    pub fn route(&self, request: &Request) -> Route {
        let key = self.cache_key(&request.url);
        let route = if self.should_persist(&key) {
            Route::Persist { key }
        } else {
            Route::NetworkFirst {
                fallback_key: request.url.as_str().to_string(),
            }
        };
        trace!(url = %request.url, ?route, "Routed request");
        route
    }
}

impl Default for RequestPolicy {
    fn default() -> Self {
        Self::new(WorkerConfig::default_persist_rules(), KeyPolicy::default())
    }
}
