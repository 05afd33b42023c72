//! Cache controller: fetch interception, priming and eviction.

use std::sync::Arc;
use std::time::Duration;

use favcache_common::timeout::with_timeout;
use favcache_core::CacheVersion;
use favcache_kv::FavoritesRegistry;
use favcache_net::{Fetcher, Request, Response};
use futures::future::join_all;
use http::HeaderMap;
use tracing::{debug, info, instrument, warn};
use url::Url;

use crate::cache::{CacheEntry, SharedCacheStorage};
use crate::policy::{RequestPolicy, Route};
use crate::ServiceWorkerError;

// ==================== Fetch Response ====================

/// Response handed back to the intercepted fetch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchResponse {
    /// Response URL.
    pub url: String,

    /// Status code.
    pub status: u16,

    /// Response headers.
    pub headers: HeaderMap,

    /// Response body.
    pub body: Vec<u8>,

    /// Whether from cache.
    pub from_cache: bool,
}

impl FetchResponse {
    /// Create a response from cache entry.
    pub fn from_cache(entry: &CacheEntry) -> Self {
        Self {
            url: entry.url.clone(),
            status: entry.status,
            headers: entry.headers.clone(),
            body: entry.body.clone(),
            from_cache: true,
        }
    }

    /// Create a response from a network response.
    pub fn from_network(response: &Response) -> Self {
        Self {
            url: response.url.to_string(),
            status: response.status.as_u16(),
            headers: response.headers.clone(),
            body: response.body().to_vec(),
            from_cache: false,
        }
    }

    pub fn ok(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

// ==================== Controller ====================

/// Serves intercepted fetches and fills the current cache store.
///
/// Cloning is cheap; clones share the cache storage and the fetcher.
#[derive(Clone)]
pub struct CacheController {
    version: CacheVersion,
    caches: SharedCacheStorage,
    fetcher: Arc<dyn Fetcher>,
    policy: Arc<RequestPolicy>,
    revalidate_timeout: Option<Duration>,
}

impl std::fmt::Debug for CacheController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CacheController")
            .field("version", &self.version)
            .field("policy", &self.policy)
            .field("revalidate_timeout", &self.revalidate_timeout)
            .finish_non_exhaustive()
    }
}

impl CacheController {
    pub fn new(
        version: CacheVersion,
        caches: SharedCacheStorage,
        fetcher: Arc<dyn Fetcher>,
        policy: RequestPolicy,
    ) -> Self {
        Self {
            version,
            caches,
            fetcher,
            policy: Arc::new(policy),
            revalidate_timeout: None,
        }
    }

    /// Serve the cached copy of a persisted key when revalidation takes
    /// longer than `timeout`.
    pub fn with_revalidate_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.revalidate_timeout = timeout;
        self
    }

    pub fn version(&self) -> &CacheVersion {
        &self.version
    }

    pub fn caches(&self) -> &SharedCacheStorage {
        &self.caches
    }

    pub fn policy(&self) -> &RequestPolicy {
        &self.policy
    }

    pub fn should_persist(&self, key: &str) -> bool {
        self.policy.should_persist(key)
    }

    pub fn cache_key(&self, url: &Url) -> String {
        self.policy.cache_key(url)
    }

    /// Serve an intercepted request.
    #[instrument(skip(self, request), fields(url = %request.url))]
    pub async fn handle_request(
        &self,
        request: Request,
    ) -> Result<FetchResponse, ServiceWorkerError> {
        match self.policy.route(&request) {
            Route::Persist { key } => self.revalidate(request, key).await,
            Route::NetworkFirst { fallback_key } => {
                self.network_first(request, &fallback_key).await
            }
        }
    }

    async fn revalidate(
        &self,
        request: Request,
        key: String,
    ) -> Result<FetchResponse, ServiceWorkerError> {
        let cached = self.match_key(&key).await;

        let result = match (self.revalidate_timeout, &cached) {
            (Some(timeout), Some(entry)) => {
                let this = self.clone();
                let task_key = key.clone();
                let task =
                    tokio::spawn(async move { this.fetch_and_put(request, &task_key).await });

                match with_timeout(timeout, || task).await {
                    Ok(Ok(result)) => result,
                    Ok(Err(join)) => Err(ServiceWorkerError::NetworkError(join.to_string())),
                    Err(_) => {
                        debug!(key = %key, ?timeout, "Revalidation slow, serving cached copy");
                        return Ok(FetchResponse::from_cache(entry));
                    }
                }
            }
            _ => self.fetch_and_put(request, &key).await,
        };

        match result {
            Ok(response) => Ok(FetchResponse::from_network(&response)),
            Err(e) => match cached {
                Some(entry) => {
                    warn!(key = %key, error = %e, "Fetch failed, serving cached copy");
                    Ok(FetchResponse::from_cache(&entry))
                }
                None => {
                    warn!(key = %key, error = %e, "Fetch failed, nothing cached");
                    Err(e)
                }
            },
        }
    }

    async fn network_first(
        &self,
        request: Request,
        fallback_key: &str,
    ) -> Result<FetchResponse, ServiceWorkerError> {
        match self.fetch_ok(request).await {
            Ok(response) => Ok(FetchResponse::from_network(&response)),
            Err(e) => match self.match_key(fallback_key).await {
                Some(entry) => {
                    info!(url = fallback_key, "Falling back to offline cache");
                    Ok(FetchResponse::from_cache(&entry))
                }
                None => Err(e),
            },
        }
    }

    /// Fetch, treating any non-2xx status as a failure.
    async fn fetch_ok(&self, request: Request) -> Result<Response, ServiceWorkerError> {
        let response = self.fetcher.fetch(request).await?;
        Ok(response.error_for_status()?)
    }

    async fn fetch_and_put(
        &self,
        request: Request,
        key: &str,
    ) -> Result<Response, ServiceWorkerError> {
        let response = self.fetch_ok(request).await?;
        self.put(key, &response).await;
        Ok(response)
    }

    /// Fetch one URL and store it under its response URL.
    async fn cache_url(&self, url: &str) -> Result<(), ServiceWorkerError> {
        let request = Request::parse(url)?;
        let response = self.fetch_ok(request).await?;
        self.put(response.url.as_str(), &response).await;
        Ok(())
    }

    /// Fetch and cache every URL concurrently.
    ///
    /// Each URL is independent: a failure neither cancels nor rolls back
    /// its siblings. Failures are reported together once all have settled.
    pub async fn cache_urls(&self, urls: &[String]) -> Result<usize, ServiceWorkerError> {
        let total = urls.len();
        let results = join_all(urls.iter().map(|url| self.cache_url(url))).await;

        let failed: Vec<(String, String)> = urls
            .iter()
            .zip(results)
            .filter_map(|(url, result)| result.err().map(|e| (url.clone(), e.to_string())))
            .collect();

        if failed.is_empty() {
            debug!(total, version = %self.version, "Cached URLs");
            Ok(total)
        } else {
            for (url, reason) in &failed {
                warn!(url = %url, reason = %reason, "Failed to cache");
            }
            Err(ServiceWorkerError::PrimeFailed { failed, total })
        }
    }

    /// Open the current store and cache the static manifest.
    pub async fn prime_from_manifest(&self, urls: &[Url]) -> Result<usize, ServiceWorkerError> {
        self.caches.write().await.open(self.version.as_str());
        let urls: Vec<String> = urls.iter().map(|u| u.as_str().to_string()).collect();
        let cached = self.cache_urls(&urls).await?;
        info!(cached, version = %self.version, "Primed static manifest");
        Ok(cached)
    }

    /// Cache every image of every stored favorite.
    pub async fn prime_favorites(
        &self,
        registry: &FavoritesRegistry,
    ) -> Result<usize, ServiceWorkerError> {
        let urls = registry.image_urls().await?;
        let cached = self.cache_urls(&urls).await?;
        info!(cached, "Primed favorites");
        Ok(cached)
    }

    /// Delete every cache store not named by the current version.
    pub async fn evict_obsolete(&self) -> Vec<String> {
        let mut caches = self.caches.write().await;
        let obsolete: Vec<String> = caches
            .keys()
            .into_iter()
            .filter(|name| *name != self.version.as_str())
            .map(str::to_string)
            .collect();

        for name in &obsolete {
            info!(cache = %name, "Deleting obsolete cache");
            caches.delete(name);
        }
        obsolete
    }

    /// Look a key up across all stores.
    pub async fn match_key(&self, key: &str) -> Option<CacheEntry> {
        self.caches.read().await.match_request(key).cloned()
    }

    /// Store a response in the current store.
    pub async fn put(&self, key: &str, response: &Response) {
        let entry = CacheEntry::from_response(response);
        self.caches
            .write()
            .await
            .open(self.version.as_str())
            .put(key, entry);
        debug!(key, status = response.status.as_u16(), "Cached response");
    }
}
