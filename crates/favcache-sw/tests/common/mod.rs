//! Shared fixtures for worker integration tests.

#![allow(dead_code)]

use std::sync::Arc;

use favcache_core::{CacheVersion, FavoriteRecord};
use favcache_kv::{AsyncStore, FavoritesRegistry, MemoryStore};
use favcache_sw::testing::StaticFetcher;
use favcache_sw::{
    CacheController, CacheStorage, RequestPolicy, SharedCacheStorage, WorkerEvent, WorkerScope,
};
use tokio::sync::mpsc::UnboundedReceiver;
use url::Url;

pub const SCOPE: &str = "http://localhost:8080/";

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter("favcache=debug")
        .with_test_writer()
        .try_init();
}

pub struct Harness {
    pub fetcher: Arc<StaticFetcher>,
    pub memory: Arc<MemoryStore>,
    pub registry: FavoritesRegistry,
    pub caches: SharedCacheStorage,
}

impl Harness {
    pub fn new() -> Self {
        init_tracing();
        let memory = Arc::new(MemoryStore::new());
        Self {
            fetcher: Arc::new(StaticFetcher::new()),
            registry: FavoritesRegistry::new(AsyncStore::new(memory.clone())),
            memory,
            caches: CacheStorage::new().shared(),
        }
    }

    pub fn controller(&self, version: &str) -> CacheController {
        CacheController::new(
            CacheVersion::new(version),
            self.caches.clone(),
            self.fetcher.clone(),
            RequestPolicy::default(),
        )
    }

    pub fn worker(
        &self,
        version: &str,
        manifest: &[&str],
    ) -> (WorkerScope, UnboundedReceiver<WorkerEvent>) {
        let scope = Url::parse(SCOPE).unwrap();
        WorkerScope::new(
            scope.join("service-worker.js").unwrap(),
            scope.clone(),
            self.controller(version),
            self.registry.clone(),
            manifest.iter().map(|p| scope.join(p).unwrap()).collect(),
        )
    }

    pub async fn cached_keys(&self, version: &str) -> Vec<String> {
        self.caches
            .read()
            .await
            .get(version)
            .map(|c| c.keys().into_iter().map(str::to_string).collect())
            .unwrap_or_default()
    }
}

pub fn picture() -> FavoriteRecord {
    FavoriteRecord::new("", "https://x/a.png").with_source("https://x/b.webp", Some("image/webp"))
}
