//! Wiring between the on-disk data directory and the worker.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use favcache_common::FavCacheError;
use favcache_core::WorkerConfig;
use favcache_kv::{AsyncStore, FavoritesRegistry, FileStore, KvError};
use favcache_net::{Fetcher, HttpFetcher, LoaderConfig, NetError};
use favcache_sw::{
    CacheStorage, ServiceWorkerError, ServiceWorkerState, SharedCacheStorage, WorkerEvent,
    WorkerScope,
};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::mpsc::UnboundedReceiver;
use tracing::debug;

#[derive(Error, Debug)]
pub enum HostError {
    #[error(transparent)]
    Config(#[from] FavCacheError),

    #[error(transparent)]
    Storage(#[from] KvError),

    #[error(transparent)]
    Network(#[from] NetError),

    #[error(transparent)]
    Worker(#[from] ServiceWorkerError),

    #[error("no activated worker for cache version {0}; run `favcache start` first")]
    NotStarted(String),

    #[error("{path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("{path}: {source}")]
    State {
        path: PathBuf,
        source: serde_json::Error,
    },
}

/// What survives between runs besides storage and caches.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HostState {
    pub state: ServiceWorkerState,
    pub cache_version: String,
}

impl HostState {
    pub fn load(path: &Path) -> Result<Option<Self>, HostError> {
        match std::fs::read(path) {
            Ok(bytes) => serde_json::from_slice(&bytes)
                .map(Some)
                .map_err(|source| HostError::State {
                    path: path.to_path_buf(),
                    source,
                }),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(source) => Err(HostError::Io {
                path: path.to_path_buf(),
                source,
            }),
        }
    }

    pub fn save(&self, path: &Path) -> Result<(), HostError> {
        let io = |source| HostError::Io {
            path: path.to_path_buf(),
            source,
        };
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(io)?;
        }
        let json = serde_json::to_vec_pretty(self).map_err(|source| HostError::State {
            path: path.to_path_buf(),
            source,
        })?;
        std::fs::write(path, json).map_err(io)
    }
}

/// Storage, caches and network for one data directory.
pub struct Host {
    pub config: WorkerConfig,
    pub caches: SharedCacheStorage,
    pub store: AsyncStore,
    fetcher: Arc<dyn Fetcher>,
}

impl Host {
    pub fn open(config: WorkerConfig) -> Result<Self, HostError> {
        std::fs::create_dir_all(&config.data_dir).map_err(|source| HostError::Io {
            path: config.data_dir.clone(),
            source,
        })?;

        let store = FileStore::open(config.store_path())?;
        let caches = CacheStorage::load(&config.caches_path())?.shared();
        let fetcher = HttpFetcher::new(LoaderConfig {
            user_agent: config.user_agent.clone(),
            default_timeout: config.fetch_timeout(),
            max_redirects: config.max_redirects,
        })?;

        debug!(data_dir = %config.data_dir.display(), "Host opened");
        Ok(Self {
            config,
            caches,
            store: AsyncStore::new(Arc::new(store)),
            fetcher: Arc::new(fetcher),
        })
    }

    fn state_path(&self) -> PathBuf {
        self.config.data_dir.join("state.json")
    }

    pub fn registry(&self) -> FavoritesRegistry {
        FavoritesRegistry::with_prefix(self.store.clone(), self.config.favorites_prefix.clone())
    }

    pub fn worker(&self) -> Result<(WorkerScope, UnboundedReceiver<WorkerEvent>), HostError> {
        Ok(WorkerScope::from_config(
            &self.config,
            self.caches.clone(),
            self.fetcher.clone(),
            self.store.clone(),
        )?)
    }

    /// A worker brought back from an earlier `start`, if that start
    /// activated the current cache version.
    pub async fn resume_worker(&self) -> Result<Option<WorkerScope>, HostError> {
        let activated = HostState::load(&self.state_path())?.is_some_and(|saved| {
            saved.state == ServiceWorkerState::Activated
                && saved.cache_version == self.config.cache_version
        });
        if !activated {
            return Ok(None);
        }

        let (worker, _events) = self.worker()?;
        worker.resume().await?;
        Ok(Some(worker))
    }

    pub async fn require_worker(&self) -> Result<WorkerScope, HostError> {
        self.resume_worker()
            .await?
            .ok_or_else(|| HostError::NotStarted(self.config.cache_version.clone()))
    }

    pub fn save_state(&self, state: ServiceWorkerState) -> Result<(), HostError> {
        HostState {
            state,
            cache_version: self.config.cache_version.clone(),
        }
        .save(&self.state_path())
    }

    pub async fn save_caches(&self) -> Result<(), HostError> {
        self.caches.read().await.save(&self.config.caches_path())?;
        Ok(())
    }
}
