//! # favcache Service Worker
//!
//! The fetch-interception worker behind the offline favorites page.
//!
//! ## Features
//!
//! - **Lifecycle**: install (precache + favorites), skip waiting, activate
//!   (evict obsolete caches, claim clients)
//! - **Cache API**: named cache stores of byte-exact responses
//! - **Fetch interception**: persisted keys revalidate and fall back to cache,
//!   everything else is network first with a raw-URL cache fallback
//! - **Messages**: `favorite:add` caches a favorite's images
//!
//! ## Architecture
//!
//! ```text
//! WorkerScope
//!     ├── ServiceWorker (state machine)
//!     ├── CacheController
//!     │       ├── RequestPolicy (persist rules, cache keys)
//!     │       ├── dyn Fetcher
//!     │       └── CacheStorage
//!     │               └── Cache
//!     │                       └── key → CacheEntry
//!     ├── FavoritesRegistry
//!     └── Clients
//! ```

use std::sync::atomic::{AtomicU64, Ordering};

use favcache_kv::KvError;
use favcache_net::NetError;
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub mod cache;
pub mod clients;
pub mod controller;
pub mod favorites;
pub mod lifecycle;
pub mod message;
pub mod policy;
pub mod testing;

pub use cache::{Cache, CacheEntry, CacheStorage, SharedCacheStorage};
pub use clients::{Client, Clients};
pub use controller::{CacheController, FetchResponse};
pub use favorites::FavoritesController;
pub use lifecycle::{ServiceWorker, WorkerEvent, WorkerHandle, WorkerScope};
pub use message::{MessageKind, WorkerMessage, FAVORITE_ADD, FAVORITE_REMOVE};
pub use policy::{RequestPolicy, Route};

// ==================== Errors ====================

/// Errors that can occur in service worker operations.
#[derive(Error, Debug, Clone)]
pub enum ServiceWorkerError {
    #[error("Network error: {0}")]
    NetworkError(String),

    #[error("State error: {0}")]
    StateError(String),

    #[error("Cache error: {0}")]
    CacheError(String),

    #[error("Storage error: {0}")]
    StorageError(String),

    #[error("Message error: {0}")]
    MessageError(String),

    #[error("Config error: {0}")]
    ConfigError(String),

    /// Some URLs of a bulk cache operation failed. Entries written for the
    /// other URLs stay in the cache.
    #[error("{} of {} URLs failed to cache", .failed.len(), .total)]
    PrimeFailed {
        failed: Vec<(String, String)>,
        total: usize,
    },

    #[error("Not found: {0}")]
    NotFound(String),
}

impl From<NetError> for ServiceWorkerError {
    fn from(e: NetError) -> Self {
        ServiceWorkerError::NetworkError(e.to_string())
    }
}

impl From<KvError> for ServiceWorkerError {
    fn from(e: KvError) -> Self {
        ServiceWorkerError::StorageError(e.to_string())
    }
}

// ==================== Types ====================

/// Unique identifier for a service worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ServiceWorkerId(u64);

impl ServiceWorkerId {
    fn new() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(1);
        Self(COUNTER.fetch_add(1, Ordering::Relaxed))
    }

    pub fn raw(&self) -> u64 {
        self.0
    }
}

/// Service worker state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ServiceWorkerState {
    /// Initial state, nothing run yet.
    #[default]
    Parsed,
    /// Installing (precaching).
    Installing,
    /// Installed but waiting for activation.
    Installed,
    /// Activating (evicting obsolete caches, claiming clients).
    Activating,
    /// Active and intercepting fetches.
    Activated,
    /// Install failed or replaced.
    Redundant,
}

impl ServiceWorkerState {
    /// Only an activated worker receives fetch events.
    pub fn can_intercept_fetch(&self) -> bool {
        matches!(self, ServiceWorkerState::Activated)
    }
}

impl std::fmt::Display for ServiceWorkerState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            ServiceWorkerState::Parsed => "parsed",
            ServiceWorkerState::Installing => "installing",
            ServiceWorkerState::Installed => "installed",
            ServiceWorkerState::Activating => "activating",
            ServiceWorkerState::Activated => "activated",
            ServiceWorkerState::Redundant => "redundant",
        };
        f.write_str(name)
    }
}
