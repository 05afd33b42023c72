//! # favcache KV
//!
//! Key-value persistence for the favcache worker.
//!
//! ## Features
//!
//! - **CallbackStore**: node-style `getItem` / `setItem` / `removeItem` /
//!   `hasItem` / `getKeys`, each completing through a callback
//! - **MemoryStore**, **FileStore**: in-process and JSON-file engines
//! - **AsyncStore**: the async boundary; nothing above it sees callbacks
//! - **FavoritesRegistry**: `favorites:<id>` records on top of `AsyncStore`
//!
//! ## Architecture
//!
//! ```text
//! FavoritesRegistry
//!     │
//!     └── AsyncStore (futures)
//!             │
//!             └── dyn CallbackStore (callbacks)
//!                     ├── MemoryStore
//!                     └── FileStore
//! ```

use thiserror::Error;

pub mod favorites;
pub mod file;
pub mod memory;
pub mod promisify;

pub use favorites::{FavoritesRegistry, FAVORITES_PREFIX};
pub use file::FileStore;
pub use memory::MemoryStore;
pub use promisify::AsyncStore;

// ==================== Errors ====================

/// Key-value storage errors.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum KvError {
    #[error("Storage unavailable: {0}")]
    Unavailable(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Storage engine dropped the callback")]
    CallbackDropped,
}

impl From<serde_json::Error> for KvError {
    fn from(e: serde_json::Error) -> Self {
        KvError::Serialization(e.to_string())
    }
}

// ==================== Callback API ====================

/// Completion callback handed to a [`CallbackStore`].
pub type Callback<T> = Box<dyn FnOnce(Result<T, KvError>) + Send + 'static>;

/// A storage engine with a callback-style API.
///
/// Every method must invoke its callback exactly once.
pub trait CallbackStore: Send + Sync {
    /// Read a value.
    fn get_item(&self, key: &str, callback: Callback<Option<String>>);

    /// Write a value, replacing any previous one.
    fn set_item(&self, key: &str, value: &str, callback: Callback<()>);

    /// Remove a value. Removing a missing key succeeds.
    fn remove_item(&self, key: &str, callback: Callback<()>);

    /// Check whether a key exists.
    fn has_item(&self, key: &str, callback: Callback<bool>) {
        self.get_item(key, Box::new(move |result: Result<Option<String>, KvError>| {
            callback(result.map(|v| v.is_some()))
        }));
    }

    /// List every key in the store.
    fn get_keys(&self, callback: Callback<Vec<String>>);
}
