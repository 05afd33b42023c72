//! In-process storage engine.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::RwLock;

use hashbrown::HashMap;
use tracing::trace;

use crate::{Callback, CallbackStore, KvError};

/// A [`CallbackStore`] kept in memory.
///
/// It can be switched off to behave like an engine that rejects every
/// operation.
#[derive(Debug)]
pub struct MemoryStore {
    items: RwLock<HashMap<String, String>>,
    available: AtomicBool,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            items: RwLock::new(HashMap::new()),
            available: AtomicBool::new(true),
        }
    }

    /// Make every following operation fail with `Unavailable` (or succeed again).
    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    /// Number of stored items.
    pub fn len(&self) -> usize {
        self.items.read().map(|items| items.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn check(&self) -> Result<(), KvError> {
        if self.available.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(KvError::Unavailable("storage engine is disabled".to_string()))
        }
    }

    fn read<T>(&self, f: impl FnOnce(&HashMap<String, String>) -> T) -> Result<T, KvError> {
        self.check()?;
        let items = self
            .items
            .read()
            .map_err(|_| KvError::Unavailable("lock poisoned".to_string()))?;
        Ok(f(&items))
    }

    fn write<T>(&self, f: impl FnOnce(&mut HashMap<String, String>) -> T) -> Result<T, KvError> {
        self.check()?;
        let mut items = self
            .items
            .write()
            .map_err(|_| KvError::Unavailable("lock poisoned".to_string()))?;
        Ok(f(&mut items))
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl CallbackStore for MemoryStore {
    fn get_item(&self, key: &str, callback: Callback<Option<String>>) {
        trace!(key, "get_item");
        callback(self.read(|items| items.get(key).cloned()));
    }

    fn set_item(&self, key: &str, value: &str, callback: Callback<()>) {
        trace!(key, len = value.len(), "set_item");
        callback(self.write(|items| {
            items.insert(key.to_string(), value.to_string());
        }));
    }

    fn remove_item(&self, key: &str, callback: Callback<()>) {
        trace!(key, "remove_item");
        callback(self.write(|items| {
            items.remove(key);
        }));
    }

    fn has_item(&self, key: &str, callback: Callback<bool>) {
        callback(self.read(|items| items.contains_key(key)));
    }

    fn get_keys(&self, callback: Callback<Vec<String>>) {
        callback(self.read(|items| {
            let mut keys: Vec<String> = items.keys().cloned().collect();
            keys.sort();
            keys
        }));
    }
}
