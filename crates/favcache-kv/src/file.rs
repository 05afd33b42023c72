//! JSON-file storage engine.

use std::path::{Path, PathBuf};
use std::sync::RwLock;

use hashbrown::HashMap;
use tracing::{debug, warn};

use crate::{Callback, CallbackStore, KvError};

/// A [`CallbackStore`] persisted as one JSON object on disk.
///
/// The whole map is rewritten after every mutation. A mutation whose flush
/// fails is rolled back in memory and reported as `Unavailable`.
#[derive(Debug)]
pub struct FileStore {
    path: PathBuf,
    items: RwLock<HashMap<String, String>>,
}

impl FileStore {
    /// Open (or create) the store at `path`.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, KvError> {
        let path = path.as_ref().to_path_buf();

        let items = match std::fs::read_to_string(&path) {
            Ok(text) if text.trim().is_empty() => HashMap::new(),
            Ok(text) => serde_json::from_str(&text)?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => HashMap::new(),
            Err(e) => {
                return Err(KvError::Unavailable(format!(
                    "{}: {}",
                    path.display(),
                    e
                )))
            }
        };

        debug!(path = %path.display(), items = items.len(), "Opened file store");

        Ok(Self {
            path,
            items: RwLock::new(items),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn flush(&self, items: &HashMap<String, String>) -> Result<(), KvError> {
        let unavailable =
            |e: std::io::Error| KvError::Unavailable(format!("{}: {}", self.path.display(), e));

        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent).map_err(unavailable)?;
        }

        let json = serde_json::to_vec_pretty(items)?;
        let tmp = self.path.with_extension("json.tmp");
        std::fs::write(&tmp, json).map_err(unavailable)?;
        std::fs::rename(&tmp, &self.path).map_err(unavailable)?;
        Ok(())
    }

    fn mutate(&self, f: impl FnOnce(&mut HashMap<String, String>)) -> Result<(), KvError> {
        let mut items = self
            .items
            .write()
            .map_err(|_| KvError::Unavailable("lock poisoned".to_string()))?;

        let before = items.clone();
        f(&mut items);

        if let Err(e) = self.flush(&items) {
            warn!(error = %e, "Flush failed, rolling back");
            *items = before;
            return Err(e);
        }
        Ok(())
    }

    fn read<T>(&self, f: impl FnOnce(&HashMap<String, String>) -> T) -> Result<T, KvError> {
        let items = self
            .items
            .read()
            .map_err(|_| KvError::Unavailable("lock poisoned".to_string()))?;
        Ok(f(&items))
    }
}

impl CallbackStore for FileStore {
    fn get_item(&self, key: &str, callback: Callback<Option<String>>) {
        callback(self.read(|items| items.get(key).cloned()));
    }

    fn set_item(&self, key: &str, value: &str, callback: Callback<()>) {
        callback(self.mutate(|items| {
            items.insert(key.to_string(), value.to_string());
        }));
    }

    fn remove_item(&self, key: &str, callback: Callback<()>) {
        callback(self.mutate(|items| {
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
