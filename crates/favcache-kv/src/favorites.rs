//! Favorite image records kept under a key prefix.

use favcache_core::FavoriteRecord;
use futures::future::try_join_all;
use tracing::{debug, warn};

use crate::{AsyncStore, KvError};

/// Default namespace for favorite records.
pub const FAVORITES_PREFIX: &str = "favorites:";

/// Reads and writes `favorites:<id>` records. Keys outside the prefix are
/// never touched.
#[derive(Debug, Clone)]
pub struct FavoritesRegistry {
    store: AsyncStore,
    prefix: String,
}

impl FavoritesRegistry {
    pub fn new(store: AsyncStore) -> Self {
        Self::with_prefix(store, FAVORITES_PREFIX)
    }

    pub fn with_prefix(store: AsyncStore, prefix: impl Into<String>) -> Self {
        Self {
            store,
            prefix: prefix.into(),
        }
    }

    fn key(&self, id: &str) -> String {
        format!("{}{}", self.prefix, id)
    }

    pub async fn is_favorite(&self, id: &str) -> Result<bool, KvError> {
        self.store.has_item(&self.key(id)).await
    }

    /// Store a record. The record's `id` is set to `id`.
    pub async fn add(&self, id: &str, record: &FavoriteRecord) -> Result<(), KvError> {
        let mut record = record.clone();
        record.id = id.to_string();
        let json = serde_json::to_string(&record)?;
        self.store.set_item(&self.key(id), &json).await?;
        debug!(id, images = record.image_urls().len(), "Favorite added");
        Ok(())
    }

    pub async fn remove(&self, id: &str) -> Result<(), KvError> {
        self.store.remove_item(&self.key(id)).await?;
        debug!(id, "Favorite removed");
        Ok(())
    }

    pub async fn get(&self, id: &str) -> Result<Option<FavoriteRecord>, KvError> {
        match self.store.get_item(&self.key(id)).await? {
            Some(json) => Ok(Some(serde_json::from_str(&json)?)),
            None => Ok(None),
        }
    }

    /// Add if absent, remove if present. Returns whether `id` is now a favorite.
    pub async fn toggle(&self, id: &str, record: &FavoriteRecord) -> Result<bool, KvError> {
        if self.is_favorite(id).await? {
            self.remove(id).await?;
            Ok(false)
        } else {
            self.add(id, record).await?;
            Ok(true)
        }
    }

    /// Ids of every stored favorite, in key order.
    pub async fn list_ids(&self) -> Result<Vec<String>, KvError> {
        let keys = self.store.get_keys().await?;
        Ok(keys
            .into_iter()
            .filter_map(|key| key.strip_prefix(&self.prefix).map(str::to_string))
            .collect())
    }

    /// Every stored favorite. Any unreadable record fails the whole listing.
    pub async fn list_all(&self) -> Result<Vec<FavoriteRecord>, KvError> {
        let ids = self.list_ids().await?;
        let records = try_join_all(ids.iter().map(|id| self.get(id))).await?;

        // A key can disappear between get_keys and get_item.
        let missing = records.iter().filter(|r| r.is_none()).count();
        if missing > 0 {
            warn!(missing, "Favorites removed while listing");
        }
        Ok(records.into_iter().flatten().collect())
    }

    /// Image URLs of every favorite, flattened in listing order.
    pub async fn image_urls(&self) -> Result<Vec<String>, KvError> {
        Ok(self
            .list_all()
            .await?
            .iter()
            .flat_map(FavoriteRecord::image_urls)
            .collect())
    }
}
