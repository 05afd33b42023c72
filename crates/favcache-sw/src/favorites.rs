//! Page-side favorites: storage writes followed by a worker notification.

use favcache_core::FavoriteRecord;
use favcache_kv::FavoritesRegistry;
use tracing::{debug, warn};

use crate::lifecycle::WorkerHandle;
use crate::message::WorkerMessage;
use crate::ServiceWorkerError;

/// What the page calls when a star is clicked.
///
/// Every change is written to storage first; the worker is told afterwards
/// and never awaited. Without a worker the page still works, it just has
/// nothing cached for offline use.
#[derive(Debug, Clone)]
pub struct FavoritesController {
    registry: FavoritesRegistry,
    worker: Option<WorkerHandle>,
}

impl FavoritesController {
    pub fn new(registry: FavoritesRegistry) -> Self {
        Self {
            registry,
            worker: None,
        }
    }

    pub fn with_worker(mut self, worker: WorkerHandle) -> Self {
        self.worker = Some(worker);
        self
    }

    fn notify(&self, message: Result<WorkerMessage, ServiceWorkerError>) {
        let Some(worker) = &self.worker else {
            return;
        };
        if let Err(e) = message.and_then(|m| worker.post_message(m)) {
            warn!(error = %e, "Could not notify worker");
        }
    }

    pub async fn add_to_favorites(
        &self,
        id: &str,
        record: &FavoriteRecord,
    ) -> Result<(), ServiceWorkerError> {
        self.registry.add(id, record).await?;
        self.notify(WorkerMessage::favorite_add(id, record));
        Ok(())
    }

    pub async fn remove_from_favorites(&self, id: &str) -> Result<(), ServiceWorkerError> {
        let record = self.registry.get(id).await?.unwrap_or_default();
        self.registry.remove(id).await?;
        self.notify(WorkerMessage::favorite_remove(id, &record));
        Ok(())
    }

    pub async fn is_in_favorites(&self, id: &str) -> Result<bool, ServiceWorkerError> {
        Ok(self.registry.is_favorite(id).await?)
    }

    /// Returns whether `id` is a favorite afterwards.
    pub async fn toggle_favorite(
        &self,
        id: &str,
        record: &FavoriteRecord,
    ) -> Result<bool, ServiceWorkerError> {
        let added = if self.is_in_favorites(id).await? {
            self.remove_from_favorites(id).await?;
            false
        } else {
            self.add_to_favorites(id, record).await?;
            true
        };
        debug!(id, added, "Toggled favorite");
        Ok(added)
    }

    pub async fn get_favorite_by_id(&self, id: &str) -> Result<FavoriteRecord, ServiceWorkerError> {
        self.registry
            .get(id)
            .await?
            .ok_or_else(|| ServiceWorkerError::NotFound(format!("favorite {}", id)))
    }

    pub async fn get_all_favorites(&self) -> Result<Vec<FavoriteRecord>, ServiceWorkerError> {
        Ok(self.registry.list_all().await?)
    }
}
