//! Page → worker messages.

use favcache_core::FavoriteRecord;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::ServiceWorkerError;

pub const FAVORITE_ADD: &str = "favorite:add";
pub const FAVORITE_REMOVE: &str = "favorite:remove";

/// `{ "message": tag, "id": id, "data": payload }`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkerMessage {
    pub message: String,
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub data: Value,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageKind {
    FavoriteAdd,
    FavoriteRemove,
    Unknown,
}

impl WorkerMessage {
    pub fn new(message: &str, id: &str, data: Value) -> Self {
        Self {
            message: message.to_string(),
            id: id.to_string(),
            data,
        }
    }

    pub fn favorite_add(id: &str, record: &FavoriteRecord) -> Result<Self, ServiceWorkerError> {
        Ok(Self::new(FAVORITE_ADD, id, Self::encode(record)?))
    }

    pub fn favorite_remove(id: &str, record: &FavoriteRecord) -> Result<Self, ServiceWorkerError> {
        Ok(Self::new(FAVORITE_REMOVE, id, Self::encode(record)?))
    }

    fn encode(record: &FavoriteRecord) -> Result<Value, ServiceWorkerError> {
        serde_json::to_value(record).map_err(|e| ServiceWorkerError::MessageError(e.to_string()))
    }

    pub fn kind(&self) -> MessageKind {
        match self.message.as_str() {
            FAVORITE_ADD => MessageKind::FavoriteAdd,
            FAVORITE_REMOVE => MessageKind::FavoriteRemove,
            _ => MessageKind::Unknown,
        }
    }

    /// Decode `data` as the image record.
    pub fn record(&self) -> Result<FavoriteRecord, ServiceWorkerError> {
        serde_json::from_value(self.data.clone())
            .map_err(|e| ServiceWorkerError::MessageError(format!("{}: {}", self.message, e)))
    }
}
