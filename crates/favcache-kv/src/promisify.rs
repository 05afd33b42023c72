//! Async boundary over a [`CallbackStore`].

use std::sync::Arc;

use tokio::sync::oneshot;

use crate::{Callback, CallbackStore, KvError};

/// Turn one callback-style call into a future.
pub async fn promisify<T, F>(call: F) -> Result<T, KvError>
where
    T: Send + 'static,
    F: FnOnce(Callback<T>),
{
    let (tx, rx) = oneshot::channel();
    call(Box::new(move |result: Result<T, KvError>| {
        // Receiver gone means the caller stopped waiting.
        let _ = tx.send(result);
    }));
    rx.await.map_err(|_| KvError::CallbackDropped)?
}

/// Async view of a shared storage engine.
#[derive(Clone)]
pub struct AsyncStore {
    inner: Arc<dyn CallbackStore>,
}

impl AsyncStore {
    pub fn new(inner: Arc<dyn CallbackStore>) -> Self {
        Self { inner }
    }

    pub async fn get_item(&self, key: &str) -> Result<Option<String>, KvError> {
        promisify(|cb| self.inner.get_item(key, cb)).await
    }

    pub async fn set_item(&self, key: &str, value: &str) -> Result<(), KvError> {
        promisify(|cb| self.inner.set_item(key, value, cb)).await
    }

    pub async fn remove_item(&self, key: &str) -> Result<(), KvError> {
        promisify(|cb| self.inner.remove_item(key, cb)).await
    }

    pub async fn has_item(&self, key: &str) -> Result<bool, KvError> {
        promisify(|cb| self.inner.has_item(key, cb)).await
    }

    pub async fn get_keys(&self) -> Result<Vec<String>, KvError> {
        promisify(|cb| self.inner.get_keys(cb)).await
    }
}

impl std::fmt::Debug for AsyncStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AsyncStore").finish_non_exhaustive()
    }
}
