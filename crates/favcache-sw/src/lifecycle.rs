//! Worker lifecycle: install, activate, fetch dispatch and messages.

use std::sync::Arc;
use std::time::Instant;

use favcache_core::WorkerConfig;
use favcache_kv::{AsyncStore, FavoritesRegistry};
use favcache_net::{Fetcher, Request};
use tokio::sync::{mpsc, oneshot, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, info, instrument, warn};
use url::Url;

use crate::cache::SharedCacheStorage;
use crate::clients::Clients;
use crate::controller::{CacheController, FetchResponse};
use crate::message::{MessageKind, WorkerMessage};
use crate::policy::RequestPolicy;
use crate::{ServiceWorkerError, ServiceWorkerId, ServiceWorkerState};

// ==================== Service Worker ====================

/// A service worker instance.
#[derive(Debug, Clone)]
pub struct ServiceWorker {
    /// Unique ID.
    pub id: ServiceWorkerId,

    /// Script URL.
    pub script_url: Url,

    /// Current state.
    pub state: ServiceWorkerState,

    /// Time of last state change.
    pub state_changed_at: Instant,

    /// Set once install asks to skip the waiting phase.
    pub skip_waiting: bool,
}

impl ServiceWorker {
    /// Create a new service worker.
    pub fn new(script_url: Url) -> Self {
        Self {
            id: ServiceWorkerId::new(),
            script_url,
            state: ServiceWorkerState::Parsed,
            state_changed_at: Instant::now(),
            skip_waiting: false,
        }
    }

    /// Set state.
    pub fn set_state(&mut self, state: ServiceWorkerState) {
        self.state = state;
        self.state_changed_at = Instant::now();
    }

    /// Check if active.
    pub fn is_active(&self) -> bool {
        self.state == ServiceWorkerState::Activated
    }

    /// Check if redundant.
    pub fn is_redundant(&self) -> bool {
        self.state == ServiceWorkerState::Redundant
    }
}

// ==================== Events ====================

/// Lifecycle events, for hosts and tests.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WorkerEvent {
    /// State changed.
    StateChange {
        worker_id: ServiceWorkerId,
        new_state: ServiceWorkerState,
    },
    /// Obsolete cache stores deleted on activation.
    CachesEvicted { names: Vec<String> },
    /// A client is now controlled by this worker.
    ControllerChange { client_id: String },
    /// A message finished handling.
    MessageHandled { message: String, id: String, ok: bool },
}

// ==================== Worker Scope ====================

/// The global scope of one worker: its state machine plus everything its
/// event handlers reach.
pub struct WorkerScope {
    worker: RwLock<ServiceWorker>,
    controller: CacheController,
    registry: FavoritesRegistry,
    manifest: Vec<Url>,
    clients: Arc<RwLock<Clients>>,
    scope: Url,
    event_tx: mpsc::UnboundedSender<WorkerEvent>,
}

impl std::fmt::Debug for WorkerScope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkerScope")
            .field("scope", &self.scope.as_str())
            .field("controller", &self.controller)
            .field("manifest", &self.manifest.len())
            .finish_non_exhaustive()
    }
}

impl WorkerScope {
    pub fn new(
        script_url: Url,
        scope: Url,
        controller: CacheController,
        registry: FavoritesRegistry,
        manifest: Vec<Url>,
    ) -> (Self, mpsc::UnboundedReceiver<WorkerEvent>) {
        let (event_tx, event_rx) = mpsc::unbounded_channel();

        (
            Self {
                worker: RwLock::new(ServiceWorker::new(script_url)),
                controller,
                registry,
                manifest,
                clients: Arc::new(RwLock::new(Clients::new())),
                scope,
                event_tx,
            },
            event_rx,
        )
    }

    /// Wire a worker from configuration.
    pub fn from_config(
        config: &WorkerConfig,
        caches: SharedCacheStorage,
        fetcher: Arc<dyn Fetcher>,
        store: AsyncStore,
    ) -> Result<(Self, mpsc::UnboundedReceiver<WorkerEvent>), ServiceWorkerError> {
        let scope = config
            .scope_url()
            .map_err(|e| ServiceWorkerError::ConfigError(e.to_string()))?;
        let manifest = config
            .precache_urls()
            .map_err(|e| ServiceWorkerError::ConfigError(e.to_string()))?;
        let script_url = scope
            .join("service-worker.js")
            .map_err(|e| ServiceWorkerError::ConfigError(e.to_string()))?;

        let controller = CacheController::new(
            config.version(),
            caches,
            fetcher,
            RequestPolicy::from_config(config),
        )
        .with_revalidate_timeout(config.revalidate_timeout());
        let registry = FavoritesRegistry::with_prefix(store, config.favorites_prefix.clone());

        Ok(Self::new(script_url, scope, controller, registry, manifest))
    }

    pub async fn id(&self) -> ServiceWorkerId {
        self.worker.read().await.id
    }

    pub async fn state(&self) -> ServiceWorkerState {
        self.worker.read().await.state
    }

    pub async fn worker(&self) -> ServiceWorker {
        self.worker.read().await.clone()
    }

    pub fn controller(&self) -> &CacheController {
        &self.controller
    }

    pub fn registry(&self) -> &FavoritesRegistry {
        &self.registry
    }

    pub fn clients(&self) -> &Arc<RwLock<Clients>> {
        &self.clients
    }

    pub fn scope(&self) -> &Url {
        &self.scope
    }

    async fn set_state(&self, state: ServiceWorkerState) {
        let worker_id = {
            let mut worker = self.worker.write().await;
            worker.set_state(state);
            worker.id
        };
        self.announce(worker_id, state);
    }

    /// Move from `from` to `to`, checked and applied under one lock.
    async fn transition(
        &self,
        from: ServiceWorkerState,
        to: ServiceWorkerState,
        op: &str,
    ) -> Result<(), ServiceWorkerError> {
        let worker_id = {
            let mut worker = self.worker.write().await;
            if worker.state != from {
                return Err(ServiceWorkerError::StateError(format!(
                    "cannot {} a worker that is {}",
                    op, worker.state
                )));
            }
            worker.set_state(to);
            worker.id
        };
        self.announce(worker_id, to);
        Ok(())
    }

    fn announce(&self, worker_id: ServiceWorkerId, state: ServiceWorkerState) {
        info!(worker = worker_id.raw(), state = %state, "Worker state changed");
        let _ = self.event_tx.send(WorkerEvent::StateChange {
            worker_id,
            new_state: state,
        });
    }

    /// Cache every favorite and the static manifest.
    ///
    /// Both halves run concurrently and both must succeed. On failure the
    /// worker becomes redundant; entries already written are kept.
    #[instrument(skip(self), fields(version = %self.controller.version()))]
    pub async fn install(&self) -> Result<(), ServiceWorkerError> {
        self.transition(
            ServiceWorkerState::Parsed,
            ServiceWorkerState::Installing,
            "install",
        )
        .await?;

        let (favorites, manifest) = tokio::join!(
            self.controller.prime_favorites(&self.registry),
            self.controller.prime_from_manifest(&self.manifest),
        );

        match merge_failures([favorites, manifest]) {
            Ok(cached) => {
                self.worker.write().await.skip_waiting = true;
                self.set_state(ServiceWorkerState::Installed).await;
                info!(cached, "Installed");
                Ok(())
            }
            Err(e) => {
                warn!(error = %e, "Install failed");
                self.set_state(ServiceWorkerState::Redundant).await;
                Err(e)
            }
        }
    }

    /// Evict obsolete stores and take control of every client in scope.
    #[instrument(skip(self), fields(version = %self.controller.version()))]
    pub async fn activate(&self) -> Result<(), ServiceWorkerError> {
        self.transition(
            ServiceWorkerState::Installed,
            ServiceWorkerState::Activating,
            "activate",
        )
        .await?;

        let names = self.controller.evict_obsolete().await;
        if !names.is_empty() {
            let _ = self.event_tx.send(WorkerEvent::CachesEvicted { names });
        }

        let worker_id = self.id().await;
        let claimed = self.clients.write().await.claim(&self.scope, worker_id);
        for client_id in claimed {
            let _ = self.event_tx.send(WorkerEvent::ControllerChange { client_id });
        }

        self.set_state(ServiceWorkerState::Activated).await;
        info!("Activated");
        Ok(())
    }

    /// Install, then activate straight away if install asked to skip waiting.
    pub async fn start(&self) -> Result<(), ServiceWorkerError> {
        self.install().await?;
        if self.worker.read().await.skip_waiting {
            self.activate().await?;
        }
        Ok(())
    }

    /// Bring back a worker that was already activated in an earlier run.
    pub async fn resume(&self) -> Result<(), ServiceWorkerError> {
        self.transition(
            ServiceWorkerState::Parsed,
            ServiceWorkerState::Activated,
            "resume",
        )
        .await
    }

    /// Dispatch an intercepted fetch.
    pub async fn handle_fetch(
        &self,
        request: Request,
    ) -> Result<FetchResponse, ServiceWorkerError> {
        let state = self.state().await;
        if !state.can_intercept_fetch() {
            return Err(ServiceWorkerError::StateError(format!(
                "worker is {}, not intercepting fetches",
                state
            )));
        }
        self.controller.handle_request(request).await
    }

    /// Handle one page message. Unknown tags are ignored.
    #[instrument(skip(self, msg), fields(message = %msg.message, id = %msg.id))]
    pub async fn handle_message(&self, msg: &WorkerMessage) -> Result<(), ServiceWorkerError> {
        if self.worker.read().await.is_redundant() {
            return Err(ServiceWorkerError::StateError(
                "Cannot post message to redundant worker".to_string(),
            ));
        }

        match msg.kind() {
            MessageKind::FavoriteAdd => {
                let urls = msg.record()?.image_urls();
                let cached = self.controller.cache_urls(&urls).await?;
                info!(cached, "Cached favorite images");
                Ok(())
            }
            MessageKind::FavoriteRemove => {
                debug!("Favorite removed, cache left as is");
                Ok(())
            }
            MessageKind::Unknown => {
                debug!("Ignoring unknown message");
                Ok(())
            }
        }
    }

    /// Run the message loop until every [`WorkerHandle`] is dropped.
    pub fn spawn_message_loop(self: Arc<Self>) -> (WorkerHandle, JoinHandle<()>) {
        let (tx, mut rx) = mpsc::unbounded_channel::<Envelope>();

        let task = tokio::spawn(async move {
            while let Some(Envelope { message, reply }) = rx.recv().await {
                let result = self.handle_message(&message).await;
                if let Err(e) = &result {
                    warn!(
                        message = %message.message,
                        id = %message.id,
                        error = %e,
                        "Message failed"
                    );
                }

                let _ = self.event_tx.send(WorkerEvent::MessageHandled {
                    message: message.message.clone(),
                    id: message.id.clone(),
                    ok: result.is_ok(),
                });
                if let Some(reply) = reply {
                    let _ = reply.send(result);
                }
            }
            debug!("Message loop stopped");
        });

        (WorkerHandle { tx }, task)
    }
}

/// Combine bulk cache outcomes. Per-URL failures are pooled; any other
/// error wins outright.
fn merge_failures<const N: usize>(
    results: [Result<usize, ServiceWorkerError>; N],
) -> Result<usize, ServiceWorkerError> {
    let mut cached = 0;
    let mut total = 0;
    let mut failed = Vec::new();

    for result in results {
        match result {
            Ok(n) => {
                cached += n;
                total += n;
            }
            Err(ServiceWorkerError::PrimeFailed { failed: f, total: t }) => {
                failed.extend(f);
                total += t;
            }
            Err(e) => return Err(e),
        }
    }

    if failed.is_empty() {
        Ok(cached)
    } else {
        Err(ServiceWorkerError::PrimeFailed { failed, total })
    }
}

// ==================== Handle ====================

struct Envelope {
    message: WorkerMessage,
    reply: Option<oneshot::Sender<Result<(), ServiceWorkerError>>>,
}

/// Sending side of the page → worker message channel.
#[derive(Clone)]
pub struct WorkerHandle {
    tx: mpsc::UnboundedSender<Envelope>,
}

impl std::fmt::Debug for WorkerHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkerHandle")
            .field("closed", &self.tx.is_closed())
            .finish()
    }
}

impl WorkerHandle {
    /// Fire and forget.
    pub fn post_message(&self, message: WorkerMessage) -> Result<(), ServiceWorkerError> {
        self.tx
            .send(Envelope { message, reply: None })
            .map_err(|_| ServiceWorkerError::MessageError("worker stopped".to_string()))
    }

    /// Post and wait until the worker has handled the message.
    pub async fn request(&self, message: WorkerMessage) -> Result<(), ServiceWorkerError> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(Envelope {
                message,
                reply: Some(reply),
            })
            .map_err(|_| ServiceWorkerError::MessageError("worker stopped".to_string()))?;

        rx.await
            .map_err(|_| ServiceWorkerError::MessageError("worker dropped the reply".to_string()))?
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::CacheStorage;
    use crate::clients::Client;
    use crate::testing::StaticFetcher;
    use favcache_core::CacheVersion;
    use favcache_kv::MemoryStore;
    use std::time::Duration;

    fn scope_with(
        fetcher: Arc<StaticFetcher>,
        manifest: &[&str],
    ) -> (WorkerScope, mpsc::UnboundedReceiver<WorkerEvent>) {
        let controller = CacheController::new(
            CacheVersion::new("1.0.0"),
            CacheStorage::new().shared(),
            fetcher,
            RequestPolicy::default(),
        );
        let registry = FavoritesRegistry::new(AsyncStore::new(Arc::new(MemoryStore::new())));
        WorkerScope::new(
            Url::parse("http://localhost:8080/service-worker.js").unwrap(),
            Url::parse("http://localhost:8080/").unwrap(),
            controller,
            registry,
            manifest.iter().map(|u| Url::parse(u).unwrap()).collect(),
        )
    }

    fn states(rx: &mut mpsc::UnboundedReceiver<WorkerEvent>) -> Vec<ServiceWorkerState> {
        let mut states = Vec::new();
        while let Ok(event) = rx.try_recv() {
            if let WorkerEvent::StateChange { new_state, .. } = event {
                states.push(new_state);
            }
        }
        states
    }

    #[tokio::test]
    async fn test_start_installs_and_activates() {
        let fetcher = Arc::new(StaticFetcher::new());
        fetcher.respond("http://localhost:8080/gifs.html", 200, "<html>");
        let (worker, mut rx) = scope_with(fetcher, &["http://localhost:8080/gifs.html"]);

        worker.start().await.unwrap();

        assert_eq!(worker.state().await, ServiceWorkerState::Activated);
        assert_eq!(
            states(&mut rx),
            vec![
                ServiceWorkerState::Installing,
                ServiceWorkerState::Installed,
                ServiceWorkerState::Activating,
                ServiceWorkerState::Activated,
            ]
        );
        assert!(worker
            .controller()
            .match_key("http://localhost:8080/gifs.html")
            .await
            .is_some());
    }

    #[tokio::test]
    async fn test_failed_install_is_redundant() {
        let fetcher = Arc::new(StaticFetcher::new());
        fetcher.respond("http://localhost:8080/gifs.html", 200, "<html>");
        fetcher.fail("http://localhost:8080/assets/style.css", "reset");
        let (worker, _rx) = scope_with(
            fetcher,
            &[
                "http://localhost:8080/gifs.html",
                "http://localhost:8080/assets/style.css",
            ],
        );

        let err = worker.start().await.unwrap_err();
        assert!(matches!(err, ServiceWorkerError::PrimeFailed { total: 2, .. }));
        assert_eq!(worker.state().await, ServiceWorkerState::Redundant);

        // Written entries are not rolled back.
        assert!(worker
            .controller()
            .match_key("http://localhost:8080/gifs.html")
            .await
            .is_some());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_install_runs_once() {
        let fetcher = Arc::new(StaticFetcher::new());
        fetcher.delay(
            "http://localhost:8080/gifs.html",
            Duration::from_millis(50),
            "<html>",
        );
        let (worker, mut rx) = scope_with(fetcher.clone(), &["http://localhost:8080/gifs.html"]);
        let worker = Arc::new(worker);

        let installs: Vec<_> = (0..4)
            .map(|_| {
                let worker = worker.clone();
                tokio::spawn(async move { worker.install().await })
            })
            .collect();
        let mut results = Vec::new();
        for install in installs {
            results.push(install.await.unwrap());
        }

        assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 1);
        assert!(results
            .iter()
            .filter_map(|r| r.as_ref().err())
            .all(|e| matches!(e, ServiceWorkerError::StateError(_))));
        assert_eq!(fetcher.calls("http://localhost:8080/gifs.html"), 1);
        assert_eq!(
            states(&mut rx),
            vec![ServiceWorkerState::Installing, ServiceWorkerState::Installed]
        );
    }

    #[tokio::test]
    async fn test_fetch_refused_until_activated() {
        let (worker, _rx) = scope_with(Arc::new(StaticFetcher::new()), &[]);
        let result = worker
            .handle_fetch(Request::parse("http://localhost:8080/assets/a.js").unwrap())
            .await;
        assert!(matches!(result, Err(ServiceWorkerError::StateError(_))));
    }

    #[tokio::test]
    async fn test_activate_requires_install() {
        let (worker, _rx) = scope_with(Arc::new(StaticFetcher::new()), &[]);
        assert!(matches!(
            worker.activate().await,
            Err(ServiceWorkerError::StateError(_))
        ));
    }

    #[tokio::test]
    async fn test_activate_evicts_and_claims() {
        let (worker, mut rx) = scope_with(Arc::new(StaticFetcher::new()), &[]);
        worker.controller().caches().write().await.open("0.9.0");
        let page = Client::window(Url::parse("http://localhost:8080/gifs.html").unwrap());
        let page_id = page.id.clone();
        worker.clients().write().await.add(page);

        worker.start().await.unwrap();

        let events: Vec<WorkerEvent> = std::iter::from_fn(|| rx.try_recv().ok()).collect();
        assert!(events.contains(&WorkerEvent::CachesEvicted {
            names: vec!["0.9.0".to_string()]
        }));
        assert!(events.contains(&WorkerEvent::ControllerChange {
            client_id: page_id.clone()
        }));
        assert_eq!(
            worker.clients().read().await.get(&page_id).unwrap().controller,
            Some(worker.id().await)
        );
    }

    #[tokio::test]
    async fn test_resume_only_from_fresh() {
        let (worker, _rx) = scope_with(Arc::new(StaticFetcher::new()), &[]);
        worker.resume().await.unwrap();
        assert_eq!(worker.state().await, ServiceWorkerState::Activated);
        assert!(worker.resume().await.is_err());
    }

    #[tokio::test]
    async fn test_message_loop_request_and_post() {
        let fetcher = Arc::new(StaticFetcher::new());
        fetcher.respond("https://x/a.png", 200, "png");
        let (worker, mut rx) = scope_with(fetcher, &[]);
        let worker = Arc::new(worker);
        worker.start().await.unwrap();

        let (handle, task) = worker.clone().spawn_message_loop();
        let record = favcache_core::FavoriteRecord::new("", "https://x/a.png");

        handle
            .request(WorkerMessage::favorite_add("1", &record).unwrap())
            .await
            .unwrap();
        assert!(worker.controller().match_key("https://x/a.png").await.is_some());

        handle
            .post_message(WorkerMessage::new("ping", "", serde_json::Value::Null))
            .unwrap();
        drop(handle);
        task.await.unwrap();

        let handled: Vec<WorkerEvent> = std::iter::from_fn(|| rx.try_recv().ok())
            .filter(|e| matches!(e, WorkerEvent::MessageHandled { .. }))
            .collect();
        assert_eq!(handled.len(), 2);
    }

    #[tokio::test]
    async fn test_favorite_add_reports_failed_image_to_caller() {
        let fetcher = Arc::new(StaticFetcher::new());
        fetcher.respond("https://x/a.png", 200, "png");
        fetcher.fail("https://x/b.webp", "connection reset");
        let (worker, mut rx) = scope_with(fetcher, &[]);
        let worker = Arc::new(worker);
        worker.start().await.unwrap();

        let (handle, task) = worker.clone().spawn_message_loop();
        let record = favcache_core::FavoriteRecord::new("", "https://x/a.png")
            .with_source("https://x/b.webp", Some("image/webp"));

        let err = handle
            .request(WorkerMessage::favorite_add("7", &record).unwrap())
            .await
            .unwrap_err();
        match err {
            ServiceWorkerError::PrimeFailed { failed, total } => {
                assert_eq!(total, 2);
                assert_eq!(failed.len(), 1);
                assert_eq!(failed[0].0, "https://x/b.webp");
            }
            other => panic!("unexpected error: {other:?}"),
        }
        assert!(worker.controller().match_key("https://x/a.png").await.is_some());
        assert!(worker.controller().match_key("https://x/b.webp").await.is_none());

        // The worker stays usable after a failed message.
        assert_eq!(worker.state().await, ServiceWorkerState::Activated);
        drop(handle);
        task.await.unwrap();

        let handled: Vec<WorkerEvent> = std::iter::from_fn(|| rx.try_recv().ok())
            .filter(|e| matches!(e, WorkerEvent::MessageHandled { .. }))
            .collect();
        assert_eq!(
            handled,
            vec![WorkerEvent::MessageHandled {
                message: "favorite:add".to_string(),
                id: "7".to_string(),
                ok: false,
            }]
        );
    }

    #[test]
    fn test_merge_failures() {
        let failed = |url: &str, total: usize| -> Result<usize, ServiceWorkerError> {
            Err(ServiceWorkerError::PrimeFailed {
                failed: vec![(url.to_string(), "x".to_string())],
                total,
            })
        };

        assert_eq!(merge_failures([Ok(2), Ok(3)]).unwrap(), 5);
        match merge_failures([failed("a", 2), failed("b", 4)]) {
            Err(ServiceWorkerError::PrimeFailed { failed, total }) => {
                assert_eq!(failed.len(), 2);
                assert_eq!(total, 6);
            }
            other => panic!("unexpected: {other:?}"),
        }
        match merge_failures([Ok(3), failed("b", 1)]) {
            Err(ServiceWorkerError::PrimeFailed { total, .. }) => assert_eq!(total, 4),
            other => panic!("unexpected: {other:?}"),
        }
        assert!(matches!(
            merge_failures([
                failed("b", 1),
                Err(ServiceWorkerError::StorageError("down".to_string())),
            ]),
            Err(ServiceWorkerError::StorageError(_))
        ));
    }
}
