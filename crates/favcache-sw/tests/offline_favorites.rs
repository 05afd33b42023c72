//! End-to-end behaviour of the offline favorites worker.

mod common;

use std::sync::Arc;

use common::{picture, Harness};
use favcache_core::CacheVersion;
use favcache_kv::{AsyncStore, FavoritesRegistry, FileStore};
use favcache_net::{HttpFetcher, LoaderConfig, Request};
use favcache_sw::{
    CacheController, CacheStorage, FavoritesController, RequestPolicy, ServiceWorkerError,
    ServiceWorkerState, WorkerEvent, WorkerMessage, WorkerScope,
};
use url::Url;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn request(url: &str) -> Request {
    Request::parse(url).unwrap()
}

#[tokio::test]
async fn persisted_resource_survives_network_loss() {
    let harness = Harness::new();
    harness
        .fetcher
        .respond("http://localhost:8080/assets/style.css", 200, "body{}");
    let (worker, _rx) = harness.worker("1.0.0", &["assets/style.css"]);
    worker.start().await.unwrap();

    harness.fetcher.set_offline(true);
    let response = worker
        .handle_fetch(request("http://localhost:8080/assets/style.css"))
        .await
        .unwrap();
    assert!(response.from_cache);
    assert_eq!(response.body, b"body{}");
}

#[tokio::test]
async fn activation_keeps_only_current_version() {
    let harness = Harness::new();
    harness.caches.write().await.open("0.9.0");
    let (worker, _rx) = harness.worker("1.0.0", &[]);
    worker.start().await.unwrap();

    assert_eq!(harness.caches.read().await.keys(), vec!["1.0.0"]);
}

#[tokio::test]
async fn favorite_add_caches_every_image() {
    let harness = Harness::new();
    harness.fetcher.respond("https://x/a.png", 200, "png");
    harness.fetcher.respond("https://x/b.webp", 200, "webp");
    let (worker, _rx) = harness.worker("1.0.0", &[]);
    worker.start().await.unwrap();

    worker
        .handle_message(&WorkerMessage::favorite_add("7", &picture()).unwrap())
        .await
        .unwrap();

    assert_eq!(
        harness.cached_keys("1.0.0").await,
        vec!["https://x/a.png", "https://x/b.webp"]
    );
}

#[tokio::test]
async fn favorite_remove_leaves_cache_alone() {
    let harness = Harness::new();
    harness.fetcher.respond("https://x/a.png", 200, "png");
    harness.fetcher.respond("https://x/b.webp", 200, "webp");
    let (worker, _rx) = harness.worker("1.0.0", &[]);
    worker.start().await.unwrap();
    worker
        .handle_message(&WorkerMessage::favorite_add("7", &picture()).unwrap())
        .await
        .unwrap();
    let before = harness.cached_keys("1.0.0").await;

    worker
        .handle_message(&WorkerMessage::favorite_remove("7", &picture()).unwrap())
        .await
        .unwrap();

    assert_eq!(harness.cached_keys("1.0.0").await, before);
}

#[tokio::test]
async fn unknown_message_is_ignored() {
    let harness = Harness::new();
    let (worker, _rx) = harness.worker("1.0.0", &[]);
    worker
        .handle_message(&WorkerMessage::new("favorite:rename", "1", serde_json::Value::Null))
        .await
        .unwrap();
    assert!(harness.cached_keys("1.0.0").await.is_empty());
}

#[tokio::test]
async fn priming_reports_failure_but_keeps_successes() {
    let harness = Harness::new();
    harness.fetcher.respond("https://x/good.png", 200, "png");
    harness.fetcher.fail("https://x/bad.png", "connection reset");
    let controller = harness.controller("1.0.0");

    let result = controller
        .cache_urls(&["https://x/good.png".to_string(), "https://x/bad.png".to_string()])
        .await;

    assert!(matches!(
        result,
        Err(ServiceWorkerError::PrimeFailed { ref failed, total: 2 }) if failed.len() == 1
    ));
    assert_eq!(harness.cached_keys("1.0.0").await, vec!["https://x/good.png"]);
}

#[tokio::test]
async fn install_primes_stored_favorites() {
    let harness = Harness::new();
    harness.fetcher.respond("https://x/a.png", 200, "png");
    harness.fetcher.respond("https://x/b.webp", 200, "webp");
    harness.fetcher.respond("http://localhost:8080/gifs.html", 200, "<html>");
    harness.registry.add("7", &picture()).await.unwrap();

    let (worker, _rx) = harness.worker("1.0.0", &["gifs.html"]);
    worker.start().await.unwrap();

    assert_eq!(
        harness.cached_keys("1.0.0").await,
        vec!["http://localhost:8080/gifs.html", "https://x/a.png", "https://x/b.webp"]
    );
}

#[tokio::test]
async fn install_fails_when_storage_is_unavailable() {
    let harness = Harness::new();
    harness.memory.set_available(false);
    let (worker, _rx) = harness.worker("1.0.0", &[]);

    assert!(matches!(
        worker.start().await,
        Err(ServiceWorkerError::StorageError(_))
    ));
    assert_eq!(worker.state().await, ServiceWorkerState::Redundant);
}

#[tokio::test]
async fn new_version_replaces_old() {
    let harness = Harness::new();
    harness
        .fetcher
        .respond("http://localhost:8080/assets/blocks.js", 200, "v1");
    let (old, _rx) = harness.worker("1.0.0", &["assets/blocks.js"]);
    old.start().await.unwrap();

    harness
        .fetcher
        .respond("http://localhost:8080/assets/blocks.js", 200, "v2");
    let (new, mut rx) = harness.worker("1.0.1", &["assets/blocks.js"]);
    new.start().await.unwrap();

    assert_eq!(harness.caches.read().await.keys(), vec!["1.0.1"]);
    let events: Vec<WorkerEvent> = std::iter::from_fn(|| rx.try_recv().ok()).collect();
    assert!(events.contains(&WorkerEvent::CachesEvicted {
        names: vec!["1.0.0".to_string()]
    }));

    harness.fetcher.set_offline(true);
    let response = new
        .handle_fetch(request("http://localhost:8080/assets/blocks.js"))
        .await
        .unwrap();
    assert_eq!(response.body, b"v2");
}

#[tokio::test]
async fn page_toggle_drives_worker_cache() {
    let harness = Harness::new();
    harness.fetcher.respond("https://x/a.png", 200, "png");
    harness.fetcher.respond("https://x/b.webp", 200, "webp");
    let (worker, _rx) = harness.worker("1.0.0", &[]);
    let worker = Arc::new(worker);
    worker.start().await.unwrap();
    let (handle, task) = worker.clone().spawn_message_loop();

    let page = FavoritesController::new(harness.registry.clone()).with_worker(handle);
    assert!(page.toggle_favorite("7", &picture()).await.unwrap());
    assert!(page.is_in_favorites("7").await.unwrap());
    drop(page);
    task.await.unwrap();

    assert_eq!(harness.cached_keys("1.0.0").await.len(), 2);
}

#[tokio::test]
async fn http_worker_against_live_server() {
    common::init_tracing();
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/assets/style.css"))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("content-type", "text/css")
                .set_body_string("body{}"),
        )
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/api/search"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&server)
        .await;

    let dir = tempfile::tempdir().unwrap();
    let store = FileStore::open(dir.path().join("kv.json")).unwrap();
    let registry = FavoritesRegistry::new(AsyncStore::new(Arc::new(store)));

    let scope = Url::parse(&format!("{}/", server.uri())).unwrap();
    let fetcher = HttpFetcher::new(LoaderConfig::default()).unwrap();
    let controller = CacheController::new(
        CacheVersion::new("1.0.0"),
        CacheStorage::new().shared(),
        Arc::new(fetcher),
        RequestPolicy::default(),
    );
    let (worker, _rx) = WorkerScope::new(
        scope.join("service-worker.js").unwrap(),
        scope.clone(),
        controller,
        registry,
        vec![scope.join("assets/style.css").unwrap()],
    );
    worker.start().await.unwrap();

    let style = worker
        .handle_fetch(Request::get(scope.join("assets/style.css").unwrap()))
        .await
        .unwrap();
    let content_type = style.headers.get("content-type").and_then(|v| v.to_str().ok());
    assert_eq!(content_type, Some("text/css"));

    let search = worker
        .handle_fetch(Request::get(scope.join("api/search").unwrap()))
        .await;
    assert!(matches!(search, Err(ServiceWorkerError::NetworkError(_))));

    let snapshot = dir.path().join("caches.json");
    worker.controller().caches().read().await.save(&snapshot).unwrap();
    let restored = CacheStorage::load(&snapshot).unwrap();
    assert!(restored
        .match_request(scope.join("assets/style.css").unwrap().as_str())
        .is_some());
}
