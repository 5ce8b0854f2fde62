//! Install / activate against in-memory and on-disk storage.

mod common;

use std::sync::Arc;

use common::{worker, MockFetcher};
use swcache_sw::{
    ActivateReport, CacheStorage, EventOutcome, FsCacheStorage, InProcessHost, InstallReport,
    MemoryCacheStorage, ServiceWorkerError, WorkerEvent,
};

const CACHE: &str = "sw-precache-v2--https://hass.local/";

fn network() -> Arc<MockFetcher> {
    let network = MockFetcher::new();
    network.serve("/", "<html>v1</html>");
    network.serve("/app.js", "app");
    network.serve("/lib.js", "lib");
    network
}

async fn cached_keys(storage: &dyn CacheStorage) -> Vec<String> {
    let mut keys = storage.open(CACHE).await.unwrap().keys().await.unwrap();
    keys.sort();
    keys
}

#[tokio::test]
async fn test_install_precaches_every_key() {
    let network = network();
    let storage = Arc::new(MemoryCacheStorage::new(network.clone()));
    let sw = worker(
        &[("/", "h1"), ("/app.js", "h2")],
        storage.clone(),
        network.clone(),
        Arc::new(InProcessHost::new()),
    );

    let outcome = sw.dispatch(WorkerEvent::Install).await.unwrap();
    assert!(matches!(
        outcome,
        EventOutcome::Installed(InstallReport { fetched: 2, already_cached: 0 })
    ));
    assert_eq!(
        cached_keys(storage.as_ref()).await,
        vec![
            "https://hass.local/?_sw-precache=h1".to_string(),
            "https://hass.local/app.js?_sw-precache=h2".to_string(),
        ]
    );

    // A second install fetches nothing.
    network.clear_requests();
    let outcome = sw.dispatch(WorkerEvent::Install).await.unwrap();
    assert!(matches!(
        outcome,
        EventOutcome::Installed(InstallReport { fetched: 0, already_cached: 2 })
    ));
    assert!(network.requests().is_empty());
}

#[tokio::test]
async fn test_install_fails_when_any_fetch_fails() {
    let network = network();
    network.route("/broken.js", 500, "boom");
    let storage = Arc::new(MemoryCacheStorage::new(network.clone()));
    let sw = worker(
        &[("/", "h1"), ("/broken.js", "h3")],
        storage.clone(),
        network,
        Arc::new(InProcessHost::new()),
    );

    let err = sw.dispatch(WorkerEvent::Install).await.unwrap_err();
    assert!(matches!(err, ServiceWorkerError::BadResponse { status: 500, .. }));
    assert!(!cached_keys(storage.as_ref())
        .await
        .contains(&"https://hass.local/broken.js?_sw-precache=h3".to_string()));
}

#[tokio::test]
async fn test_activate_prunes_to_current_manifest() {
    let network = network();
    let storage = Arc::new(MemoryCacheStorage::new(network.clone()));
    let host = Arc::new(InProcessHost::new());

    let v1 = worker(
        &[("/", "h1"), ("/app.js", "h2"), ("/lib.js", "h3")],
        storage.clone(),
        network.clone(),
        host.clone(),
    );
    v1.dispatch(WorkerEvent::Install).await.unwrap();

    // app.js changed, lib.js removed, / unchanged.
    let v2 = worker(
        &[("/", "h1"), ("/app.js", "h4")],
        storage.clone(),
        network.clone(),
        host,
    );
    network.clear_requests();
    let installed = v2.dispatch(WorkerEvent::Install).await.unwrap();
    assert!(matches!(
        installed,
        EventOutcome::Installed(InstallReport { fetched: 1, already_cached: 1 })
    ));
    assert_eq!(network.requests(), vec!["https://hass.local/app.js?_sw-precache=h4"]);

    let report = match v2.dispatch(WorkerEvent::Activate).await.unwrap() {
        EventOutcome::Activated(report) => report,
        other => panic!("unexpected activation result: {other:?}"),
    };
    assert_eq!(report.deleted, 2);
    assert_eq!(report.retained, 2);

    let mut expected: Vec<String> = v2.manifest().all_cache_keys().into_iter().collect();
    expected.sort();
    assert_eq!(cached_keys(storage.as_ref()).await, expected);
}

#[tokio::test]
async fn test_fs_storage_survives_restart() {
    let dir = tempfile::tempdir().unwrap();
    let network = network();

    {
        let storage = Arc::new(FsCacheStorage::new(dir.path(), network.clone()).await.unwrap());
        let sw = worker(&[("/", "h1"), ("/app.js", "h2")], storage, network.clone(), Arc::new(InProcessHost::new()));
        sw.dispatch(WorkerEvent::Install).await.unwrap();
    }

    network.clear_requests();
    let storage = Arc::new(FsCacheStorage::new(dir.path(), network.clone()).await.unwrap());
    let sw = worker(&[("/", "h1")], storage.clone(), network.clone(), Arc::new(InProcessHost::new()));

    let installed = sw.dispatch(WorkerEvent::Install).await.unwrap();
    assert!(matches!(
        installed,
        EventOutcome::Installed(InstallReport { fetched: 0, already_cached: 1 })
    ));
    assert!(network.requests().is_empty());

    let report = sw.lifecycle().activate().await.unwrap();
    assert_eq!(report, ActivateReport { deleted: 1, retained: 1 });
    assert_eq!(
        cached_keys(storage.as_ref()).await,
        vec!["https://hass.local/?_sw-precache=h1".to_string()]
    );
}
