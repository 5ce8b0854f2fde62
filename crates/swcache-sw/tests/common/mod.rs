//! Shared fixtures for the service worker integration tests.

#![allow(dead_code)]

use std::sync::{Arc, Mutex};

use bytes::Bytes;
use futures::future::BoxFuture;
use futures::FutureExt;
use hashbrown::HashMap;
use http::{HeaderMap, StatusCode};
use swcache_common::WorkerConfig;
use swcache_net::{Fetcher, NetError, Request, Response};
use swcache_sw::{CacheStorage, InProcessHost, Manifest, ServiceWorker};
use url::Url;

pub const SCRIPT: &str = "https://hass.local/service_worker.js";
pub const SCOPE: &str = "https://hass.local/";

pub fn script_url() -> Url {
    Url::parse(SCRIPT).unwrap()
}

pub fn url(s: &str) -> Url {
    Url::parse(s).unwrap()
}

/// Serves canned bodies by path; anything else is a 404.
#[derive(Default)]
pub struct MockFetcher {
    routes: Mutex<HashMap<String, (u16, Bytes)>>,
    requests: Mutex<Vec<String>>,
}

impl MockFetcher {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn serve(&self, path: &str, body: &'static str) {
        self.route(path, 200, body);
    }

    pub fn route(&self, path: &str, status: u16, body: &'static str) {
        self.routes
            .lock()
            .unwrap()
            .insert(path.to_string(), (status, Bytes::from_static(body.as_bytes())));
    }

    /// Every requested URL, in order.
    pub fn requests(&self) -> Vec<String> {
        self.requests.lock().unwrap().clone()
    }

    pub fn clear_requests(&self) {
        self.requests.lock().unwrap().clear();
    }
}

impl Fetcher for MockFetcher {
    fn fetch(&self, request: Request) -> BoxFuture<'_, Result<Response, NetError>> {
        self.requests.lock().unwrap().push(request.url.to_string());
        let (status, body) = self
            .routes
            .lock()
            .unwrap()
            .get(request.url.path())
            .cloned()
            .unwrap_or((404, Bytes::new()));
        let response = Response::new(
            request.url,
            StatusCode::from_u16(status).unwrap(),
            HeaderMap::new(),
            body,
        );
        async move { Ok(response) }.boxed()
    }
}

/// Worker over `manifest` sharing `storage`, `network` and `host`.
pub fn worker(
    manifest: &[(&str, &str)],
    storage: Arc<dyn CacheStorage>,
    network: Arc<MockFetcher>,
    host: Arc<InProcessHost>,
) -> ServiceWorker {
    ServiceWorker::builder(WorkerConfig::default(), script_url())
        .manifest(Manifest::new(manifest.iter().copied()))
        .scope(SCOPE)
        .storage(storage)
        .network(network)
        .in_process(host)
        .build()
        .unwrap()
}
