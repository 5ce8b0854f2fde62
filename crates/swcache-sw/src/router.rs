//! Fetch interception: cache-first for precached URLs, passthrough otherwise.

use std::sync::Arc;

use http::Method;
use swcache_net::{Fetcher, Request, Response};
use tracing::{debug, trace, warn};
use url::Url;

use crate::cache::CacheStorage;
use crate::manifest::PrecacheManifest;
use crate::normalize::{append_directory_index, is_fallback_allowed, strip_ignored_parameters, UrlRules};
use crate::Result;

/// Which lookup step resolved a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchKind {
    /// The normalized URL is in the manifest.
    Direct,
    /// The URL with the directory index appended is in the manifest.
    DirectoryIndex,
    /// A navigation rewritten to the fallback document.
    NavigateFallback,
}

/// A request resolved to a precached entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resolution {
    /// Logical manifest URL that matched.
    pub url: Url,
    pub cache_key: String,
    pub matched_by: MatchKind,
}

/// Routes intercepted requests to the precache or the network.
pub struct FetchRouter {
    manifest: Arc<PrecacheManifest>,
    rules: Arc<UrlRules>,
    storage: Arc<dyn CacheStorage>,
    cache_name: String,
    network: Arc<dyn Fetcher>,
}

impl FetchRouter {
    pub fn new(
        manifest: Arc<PrecacheManifest>,
        rules: Arc<UrlRules>,
        storage: Arc<dyn CacheStorage>,
        cache_name: impl Into<String>,
        network: Arc<dyn Fetcher>,
    ) -> Self {
        Self {
            manifest,
            rules,
            storage,
            cache_name: cache_name.into(),
            network,
        }
    }

    /// Resolve a request against the manifest. First match wins:
    /// direct, directory index, then navigation fallback.
    pub fn resolve(&self, request: &Request) -> Option<Resolution> {
        if request.method != Method::GET {
            return None;
        }

        // Fragments never reach the network.
        let mut url = request.url.clone();
        url.set_fragment(None);
        let url = strip_ignored_parameters(&url, &self.rules.ignore_parameters);

        if let Some(resolution) = self.lookup(url.clone(), MatchKind::Direct) {
            return Some(resolution);
        }

        if let Some(index) = self.rules.directory_index.as_deref() {
            let indexed = append_directory_index(&url, index);
            if let Some(resolution) = self.lookup(indexed, MatchKind::DirectoryIndex) {
                return Some(resolution);
            }
        }

        // The denylist is checked against the URL as requested.
        if request.is_navigation()
            && is_fallback_allowed(&request.url, self.rules.fallback_denylist.as_ref())
        {
            if let Some(fallback) = self.rules.navigate_fallback.clone() {
                return self.lookup(fallback, MatchKind::NavigateFallback);
            }
        }

        None
    }

    fn lookup(&self, url: Url, matched_by: MatchKind) -> Option<Resolution> {
        let cache_key = self.manifest.cache_key_for(url.as_str())?.to_string();
        Some(Resolution {
            url,
            cache_key,
            matched_by,
        })
    }

    /// Handle an intercepted request.
    ///
    /// `Ok(None)` means the request is not intercepted and should go to the
    /// network untouched. A resolved entry missing from the cache is served
    /// from the network instead.
    pub async fn handle_fetch(&self, request: &Request) -> Result<Option<Response>> {
        let Some(resolution) = self.resolve(request) else {
            trace!(url = %request.url, "Not precached, passing through");
            return Ok(None);
        };

        debug!(
            url = %request.url,
            key = %resolution.cache_key,
            matched_by = ?resolution.matched_by,
            "Serving from precache"
        );

        match self.cached(&resolution.cache_key).await {
            Ok(Some(response)) => return Ok(Some(response)),
            Ok(None) => warn!(
                url = %request.url,
                key = %resolution.cache_key,
                "Couldn't serve response from cache: the cached response that was expected is missing"
            ),
            Err(e) => warn!(
                url = %request.url,
                error = %e,
                "Couldn't serve response from cache"
            ),
        }

        let response = self.network.fetch(request.clone()).await?;
        Ok(Some(response))
    }

    async fn cached(&self, key: &str) -> Result<Option<Response>> {
        let cache = self.storage.open(&self.cache_name).await?;
        cache.match_key(key).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::MemoryCacheStorage;
    use crate::manifest::Manifest;
    use bytes::Bytes;
    use futures::future::BoxFuture;
    use futures::FutureExt;
    use http::{HeaderMap, StatusCode};
    use swcache_common::WorkerConfig;
    use swcache_net::NetError;

    struct NoNetwork;

    impl Fetcher for NoNetwork {
        fn fetch(&self, request: Request) -> BoxFuture<'_, std::result::Result<Response, NetError>> {
            let url = request.url.to_string();
            async move { Err(NetError::RequestFailed(format!("offline: {url}"))) }.boxed()
        }
    }

    /// Answers every request with `200 network`.
    struct Online;

    impl Fetcher for Online {
        fn fetch(&self, request: Request) -> BoxFuture<'_, std::result::Result<Response, NetError>> {
            let response = Response::new(
                request.url,
                StatusCode::OK,
                HeaderMap::new(),
                Bytes::from_static(b"network"),
            );
            async move { Ok(response) }.boxed()
        }
    }

    /// Storage whose caches can never be opened.
    struct BrokenStorage;

    impl CacheStorage for BrokenStorage {
        fn open<'a>(&'a self, name: &'a str) -> BoxFuture<'a, Result<Arc<dyn crate::cache::Cache>>> {
            async move { Err(crate::ServiceWorkerError::Cache(format!("{name} is unreadable"))) }.boxed()
        }

        fn delete<'a>(&'a self, _name: &'a str) -> BoxFuture<'a, Result<bool>> {
            async move { Ok(false) }.boxed()
        }

        fn keys(&self) -> BoxFuture<'_, Result<Vec<String>>> {
            async move { Ok(Vec::new()) }.boxed()
        }
    }

    fn router(entries: &[(&str, &str)]) -> FetchRouter {
        let location = Url::parse("https://hass.local/service_worker.js").unwrap();
        let rules = UrlRules::from_config(&WorkerConfig::default(), &location).unwrap();
        let manifest = PrecacheManifest::resolve(
            &Manifest::new(entries.iter().copied()),
            &location,
            &rules,
        )
        .unwrap();
        let network: Arc<dyn Fetcher> = Arc::new(NoNetwork);
        FetchRouter::new(
            Arc::new(manifest),
            Arc::new(rules),
            Arc::new(MemoryCacheStorage::new(network.clone())),
            "test",
            network,
        )
    }

    fn get(url: &str) -> Request {
        Request::get(Url::parse(url).unwrap())
    }

    fn navigate(url: &str) -> Request {
        Request::navigate(Url::parse(url).unwrap())
    }

    #[test]
    fn test_direct_match_ignores_tracking_parameters() {
        let router = router(&[("/", "h1"), ("/app.js", "h2")]);

        let resolution = router.resolve(&get("https://hass.local/app.js?utm_source=x")).unwrap();
        assert_eq!(resolution.matched_by, MatchKind::Direct);
        assert_eq!(resolution.cache_key, "https://hass.local/app.js?_sw-precache=h2");

        assert!(router.resolve(&get("https://hass.local/app.js?v=2")).is_none());
    }

    #[test]
    fn test_directory_index_match() {
        let router = router(&[("/docs/index.html", "h")]);
        let resolution = router.resolve(&get("https://hass.local/docs/")).unwrap();
        assert_eq!(resolution.matched_by, MatchKind::DirectoryIndex);
        assert_eq!(resolution.url.as_str(), "https://hass.local/docs/index.html");
    }

    #[test]
    fn test_navigation_fallback() {
        let router = router(&[("/", "h1"), ("/app.js", "h2")]);

        let root = router.resolve(&navigate("https://hass.local/")).unwrap();
        assert_eq!(root.matched_by, MatchKind::Direct);

        let dashboard = router.resolve(&navigate("https://hass.local/dashboard")).unwrap();
        assert_eq!(dashboard.matched_by, MatchKind::NavigateFallback);
        assert_eq!(dashboard.cache_key, "https://hass.local/?_sw-precache=h1");

        assert!(router.resolve(&navigate("https://hass.local/api/state")).is_none());
        assert!(router.resolve(&get("https://hass.local/dashboard")).is_none());
    }

    #[test]
    fn test_non_get_is_never_resolved() {
        let router = router(&[("/", "h1")]);
        let mut request = navigate("https://hass.local/");
        request.method = Method::POST;
        assert!(router.resolve(&request).is_none());
    }

    #[test]
    fn test_fragment_is_ignored() {
        let router = router(&[("/app.js", "h2")]);
        assert!(router.resolve(&get("https://hass.local/app.js#top")).is_some());
    }

    #[tokio::test]
    async fn test_unresolved_request_passes_through() {
        let router = router(&[("/", "h1")]);
        let outcome = router.handle_fetch(&get("https://hass.local/api/config")).await.unwrap();
        assert!(outcome.is_none());
    }

    #[tokio::test]
    async fn test_missing_entry_falls_back_to_network() {
        let router = router(&[("/", "h1")]);
        // Nothing was precached and the network is down: the error is the
        // network's, proving the fallback fetch happened.
        let err = router.handle_fetch(&navigate("https://hass.local/")).await.unwrap_err();
        assert!(matches!(err, crate::ServiceWorkerError::Network(_)));
    }

    #[tokio::test]
    async fn test_serves_cached_entry() {
        let router = router(&[("/", "h1")]);
        let cache = router.storage.open("test").await.unwrap();
        cache
            .put(
                "https://hass.local/?_sw-precache=h1",
                Response::new(
                    Url::parse("https://hass.local/").unwrap(),
                    StatusCode::OK,
                    HeaderMap::new(),
                    Bytes::from_static(b"<html>"),
                ),
            )
            .await
            .unwrap();

        let response = router
            .handle_fetch(&navigate("https://hass.local/lovelace/0"))
            .await
            .unwrap()
            .unwrap();
        assert!(response.from_cache());
        assert_eq!(response.body().as_ref(), b"<html>");
    }

    #[tokio::test]
    async fn test_unreadable_cache_falls_back_to_network() {
        let precached = router(&[("/", "h1")]);
        let router = FetchRouter::new(
            precached.manifest.clone(),
            precached.rules.clone(),
            Arc::new(BrokenStorage),
            "test",
            Arc::new(Online),
        );

        let response = router
            .handle_fetch(&navigate("https://hass.local/"))
            .await
            .unwrap()
            .unwrap();
        assert!(!response.from_cache());
        assert_eq!(response.body().as_ref(), b"network");
    }
}
