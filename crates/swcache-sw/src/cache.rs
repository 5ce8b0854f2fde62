//! Cache storage capability (`caches` / `Cache`) and the in-memory store.

use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use futures::future::BoxFuture;
use futures::FutureExt;
use hashbrown::HashMap;
use serde::{Deserialize, Serialize};
use swcache_net::{Fetcher, Request, Response};
use tokio::sync::RwLock;
use tracing::trace;
use url::Url;

use crate::{Result, ServiceWorkerError};

// ==================== Entries ====================

/// A stored response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheEntry {
    /// Cache key (request URL).
    pub url: String,

    /// Response status.
    pub status: u16,

    /// Response headers.
    pub headers: std::collections::HashMap<String, String>,

    /// Response body.
    #[serde(with = "body_base64")]
    pub body: Vec<u8>,

    /// Cached at timestamp (ms since epoch).
    pub cached_at: u64,
}

impl CacheEntry {
    /// Capture a response under `key`.
    pub fn from_response(key: &str, response: &Response) -> Self {
        Self {
            url: key.to_string(),
            status: response.status.as_u16(),
            headers: response.header_strings(),
            body: response.body().to_vec(),
            cached_at: SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .map(|d| d.as_millis() as u64)
                .unwrap_or_default(),
        }
    }

    /// Rebuild the response for serving.
    pub fn to_response(&self) -> Result<Response> {
        let url = Url::parse(&self.url)?;
        Ok(Response::from_stored(url, self.status, &self.headers, self.body.clone())?)
    }
}

mod body_base64 {
    use base64::engine::general_purpose::STANDARD;
    use base64::Engine;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(body: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&STANDARD.encode(body))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let encoded = String::deserialize(deserializer)?;
        STANDARD.decode(encoded).map_err(serde::de::Error::custom)
    }
}

// ==================== Traits ====================

/// Cache storage (the `caches` global). Handles are acquired per operation.
pub trait CacheStorage: Send + Sync {
    /// Open a cache, creating it if it does not exist.
    fn open<'a>(&'a self, name: &'a str) -> BoxFuture<'a, Result<Arc<dyn Cache>>>;

    /// Delete a whole cache.
    fn delete<'a>(&'a self, name: &'a str) -> BoxFuture<'a, Result<bool>>;

    /// Names of all caches.
    fn keys(&self) -> BoxFuture<'_, Result<Vec<String>>>;
}

/// A named cache. Every operation is atomic on its own.
pub trait Cache: Send + Sync {
    fn name(&self) -> &str;

    /// Keys of all stored entries.
    fn keys(&self) -> BoxFuture<'_, Result<Vec<String>>>;

    /// Look up an entry by key.
    fn match_key<'a>(&'a self, key: &'a str) -> BoxFuture<'a, Result<Option<Response>>>;

    /// Store a response under `key`, replacing any previous one.
    fn put<'a>(&'a self, key: &'a str, response: Response) -> BoxFuture<'a, Result<()>>;

    /// Remove an entry. Returns whether it existed.
    fn delete<'a>(&'a self, key: &'a str) -> BoxFuture<'a, Result<bool>>;

    /// Fetch `request` and store the response under the request URL.
    /// Rejects non-2xx responses, storing nothing.
    fn add(&self, request: Request) -> BoxFuture<'_, Result<()>>;
}

/// Shared `Cache::add` behaviour: fetch, require 2xx, put.
pub(crate) async fn fetch_and_put(
    cache: &dyn Cache,
    fetcher: &dyn Fetcher,
    request: Request,
) -> Result<()> {
    let key = request.url.to_string();
    let response = fetcher.fetch(request).await?;
    if !response.ok() {
        return Err(ServiceWorkerError::BadResponse {
            url: key,
            status: response.status.as_u16(),
        });
    }
    cache.put(&key, response).await
}

// ==================== In-memory storage ====================

/// In-memory cache storage. Lives as long as the process.
pub struct MemoryCacheStorage {
    caches: RwLock<HashMap<String, Arc<MemoryCache>>>,
    fetcher: Arc<dyn Fetcher>,
}

impl MemoryCacheStorage {
    /// Create storage whose `Cache::add` fetches through `fetcher`.
    pub fn new(fetcher: Arc<dyn Fetcher>) -> Self {
        Self {
            caches: RwLock::new(HashMap::new()),
            fetcher,
        }
    }

    /// Check if cache exists.
    pub async fn has(&self, name: &str) -> bool {
        self.caches.read().await.contains_key(name)
    }
}

impl CacheStorage for MemoryCacheStorage {
    fn open<'a>(&'a self, name: &'a str) -> BoxFuture<'a, Result<Arc<dyn Cache>>> {
        async move {
            let mut caches = self.caches.write().await;
            let cache = caches
                .entry(name.to_string())
                .or_insert_with(|| Arc::new(MemoryCache::new(name, self.fetcher.clone())))
                .clone();
            Ok(cache as Arc<dyn Cache>)
        }
        .boxed()
    }

    fn delete<'a>(&'a self, name: &'a str) -> BoxFuture<'a, Result<bool>> {
        async move { Ok(self.caches.write().await.remove(name).is_some()) }.boxed()
    }

    fn keys(&self) -> BoxFuture<'_, Result<Vec<String>>> {
        async move { Ok(self.caches.read().await.keys().cloned().collect()) }.boxed()
    }
}

/// A cache held in memory.
pub struct MemoryCache {
    name: String,
    entries: RwLock<HashMap<String, CacheEntry>>,
    fetcher: Arc<dyn Fetcher>,
}

impl MemoryCache {
    fn new(name: &str, fetcher: Arc<dyn Fetcher>) -> Self {
        Self {
            name: name.to_string(),
            entries: RwLock::new(HashMap::new()),
            fetcher,
        }
    }
}

impl Cache for MemoryCache {
    fn name(&self) -> &str {
        &self.name
    }

    fn keys(&self) -> BoxFuture<'_, Result<Vec<String>>> {
        async move { Ok(self.entries.read().await.keys().cloned().collect()) }.boxed()
    }

    fn match_key<'a>(&'a self, key: &'a str) -> BoxFuture<'a, Result<Option<Response>>> {
        async move {
            self.entries
                .read()
                .await
                .get(key)
                .map(CacheEntry::to_response)
                .transpose()
        }
        .boxed()
    }

    fn put<'a>(&'a self, key: &'a str, response: Response) -> BoxFuture<'a, Result<()>> {
        async move {
            trace!(cache = %self.name, key, "Storing entry");
            let entry = CacheEntry::from_response(key, &response);
            self.entries.write().await.insert(key.to_string(), entry);
            Ok(())
        }
        .boxed()
    }

    fn delete<'a>(&'a self, key: &'a str) -> BoxFuture<'a, Result<bool>> {
        async move { Ok(self.entries.write().await.remove(key).is_some()) }.boxed()
    }

    fn add(&self, request: Request) -> BoxFuture<'_, Result<()>> {
        fetch_and_put(self, self.fetcher.as_ref(), request).boxed()
    }
}
