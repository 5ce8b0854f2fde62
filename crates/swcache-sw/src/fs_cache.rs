//! Cache storage persisted to a directory.
//!
//! Each cache is one JSON file named after the base64url-encoded cache name.
//! Entries are loaded when the cache is first opened and the file is
//! rewritten (temp file + rename) on every mutation. The in-memory entries
//! only change once the write succeeded.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use futures::future::BoxFuture;
use futures::FutureExt;
use hashbrown::HashMap;
use serde::{Deserialize, Serialize};
use swcache_net::{Fetcher, Request, Response};
use tokio::sync::Mutex;
use tracing::{debug, trace};

use crate::cache::{fetch_and_put, Cache, CacheEntry, CacheStorage};
use crate::{Result, ServiceWorkerError};

const EXTENSION: &str = "json";

#[derive(Debug, Default, Serialize, Deserialize)]
struct CacheFile {
    name: String,
    entries: BTreeMap<String, CacheEntry>,
}

/// Directory-backed cache storage.
pub struct FsCacheStorage {
    root: PathBuf,
    open: Mutex<HashMap<String, Arc<FsCache>>>,
    fetcher: Arc<dyn Fetcher>,
}

impl FsCacheStorage {
    /// Use `root` as the storage directory, creating it if needed.
    pub async fn new(root: impl Into<PathBuf>, fetcher: Arc<dyn Fetcher>) -> Result<Self> {
        let root = root.into();
        tokio::fs::create_dir_all(&root).await?;
        Ok(Self {
            root,
            open: Mutex::new(HashMap::new()),
            fetcher,
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn path_for(&self, name: &str) -> PathBuf {
        self.root
            .join(format!("{}.{EXTENSION}", URL_SAFE_NO_PAD.encode(name)))
    }
}

impl CacheStorage for FsCacheStorage {
    fn open<'a>(&'a self, name: &'a str) -> BoxFuture<'a, Result<Arc<dyn Cache>>> {
        async move {
            let mut open = self.open.lock().await;
            if let Some(cache) = open.get(name) {
                return Ok(cache.clone() as Arc<dyn Cache>);
            }

            let cache = Arc::new(FsCache::load(name, self.path_for(name), self.fetcher.clone()).await?);
            open.insert(name.to_string(), cache.clone());
            Ok(cache as Arc<dyn Cache>)
        }
        .boxed()
    }

    fn delete<'a>(&'a self, name: &'a str) -> BoxFuture<'a, Result<bool>> {
        async move {
            let mut open = self.open.lock().await;
            open.remove(name);
            match tokio::fs::remove_file(self.path_for(name)).await {
                Ok(()) => Ok(true),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
                Err(e) => Err(e.into()),
            }
        }
        .boxed()
    }

    fn keys(&self) -> BoxFuture<'_, Result<Vec<String>>> {
        async move {
            let mut names = Vec::new();
            let mut dir = tokio::fs::read_dir(&self.root).await?;
            while let Some(item) = dir.next_entry().await? {
                let path = item.path();
                if path.extension().and_then(|e| e.to_str()) != Some(EXTENSION) {
                    continue;
                }
                let decoded = path
                    .file_stem()
                    .and_then(|stem| stem.to_str())
                    .and_then(|stem| URL_SAFE_NO_PAD.decode(stem).ok())
                    .and_then(|bytes| String::from_utf8(bytes).ok());
                if let Some(name) = decoded {
                    names.push(name);
                }
            }
            names.sort();
            Ok(names)
        }
        .boxed()
    }
}

/// One cache file.
pub struct FsCache {
    name: String,
    path: PathBuf,
    entries: Mutex<BTreeMap<String, CacheEntry>>,
    fetcher: Arc<dyn Fetcher>,
}

impl FsCache {
    async fn load(name: &str, path: PathBuf, fetcher: Arc<dyn Fetcher>) -> Result<Self> {
        let entries = match tokio::fs::read(&path).await {
            Ok(bytes) => {
                let file: CacheFile = serde_json::from_slice(&bytes)?;
                if file.name != name {
                    return Err(ServiceWorkerError::Cache(format!(
                        "{} holds cache `{}`, expected `{name}`",
                        path.display(),
                        file.name
                    )));
                }
                file.entries
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => BTreeMap::new(),
            Err(e) => return Err(e.into()),
        };

        debug!(cache = name, entries = entries.len(), path = %path.display(), "Opened cache file");

        Ok(Self {
            name: name.to_string(),
            path,
            entries: Mutex::new(entries),
            fetcher,
        })
    }

    /// Write `entries` as the new file contents. Called with the entries lock
    /// held, before the in-memory map is replaced.
    async fn persist(&self, entries: &BTreeMap<String, CacheEntry>) -> Result<()> {
        let file = CacheFile {
            name: self.name.clone(),
            entries: entries.clone(),
        };
        let tmp = self.path.with_extension("tmp");
        tokio::fs::write(&tmp, serde_json::to_vec(&file)?).await?;
        tokio::fs::rename(&tmp, &self.path).await?;
        Ok(())
    }
}

impl Cache for FsCache {
    fn name(&self) -> &str {
        &self.name
    }

    fn keys(&self) -> BoxFuture<'_, Result<Vec<String>>> {
        async move { Ok(self.entries.lock().await.keys().cloned().collect()) }.boxed()
    }

    fn match_key<'a>(&'a self, key: &'a str) -> BoxFuture<'a, Result<Option<Response>>> {
        async move {
            let entries = self.entries.lock().await;
            entries.get(key).map(CacheEntry::to_response).transpose()
        }
        .boxed()
    }

    fn put<'a>(&'a self, key: &'a str, response: Response) -> BoxFuture<'a, Result<()>> {
        async move {
            trace!(cache = %self.name, key, "Storing entry");
            let mut entries = self.entries.lock().await;
            let mut next = entries.clone();
            next.insert(key.to_string(), CacheEntry::from_response(key, &response));
            self.persist(&next).await?;
            *entries = next;
            Ok(())
        }
        .boxed()
    }

    fn delete<'a>(&'a self, key: &'a str) -> BoxFuture<'a, Result<bool>> {
        async move {
            let mut entries = self.entries.lock().await;
            if !entries.contains_key(key) {
                return Ok(false);
            }
            let mut next = entries.clone();
            next.remove(key);
            self.persist(&next).await?;
            *entries = next;
            Ok(true)
        }
        .boxed()
    }

    fn add(&self, request: Request) -> BoxFuture<'_, Result<()>> {
        fetch_and_put(self, self.fetcher.as_ref(), request).boxed()
    }
}
