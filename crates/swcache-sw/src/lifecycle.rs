//! Install (precache) and activate (prune) steps.

use std::sync::Arc;

use futures::future::{join_all, try_join_all};
use hashbrown::HashSet;
use swcache_net::{CredentialsMode, RedirectMode, Request};
use tracing::{debug, info, warn};
use url::Url;

use crate::cache::CacheStorage;
use crate::manifest::PrecacheManifest;
use crate::Result;

/// Result of a successful install.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct InstallReport {
    /// Keys fetched during this install.
    pub fetched: usize,
    /// Keys already present from an earlier generation.
    pub already_cached: usize,
}

/// Result of an activation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ActivateReport {
    pub deleted: usize,
    pub retained: usize,
}

/// Keeps the named cache in step with the current manifest.
pub struct CacheLifecycle {
    storage: Arc<dyn CacheStorage>,
    manifest: Arc<PrecacheManifest>,
    cache_name: String,
}

impl CacheLifecycle {
    pub fn new(
        storage: Arc<dyn CacheStorage>,
        manifest: Arc<PrecacheManifest>,
        cache_name: impl Into<String>,
    ) -> Self {
        Self {
            storage,
            manifest,
            cache_name: cache_name.into(),
        }
    }

    pub fn cache_name(&self) -> &str {
        &self.cache_name
    }

    /// Fetch every manifest key missing from the cache.
    ///
    /// All fetches run concurrently; the first failure fails the install.
    /// Entries fetched before the failure stay in the cache and are reused
    /// by the next attempt.
    pub async fn install(&self) -> Result<InstallReport> {
        let cache = self.storage.open(&self.cache_name).await?;
        let cached: HashSet<String> = cache.keys().await?.into_iter().collect();

        let missing: Vec<Url> = self
            .manifest
            .cache_keys()
            .collect::<HashSet<_>>()
            .into_iter()
            .filter(|key| !cached.contains(*key))
            .map(Url::parse)
            .collect::<std::result::Result<_, _>>()?;

        let report = InstallReport {
            fetched: missing.len(),
            already_cached: self.manifest.all_cache_keys().len() - missing.len(),
        };
        info!(
            cache = %self.cache_name,
            missing = report.fetched,
            cached = report.already_cached,
            "Precaching"
        );

        try_join_all(missing.into_iter().map(|key| {
            let cache = cache.clone();
            async move {
                debug!(%key, "Precache fetch");
                let request = Request::get(key)
                    .credentials(CredentialsMode::SameOrigin)
                    .redirect(RedirectMode::Follow);
                cache.add(request).await
            }
        }))
        .await?;

        info!(cache = %self.cache_name, "Precache complete");
        Ok(report)
    }

    /// Delete every cached key the current manifest no longer references.
    ///
    /// Every deletion is attempted; the first failure is returned afterwards.
    /// Deleted entries stay deleted.
    pub async fn activate(&self) -> Result<ActivateReport> {
        let cache = self.storage.open(&self.cache_name).await?;
        let valid = self.manifest.all_cache_keys();
        let keys = cache.keys().await?;

        let (stale, retained): (Vec<String>, Vec<String>) =
            keys.into_iter().partition(|key| !valid.contains(key));

        let results = join_all(stale.iter().map(|key| {
            let cache = cache.clone();
            async move {
                debug!(%key, "Pruning stale entry");
                cache.delete(key).await
            }
        }))
        .await;

        let mut report = ActivateReport {
            deleted: 0,
            retained: retained.len(),
        };
        let mut first_error = None;
        for (key, result) in stale.iter().zip(results) {
            match result {
                Ok(_) => report.deleted += 1,
                Err(e) => {
                    warn!(%key, error = %e, "Failed to prune cache entry");
                    first_error.get_or_insert(e);
                }
            }
        }

        info!(
            cache = %self.cache_name,
            deleted = report.deleted,
            retained = report.retained,
            "Pruned cache"
        );

        match first_error {
            Some(e) => Err(e),
            None => Ok(report),
        }
    }
}
