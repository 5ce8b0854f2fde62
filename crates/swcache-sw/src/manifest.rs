//! Precache manifest and the resolved URL → cache key map.

use std::path::Path;

use hashbrown::{HashMap, HashSet};
use serde::{Deserialize, Serialize};
use tracing::debug;
use url::Url;

use crate::normalize::UrlRules;
use crate::{Result, ServiceWorkerError};

/// One precached asset: a path (absolute or relative to the worker) and the
/// hash of its content. Serialized as `[path, hash]`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "(String, String)", into = "(String, String)")]
pub struct ManifestEntry {
    pub path: String,
    pub hash: String,
}

impl From<(String, String)> for ManifestEntry {
    fn from((path, hash): (String, String)) -> Self {
        Self { path, hash }
    }
}

impl From<ManifestEntry> for (String, String) {
    fn from(entry: ManifestEntry) -> Self {
        (entry.path, entry.hash)
    }
}

/// Ordered list of precache entries, fixed at build time.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Manifest {
    entries: Vec<ManifestEntry>,
}

impl Manifest {
    /// Build a manifest from `(path, hash)` pairs.
    pub fn new<P, H>(entries: impl IntoIterator<Item = (P, H)>) -> Self
    where
        P: Into<String>,
        H: Into<String>,
    {
        Self {
            entries: entries
                .into_iter()
                .map(|(path, hash)| ManifestEntry {
                    path: path.into(),
                    hash: hash.into(),
                })
                .collect(),
        }
    }

    /// Parse a JSON array of `[path, hash]` pairs.
    pub fn from_json(json: &str) -> Result<Self> {
        serde_json::from_str(json)
            .map_err(|e| ServiceWorkerError::Manifest(format!("invalid manifest JSON: {e}")))
    }

    /// Read a manifest file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        Self::from_json(&std::fs::read_to_string(path)?)
    }

    pub fn entries(&self) -> &[ManifestEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// The resolution map: absolute logical URL → versioned cache key.
///
/// Built once at startup and shared read-only between the lifecycle manager
/// and the fetch router.
#[derive(Debug, Clone)]
pub struct PrecacheManifest {
    location: Url,
    /// `(url, cache key)` in manifest order; a repeated path keeps its first
    /// position and takes the last hash.
    entries: Vec<(String, String)>,
    index: HashMap<String, usize>,
}

impl PrecacheManifest {
    /// Resolve every entry against the worker `location`.
    pub fn resolve(manifest: &Manifest, location: &Url, rules: &UrlRules) -> Result<Self> {
        let mut entries: Vec<(String, String)> = Vec::with_capacity(manifest.len());
        let mut index: HashMap<String, usize> = HashMap::with_capacity(manifest.len());

        for entry in manifest.entries() {
            let url = location.join(&entry.path).map_err(|e| {
                ServiceWorkerError::Manifest(format!("cannot resolve `{}`: {e}", entry.path))
            })?;
            let key = rules.cache_key(&url, &entry.hash).to_string();
            let url = url.to_string();

            match index.get(&url) {
                Some(&position) => entries[position].1 = key,
                None => {
                    index.insert(url.clone(), entries.len());
                    entries.push((url, key));
                }
            }
        }

        debug!(entries = entries.len(), location = %location, "Resolved precache manifest");

        Ok(Self {
            location: location.clone(),
            entries,
            index,
        })
    }

    /// Worker location the manifest was resolved against.
    pub fn location(&self) -> &Url {
        &self.location
    }

    /// Cache key for an absolute logical URL.
    pub fn cache_key_for(&self, url: &str) -> Option<&str> {
        self.index
            .get(url)
            .map(|&position| self.entries[position].1.as_str())
    }

    pub fn contains(&self, url: &str) -> bool {
        self.index.contains_key(url)
    }

    /// `(url, cache key)` pairs in manifest order.
    pub fn resolution_map(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(url, key)| (url.as_str(), key.as_str()))
    }

    /// Cache keys in manifest order.
    pub fn cache_keys(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|(_, key)| key.as_str())
    }

    /// The valid key set of this generation.
    pub fn all_cache_keys(&self) -> HashSet<String> {
        self.cache_keys().map(str::to_string).collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
