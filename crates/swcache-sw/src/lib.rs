//! # swcache service worker
//!
//! A precaching service worker for a single-page application.
//!
//! ## Features
//!
//! - **Manifest resolution**: static `(path, hash)` list → versioned cache keys
//! - **Lifecycle**: install precaches every missing key (all-or-nothing),
//!   activate prunes keys from older manifests
//! - **Fetch routing**: cache-first for precached URLs, directory index and
//!   SPA navigation fallback, network passthrough otherwise
//! - **Notifications**: push / click / close relayed to the app backend
//!
//! ## Architecture
//!
//! ```text
//! ServiceWorker (event dispatch)
//!     ├── CacheLifecycle ── install / activate
//!     ├── FetchRouter ───── fetch
//!     │       └── PrecacheManifest (url → cache key, read-only)
//!     ├── NotificationRelay ── push / notificationclick / notificationclose
//!     └── ServiceWorkerHost ── skipWaiting / clients.claim
//!
//! CacheStorage (caches)
//!     └── Cache
//!             └── cache key → CacheEntry
//! ```

use swcache_common::ConfigError;
use swcache_net::NetError;
use swcache_notify::NotifyError;
use thiserror::Error;

pub mod cache;
pub mod fs_cache;
pub mod lifecycle;
pub mod manifest;
pub mod normalize;
pub mod registration;
pub mod router;
pub mod worker;

pub use cache::{Cache, CacheEntry, CacheStorage, MemoryCacheStorage};
pub use fs_cache::FsCacheStorage;
pub use lifecycle::{ActivateReport, CacheLifecycle, InstallReport};
pub use manifest::{Manifest, ManifestEntry, PrecacheManifest};
pub use normalize::UrlRules;
pub use registration::{
    HostClient, InProcessHost, Registration, ServiceWorkerId, ServiceWorkerState, ShownNotification,
    WorkerVersion,
};
pub use router::{FetchRouter, MatchKind, Resolution};
pub use worker::{EventOutcome, ServiceWorker, ServiceWorkerBuilder, ServiceWorkerHost, WorkerEvent};

// ==================== Errors ====================

/// Errors that can occur in service worker operations.
#[derive(Error, Debug)]
pub enum ServiceWorkerError {
    #[error("Invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),

    #[error("Invalid pattern `{pattern}`: {source}")]
    InvalidPattern {
        pattern: String,
        #[source]
        source: regex::Error,
    },

    #[error("Manifest error: {0}")]
    Manifest(String),

    #[error("Network error: {0}")]
    Network(#[from] NetError),

    #[error("Precache of {url} failed with status {status}")]
    BadResponse { url: String, status: u16 },

    #[error("Cache error: {0}")]
    Cache(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Notification error: {0}")]
    Notify(#[from] NotifyError),

    #[error("Config error: {0}")]
    Config(#[from] ConfigError),
}

pub type Result<T> = std::result::Result<T, ServiceWorkerError>;
