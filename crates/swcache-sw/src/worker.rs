//! The service worker: event dispatch over the lifecycle, router and relay.

use std::sync::Arc;

use bytes::Bytes;
use futures::future::BoxFuture;
use swcache_common::WorkerConfig;
use swcache_net::{Fetcher, LoaderConfig, Request, ResourceLoader, Response};
use swcache_notify::{ClickOutcome, NotificationEvent, NotificationHost, NotificationRelay};
use tracing::{debug, info, warn};
use url::Url;

use crate::cache::{CacheStorage, MemoryCacheStorage};
use crate::lifecycle::{ActivateReport, CacheLifecycle, InstallReport};
use crate::manifest::{Manifest, PrecacheManifest};
use crate::normalize::UrlRules;
use crate::registration::InProcessHost;
use crate::router::FetchRouter;
use crate::{Result, ServiceWorkerError};

/// Worker-global operations provided by the host.
pub trait ServiceWorkerHost: Send + Sync {
    /// Request that the installed version activate without waiting for
    /// existing clients to close.
    fn skip_waiting(&self) -> BoxFuture<'_, Result<()>>;

    /// Take control of every client in scope.
    fn claim_clients(&self) -> BoxFuture<'_, Result<()>>;
}

/// Events delivered to the worker.
#[derive(Debug, Clone)]
pub enum WorkerEvent {
    Install,
    Activate,
    Fetch(Request),
    /// Push message, with its raw payload if any.
    Push(Option<Bytes>),
    NotificationClick(NotificationEvent),
    NotificationClose(NotificationEvent),
}

impl WorkerEvent {
    /// DOM event name.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Install => "install",
            Self::Activate => "activate",
            Self::Fetch(_) => "fetch",
            Self::Push(_) => "push",
            Self::NotificationClick(_) => "notificationclick",
            Self::NotificationClose(_) => "notificationclose",
        }
    }
}

/// Result of handling one event.
#[derive(Debug)]
pub enum EventOutcome {
    Installed(InstallReport),
    Activated(ActivateReport),
    /// The fetch was answered by the worker.
    Response(Response),
    /// The fetch was not intercepted; the caller goes to the network.
    Passthrough,
    /// Push or close handled.
    Handled,
    Click(ClickOutcome),
}

/// A precaching service worker.
pub struct ServiceWorker {
    script_url: Url,
    cache_name: String,
    manifest: Arc<PrecacheManifest>,
    lifecycle: CacheLifecycle,
    router: FetchRouter,
    relay: NotificationRelay,
    host: Arc<dyn ServiceWorkerHost>,
}

impl std::fmt::Debug for ServiceWorker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServiceWorker")
            .field("script_url", &self.script_url.as_str())
            .field("cache_name", &self.cache_name)
            .field("entries", &self.manifest.len())
            .finish()
    }
}

impl ServiceWorker {
    /// Start building a worker served from `script_url`.
    pub fn builder(config: WorkerConfig, script_url: Url) -> ServiceWorkerBuilder {
        ServiceWorkerBuilder::new(config, script_url)
    }

    pub fn script_url(&self) -> &Url {
        &self.script_url
    }

    pub fn cache_name(&self) -> &str {
        &self.cache_name
    }

    pub fn manifest(&self) -> &Arc<PrecacheManifest> {
        &self.manifest
    }

    pub fn router(&self) -> &FetchRouter {
        &self.router
    }

    pub fn lifecycle(&self) -> &CacheLifecycle {
        &self.lifecycle
    }

    /// Run the handler registered for `event`.
    pub async fn dispatch(&self, event: WorkerEvent) -> Result<EventOutcome> {
        debug!(event = event.name(), script = %self.script_url, "Dispatching event");
        match event {
            WorkerEvent::Install => self.on_install().await.map(EventOutcome::Installed),
            WorkerEvent::Activate => self.on_activate().await.map(EventOutcome::Activated),
            WorkerEvent::Fetch(request) => Ok(match self.router.handle_fetch(&request).await? {
                Some(response) => EventOutcome::Response(response),
                None => EventOutcome::Passthrough,
            }),
            WorkerEvent::Push(data) => {
                self.relay.on_push(data.as_deref()).await?;
                Ok(EventOutcome::Handled)
            }
            WorkerEvent::NotificationClick(event) => Ok(EventOutcome::Click(
                self.relay.on_notification_click(&event).await?,
            )),
            WorkerEvent::NotificationClose(event) => {
                self.relay.on_notification_close(&event).await;
                Ok(EventOutcome::Handled)
            }
        }
    }

    async fn on_install(&self) -> Result<InstallReport> {
        let report = self.lifecycle.install().await?;
        debug!("Install complete, requesting skip waiting");
        self.host.skip_waiting().await?;
        Ok(report)
    }

    /// Clients are claimed even when pruning failed.
    async fn on_activate(&self) -> Result<ActivateReport> {
        let pruned = self.lifecycle.activate().await;
        if let Err(e) = &pruned {
            warn!(error = %e, "Pruning failed, claiming clients anyway");
        }
        self.host.claim_clients().await?;
        pruned
    }
}

/// Builder for [`ServiceWorker`].
///
/// Only the manifest is required. Storage defaults to in-memory, the network
/// to a [`ResourceLoader`] built from the HTTP config, and both hosts to one
/// shared [`InProcessHost`].
pub struct ServiceWorkerBuilder {
    config: WorkerConfig,
    script_url: Url,
    manifest: Option<Manifest>,
    scope: Option<String>,
    storage: Option<Arc<dyn CacheStorage>>,
    network: Option<Arc<dyn Fetcher>>,
    host: Option<Arc<dyn ServiceWorkerHost>>,
    notifications: Option<Arc<dyn NotificationHost>>,
}

impl ServiceWorkerBuilder {
    pub fn new(config: WorkerConfig, script_url: Url) -> Self {
        Self {
            config,
            script_url,
            manifest: None,
            scope: None,
            storage: None,
            network: None,
            host: None,
            notifications: None,
        }
    }

    pub fn manifest(mut self, manifest: Manifest) -> Self {
        self.manifest = Some(manifest);
        self
    }

    /// Registration scope, used in the cache name.
    pub fn scope(mut self, scope: impl Into<String>) -> Self {
        self.scope = Some(scope.into());
        self
    }

    pub fn storage(mut self, storage: Arc<dyn CacheStorage>) -> Self {
        self.storage = Some(storage);
        self
    }

    pub fn network(mut self, network: Arc<dyn Fetcher>) -> Self {
        self.network = Some(network);
        self
    }

    pub fn host(mut self, host: Arc<dyn ServiceWorkerHost>) -> Self {
        self.host = Some(host);
        self
    }

    pub fn notifications(mut self, notifications: Arc<dyn NotificationHost>) -> Self {
        self.notifications = Some(notifications);
        self
    }

    /// Use one in-process host for both worker and notification primitives.
    pub fn in_process(self, host: Arc<InProcessHost>) -> Self {
        self.host(host.clone()).notifications(host)
    }

    pub fn build(self) -> Result<ServiceWorker> {
        self.config.validate()?;

        let manifest = self
            .manifest
            .ok_or_else(|| ServiceWorkerError::Manifest("no manifest supplied".to_string()))?;
        let rules = Arc::new(UrlRules::from_config(&self.config, &self.script_url)?);
        let precache = Arc::new(PrecacheManifest::resolve(&manifest, &self.script_url, &rules)?);
        let cache_name = self.config.cache_name(self.scope.as_deref());

        let network: Arc<dyn Fetcher> = match self.network {
            Some(network) => network,
            None => Arc::new(ResourceLoader::new(LoaderConfig::from(&self.config.http))?),
        };
        let storage: Arc<dyn CacheStorage> = match self.storage {
            Some(storage) => storage,
            None => Arc::new(MemoryCacheStorage::new(network.clone())),
        };

        let fallback = Arc::new(InProcessHost::new());
        let host: Arc<dyn ServiceWorkerHost> = match self.host {
            Some(host) => host,
            None => fallback.clone(),
        };
        let notifications: Arc<dyn NotificationHost> = match self.notifications {
            Some(notifications) => notifications,
            None => fallback,
        };

        let relay = NotificationRelay::new(
            network.clone(),
            notifications,
            self.script_url.clone(),
            &self.config.notify_channel,
        )?;

        info!(
            script = %self.script_url,
            cache = %cache_name,
            entries = precache.len(),
            "Service worker built"
        );

        Ok(ServiceWorker {
            lifecycle: CacheLifecycle::new(storage.clone(), precache.clone(), cache_name.clone()),
            router: FetchRouter::new(precache.clone(), rules, storage, cache_name.clone(), network),
            script_url: self.script_url,
            cache_name,
            manifest: precache,
            relay,
            host,
        })
    }
}
