//! Registration state machine and an in-process host.
//!
//! [`Registration`] holds the installing, waiting and active versions of a
//! worker and drives an update end to end: install, wait or skip waiting,
//! activate. [`InProcessHost`] provides the worker-global primitives
//! (skip waiting, clients, notifications) without a browser.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use futures::future::BoxFuture;
use futures::FutureExt;
use hashbrown::HashMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use swcache_net::Request;
use swcache_notify::{NotificationHost, NotifyError, WindowClient};
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info, warn};
use url::Url;

use crate::worker::{EventOutcome, ServiceWorker, ServiceWorkerHost, WorkerEvent};
use crate::Result;

// ==================== Types ====================

/// Unique identifier for a worker version.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ServiceWorkerId(u64);

impl ServiceWorkerId {
    fn new() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(1);
        Self(COUNTER.fetch_add(1, Ordering::Relaxed))
    }

    pub fn raw(&self) -> u64 {
        self.0
    }
}

/// Worker version state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ServiceWorkerState {
    /// Built, not yet installing.
    #[default]
    Parsed,
    /// Install event running.
    Installing,
    /// Installed, waiting for activation.
    Installed,
    /// Activate event running.
    Activating,
    /// Active and controlling clients.
    Activated,
    /// Replaced, or install failed.
    Redundant,
}

/// One version of the worker inside a registration.
#[derive(Debug, Clone)]
pub struct WorkerVersion {
    pub id: ServiceWorkerId,
    pub state: ServiceWorkerState,
    pub worker: Arc<ServiceWorker>,
    /// Failure that made this version redundant.
    pub error: Option<String>,
    pub state_changed_at: Instant,
}

impl WorkerVersion {
    fn new(worker: Arc<ServiceWorker>) -> Self {
        Self {
            id: ServiceWorkerId::new(),
            state: ServiceWorkerState::Parsed,
            worker,
            error: None,
            state_changed_at: Instant::now(),
        }
    }

    fn set_state(&mut self, state: ServiceWorkerState) {
        debug!(id = self.id.raw(), from = ?self.state, to = ?state, "Worker state change");
        self.state = state;
        self.state_changed_at = Instant::now();
    }

    pub fn is_active(&self) -> bool {
        self.state == ServiceWorkerState::Activated
    }
}

#[derive(Debug, Default)]
struct Slots {
    installing: Option<WorkerVersion>,
    waiting: Option<WorkerVersion>,
    active: Option<WorkerVersion>,
}

// ==================== Registration ====================

/// A worker registration for one scope.
///
/// Updates, activations and unregistration are jobs: they run one at a
/// time, in call order, under the job lock. The slot lock is never held
/// while an event handler runs, since handlers call back into the host.
pub struct Registration {
    scope: Url,
    host: Arc<InProcessHost>,
    jobs: Mutex<()>,
    slots: RwLock<Slots>,
}

impl Registration {
    pub fn new(scope: Url, host: Arc<InProcessHost>) -> Self {
        Self {
            scope,
            host,
            jobs: Mutex::new(()),
            slots: RwLock::new(Slots::default()),
        }
    }

    pub fn scope(&self) -> &Url {
        &self.scope
    }

    pub fn host(&self) -> &Arc<InProcessHost> {
        &self.host
    }

    /// Install `worker` and activate it when nothing is active or it asked
    /// to skip waiting.
    ///
    /// A failed install leaves the previous active version in place and
    /// marks the new one redundant. An activation error is returned after
    /// the new version has taken over. An update started while another job
    /// runs waits for it to finish.
    pub async fn update(&self, worker: ServiceWorker) -> Result<ServiceWorkerId> {
        let _job = self.jobs.lock().await;
        let worker = Arc::new(worker);
        let id = {
            let mut slots = self.slots.write().await;
            if let Some(mut previous) = slots.installing.take() {
                previous.set_state(ServiceWorkerState::Redundant);
            }
            let mut version = WorkerVersion::new(worker.clone());
            version.set_state(ServiceWorkerState::Installing);
            let id = version.id;
            slots.installing = Some(version);
            id
        };
        self.host.skip_waiting_requested.store(false, Ordering::SeqCst);

        info!(scope = %self.scope, id = id.raw(), script = %worker.script_url(), "Installing worker");
        if let Err(e) = worker.dispatch(WorkerEvent::Install).await {
            warn!(scope = %self.scope, id = id.raw(), error = %e, "Install failed");
            let mut slots = self.slots.write().await;
            if let Some(mut failed) = slots.installing.take() {
                failed.error = Some(e.to_string());
                failed.set_state(ServiceWorkerState::Redundant);
            }
            return Err(e);
        }

        let activate_now = {
            let mut slots = self.slots.write().await;
            if let Some(mut installed) = slots.installing.take() {
                installed.set_state(ServiceWorkerState::Installed);
                if let Some(mut replaced) = slots.waiting.replace(installed) {
                    replaced.set_state(ServiceWorkerState::Redundant);
                }
            }
            slots.active.is_none() || self.host.skip_waiting_requested.load(Ordering::SeqCst)
        };

        if activate_now {
            self.promote_waiting().await?;
        } else {
            info!(scope = %self.scope, id = id.raw(), "Worker installed, waiting");
        }
        Ok(id)
    }

    /// Promote the waiting version. Returns `Ok(false)` when nothing waits.
    pub async fn activate(&self) -> Result<bool> {
        let _job = self.jobs.lock().await;
        self.promote_waiting().await
    }

    /// Called with the job lock held.
    async fn promote_waiting(&self) -> Result<bool> {
        let (id, worker) = {
            let mut slots = self.slots.write().await;
            let Some(mut next) = slots.waiting.take() else {
                return Ok(false);
            };
            if let Some(mut old) = slots.active.take() {
                old.set_state(ServiceWorkerState::Redundant);
            }
            next.set_state(ServiceWorkerState::Activating);
            let promoted = (next.id, next.worker.clone());
            slots.active = Some(next);
            promoted
        };
        *self.host.active.write().await = Some(id);

        let result = worker.dispatch(WorkerEvent::Activate).await;

        if let Some(active) = self.slots.write().await.active.as_mut() {
            if active.id == id {
                active.set_state(ServiceWorkerState::Activated);
            }
        }
        info!(scope = %self.scope, id = id.raw(), "Worker activated");

        result.map(|_| true)
    }

    /// Route a fetch through the active version. `Ok(None)` when there is
    /// no active version or the request was not intercepted.
    pub async fn fetch(&self, request: Request) -> Result<Option<swcache_net::Response>> {
        match self.dispatch(WorkerEvent::Fetch(request)).await? {
            Some(EventOutcome::Response(response)) => Ok(Some(response)),
            _ => Ok(None),
        }
    }

    /// Deliver an event to the active version.
    pub async fn dispatch(&self, event: WorkerEvent) -> Result<Option<EventOutcome>> {
        let Some(worker) = self.active_worker().await else {
            debug!(scope = %self.scope, event = event.name(), "No active worker");
            return Ok(None);
        };
        worker.dispatch(event).await.map(Some)
    }

    pub async fn active_worker(&self) -> Option<Arc<ServiceWorker>> {
        self.slots
            .read()
            .await
            .active
            .as_ref()
            .map(|version| version.worker.clone())
    }

    pub async fn active(&self) -> Option<WorkerVersion> {
        self.slots.read().await.active.clone()
    }

    pub async fn waiting(&self) -> Option<WorkerVersion> {
        self.slots.read().await.waiting.clone()
    }

    pub async fn installing(&self) -> Option<WorkerVersion> {
        self.slots.read().await.installing.clone()
    }

    /// Drop every version.
    pub async fn unregister(&self) {
        let _job = self.jobs.lock().await;
        let mut guard = self.slots.write().await;
        let slots = &mut *guard;
        for slot in [&mut slots.installing, &mut slots.waiting, &mut slots.active] {
            if let Some(mut version) = slot.take() {
                version.set_state(ServiceWorkerState::Redundant);
            }
        }
        *self.host.active.write().await = None;
    }
}

// ==================== Host ====================

/// A page known to the host.
#[derive(Debug, Clone)]
pub struct HostClient {
    pub id: String,
    pub url: Url,
    pub focused: bool,
    /// Worker version controlling this client.
    pub controller: Option<ServiceWorkerId>,
}

/// A notification shown through the host.
#[derive(Debug, Clone, PartialEq)]
pub struct ShownNotification {
    pub title: String,
    pub options: Value,
    pub tag: Option<String>,
    pub closed: bool,
}

/// Worker and notification host living in the current process.
#[derive(Default)]
pub struct InProcessHost {
    skip_waiting_requested: AtomicBool,
    active: RwLock<Option<ServiceWorkerId>>,
    clients: RwLock<HashMap<String, HostClient>>,
    notifications: RwLock<Vec<ShownNotification>>,
    next_client: AtomicU64,
}

impl InProcessHost {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an open, uncontrolled window.
    pub async fn add_client(&self, url: Url) -> String {
        let id = self.client_id();
        self.clients.write().await.insert(
            id.clone(),
            HostClient {
                id: id.clone(),
                url,
                focused: false,
                controller: None,
            },
        );
        id
    }

    pub async fn client(&self, id: &str) -> Option<HostClient> {
        self.clients.read().await.get(id).cloned()
    }

    /// All clients, ordered by id.
    pub async fn clients(&self) -> Vec<HostClient> {
        let mut clients: Vec<_> = self.clients.read().await.values().cloned().collect();
        clients.sort_by(|a, b| a.id.cmp(&b.id));
        clients
    }

    pub async fn notifications(&self) -> Vec<ShownNotification> {
        self.notifications.read().await.clone()
    }

    fn client_id(&self) -> String {
        format!("client-{:04}", self.next_client.fetch_add(1, Ordering::Relaxed) + 1)
    }

    async fn focus_only(&self, id: &str) -> bool {
        let mut clients = self.clients.write().await;
        if !clients.contains_key(id) {
            return false;
        }
        for client in clients.values_mut() {
            client.focused = client.id == id;
        }
        true
    }
}

impl ServiceWorkerHost for InProcessHost {
    fn skip_waiting(&self) -> BoxFuture<'_, Result<()>> {
        async move {
            self.skip_waiting_requested.store(true, Ordering::SeqCst);
            Ok(())
        }
        .boxed()
    }

    fn claim_clients(&self) -> BoxFuture<'_, Result<()>> {
        async move {
            let Some(active) = *self.active.read().await else {
                debug!("No activating version, nothing to claim");
                return Ok(());
            };
            let mut clients = self.clients.write().await;
            for client in clients.values_mut() {
                client.controller = Some(active);
            }
            debug!(count = clients.len(), id = active.raw(), "Claimed clients");
            Ok(())
        }
        .boxed()
    }
}

impl NotificationHost for InProcessHost {
    fn show_notification<'a>(
        &'a self,
        title: &'a str,
        options: &'a Value,
    ) -> BoxFuture<'a, std::result::Result<(), NotifyError>> {
        async move {
            self.notifications.write().await.push(ShownNotification {
                title: title.to_string(),
                options: options.clone(),
                tag: options.get("tag").and_then(Value::as_str).map(str::to_string),
                closed: false,
            });
            Ok(())
        }
        .boxed()
    }

    fn close_notification<'a>(
        &'a self,
        tag: Option<&'a str>,
    ) -> BoxFuture<'a, std::result::Result<(), NotifyError>> {
        async move {
            for shown in self.notifications.write().await.iter_mut() {
                if shown.tag.as_deref() == tag {
                    shown.closed = true;
                }
            }
            Ok(())
        }
        .boxed()
    }

    fn match_window_clients(&self) -> BoxFuture<'_, std::result::Result<Vec<WindowClient>, NotifyError>> {
        async move {
            Ok(self
                .clients()
                .await
                .into_iter()
                .map(|client| WindowClient {
                    id: client.id,
                    url: client.url,
                    focused: client.focused,
                })
                .collect())
        }
        .boxed()
    }

    fn focus_client<'a>(&'a self, id: &'a str) -> BoxFuture<'a, std::result::Result<(), NotifyError>> {
        async move {
            if self.focus_only(id).await {
                Ok(())
            } else {
                Err(NotifyError::Host(format!("no client `{id}`")))
            }
        }
        .boxed()
    }

    fn open_window<'a>(
        &'a self,
        url: &'a Url,
    ) -> BoxFuture<'a, std::result::Result<WindowClient, NotifyError>> {
        async move {
            let id = self.add_client(url.clone()).await;
            self.focus_only(&id).await;
            Ok(WindowClient {
                id,
                url: url.clone(),
                focused: true,
            })
        }
        .boxed()
    }
}
