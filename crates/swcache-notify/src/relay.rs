//! Push / notification event handlers.

use std::sync::Arc;

use bytes::Bytes;
use http::header::{AUTHORIZATION, CONTENT_TYPE};
use http::HeaderValue;
use swcache_net::{Fetcher, Request};
use tracing::{debug, info, warn};
use url::Url;

use crate::host::NotificationHost;
use crate::payload::{CallbackEvent, CallbackKind, NotificationEvent, PushPayload};
use crate::NotifyError;

/// What a notification click led to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClickOutcome {
    /// An open window already showed the target URL.
    Focused(String),
    /// A new window was opened.
    Opened(Url),
    /// The notification carried no `data.url`.
    NoTarget,
}

/// Forwards notification events to the callback endpoint.
pub struct NotificationRelay {
    fetcher: Arc<dyn Fetcher>,
    host: Arc<dyn NotificationHost>,
    location: Url,
    callback_url: Url,
}

impl NotificationRelay {
    /// Create a relay for a worker served from `location`.
    pub fn new(
        fetcher: Arc<dyn Fetcher>,
        host: Arc<dyn NotificationHost>,
        location: Url,
        channel: &str,
    ) -> Result<Self, NotifyError> {
        let callback_url = location.join(&format!("/api/notify.{channel}/callback"))?;
        Ok(Self {
            fetcher,
            host,
            location,
            callback_url,
        })
    }

    pub fn callback_url(&self) -> &Url {
        &self.callback_url
    }

    /// Handle a push event. No data means nothing to do.
    pub async fn on_push(&self, data: Option<&[u8]>) -> Result<(), NotifyError> {
        let Some(data) = data else {
            debug!("Push event without data ignored");
            return Ok(());
        };

        let payload = PushPayload::parse(data)?;
        self.host
            .show_notification(payload.title(), payload.as_value())
            .await?;

        let (event, token) = CallbackEvent::received(&payload);
        self.fire_callback(&event, token.as_deref()).await
    }

    /// Handle a click: report it, close the notification, then bring the
    /// target page forward.
    pub async fn on_notification_click(
        &self,
        event: &NotificationEvent,
    ) -> Result<ClickOutcome, NotifyError> {
        self.report(CallbackKind::Clicked, event).await;
        self.host.close_notification(event.tag.as_deref()).await?;

        let Some(target) = event.target_url() else {
            return Ok(ClickOutcome::NoTarget);
        };
        let target = self.location.join(target)?;

        let clients = self.host.match_window_clients().await?;
        if let Some(client) = clients.iter().find(|c| c.url == target) {
            debug!(client = %client.id, url = %target, "Focusing existing client");
            self.host.focus_client(&client.id).await?;
            return Ok(ClickOutcome::Focused(client.id.clone()));
        }

        info!(url = %target, "Opening window for notification");
        self.host.open_window(&target).await?;
        Ok(ClickOutcome::Opened(target))
    }

    /// Handle a close (dismissal).
    pub async fn on_notification_close(&self, event: &NotificationEvent) {
        self.report(CallbackKind::Closed, event).await;
    }

    /// Click/close reports never fail the event.
    async fn report(&self, kind: CallbackKind, event: &NotificationEvent) {
        let (body, token) = CallbackEvent::from_notification(kind, event);
        if let Err(e) = self.fire_callback(&body, token.as_deref()).await {
            warn!(kind = ?kind, error = %e, "Notification callback failed");
        }
    }

    async fn fire_callback(
        &self,
        event: &CallbackEvent,
        token: Option<&str>,
    ) -> Result<(), NotifyError> {
        let Some(token) = token else {
            warn!(kind = ?event.kind, "No jwt in notification data, callback skipped");
            return Ok(());
        };

        let authorization = HeaderValue::from_str(&format!("Bearer {token}"))
            .map_err(|_| NotifyError::InvalidPayload("jwt is not a valid header value".to_string()))?;
        let body = serde_json::to_vec(event)?;

        let request = Request::post(self.callback_url.clone(), Bytes::from(body))
            .header(CONTENT_TYPE, HeaderValue::from_static("application/json"))
            .header(AUTHORIZATION, authorization);

        let response = self.fetcher.fetch(request).await?;
        if !response.ok() {
            return Err(NotifyError::CallbackRejected {
                status: response.status.as_u16(),
            });
        }

        debug!(kind = ?event.kind, "Notification callback delivered");
        Ok(())
    }
}
