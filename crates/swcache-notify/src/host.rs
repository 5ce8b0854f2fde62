//! Host primitives the relay needs: notification display and window clients.

use futures::future::BoxFuture;
use serde_json::Value;
use url::Url;

use crate::NotifyError;

/// A window client (open application page).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WindowClient {
    pub id: String,
    pub url: Url,
    pub focused: bool,
}

/// Notification and client primitives provided by the worker host.
pub trait NotificationHost: Send + Sync {
    /// Display a system notification. `options` is the full push payload.
    fn show_notification<'a>(
        &'a self,
        title: &'a str,
        options: &'a Value,
    ) -> BoxFuture<'a, Result<(), NotifyError>>;

    /// Dismiss the notification with this tag.
    fn close_notification<'a>(&'a self, tag: Option<&'a str>)
        -> BoxFuture<'a, Result<(), NotifyError>>;

    /// All window clients, controlled or not.
    fn match_window_clients(&self) -> BoxFuture<'_, Result<Vec<WindowClient>, NotifyError>>;

    /// Focus an existing window client.
    fn focus_client<'a>(&'a self, id: &'a str) -> BoxFuture<'a, Result<(), NotifyError>>;

    /// Open a new window at `url`.
    fn open_window<'a>(&'a self, url: &'a Url) -> BoxFuture<'a, Result<WindowClient, NotifyError>>;
}
