//! # swcache notify
//!
//! Relays push and notification events to the application's callback
//! endpoint (`POST /api/notify.<channel>/callback`).
//!
//! ## Architecture
//!
//! ```text
//! push ──────────────► NotificationHost::show_notification
//!                  └─► callback {type: "received"}
//! notificationclick ─► callback {type: "clicked"}
//!                  ├─► NotificationHost::close_notification
//!                  └─► focus matching window client, or open one
//! notificationclose ─► callback {type: "closed"}
//! ```

use swcache_net::NetError;
use thiserror::Error;

pub mod host;
pub mod payload;
pub mod relay;

pub use host::{NotificationHost, WindowClient};
pub use payload::{strip_token, CallbackEvent, CallbackKind, NotificationEvent, PushPayload};
pub use relay::{ClickOutcome, NotificationRelay};

/// Errors raised while relaying notification events.
#[derive(Error, Debug)]
pub enum NotifyError {
    #[error("Invalid push payload: {0}")]
    InvalidPayload(String),

    #[error("Payload JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),

    #[error("Callback request failed: {0}")]
    Network(#[from] NetError),

    #[error("Callback endpoint answered {status}")]
    CallbackRejected { status: u16 },

    #[error("Notification host error: {0}")]
    Host(String),
}
