//! Push payloads and callback bodies.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::NotifyError;

/// A decoded push message. Always a JSON object.
#[derive(Debug, Clone, PartialEq)]
pub struct PushPayload(Value);

impl PushPayload {
    /// Decode the raw push data.
    pub fn parse(bytes: &[u8]) -> Result<Self, NotifyError> {
        let value: Value = serde_json::from_slice(bytes)?;
        if !value.is_object() {
            return Err(NotifyError::InvalidPayload(
                "expected a JSON object".to_string(),
            ));
        }
        Ok(Self(value))
    }

    /// Notification title; empty when the payload has none.
    pub fn title(&self) -> &str {
        self.0.get("title").and_then(Value::as_str).unwrap_or_default()
    }

    pub fn tag(&self) -> Option<&str> {
        self.0.get("tag").and_then(Value::as_str)
    }

    pub fn data(&self) -> Option<&Value> {
        self.0.get("data")
    }

    /// The whole payload, passed as notification options.
    pub fn as_value(&self) -> &Value {
        &self.0
    }
}

/// A click or close on a displayed notification.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NotificationEvent {
    /// Action button id; empty or absent for a click on the body.
    #[serde(default)]
    pub action: Option<String>,
    #[serde(default)]
    pub tag: Option<String>,
    /// The `data` the notification was shown with.
    #[serde(default)]
    pub data: Option<Value>,
}

impl NotificationEvent {
    /// `data.url`, if the notification carries one.
    pub fn target_url(&self) -> Option<&str> {
        self.data
            .as_ref()
            .and_then(|data| data.get("url"))
            .and_then(Value::as_str)
            .filter(|url| !url.is_empty())
    }
}

/// Event type reported to the callback endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum CallbackKind {
    Received,
    Clicked,
    Closed,
}

/// JSON body posted to the callback endpoint.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CallbackEvent {
    #[serde(rename = "type")]
    pub kind: CallbackKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub action: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tag: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl CallbackEvent {
    /// Body for a received push, plus the bearer token taken out of `data`.
    pub fn received(payload: &PushPayload) -> (Self, Option<String>) {
        let (token, data) = strip_token(payload.data().cloned());
        let event = Self {
            kind: CallbackKind::Received,
            action: None,
            tag: payload.tag().map(str::to_string),
            data,
        };
        (event, token)
    }

    /// Body for a clicked or closed notification, plus the bearer token.
    pub fn from_notification(kind: CallbackKind, event: &NotificationEvent) -> (Self, Option<String>) {
        let (token, data) = strip_token(event.data.clone());
        let callback = Self {
            kind,
            action: event.action.clone(),
            tag: event.tag.clone(),
            data,
        };
        (callback, token)
    }
}

/// Remove `jwt` from notification data.
///
/// Returns the token and what is left of `data`; an object left empty is
/// dropped entirely. Non-object data passes through untouched.
pub fn strip_token(data: Option<Value>) -> (Option<String>, Option<Value>) {
    match data {
        Some(Value::Object(mut map)) => {
            let token = match map.remove("jwt") {
                Some(Value::String(token)) => Some(token),
                Some(Value::Null) | None => None,
                Some(other) => Some(other.to_string()),
            };
            let rest = if map.is_empty() {
                None
            } else {
                Some(Value::Object(map))
            };
            (token, rest)
        }
        Some(Value::Null) | None => (None, None),
        Some(other) => (None, Some(other)),
    }
}
