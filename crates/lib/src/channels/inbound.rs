//! Request and result types shared by the webhook providers.

use crate::event::{Channel, RawInboundEvent};
use axum::http::HeaderMap;

/// What the gateway hands to a provider: enough of the HTTP request to authenticate and parse it.
#[derive(Debug, Clone, Default)]
pub struct WebhookRequest {
    /// Path plus query string as received, e.g. `/webhooks/twilio?x=1`.
    pub path_and_query: String,
    pub headers: HeaderMap,
    pub body: Vec<u8>,
}

impl WebhookRequest {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }

    /// Body as lossy UTF-8, for quarantining unparseable payloads.
    pub fn body_text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }
}

/// One item out of a webhook body.
#[derive(Debug, Clone, PartialEq)]
pub enum ParsedItem {
    Event(RawInboundEvent),
    /// Missing both contact and message id, or missing a status. Quarantined as `incomplete_payload`.
    Incomplete {
        channel: Channel,
        contact_identifier: String,
        provider_message_id: Option<String>,
        raw_payload: serde_json::Value,
    },
}

impl ParsedItem {
    /// Route an event to `Incomplete` when it cannot be resolved or has no status.
    pub fn checked(ev: RawInboundEvent) -> Self {
        if ev.lacks_identity() || ev.raw_status.trim().is_empty() {
            ParsedItem::Incomplete {
                channel: ev.channel,
                contact_identifier: ev.contact_identifier,
                provider_message_id: ev.provider_message_id,
                raw_payload: ev.raw_payload,
            }
        } else {
            ParsedItem::Event(ev)
        }
    }
}

/// Response body the provider expects on success.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WebhookAck {
    pub content_type: &'static str,
    pub body: String,
}

impl WebhookAck {
    pub fn json_ok() -> Self {
        Self {
            content_type: "application/json",
            body: r#"{"ok":true}"#.to_string(),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum IngressError {
    #[error("unauthorized: {0}")]
    Unauthorized(String),
    #[error("malformed body: {0}")]
    Malformed(String),
}

/// String or number field as a trimmed string; None when missing or blank.
pub(crate) fn field_string(v: &serde_json::Value, key: &str) -> Option<String> {
    match v.get(key)? {
        serde_json::Value::String(s) => Some(s.trim().to_string()).filter(|s| !s.is_empty()),
        serde_json::Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// Unix seconds (number or numeric string) as a UTC timestamp.
pub(crate) fn unix_seconds(v: &serde_json::Value, key: &str) -> Option<chrono::DateTime<chrono::Utc>> {
    let secs = match v.get(key)? {
        serde_json::Value::Number(n) => n.as_i64()?,
        serde_json::Value::String(s) => s.trim().parse().ok()?,
        _ => return None,
    };
    chrono::DateTime::from_timestamp(secs, 0)
}
