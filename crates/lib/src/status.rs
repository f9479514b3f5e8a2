//! Provider status vocabularies normalized to one canonical vocabulary.
//!
//! The canonical names are a wire contract consumed by reporting; the provider tables
//! below are versioned data. Unknown providers and unknown statuses pass through
//! lowercased with a warning rather than failing.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Bumped whenever a provider table below changes.
pub const STATUS_TABLE_VERSION: u32 = 1;

/// Closed set of canonical delivery/engagement statuses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CanonicalStatus {
    Queued,
    Sent,
    Delivered,
    Opened,
    Clicked,
    Replied,
    Failed,
    Bounced,
    Undelivered,
    Blocked,
    Spam,
    Unsubscribed,
    Received,
    Read,
}

impl CanonicalStatus {
    pub const ALL: [CanonicalStatus; 14] = [
        CanonicalStatus::Queued,
        CanonicalStatus::Sent,
        CanonicalStatus::Delivered,
        CanonicalStatus::Opened,
        CanonicalStatus::Clicked,
        CanonicalStatus::Replied,
        CanonicalStatus::Failed,
        CanonicalStatus::Bounced,
        CanonicalStatus::Undelivered,
        CanonicalStatus::Blocked,
        CanonicalStatus::Spam,
        CanonicalStatus::Unsubscribed,
        CanonicalStatus::Received,
        CanonicalStatus::Read,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            CanonicalStatus::Queued => "queued",
            CanonicalStatus::Sent => "sent",
            CanonicalStatus::Delivered => "delivered",
            CanonicalStatus::Opened => "opened",
            CanonicalStatus::Clicked => "clicked",
            CanonicalStatus::Replied => "replied",
            CanonicalStatus::Failed => "failed",
            CanonicalStatus::Bounced => "bounced",
            CanonicalStatus::Undelivered => "undelivered",
            CanonicalStatus::Blocked => "blocked",
            CanonicalStatus::Spam => "spam",
            CanonicalStatus::Unsubscribed => "unsubscribed",
            CanonicalStatus::Received => "received",
            CanonicalStatus::Read => "read",
        }
    }

    /// Exact canonical name lookup (already lowercased input).
    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.iter().copied().find(|s| s.as_str() == name)
    }
}

impl fmt::Display for CanonicalStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Status stored on a ledger event: canonical, or the lowercased raw value when no mapping exists.
/// Serialized as a plain string either way.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum EventStatus {
    Canonical(CanonicalStatus),
    Unmapped(String),
}

impl EventStatus {
    pub fn as_str(&self) -> &str {
        match self {
            EventStatus::Canonical(s) => s.as_str(),
            EventStatus::Unmapped(s) => s.as_str(),
        }
    }

    pub fn canonical(&self) -> Option<CanonicalStatus> {
        match self {
            EventStatus::Canonical(s) => Some(*s),
            EventStatus::Unmapped(_) => None,
        }
    }
}

impl From<String> for EventStatus {
    fn from(s: String) -> Self {
        let lower = s.trim().to_lowercase();
        match CanonicalStatus::from_name(&lower) {
            Some(c) => EventStatus::Canonical(c),
            None => EventStatus::Unmapped(lower),
        }
    }
}

impl From<EventStatus> for String {
    fn from(s: EventStatus) -> Self {
        s.as_str().to_string()
    }
}

impl From<CanonicalStatus> for EventStatus {
    fn from(s: CanonicalStatus) -> Self {
        EventStatus::Canonical(s)
    }
}

impl fmt::Display for EventStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

const MAILJET_TABLE: &[(&str, CanonicalStatus)] = &[
    ("sent", CanonicalStatus::Sent),
    ("delivered", CanonicalStatus::Delivered),
    ("open", CanonicalStatus::Opened),
    ("click", CanonicalStatus::Clicked),
    ("bounce", CanonicalStatus::Bounced),
    ("spam", CanonicalStatus::Spam),
    ("blocked", CanonicalStatus::Blocked),
    ("unsub", CanonicalStatus::Unsubscribed),
];

const TWILIO_TABLE: &[(&str, CanonicalStatus)] = &[
    ("queued", CanonicalStatus::Queued),
    ("sent", CanonicalStatus::Sent),
    ("delivered", CanonicalStatus::Delivered),
    ("undelivered", CanonicalStatus::Undelivered),
    ("failed", CanonicalStatus::Failed),
    ("received", CanonicalStatus::Received),
];

const GREENAPI_TABLE: &[(&str, CanonicalStatus)] = &[
    ("sent", CanonicalStatus::Sent),
    ("delivered", CanonicalStatus::Delivered),
    ("read", CanonicalStatus::Read),
    ("failed", CanonicalStatus::Failed),
    ("received", CanonicalStatus::Received),
];

fn provider_table(provider: &str) -> Option<&'static [(&'static str, CanonicalStatus)]> {
    match provider.trim().to_lowercase().as_str() {
        "mailjet" => Some(MAILJET_TABLE),
        "twilio" => Some(TWILIO_TABLE),
        "greenapi" => Some(GREENAPI_TABLE),
        _ => None,
    }
}

/// Provider names that have a mapping table.
pub fn known_providers() -> &'static [&'static str] {
    &["mailjet", "twilio", "greenapi"]
}

/// Raw statuses a provider's table understands (used by the webhook status endpoints).
pub fn provider_vocabulary(provider: &str) -> Vec<&'static str> {
    provider_table(provider)
        .map(|t| t.iter().map(|(raw, _)| *raw).collect())
        .unwrap_or_default()
}

/// Map a provider status to the canonical vocabulary. Never fails: unmapped values are
/// returned lowercased and a warning is logged. An empty status is treated as `sent`.
///
/// A passthrough that happens to spell a canonical name becomes that canonical status, so the
/// result is the same value a stored event reads back as.
pub fn normalize(provider_status: &str, provider_name: &str) -> EventStatus {
    let status = provider_status.trim().to_lowercase();
    if status.is_empty() {
        log::warn!("status normalizer: empty status from {}, using \"sent\"", provider_name);
        return EventStatus::Canonical(CanonicalStatus::Sent);
    }
    let Some(table) = provider_table(provider_name) else {
        log::warn!(
            "status normalizer: unknown provider {:?}, passing \"{}\" through",
            provider_name,
            status
        );
        return EventStatus::from(status);
    };
    match table.iter().find(|(raw, _)| *raw == status) {
        Some((_, canonical)) => EventStatus::Canonical(*canonical),
        None => {
            log::warn!(
                "status normalizer: unknown status \"{}\" for {}, passing through",
                status,
                provider_name
            );
            EventStatus::from(status)
        }
    }
}

/// failed, bounced, undelivered, blocked.
pub fn is_failure_status(status: &EventStatus) -> bool {
    matches!(
        status.canonical(),
        Some(
            CanonicalStatus::Failed
                | CanonicalStatus::Bounced
                | CanonicalStatus::Undelivered
                | CanonicalStatus::Blocked
        )
    )
}

/// delivered, opened, clicked, read.
pub fn is_success_status(status: &EventStatus) -> bool {
    matches!(
        status.canonical(),
        Some(
            CanonicalStatus::Delivered
                | CanonicalStatus::Opened
                | CanonicalStatus::Clicked
                | CanonicalStatus::Read
        )
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mailjet_open_is_opened() {
        assert_eq!(
            normalize("open", "mailjet"),
            EventStatus::Canonical(CanonicalStatus::Opened)
        );
        assert_eq!(normalize(" Unsub ", "mailjet").as_str(), "unsubscribed");
    }

    #[test]
    fn twilio_undelivered_is_unchanged() {
        assert_eq!(normalize("undelivered", "twilio").as_str(), "undelivered");
        assert!(normalize("undelivered", "twilio").canonical().is_some());
    }

    #[test]
    fn unknown_provider_passes_through_lowercased() {
        assert_eq!(normalize("X", "foo"), EventStatus::Unmapped("x".to_string()));
    }

    #[test]
    fn unknown_status_for_known_provider_passes_through() {
        assert_eq!(
            normalize("Accepted", "twilio"),
            EventStatus::Unmapped("accepted".to_string())
        );
    }

    #[test]
    fn passthrough_of_canonical_name_survives_serde() {
        for (raw, provider) in [("read", "twilio"), ("delivered", "foo"), ("Opened", "greenapi")] {
            let status = normalize(raw, provider);
            assert!(status.canonical().is_some(), "{} {}", raw, provider);
            let json = serde_json::to_string(&status).unwrap();
            let back: EventStatus = serde_json::from_str(&json).unwrap();
            assert_eq!(back, status);
        }
        assert!(is_success_status(&normalize("read", "twilio")));
    }

    #[test]
    fn empty_status_defaults_to_sent() {
        assert_eq!(normalize("  ", "greenapi").as_str(), "sent");
    }

    #[test]
    fn normalize_is_deterministic() {
        for provider in ["mailjet", "twilio", "greenapi", "foo"] {
            for raw in ["open", "READ", "bounce", "x", "received"] {
                assert_eq!(normalize(raw, provider), normalize(raw, provider));
            }
        }
    }

    #[test]
    fn failure_and_success_sets_are_disjoint() {
        for s in CanonicalStatus::ALL {
            let st = EventStatus::Canonical(s);
            assert!(!(is_failure_status(&st) && is_success_status(&st)), "{}", s);
        }
        let neither = [
            CanonicalStatus::Queued,
            CanonicalStatus::Sent,
            CanonicalStatus::Received,
            CanonicalStatus::Replied,
            CanonicalStatus::Spam,
            CanonicalStatus::Unsubscribed,
        ];
        for s in neither {
            let st = EventStatus::Canonical(s);
            assert!(!is_failure_status(&st) && !is_success_status(&st), "{}", s);
        }
        assert!(!is_failure_status(&EventStatus::Unmapped("failed-ish".into())));
    }

    #[test]
    fn event_status_string_round_trip() {
        let s: EventStatus = serde_json::from_str("\"Delivered\"").unwrap();
        assert_eq!(s, EventStatus::Canonical(CanonicalStatus::Delivered));
        let u: EventStatus = serde_json::from_str("\"received_unknown\"").unwrap();
        assert_eq!(serde_json::to_string(&u).unwrap(), "\"received_unknown\"");
    }
}
