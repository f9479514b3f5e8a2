//! Ledger and quarantine record types.
//!
//! A `MessageEvent` always belongs to exactly one tenant and one lead (carried together
//! as a `LeadRef`); an `OrphanEvent` never belongs to a tenant. Both are immutable once built.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::status::EventStatus;

/// Maximum number of characters kept in `MessageEvent::snippet`.
pub const SNIPPET_MAX_CHARS: usize = 200;

/// Communication medium.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Channel {
    Email,
    Sms,
    Chat,
}

impl Channel {
    pub const ALL: [Channel; 3] = [Channel::Email, Channel::Sms, Channel::Chat];

    pub fn as_str(&self) -> &'static str {
        match self {
            Channel::Email => "email",
            Channel::Sms => "sms",
            Channel::Chat => "chat",
        }
    }

    /// Parse a channel name (case-insensitive). "whatsapp" is accepted as chat.
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "email" => Some(Channel::Email),
            "sms" => Some(Channel::Sms),
            "chat" | "whatsapp" => Some(Channel::Chat),
            _ => None,
        }
    }
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Whether the message travelled towards the lead (out) or from the lead (in).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    In,
    Out,
}

impl Direction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Direction::In => "in",
            Direction::Out => "out",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "in" | "inbound" => Some(Direction::In),
            "out" | "outbound" => Some(Direction::Out),
            _ => None,
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A lead together with the tenant that owns it.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LeadRef {
    pub tenant_id: String,
    pub lead_id: String,
}

impl LeadRef {
    pub fn new(tenant_id: impl Into<String>, lead_id: impl Into<String>) -> Self {
        Self {
            tenant_id: tenant_id.into(),
            lead_id: lead_id.into(),
        }
    }
}

/// Outcome of identity resolution. `Ambiguous` and `NotFound` are results, not errors.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "camelCase")]
pub enum ResolutionResult {
    #[serde(rename_all = "camelCase")]
    Resolved { tenant_id: String, lead_id: String },
    Ambiguous { candidates: Vec<LeadRef> },
    NotFound,
}

impl ResolutionResult {
    pub fn resolved(owner: LeadRef) -> Self {
        ResolutionResult::Resolved {
            tenant_id: owner.tenant_id,
            lead_id: owner.lead_id,
        }
    }

    /// The owning tenant/lead pair when resolved.
    pub fn owner(&self) -> Option<LeadRef> {
        match self {
            ResolutionResult::Resolved { tenant_id, lead_id } => {
                Some(LeadRef::new(tenant_id.clone(), lead_id.clone()))
            }
            _ => None,
        }
    }
}

/// Provider payload reduced to the fields the pipeline needs. Produced by one parser per provider.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawInboundEvent {
    pub channel: Channel,
    pub provider_name: String,
    /// Email address or phone number; may be empty when the provider omitted it.
    pub contact_identifier: String,
    pub provider_message_id: Option<String>,
    pub raw_status: String,
    pub direction: Direction,
    pub body: Option<String>,
    pub event_timestamp: Option<DateTime<Utc>>,
    pub raw_payload: serde_json::Value,
}

impl RawInboundEvent {
    /// True when neither a contact nor a provider message id is available, so resolution cannot start.
    pub fn lacks_identity(&self) -> bool {
        self.contact_identifier.trim().is_empty()
            && self
                .provider_message_id
                .as_deref()
                .map(str::trim)
                .unwrap_or("")
                .is_empty()
    }
}

/// Fields of a ledger event before an id and creation time are assigned.
#[derive(Debug, Clone)]
pub struct EventDraft {
    pub channel: Channel,
    pub provider_name: String,
    pub direction: Direction,
    pub provider_message_id: Option<String>,
    pub status: EventStatus,
    pub contact_identifier: String,
    pub snippet: Option<String>,
    pub raw_payload: serde_json::Value,
    pub event_timestamp: Option<DateTime<Utc>>,
}

/// One immutable ledger record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageEvent {
    pub id: String,
    #[serde(flatten)]
    pub owner: LeadRef,
    pub channel: Channel,
    pub provider_name: String,
    pub direction: Direction,
    pub provider_message_id: Option<String>,
    #[serde(rename = "canonicalStatus")]
    pub status: EventStatus,
    pub contact_identifier: String,
    pub snippet: Option<String>,
    pub raw_payload: serde_json::Value,
    pub event_timestamp: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}

impl MessageEvent {
    /// Build an event owned by `owner`. The event timestamp defaults to the creation time.
    pub fn new(owner: LeadRef, draft: EventDraft) -> Self {
        let created_at = Utc::now();
        Self {
            id: format!("evt_{}", uuid::Uuid::new_v4()),
            owner,
            channel: draft.channel,
            provider_name: draft.provider_name,
            direction: draft.direction,
            provider_message_id: draft
                .provider_message_id
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty()),
            status: draft.status,
            contact_identifier: draft.contact_identifier,
            snippet: draft.snippet.map(|s| truncate_chars(&s, SNIPPET_MAX_CHARS)),
            raw_payload: draft.raw_payload,
            event_timestamp: draft.event_timestamp.unwrap_or(created_at),
            created_at,
        }
    }

    pub fn tenant_id(&self) -> &str {
        &self.owner.tenant_id
    }

    pub fn lead_id(&self) -> &str {
        &self.owner.lead_id
    }
}

/// Why an event could not be attributed to a tenant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrphanReason {
    NoMatch,
    Ambiguous,
    NoTenantId,
    IncompletePayload,
    /// The work queue was full when the webhook arrived.
    QueueFull,
    /// The event resolved but the ledger write failed or timed out.
    LedgerUnavailable,
}

impl OrphanReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            OrphanReason::NoMatch => "no_match",
            OrphanReason::Ambiguous => "ambiguous",
            OrphanReason::NoTenantId => "no_tenant_id",
            OrphanReason::IncompletePayload => "incomplete_payload",
            OrphanReason::QueueFull => "queue_full",
            OrphanReason::LedgerUnavailable => "ledger_unavailable",
        }
    }
}

impl fmt::Display for OrphanReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An event that could not be safely attributed. Has no tenant association.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrphanEvent {
    pub id: String,
    pub channel: Channel,
    pub provider_name: String,
    pub reason: OrphanReason,
    pub contact_identifier: String,
    pub provider_message_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub candidates: Option<Vec<LeadRef>>,
    pub raw_payload: serde_json::Value,
    pub created_at: DateTime<Utc>,
}

impl OrphanEvent {
    /// Candidates are kept only for `Ambiguous`; for every other reason they are dropped.
    pub fn new(
        channel: Channel,
        provider_name: impl Into<String>,
        reason: OrphanReason,
        contact_identifier: impl Into<String>,
        provider_message_id: Option<String>,
        candidates: Option<Vec<LeadRef>>,
        raw_payload: serde_json::Value,
    ) -> Self {
        let candidates = match reason {
            OrphanReason::Ambiguous => Some(candidates.unwrap_or_default()),
            _ => None,
        };
        Self {
            id: format!("orphan_{}", uuid::Uuid::new_v4()),
            channel,
            provider_name: provider_name.into(),
            reason,
            contact_identifier: contact_identifier.into(),
            provider_message_id,
            candidates,
            raw_payload,
            created_at: Utc::now(),
        }
    }
}

/// Truncate to at most `max` characters without splitting a UTF-8 sequence.
pub fn truncate_chars(s: &str, max: usize) -> String {
    match s.char_indices().nth(max) {
        Some((idx, _)) => s[..idx].to_string(),
        None => s.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::status::CanonicalStatus;

    fn draft() -> EventDraft {
        EventDraft {
            channel: Channel::Sms,
            provider_name: "twilio".to_string(),
            direction: Direction::Out,
            provider_message_id: Some(" SM1 ".to_string()),
            status: EventStatus::Canonical(CanonicalStatus::Sent),
            contact_identifier: "+15551230000".to_string(),
            snippet: Some("é".repeat(300)),
            raw_payload: serde_json::json!({}),
            event_timestamp: None,
        }
    }

    #[test]
    fn message_event_serializes_tenant_and_lead_side_by_side() {
        let ev = MessageEvent::new(LeadRef::new("acme", "L1"), draft());
        let json = serde_json::to_value(&ev).unwrap();
        assert_eq!(json["tenantId"], "acme");
        assert_eq!(json["leadId"], "L1");
        assert_eq!(json["canonicalStatus"], "sent");
        assert_eq!(json["channel"], "sms");
        assert_eq!(json["direction"], "out");
        assert!(ev.id.starts_with("evt_"));
        let back: MessageEvent = serde_json::from_value(json).unwrap();
        assert_eq!(back, ev);
    }

    #[test]
    fn snippet_is_bounded_and_message_id_trimmed() {
        let ev = MessageEvent::new(LeadRef::new("acme", "L1"), draft());
        assert_eq!(ev.snippet.as_ref().map(|s| s.chars().count()), Some(200));
        assert_eq!(ev.provider_message_id.as_deref(), Some("SM1"));
        assert_eq!(ev.event_timestamp, ev.created_at);
    }

    #[test]
    fn orphan_keeps_candidates_only_when_ambiguous() {
        let cands = vec![LeadRef::new("acme", "L1"), LeadRef::new("beta", "L2")];
        let amb = OrphanEvent::new(
            Channel::Email,
            "mailjet",
            OrphanReason::Ambiguous,
            "a@x.com",
            None,
            Some(cands.clone()),
            serde_json::Value::Null,
        );
        assert_eq!(amb.candidates, Some(cands.clone()));
        let none = OrphanEvent::new(
            Channel::Email,
            "mailjet",
            OrphanReason::NoMatch,
            "a@x.com",
            None,
            Some(cands),
            serde_json::Value::Null,
        );
        assert_eq!(none.candidates, None);
        let json = serde_json::to_value(&none).unwrap();
        assert_eq!(json["reason"], "no_match");
        assert!(json.get("candidates").is_none());
    }

    #[test]
    fn resolution_result_wire_shape() {
        let r = ResolutionResult::resolved(LeadRef::new("acme", "L1"));
        let json = serde_json::to_value(&r).unwrap();
        assert_eq!(json["outcome"], "resolved");
        assert_eq!(json["tenantId"], "acme");
        assert_eq!(r.owner(), Some(LeadRef::new("acme", "L1")));
        assert_eq!(ResolutionResult::NotFound.owner(), None);
    }

    #[test]
    fn lacks_identity_requires_both_missing() {
        let mut raw = RawInboundEvent {
            channel: Channel::Sms,
            provider_name: "twilio".into(),
            contact_identifier: " ".into(),
            provider_message_id: None,
            raw_status: "sent".into(),
            direction: Direction::Out,
            body: None,
            event_timestamp: None,
            raw_payload: serde_json::Value::Null,
        };
        assert!(raw.lacks_identity());
        raw.provider_message_id = Some("SM1".into());
        assert!(!raw.lacks_identity());
    }
}
