//! Mailjet event webhook (email). One POST carries one event object or an array of them.

use super::inbound::{field_string, unix_seconds, IngressError, ParsedItem, WebhookRequest};
use super::registry::WebhookProvider;
use super::signature::basic_auth_matches;
use crate::event::{Channel, Direction, RawInboundEvent};

const EVENTS: &[&str] = &["sent", "delivered", "open", "click", "bounce", "spam", "blocked", "unsub"];

pub struct MailjetProvider {
    /// `"user:pass"` expected in HTTP Basic auth when set.
    basic_auth: Option<String>,
}

impl MailjetProvider {
    pub fn new(basic_auth: Option<String>) -> Self {
        Self {
            basic_auth: basic_auth.filter(|s| !s.trim().is_empty()),
        }
    }

    fn event_from(&self, item: serde_json::Value) -> RawInboundEvent {
        let status = field_string(&item, "event").unwrap_or_default();
        let body = match field_string(&item, "url") {
            Some(url) => Some(format!("Click: {}", url)),
            None => Some(status.clone()).filter(|s| !s.is_empty()),
        };
        RawInboundEvent {
            channel: Channel::Email,
            provider_name: self.id().to_string(),
            contact_identifier: field_string(&item, "email").unwrap_or_default(),
            provider_message_id: field_string(&item, "MessageID"),
            raw_status: status,
            direction: Direction::Out,
            body,
            event_timestamp: unix_seconds(&item, "time"),
            raw_payload: item,
        }
    }
}

impl WebhookProvider for MailjetProvider {
    fn id(&self) -> &str {
        "mailjet"
    }

    fn channel(&self) -> Channel {
        Channel::Email
    }

    fn verify(&self, req: &WebhookRequest) -> Result<(), IngressError> {
        match self.basic_auth {
            Some(ref expected) if !basic_auth_matches(req.header("authorization"), expected) => Err(
                IngressError::Unauthorized("mailjet basic auth mismatch".to_string()),
            ),
            _ => Ok(()),
        }
    }

    fn parse(&self, req: &WebhookRequest) -> Result<Vec<ParsedItem>, IngressError> {
        let body: serde_json::Value =
            serde_json::from_slice(&req.body).map_err(|e| IngressError::Malformed(e.to_string()))?;
        let items = match body {
            serde_json::Value::Array(items) => items,
            obj @ serde_json::Value::Object(_) => vec![obj],
            other => {
                return Err(IngressError::Malformed(format!(
                    "expected object or array, got {}",
                    other
                )))
            }
        };
        Ok(items
            .into_iter()
            .map(|item| match item {
                serde_json::Value::Object(_) => ParsedItem::checked(self.event_from(item)),
                other => ParsedItem::Incomplete {
                    channel: Channel::Email,
                    contact_identifier: String::new(),
                    provider_message_id: None,
                    raw_payload: other,
                },
            })
            .collect())
    }

    fn supported_events(&self) -> Vec<&'static str> {
        EVENTS.to_vec()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use base64::Engine;

    fn request(body: &str) -> WebhookRequest {
        WebhookRequest {
            path_and_query: "/webhooks/mailjet".into(),
            body: body.as_bytes().to_vec(),
            ..Default::default()
        }
    }

    #[test]
    fn parses_array_of_events() {
        let p = MailjetProvider::new(None);
        let items = p
            .parse(&request(
                r#"[{"event":"open","time":1700000000,"MessageID":19421777835146490,"email":"a@x.com"},
                    {"event":"click","time":1700000100,"MessageID":"1942","email":"a@x.com","url":"https://x.com/p"}]"#,
            ))
            .unwrap();
        assert_eq!(items.len(), 2);
        let ParsedItem::Event(ref open) = items[0] else {
            panic!("expected event")
        };
        assert_eq!(open.raw_status, "open");
        assert_eq!(open.direction, Direction::Out);
        assert_eq!(open.provider_message_id.as_deref(), Some("19421777835146490"));
        assert_eq!(open.event_timestamp.map(|t| t.timestamp()), Some(1_700_000_000));
        assert_eq!(open.body.as_deref(), Some("open"));
        let ParsedItem::Event(ref click) = items[1] else {
            panic!("expected event")
        };
        assert_eq!(click.body.as_deref(), Some("Click: https://x.com/p"));
    }

    #[test]
    fn single_object_and_incomplete_items() {
        let p = MailjetProvider::new(None);
        let items = p.parse(&request(r#"{"event":"sent","email":"a@x.com"}"#)).unwrap();
        assert!(matches!(items[0], ParsedItem::Event(_)));
        let items = p.parse(&request(r#"[{"event":"open"}, {"email":"a@x.com"}, 7]"#)).unwrap();
        assert!(items.iter().all(|i| matches!(i, ParsedItem::Incomplete { .. })));
        assert!(matches!(p.parse(&request("not json")), Err(IngressError::Malformed(_))));
        assert!(matches!(p.parse(&request("\"str\"")), Err(IngressError::Malformed(_))));
    }

    #[test]
    fn basic_auth_when_configured() {
        let p = MailjetProvider::new(Some("hook:pw".into()));
        let mut req = request("{}");
        assert!(matches!(p.verify(&req), Err(IngressError::Unauthorized(_))));
        let value = format!("Basic {}", base64::engine::general_purpose::STANDARD.encode("hook:pw"));
        req.headers.insert("authorization", value.parse().unwrap());
        assert!(p.verify(&req).is_ok());
        assert!(MailjetProvider::new(None).verify(&request("{}")).is_ok());
    }
}
