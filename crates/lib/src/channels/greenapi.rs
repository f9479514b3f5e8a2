//! Green-API WhatsApp webhook (chat). JSON body discriminated by `typeWebhook`.

use super::inbound::{field_string, unix_seconds, IngressError, ParsedItem, WebhookRequest};
use super::registry::WebhookProvider;
use super::signature::bearer_matches;
use crate::contact::chat_address_to_phone;
use crate::event::{Channel, Direction, RawInboundEvent};
use serde_json::Value;

const INCOMING: &str = "incomingMessageReceived";
const OUTGOING_STATUS: &str = "outgoingMessageStatus";

pub struct GreenApiProvider {
    webhook_token: Option<String>,
}

impl GreenApiProvider {
    pub fn new(webhook_token: Option<String>) -> Self {
        Self {
            webhook_token: webhook_token.filter(|s| !s.trim().is_empty()),
        }
    }

    fn event(
        &self,
        payload: &Value,
        direction: Direction,
        contact: Option<String>,
        status: String,
        body: Option<String>,
    ) -> RawInboundEvent {
        RawInboundEvent {
            channel: Channel::Chat,
            provider_name: self.id().to_string(),
            contact_identifier: contact.map(|c| chat_address_to_phone(&c)).unwrap_or_default(),
            provider_message_id: field_string(payload, "idMessage"),
            raw_status: status,
            direction,
            body,
            event_timestamp: unix_seconds(payload, "timestamp"),
            raw_payload: payload.clone(),
        }
    }
}

/// Text for an incoming message: the text itself, or a placeholder for media.
fn message_text(message_data: Option<&Value>) -> Option<String> {
    let data = message_data?;
    let kind = field_string(data, "typeMessage")?;
    let text = match kind.as_str() {
        "textMessage" => data
            .get("textMessageData")
            .and_then(|t| field_string(t, "textMessage"))
            .unwrap_or_default(),
        "extendedTextMessage" => data
            .get("extendedTextMessageData")
            .and_then(|t| field_string(t, "text"))
            .unwrap_or_default(),
        "imageMessage" => "[Image]".to_string(),
        "videoMessage" => "[Video]".to_string(),
        "documentMessage" => "[Document]".to_string(),
        other => format!("[{}]", other),
    };
    Some(text)
}

impl WebhookProvider for GreenApiProvider {
    fn id(&self) -> &str {
        "greenapi"
    }

    fn channel(&self) -> Channel {
        Channel::Chat
    }

    fn verify(&self, req: &WebhookRequest) -> Result<(), IngressError> {
        match self.webhook_token {
            Some(ref token) if !bearer_matches(req.header("authorization"), token) => Err(
                IngressError::Unauthorized("greenapi webhook token mismatch".to_string()),
            ),
            _ => Ok(()),
        }
    }

    fn parse(&self, req: &WebhookRequest) -> Result<Vec<ParsedItem>, IngressError> {
        let payload: Value =
            serde_json::from_slice(&req.body).map_err(|e| IngressError::Malformed(e.to_string()))?;
        if !payload.is_object() {
            return Err(IngressError::Malformed("expected a JSON object".to_string()));
        }
        let kind = field_string(&payload, "typeWebhook").unwrap_or_default();
        let item = match kind.as_str() {
            INCOMING => {
                let sender = payload.get("senderData");
                let contact = sender
                    .and_then(|s| field_string(s, "chatId").or_else(|| field_string(s, "sender")));
                let body = message_text(payload.get("messageData"));
                self.event(&payload, Direction::In, contact, "received".to_string(), body)
            }
            OUTGOING_STATUS => {
                let status_data = payload.get("statusData");
                let contact = field_string(&payload, "chatId")
                    .or_else(|| status_data.and_then(|s| field_string(s, "chatId")));
                let status = field_string(&payload, "status")
                    .or_else(|| status_data.and_then(|s| field_string(s, "status")))
                    .unwrap_or_default();
                self.event(&payload, Direction::Out, contact, status, None)
            }
            other => {
                log::debug!("greenapi: ignoring webhook type {:?}", other);
                return Ok(Vec::new());
            }
        };
        Ok(vec![ParsedItem::checked(item)])
    }

    fn supported_events(&self) -> Vec<&'static str> {
        vec![INCOMING, OUTGOING_STATUS]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(body: &str) -> WebhookRequest {
        WebhookRequest {
            path_and_query: "/webhooks/greenapi".into(),
            body: body.as_bytes().to_vec(),
            ..Default::default()
        }
    }

    fn only_event(items: Vec<ParsedItem>) -> RawInboundEvent {
        match items.into_iter().next() {
            Some(ParsedItem::Event(ev)) => ev,
            other => panic!("expected event, got {:?}", other),
        }
    }

    #[test]
    fn incoming_text_message() {
        let p = GreenApiProvider::new(None);
        let ev = only_event(
            p.parse(&request(
                r#"{"typeWebhook":"incomingMessageReceived","idMessage":"BAE5","timestamp":1700000000,
                    "senderData":{"chatId":"33612345678@c.us","sender":"33612345678@c.us"},
                    "messageData":{"typeMessage":"textMessage","textMessageData":{"textMessage":"Bonjour"}}}"#,
            ))
            .unwrap(),
        );
        assert_eq!(ev.direction, Direction::In);
        assert_eq!(ev.channel, Channel::Chat);
        assert_eq!(ev.contact_identifier, "+33612345678");
        assert_eq!(ev.body.as_deref(), Some("Bonjour"));
        assert_eq!(ev.raw_status, "received");
        assert_eq!(ev.provider_message_id.as_deref(), Some("BAE5"));
    }

    #[test]
    fn media_placeholders() {
        let data = serde_json::json!({"typeMessage": "imageMessage"});
        assert_eq!(message_text(Some(&data)).as_deref(), Some("[Image]"));
        let data = serde_json::json!({"typeMessage": "stickerMessage"});
        assert_eq!(message_text(Some(&data)).as_deref(), Some("[stickerMessage]"));
        assert_eq!(message_text(None), None);
    }

    #[test]
    fn outgoing_status_reads_status_data() {
        let p = GreenApiProvider::new(None);
        let ev = only_event(
            p.parse(&request(
                r#"{"typeWebhook":"outgoingMessageStatus","idMessage":"BAE6","statusData":{"chatId":"33612345678@c.us","status":"read"}}"#,
            ))
            .unwrap(),
        );
        assert_eq!(ev.direction, Direction::Out);
        assert_eq!(ev.raw_status, "read");
        assert_eq!(ev.contact_identifier, "+33612345678");
    }

    #[test]
    fn other_types_are_ignored_and_missing_status_is_incomplete() {
        let p = GreenApiProvider::new(None);
        assert!(p.parse(&request(r#"{"typeWebhook":"stateInstanceChanged"}"#)).unwrap().is_empty());
        let items = p
            .parse(&request(r#"{"typeWebhook":"outgoingMessageStatus","idMessage":"X","chatId":"1@c.us"}"#))
            .unwrap();
        assert!(matches!(items[0], ParsedItem::Incomplete { .. }));
        assert!(matches!(p.parse(&request("[]")), Err(IngressError::Malformed(_))));
    }

    #[test]
    fn bearer_token_when_configured() {
        let p = GreenApiProvider::new(Some("tok".into()));
        let mut req = request("{}");
        assert!(p.verify(&req).is_err());
        req.headers.insert("authorization", "Bearer tok".parse().unwrap());
        assert!(p.verify(&req).is_ok());
    }
}
