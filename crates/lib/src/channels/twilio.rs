//! Twilio messaging webhook (SMS, or WhatsApp via `whatsapp:` addresses). Form-encoded.
//!
//! Status callbacks (`MessageStatus` other than `received`) describe an outbound message;
//! everything else is an inbound message from the lead.

use super::inbound::{IngressError, ParsedItem, WebhookAck, WebhookRequest};
use super::registry::WebhookProvider;
use super::signature::verify_twilio_signature;
use crate::contact::chat_address_to_phone;
use crate::event::{Channel, Direction, RawInboundEvent};

pub const SIGNATURE_HEADER: &str = "x-twilio-signature";

const EMPTY_TWIML: &str = r#"<?xml version="1.0" encoding="UTF-8"?><Response></Response>"#;
const EVENTS: &[&str] = &["received", "queued", "sent", "delivered", "undelivered", "failed"];

pub struct TwilioProvider {
    auth_token: Option<String>,
    /// Externally visible base URL (scheme + host) used to rebuild the signed URL.
    public_url: Option<String>,
}

impl TwilioProvider {
    pub fn new(auth_token: Option<String>, public_url: Option<String>) -> Self {
        Self {
            auth_token: auth_token.filter(|s| !s.trim().is_empty()),
            public_url: public_url
                .map(|u| u.trim().trim_end_matches('/').to_string())
                .filter(|u| !u.is_empty()),
        }
    }

    /// The URL Twilio signed: configured public base, else `https://<Host>`, plus path and query.
    pub fn signed_url(&self, req: &WebhookRequest) -> String {
        let base = match self.public_url {
            Some(ref u) => u.clone(),
            None => format!("https://{}", req.header("host").unwrap_or_default()),
        };
        format!("{}{}", base, req.path_and_query)
    }

    fn form(req: &WebhookRequest) -> Result<Vec<(String, String)>, IngressError> {
        serde_urlencoded::from_bytes(&req.body).map_err(|e| IngressError::Malformed(e.to_string()))
    }
}

fn get<'a>(params: &'a [(String, String)], key: &str) -> Option<&'a str> {
    params
        .iter()
        .find(|(k, _)| k == key)
        .map(|(_, v)| v.trim())
        .filter(|v| !v.is_empty())
}

fn is_whatsapp(addr: Option<&str>) -> bool {
    addr.map_or(false, |a| a.to_lowercase().starts_with("whatsapp:"))
}

impl WebhookProvider for TwilioProvider {
    fn id(&self) -> &str {
        "twilio"
    }

    fn channel(&self) -> Channel {
        Channel::Sms
    }

    fn verify(&self, req: &WebhookRequest) -> Result<(), IngressError> {
        let Some(ref token) = self.auth_token else {
            return Ok(());
        };
        let Some(provided) = req.header(SIGNATURE_HEADER) else {
            return Err(IngressError::Unauthorized("missing X-Twilio-Signature".to_string()));
        };
        // An unreadable body cannot be signed; let parse report it instead.
        let params = Self::form(req).unwrap_or_default();
        if verify_twilio_signature(token, &self.signed_url(req), &params, provided) {
            Ok(())
        } else {
            Err(IngressError::Unauthorized("twilio signature mismatch".to_string()))
        }
    }

    fn parse(&self, req: &WebhookRequest) -> Result<Vec<ParsedItem>, IngressError> {
        let params = Self::form(req)?;
        let raw_payload = serde_json::Value::Object(
            params
                .iter()
                .map(|(k, v)| (k.clone(), serde_json::Value::String(v.clone())))
                .collect(),
        );
        let from = get(&params, "From");
        let to = get(&params, "To");
        let pmid = get(&params, "MessageSid")
            .or_else(|| get(&params, "SmsSid"))
            .map(str::to_string);
        let channel = if is_whatsapp(from) || is_whatsapp(to) {
            Channel::Chat
        } else {
            Channel::Sms
        };
        let status = get(&params, "MessageStatus").map(str::to_lowercase);
        let (direction, contact, raw_status, body) = match status {
            Some(s) if s != "received" => (Direction::Out, to, s, None),
            _ => (
                Direction::In,
                from,
                "received".to_string(),
                get(&params, "Body").map(str::to_string),
            ),
        };
        let contact = match (channel, contact) {
            (Channel::Chat, Some(c)) => chat_address_to_phone(c),
            (_, c) => c.unwrap_or_default().to_string(),
        };
        Ok(vec![ParsedItem::checked(RawInboundEvent {
            channel,
            provider_name: self.id().to_string(),
            contact_identifier: contact,
            provider_message_id: pmid,
            raw_status,
            direction,
            body,
            event_timestamp: None,
            raw_payload,
        })])
    }

    fn ack(&self) -> WebhookAck {
        WebhookAck {
            content_type: "text/xml",
            body: EMPTY_TWIML.to_string(),
        }
    }

    fn supported_events(&self) -> Vec<&'static str> {
        EVENTS.to_vec()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channels::twilio_signature;

    fn request(body: &str) -> WebhookRequest {
        let mut req = WebhookRequest {
            path_and_query: "/webhooks/twilio".into(),
            body: body.as_bytes().to_vec(),
            ..Default::default()
        };
        req.headers.insert("host", "hooks.example.com".parse().unwrap());
        req
    }

    fn only_event(items: Vec<ParsedItem>) -> RawInboundEvent {
        match items.into_iter().next() {
            Some(ParsedItem::Event(ev)) => ev,
            other => panic!("expected event, got {:?}", other),
        }
    }

    #[test]
    fn status_callback_is_outbound_to_recipient() {
        let p = TwilioProvider::new(None, None);
        let ev = only_event(
            p.parse(&request("MessageSid=SM123&MessageStatus=delivered&To=%2B15551230000&From=%2B15550009999"))
                .unwrap(),
        );
        assert_eq!(ev.direction, Direction::Out);
        assert_eq!(ev.channel, Channel::Sms);
        assert_eq!(ev.contact_identifier, "+15551230000");
        assert_eq!(ev.provider_message_id.as_deref(), Some("SM123"));
        assert_eq!(ev.raw_status, "delivered");
        assert_eq!(ev.raw_payload["MessageStatus"], "delivered");
    }

    #[test]
    fn inbound_message_uses_sender_and_body() {
        let p = TwilioProvider::new(None, None);
        let ev = only_event(
            p.parse(&request("SmsSid=SM9&SmsStatus=received&From=%2B15551230000&To=%2B1555&Body=Hello+there"))
                .unwrap(),
        );
        assert_eq!(ev.direction, Direction::In);
        assert_eq!(ev.contact_identifier, "+15551230000");
        assert_eq!(ev.body.as_deref(), Some("Hello there"));
        assert_eq!(ev.raw_status, "received");
        assert_eq!(ev.provider_message_id.as_deref(), Some("SM9"));
    }

    #[test]
    fn whatsapp_addresses_are_chat() {
        let p = TwilioProvider::new(None, None);
        let ev = only_event(
            p.parse(&request("MessageSid=SM1&From=whatsapp%3A%2B33612345678&Body=hi"))
                .unwrap(),
        );
        assert_eq!(ev.channel, Channel::Chat);
        assert_eq!(ev.contact_identifier, "+33612345678");
    }

    #[test]
    fn empty_form_is_incomplete() {
        let p = TwilioProvider::new(None, None);
        let items = p.parse(&request("Body=orphaned")).unwrap();
        assert!(matches!(items[0], ParsedItem::Incomplete { .. }));
    }

    #[test]
    fn signature_checked_against_host_url() {
        let p = TwilioProvider::new(Some("secret".into()), None);
        let body = "MessageSid=SM1&MessageStatus=sent&To=%2B15551230000";
        let params: Vec<(String, String)> = serde_urlencoded::from_str(body).unwrap();
        let sig = twilio_signature("secret", "https://hooks.example.com/webhooks/twilio", &params);
        let mut req = request(body);
        assert!(matches!(p.verify(&req), Err(IngressError::Unauthorized(_))));
        req.headers.insert(SIGNATURE_HEADER, sig.parse().unwrap());
        assert!(p.verify(&req).is_ok());
        let behind_proxy = TwilioProvider::new(Some("secret".into()), Some("https://public.example.org/".into()));
        assert!(behind_proxy.verify(&req).is_err());
        assert_eq!(behind_proxy.signed_url(&req), "https://public.example.org/webhooks/twilio");
    }

    #[test]
    fn ack_is_empty_twiml() {
        let ack = TwilioProvider::new(None, None).ack();
        assert_eq!(ack.content_type, "text/xml");
        assert!(ack.body.contains("<Response></Response>"));
    }
}
