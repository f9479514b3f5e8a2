//! Webhook providers (Mailjet, Twilio, Green-API).
//!
//! Each provider authenticates and parses its own native webhook body into
//! `RawInboundEvent`s. Validation happens here only; the pipeline trusts what it receives.

mod greenapi;
mod inbound;
mod mailjet;
mod registry;
mod signature;
mod twilio;

pub use greenapi::GreenApiProvider;
pub use inbound::{IngressError, ParsedItem, WebhookAck, WebhookRequest};
pub use mailjet::MailjetProvider;
pub use registry::{ProviderRegistry, WebhookProvider};
pub use signature::{
    basic_auth_matches, bearer_matches, secret_eq, twilio_signature, verify_twilio_signature,
};
pub use twilio::TwilioProvider;
