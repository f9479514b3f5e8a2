//! Provider registry: register and look up webhook providers by id.

use super::inbound::{IngressError, ParsedItem, WebhookAck, WebhookRequest};
use crate::event::Channel;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

/// A webhook source. Implementations are stateless apart from their credentials.
pub trait WebhookProvider: Send + Sync {
    /// Provider id, also the path segment in `/webhooks/{id}`.
    fn id(&self) -> &str;
    /// Channel of events this provider usually reports.
    fn channel(&self) -> Channel;
    /// Check credentials or signature. Called before anything is acknowledged.
    fn verify(&self, req: &WebhookRequest) -> Result<(), IngressError>;
    /// Split the body into items. `Err(Malformed)` when the body cannot be read at all.
    fn parse(&self, req: &WebhookRequest) -> Result<Vec<ParsedItem>, IngressError>;
    fn ack(&self) -> WebhookAck {
        WebhookAck::json_ok()
    }
    /// Event names this provider's webhook understands.
    fn supported_events(&self) -> Vec<&'static str>;
}

/// Registry of provider ids to providers. Shared across gateway.
pub struct ProviderRegistry {
    inner: Arc<RwLock<HashMap<String, Arc<dyn WebhookProvider>>>>,
}

impl Default for ProviderRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl ProviderRegistry {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    pub async fn register(&self, provider: Arc<dyn WebhookProvider>) {
        let mut g = self.inner.write().await;
        let id = provider.id().to_string();
        if g.insert(id.clone(), provider).is_some() {
            log::debug!("provider {} re-registered", id);
        }
    }

    pub async fn get(&self, id: &str) -> Option<Arc<dyn WebhookProvider>> {
        let g = self.inner.read().await;
        g.get(id).cloned()
    }

    pub async fn ids(&self) -> Vec<String> {
        let g = self.inner.read().await;
        let mut ids: Vec<String> = g.keys().cloned().collect();
        ids.sort();
        ids
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channels::{GreenApiProvider, MailjetProvider};

    #[tokio::test]
    async fn lookup_by_id() {
        let reg = ProviderRegistry::new();
        reg.register(Arc::new(MailjetProvider::new(None))).await;
        reg.register(Arc::new(GreenApiProvider::new(None))).await;
        assert_eq!(reg.ids().await, vec!["greenapi", "mailjet"]);
        assert_eq!(reg.get("mailjet").await.map(|p| p.channel()), Some(Channel::Email));
        assert!(reg.get("telegram").await.is_none());
    }
}
