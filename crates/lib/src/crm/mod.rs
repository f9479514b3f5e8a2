//! CRM directory: the external system that owns leads and their tenant.
//!
//! Lookups are read-only. Two implementations: an EspoCRM-style REST client and a
//! static in-process directory configured from the config file.

mod espo;
mod fixed;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

pub use espo::EspoDirectory;
pub use fixed::{DirectoryLead, StaticDirectory};

/// Upper bound on the number of leads a single lookup returns.
pub const MAX_LOOKUP_RESULTS: usize = 50;

/// A lead returned by the CRM. The tenant may be missing on records that were never assigned.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LeadMatch {
    pub lead_id: String,
    pub tenant_id: Option<String>,
}

#[derive(Debug, thiserror::Error)]
pub enum CrmError {
    #[error("crm request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("crm api error: {0}")]
    Api(String),
    #[error("crm not configured: {0}")]
    NotConfigured(String),
}

/// Lead lookups used by the identity resolver.
#[async_trait]
pub trait CrmDirectory: Send + Sync {
    /// Exact, case-insensitive email match.
    async fn find_leads_by_email(&self, email: &str) -> Result<Vec<LeadMatch>, CrmError>;
    /// Substring match on the stored phone number. `phone` is already normalized (digits, optional `+`).
    async fn find_leads_by_phone(&self, phone: &str) -> Result<Vec<LeadMatch>, CrmError>;
}
