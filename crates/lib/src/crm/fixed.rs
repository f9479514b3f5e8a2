//! In-process directory backed by a fixed lead list (from `crm.leads` in the config).

use super::{CrmDirectory, CrmError, LeadMatch, MAX_LOOKUP_RESULTS};
use crate::contact::normalize_phone;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicUsize, Ordering};

/// One lead entry in the static directory.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DirectoryLead {
    pub lead_id: String,
    #[serde(default)]
    pub tenant_id: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub phone: Option<String>,
}

/// Lead list held in memory. Counts lookups so callers can tell whether it was consulted.
#[derive(Debug, Default)]
pub struct StaticDirectory {
    leads: Vec<DirectoryLead>,
    lookups: AtomicUsize,
}

impl StaticDirectory {
    pub fn new(leads: Vec<DirectoryLead>) -> Self {
        Self {
            leads,
            lookups: AtomicUsize::new(0),
        }
    }

    /// Number of email/phone lookups served so far.
    pub fn lookup_count(&self) -> usize {
        self.lookups.load(Ordering::SeqCst)
    }

    fn matches<F>(&self, pred: F) -> Vec<LeadMatch>
    where
        F: Fn(&DirectoryLead) -> bool,
    {
        self.leads
            .iter()
            .filter(|l| pred(l))
            .take(MAX_LOOKUP_RESULTS)
            .map(|l| LeadMatch {
                lead_id: l.lead_id.clone(),
                tenant_id: l
                    .tenant_id
                    .as_ref()
                    .map(|t| t.trim().to_string())
                    .filter(|t| !t.is_empty()),
            })
            .collect()
    }
}

#[async_trait]
impl CrmDirectory for StaticDirectory {
    async fn find_leads_by_email(&self, email: &str) -> Result<Vec<LeadMatch>, CrmError> {
        self.lookups.fetch_add(1, Ordering::SeqCst);
        let wanted = email.trim().to_lowercase();
        Ok(self.matches(|l| {
            l.email
                .as_deref()
                .map(|e| e.trim().to_lowercase() == wanted)
                .unwrap_or(false)
        }))
    }

    async fn find_leads_by_phone(&self, phone: &str) -> Result<Vec<LeadMatch>, CrmError> {
        self.lookups.fetch_add(1, Ordering::SeqCst);
        let wanted = normalize_phone(phone);
        if wanted.trim_start_matches('+').is_empty() {
            return Ok(Vec::new());
        }
        Ok(self.matches(|l| {
            l.phone
                .as_deref()
                .map(|p| normalize_phone(p).contains(&wanted))
                .unwrap_or(false)
        }))
    }
}
