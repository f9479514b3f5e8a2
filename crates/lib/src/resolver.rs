//! Identity resolution: which tenant and lead an incoming contact belongs to.
//!
//! Order: outbound provider message id in the ledger, then CRM lookup by email or phone
//! (with a trailing-digits fallback for phones). Candidates without a tenant are discarded.
//! A contact matching leads of more than one tenant is ambiguous; there is no default tenant.

use crate::contact::{classify, phone_suffix, ContactKind};
use crate::crm::{CrmDirectory, CrmError, LeadMatch};
use crate::event::{LeadRef, ResolutionResult};
use crate::ledger::EventLedger;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;

/// Which key produced the candidates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchKey {
    ProviderMessageId,
    Email,
    Phone,
    PhoneSuffix,
}

/// Diagnostics collected alongside a `ResolutionResult`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ResolutionTrace {
    pub matched_by: Option<MatchKey>,
    /// Leads returned by the CRM before tenant-less ones were dropped.
    pub crm_candidates: usize,
    pub discarded_without_tenant: usize,
    /// The CRM errored or timed out; the result is `NotFound` by default.
    pub lookup_failed: bool,
}

impl ResolutionTrace {
    /// The CRM found leads but none of them had a tenant.
    pub fn only_untenanted(&self) -> bool {
        self.crm_candidates > 0 && self.discarded_without_tenant == self.crm_candidates
    }
}

pub struct IdentityResolver {
    crm: Arc<dyn CrmDirectory>,
    ledger: Arc<EventLedger>,
    lookup_timeout: Duration,
}

impl IdentityResolver {
    pub fn new(crm: Arc<dyn CrmDirectory>, ledger: Arc<EventLedger>, lookup_timeout: Duration) -> Self {
        Self {
            crm,
            ledger,
            lookup_timeout,
        }
    }

    pub async fn resolve(&self, contact_identifier: &str, provider_message_id: Option<&str>) -> ResolutionResult {
        self.resolve_traced(contact_identifier, provider_message_id).await.0
    }

    pub async fn resolve_traced(
        &self,
        contact_identifier: &str,
        provider_message_id: Option<&str>,
    ) -> (ResolutionResult, ResolutionTrace) {
        let mut trace = ResolutionTrace::default();

        if let Some(pmid) = provider_message_id.map(str::trim).filter(|s| !s.is_empty()) {
            if let Some(owner) = self.ledger.latest_outbound_owner(pmid).await {
                log::debug!("resolver: {} matched outbound message for tenant {}", pmid, owner.tenant_id);
                trace.matched_by = Some(MatchKey::ProviderMessageId);
                return (ResolutionResult::resolved(owner), trace);
            }
        }

        let matches = match classify(contact_identifier) {
            ContactKind::Empty => Vec::new(),
            ContactKind::Email(email) => {
                let found = self.lookup(&mut trace, self.crm.find_leads_by_email(&email)).await;
                if !found.is_empty() {
                    trace.matched_by = Some(MatchKey::Email);
                }
                found
            }
            ContactKind::Phone(phone) => {
                let found = self.lookup(&mut trace, self.crm.find_leads_by_phone(&phone)).await;
                if !found.is_empty() {
                    trace.matched_by = Some(MatchKey::Phone);
                    found
                } else if trace.lookup_failed {
                    found
                } else if let Some(suffix) = phone_suffix(&phone).filter(|s| *s != phone.trim_start_matches('+')) {
                    let found = self.lookup(&mut trace, self.crm.find_leads_by_phone(&suffix)).await;
                    if !found.is_empty() {
                        trace.matched_by = Some(MatchKey::PhoneSuffix);
                    }
                    found
                } else {
                    found
                }
            }
        };

        trace.crm_candidates = matches.len();
        let candidates: Vec<LeadRef> = matches
            .into_iter()
            .filter_map(|m| m.tenant_id.map(|t| LeadRef::new(t, m.lead_id)))
            .collect();
        trace.discarded_without_tenant = trace.crm_candidates - candidates.len();

        (decide(candidates), trace)
    }

    async fn lookup<F>(&self, trace: &mut ResolutionTrace, fut: F) -> Vec<LeadMatch>
    where
        F: std::future::Future<Output = Result<Vec<LeadMatch>, CrmError>>,
    {
        match tokio::time::timeout(self.lookup_timeout, fut).await {
            Ok(Ok(found)) => found,
            Ok(Err(e)) => {
                log::warn!("resolver: crm lookup failed, treating as not found: {}", e);
                trace.lookup_failed = true;
                Vec::new()
            }
            Err(_) => {
                log::warn!(
                    "resolver: crm lookup timed out after {:?}, treating as not found",
                    self.lookup_timeout
                );
                trace.lookup_failed = true;
                Vec::new()
            }
        }
    }
}

/// Zero candidates: not found. One distinct tenant: the first lead of that tenant. Otherwise ambiguous.
fn decide(candidates: Vec<LeadRef>) -> ResolutionResult {
    let Some(first) = candidates.first() else {
        return ResolutionResult::NotFound;
    };
    if candidates.iter().all(|c| c.tenant_id == first.tenant_id) {
        if candidates.len() > 1 {
            log::debug!(
                "resolver: {} leads in tenant {}, using {}",
                candidates.len(),
                first.tenant_id,
                first.lead_id
            );
        }
        return ResolutionResult::resolved(first.clone());
    }
    ResolutionResult::Ambiguous { candidates }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crm::{DirectoryLead, StaticDirectory};
    use crate::event::{Channel, Direction, EventDraft, MessageEvent};
    use crate::status::{CanonicalStatus, EventStatus};
    use async_trait::async_trait;

    fn lead(id: &str, tenant: Option<&str>, email: Option<&str>, phone: Option<&str>) -> DirectoryLead {
        DirectoryLead {
            lead_id: id.into(),
            tenant_id: tenant.map(str::to_string),
            email: email.map(str::to_string),
            phone: phone.map(str::to_string),
        }
    }

    fn resolver(crm: Arc<dyn CrmDirectory>, ledger: Arc<EventLedger>) -> IdentityResolver {
        IdentityResolver::new(crm, ledger, Duration::from_secs(1))
    }

    fn outbound(tenant: &str, lead_id: &str, pmid: &str) -> MessageEvent {
        MessageEvent::new(
            LeadRef::new(tenant, lead_id),
            EventDraft {
                channel: Channel::Sms,
                provider_name: "twilio".into(),
                direction: Direction::Out,
                provider_message_id: Some(pmid.into()),
                status: EventStatus::Canonical(CanonicalStatus::Sent),
                contact_identifier: "+15551230000".into(),
                snippet: None,
                raw_payload: serde_json::Value::Null,
                event_timestamp: None,
            },
        )
    }

    #[tokio::test]
    async fn provider_message_id_short_circuits_crm() {
        let crm = Arc::new(StaticDirectory::new(vec![lead("L9", Some("beta"), None, Some("+15551230000"))]));
        let ledger = Arc::new(EventLedger::default());
        ledger.append(outbound("acme", "L1", "SM123")).await.unwrap();
        let r = resolver(crm.clone(), ledger);
        let (res, trace) = r.resolve_traced("+15551230000", Some("SM123")).await;
        assert_eq!(res, ResolutionResult::resolved(LeadRef::new("acme", "L1")));
        assert_eq!(trace.matched_by, Some(MatchKey::ProviderMessageId));
        assert_eq!(crm.lookup_count(), 0);
    }

    #[tokio::test]
    async fn email_in_two_tenants_is_ambiguous() {
        let crm = Arc::new(StaticDirectory::new(vec![
            lead("L1", Some("acme"), Some("a@x.com"), None),
            lead("L2", Some("beta"), Some("A@X.com"), None),
        ]));
        let r = resolver(crm, Arc::new(EventLedger::default()));
        match r.resolve("a@x.com", None).await {
            ResolutionResult::Ambiguous { candidates } => {
                assert_eq!(candidates.len(), 2);
                let mut tenants: Vec<_> = candidates.iter().map(|c| c.tenant_id.as_str()).collect();
                tenants.sort();
                assert_eq!(tenants, vec!["acme", "beta"]);
            }
            other => panic!("expected ambiguous, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn unknown_contact_is_not_found() {
        let crm = Arc::new(StaticDirectory::new(vec![lead("L1", Some("acme"), Some("a@x.com"), None)]));
        let r = resolver(crm, Arc::new(EventLedger::default()));
        assert_eq!(r.resolve("nobody@x.com", None).await, ResolutionResult::NotFound);
        assert_eq!(r.resolve("", None).await, ResolutionResult::NotFound);
    }

    #[tokio::test]
    async fn single_tenant_picks_first_lead() {
        let crm = Arc::new(StaticDirectory::new(vec![
            lead("L1", Some("acme"), None, Some("+1 555 123 0000")),
            lead("L2", Some("acme"), None, Some("+15551230000")),
        ]));
        let r = resolver(crm, Arc::new(EventLedger::default()));
        let (res, trace) = r.resolve_traced("+1 (555) 123-0000", None).await;
        assert_eq!(res, ResolutionResult::resolved(LeadRef::new("acme", "L1")));
        assert_eq!(trace.matched_by, Some(MatchKey::Phone));
    }

    #[tokio::test]
    async fn untenanted_leads_never_resolve() {
        let crm = Arc::new(StaticDirectory::new(vec![
            lead("L1", None, Some("a@x.com"), None),
            lead("L2", Some("  "), Some("a@x.com"), None),
        ]));
        let r = resolver(crm, Arc::new(EventLedger::default()));
        let (res, trace) = r.resolve_traced("a@x.com", None).await;
        assert_eq!(res, ResolutionResult::NotFound);
        assert_eq!(trace.discarded_without_tenant, 2);
        assert!(trace.only_untenanted());
    }

    #[tokio::test]
    async fn untenanted_lead_does_not_break_single_tenant_match() {
        let crm = Arc::new(StaticDirectory::new(vec![
            lead("L0", None, Some("a@x.com"), None),
            lead("L1", Some("acme"), Some("a@x.com"), None),
        ]));
        let r = resolver(crm, Arc::new(EventLedger::default()));
        let (res, trace) = r.resolve_traced("a@x.com", None).await;
        assert_eq!(res, ResolutionResult::resolved(LeadRef::new("acme", "L1")));
        assert!(!trace.only_untenanted());
    }

    #[tokio::test]
    async fn phone_suffix_fallback() {
        let crm = Arc::new(StaticDirectory::new(vec![lead("L1", Some("acme"), None, Some("06 12 34 56 78"))]));
        let r = resolver(crm.clone(), Arc::new(EventLedger::default()));
        let (res, trace) = r.resolve_traced("+33612345678", None).await;
        assert_eq!(res, ResolutionResult::resolved(LeadRef::new("acme", "L1")));
        assert_eq!(trace.matched_by, Some(MatchKey::PhoneSuffix));
        assert_eq!(crm.lookup_count(), 2);
    }

    #[tokio::test]
    async fn short_phone_skips_suffix_fallback() {
        let crm = Arc::new(StaticDirectory::new(vec![]));
        let r = resolver(crm.clone(), Arc::new(EventLedger::default()));
        assert_eq!(r.resolve("+1234", None).await, ResolutionResult::NotFound);
        assert_eq!(crm.lookup_count(), 1);
    }

    struct SlowDirectory;

    #[async_trait]
    impl CrmDirectory for SlowDirectory {
        async fn find_leads_by_email(&self, _email: &str) -> Result<Vec<LeadMatch>, CrmError> {
            tokio::time::sleep(Duration::from_secs(30)).await;
            Ok(vec![LeadMatch {
                lead_id: "L1".into(),
                tenant_id: Some("acme".into()),
            }])
        }

        async fn find_leads_by_phone(&self, _phone: &str) -> Result<Vec<LeadMatch>, CrmError> {
            Err(CrmError::Api("503".into()))
        }
    }

    #[tokio::test]
    async fn crm_timeout_and_error_are_not_found() {
        let r = IdentityResolver::new(
            Arc::new(SlowDirectory),
            Arc::new(EventLedger::default()),
            Duration::from_millis(20),
        );
        let (res, trace) = r.resolve_traced("a@x.com", None).await;
        assert_eq!(res, ResolutionResult::NotFound);
        assert!(trace.lookup_failed);
        let (res, trace) = r.resolve_traced("+33612345678", None).await;
        assert_eq!(res, ResolutionResult::NotFound);
        assert!(trace.lookup_failed);
    }

    #[test]
    fn decide_never_defaults_to_a_tenant() {
        assert_eq!(decide(vec![]), ResolutionResult::NotFound);
        let mixed = vec![
            LeadRef::new("acme", "L1"),
            LeadRef::new("acme", "L2"),
            LeadRef::new("beta", "L3"),
        ];
        assert!(matches!(decide(mixed), ResolutionResult::Ambiguous { candidates } if candidates.len() == 3));
    }
}
