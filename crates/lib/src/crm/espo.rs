//! EspoCRM-style REST directory (`GET <base>/Lead` with `where[]` filters).

use super::{CrmDirectory, CrmError, LeadMatch, MAX_LOOKUP_RESULTS};
use async_trait::async_trait;
use serde::Deserialize;
use std::time::Duration;

const DEFAULT_TENANT_FIELD: &str = "cTenantId";

/// Client for a CRM exposing EspoCRM's list API. The tenant is read from a custom lead field.
#[derive(Clone)]
pub struct EspoDirectory {
    base_url: String,
    api_key: Option<String>,
    tenant_field: String,
    client: reqwest::Client,
}

#[derive(Debug, Deserialize)]
struct ListResponse {
    #[serde(default)]
    list: Vec<serde_json::Value>,
}

impl EspoDirectory {
    pub fn new(
        base_url: &str,
        api_key: Option<String>,
        tenant_field: Option<String>,
        timeout: Duration,
    ) -> Result<Self, CrmError> {
        let base_url = base_url.trim().trim_end_matches('/').to_string();
        if base_url.is_empty() {
            return Err(CrmError::NotConfigured("crm.baseUrl is empty".to_string()));
        }
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            base_url,
            api_key,
            tenant_field: tenant_field
                .filter(|f| !f.trim().is_empty())
                .unwrap_or_else(|| DEFAULT_TENANT_FIELD.to_string()),
            client,
        })
    }

    /// GET /Lead filtered on one attribute. `match_type` is "equals" or "contains".
    async fn list_leads(
        &self,
        attribute: &str,
        match_type: &str,
        value: &str,
    ) -> Result<Vec<LeadMatch>, CrmError> {
        let url = format!("{}/Lead", self.base_url);
        let select = format!("id,{}", self.tenant_field);
        let max_size = MAX_LOOKUP_RESULTS.to_string();
        let query = [
            ("where[0][type]", match_type),
            ("where[0][attribute]", attribute),
            ("where[0][value]", value),
            ("select", select.as_str()),
            ("maxSize", max_size.as_str()),
        ];
        let mut req = self.client.get(&url).query(&query);
        if let Some(ref key) = self.api_key {
            req = req.header("X-Api-Key", key);
        }
        let res = req.send().await?;
        if !res.status().is_success() {
            let status = res.status();
            let body = res.text().await.unwrap_or_default();
            return Err(CrmError::Api(format!("{} {}", status, body)));
        }
        let data: ListResponse = res.json().await?;
        Ok(data
            .list
            .iter()
            .filter_map(|lead| self.to_match(lead))
            .take(MAX_LOOKUP_RESULTS)
            .collect())
    }

    fn to_match(&self, lead: &serde_json::Value) -> Option<LeadMatch> {
        let lead_id = lead.get("id").and_then(|v| v.as_str())?.to_string();
        let tenant_id = lead
            .get(&self.tenant_field)
            .and_then(|v| v.as_str())
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty());
        Some(LeadMatch { lead_id, tenant_id })
    }
}

#[async_trait]
impl CrmDirectory for EspoDirectory {
    async fn find_leads_by_email(&self, email: &str) -> Result<Vec<LeadMatch>, CrmError> {
        let normalized = email.trim().to_lowercase();
        self.list_leads("emailAddress", "equals", &normalized).await
    }

    async fn find_leads_by_phone(&self, phone: &str) -> Result<Vec<LeadMatch>, CrmError> {
        self.list_leads("phoneNumber", "contains", phone).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn directory() -> EspoDirectory {
        EspoDirectory::new(
            "http://crm.local/api/v1/",
            None,
            None,
            Duration::from_secs(1),
        )
        .unwrap()
    }

    #[test]
    fn base_url_is_trimmed_and_required() {
        assert_eq!(directory().base_url, "http://crm.local/api/v1");
        assert!(EspoDirectory::new("  ", None, None, Duration::from_secs(1)).is_err());
    }

    #[test]
    fn blank_tenant_field_is_treated_as_missing() {
        let d = directory();
        let m = d
            .to_match(&serde_json::json!({"id": "L1", "cTenantId": "  "}))
            .unwrap();
        assert_eq!(m.tenant_id, None);
        let m = d
            .to_match(&serde_json::json!({"id": "L2", "cTenantId": "acme"}))
            .unwrap();
        assert_eq!(m.tenant_id.as_deref(), Some("acme"));
        assert!(d.to_match(&serde_json::json!({"cTenantId": "acme"})).is_none());
    }

    #[tokio::test]
    async fn unreachable_crm_is_an_error() {
        let d = EspoDirectory::new("http://127.0.0.1:9", None, None, Duration::from_millis(200))
            .unwrap();
        assert!(d.find_leads_by_email("a@x.com").await.is_err());
    }
}
