//! Configuration types and loading.
//!
//! Config is loaded from a JSON file (e.g. `~/.switchboard/config.json`) and environment.
//! Every section is optional; secrets can be supplied through environment variables instead.

use crate::crm::DirectoryLead;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Top-level application config.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Config {
    /// Gateway server settings.
    #[serde(default)]
    pub gateway: GatewayConfig,

    /// Webhook provider credentials.
    #[serde(default)]
    pub providers: ProvidersConfig,

    /// CRM directory used for identity resolution.
    #[serde(default)]
    pub crm: CrmConfig,

    /// Worker pool sizing and collaborator timeouts.
    #[serde(default)]
    pub pipeline: PipelineConfig,

    /// Ledger storage.
    #[serde(default)]
    pub ledger: LedgerConfig,
}

/// Gateway bind, port, and auth settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GatewayConfig {
    /// Port for HTTP (default 15160).
    #[serde(default = "default_gateway_port")]
    pub port: u16,

    /// Bind address (default "127.0.0.1").
    #[serde(default = "default_gateway_bind")]
    pub bind: String,

    #[serde(default)]
    pub auth: GatewayAuthConfig,
}

/// Bearer token for `/api/*`. Overridden by SWITCHBOARD_GATEWAY_TOKEN env.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GatewayAuthConfig {
    pub token: Option<String>,
}

fn default_gateway_port() -> u16 {
    15160
}

fn default_gateway_bind() -> String {
    "127.0.0.1".to_string()
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            port: default_gateway_port(),
            bind: default_gateway_bind(),
            auth: GatewayAuthConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProvidersConfig {
    #[serde(default)]
    pub twilio: TwilioConfig,
    #[serde(default)]
    pub mailjet: MailjetConfig,
    #[serde(default)]
    pub greenapi: GreenApiConfig,
}

/// Twilio webhook settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TwilioConfig {
    /// Account auth token; enables `X-Twilio-Signature` validation. Overridden by TWILIO_AUTH_TOKEN env.
    pub auth_token: Option<String>,
    /// Public base URL Twilio calls (e.g. "https://hooks.example.com"), when behind a proxy.
    pub public_url: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MailjetConfig {
    /// "user:pass" expected as HTTP Basic credentials on the webhook URL.
    pub basic_auth: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GreenApiConfig {
    /// Expected `Authorization: Bearer` token on webhook calls.
    pub webhook_token: Option<String>,
}

/// CRM directory: a REST CRM when `baseUrl` is set, otherwise the static `leads` list.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CrmConfig {
    pub base_url: Option<String>,
    /// Overridden by SWITCHBOARD_CRM_API_KEY env.
    pub api_key: Option<String>,
    /// Lead attribute holding the tenant id (default "cTenantId").
    #[serde(default = "default_tenant_field")]
    pub tenant_field: String,
    #[serde(default)]
    pub leads: Vec<DirectoryLead>,
}

fn default_tenant_field() -> String {
    "cTenantId".to_string()
}

impl Default for CrmConfig {
    fn default() -> Self {
        Self {
            base_url: None,
            api_key: None,
            tenant_field: default_tenant_field(),
            leads: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PipelineConfig {
    #[serde(default = "default_workers")]
    pub workers: usize,
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,
    /// CRM lookup timeout; a timeout resolves to not found.
    #[serde(default = "default_timeout_ms")]
    pub lookup_timeout_ms: u64,
    /// Ledger and quarantine write timeout.
    #[serde(default = "default_timeout_ms")]
    pub write_timeout_ms: u64,
}

fn default_workers() -> usize {
    4
}

fn default_queue_capacity() -> usize {
    1024
}

fn default_timeout_ms() -> u64 {
    5000
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            workers: default_workers(),
            queue_capacity: default_queue_capacity(),
            lookup_timeout_ms: default_timeout_ms(),
            write_timeout_ms: default_timeout_ms(),
        }
    }
}

impl PipelineConfig {
    pub fn lookup_timeout(&self) -> Duration {
        Duration::from_millis(self.lookup_timeout_ms.max(1))
    }

    pub fn write_timeout(&self) -> Duration {
        Duration::from_millis(self.write_timeout_ms.max(1))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LedgerConfig {
    /// Directory for journals and the orphan file (default ~/.switchboard/data).
    pub data_dir: Option<PathBuf>,
    /// Persist events as NDJSON and replay them at startup. When false the ledger is memory only.
    #[serde(default = "default_true")]
    pub journal: bool,
    #[serde(default = "default_flush_batch_size")]
    pub flush_batch_size: usize,
    #[serde(default = "default_flush_interval_ms")]
    pub flush_interval_ms: u64,
    /// Reject repeated (provider, message id, status, direction) deliveries.
    #[serde(default)]
    pub dedupe: bool,
}

fn default_true() -> bool {
    true
}

fn default_flush_batch_size() -> usize {
    100
}

fn default_flush_interval_ms() -> u64 {
    10_000
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            data_dir: None,
            journal: true,
            flush_batch_size: default_flush_batch_size(),
            flush_interval_ms: default_flush_interval_ms(),
            dedupe: false,
        }
    }
}

fn env_or(var: &str, configured: Option<&String>) -> Option<String> {
    std::env::var(var)
        .ok()
        .and_then(|s| {
            let t = s.trim();
            if t.is_empty() {
                None
            } else {
                Some(t.to_string())
            }
        })
        .or_else(|| {
            configured
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
        })
}

/// Resolve the gateway token: env SWITCHBOARD_GATEWAY_TOKEN overrides config.
pub fn resolve_gateway_token(config: &Config) -> Option<String> {
    env_or("SWITCHBOARD_GATEWAY_TOKEN", config.gateway.auth.token.as_ref())
}

/// Resolve the Twilio auth token: env TWILIO_AUTH_TOKEN overrides config.
pub fn resolve_twilio_auth_token(config: &Config) -> Option<String> {
    env_or("TWILIO_AUTH_TOKEN", config.providers.twilio.auth_token.as_ref())
}

/// Resolve the CRM API key: env SWITCHBOARD_CRM_API_KEY overrides config.
pub fn resolve_crm_api_key(config: &Config) -> Option<String> {
    env_or("SWITCHBOARD_CRM_API_KEY", config.crm.api_key.as_ref())
}

/// True if the bind address is loopback (127.0.0.1, ::1, etc.).
pub fn is_loopback_bind(bind: &str) -> bool {
    let b = bind.trim();
    b == "127.0.0.1" || b == "::1" || b == "localhost"
}

/// Resolve config path from env or default.
pub fn default_config_path() -> PathBuf {
    std::env::var("SWITCHBOARD_CONFIG_PATH")
        .map(PathBuf::from)
        .unwrap_or_else(|_| {
            dirs::home_dir()
                .map(|h| h.join(".switchboard").join("config.json"))
                .unwrap_or_else(|| PathBuf::from("config.json"))
        })
}

/// Resolve the data directory: `ledger.dataDir` (relative paths against the config file's
/// parent), otherwise `data` next to the config file.
pub fn resolve_data_dir(config: &Config, config_path: &Path) -> PathBuf {
    let config_parent = config_path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    match &config.ledger.data_dir {
        Some(d) if !d.as_os_str().is_empty() => {
            if d.is_absolute() {
                d.clone()
            } else {
                config_parent.join(d)
            }
        }
        _ => config_parent.join("data"),
    }
}

/// Load config from the default path (or SWITCHBOARD_CONFIG_PATH). Missing file => default config.
/// Returns the config and the path that was used (for resolving the data directory).
pub fn load_config(path: Option<PathBuf>) -> Result<(Config, PathBuf)> {
    let path = path.unwrap_or_else(default_config_path);
    let config = if !path.exists() {
        log::debug!("config file not found, using defaults: {}", path.display());
        Config::default()
    } else {
        let s = std::fs::read_to_string(&path)
            .with_context(|| format!("reading config from {}", path.display()))?;
        serde_json::from_str(&s)
            .with_context(|| format!("parsing config from {}", path.display()))?
    };
    Ok((config, path))
}
