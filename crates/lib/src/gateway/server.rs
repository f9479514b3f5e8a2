//! Gateway HTTP server: provider webhooks, tenant-scoped API and health check.

use super::api;
use super::protocol::ApiErrorBody;
use crate::channels::{
    GreenApiProvider, IngressError, MailjetProvider, ParsedItem, ProviderRegistry, TwilioProvider,
    WebhookProvider, WebhookRequest,
};
use crate::config::{self, Config};
use crate::crm::{CrmDirectory, EspoDirectory, StaticDirectory};
use crate::init;
use crate::ledger::{EventLedger, LedgerJournal, LedgerOptions};
use crate::pipeline::{Pipeline, PipelineContext, PipelineHandle, WorkItem};
use crate::quarantine::{OrphanStore, Quarantine, ORPHAN_FILE};
use crate::resolver::IdentityResolver;
use crate::status::STATUS_TABLE_VERSION;
use anyhow::{Context, Result};
use axum::{
    body::Bytes,
    extract::{OriginalUri, Path, State},
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde_json::json;
use std::path::{Path as FsPath, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;

const PROTOCOL_VERSION: u32 = 1;

/// Shared state for the gateway (config, providers, pipeline, stores).
#[derive(Clone)]
pub struct GatewayState {
    pub config: Arc<Config>,
    /// When Some, `/api/*` requires `Authorization: Bearer <token>` matching this.
    pub required_token: Option<String>,
    pub providers: Arc<ProviderRegistry>,
    /// Submit side of the worker pool; webhook handlers only enqueue.
    pub pipeline: PipelineHandle,
    pub ledger: Arc<EventLedger>,
    pub orphans: Arc<OrphanStore>,
}

/// Build the CRM directory: REST client when `crm.baseUrl` is set, otherwise the static lead list.
fn build_directory(config: &Config) -> Result<Arc<dyn CrmDirectory>> {
    match config.crm.base_url.as_deref().map(str::trim).filter(|u| !u.is_empty()) {
        Some(base_url) => {
            let directory = EspoDirectory::new(
                base_url,
                config::resolve_crm_api_key(config),
                Some(config.crm.tenant_field.clone()),
                config.pipeline.lookup_timeout(),
            )
            .context("building crm client")?;
            log::info!("crm directory: {}", base_url);
            Ok(Arc::new(directory))
        }
        None => {
            log::info!("crm directory: {} static lead(s) from config", config.crm.leads.len());
            Ok(Arc::new(StaticDirectory::new(config.crm.leads.clone())))
        }
    }
}

async fn build_providers(config: &Config) -> Arc<ProviderRegistry> {
    let registry = Arc::new(ProviderRegistry::new());
    let providers = &config.providers;
    registry
        .register(Arc::new(MailjetProvider::new(providers.mailjet.basic_auth.clone())))
        .await;
    let twilio_token = config::resolve_twilio_auth_token(config);
    if twilio_token.is_none() {
        log::warn!("twilio auth token not configured; twilio webhook signatures are not checked");
    }
    registry
        .register(Arc::new(TwilioProvider::new(
            twilio_token,
            providers.twilio.public_url.clone(),
        )))
        .await;
    registry
        .register(Arc::new(GreenApiProvider::new(
            providers.greenapi.webhook_token.clone(),
        )))
        .await;
    registry
}

/// Open the ledger and the orphan store, journaled under `data_dir` unless journaling is off.
async fn open_stores(
    config: &Config,
    data_dir: &FsPath,
) -> Result<(Arc<EventLedger>, Arc<OrphanStore>)> {
    if !config.ledger.journal {
        log::info!("ledger journal disabled; events are kept in memory only");
        let ledger = EventLedger::new(LedgerOptions {
            journal: None,
            dedupe: config.ledger.dedupe,
        });
        return Ok((Arc::new(ledger), Arc::new(OrphanStore::in_memory())));
    }
    let ledger = EventLedger::open(LedgerOptions {
        journal: Some(
            LedgerJournal::new(data_dir, config.ledger.flush_batch_size)
                .with_write_timeout(config.pipeline.write_timeout()),
        ),
        dedupe: config.ledger.dedupe,
    })
    .await
    .with_context(|| format!("opening ledger in {}", data_dir.display()))?;
    let orphans = OrphanStore::open(data_dir.join(ORPHAN_FILE))
        .await
        .with_context(|| format!("opening orphan store in {}", data_dir.display()))?;
    Ok((Arc::new(ledger), Arc::new(orphans)))
}

/// Router for the gateway; all routes share `state`.
pub fn build_router(state: GatewayState) -> Router {
    Router::new()
        .route("/", get(health_http))
        .route("/webhooks/:provider", post(provider_webhook))
        .route("/webhooks/:provider/status", get(provider_status))
        .merge(api::routes())
        .with_state(state)
}

/// Run the gateway server; binds to config.gateway.bind:config.gateway.port.
/// When bind is not loopback, a gateway token must be configured or startup fails.
/// Blocks until shutdown (e.g. Ctrl+C), then drains the worker pool and flushes the ledger journal.
/// Requires the configuration directory to be initialized (`switchboard init`).
pub async fn run_gateway(config: Config, config_path: PathBuf) -> Result<()> {
    init::require_initialized(&config_path, &config)?;
    let bind = config.gateway.bind.trim().to_string();
    let required_token = config::resolve_gateway_token(&config);
    if !config::is_loopback_bind(&bind) && required_token.is_none() {
        anyhow::bail!(
            "refusing to bind gateway to {} without auth (set gateway.auth.token or SWITCHBOARD_GATEWAY_TOKEN)",
            bind
        );
    }

    let data_dir = config::resolve_data_dir(&config, &config_path);
    let (ledger, orphans) = open_stores(&config, &data_dir).await?;
    let crm = build_directory(&config)?;
    let write_timeout = config.pipeline.write_timeout();
    let context = Arc::new(PipelineContext::new(
        IdentityResolver::new(crm, ledger.clone(), config.pipeline.lookup_timeout()),
        ledger.clone(),
        Quarantine::new(orphans.clone(), write_timeout),
    ));
    let pipeline = Pipeline::start(
        context,
        config.pipeline.workers,
        config.pipeline.queue_capacity,
    );

    let state = GatewayState {
        config: Arc::new(config.clone()),
        required_token,
        providers: build_providers(&config).await,
        pipeline: pipeline.handle(),
        ledger: ledger.clone(),
        orphans,
    };
    log::info!("webhook providers: {}", state.providers.ids().await.join(", "));

    let flush_every = Duration::from_millis(config.ledger.flush_interval_ms.max(1));
    let flush_task = config
        .ledger
        .journal
        .then(|| spawn_flush_task(ledger.clone(), flush_every));

    let app = build_router(state);
    let bind_addr = format!("{}:{}", bind, config.gateway.port);
    let listener = tokio::net::TcpListener::bind(&bind_addr)
        .await
        .with_context(|| format!("binding to {}", bind_addr))?;
    log::info!("gateway listening on {}", bind_addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("gateway server exited")?;

    pipeline.drain().await;
    if let Some(task) = flush_task {
        task.abort();
    }
    match ledger.flush().await {
        Ok(n) => log::info!("ledger journal flushed on shutdown ({} event(s))", n),
        Err(e) => log::error!("ledger journal flush on shutdown failed: {}", e),
    }
    log::info!("gateway stopped");
    Ok(())
}

/// Periodic journal flush so a quiet gateway still persists its tail.
fn spawn_flush_task(ledger: Arc<EventLedger>, every: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(every);
        ticker.tick().await;
        loop {
            ticker.tick().await;
            if let Err(e) = ledger.flush().await {
                log::warn!("ledger journal flush failed: {}", e);
            }
        }
    })
}

/// Future that completes when the process should shut down (SIGINT or SIGTERM).
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            log::error!("failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut s) => {
                s.recv().await;
            }
            Err(e) => {
                log::error!("failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    log::info!("shutdown signal received, draining connections");
}

fn error_response(status: StatusCode, code: &'static str, message: Option<String>) -> Response {
    (
        status,
        Json(ApiErrorBody {
            ok: false,
            error: code,
            message,
        }),
    )
        .into_response()
}

/// Hand parsed items to the pipeline. Never waits for processing.
async fn enqueue(state: &GatewayState, provider: &dyn WebhookProvider, items: Vec<ParsedItem>) {
    for item in items {
        let work = match item {
            ParsedItem::Event(ev) => WorkItem::Inbound(ev),
            ParsedItem::Incomplete {
                channel,
                contact_identifier,
                provider_message_id,
                raw_payload,
            } => WorkItem::Malformed {
                channel,
                provider_name: provider.id().to_string(),
                contact_identifier,
                provider_message_id,
                raw_payload,
            },
        };
        state.pipeline.submit(work).await;
    }
}

/// POST /webhooks/{provider}: authenticate, parse, enqueue, acknowledge.
async fn provider_webhook(
    State(state): State<GatewayState>,
    Path(provider_id): Path<String>,
    OriginalUri(uri): OriginalUri,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let Some(provider) = state.providers.get(&provider_id).await else {
        return error_response(StatusCode::NOT_FOUND, "UNKNOWN_PROVIDER", Some(provider_id));
    };
    let req = WebhookRequest {
        path_and_query: uri
            .path_and_query()
            .map(|p| p.as_str().to_string())
            .unwrap_or_else(|| uri.path().to_string()),
        headers,
        body: body.to_vec(),
    };
    if let Err(e) = provider.verify(&req) {
        log::warn!("webhook {}: rejected: {}", provider.id(), e);
        return error_response(StatusCode::FORBIDDEN, "FORBIDDEN", None);
    }
    match provider.parse(&req) {
        Ok(items) => {
            log::debug!("webhook {}: {} item(s)", provider.id(), items.len());
            enqueue(&state, provider.as_ref(), items).await;
        }
        Err(IngressError::Malformed(reason)) => {
            log::warn!("webhook {}: unreadable body: {}", provider.id(), reason);
            let work = WorkItem::Malformed {
                channel: provider.channel(),
                provider_name: provider.id().to_string(),
                contact_identifier: String::new(),
                provider_message_id: None,
                raw_payload: serde_json::Value::String(req.body_text()),
            };
            state.pipeline.submit(work).await;
        }
        Err(e @ IngressError::Unauthorized(_)) => {
            log::warn!("webhook {}: rejected: {}", provider.id(), e);
            return error_response(StatusCode::FORBIDDEN, "FORBIDDEN", None);
        }
    }
    let ack = provider.ack();
    (StatusCode::OK, [(header::CONTENT_TYPE, ack.content_type)], ack.body).into_response()
}

/// GET /webhooks/{provider}/status: what this endpoint accepts.
async fn provider_status(
    State(state): State<GatewayState>,
    Path(provider_id): Path<String>,
) -> Response {
    let Some(provider) = state.providers.get(&provider_id).await else {
        return error_response(StatusCode::NOT_FOUND, "UNKNOWN_PROVIDER", Some(provider_id));
    };
    Json(json!({
        "ok": true,
        "provider": provider.id(),
        "channel": provider.channel(),
        "eventsSupported": provider.supported_events(),
        "statusTableVersion": STATUS_TABLE_VERSION,
        "timestamp": chrono::Utc::now(),
    }))
    .into_response()
}

/// GET / returns a simple health JSON (for health checks).
async fn health_http(State(state): State<GatewayState>) -> Json<serde_json::Value> {
    Json(json!({
        "runtime": "running",
        "protocol": PROTOCOL_VERSION,
        "port": state.config.gateway.port,
        "ledgerEvents": state.ledger.len().await,
        "orphans": state.orphans.count().await,
    }))
}
