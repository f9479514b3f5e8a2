//! Tenant-scoped read API under `/api`.
//!
//! The tenant always comes from the `X-Tenant-Id` header; query strings and bodies cannot
//! widen the scope. When a gateway token is configured it is required as a Bearer token.

use super::protocol::{
    ApiErrorBody, ApiOk, EventsQuery, OrphansQuery, OutboundRequest, StatsQuery, TimelineQuery,
    TENANT_HEADER,
};
use super::server::GatewayState;
use crate::channels::secret_eq;
use crate::event::{LeadRef, MessageEvent, OrphanEvent};
use crate::ledger::{EventsPage, LedgerError, LedgerStats};
use crate::pipeline::{OutboundSend, PipelineError};
use axum::{
    extract::{Path, Query, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::Serialize;

pub(super) fn routes() -> Router<GatewayState> {
    Router::new()
        .route("/api/events", get(list_events))
        .route("/api/events/stats", get(event_stats))
        .route("/api/events/lead/:lead_id", get(lead_timeline))
        .route("/api/events/outbound", post(record_outbound))
        .route("/api/orphans", get(list_orphans))
}

#[derive(Debug)]
pub(super) struct ApiError {
    status: StatusCode,
    code: &'static str,
    message: Option<String>,
}

impl ApiError {
    fn new(status: StatusCode, code: &'static str, message: Option<String>) -> Self {
        Self {
            status,
            code,
            message,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = ApiErrorBody {
            ok: false,
            error: self.code,
            message: self.message,
        };
        (self.status, Json(body)).into_response()
    }
}

impl From<LedgerError> for ApiError {
    fn from(e: LedgerError) -> Self {
        match e {
            LedgerError::MissingTenant => ApiError::new(StatusCode::UNAUTHORIZED, "MISSING_TENANT", None),
            LedgerError::MissingLead => {
                ApiError::new(StatusCode::BAD_REQUEST, "MISSING_LEAD", Some(e.to_string()))
            }
            LedgerError::Duplicate(_) => ApiError::new(StatusCode::CONFLICT, "DUPLICATE", Some(e.to_string())),
            LedgerError::Journal(_) => {
                log::error!("api: ledger journal error: {}", e);
                ApiError::new(StatusCode::INTERNAL_SERVER_ERROR, "LEDGER_ERROR", Some(e.to_string()))
            }
        }
    }
}

impl From<PipelineError> for ApiError {
    fn from(e: PipelineError) -> Self {
        match e {
            PipelineError::Ledger(inner) => inner.into(),
        }
    }
}

/// Bearer check against the configured gateway token (no-op when none is configured).
fn check_token(state: &GatewayState, headers: &HeaderMap) -> Result<(), ApiError> {
    if let Some(ref required) = state.required_token {
        let provided = headers
            .get("authorization")
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.trim().strip_prefix("Bearer "))
            .map(str::trim)
            .unwrap_or("");
        if !secret_eq(provided.as_bytes(), required.as_bytes()) {
            return Err(ApiError::new(StatusCode::UNAUTHORIZED, "UNAUTHORIZED", None));
        }
    }
    Ok(())
}

/// Token check, then the mandatory tenant header.
fn authorize(state: &GatewayState, headers: &HeaderMap) -> Result<String, ApiError> {
    check_token(state, headers)?;
    headers
        .get(TENANT_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .map(str::to_string)
        .ok_or_else(|| ApiError::new(StatusCode::UNAUTHORIZED, "MISSING_TENANT", None))
}

/// GET /api/events
async fn list_events(
    State(state): State<GatewayState>,
    headers: HeaderMap,
    Query(q): Query<EventsQuery>,
) -> Result<Json<ApiOk<EventsPage>>, ApiError> {
    let tenant = authorize(&state, &headers)?;
    let filter = q
        .filter()
        .map_err(|m| ApiError::new(StatusCode::BAD_REQUEST, "INVALID_FILTER", Some(m)))?;
    let page = state.ledger.query(&tenant, &filter, q.page()).await?;
    Ok(Json(ApiOk::new(page)))
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct StatsBody {
    range: &'static str,
    #[serde(flatten)]
    stats: LedgerStats,
}

/// GET /api/events/stats?range=7d|30d|90d (or since/until)
async fn event_stats(
    State(state): State<GatewayState>,
    headers: HeaderMap,
    Query(q): Query<StatsQuery>,
) -> Result<Json<ApiOk<StatsBody>>, ApiError> {
    let tenant = authorize(&state, &headers)?;
    let (range, window) = q
        .window(chrono::Utc::now())
        .map_err(|m| ApiError::new(StatusCode::BAD_REQUEST, "INVALID_RANGE", Some(m)))?;
    let stats = state.ledger.stats(&tenant, window).await?;
    Ok(Json(ApiOk::new(StatsBody { range, stats })))
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct TimelineBody {
    lead_id: String,
    events: Vec<MessageEvent>,
    total: usize,
}

/// GET /api/events/lead/{leadId}?phone&email
async fn lead_timeline(
    State(state): State<GatewayState>,
    headers: HeaderMap,
    Path(lead_id): Path<String>,
    Query(q): Query<TimelineQuery>,
) -> Result<Json<ApiOk<TimelineBody>>, ApiError> {
    let tenant = authorize(&state, &headers)?;
    let events = state
        .ledger
        .lead_timeline(&tenant, &lead_id, &q.contacts())
        .await?;
    Ok(Json(ApiOk::new(TimelineBody {
        lead_id,
        total: events.len(),
        events,
    })))
}

#[derive(Serialize)]
struct EventBody {
    event: MessageEvent,
}

/// POST /api/events/outbound: record a send for the header tenant.
async fn record_outbound(
    State(state): State<GatewayState>,
    headers: HeaderMap,
    Json(req): Json<OutboundRequest>,
) -> Result<(StatusCode, Json<ApiOk<EventBody>>), ApiError> {
    let tenant = authorize(&state, &headers)?;
    let event = state
        .pipeline
        .record_outbound(OutboundSend {
            owner: LeadRef::new(tenant, req.lead_id.trim()),
            channel: req.channel,
            provider_name: req.provider_name.trim().to_lowercase(),
            provider_message_id: req.provider_message_id,
            contact_identifier: req.contact_identifier,
            status: req.status,
            body: req.body,
            event_timestamp: req.event_timestamp,
        })
        .await?;
    Ok((StatusCode::CREATED, Json(ApiOk::new(EventBody { event }))))
}

#[derive(Serialize)]
struct OrphansBody {
    items: Vec<OrphanEvent>,
    total: usize,
}

/// GET /api/orphans: operator listing, newest first. No tenant scope.
async fn list_orphans(
    State(state): State<GatewayState>,
    headers: HeaderMap,
    Query(q): Query<OrphansQuery>,
) -> Result<Json<ApiOk<OrphansBody>>, ApiError> {
    check_token(&state, &headers)?;
    Ok(Json(ApiOk::new(OrphansBody {
        items: state.orphans.recent(q.limit()).await,
        total: state.orphans.count().await,
    })))
}
