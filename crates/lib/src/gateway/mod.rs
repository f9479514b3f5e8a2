//! Gateway: HTTP server for provider webhooks and the tenant-scoped read API.
//!
//! Webhook handlers authenticate, parse and enqueue, then acknowledge. Everything after
//! that runs in the pipeline. `/api/*` reads always go through a single tenant's partition.

mod api;
mod protocol;
mod server;

pub use protocol::{
    ApiOk, EventsQuery, OrphansQuery, OutboundRequest, StatsQuery, TimelineQuery, TENANT_HEADER,
};
pub use server::{build_router, run_gateway, GatewayState};
