use std::sync::Arc;

use axum::extract::State;
use axum::Json;
use serde::Serialize;
use tokio::time::Instant;
use utoipa::ToSchema;

use crate::services::TelemetryFetcher;

/// Health check response.
#[derive(Debug, Serialize, ToSchema)]
pub struct HealthResponse {
    /// Service status ("ok" when telemetry is cached, "degraded" before the
    /// first successful fetch)
    pub status: String,
    /// API version
    pub version: String,
    /// Whether any telemetry snapshot is cached
    pub has_data: bool,
    /// Whether the cached snapshot is past its TTL
    pub stale: bool,
}

/// Health check endpoint.
///
/// Reports on the cache without touching the upstream feed. Returns status
/// "degraded" (still 200) when nothing is cached yet, so load balancers can
/// tell a cold start from an outage.
#[utoipa::path(
    get,
    path = "/api/v1/health",
    tag = "Health",
    responses(
        (status = 200, description = "Service is up", body = HealthResponse),
    )
)]
pub async fn health_check(State(fetcher): State<Arc<TelemetryFetcher>>) -> Json<HealthResponse> {
    let entry = fetcher.current();
    let has_data = entry.is_some();
    let stale = entry.is_some_and(|e| !e.is_fresh(Instant::now()));

    Json(HealthResponse {
        status: if has_data {
            "ok".to_string()
        } else {
            "degraded".to_string()
        },
        version: env!("CARGO_PKG_VERSION").to_string(),
        has_data,
        stale,
    })
}
