//! Poller HTTP endpoints.
//!
//! GET /api/v1/poller/status — current state of the background telemetry
//! poller as JSON.
//! POST /api/v1/poller/refresh — wake the poller for an immediate cycle.

use axum::extract::State;
use axum::http::StatusCode;
use axum::Json;

use crate::services::poller::{PollerControl, PollerState};

/// Get the current poller status.
///
/// Returns the cycle phase, last poll timing and outcome, failure streak and
/// the next scheduled wakeup.
#[utoipa::path(
    get,
    path = "/api/v1/poller/status",
    tag = "Poller",
    responses(
        (status = 200, description = "Current poller status", body = PollerState),
    )
)]
pub async fn get_poller_status(State(control): State<PollerControl>) -> Json<PollerState> {
    let s = control.state.read().await;
    Json(s.clone())
}

/// Request an immediate poll.
///
/// Returns at once; the cycle runs in the background. Requests made while a
/// cycle is already running trigger one more cycle right after it.
#[utoipa::path(
    post,
    path = "/api/v1/poller/refresh",
    tag = "Poller",
    responses(
        (status = 202, description = "Refresh scheduled"),
    )
)]
pub async fn trigger_refresh(State(control): State<PollerControl>) -> StatusCode {
    control.request_refresh();
    StatusCode::ACCEPTED
}
