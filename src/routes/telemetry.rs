//! Telemetry projection endpoints.
//!
//! Each handler brings the cache up to date (`fetch_latest`), then projects
//! the live history. Upstream trouble never turns into an error response:
//! the caller gets stale data (with `X-Telemetry-Stale: true`) or an explicit
//! `no_data` status.

use std::sync::Arc;

use axum::extract::State;
use axum::http::{HeaderMap, HeaderName, HeaderValue};
use axum::Json;
use chrono::{DateTime, Utc};
use serde::Serialize;
use utoipa::ToSchema;

use crate::errors::{AppError, ErrorResponse, FetchError};
use crate::services::fetcher::CacheEntry;
use crate::services::projections::{
    project_overview, project_systems, project_weather, OverviewProjection, SystemsProjection,
    WeatherProjection,
};
use crate::services::TelemetryFetcher;

/// Header set on responses built from an expired snapshot.
pub const STALE_HEADER: &str = "x-telemetry-stale";

/// Shared state for telemetry routes.
#[derive(Clone)]
pub struct AppState {
    pub fetcher: Arc<TelemetryFetcher>,
}

// ---------------------------------------------------------------------------
// Response types
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum DataStatus {
    /// Served from a snapshot within its TTL
    Fresh,
    /// Upstream failed; served from the last good snapshot
    Stale,
    /// Nothing has been fetched successfully yet
    NoData,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct OverviewResponse {
    pub status: DataStatus,
    /// When the served snapshot was fetched. Null for `no_data`.
    pub fetched_at: Option<DateTime<Utc>>,
    pub projection: Option<OverviewProjection>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct WeatherResponse {
    pub status: DataStatus,
    pub fetched_at: Option<DateTime<Utc>>,
    pub projection: Option<WeatherProjection>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct SystemsResponse {
    pub status: DataStatus,
    pub fetched_at: Option<DateTime<Utc>>,
    pub projection: Option<SystemsProjection>,
}

// ---------------------------------------------------------------------------
// Handlers
// ---------------------------------------------------------------------------

/// Mission overview: latest sol, five-sol trend and a health summary.
#[utoipa::path(
    get,
    path = "/api/v1/telemetry/overview",
    tag = "Telemetry",
    responses(
        (status = 200, description = "Overview projection", body = OverviewResponse,
         headers(
             ("X-Telemetry-Stale" = String, description = "Set to 'true' when serving cached data because the InSight feed is unreachable")
         )),
        (status = 503, description = "Telemetry cache is shutting down", body = ErrorResponse),
    )
)]
pub async fn get_overview(
    State(state): State<AppState>,
) -> Result<(HeaderMap, Json<OverviewResponse>), AppError> {
    let (status, entry) = load_telemetry(&state.fetcher).await?;
    let projection = entry
        .as_ref()
        .and_then(|e| project_overview(&e.history, &mut rand::thread_rng()));
    let status = status_for(status, projection.is_some());

    Ok((
        stale_headers(status),
        Json(OverviewResponse {
            status,
            fetched_at: fetched_at(&entry, status),
            projection,
        }),
    ))
}

/// Weather detail: latest sol with every field and the full retained history.
#[utoipa::path(
    get,
    path = "/api/v1/telemetry/weather",
    tag = "Telemetry",
    responses(
        (status = 200, description = "Weather projection", body = WeatherResponse,
         headers(
             ("X-Telemetry-Stale" = String, description = "Set to 'true' when serving cached data because the InSight feed is unreachable")
         )),
        (status = 503, description = "Telemetry cache is shutting down", body = ErrorResponse),
    )
)]
pub async fn get_weather(
    State(state): State<AppState>,
) -> Result<(HeaderMap, Json<WeatherResponse>), AppError> {
    let (status, entry) = load_telemetry(&state.fetcher).await?;
    let projection = entry.as_ref().and_then(|e| project_weather(&e.history));
    let status = status_for(status, projection.is_some());

    Ok((
        stale_headers(status),
        Json(WeatherResponse {
            status,
            fetched_at: fetched_at(&entry, status),
            projection,
        }),
    ))
}

/// Subsystem health: derived metrics and a synthetic battery series.
///
/// Communications and the battery series include random noise, so two calls
/// over the same snapshot differ.
#[utoipa::path(
    get,
    path = "/api/v1/telemetry/systems",
    tag = "Telemetry",
    responses(
        (status = 200, description = "Systems projection", body = SystemsResponse,
         headers(
             ("X-Telemetry-Stale" = String, description = "Set to 'true' when serving cached data because the InSight feed is unreachable")
         )),
        (status = 503, description = "Telemetry cache is shutting down", body = ErrorResponse),
    )
)]
pub async fn get_systems(
    State(state): State<AppState>,
) -> Result<(HeaderMap, Json<SystemsResponse>), AppError> {
    let (status, entry) = load_telemetry(&state.fetcher).await?;
    let projection = entry
        .as_ref()
        .and_then(|e| project_systems(&e.history, &mut rand::thread_rng()));
    let status = status_for(status, projection.is_some());

    Ok((
        stale_headers(status),
        Json(SystemsResponse {
            status,
            fetched_at: fetched_at(&entry, status),
            projection,
        }),
    ))
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// Bring the cache up to date and return the entry to project from.
async fn load_telemetry(
    fetcher: &TelemetryFetcher,
) -> Result<(DataStatus, Option<Arc<CacheEntry>>), AppError> {
    let status = match fetcher.fetch_latest().await {
        Ok(_) => DataStatus::Fresh,
        Err(FetchError::Stale { cause, .. }) => {
            tracing::warn!("Serving stale telemetry: {}", cause);
            DataStatus::Stale
        }
        Err(FetchError::Unavailable(cause)) => {
            tracing::warn!("No telemetry available yet: {}", cause);
            DataStatus::NoData
        }
        Err(err @ FetchError::ShutDown) => return Err(err.into()),
    };

    let entry = match status {
        DataStatus::NoData => None,
        DataStatus::Fresh | DataStatus::Stale => fetcher.current(),
    };
    Ok((status, entry))
}

fn status_for(status: DataStatus, has_projection: bool) -> DataStatus {
    if has_projection {
        status
    } else {
        DataStatus::NoData
    }
}

fn fetched_at(entry: &Option<Arc<CacheEntry>>, status: DataStatus) -> Option<DateTime<Utc>> {
    match status {
        DataStatus::NoData => None,
        _ => entry.as_ref().map(|e| e.fetched_at_utc),
    }
}

fn stale_headers(status: DataStatus) -> HeaderMap {
    let mut headers = HeaderMap::new();
    if status == DataStatus::Stale {
        headers.insert(
            HeaderName::from_static(STALE_HEADER),
            HeaderValue::from_static("true"),
        );
    }
    headers
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::fetcher::Fetcher;
    use crate::services::insight::fixtures::sample_payload;
    use crate::services::insight::InsightClient;
    use std::time::Duration;
    use wiremock::matchers::method;
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn state_for(server: &MockServer, ttl: Duration) -> AppState {
        let client = InsightClient::new(&server.uri(), "TEST_KEY", Duration::from_secs(5)).unwrap();
        AppState {
            fetcher: Arc::new(Fetcher::new(client, ttl, 30)),
        }
    }

    async fn healthy_server() -> MockServer {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_json(sample_payload()))
            .mount(&server)
            .await;
        server
    }

    #[tokio::test]
    async fn test_overview_fresh() {
        let server = healthy_server().await;
        let state = state_for(&server, Duration::from_secs(3600));

        let (headers, Json(body)) = get_overview(State(state)).await.unwrap();
        assert_eq!(body.status, DataStatus::Fresh);
        assert!(body.fetched_at.is_some());
        assert!(headers.get(STALE_HEADER).is_none());

        let projection = body.projection.unwrap();
        assert_eq!(projection.latest.sol, "677");
        assert_eq!(projection.trend.len(), 3);
        // Sol 676 has no pressure average; the default applies
        assert_eq!(projection.trend[1].pressure_avg, 7.1);
    }

    #[tokio::test]
    async fn test_overview_no_data_when_upstream_down() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;
        let state = state_for(&server, Duration::from_secs(3600));

        let (headers, Json(body)) = get_overview(State(state)).await.unwrap();
        assert_eq!(body.status, DataStatus::NoData);
        assert!(body.projection.is_none());
        assert!(body.fetched_at.is_none());
        assert!(headers.get(STALE_HEADER).is_none());
    }

    #[tokio::test]
    async fn test_weather_stale_after_upstream_failure() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_json(sample_payload()))
            .up_to_n_times(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;
        // Zero TTL: every request goes upstream
        let state = state_for(&server, Duration::ZERO);

        let (_, Json(first)) = get_weather(State(state.clone())).await.unwrap();
        assert_eq!(first.status, DataStatus::Fresh);

        let (headers, Json(second)) = get_weather(State(state)).await.unwrap();
        assert_eq!(second.status, DataStatus::Stale);
        assert_eq!(headers.get(STALE_HEADER).unwrap(), "true");
        assert_eq!(second.fetched_at, first.fetched_at);

        let projection = second.projection.unwrap();
        assert_eq!(projection.history.len(), 3);
        assert_eq!(projection.retained_depth, 30);
        assert_eq!(projection.latest.wind_direction, "unknown");
    }

    #[tokio::test]
    async fn test_systems_projection() {
        let server = healthy_server().await;
        let state = state_for(&server, Duration::from_secs(3600));

        let (_, Json(body)) = get_systems(State(state)).await.unwrap();
        let projection = body.projection.unwrap();
        assert_eq!(projection.battery_series.len(), 10);
        assert_eq!(projection.subsystems.len(), 4);
        assert!((70.0..=100.0).contains(&projection.metrics.communications));
        // Sol 677 reports no wind; 100 - 10 * 3 = 70
        assert_eq!(projection.metrics.power.solar_efficiency, 70.0);
    }

    #[tokio::test]
    async fn test_shut_down_cache_is_service_unavailable() {
        let server = healthy_server().await;
        let state = state_for(&server, Duration::from_secs(3600));
        state.fetcher.shut_down();

        let err = get_systems(State(state)).await.unwrap_err();
        assert!(matches!(err, AppError::ServiceUnavailable(_)));
    }
}
