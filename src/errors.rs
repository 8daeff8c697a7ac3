use std::sync::Arc;

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Serialize;
use utoipa::ToSchema;

use crate::models::WeatherSnapshot;

/// Standard error response body.
#[derive(Debug, Serialize, ToSchema)]
pub struct ErrorResponse {
    /// Human-readable error message
    pub error: String,
}

#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Service unavailable: {0}")]
    ServiceUnavailable(String),

    #[error("Internal error: {0}")]
    InternalError(String),
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, message) = match &self {
            AppError::ServiceUnavailable(msg) => (StatusCode::SERVICE_UNAVAILABLE, msg.clone()),
            AppError::Config(msg) | AppError::InternalError(msg) => {
                tracing::error!("Internal error: {}", msg);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "Internal server error".to_string(),
                )
            }
        };

        (status, axum::Json(ErrorResponse { error: message })).into_response()
    }
}

/// The InSight payload was received but could not be understood.
///
/// Treated exactly like a transport failure by the fetcher: it never reaches
/// projections as a field-level error.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ParseError {
    #[error("response body is not valid JSON: {0}")]
    InvalidJson(String),

    #[error("payload is not a JSON object")]
    NotAnObject,

    #[error("sol_keys missing or malformed: {0}")]
    SolKeys(String),

    #[error("payload lists no sols")]
    NoSols,

    #[error("sol {sol}: {reason}")]
    Record { sol: String, reason: String },
}

/// Failure of a single upstream fetch attempt.
#[derive(Debug, Clone, thiserror::Error)]
pub enum UpstreamError {
    #[error("InSight request failed: {0}")]
    Transport(String),

    #[error("InSight returned HTTP {0}")]
    Status(u16),

    #[error("InSight rate limit exceeded")]
    RateLimited { retry_after_secs: Option<u64> },

    #[error("InSight payload rejected: {0}")]
    Parse(#[from] ParseError),
}

/// Outcome of `Fetcher::fetch_latest` when no fresh snapshot could be produced.
#[derive(Debug, Clone, thiserror::Error)]
pub enum FetchError {
    /// Upstream failed but an earlier snapshot exists; it is carried here and
    /// should be served as-is.
    #[error("serving stale telemetry: {cause}")]
    Stale {
        snapshot: Arc<WeatherSnapshot>,
        cause: UpstreamError,
    },

    /// Upstream failed and nothing has ever been cached.
    #[error("no telemetry available yet: {0}")]
    Unavailable(UpstreamError),

    #[error("telemetry cache has been shut down")]
    ShutDown,
}

impl FetchError {
    /// The snapshot still worth serving, if any.
    pub fn stale_snapshot(&self) -> Option<&Arc<WeatherSnapshot>> {
        match self {
            FetchError::Stale { snapshot, .. } => Some(snapshot),
            _ => None,
        }
    }
}

impl From<FetchError> for AppError {
    fn from(err: FetchError) -> Self {
        AppError::ServiceUnavailable(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_error_wraps_into_upstream() {
        let err: UpstreamError = ParseError::NoSols.into();
        assert!(matches!(err, UpstreamError::Parse(ParseError::NoSols)));
        assert_eq!(err.to_string(), "InSight payload rejected: payload lists no sols");
    }

    #[test]
    fn test_stale_snapshot_accessor() {
        let snapshot = Arc::new(WeatherSnapshot::default());
        let stale = FetchError::Stale {
            snapshot: snapshot.clone(),
            cause: UpstreamError::Status(503),
        };
        assert!(Arc::ptr_eq(stale.stale_snapshot().unwrap(), &snapshot));
        assert!(FetchError::Unavailable(UpstreamError::Status(503))
            .stale_snapshot()
            .is_none());
    }

    #[test]
    fn test_service_unavailable_status() {
        let response = AppError::ServiceUnavailable("down".to_string()).into_response();
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    }

    #[test]
    fn test_internal_error_hides_message() {
        let response = AppError::InternalError("secret detail".to_string()).into_response();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }
}
