//! NASA InSight Mars weather service client.
//!
//! Fetches the per-sol weather feed and turns it into raw sol records.
//! See: https://api.nasa.gov/assets/insight/InSight%20Weather%20API%20Documentation.pdf

use std::cmp::Ordering;
use std::collections::HashSet;
use std::future::Future;
use std::time::Duration;

use reqwest::header::RETRY_AFTER;
use serde::Deserialize;

use crate::errors::{AppError, ParseError, UpstreamError};
use crate::models::sol_order;
use crate::services::fetcher::WeatherSource;

pub const INSIGHT_API_URL: &str = "https://api.nasa.gov/insight_weather/";

/// Client for the InSight weather API.
#[derive(Debug, Clone)]
pub struct InsightClient {
    client: reqwest::Client,
    api_url: String,
    api_key: String,
}

// --- InSight JSON payload types ---

/// One sol of weather exactly as the provider sent it. Every field is optional.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct RawSolRecord {
    /// Sol key the record was listed under (not part of the record body).
    #[serde(skip)]
    pub sol: String,
    #[serde(rename = "AT")]
    pub air_temperature: Option<RawSensor>,
    #[serde(rename = "PRE")]
    pub pressure: Option<RawSensor>,
    #[serde(rename = "HWS")]
    pub wind_speed: Option<RawSensor>,
    #[serde(rename = "WD")]
    pub wind_direction: Option<RawWindDirection>,
    #[serde(rename = "Season")]
    pub season: Option<String>,
    #[serde(rename = "First_UTC")]
    pub first_utc: Option<String>,
    #[serde(rename = "Last_UTC")]
    pub last_utc: Option<String>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Deserialize)]
pub struct RawSensor {
    pub mn: Option<f64>,
    pub mx: Option<f64>,
    pub av: Option<f64>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct RawWindDirection {
    pub most_common: Option<RawCompassPoint>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct RawCompassPoint {
    pub compass_point: Option<String>,
}

impl InsightClient {
    pub fn new(api_url: &str, api_key: &str, timeout: Duration) -> Result<Self, AppError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| AppError::InternalError(format!("Failed to build HTTP client: {}", e)))?;
        Ok(Self {
            client,
            api_url: api_url.to_string(),
            api_key: api_key.to_string(),
        })
    }

    /// Fetch the current weather feed as raw JSON.
    ///
    /// The body is only checked for being JSON here; structure is validated by
    /// `parse_payload` so that a malformed feed and an unreachable one fail the
    /// same way.
    pub async fn fetch_weather(&self) -> Result<serde_json::Value, UpstreamError> {
        let response = self
            .client
            .get(&self.api_url)
            .query(&[
                ("api_key", self.api_key.as_str()),
                ("feedtype", "json"),
                ("ver", "1.0"),
            ])
            .send()
            .await
            // without_url keeps the API key out of error messages and logs
            .map_err(|e| UpstreamError::Transport(e.without_url().to_string()))?;

        if response.status() == reqwest::StatusCode::TOO_MANY_REQUESTS {
            let retry_after_secs = response
                .headers()
                .get(RETRY_AFTER)
                .and_then(|v| v.to_str().ok())
                .and_then(|s| s.trim().parse::<u64>().ok());
            return Err(UpstreamError::RateLimited { retry_after_secs });
        }

        if !response.status().is_success() {
            return Err(UpstreamError::Status(response.status().as_u16()));
        }

        let raw_json: serde_json::Value = response
            .json()
            .await
            .map_err(|e| ParseError::InvalidJson(e.without_url().to_string()))?;

        Ok(raw_json)
    }
}

impl WeatherSource for InsightClient {
    fn fetch_payload(
        &self,
    ) -> impl Future<Output = Result<serde_json::Value, UpstreamError>> + Send {
        self.fetch_weather()
    }
}

/// Extract the listed sols from an InSight payload, oldest first.
///
/// This is a pure function (no I/O). Keys listed in `sol_keys` without a record
/// body are skipped; a record body of the wrong shape rejects the whole payload.
pub fn parse_payload(raw_json: &serde_json::Value) -> Result<Vec<RawSolRecord>, ParseError> {
    let payload = raw_json.as_object().ok_or(ParseError::NotAnObject)?;

    let sol_keys_value = payload
        .get("sol_keys")
        .ok_or_else(|| ParseError::SolKeys("field is missing".to_string()))?;
    let sol_keys: Vec<String> = serde_json::from_value(sol_keys_value.clone())
        .map_err(|e| ParseError::SolKeys(e.to_string()))?;

    if sol_keys.is_empty() {
        return Err(ParseError::NoSols);
    }

    let mut records = Vec::with_capacity(sol_keys.len());
    for sol in order_sol_keys(sol_keys) {
        let Some(body) = payload.get(&sol) else {
            tracing::warn!("InSight listed sol {} without a record, skipping", sol);
            continue;
        };
        let mut record: RawSolRecord =
            serde_json::from_value(body.clone()).map_err(|e| ParseError::Record {
                sol: sol.clone(),
                reason: e.to_string(),
            })?;
        record.sol = sol;
        records.push(record);
    }

    if records.is_empty() {
        return Err(ParseError::NoSols);
    }

    Ok(records)
}

/// Return sol keys in chronological order without duplicates.
///
/// The provider documents `sol_keys` as ascending; this is checked rather than
/// trusted. When every key is numeric and the list is out of order, it is
/// re-sorted numerically. Non-numeric keys keep provider order.
fn order_sol_keys(sol_keys: Vec<String>) -> Vec<String> {
    let mut seen = HashSet::new();
    let mut keys: Vec<String> = sol_keys
        .into_iter()
        .filter(|k| seen.insert(k.clone()))
        .collect();

    let all_numeric = keys.iter().all(|k| k.parse::<u64>().is_ok());
    let ascending = keys
        .windows(2)
        .all(|pair| sol_order(&pair[0], &pair[1]) == Some(Ordering::Less));

    if all_numeric && !ascending {
        tracing::warn!(
            "InSight sol_keys not in ascending order ({:?}), re-sorting",
            keys
        );
        keys.sort_by_key(|k| k.parse::<u64>().unwrap_or(u64::MAX));
    } else if !all_numeric {
        tracing::debug!("InSight sol_keys contain non-numeric keys, keeping provider order");
    }

    keys
}
