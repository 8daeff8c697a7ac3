//! Calibrated telemetry types shared by the cache, history and projections.

use std::cmp::Ordering;
use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Serialize, Serializer};
use utoipa::ToSchema;

/// Marker emitted in place of a value the provider did not report.
pub const UNKNOWN_MARKER: &str = "unknown";

/// A calibrated field that is either a concrete value or explicitly unknown.
///
/// Serializes as the bare value, or as the string `"unknown"`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Reading<T> {
    Value(T),
    Unknown,
}

impl<T> From<Option<T>> for Reading<T> {
    fn from(v: Option<T>) -> Self {
        v.map_or(Reading::Unknown, Reading::Value)
    }
}

impl<T: Serialize> Serialize for Reading<T> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Reading::Value(v) => v.serialize(serializer),
            Reading::Unknown => serializer.serialize_str(UNKNOWN_MARKER),
        }
    }
}

/// Air temperature for one sol, in °C.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, ToSchema)]
pub struct TemperatureReadings {
    #[schema(value_type = Object)]
    pub min: Reading<f64>,
    /// Always populated (defaults to −60 °C).
    pub max: f64,
    #[schema(value_type = Object)]
    pub avg: Reading<f64>,
}

/// Min/max/average of a sensor whose average always has a value.
///
/// Used for pressure (mbar) and horizontal wind speed (m/s).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, ToSchema)]
pub struct RangeReadings {
    #[schema(value_type = Object)]
    pub min: Reading<f64>,
    #[schema(value_type = Object)]
    pub max: Reading<f64>,
    pub avg: f64,
}

/// One sol of weather after default-filling. Immutable once produced.
#[derive(Debug, Clone, PartialEq, Serialize, ToSchema)]
pub struct CalibratedSolRecord {
    /// Provider sol key (e.g. "675")
    pub sol: String,
    /// First UTC sample time of the sol, or "unknown"
    #[schema(value_type = Object)]
    pub first_utc: Reading<DateTime<Utc>>,
    /// Last UTC sample time of the sol, or "unknown"
    #[schema(value_type = Object)]
    pub last_utc: Reading<DateTime<Utc>>,
    /// Martian season (e.g. "winter")
    pub season: String,
    pub temperature: TemperatureReadings,
    pub pressure: RangeReadings,
    pub wind_speed: RangeReadings,
    /// Most common compass point (e.g. "WNW")
    pub wind_direction: String,
}

/// Chronological order of two sol keys, when it can be known.
///
/// Provider keys are decimal sol numbers and compare numerically. `None` when
/// either key is not a number: such keys carry no order of their own and
/// callers fall back to the order the provider listed them in.
pub fn sol_order(a: &str, b: &str) -> Option<Ordering> {
    match (a.parse::<u64>(), b.parse::<u64>()) {
        (Ok(x), Ok(y)) => Some(x.cmp(&y)),
        _ => None,
    }
}

/// Ordered sol keys plus their calibrated records, as of one fetch.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct WeatherSnapshot {
    sol_keys: Vec<String>,
    records: HashMap<String, CalibratedSolRecord>,
}

impl WeatherSnapshot {
    /// Build from records already in chronological order.
    ///
    /// A repeated sol keeps its first position and its last record.
    pub fn from_records(records: impl IntoIterator<Item = CalibratedSolRecord>) -> Self {
        let mut sol_keys = Vec::new();
        let mut by_sol = HashMap::new();
        for record in records {
            if !by_sol.contains_key(&record.sol) {
                sol_keys.push(record.sol.clone());
            }
            by_sol.insert(record.sol.clone(), record);
        }
        Self {
            sol_keys,
            records: by_sol,
        }
    }

    pub fn sol_keys(&self) -> &[String] {
        &self.sol_keys
    }

    /// The most recent sol (last key).
    pub fn latest(&self) -> Option<&CalibratedSolRecord> {
        self.sol_keys.last().and_then(|sol| self.records.get(sol))
    }

    /// Records in chronological order.
    pub fn iter(&self) -> impl Iterator<Item = &CalibratedSolRecord> {
        self.sol_keys.iter().filter_map(|sol| self.records.get(sol))
    }

}
