//! Default-filling of raw InSight records.
//!
//! Defaults apply only when a field is absent; a present value (including 0)
//! always wins. Fields without a documented default become `Reading::Unknown`,
//! so a calibrated record never has a missing leaf.

use chrono::{DateTime, Utc};

use crate::models::{
    CalibratedSolRecord, RangeReadings, Reading, TemperatureReadings, UNKNOWN_MARKER,
};
use crate::services::insight::{RawSensor, RawSolRecord};

/// Maximum air temperature when not reported (°C).
pub const DEFAULT_TEMPERATURE_MAX_C: f64 = -60.0;
/// Average surface pressure when not reported (mbar).
pub const DEFAULT_PRESSURE_AVG_MBAR: f64 = 7.1;
/// Average horizontal wind speed when not reported (m/s).
pub const DEFAULT_WIND_SPEED_AVG_MS: f64 = 10.0;

/// Resolve every optional field of `raw` to a concrete value.
pub fn normalize(raw: &RawSolRecord) -> CalibratedSolRecord {
    let at = raw.air_temperature.unwrap_or_default();
    let pre = raw.pressure.unwrap_or_default();
    let hws = raw.wind_speed.unwrap_or_default();

    let wind_direction = raw
        .wind_direction
        .as_ref()
        .and_then(|wd| wd.most_common.as_ref())
        .and_then(|mc| mc.compass_point.clone())
        .unwrap_or_else(|| UNKNOWN_MARKER.to_string());

    CalibratedSolRecord {
        sol: raw.sol.clone(),
        first_utc: parse_utc(&raw.sol, raw.first_utc.as_deref()),
        last_utc: parse_utc(&raw.sol, raw.last_utc.as_deref()),
        season: raw
            .season
            .clone()
            .unwrap_or_else(|| UNKNOWN_MARKER.to_string()),
        temperature: TemperatureReadings {
            min: at.mn.into(),
            max: at.mx.unwrap_or(DEFAULT_TEMPERATURE_MAX_C),
            avg: at.av.into(),
        },
        pressure: range_with_avg(pre, DEFAULT_PRESSURE_AVG_MBAR),
        wind_speed: range_with_avg(hws, DEFAULT_WIND_SPEED_AVG_MS),
        wind_direction,
    }
}

fn range_with_avg(sensor: RawSensor, default_avg: f64) -> RangeReadings {
    RangeReadings {
        min: sensor.mn.into(),
        max: sensor.mx.into(),
        avg: sensor.av.unwrap_or(default_avg),
    }
}

fn parse_utc(sol: &str, value: Option<&str>) -> Reading<DateTime<Utc>> {
    let Some(s) = value else {
        return Reading::Unknown;
    };
    match DateTime::parse_from_rfc3339(s) {
        Ok(dt) => Reading::Value(dt.with_timezone(&Utc)),
        Err(e) => {
            tracing::debug!("Sol {}: unparsable timestamp '{}': {}", sol, s, e);
            Reading::Unknown
        }
    }
}
