//! Synthetic subsystem-health metrics.
//!
//! Only power is backed by real telemetry (pressure and wind). Communications
//! is noise around a healthy band; navigation and instruments are fixed
//! nominal baselines. All randomness comes from the caller's `RandomSource`.

use serde::Serialize;
use utoipa::ToSchema;

use crate::helpers::{clamp_finite, clamp_percent};
use crate::models::CalibratedSolRecord;

/// Floor of the power level (%).
const POWER_MIN: f64 = 40.0;
/// Floor of the solar panel efficiency (%).
const SOLAR_EFFICIENCY_MIN: f64 = 60.0;
/// Pressure (mbar) that costs one point of power.
const PRESSURE_PER_POWER_POINT: f64 = 10.0;
/// Efficiency points lost per m/s of average wind.
const SOLAR_LOSS_PER_WIND_MS: f64 = 3.0;

const COMMUNICATIONS_MIN: f64 = 70.0;
const COMMUNICATIONS_MAX: f64 = 100.0;

/// Nominal navigation health (%). Not backed by telemetry.
pub const NAVIGATION_BASELINE: f64 = 92.0;
/// Nominal instrument health (%). Not backed by telemetry.
pub const INSTRUMENTS_BASELINE: f64 = 96.0;

/// Levels above this are reported as `good`.
const GOOD_THRESHOLD: f64 = 70.0;

/// Source of uniformly distributed noise for synthetic telemetry.
pub trait RandomSource {
    /// A value in `[low, high)`; `low` when the range is empty.
    fn uniform(&mut self, low: f64, high: f64) -> f64;
}

impl<R: rand::Rng> RandomSource for R {
    fn uniform(&mut self, low: f64, high: f64) -> f64 {
        // gen_range panics on an empty or NaN range
        if !(low < high) {
            return low;
        }
        self.gen_range(low..high)
    }
}

/// Power management figures.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, ToSchema)]
pub struct PowerMetrics {
    /// Battery / power level (%)
    pub level: f64,
    /// Solar panel efficiency (%)
    pub solar_efficiency: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, ToSchema)]
pub struct DerivedSystemMetrics {
    pub power: PowerMetrics,
    /// Communication link strength (%)
    pub communications: f64,
    /// Navigation health (%)
    pub navigation: f64,
    /// Instrument health (%)
    pub instruments: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum HealthStatus {
    Good,
    Warning,
}

impl HealthStatus {
    pub fn classify(level: f64) -> Self {
        if level > GOOD_THRESHOLD {
            HealthStatus::Good
        } else {
            HealthStatus::Warning
        }
    }
}

/// One named subsystem for the health overview.
#[derive(Debug, Clone, PartialEq, Serialize, ToSchema)]
pub struct SubsystemHealth {
    pub name: String,
    pub value: f64,
    pub status: HealthStatus,
}

/// Compute subsystem health from the latest sol.
pub fn derive(latest: &CalibratedSolRecord, rng: &mut impl RandomSource) -> DerivedSystemMetrics {
    let level = clamp_finite(
        100.0 - latest.pressure.avg / PRESSURE_PER_POWER_POINT,
        POWER_MIN,
        100.0,
    );
    let solar_efficiency = clamp_finite(
        100.0 - latest.wind_speed.avg * SOLAR_LOSS_PER_WIND_MS,
        SOLAR_EFFICIENCY_MIN,
        100.0,
    );
    let communications = clamp_percent(rng.uniform(COMMUNICATIONS_MIN, COMMUNICATIONS_MAX));

    DerivedSystemMetrics {
        power: PowerMetrics {
            level: clamp_percent(level),
            solar_efficiency: clamp_percent(solar_efficiency),
        },
        communications,
        navigation: clamp_percent(NAVIGATION_BASELINE),
        instruments: clamp_percent(INSTRUMENTS_BASELINE),
    }
}

impl DerivedSystemMetrics {
    /// The four top-level subsystems, in display order.
    pub fn subsystems(&self) -> Vec<SubsystemHealth> {
        [
            ("Power", self.power.level),
            ("Communication", self.communications),
            ("Navigation", self.navigation),
            ("Instruments", self.instruments),
        ]
        .into_iter()
        .map(|(name, value)| SubsystemHealth {
            name: name.to_string(),
            value,
            status: HealthStatus::classify(value),
        })
        .collect()
    }
}
