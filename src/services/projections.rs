//! Read-only views for the overview, weather and systems screens.
//!
//! Pure functions of a history window and a random source. They never fetch,
//! never mutate shared state, and return `None` until a first sol exists.

use serde::Serialize;
use utoipa::ToSchema;

use crate::helpers::clamp_percent;
use crate::models::CalibratedSolRecord;
use crate::services::history::{HistoryWindow, TREND_DEPTH};
use crate::services::metrics::{
    self, DerivedSystemMetrics, HealthStatus, PowerMetrics, RandomSource, SubsystemHealth,
};

/// Number of points in the synthetic battery series.
const BATTERY_SERIES_POINTS: u32 = 10;
/// Battery points lost per step of the series.
const BATTERY_DECAY_PER_STEP: f64 = 1.2;
/// Upper bound of the per-step jitter added to the series.
const BATTERY_JITTER_MAX: f64 = 2.0;

/// One sol on the overview trend chart.
#[derive(Debug, Clone, PartialEq, Serialize, ToSchema)]
pub struct TrendPoint {
    pub sol: String,
    /// Maximum air temperature (°C)
    pub temperature_max: f64,
    /// Average pressure (mbar)
    pub pressure_avg: f64,
    /// Average wind speed (m/s)
    pub wind_speed_avg: f64,
}

impl From<&CalibratedSolRecord> for TrendPoint {
    fn from(record: &CalibratedSolRecord) -> Self {
        Self {
            sol: record.sol.clone(),
            temperature_max: record.temperature.max,
            pressure_avg: record.pressure.avg,
            wind_speed_avg: record.wind_speed.avg,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, ToSchema)]
pub struct OverviewSummary {
    /// Battery level (%), the power level
    pub battery_level: f64,
    pub battery_status: HealthStatus,
    /// Communication link strength (%)
    pub communications: f64,
    pub power: PowerMetrics,
}

#[derive(Debug, Clone, PartialEq, Serialize, ToSchema)]
pub struct OverviewProjection {
    pub latest: CalibratedSolRecord,
    /// Up to five most recent sols, oldest first
    pub trend: Vec<TrendPoint>,
    pub summary: OverviewSummary,
}

#[derive(Debug, Clone, PartialEq, Serialize, ToSchema)]
pub struct WeatherProjection {
    pub latest: CalibratedSolRecord,
    /// Every retained sol, oldest first
    pub history: Vec<CalibratedSolRecord>,
    /// Maximum number of sols the history retains
    pub retained_depth: usize,
}

/// Synthetic battery reading, `offset_hours` steps into the series.
///
/// Illustrative only; not a measurement.
#[derive(Debug, Clone, PartialEq, Serialize, ToSchema)]
pub struct BatteryPoint {
    pub offset_hours: u32,
    pub level: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, ToSchema)]
pub struct SystemsProjection {
    pub metrics: DerivedSystemMetrics,
    pub subsystems: Vec<SubsystemHealth>,
    pub battery_series: Vec<BatteryPoint>,
}

pub fn project_overview(
    history: &HistoryWindow,
    rng: &mut impl RandomSource,
) -> Option<OverviewProjection> {
    let latest = history.latest()?;
    let derived = metrics::derive(latest, rng);

    Some(OverviewProjection {
        latest: latest.clone(),
        trend: history
            .window_of(TREND_DEPTH)
            .iter()
            .map(TrendPoint::from)
            .collect(),
        summary: OverviewSummary {
            battery_level: derived.power.level,
            battery_status: HealthStatus::classify(derived.power.level),
            communications: derived.communications,
            power: derived.power,
        },
    })
}

pub fn project_weather(history: &HistoryWindow) -> Option<WeatherProjection> {
    let latest = history.latest()?;
    Some(WeatherProjection {
        latest: latest.clone(),
        history: history.all(),
        retained_depth: history.depth(),
    })
}

pub fn project_systems(
    history: &HistoryWindow,
    rng: &mut impl RandomSource,
) -> Option<SystemsProjection> {
    let latest = history.latest()?;
    let derived = metrics::derive(latest, rng);
    let battery_series = battery_series(derived.power.level, rng);

    Some(SystemsProjection {
        subsystems: derived.subsystems(),
        metrics: derived,
        battery_series,
    })
}

fn battery_series(power_level: f64, rng: &mut impl RandomSource) -> Vec<BatteryPoint> {
    (0..BATTERY_SERIES_POINTS)
        .map(|i| {
            let jitter = rng.uniform(0.0, BATTERY_JITTER_MAX);
            BatteryPoint {
                offset_hours: i + 1,
                level: clamp_percent(power_level - BATTERY_DECAY_PER_STEP * f64::from(i) + jitter),
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::fixtures::{record, record_with};
    use crate::services::metrics::testing::ConstantSource;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn window_with(sols: &[&str], depth: usize) -> HistoryWindow {
        let mut window = HistoryWindow::new(depth);
        for sol in sols {
            window.append(record(sol));
        }
        window
    }

    #[test]
    fn test_empty_history_yields_no_projection() {
        let empty = HistoryWindow::new(5);
        assert!(project_overview(&empty, &mut ConstantSource(0.5)).is_none());
        assert!(project_weather(&empty).is_none());
        assert!(project_systems(&empty, &mut ConstantSource(0.5)).is_none());
    }

    #[test]
    fn test_overview_trend_uses_last_five_oldest_first() {
        let window = window_with(&["1", "2", "3", "4", "5", "6", "7"], 30);
        let overview = project_overview(&window, &mut ConstantSource(0.5)).unwrap();
        let sols: Vec<&str> = overview.trend.iter().map(|p| p.sol.as_str()).collect();
        assert_eq!(sols, vec!["3", "4", "5", "6", "7"]);
        assert_eq!(overview.latest.sol, "7");
    }

    #[test]
    fn test_overview_trend_not_padded() {
        let window = window_with(&["1", "2"], 30);
        let overview = project_overview(&window, &mut ConstantSource(0.5)).unwrap();
        assert_eq!(overview.trend.len(), 2);
    }

    #[test]
    fn test_overview_summary_matches_metrics() {
        let mut window = HistoryWindow::new(5);
        window.append(record_with("676", 7.1, 14.0));
        let overview = project_overview(&window, &mut ConstantSource(0.5)).unwrap();
        assert!((overview.summary.battery_level - 99.29).abs() < 1e-9);
        assert_eq!(overview.summary.battery_status, HealthStatus::Good);
        assert_eq!(overview.summary.power.solar_efficiency, 60.0);
        assert_eq!(overview.summary.communications, 85.0);
        assert_eq!(overview.trend[0].pressure_avg, 7.1);
    }

    #[test]
    fn test_weather_includes_full_history_and_depth() {
        let window = window_with(&["1", "2", "3", "4", "5", "6", "7"], 6);
        let weather = project_weather(&window).unwrap();
        assert_eq!(weather.history.len(), 6);
        assert_eq!(weather.history[0].sol, "2");
        assert_eq!(weather.retained_depth, 6);
        assert_eq!(weather.latest.sol, "7");
    }

    #[test]
    fn test_systems_battery_series_shape() {
        let mut window = HistoryWindow::new(5);
        window.append(record_with("1", 7.1, 5.0));
        let systems = project_systems(&window, &mut ConstantSource(0.0)).unwrap();

        assert_eq!(systems.battery_series.len(), 10);
        assert_eq!(systems.battery_series[0].offset_hours, 1);
        assert_eq!(systems.battery_series[9].offset_hours, 10);
        // No jitter: pure linear decay from the power level
        let power = systems.metrics.power.level;
        assert!((systems.battery_series[0].level - power).abs() < 1e-9);
        assert!((systems.battery_series[9].level - (power - 10.8)).abs() < 1e-9);
        assert_eq!(systems.subsystems.len(), 4);
    }

    #[test]
    fn test_systems_battery_series_clamped() {
        let mut window = HistoryWindow::new(5);
        window.append(record_with("1", 7.1, 5.0));
        // Jitter at its maximum on a near-full battery must not exceed 100
        let systems = project_systems(&window, &mut ConstantSource(1.0)).unwrap();
        assert!(systems
            .battery_series
            .iter()
            .all(|p| (0.0..=100.0).contains(&p.level)));
        assert_eq!(systems.battery_series[0].level, 100.0);
    }

    #[test]
    fn test_systems_reproducible_with_seed() {
        let window = window_with(&["1", "2"], 5);
        let a = project_systems(&window, &mut StdRng::seed_from_u64(7)).unwrap();
        let b = project_systems(&window, &mut StdRng::seed_from_u64(7)).unwrap();
        assert_eq!(a, b);
    }
}
