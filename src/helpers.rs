//! Shared numeric helpers for derived telemetry values.
//!
//! Upstream values are unvalidated, so every derived figure goes through
//! `clamp_finite` before it leaves the crate. Non-finite inputs (NaN) fall to
//! the range floor; ±Inf saturate at the matching bound.

/// Lower bound of every percentage-style metric.
pub(crate) const PERCENT_MIN: f64 = 0.0;
/// Upper bound of every percentage-style metric.
pub(crate) const PERCENT_MAX: f64 = 100.0;

/// Clamp `v` into `[lo, hi]`, mapping NaN to `lo`.
pub(crate) fn clamp_finite(v: f64, lo: f64, hi: f64) -> f64 {
    if v.is_nan() {
        tracing::warn!("clamp_finite received NaN, defaulting to {}", lo);
        return lo;
    }
    v.clamp(lo, hi)
}

/// Clamp into the `[0, 100]` percentage range.
pub(crate) fn clamp_percent(v: f64) -> f64 {
    clamp_finite(v, PERCENT_MIN, PERCENT_MAX)
}
