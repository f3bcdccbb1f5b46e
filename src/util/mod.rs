//! Utility module
//!
//! Conversions between `Duration` and the millisecond values used in logs,
//! result rows and airtime arithmetic.

use std::time::Duration;

/// Whole milliseconds in `duration`, saturating at `u64::MAX`
pub fn as_millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

/// Duration of a fractional number of milliseconds; negative values give zero
pub fn from_millis_f64(millis: f64) -> Duration {
    if millis.is_finite() && millis > 0.0 {
        Duration::from_secs_f64(millis / 1000.0)
    } else {
        Duration::ZERO
    }
}

/// Fractional milliseconds in `duration`
pub fn to_millis_f64(duration: Duration) -> f64 {
    duration.as_secs_f64() * 1000.0
}
