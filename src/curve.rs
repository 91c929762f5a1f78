//! Fan curve engine: maps a temperature onto a target speed percentage.
//!
//! Pure and synchronous by design so control decisions are testable without
//! any hardware or timer in the loop.

use crate::model::CurvePoint;

/// Speed applied when a curve has no points at all.
pub const DEFAULT_FAN_SPEED: u8 = 20;

/// Compute the target fan speed for `temperature` from `points`.
///
/// `points` must be sorted ascending by temperature ([`FanCurve::new`] sorts).
/// Below the first point or above the last the boundary speed is returned;
/// between two points the speed is linearly interpolated and truncated to an
/// integer percentage. An empty set yields [`DEFAULT_FAN_SPEED`].
///
/// [`FanCurve::new`]: crate::model::FanCurve::new
pub fn target_speed(temperature: f64, points: &[CurvePoint]) -> u8 {
    let (Some(first), Some(last)) = (points.first(), points.last()) else {
        return DEFAULT_FAN_SPEED;
    };

    if temperature <= first.temp {
        return first.speed;
    }
    if temperature >= last.temp {
        return last.speed;
    }

    for pair in points.windows(2) {
        let (lo, hi) = (pair[0], pair[1]);
        if lo.temp <= temperature && temperature < hi.temp {
            let span = hi.temp - lo.temp;
            if span <= 0.0 {
                // Degenerate bracket with equal temperatures.
                return lo.speed;
            }
            let frac = (temperature - lo.temp) / span;
            return (lo.speed as f64 + frac * (hi.speed as f64 - lo.speed as f64)) as u8;
        }
    }

    last.speed
}
