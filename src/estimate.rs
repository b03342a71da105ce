//! Drip-rate estimation math.
//!
//! All functions here are pure; the session state machine feeds them its own
//! fields and an externally supplied timestamp.

use crate::session::SpeedLevel;

/// Fixed multiplier biasing estimates toward overestimating remaining time
pub const SAFETY_FACTOR: f64 = 1.1;

/// Calibration taps are ignored until this much running time has elapsed,
/// otherwise the inferred rate divides by a near-zero interval.
pub const MIN_CALIBRATION_ELAPSED_MS: i64 = 5_000;

/// Documented clinical drops-per-minute range for a speed preset
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SpeedRange {
    pub min: u32,
    pub max: u32,
    pub avg: u32,
}

pub fn speed_range(level: SpeedLevel) -> SpeedRange {
    match level {
        SpeedLevel::Slow => SpeedRange {
            min: 15,
            max: 30,
            avg: 20,
        },
        SpeedLevel::Medium => SpeedRange {
            min: 40,
            max: 60,
            avg: 50,
        },
        SpeedLevel::Fast => SpeedRange {
            min: 70,
            max: 100,
            avg: 85,
        },
    }
}

/// Estimated total infusion duration in whole minutes.
///
/// A measured drip rate always takes precedence over the preset average.
pub fn estimated_minutes(
    volume_ml: f64,
    drop_factor: u32,
    speed_level: SpeedLevel,
    measured_drops_per_minute: u32,
) -> f64 {
    let drops_per_minute = if measured_drops_per_minute > 0 {
        measured_drops_per_minute as f64
    } else {
        speed_range(speed_level).avg as f64
    };

    let total_drops = volume_ml * drop_factor as f64;
    (total_drops / drops_per_minute * SAFETY_FACTOR).round()
}

/// Project a new estimate from an observed remaining-volume ratio.
///
/// Infers the effective rate from how much volume was used over the elapsed
/// running time, then projects the remaining volume at that rate. Returns
/// `None` when the elapsed window is too short to divide by.
pub fn recalibrated_minutes(volume_ml: f64, remaining_ratio: f64, elapsed_ms: i64) -> Option<f64> {
    if elapsed_ms < MIN_CALIBRATION_ELAPSED_MS {
        return None;
    }

    let elapsed_minutes = elapsed_ms as f64 / 60_000.0;
    let used_ratio = 1.0 - remaining_ratio;
    let current_rate = volume_ml * used_ratio / elapsed_minutes;
    let projected = volume_ml * remaining_ratio / current_rate * SAFETY_FACTOR;

    if projected.is_finite() {
        Some(projected.max(0.0))
    } else {
        None
    }
}

/// Drops per minute from a tap-sampling window, rounded to the nearest drop
pub fn tapped_rate(tap_count: u32, window_ms: i64) -> u32 {
    let window_minutes = window_ms as f64 / 60_000.0;
    (tap_count as f64 / window_minutes).round() as u32
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn speed_averages_sit_mid_range() {
        assert_eq!(speed_range(SpeedLevel::Slow).avg, 20);
        assert_eq!(speed_range(SpeedLevel::Medium).avg, 50);
        assert_eq!(speed_range(SpeedLevel::Fast).avg, 85);
    }

    #[test]
    fn estimate_matches_documented_example() {
        // 200ml * 20 gtt/ml = 4000 drops, at 50/min -> 80min, * 1.1 -> 88
        assert_eq!(estimated_minutes(200.0, 20, SpeedLevel::Medium, 0), 88.0);
    }

    #[test]
    fn estimate_uses_preset_average_when_unmeasured() {
        assert_eq!(estimated_minutes(100.0, 20, SpeedLevel::Slow, 0), 110.0);
        assert_eq!(estimated_minutes(100.0, 20, SpeedLevel::Fast, 0), 26.0);
    }

    #[test]
    fn measured_rate_overrides_preset() {
        let with_preset = estimated_minutes(200.0, 20, SpeedLevel::Medium, 0);
        let with_measured = estimated_minutes(200.0, 20, SpeedLevel::Medium, 40);
        assert_eq!(with_measured, 110.0);
        assert_ne!(with_preset, with_measured);

        // speed level is irrelevant once a rate was measured
        assert_eq!(estimated_minutes(200.0, 20, SpeedLevel::Fast, 40), 110.0);
    }

    #[test]
    fn recalibration_projects_remaining_volume() {
        // 30min elapsed, a quarter of the bag used: rate = v*0.25/30,
        // remaining 0.75 of the bag -> 90min, * 1.1 -> 99
        let projected = recalibrated_minutes(200.0, 0.75, 30 * 60_000).unwrap();
        assert!((projected - 99.0).abs() < 1e-9);

        // three quarters used in 30min -> 10min left, * 1.1 -> 11
        let projected = recalibrated_minutes(200.0, 0.25, 30 * 60_000).unwrap();
        assert!((projected - 11.0).abs() < 1e-9);
    }

    #[test]
    fn recalibration_rejects_short_elapsed_window() {
        assert_eq!(recalibrated_minutes(200.0, 0.75, 0), None);
        assert_eq!(recalibrated_minutes(200.0, 0.75, MIN_CALIBRATION_ELAPSED_MS - 1), None);
        assert!(recalibrated_minutes(200.0, 0.75, MIN_CALIBRATION_ELAPSED_MS).is_some());
    }

    #[test]
    fn tapped_rate_rounds_to_whole_drops() {
        // 6 taps over exactly 6 seconds = 0.1 minutes -> 60/min
        assert_eq!(tapped_rate(6, 6_000), 60);
        // 7 taps over 9 seconds -> 46.67 -> 47
        assert_eq!(tapped_rate(7, 9_000), 47);
    }
}
