use serde::{Deserialize, Serialize};

use crate::estimate;

/// Tap-sampling window below which a measured rate is considered too noisy
pub const TAP_WINDOW_MS: i64 = 6_000;

/// Allowed drop factor range in drops per millilitre
pub const DROP_FACTOR_RANGE: (u32, u32) = (10, 60);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, strum_macros::Display)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum SpeedLevel {
    Slow,
    Medium,
    Fast,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, strum_macros::Display)]
pub enum VolumePreset {
    #[serde(rename = "100")]
    #[strum(serialize = "100")]
    Small,
    #[serde(rename = "200")]
    #[strum(serialize = "200")]
    Standard,
    #[serde(rename = "custom")]
    #[strum(serialize = "custom")]
    Custom,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, strum_macros::Display)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum CalibrationLevel {
    High,
    Half,
    Low,
}

impl CalibrationLevel {
    /// Fraction of the bag still remaining for this visual bucket
    pub fn remaining_ratio(self) -> f64 {
        match self {
            CalibrationLevel::High => 0.75,
            CalibrationLevel::Half => 0.5,
            CalibrationLevel::Low => 0.25,
        }
    }
}

/// A single infusion being configured, timed, or reviewed.
///
/// All timestamps are epoch milliseconds supplied by the caller, so the state
/// machine itself is deterministic. Lifecycle flags are mutually constrained:
/// never running and completed at once, and paused only while running.
#[derive(Debug, Clone, PartialEq)]
pub struct InfusionSession {
    pub volume: f64,
    pub volume_preset: VolumePreset,
    pub custom_volume: f64,
    pub speed_level: SpeedLevel,
    pub drop_factor: u32,
    pub is_running: bool,
    pub is_paused: bool,
    pub is_completed: bool,
    pub start_time: Option<i64>,
    pub pause_time: Option<i64>,
    pub total_paused_duration: i64,
    pub estimated_minutes: f64,
    pub calibration: Option<CalibrationLevel>,
    pub tap_count: u32,
    pub first_tap_time: Option<i64>,
    pub last_tap_time: Option<i64>,
    pub measured_drops_per_minute: u32,
}

impl Default for InfusionSession {
    fn default() -> Self {
        Self {
            volume: 200.0,
            volume_preset: VolumePreset::Standard,
            custom_volume: 200.0,
            speed_level: SpeedLevel::Medium,
            drop_factor: 20,
            is_running: false,
            is_paused: false,
            is_completed: false,
            start_time: None,
            pause_time: None,
            total_paused_duration: 0,
            estimated_minutes: 0.0,
            calibration: None,
            tap_count: 0,
            first_tap_time: None,
            last_tap_time: None,
            measured_drops_per_minute: 0,
        }
    }
}

impl InfusionSession {
    pub fn set_volume_preset(&mut self, preset: VolumePreset) {
        self.volume_preset = preset;
        self.volume = match preset {
            VolumePreset::Small => 100.0,
            VolumePreset::Standard => 200.0,
            VolumePreset::Custom => self.custom_volume,
        };
    }

    /// Only meaningful while the preset is `Custom`; non-finite or negative
    /// input collapses to zero rather than raising.
    pub fn set_custom_volume(&mut self, volume_ml: f64) {
        let volume_ml = if volume_ml.is_finite() && volume_ml > 0.0 {
            volume_ml
        } else {
            0.0
        };
        self.custom_volume = volume_ml;
        self.volume = volume_ml;
    }

    pub fn set_speed_level(&mut self, level: SpeedLevel) {
        self.speed_level = level;
    }

    pub fn set_drop_factor(&mut self, drops_per_ml: u32) {
        let (lo, hi) = DROP_FACTOR_RANGE;
        self.drop_factor = drops_per_ml.clamp(lo, hi);
    }

    pub fn recalculate_estimate(&mut self) {
        self.estimated_minutes = estimate::estimated_minutes(
            self.volume,
            self.drop_factor,
            self.speed_level,
            self.measured_drops_per_minute,
        );
    }

    /// Begin (or restart) timing. Valid from any state; a fresh estimate is
    /// derived from the current configuration and pause accounting restarts.
    pub fn start(&mut self, now_ms: i64) {
        self.recalculate_estimate();
        self.is_running = true;
        self.is_paused = false;
        self.is_completed = false;
        self.start_time = Some(now_ms);
        self.pause_time = None;
        self.total_paused_duration = 0;
        self.calibration = None;
    }

    pub fn pause(&mut self, now_ms: i64) {
        if !self.is_running || self.is_paused {
            return;
        }
        self.is_paused = true;
        self.pause_time = Some(now_ms);
    }

    pub fn resume(&mut self, now_ms: i64) {
        let Some(pause_time) = self.pause_time else {
            return;
        };
        if !self.is_running || !self.is_paused {
            return;
        }
        self.total_paused_duration += now_ms - pause_time;
        self.pause_time = None;
        self.is_paused = false;
    }

    pub fn complete(&mut self) {
        self.is_running = false;
        self.is_paused = false;
        self.is_completed = true;
    }

    /// Return to a clean idle session. Configuration (volume, speed, drop
    /// factor) survives; lifecycle, calibration, and tap state do not.
    pub fn reset(&mut self) {
        self.is_running = false;
        self.is_paused = false;
        self.is_completed = false;
        self.start_time = None;
        self.pause_time = None;
        self.total_paused_duration = 0;
        self.estimated_minutes = 0.0;
        self.calibration = None;
        self.reset_taps();
    }

    /// User-felt "faster/slower" correction without recomputation
    pub fn adjust_estimate(&mut self, delta_minutes: f64) {
        self.estimated_minutes = (self.estimated_minutes + delta_minutes).max(0.0);
    }

    /// Re-estimate remaining time from an observed remaining-volume bucket.
    ///
    /// `Half` is read as on-track and leaves the estimate alone. Ignored when
    /// the session never started or too little running time has elapsed to
    /// infer a rate from.
    pub fn set_calibration(&mut self, level: CalibrationLevel, now_ms: i64) {
        if self.start_time.is_none() {
            return;
        }

        match level {
            CalibrationLevel::Half => {
                self.calibration = Some(level);
            }
            CalibrationLevel::High | CalibrationLevel::Low => {
                let elapsed = self.elapsed_ms(now_ms);
                let Some(projected) =
                    estimate::recalibrated_minutes(self.volume, level.remaining_ratio(), elapsed)
                else {
                    return;
                };
                self.estimated_minutes = projected;
                self.calibration = Some(level);
            }
        }
    }

    /// Count one observed drop. The first tap opens the sampling window; the
    /// measured rate only updates once the window spans [`TAP_WINDOW_MS`], so
    /// a couple of rapid taps cannot produce a wild rate.
    pub fn tap_for_speed(&mut self, now_ms: i64) {
        let Some(first_tap) = self.first_tap_time else {
            self.first_tap_time = Some(now_ms);
            self.last_tap_time = Some(now_ms);
            self.tap_count = 1;
            return;
        };

        self.tap_count += 1;
        self.last_tap_time = Some(now_ms);

        let window_ms = now_ms - first_tap;
        if window_ms >= TAP_WINDOW_MS {
            self.measured_drops_per_minute = estimate::tapped_rate(self.tap_count, window_ms);
        }
    }

    /// Discard the sampling window and any measured rate. Usable whether or
    /// not a session is running.
    pub fn reset_taps(&mut self) {
        self.tap_count = 0;
        self.first_tap_time = None;
        self.last_tap_time = None;
        self.measured_drops_per_minute = 0;
    }

    /// Elapsed running time in milliseconds, excluding paused stretches.
    /// Frozen at the pause point while paused.
    pub fn elapsed_ms(&self, now_ms: i64) -> i64 {
        let Some(start) = self.start_time else {
            return 0;
        };
        let reference = self.pause_time.unwrap_or(now_ms);
        (reference - start - self.total_paused_duration).max(0)
    }

    pub fn elapsed_minutes(&self, now_ms: i64) -> f64 {
        self.elapsed_ms(now_ms) as f64 / 60_000.0
    }

    pub fn remaining_minutes(&self, now_ms: i64) -> f64 {
        (self.estimated_minutes - self.elapsed_minutes(now_ms)).max(0.0)
    }

    /// Fraction of the estimate consumed so far, in [0, 1]
    pub fn progress_ratio(&self, now_ms: i64) -> f64 {
        if self.estimated_minutes <= 0.0 {
            return 0.0;
        }
        (self.elapsed_minutes(now_ms) / self.estimated_minutes).min(1.0)
    }
}
