//! Snapshot persistence for in-progress sessions.
//!
//! The full session state is serialized under one fixed key so an interrupted
//! process can pick the countdown back up. Snapshots are validated and aged on
//! load; anything suspect is deleted outright rather than partially trusted.

use serde::{Deserialize, Serialize};

use crate::session::{CalibrationLevel, InfusionSession, SpeedLevel, VolumePreset};
use crate::storage::{KeyValueStore, StorageError};

pub const SNAPSHOT_KEY: &str = "session";

/// Snapshots older than this are discarded on load
pub const SNAPSHOT_MAX_AGE_MS: i64 = 24 * 60 * 60 * 1000;

/// Flat serialized form of [`InfusionSession`] plus a write timestamp
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct Snapshot {
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
    pub timestamp: i64,
}

impl Snapshot {
    pub fn of_session(session: &InfusionSession, now_ms: i64) -> Self {
        Self {
            volume: session.volume,
            volume_preset: session.volume_preset,
            custom_volume: session.custom_volume,
            speed_level: session.speed_level,
            drop_factor: session.drop_factor,
            is_running: session.is_running,
            is_paused: session.is_paused,
            is_completed: session.is_completed,
            start_time: session.start_time,
            pause_time: session.pause_time,
            total_paused_duration: session.total_paused_duration,
            estimated_minutes: session.estimated_minutes,
            calibration: session.calibration,
            tap_count: session.tap_count,
            first_tap_time: session.first_tap_time,
            last_tap_time: session.last_tap_time,
            measured_drops_per_minute: session.measured_drops_per_minute,
            timestamp: now_ms,
        }
    }

    pub fn into_session(self) -> InfusionSession {
        InfusionSession {
            volume: self.volume,
            volume_preset: self.volume_preset,
            custom_volume: self.custom_volume,
            speed_level: self.speed_level,
            drop_factor: self.drop_factor,
            is_running: self.is_running,
            is_paused: self.is_paused,
            is_completed: self.is_completed,
            start_time: self.start_time,
            pause_time: self.pause_time,
            total_paused_duration: self.total_paused_duration,
            estimated_minutes: self.estimated_minutes,
            calibration: self.calibration,
            tap_count: self.tap_count,
            first_tap_time: self.first_tap_time,
            last_tap_time: self.last_tap_time,
            measured_drops_per_minute: self.measured_drops_per_minute,
        }
    }

    /// Domain validation beyond what deserialization already enforces.
    /// Enum variants and field presence are rejected by serde; this checks
    /// numeric ranges, nullable-time positivity, and snapshot age.
    fn is_valid(&self, now_ms: i64) -> bool {
        let non_negative =
            |v: f64| v.is_finite() && v >= 0.0;
        let positive_or_null = |t: Option<i64>| t.map_or(true, |v| v > 0);

        non_negative(self.volume)
            && non_negative(self.custom_volume)
            && non_negative(self.estimated_minutes)
            && (10..=60).contains(&self.drop_factor)
            && self.total_paused_duration >= 0
            && positive_or_null(self.start_time)
            && positive_or_null(self.pause_time)
            && positive_or_null(self.first_tap_time)
            && positive_or_null(self.last_tap_time)
            && !(self.is_running && self.is_completed)
            && self.timestamp > 0
            && now_ms - self.timestamp <= SNAPSHOT_MAX_AGE_MS
    }
}

/// Validating load/save boundary over an opaque byte store.
///
/// Timestamps come in from the caller so the gateway stays clock-free and
/// deterministic under test.
#[derive(Debug)]
pub struct SnapshotGateway<S: KeyValueStore> {
    store: S,
}

impl<S: KeyValueStore> SnapshotGateway<S> {
    pub fn new(store: S) -> Self {
        Self { store }
    }

    /// Stamp and write the current session state. The caller treats failure
    /// as best-effort; in-memory state stays authoritative either way.
    pub fn save(&self, session: &InfusionSession, now_ms: i64) -> Result<(), StorageError> {
        let snapshot = Snapshot::of_session(session, now_ms);
        let bytes = serde_json::to_vec(&snapshot).map_err(StorageError::Encode)?;
        self.store.set(SNAPSHOT_KEY, &bytes)
    }

    /// Load the stored snapshot if one exists and survives validation.
    ///
    /// A snapshot that fails to parse, fails domain validation, or is older
    /// than [`SNAPSHOT_MAX_AGE_MS`] is deleted and reported as absent; there
    /// is no partial-recovery path.
    pub fn load(&self, now_ms: i64) -> Result<Option<Snapshot>, StorageError> {
        let Some(bytes) = self.store.get(SNAPSHOT_KEY)? else {
            return Ok(None);
        };

        let snapshot = match serde_json::from_slice::<Snapshot>(&bytes) {
            Ok(s) => s,
            Err(e) => {
                log::warn!("discarding unreadable session snapshot: {e}");
                let _ = self.store.delete(SNAPSHOT_KEY);
                return Ok(None);
            }
        };

        if !snapshot.is_valid(now_ms) {
            log::warn!("discarding invalid or expired session snapshot");
            let _ = self.store.delete(SNAPSHOT_KEY);
            return Ok(None);
        }

        Ok(Some(snapshot))
    }

    pub fn clear(&self) -> Result<(), StorageError> {
        self.store.delete(SNAPSHOT_KEY)
    }

    pub fn store(&self) -> &S {
        &self.store
    }
}
