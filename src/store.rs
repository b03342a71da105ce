//! The single logical owner of the live session.
//!
//! Wraps the state machine with a clock and the snapshot gateway: every action
//! mutates in-memory state first, then persists synchronously. Persistence is
//! best-effort; a failed write is logged and the in-memory session stays
//! authoritative.

use chrono::{Local, TimeZone};

use crate::clock::Clock;
use crate::config::Config;
use crate::history::{HistoryDb, InfusionRecord};
use crate::persist::SnapshotGateway;
use crate::session::{CalibrationLevel, InfusionSession, SpeedLevel, VolumePreset};
use crate::storage::KeyValueStore;

pub struct InfusionStore<C: Clock, S: KeyValueStore> {
    session: InfusionSession,
    clock: C,
    gateway: SnapshotGateway<S>,
    history: Option<HistoryDb>,
}

impl<C: Clock, S: KeyValueStore> InfusionStore<C, S> {
    /// Restore from a persisted snapshot, or start cold with the configured
    /// defaults when none is valid.
    pub fn new(clock: C, gateway: SnapshotGateway<S>, defaults: &Config) -> Self {
        let now = clock.now_ms();
        let session = match gateway.load(now) {
            Ok(Some(snapshot)) => snapshot.into_session(),
            Ok(None) => {
                let mut session = InfusionSession::default();
                defaults.apply_to(&mut session);
                session
            }
            Err(e) => {
                log::warn!("session snapshot unavailable: {e}");
                let mut session = InfusionSession::default();
                defaults.apply_to(&mut session);
                session
            }
        };

        Self {
            session,
            clock,
            gateway,
            history: None,
        }
    }

    pub fn with_history(mut self, history: HistoryDb) -> Self {
        self.history = Some(history);
        self
    }

    pub fn session(&self) -> &InfusionSession {
        &self.session
    }

    pub fn now_ms(&self) -> i64 {
        self.clock.now_ms()
    }

    // -- configuration -------------------------------------------------------

    pub fn set_volume_preset(&mut self, preset: VolumePreset) {
        self.session.set_volume_preset(preset);
        self.persist();
    }

    pub fn set_custom_volume(&mut self, volume_ml: f64) {
        self.session.set_custom_volume(volume_ml);
        self.persist();
    }

    pub fn set_speed_level(&mut self, level: SpeedLevel) {
        self.session.set_speed_level(level);
        self.persist();
    }

    pub fn set_drop_factor(&mut self, drops_per_ml: u32) {
        self.session.set_drop_factor(drops_per_ml);
        self.persist();
    }

    // -- lifecycle -----------------------------------------------------------

    pub fn start_infusion(&mut self) {
        let now = self.clock.now_ms();
        self.session.start(now);
        self.persist();
    }

    pub fn pause_infusion(&mut self) {
        let now = self.clock.now_ms();
        self.session.pause(now);
        self.persist();
    }

    pub fn resume_infusion(&mut self) {
        let now = self.clock.now_ms();
        self.session.resume(now);
        self.persist();
    }

    /// Mark the infusion finished and append it to history. Idempotent;
    /// repeat calls change nothing and record nothing.
    pub fn complete_infusion(&mut self) {
        let was_running = self.session.is_running;
        let now = self.clock.now_ms();
        let actual_minutes = self.session.elapsed_minutes(now);

        self.session.complete();
        self.persist();

        if was_running {
            self.record_completed(now, actual_minutes);
        }
    }

    /// Single reset path for both "stop" and "delete record": returns to a
    /// clean idle session, keeping configuration.
    pub fn reset(&mut self) {
        self.session.reset();
        self.persist();
    }

    // -- estimation ----------------------------------------------------------

    pub fn adjust_estimate(&mut self, delta_minutes: f64) {
        self.session.adjust_estimate(delta_minutes);
        self.persist();
    }

    pub fn set_calibration(&mut self, level: CalibrationLevel) {
        let now = self.clock.now_ms();
        self.session.set_calibration(level, now);
        self.persist();
    }

    pub fn tap_for_speed(&mut self) {
        let now = self.clock.now_ms();
        self.session.tap_for_speed(now);
        self.persist();
    }

    pub fn reset_taps(&mut self) {
        self.session.reset_taps();
        self.persist();
    }

    // -- periodic tick -------------------------------------------------------

    /// Host-driven recompute point. Auto-completes the session once the
    /// countdown reaches zero; returns true when that transition fired.
    pub fn on_tick(&mut self) -> bool {
        let now = self.clock.now_ms();
        if self.session.is_running
            && !self.session.is_paused
            && self.session.estimated_minutes > 0.0
            && self.session.remaining_minutes(now) <= 0.0
        {
            self.complete_infusion();
            return true;
        }
        false
    }

    // -- queries -------------------------------------------------------------

    pub fn elapsed_minutes(&self) -> f64 {
        self.session.elapsed_minutes(self.clock.now_ms())
    }

    pub fn remaining_minutes(&self) -> f64 {
        self.session.remaining_minutes(self.clock.now_ms())
    }

    pub fn progress_ratio(&self) -> f64 {
        self.session.progress_ratio(self.clock.now_ms())
    }

    // -- internals -----------------------------------------------------------

    fn persist(&self) {
        let now = self.clock.now_ms();
        if let Err(e) = self.gateway.save(&self.session, now) {
            log::warn!("failed to persist session snapshot: {e}");
        }
    }

    fn record_completed(&self, now_ms: i64, actual_minutes: f64) {
        let Some(ref history) = self.history else {
            return;
        };
        let Some(started_at) = self
            .session
            .start_time
            .and_then(|t| Local.timestamp_millis_opt(t).single())
        else {
            return;
        };
        let Some(completed_at) = Local.timestamp_millis_opt(now_ms).single() else {
            return;
        };

        let record = InfusionRecord {
            started_at,
            completed_at,
            volume_ml: self.session.volume,
            drop_factor: self.session.drop_factor,
            speed_level: self.session.speed_level.to_string(),
            measured_drops_per_minute: self.session.measured_drops_per_minute,
            estimated_minutes: self.session.estimated_minutes,
            actual_minutes,
        };

        if let Err(e) = history.record(&record) {
            log::warn!("failed to record completed infusion: {e}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::persist::{SnapshotGateway, SNAPSHOT_KEY};
    use crate::storage::{MemoryStore, StorageError};
    use std::rc::Rc;

    const T0: i64 = 1_700_000_000_000;
    const MINUTE: i64 = 60_000;

    fn build_store() -> (Rc<ManualClock>, InfusionStore<Rc<ManualClock>, MemoryStore>) {
        let clock = Rc::new(ManualClock::new(T0));
        let gateway = SnapshotGateway::new(MemoryStore::new());
        let store = InfusionStore::new(Rc::clone(&clock), gateway, &Config::default());
        (clock, store)
    }

    #[test]
    fn cold_start_applies_configured_defaults() {
        let clock = Rc::new(ManualClock::new(T0));
        let gateway = SnapshotGateway::new(MemoryStore::new());
        let defaults = Config {
            volume_preset: VolumePreset::Small,
            custom_volume_ml: 200.0,
            speed_level: SpeedLevel::Fast,
            drop_factor: 30,
        };

        let store = InfusionStore::new(clock, gateway, &defaults);

        assert_eq!(store.session().volume, 100.0);
        assert_eq!(store.session().speed_level, SpeedLevel::Fast);
        assert_eq!(store.session().drop_factor, 30);
        assert!(!store.session().is_running);
    }

    #[test]
    fn restores_running_session_from_snapshot() {
        let clock = Rc::new(ManualClock::new(T0));
        let seed_gateway = SnapshotGateway::new(MemoryStore::new());
        let mut seed =
            InfusionStore::new(Rc::clone(&clock), seed_gateway, &Config::default());
        seed.start_infusion();
        clock.advance(5 * MINUTE);
        seed.pause_infusion();

        // move the persisted bytes into a fresh process's store
        let bytes = seed
            .gateway
            .store()
            .get(SNAPSHOT_KEY)
            .unwrap()
            .expect("snapshot written");
        let new_backend = MemoryStore::new();
        new_backend.set(SNAPSHOT_KEY, &bytes).unwrap();

        clock.advance(MINUTE);
        let restored = InfusionStore::new(
            Rc::clone(&clock),
            SnapshotGateway::new(new_backend),
            &Config::default(),
        );

        assert!(restored.session().is_running);
        assert!(restored.session().is_paused);
        assert_eq!(restored.session().start_time, Some(T0));
        assert_eq!(restored.session().pause_time, Some(T0 + 5 * MINUTE));
    }

    #[test]
    fn every_action_triggers_one_persisted_write() {
        let (_clock, mut store) = build_store();
        let before = store.gateway.store().write_count();

        store.set_volume_preset(VolumePreset::Small);
        store.set_custom_volume(150.0);
        store.set_speed_level(SpeedLevel::Slow);
        store.set_drop_factor(15);
        store.start_infusion();
        store.pause_infusion();
        store.resume_infusion();
        store.adjust_estimate(5.0);
        store.tap_for_speed();
        store.reset_taps();
        store.complete_infusion();
        store.reset();

        assert_eq!(store.gateway.store().write_count(), before + 12);
    }

    #[test]
    fn failed_save_leaves_memory_state_authoritative() {
        struct RejectingStore;
        impl KeyValueStore for RejectingStore {
            fn get(&self, _key: &str) -> Result<Option<Vec<u8>>, StorageError> {
                Ok(None)
            }
            fn set(&self, _key: &str, _value: &[u8]) -> Result<(), StorageError> {
                Err(StorageError::Unavailable("quota exceeded".into()))
            }
            fn delete(&self, _key: &str) -> Result<(), StorageError> {
                Ok(())
            }
        }

        let clock = Rc::new(ManualClock::new(T0));
        let gateway = SnapshotGateway::new(RejectingStore);
        let mut store = InfusionStore::new(clock, gateway, &Config::default());

        store.start_infusion();

        assert!(store.session().is_running);
        assert_eq!(store.session().start_time, Some(T0));
    }

    #[test]
    fn tick_auto_completes_when_countdown_reaches_zero() {
        let (clock, mut store) = build_store();
        store.start_infusion();
        assert_eq!(store.session().estimated_minutes, 88.0);

        clock.advance(87 * MINUTE);
        assert!(!store.on_tick());
        assert!(store.session().is_running);

        clock.advance(MINUTE);
        assert!(store.on_tick());
        assert!(store.session().is_completed);
        assert!(!store.session().is_running);

        // subsequent ticks are quiet
        clock.advance(MINUTE);
        assert!(!store.on_tick());
    }

    #[test]
    fn tick_is_inert_while_paused() {
        let (clock, mut store) = build_store();
        store.start_infusion();
        store.pause_infusion();

        clock.advance(500 * MINUTE);
        assert!(!store.on_tick());
        assert!(store.session().is_running);
        assert!(!store.session().is_completed);
    }

    #[test]
    fn completion_appends_one_history_record() {
        let dir = tempfile::tempdir().unwrap();
        let history = HistoryDb::open(&dir.path().join("history.db")).unwrap();

        let clock = Rc::new(ManualClock::new(T0));
        let gateway = SnapshotGateway::new(MemoryStore::new());
        let mut store = InfusionStore::new(Rc::clone(&clock), gateway, &Config::default())
            .with_history(history);

        store.start_infusion();
        clock.advance(90 * MINUTE);
        store.complete_infusion();
        // idempotent repeat must not double-record
        store.complete_infusion();

        let history = store.history.as_ref().unwrap();
        assert_eq!(history.count().unwrap(), 1);
        let records = history.recent(1).unwrap();
        assert_eq!(records[0].actual_minutes, 90.0);
        assert_eq!(records[0].estimated_minutes, 88.0);
        assert_eq!(records[0].speed_level, "medium");
    }

    #[test]
    fn queries_track_the_injected_clock() {
        let (clock, mut store) = build_store();
        store.start_infusion();

        clock.advance(8 * MINUTE);
        assert_eq!(store.elapsed_minutes(), 8.0);
        assert_eq!(store.remaining_minutes(), 80.0);
        assert!((store.progress_ratio() - 8.0 / 88.0).abs() < 1e-12);
    }
}
