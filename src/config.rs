use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

use crate::session::{InfusionSession, SpeedLevel, VolumePreset};

/// Persisted user defaults applied to a fresh session
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Config {
    pub volume_preset: VolumePreset,
    pub custom_volume_ml: f64,
    pub speed_level: SpeedLevel,
    pub drop_factor: u32,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            volume_preset: VolumePreset::Standard,
            custom_volume_ml: 200.0,
            speed_level: SpeedLevel::Medium,
            drop_factor: 20,
        }
    }
}

impl Config {
    /// Seed an idle session with these defaults
    pub fn apply_to(&self, session: &mut InfusionSession) {
        session.set_custom_volume(self.custom_volume_ml);
        session.set_volume_preset(self.volume_preset);
        session.set_speed_level(self.speed_level);
        session.set_drop_factor(self.drop_factor);
    }

    pub fn of_session(session: &InfusionSession) -> Self {
        Self {
            volume_preset: session.volume_preset,
            custom_volume_ml: session.custom_volume,
            speed_level: session.speed_level,
            drop_factor: session.drop_factor,
        }
    }
}

pub trait ConfigStore {
    fn load(&self) -> Config;
    fn save(&self, cfg: &Config) -> std::io::Result<()>;
}

#[derive(Debug, Clone)]
pub struct FileConfigStore {
    path: PathBuf,
}

impl FileConfigStore {
    #[allow(clippy::new_without_default)]
    pub fn new() -> Self {
        let path = if let Some(pd) = ProjectDirs::from("", "", "dripwatch") {
            pd.config_dir().join("config.json")
        } else {
            PathBuf::from("dripwatch_config.json")
        };
        Self { path }
    }

    pub fn with_path<P: AsRef<Path>>(p: P) -> Self {
        Self {
            path: p.as_ref().to_path_buf(),
        }
    }
}

impl Default for FileConfigStore {
    fn default() -> Self {
        Self::new()
    }
}

impl ConfigStore for FileConfigStore {
    fn load(&self) -> Config {
        if let Ok(bytes) = fs::read(&self.path) {
            if let Ok(cfg) = serde_json::from_slice::<Config>(&bytes) {
                return cfg;
            }
        }
        Config::default()
    }

    fn save(&self, cfg: &Config) -> std::io::Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        let data = serde_json::to_vec_pretty(cfg).unwrap_or_default();
        fs::write(&self.path, data)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn roundtrip_default_config() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config.json");
        let store = FileConfigStore::with_path(&path);
        let cfg = Config::default();
        store.save(&cfg).unwrap();
        let loaded = store.load();
        assert_eq!(cfg, loaded);
    }

    #[test]
    fn save_and_load_custom_config() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config.json");
        let store = FileConfigStore::with_path(&path);
        let cfg = Config {
            volume_preset: VolumePreset::Custom,
            custom_volume_ml: 500.0,
            speed_level: SpeedLevel::Slow,
            drop_factor: 15,
        };
        store.save(&cfg).unwrap();
        let loaded = store.load();
        assert_eq!(cfg, loaded);
    }

    #[test]
    fn unreadable_config_falls_back_to_defaults() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config.json");
        fs::write(&path, b"{bad json").unwrap();
        let store = FileConfigStore::with_path(&path);
        assert_eq!(store.load(), Config::default());
    }

    #[test]
    fn config_seeds_a_session() {
        let cfg = Config {
            volume_preset: VolumePreset::Custom,
            custom_volume_ml: 350.0,
            speed_level: SpeedLevel::Fast,
            drop_factor: 60,
        };
        let mut session = InfusionSession::default();
        cfg.apply_to(&mut session);

        assert_eq!(session.volume, 350.0);
        assert_eq!(session.speed_level, SpeedLevel::Fast);
        assert_eq!(session.drop_factor, 60);
        assert_eq!(Config::of_session(&session), cfg);
    }
}
