use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use directories::ProjectDirs;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("store unavailable: {0}")]
    Unavailable(String),
    #[error("write failed: {0}")]
    Write(#[source] std::io::Error),
    #[error("delete failed: {0}")]
    Delete(#[source] std::io::Error),
    #[error("snapshot encoding failed: {0}")]
    Encode(#[source] serde_json::Error),
}

/// Opaque byte store the session snapshot is persisted through.
///
/// Absent keys are `Ok(None)`; only backend failures surface as errors, and
/// callers treat those as best-effort.
pub trait KeyValueStore {
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StorageError>;
    fn set(&self, key: &str, value: &[u8]) -> Result<(), StorageError>;
    fn delete(&self, key: &str) -> Result<(), StorageError>;
}

/// Key-value store backed by one file per key in a state directory
#[derive(Debug, Clone)]
pub struct FileStore {
    dir: PathBuf,
}

impl FileStore {
    #[allow(clippy::new_without_default)]
    pub fn new() -> Self {
        let dir = if let Some(pd) = ProjectDirs::from("", "", "dripwatch") {
            pd.data_local_dir().to_path_buf()
        } else {
            PathBuf::from(".")
        };
        Self { dir }
    }

    pub fn with_dir<P: AsRef<Path>>(dir: P) -> Self {
        Self {
            dir: dir.as_ref().to_path_buf(),
        }
    }

    fn path_for(&self, key: &str) -> PathBuf {
        self.dir.join(format!("{key}.json"))
    }
}

impl Default for FileStore {
    fn default() -> Self {
        Self::new()
    }
}

impl KeyValueStore for FileStore {
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StorageError> {
        match fs::read(self.path_for(key)) {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(StorageError::Unavailable(e.to_string())),
        }
    }

    fn set(&self, key: &str, value: &[u8]) -> Result<(), StorageError> {
        fs::create_dir_all(&self.dir).map_err(StorageError::Write)?;
        fs::write(self.path_for(key), value).map_err(StorageError::Write)
    }

    fn delete(&self, key: &str) -> Result<(), StorageError> {
        match fs::remove_file(self.path_for(key)) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(StorageError::Delete(e)),
        }
    }
}

/// In-memory store for unit tests
#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: Mutex<HashMap<String, Vec<u8>>>,
    writes: Mutex<usize>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of `set` calls observed, for write-per-action assertions
    pub fn write_count(&self) -> usize {
        *self.writes.lock().unwrap()
    }

    pub fn contains(&self, key: &str) -> bool {
        self.entries.lock().unwrap().contains_key(key)
    }
}

impl KeyValueStore for MemoryStore {
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StorageError> {
        Ok(self.entries.lock().unwrap().get(key).cloned())
    }

    fn set(&self, key: &str, value: &[u8]) -> Result<(), StorageError> {
        *self.writes.lock().unwrap() += 1;
        self.entries
            .lock()
            .unwrap()
            .insert(key.to_string(), value.to_vec());
        Ok(())
    }

    fn delete(&self, key: &str) -> Result<(), StorageError> {
        self.entries.lock().unwrap().remove(key);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn file_store_roundtrip() {
        let dir = tempdir().unwrap();
        let store = FileStore::with_dir(dir.path());

        assert_eq!(store.get("session").unwrap(), None);

        store.set("session", b"{\"x\":1}").unwrap();
        assert_eq!(store.get("session").unwrap().unwrap(), b"{\"x\":1}");

        store.delete("session").unwrap();
        assert_eq!(store.get("session").unwrap(), None);
    }

    #[test]
    fn file_store_delete_missing_key_is_ok() {
        let dir = tempdir().unwrap();
        let store = FileStore::with_dir(dir.path());
        assert!(store.delete("nope").is_ok());
    }

    #[test]
    fn file_store_creates_state_dir_on_first_write() {
        let dir = tempdir().unwrap();
        let nested = dir.path().join("state").join("dripwatch");
        let store = FileStore::with_dir(&nested);
        store.set("session", b"ok").unwrap();
        assert!(nested.join("session.json").exists());
    }

    #[test]
    fn memory_store_counts_writes() {
        let store = MemoryStore::new();
        store.set("k", b"1").unwrap();
        store.set("k", b"2").unwrap();
        assert_eq!(store.write_count(), 2);
        assert_eq!(store.get("k").unwrap().unwrap(), b"2");
    }
}
