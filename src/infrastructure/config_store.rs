use crate::domain::ports::ConfigStore;
use anyhow::{Context, Result};
use parking_lot::{Mutex, RwLock};
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::info;

/// Process-local store; contents are lost on exit
#[derive(Default)]
pub struct InMemoryConfigStore {
    values: RwLock<HashMap<String, Value>>,
}

impl InMemoryConfigStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl ConfigStore for InMemoryConfigStore {
    fn get(&self, key: &str) -> Result<Option<Value>> {
        Ok(self.values.read().get(key).cloned())
    }

    fn set(&self, key: &str, value: Value) -> Result<()> {
        self.values.write().insert(key.to_string(), value);
        Ok(())
    }
}

/// All keys live in one JSON object on disk
pub struct JsonFileConfigStore {
    file_path: PathBuf,
    // Serializes read-modify-write cycles within the process
    lock: Mutex<()>,
}

impl JsonFileConfigStore {
    pub fn new(file_path: impl Into<PathBuf>) -> Result<Self> {
        let file_path = file_path.into();
        if let Some(dir) = file_path.parent()
            && !dir.as_os_str().is_empty()
            && !dir.exists()
        {
            fs::create_dir_all(dir).context("Failed to create config store directory")?;
        }

        Ok(Self {
            file_path,
            lock: Mutex::new(()),
        })
    }

    /// `~/.sureodds/config.json`
    pub fn in_home() -> Result<Self> {
        let home = std::env::var("HOME").context("Could not find HOME directory")?;
        Self::new(PathBuf::from(home).join(".sureodds").join("config.json"))
    }

    pub fn path(&self) -> &Path {
        &self.file_path
    }

    fn load(&self) -> Result<Map<String, Value>> {
        if !self.file_path.exists() {
            return Ok(Map::new());
        }

        let content =
            fs::read_to_string(&self.file_path).context("Failed to read config store file")?;
        serde_json::from_str(&content).context("Failed to parse config store JSON")
    }

    fn save(&self, values: &Map<String, Value>) -> Result<()> {
        let content =
            serde_json::to_string_pretty(values).context("Failed to serialize config store")?;

        // Atomic write: write to temp file then rename
        let temp_path = self.file_path.with_extension("tmp");
        fs::write(&temp_path, content).context("Failed to write temp config store file")?;
        fs::rename(&temp_path, &self.file_path).context("Failed to rename config store file")?;
        Ok(())
    }
}

impl ConfigStore for JsonFileConfigStore {
    fn get(&self, key: &str) -> Result<Option<Value>> {
        let _guard = self.lock.lock();
        Ok(self.load()?.remove(key))
    }

    fn set(&self, key: &str, value: Value) -> Result<()> {
        let _guard = self.lock.lock();
        let mut values = self.load()?;
        values.insert(key.to_string(), value);
        self.save(&values)?;

        info!("Saved '{}' to {:?}", key, self.file_path);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_in_memory_round_trip() {
        let store = InMemoryConfigStore::new();
        assert_eq!(store.get("model_weights").unwrap(), None);

        store.set("model_weights", json!({"market": 0.5})).unwrap();
        assert_eq!(
            store.get("model_weights").unwrap(),
            Some(json!({"market": 0.5}))
        );
    }

    #[test]
    fn test_file_store_keeps_other_keys() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonFileConfigStore::new(dir.path().join("nested").join("config.json")).unwrap();

        store.set("model_weights", json!({"market": 0.5})).unwrap();
        store.set("risk_profiles", json!({"moderate": 1.0})).unwrap();

        let reopened = JsonFileConfigStore::new(store.path().to_path_buf()).unwrap();
        assert_eq!(
            reopened.get("model_weights").unwrap(),
            Some(json!({"market": 0.5}))
        );
        assert_eq!(
            reopened.get("risk_profiles").unwrap(),
            Some(json!({"moderate": 1.0}))
        );
        assert!(!store.path().with_extension("tmp").exists());
    }

    #[test]
    fn test_corrupt_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        fs::write(&path, "not json").unwrap();

        let store = JsonFileConfigStore::new(&path).unwrap();
        assert!(store.get("model_weights").is_err());
    }
}
