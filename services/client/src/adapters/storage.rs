//! services/client/src/adapters/storage.rs
//!
//! Durable session storage: a single JSON object on disk, rewritten on every
//! change. It implements the `SessionStorage` port from the `core` crate.

use library_core::ports::{PortError, PortResult, SessionStorage};
use std::collections::BTreeMap;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tracing::debug;

//=========================================================================================
// The Main Adapter Struct
//=========================================================================================

pub struct FileStorage {
    path: PathBuf,
    /// Serializes read-modify-write cycles within the process.
    guard: Mutex<()>,
}

impl FileStorage {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            guard: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn read_all(&self) -> PortResult<BTreeMap<String, String>> {
        match std::fs::read_to_string(&self.path) {
            Ok(text) if text.trim().is_empty() => Ok(BTreeMap::new()),
            Ok(text) => serde_json::from_str(&text)
                .map_err(|e| PortError::Storage(format!("{}: {}", self.path.display(), e))),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(BTreeMap::new()),
            Err(e) => Err(PortError::Storage(format!("{}: {}", self.path.display(), e))),
        }
    }

    fn write_all(&self, values: &BTreeMap<String, String>) -> PortResult<()> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|e| PortError::Storage(e.to_string()))?;
        }
        let text =
            serde_json::to_string_pretty(values).map_err(|e| PortError::Storage(e.to_string()))?;
        // The file is replaced atomically.
        let staging = self.path.with_extension("tmp");
        std::fs::write(&staging, text).map_err(|e| PortError::Storage(e.to_string()))?;
        std::fs::rename(&staging, &self.path).map_err(|e| PortError::Storage(e.to_string()))?;
        debug!(path = %self.path.display(), keys = values.len(), "Session storage written");
        Ok(())
    }

    fn modify(&self, change: impl FnOnce(&mut BTreeMap<String, String>) -> bool) -> PortResult<()> {
        let _guard = self.guard.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        let mut values = self.read_all()?;
        if change(&mut values) {
            self.write_all(&values)?;
        }
        Ok(())
    }
}

//=========================================================================================
// `SessionStorage` Trait Implementation
//=========================================================================================

impl SessionStorage for FileStorage {
    fn load(&self, key: &str) -> PortResult<Option<String>> {
        let _guard = self.guard.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        Ok(self.read_all()?.remove(key))
    }

    fn store(&self, key: &str, value: &str) -> PortResult<()> {
        self.modify(|values| {
            values.insert(key.to_string(), value.to_string());
            true
        })
    }

    fn remove(&self, key: &str) -> PortResult<()> {
        self.modify(|values| values.remove(key).is_some())
    }
}
