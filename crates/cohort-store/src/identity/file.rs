use std::collections::BTreeMap;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use super::IdentityStore;
use crate::atomic;
use crate::error::{StoreError, StoreResult};

/// Identity cache persisted as a single JSON object on disk.
///
/// Every write rewrites the whole file atomically; the map is tiny (one
/// entry per study this device has joined).
#[derive(Debug)]
pub struct FileIdentityStore {
    path: PathBuf,
    lock: Mutex<()>,
}

impl FileIdentityStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn load(&self) -> StoreResult<BTreeMap<String, String>> {
        match std::fs::read(&self.path) {
            Ok(bytes) => Ok(serde_json::from_slice(&bytes)?),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(BTreeMap::new()),
            Err(e) => Err(e.into()),
        }
    }

    fn save(&self, entries: &BTreeMap<String, String>) -> StoreResult<()> {
        atomic::persist(&self.path, &serde_json::to_vec_pretty(entries)?)
    }
}

impl IdentityStore for FileIdentityStore {
    fn get(&self, key: &str) -> StoreResult<Option<String>> {
        Ok(self.load()?.remove(key))
    }

    fn set(&self, key: &str, value: &str) -> StoreResult<()> {
        let _guard = self
            .lock
            .lock()
            .map_err(|e| StoreError::Backend(format!("lock poisoned: {e}")))?;
        let mut entries = self.load()?;
        entries.insert(key.to_string(), value.to_string());
        self.save(&entries)
    }

    fn remove(&self, key: &str) -> StoreResult<bool> {
        let _guard = self
            .lock
            .lock()
            .map_err(|e| StoreError::Backend(format!("lock poisoned: {e}")))?;
        let mut entries = self.load()?;
        if entries.remove(key).is_none() {
            return Ok(false);
        }
        self.save(&entries)?;
        Ok(true)
    }
}
