use std::collections::HashMap;
use std::sync::RwLock;

use super::IdentityStore;
use crate::error::{StoreError, StoreResult};

/// An in-memory implementation of [`IdentityStore`].
#[derive(Debug, Default)]
pub struct InMemoryIdentityStore {
    entries: RwLock<HashMap<String, String>>,
}

impl InMemoryIdentityStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl IdentityStore for InMemoryIdentityStore {
    fn get(&self, key: &str) -> StoreResult<Option<String>> {
        let entries = self
            .entries
            .read()
            .map_err(|e| StoreError::Backend(format!("lock poisoned: {e}")))?;
        Ok(entries.get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> StoreResult<()> {
        let mut entries = self
            .entries
            .write()
            .map_err(|e| StoreError::Backend(format!("lock poisoned: {e}")))?;
        entries.insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove(&self, key: &str) -> StoreResult<bool> {
        let mut entries = self
            .entries
            .write()
            .map_err(|e| StoreError::Backend(format!("lock poisoned: {e}")))?;
        Ok(entries.remove(key).is_some())
    }
}
