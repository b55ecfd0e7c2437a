use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::RwLock;

use async_trait::async_trait;

use super::{ObjectKey, ObjectStore, UploadOptions};
use crate::error::{StoreError, StoreResult};

#[derive(Clone, Debug)]
struct StoredBlob {
    data: Vec<u8>,
    cached: bool,
}

/// In-memory, HashMap-based object store.
///
/// Intended for tests and embedding. Counts successful uploads so callers
/// can assert on write volume, and can be switched offline to exercise
/// backend-failure paths.
pub struct InMemoryObjectStore {
    objects: RwLock<HashMap<ObjectKey, StoredBlob>>,
    uploads: AtomicU64,
    offline: AtomicBool,
}

impl InMemoryObjectStore {
    /// Create a new empty in-memory store.
    pub fn new() -> Self {
        Self {
            objects: RwLock::new(HashMap::new()),
            uploads: AtomicU64::new(0),
            offline: AtomicBool::new(false),
        }
    }

    /// Number of objects currently stored.
    pub fn len(&self) -> usize {
        self.objects.read().expect("lock poisoned").len()
    }

    /// Returns `true` if the store is empty.
    pub fn is_empty(&self) -> bool {
        self.objects.read().expect("lock poisoned").is_empty()
    }

    /// Total successful uploads since creation.
    pub fn upload_count(&self) -> u64 {
        self.uploads.load(Ordering::SeqCst)
    }

    /// Whether the object under `key` was uploaded as cacheable.
    pub fn is_cached(&self, key: &ObjectKey) -> Option<bool> {
        let map = self.objects.read().expect("lock poisoned");
        map.get(key).map(|blob| blob.cached)
    }

    /// Make every subsequent operation fail with [`StoreError::Backend`].
    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    /// Return a sorted list of all keys in the store.
    pub fn all_keys(&self) -> Vec<ObjectKey> {
        let map = self.objects.read().expect("lock poisoned");
        let mut keys: Vec<ObjectKey> = map.keys().cloned().collect();
        keys.sort();
        keys
    }

    fn check_online(&self) -> StoreResult<()> {
        if self.offline.load(Ordering::SeqCst) {
            return Err(StoreError::Backend("object store unavailable".into()));
        }
        Ok(())
    }
}

impl Default for InMemoryObjectStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ObjectStore for InMemoryObjectStore {
    async fn upload(
        &self,
        key: &ObjectKey,
        data: Vec<u8>,
        options: UploadOptions,
    ) -> StoreResult<()> {
        self.check_online()?;
        let mut map = self.objects.write().expect("lock poisoned");
        if !options.upsert && map.contains_key(key) {
            return Err(StoreError::AlreadyExists(key.path()));
        }
        map.insert(
            key.clone(),
            StoredBlob {
                data,
                cached: options.cache,
            },
        );
        self.uploads.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn download(&self, key: &ObjectKey) -> StoreResult<Option<Vec<u8>>> {
        self.check_online()?;
        let map = self.objects.read().expect("lock poisoned");
        Ok(map.get(key).map(|blob| blob.data.clone()))
    }

    async fn remove(&self, keys: &[ObjectKey]) -> StoreResult<usize> {
        self.check_online()?;
        let mut map = self.objects.write().expect("lock poisoned");
        Ok(keys.iter().filter(|key| map.remove(*key).is_some()).count())
    }
}

impl std::fmt::Debug for InMemoryObjectStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InMemoryObjectStore")
            .field("object_count", &self.len())
            .field("upload_count", &self.upload_count())
            .finish()
    }
}
