//! The remote object store boundary.
//!
//! Objects are opaque byte blobs addressed by [`ObjectKey`]
//! (`{studyId}/{prefix}_{type}`).

mod file;
mod key;
mod memory;

pub use file::FileObjectStore;
pub use key::ObjectKey;
pub use memory::InMemoryObjectStore;

use async_trait::async_trait;

use crate::error::StoreResult;

/// Per-upload options.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct UploadOptions {
    /// The object may be cached indefinitely by clients and CDNs.
    pub cache: bool,
    /// Overwrite an existing object instead of failing with
    /// [`StoreError::AlreadyExists`](crate::StoreError::AlreadyExists).
    pub upsert: bool,
}

impl UploadOptions {
    /// Content-addressed blobs: immutable, cacheable.
    pub const IMMUTABLE: Self = Self {
        cache: true,
        upsert: true,
    };

    /// Mutable documents: overwritten in place, never cached.
    pub const MUTABLE: Self = Self {
        cache: false,
        upsert: true,
    };

    /// Create the object only if nothing is stored under the key yet.
    pub const CREATE_ONLY: Self = Self {
        cache: false,
        upsert: false,
    };
}

impl Default for UploadOptions {
    fn default() -> Self {
        Self::MUTABLE
    }
}

/// Namespaced blob storage shared by every client of a study.
///
/// There are no transactions and no locking: concurrent uploads to the
/// same key are last-write-wins.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Store `data` under `key`.
    async fn upload(&self, key: &ObjectKey, data: Vec<u8>, options: UploadOptions)
        -> StoreResult<()>;

    /// Fetch the object under `key`.
    ///
    /// Returns `Ok(None)` if the object does not exist.
    async fn download(&self, key: &ObjectKey) -> StoreResult<Option<Vec<u8>>>;

    /// Remove objects. Missing keys are skipped; returns how many existed.
    async fn remove(&self, keys: &[ObjectKey]) -> StoreResult<usize>;

    /// Check whether an object exists.
    async fn exists(&self, key: &ObjectKey) -> StoreResult<bool> {
        Ok(self.download(key).await?.is_some())
    }
}
