use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tracing::debug;

use super::{ObjectKey, ObjectStore, UploadOptions};
use crate::atomic;
use crate::error::{StoreError, StoreResult};

/// Object store backed by a local directory.
///
/// Each object lives at `{root}/{studyId}/{prefix}_{type}`. Writes go
/// through a temp file and a rename, so a crash mid-write leaves the
/// previous version intact. The cache flag has no meaning on a local disk
/// and is ignored.
#[derive(Clone, Debug)]
pub struct FileObjectStore {
    root: PathBuf,
}

impl FileObjectStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn path_for(&self, key: &ObjectKey) -> PathBuf {
        self.root
            .join(key.study_id().as_str())
            .join(key.file_name())
    }
}

#[async_trait]
impl ObjectStore for FileObjectStore {
    async fn upload(
        &self,
        key: &ObjectKey,
        data: Vec<u8>,
        options: UploadOptions,
    ) -> StoreResult<()> {
        let path = self.path_for(key);
        let size = data.len();
        atomic::persist_async(&path, data, options.upsert)
            .await
            .map_err(|e| match e {
                StoreError::Io(io) if io.kind() == ErrorKind::AlreadyExists => {
                    StoreError::AlreadyExists(key.path())
                }
                other => other,
            })?;
        debug!(key = %key, size, "object written");
        Ok(())
    }

    async fn download(&self, key: &ObjectKey) -> StoreResult<Option<Vec<u8>>> {
        match tokio::fs::read(self.path_for(key)).await {
            Ok(data) => Ok(Some(data)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn remove(&self, keys: &[ObjectKey]) -> StoreResult<usize> {
        let mut removed = 0;
        for key in keys {
            match tokio::fs::remove_file(self.path_for(key)).await {
                Ok(()) => removed += 1,
                Err(e) if e.kind() == ErrorKind::NotFound => {}
                Err(e) => return Err(e.into()),
            }
        }
        Ok(removed)
    }

    async fn exists(&self, key: &ObjectKey) -> StoreResult<bool> {
        Ok(tokio::fs::try_exists(self.path_for(key)).await?)
    }
}
