use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use cohort_types::{StudyId, StudyRecord};
use tokio::sync::Mutex;

use super::{RegistryRow, StudyRegistry};
use crate::atomic;
use crate::error::{StoreError, StoreResult};

/// Registry backed by one JSON file per study: `{root}/{studyId}.json`.
///
/// Writers within this process are serialized by an async mutex, which
/// makes `insert` and `compare_and_swap` atomic for every client sharing
/// this instance. Separate processes sharing a directory get
/// last-write-wins.
#[derive(Debug)]
pub struct FileStudyRegistry {
    root: PathBuf,
    write_lock: Mutex<()>,
}

impl FileStudyRegistry {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            write_lock: Mutex::new(()),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn path_for(&self, study_id: &StudyId) -> PathBuf {
        self.root.join(format!("{study_id}.json"))
    }

    async fn read_row(&self, study_id: &StudyId) -> StoreResult<Option<RegistryRow>> {
        match tokio::fs::read(self.path_for(study_id)).await {
            Ok(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn write_row(&self, row: &RegistryRow) -> StoreResult<()> {
        let bytes = serde_json::to_vec_pretty(row)?;
        atomic::persist_async(&self.path_for(&row.study_id), bytes, true).await
    }
}

#[async_trait]
impl StudyRegistry for FileStudyRegistry {
    async fn insert(&self, study_id: &StudyId, data: &StudyRecord) -> StoreResult<RegistryRow> {
        let _guard = self.write_lock.lock().await;
        if self.read_row(study_id).await?.is_some() {
            return Err(StoreError::DuplicateKey(study_id.clone()));
        }
        let row = RegistryRow {
            study_id: study_id.clone(),
            revision: 1,
            data: data.clone(),
        };
        self.write_row(&row).await?;
        Ok(row)
    }

    async fn select(&self, study_id: &StudyId) -> StoreResult<Option<RegistryRow>> {
        self.read_row(study_id).await
    }

    async fn update(&self, study_id: &StudyId, data: &StudyRecord) -> StoreResult<RegistryRow> {
        let _guard = self.write_lock.lock().await;
        let mut row = self
            .read_row(study_id)
            .await?
            .ok_or_else(|| StoreError::NotFound(study_id.to_string()))?;
        row.revision += 1;
        row.data = data.clone();
        self.write_row(&row).await?;
        Ok(row)
    }

    async fn compare_and_swap(
        &self,
        study_id: &StudyId,
        expected_revision: u64,
        data: &StudyRecord,
    ) -> StoreResult<RegistryRow> {
        let _guard = self.write_lock.lock().await;
        let mut row = self
            .read_row(study_id)
            .await?
            .ok_or_else(|| StoreError::NotFound(study_id.to_string()))?;
        if row.revision != expected_revision {
            return Err(StoreError::Conflict {
                study_id: study_id.clone(),
                expected: expected_revision,
                actual: row.revision,
            });
        }
        row.revision += 1;
        row.data = data.clone();
        self.write_row(&row).await?;
        Ok(row)
    }
}
