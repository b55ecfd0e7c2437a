use std::collections::HashMap;
use std::sync::RwLock;

use async_trait::async_trait;
use cohort_types::{StudyId, StudyRecord};

use super::{RegistryRow, StudyRegistry};
use crate::error::{StoreError, StoreResult};

/// An in-memory implementation of [`StudyRegistry`].
///
/// All rows live in a `HashMap` behind a `RwLock`. Data is lost when the
/// registry is dropped.
#[derive(Debug, Default)]
pub struct InMemoryStudyRegistry {
    rows: RwLock<HashMap<StudyId, RegistryRow>>,
}

impl InMemoryStudyRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of studies with a row.
    pub fn len(&self) -> usize {
        self.rows.read().expect("lock poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl StudyRegistry for InMemoryStudyRegistry {
    async fn insert(&self, study_id: &StudyId, data: &StudyRecord) -> StoreResult<RegistryRow> {
        let mut rows = self.rows.write().expect("lock poisoned");
        if rows.contains_key(study_id) {
            return Err(StoreError::DuplicateKey(study_id.clone()));
        }
        let row = RegistryRow {
            study_id: study_id.clone(),
            revision: 1,
            data: data.clone(),
        };
        rows.insert(study_id.clone(), row.clone());
        Ok(row)
    }

    async fn select(&self, study_id: &StudyId) -> StoreResult<Option<RegistryRow>> {
        let rows = self.rows.read().expect("lock poisoned");
        Ok(rows.get(study_id).cloned())
    }

    async fn update(&self, study_id: &StudyId, data: &StudyRecord) -> StoreResult<RegistryRow> {
        let mut rows = self.rows.write().expect("lock poisoned");
        let row = rows
            .get_mut(study_id)
            .ok_or_else(|| StoreError::NotFound(study_id.to_string()))?;
        row.revision += 1;
        row.data = data.clone();
        Ok(row.clone())
    }

    async fn compare_and_swap(
        &self,
        study_id: &StudyId,
        expected_revision: u64,
        data: &StudyRecord,
    ) -> StoreResult<RegistryRow> {
        let mut rows = self.rows.write().expect("lock poisoned");
        let row = rows
            .get_mut(study_id)
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
        Ok(row.clone())
    }
}
