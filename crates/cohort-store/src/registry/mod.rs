//! The study metadata registry boundary.
//!
//! One row per study holds a small JSON document ([`StudyRecord`]). Rows
//! carry a revision that increases on every write; `compare_and_swap` is
//! the only multi-client coordination primitive in the system.

mod file;
mod memory;

pub use file::FileStudyRegistry;
pub use memory::InMemoryStudyRegistry;

use async_trait::async_trait;
use cohort_types::{StudyId, StudyRecord};
use serde::{Deserialize, Serialize};

use crate::error::StoreResult;

/// A registry row as read from the backend.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegistryRow {
    pub study_id: StudyId,
    /// Starts at 1 on insert; every successful write increments it.
    pub revision: u64,
    pub data: StudyRecord,
}

/// Single-row-per-study metadata table.
#[async_trait]
pub trait StudyRegistry: Send + Sync {
    /// Create the row for `study_id`.
    ///
    /// Fails with [`StoreError::DuplicateKey`](crate::StoreError::DuplicateKey)
    /// if the row already exists; callers treat that as success.
    async fn insert(&self, study_id: &StudyId, data: &StudyRecord) -> StoreResult<RegistryRow>;

    /// Read the row for `study_id`.
    ///
    /// Returns `Ok(None)` if the study has no row.
    async fn select(&self, study_id: &StudyId) -> StoreResult<Option<RegistryRow>>;

    /// Overwrite the row unconditionally (last write wins).
    ///
    /// Fails with [`StoreError::NotFound`](crate::StoreError::NotFound) if
    /// the row does not exist.
    async fn update(&self, study_id: &StudyId, data: &StudyRecord) -> StoreResult<RegistryRow>;

    /// Overwrite the row only if its revision is still `expected_revision`.
    ///
    /// Fails with [`StoreError::Conflict`](crate::StoreError::Conflict) if
    /// another writer got there first.
    async fn compare_and_swap(
        &self,
        study_id: &StudyId,
        expected_revision: u64,
        data: &StudyRecord,
    ) -> StoreResult<RegistryRow>;
}
