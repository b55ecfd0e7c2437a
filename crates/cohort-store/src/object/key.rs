use std::fmt;

use cohort_types::{ConfigVersion, ParticipantId, StorageObjectType, StudyId};

use crate::error::{StoreError, StoreResult};

/// Address of an object: `{studyId}/{prefix}_{type}`.
///
/// The prefix disambiguates sub-resources of the same kind (a config hash,
/// a participant id) and is empty for study-level objects.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ObjectKey {
    study_id: StudyId,
    prefix: String,
    kind: StorageObjectType,
}

impl ObjectKey {
    pub fn new(
        study_id: StudyId,
        prefix: impl Into<String>,
        kind: StorageObjectType,
    ) -> StoreResult<Self> {
        let prefix = prefix.into();
        if prefix.contains(['/', '\\']) {
            return Err(StoreError::InvalidKey {
                key: prefix,
                reason: "prefix must not contain path separators".into(),
            });
        }
        Ok(Self {
            study_id,
            prefix,
            kind,
        })
    }

    /// Key of the content-addressed config blob for `version`.
    pub fn config(study_id: &StudyId, version: &ConfigVersion) -> Self {
        Self {
            study_id: study_id.clone(),
            prefix: version.to_hex(),
            kind: StorageObjectType::Config,
        }
    }

    /// Key of a participant's progress record.
    pub fn participant_data(study_id: &StudyId, participant_id: &ParticipantId) -> Self {
        Self {
            study_id: study_id.clone(),
            prefix: participant_id.as_str().to_string(),
            kind: StorageObjectType::ParticipantData,
        }
    }

    /// Key of the study's sequence pool.
    pub fn sequence_array(study_id: &StudyId) -> Self {
        Self {
            study_id: study_id.clone(),
            prefix: String::new(),
            kind: StorageObjectType::SequenceArray,
        }
    }

    /// Parse a `{studyId}/{prefix}_{type}` path.
    pub fn parse(path: &str) -> StoreResult<Self> {
        let invalid = |reason: &str| StoreError::InvalidKey {
            key: path.to_string(),
            reason: reason.to_string(),
        };
        let (study, name) = path
            .split_once('/')
            .ok_or_else(|| invalid("missing study segment"))?;
        let (prefix, suffix) = name
            .rsplit_once('_')
            .ok_or_else(|| invalid("missing type suffix"))?;
        let kind = StorageObjectType::from_suffix(suffix)
            .ok_or_else(|| invalid("unknown object type"))?;
        Self::new(StudyId::new(study)?, prefix, kind)
    }

    pub fn study_id(&self) -> &StudyId {
        &self.study_id
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    pub fn kind(&self) -> StorageObjectType {
        self.kind
    }

    /// Object name within the study namespace: `{prefix}_{type}`.
    pub fn file_name(&self) -> String {
        format!("{}_{}", self.prefix, self.kind)
    }

    /// Full path: `{studyId}/{prefix}_{type}`.
    pub fn path(&self) -> String {
        format!("{}/{}", self.study_id, self.file_name())
    }
}

impl fmt::Display for ObjectKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.path())
    }
}
