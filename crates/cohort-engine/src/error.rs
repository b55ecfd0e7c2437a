use cohort_crypto::HasherError;
use cohort_store::StoreError;
use cohort_types::{StudyId, TypeError};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("study database not initialized: {0}")]
    StudyNotInitialized(StudyId),

    #[error("participant not initialized")]
    ParticipantNotInitialized,

    #[error("config retrieval failed for study {study_id}: {reason}")]
    ConfigRetrieval { study_id: StudyId, reason: String },

    #[error("upload of {key} failed: {source}")]
    Upload {
        key: String,
        #[source]
        source: StoreError,
    },

    #[error("download of {key} failed: {source}")]
    Download {
        key: String,
        #[source]
        source: StoreError,
    },

    #[error("no sequence pool published for study {0}")]
    SequencePoolMissing(StudyId),

    #[error("anonymous sign-in failed: {0}")]
    Auth(#[source] StoreError),

    #[error("local identity store error: {0}")]
    Identity(#[source] StoreError),

    #[error("registry row for study {study_id} kept changing after {attempts} attempts")]
    Contention { study_id: StudyId, attempts: u32 },

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("store error: {0}")]
    Store(#[from] StoreError),
}

impl From<TypeError> for EngineError {
    fn from(e: TypeError) -> Self {
        EngineError::Serialization(e.to_string())
    }
}

impl From<HasherError> for EngineError {
    fn from(e: HasherError) -> Self {
        EngineError::Serialization(e.to_string())
    }
}

impl From<serde_json::Error> for EngineError {
    fn from(e: serde_json::Error) -> Self {
        EngineError::Serialization(e.to_string())
    }
}

pub type EngineResult<T> = Result<T, EngineError>;
