use cohort_types::{StudyId, TypeError};

/// Errors from storage backend operations.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// The requested object or row does not exist.
    #[error("not found: {0}")]
    NotFound(String),

    /// A non-upsert upload targeted an existing object.
    #[error("object already exists: {0}")]
    AlreadyExists(String),

    /// The registry already holds a row for this study.
    #[error("duplicate registry row for study {0}")]
    DuplicateKey(StudyId),

    /// A compare-and-swap observed a different revision than expected.
    #[error("revision conflict for study {study_id}: expected {expected}, found {actual}")]
    Conflict {
        study_id: StudyId,
        expected: u64,
        actual: u64,
    },

    /// An object key could not be formed or parsed.
    #[error("invalid object key {key:?}: {reason}")]
    InvalidKey { key: String, reason: String },

    /// Serialization or deserialization failure.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// I/O error from a file-backed store.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Anonymous sign-in was refused.
    #[error("authentication failed: {0}")]
    Auth(String),

    /// The backend reported a failure of its own.
    #[error("backend error: {0}")]
    Backend(String),
}

impl From<TypeError> for StoreError {
    fn from(e: TypeError) -> Self {
        StoreError::Serialization(e.to_string())
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(e: serde_json::Error) -> Self {
        StoreError::Serialization(e.to_string())
    }
}

/// Result alias for store operations.
pub type StoreResult<T> = Result<T, StoreError>;
