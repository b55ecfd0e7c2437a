use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::TypeError;

/// Checks shared by every identifier that ends up inside a storage key.
///
/// Identifiers become path segments (`{study}/{participant}_participantData`),
/// so separators and relative components are rejected.
fn validate_segment(kind: &'static str, value: &str) -> Result<(), TypeError> {
    let invalid = |reason| TypeError::InvalidIdentifier {
        kind,
        value: value.to_string(),
        reason,
    };
    if value.is_empty() {
        return Err(invalid("must not be empty"));
    }
    if value == "." || value == ".." {
        return Err(invalid("must not be a relative path component"));
    }
    if value.contains(['/', '\\']) {
        return Err(invalid("must not contain path separators"));
    }
    if value.chars().any(|c| c.is_control() || c.is_whitespace()) {
        return Err(invalid("must not contain whitespace or control characters"));
    }
    Ok(())
}

/// Identifier of a deployed study.
///
/// All participants, blobs, and registry rows of a study are keyed off this
/// value.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct StudyId(String);

impl StudyId {
    /// Create a validated study identifier.
    pub fn new(value: impl Into<String>) -> Result<Self, TypeError> {
        let value = value.into();
        validate_segment("study", &value)?;
        Ok(Self(value))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for StudyId {
    type Error = TypeError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<StudyId> for String {
    fn from(id: StudyId) -> Self {
        id.0
    }
}

impl fmt::Debug for StudyId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "StudyId({})", self.0)
    }
}

impl fmt::Display for StudyId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Persistent identifier of one participant's session within a study.
///
/// Freshly generated identifiers are UUID v7 strings; identifiers supplied
/// through a URL are accepted verbatim after validation.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ParticipantId(String);

impl ParticipantId {
    /// Generate a fresh, time-ordered identifier.
    pub fn generate() -> Self {
        Self(Uuid::now_v7().to_string())
    }

    /// Wrap an existing identifier (e.g. one supplied through a URL).
    pub fn new(value: impl Into<String>) -> Result<Self, TypeError> {
        let value = value.into();
        validate_segment("participant", &value)?;
        Ok(Self(value))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for ParticipantId {
    type Error = TypeError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<ParticipantId> for String {
    fn from(id: ParticipantId) -> Self {
        id.0
    }
}

impl fmt::Debug for ParticipantId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ParticipantId({})", self.0)
    }
}

impl fmt::Display for ParticipantId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
