use std::fmt;

use serde::{Deserialize, Serialize};

/// Kind of a stored object.
///
/// Together with a study id and a prefix, the kind forms an object key
/// `{studyId}/{prefix}_{kind}`. The set is closed: backends never see any
/// other suffix.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum StorageObjectType {
    /// A study configuration blob, prefixed by its config hash.
    Config,
    /// A participant's progress record, prefixed by the participant id.
    ParticipantData,
    /// The study's pool of task orderings, with an empty prefix.
    SequenceArray,
}

impl StorageObjectType {
    /// Stable name used as the key suffix.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Config => "config",
            Self::ParticipantData => "participantData",
            Self::SequenceArray => "sequenceArray",
        }
    }

    /// All object kinds, in declaration order.
    pub fn all() -> [Self; 3] {
        [Self::Config, Self::ParticipantData, Self::SequenceArray]
    }

    /// Parse a key suffix back into a kind.
    pub fn from_suffix(suffix: &str) -> Option<Self> {
        Self::all().into_iter().find(|kind| kind.as_str() == suffix)
    }
}

impl fmt::Display for StorageObjectType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
