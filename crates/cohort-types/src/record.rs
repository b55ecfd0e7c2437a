use serde::{Deserialize, Serialize};

use crate::modes::StudyModes;
use crate::version::ConfigVersion;

/// Payload of a study's single registry row.
///
/// Every field is optional: a freshly inserted row is empty, and each
/// field is filled by the first operation that needs it.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StudyRecord {
    /// The study's current configuration version.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub config_hash: Option<ConfigVersion>,

    /// Feature-mode flags.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<StudyModes>,

    /// Number of participants assigned to each slot of the sequence pool.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sequence_assignments: Option<Vec<u64>>,
}
