//! Participant progress records.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::identity::ParticipantId;
use crate::version::ConfigVersion;

/// Identifier of a single task within a study.
pub type TaskId = String;

/// An ordered list of tasks a participant completes.
pub type Sequence = Vec<TaskId>;

/// Recorded answers, keyed by task id.
pub type Answers = BTreeMap<TaskId, Value>;

/// Query parameters the participant arrived with.
pub type SearchParams = BTreeMap<String, String>;

/// Screen resolution reported by the participant's device.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Resolution {
    pub width: u32,
    pub height: u32,
}

/// Environment details captured when a participant first connects.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ParticipantMetadata {
    #[serde(default)]
    pub user_agent: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resolution: Option<Resolution>,
    #[serde(default)]
    pub language: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ip: Option<String>,
}

/// A participant's progress within a study.
///
/// Created once when a participant first connects, then the single source
/// of truth for that participant. The record remembers the config version
/// it was created under, so later config edits never alter it.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ParticipantData {
    pub participant_id: ParticipantId,
    pub participant_config_hash: ConfigVersion,
    pub sequence: Sequence,
    /// 1-based position of the assigned sequence within the study's pool.
    pub participant_index: u64,
    pub answers: Answers,
    pub search_params: SearchParams,
    pub metadata: ParticipantMetadata,
    pub completed: bool,
    pub rejected: bool,
    pub participant_tags: Vec<String>,
}

impl ParticipantData {
    /// A fresh record: no answers, no tags, neither completed nor rejected.
    pub fn new(
        participant_id: ParticipantId,
        participant_config_hash: ConfigVersion,
        sequence: Sequence,
        participant_index: u64,
        search_params: SearchParams,
        metadata: ParticipantMetadata,
    ) -> Self {
        Self {
            participant_id,
            participant_config_hash,
            sequence,
            participant_index,
            answers: Answers::new(),
            search_params,
            metadata,
            completed: false,
            rejected: false,
            participant_tags: Vec::new(),
        }
    }

    /// Number of tasks in the sequence that have a recorded answer.
    pub fn answered_count(&self) -> usize {
        self.sequence
            .iter()
            .filter(|task| self.answers.contains_key(*task))
            .count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sample() -> ParticipantData {
        ParticipantData::new(
            ParticipantId::new("p1").unwrap(),
            ConfigVersion::from_hash([3u8; 32]),
            vec!["t1".into(), "t2".into()],
            1,
            SearchParams::from([("PROLIFIC_PID".to_string(), "abc".to_string())]),
            ParticipantMetadata::default(),
        )
    }

    #[test]
    fn new_record_is_blank() {
        let data = sample();
        assert!(data.answers.is_empty());
        assert!(data.participant_tags.is_empty());
        assert!(!data.completed);
        assert!(!data.rejected);
    }

    #[test]
    fn json_uses_camel_case_fields() {
        let value = serde_json::to_value(sample()).unwrap();
        assert_eq!(value["participantId"], "p1");
        assert_eq!(value["participantIndex"], 1);
        assert_eq!(value["participantConfigHash"], "03".repeat(32));
        assert_eq!(value["searchParams"]["PROLIFIC_PID"], "abc");
        assert_eq!(value["participantTags"], json!([]));
    }

    #[test]
    fn answered_count_ignores_tasks_outside_sequence() {
        let mut data = sample();
        data.answers.insert("t1".into(), json!("a"));
        data.answers.insert("extra".into(), json!(1));
        assert_eq!(data.answered_count(), 1);
    }

    #[test]
    fn metadata_omits_missing_optionals() {
        let value = serde_json::to_value(ParticipantMetadata {
            user_agent: "test-agent".into(),
            resolution: Some(Resolution {
                width: 1920,
                height: 1080,
            }),
            language: "en-US".into(),
            ip: None,
        })
        .unwrap();
        assert_eq!(value["userAgent"], "test-agent");
        assert_eq!(value["resolution"]["width"], 1920);
        assert!(value.get("ip").is_none());
    }
}
