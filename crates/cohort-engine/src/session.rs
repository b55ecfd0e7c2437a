use cohort_types::{ParticipantData, ParticipantId, StudyId};

use crate::error::{EngineError, EngineResult};
use crate::throttle::{ThrottledWriter, WriterStats};

/// Per-participant session state.
///
/// One session per participant being served. The engine itself holds no
/// session state, so a single engine can serve many studies and sessions
/// at once.
pub struct StudySession {
    study_id: StudyId,
    participant: Option<ParticipantData>,
    writer: Option<ThrottledWriter<ParticipantData>>,
}

impl StudySession {
    pub fn new(study_id: StudyId) -> Self {
        Self {
            study_id,
            participant: None,
            writer: None,
        }
    }

    pub fn study_id(&self) -> &StudyId {
        &self.study_id
    }

    /// The participant record as last updated in this session.
    pub fn participant(&self) -> Option<&ParticipantData> {
        self.participant.as_ref()
    }

    pub fn participant_id(&self) -> Option<&ParticipantId> {
        self.participant.as_ref().map(|p| &p.participant_id)
    }

    /// `true` once a participant is attached with data collection disabled.
    pub fn is_preview(&self) -> bool {
        self.participant.is_some() && self.writer.is_none()
    }

    /// Write counters for this session's participant, if it persists data.
    pub fn writer_stats(&self) -> Option<&WriterStats> {
        self.writer.as_ref().map(|w| w.stats())
    }

    pub(crate) fn attach(
        &mut self,
        participant: ParticipantData,
        writer: Option<ThrottledWriter<ParticipantData>>,
    ) {
        self.participant = Some(participant);
        self.writer = writer;
    }

    pub(crate) fn detach(&mut self) {
        self.participant = None;
        self.writer = None;
    }

    pub(crate) fn participant_mut(&mut self) -> EngineResult<&mut ParticipantData> {
        self.participant
            .as_mut()
            .ok_or(EngineError::ParticipantNotInitialized)
    }

    /// Hand the current record to the throttled writer. No-op in preview.
    pub(crate) fn schedule_write(&self) {
        if let (Some(writer), Some(participant)) = (&self.writer, &self.participant) {
            writer.schedule(participant.clone());
        }
    }

    pub(crate) async fn flush_now(&self) -> EngineResult<bool> {
        match &self.writer {
            Some(writer) => writer.flush_now().await,
            None => Ok(false),
        }
    }
}

impl std::fmt::Debug for StudySession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StudySession")
            .field("study_id", &self.study_id)
            .field("participant_id", &self.participant_id())
            .field("preview", &self.is_preview())
            .finish()
    }
}
