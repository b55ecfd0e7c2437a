//! The [`StorageEngine`] trait: the operation set every backend provides.

use async_trait::async_trait;
use cohort_types::{
    Answers, ConfigVersion, ModeKey, ParticipantData, ParticipantId, ParticipantMetadata,
    SearchParams, Sequence, StudyConfig, StudyId, StudyModes,
};

use crate::error::EngineResult;
use crate::session::StudySession;

/// Persistence operations for studies and participant sessions.
///
/// Implementations are chosen at process start (see
/// [`open_engine`](crate::open_engine)) and used through
/// `Arc<dyn StorageEngine>`. Session-scoped operations take the caller's
/// [`StudySession`]; the engine keeps no per-participant state of its own.
#[async_trait]
pub trait StorageEngine: Send + Sync {
    /// Short backend name for logs.
    fn name(&self) -> &'static str;

    /// Register the study, store `config` under its content hash, and make
    /// it the study's current version.
    ///
    /// When the version changes, the published sequence pool and the cached
    /// participant identity are purged, so every later visitor starts
    /// fresh under the new config.
    async fn initialize_study_db(
        &self,
        study_id: &StudyId,
        config: &StudyConfig,
    ) -> EngineResult<ConfigVersion>;

    /// Whether a registry row exists for the study.
    async fn verify_study_database(&self, study_id: &StudyId) -> EngineResult<bool>;

    /// Resolve this device's participant id for the study.
    ///
    /// A URL-supplied id wins and is cached; otherwise the cached id is
    /// reused; otherwise a fresh id is generated and cached.
    fn get_current_participant_id(
        &self,
        study_id: &StudyId,
        url_participant_id: Option<&ParticipantId>,
    ) -> EngineResult<ParticipantId>;

    /// Forget this device's participant id for the study.
    fn clear_current_participant_id(&self, study_id: &StudyId) -> EngineResult<()>;

    /// Attach a participant to `session`, creating its record exactly once.
    ///
    /// An existing well-formed record is returned unchanged without any
    /// write. A new record is persisted only when data collection is
    /// enabled for the study.
    async fn initialize_participant_session(
        &self,
        session: &mut StudySession,
        search_params: SearchParams,
        config: &StudyConfig,
        metadata: ParticipantMetadata,
        url_participant_id: Option<&ParticipantId>,
    ) -> EngineResult<ParticipantData>;

    /// Replace the participant's answers and schedule a throttled write.
    ///
    /// Returns immediately; the write happens within one throttle window.
    fn save_answers(&self, session: &mut StudySession, answers: Answers) -> EngineResult<()>;

    /// Write any pending participant state now. Returns whether a write
    /// was issued.
    async fn flush(&self, session: &StudySession) -> EngineResult<bool>;

    /// Mark the participant completed and write the record immediately.
    async fn finalize_participant(&self, session: &mut StudySession) -> EngineResult<()>;

    /// Flush the current participant, forget its identity, and attach a
    /// freshly generated participant to `session`.
    async fn next_participant(
        &self,
        session: &mut StudySession,
        search_params: SearchParams,
        config: &StudyConfig,
        metadata: ParticipantMetadata,
    ) -> EngineResult<ParticipantData>;

    /// Read a participant record. Absent, unreadable, or malformed records
    /// are reported as `None`.
    async fn get_participant_data(
        &self,
        study_id: &StudyId,
        participant_id: &ParticipantId,
    ) -> EngineResult<Option<ParticipantData>>;

    /// Read the study's feature flags, seeding the defaults on first read.
    async fn get_modes(&self, study_id: &StudyId) -> EngineResult<StudyModes>;

    /// Change one feature flag and return the updated set.
    async fn set_mode(
        &self,
        study_id: &StudyId,
        key: ModeKey,
        enabled: bool,
    ) -> EngineResult<StudyModes>;

    async fn get_current_config_hash(&self, study_id: &StudyId)
        -> EngineResult<Option<ConfigVersion>>;

    /// Fetch a stored config by version, verifying its content hash.
    async fn get_config(
        &self,
        study_id: &StudyId,
        version: &ConfigVersion,
    ) -> EngineResult<Option<StudyConfig>>;

    /// Publish the study's sequence pool and reset its assignment counts.
    async fn set_sequence_array(&self, study_id: &StudyId, pool: &[Sequence])
        -> EngineResult<()>;

    async fn get_sequence_array(&self, study_id: &StudyId) -> EngineResult<Option<Vec<Sequence>>>;
}
