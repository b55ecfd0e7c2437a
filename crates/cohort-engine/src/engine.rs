use std::sync::Arc;

use async_trait::async_trait;
use cohort_crypto::ContentAddresser;
use cohort_store::{
    AuthProvider, IdentityStore, ObjectKey, ObjectStore, RegistryRow, StoreError, StudyRegistry,
    UploadOptions,
};
use cohort_types::{
    Answers, ConfigVersion, ModeKey, ParticipantData, ParticipantId, ParticipantMetadata,
    SearchParams, Sequence, StudyConfig, StudyId, StudyModes, StudyRecord,
};
use tracing::{debug, info, warn};

use crate::allocator::{Allocation, SequenceAllocator};
use crate::backend::Backends;
use crate::config::EngineConfig;
use crate::error::{EngineError, EngineResult};
use crate::session::StudySession;
use crate::throttle::{FlushSink, ThrottledWriter};
use crate::traits::StorageEngine;

/// Local identity key under which a study's participant id is cached.
pub const CURRENT_PARTICIPANT_KEY: &str = "currentParticipantId";

fn identity_key(study_id: &StudyId) -> String {
    format!("{study_id}/{CURRENT_PARTICIPANT_KEY}")
}

/// Outcome of one compare-and-swap edit attempt on a study record.
enum RecordEdit<T> {
    /// The record already satisfies the edit; nothing to write.
    Keep(T),
    /// The record was modified and must be written back.
    Write(T),
}

/// What a read of a participant's object found.
enum StoredParticipant {
    Absent,
    Malformed,
    Record(ParticipantData),
}

/// Outcome of creating a participant's record.
enum Creation {
    Created(ParticipantData),
    /// Someone else created the record first.
    Existing(ParticipantData),
}

/// Writes a participant's record to its object key.
struct ParticipantSink {
    objects: Arc<dyn ObjectStore>,
    key: ObjectKey,
}

#[async_trait]
impl FlushSink<ParticipantData> for ParticipantSink {
    async fn flush(&self, data: &ParticipantData) -> EngineResult<()> {
        let bytes = serde_json::to_vec(data)?;
        self.objects
            .upload(&self.key, bytes, UploadOptions::MUTABLE)
            .await
            .map_err(|source| EngineError::Upload {
                key: self.key.path(),
                source,
            })
    }
}

/// [`StorageEngine`] over an object store, a study registry, a local
/// identity cache, and an auth provider.
///
/// Which concrete backends sit behind the traits (in memory, local files,
/// a hosted service) is decided when the engine is built.
pub struct ObjectStorageEngine {
    objects: Arc<dyn ObjectStore>,
    registry: Arc<dyn StudyRegistry>,
    identities: Arc<dyn IdentityStore>,
    auth: Arc<dyn AuthProvider>,
    addresser: ContentAddresser,
    allocator: SequenceAllocator,
    config: EngineConfig,
}

impl ObjectStorageEngine {
    pub fn new(backends: Backends, config: EngineConfig) -> Self {
        Self {
            objects: backends.objects,
            registry: backends.registry,
            identities: backends.identities,
            auth: backends.auth,
            addresser: ContentAddresser::CONFIG,
            allocator: SequenceAllocator::new(config.allocation_policy),
            config,
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    async fn require_study(&self, study_id: &StudyId) -> EngineResult<()> {
        if !self.verify_study_database(study_id).await? {
            return Err(EngineError::StudyNotInitialized(study_id.clone()));
        }
        Ok(())
    }

    async fn read_row(&self, study_id: &StudyId) -> EngineResult<RegistryRow> {
        self.registry
            .select(study_id)
            .await?
            .ok_or_else(|| EngineError::StudyNotInitialized(study_id.clone()))
    }

    /// Apply `edit` to the study's record with compare-and-swap, re-reading
    /// and retrying when another writer got in between.
    async fn edit_record<T, F>(&self, study_id: &StudyId, mut edit: F) -> EngineResult<T>
    where
        T: Send,
        F: FnMut(&mut StudyRecord) -> EngineResult<RecordEdit<T>> + Send,
    {
        let attempts = self.config.max_cas_retries;
        for attempt in 1..=attempts {
            let row = self.read_row(study_id).await?;
            let mut record = row.data;
            let value = match edit(&mut record)? {
                RecordEdit::Keep(value) => return Ok(value),
                RecordEdit::Write(value) => value,
            };
            match self
                .registry
                .compare_and_swap(study_id, row.revision, &record)
                .await
            {
                Ok(_) => return Ok(value),
                Err(StoreError::Conflict { actual, .. }) => {
                    debug!(study_id = %study_id, attempt, actual, "registry row changed; retrying");
                }
                Err(e) => return Err(e.into()),
            }
        }
        Err(EngineError::Contention {
            study_id: study_id.clone(),
            attempts,
        })
    }

    /// Current config version, or `None` for a study that has none yet.
    async fn stored_config_hash(&self, study_id: &StudyId) -> EngineResult<Option<ConfigVersion>> {
        let row = self
            .registry
            .select(study_id)
            .await
            .map_err(|e| EngineError::ConfigRetrieval {
                study_id: study_id.clone(),
                reason: e.to_string(),
            })?;
        Ok(row.and_then(|row| row.data.config_hash))
    }

    /// Remove what belonged to a superseded config: the sequence pool and
    /// this device's cached identity.
    async fn purge_superseded(&self, study_id: &StudyId) -> EngineResult<()> {
        let removed = self
            .objects
            .remove(&[ObjectKey::sequence_array(study_id)])
            .await?;
        self.clear_current_participant_id(study_id)?;
        info!(study_id = %study_id, pool_removed = removed > 0, "purged state of superseded config");
        Ok(())
    }

    async fn allocate_sequence(&self, study_id: &StudyId, commit: bool) -> EngineResult<Allocation> {
        let pool = self
            .get_sequence_array(study_id)
            .await?
            .ok_or_else(|| EngineError::SequencePoolMissing(study_id.clone()))?;
        let missing = || EngineError::SequencePoolMissing(study_id.clone());

        if !commit {
            let counts = self
                .read_row(study_id)
                .await?
                .data
                .sequence_assignments
                .unwrap_or_default();
            return self.allocator.peek(&pool, &counts).map_err(|_| missing());
        }

        let allocator = self.allocator;
        self.edit_record(study_id, |record| {
            let mut counts = record.sequence_assignments.take().unwrap_or_default();
            let allocation = allocator.assign(&pool, &mut counts).map_err(|_| missing())?;
            record.sequence_assignments = Some(counts);
            Ok(RecordEdit::Write(allocation))
        })
        .await
    }

    /// Give back a slot committed by [`Self::allocate_sequence`] for a
    /// participant that was never created.
    async fn release_slot(&self, study_id: &StudyId, slot: usize) -> EngineResult<()> {
        self.edit_record(study_id, |record| {
            match record
                .sequence_assignments
                .as_mut()
                .and_then(|counts| counts.get_mut(slot))
            {
                Some(count) if *count > 0 => {
                    *count -= 1;
                    Ok(RecordEdit::Write(()))
                }
                _ => Ok(RecordEdit::Keep(())),
            }
        })
        .await
    }

    /// Read a participant's object. Unlike [`StorageEngine::get_participant_data`],
    /// an unreachable store is an error rather than an absent record.
    async fn read_participant(&self, key: &ObjectKey) -> EngineResult<StoredParticipant> {
        let bytes = self
            .objects
            .download(key)
            .await
            .map_err(|source| EngineError::Download {
                key: key.path(),
                source,
            })?;
        let Some(bytes) = bytes else {
            return Ok(StoredParticipant::Absent);
        };
        match serde_json::from_slice(&bytes) {
            Ok(data) => Ok(StoredParticipant::Record(data)),
            Err(e) => {
                warn!(key = %key, error = %e, "malformed participant record");
                Ok(StoredParticipant::Malformed)
            }
        }
    }

    /// Create the participant's record unless one already exists.
    ///
    /// An existing record is only replaced after it was read back and found
    /// malformed; one that cannot be read is never overwritten.
    async fn create_participant(
        &self,
        key: &ObjectKey,
        data: ParticipantData,
    ) -> EngineResult<Creation> {
        let upload_error = |source: StoreError| EngineError::Upload {
            key: key.path(),
            source,
        };
        let bytes = serde_json::to_vec(&data)?;
        match self
            .objects
            .upload(key, bytes.clone(), UploadOptions::CREATE_ONLY)
            .await
        {
            Ok(()) => return Ok(Creation::Created(data)),
            Err(StoreError::AlreadyExists(_)) => {}
            Err(source) => return Err(upload_error(source)),
        }
        match self.read_participant(key).await? {
            StoredParticipant::Record(existing) => Ok(Creation::Existing(existing)),
            StoredParticipant::Malformed => {
                warn!(key = %key, "replacing malformed participant record");
                self.objects
                    .upload(key, bytes, UploadOptions::MUTABLE)
                    .await
                    .map_err(upload_error)?;
                Ok(Creation::Created(data))
            }
            // Removed again between the failed create and the read.
            StoredParticipant::Absent => Err(upload_error(StoreError::AlreadyExists(key.path()))),
        }
    }

    fn attach(&self, session: &mut StudySession, data: ParticipantData, collect: bool) {
        let writer = collect.then(|| {
            let sink = ParticipantSink {
                objects: Arc::clone(&self.objects),
                key: ObjectKey::participant_data(session.study_id(), &data.participant_id),
            };
            ThrottledWriter::new(
                self.config.throttle_window(),
                Arc::new(sink) as Arc<dyn FlushSink<ParticipantData>>,
            )
        });
        session.attach(data, writer);
    }
}

#[async_trait]
impl StorageEngine for ObjectStorageEngine {
    fn name(&self) -> &'static str {
        "object"
    }

    async fn initialize_study_db(
        &self,
        study_id: &StudyId,
        config: &StudyConfig,
    ) -> EngineResult<ConfigVersion> {
        if let Err(e) = self.auth.sign_in_anonymously().await {
            if self.config.strict_init {
                return Err(EngineError::Auth(e));
            }
            warn!(study_id = %study_id, error = %e, "anonymous sign-in failed; continuing");
        }

        match self.registry.insert(study_id, &StudyRecord::default()).await {
            Ok(_) => info!(study_id = %study_id, "study registered"),
            Err(StoreError::DuplicateKey(_)) => debug!(study_id = %study_id, "study already registered"),
            Err(e) if self.config.strict_init => return Err(e.into()),
            Err(e) => warn!(study_id = %study_id, error = %e, "study registration failed; continuing"),
        }

        let previous = self.stored_config_hash(study_id).await?;

        let version = self.addresser.hash_config(config)?;
        let key = ObjectKey::config(study_id, &version);
        self.objects
            .upload(&key, config.canonical_json()?.into_bytes(), UploadOptions::IMMUTABLE)
            .await
            .map_err(|source| EngineError::Upload {
                key: key.path(),
                source,
            })?;

        let superseded = previous.filter(|prev| *prev != version);
        if superseded.is_some() {
            self.purge_superseded(study_id).await?;
        }

        // Purge happens before the pointer moves: a crash in between leaves
        // the old pointer, and the next call purges again.
        let replaced = self
            .edit_record(study_id, |record| {
                if record.config_hash == Some(version) {
                    return Ok(RecordEdit::Keep(None));
                }
                let replaced = record.config_hash.replace(version);
                if replaced.is_some() {
                    record.sequence_assignments = None;
                }
                Ok(RecordEdit::Write(replaced))
            })
            .await?;

        // Another client moved the pointer between our read and our write.
        if replaced.is_some() && replaced != superseded {
            self.purge_superseded(study_id).await?;
        }

        info!(
            study_id = %study_id,
            version = %version.short_hex(),
            changed = replaced.is_some(),
            "study database initialized"
        );
        Ok(version)
    }

    async fn verify_study_database(&self, study_id: &StudyId) -> EngineResult<bool> {
        Ok(self.registry.select(study_id).await?.is_some())
    }

    fn get_current_participant_id(
        &self,
        study_id: &StudyId,
        url_participant_id: Option<&ParticipantId>,
    ) -> EngineResult<ParticipantId> {
        let key = identity_key(study_id);
        if let Some(id) = url_participant_id {
            self.identities
                .set(&key, id.as_str())
                .map_err(EngineError::Identity)?;
            return Ok(id.clone());
        }
        if let Some(cached) = self.identities.get(&key).map_err(EngineError::Identity)? {
            return Ok(ParticipantId::new(cached)?);
        }
        let id = ParticipantId::generate();
        self.identities
            .set(&key, id.as_str())
            .map_err(EngineError::Identity)?;
        debug!(study_id = %study_id, participant_id = %id, "generated participant id");
        Ok(id)
    }

    fn clear_current_participant_id(&self, study_id: &StudyId) -> EngineResult<()> {
        self.identities
            .remove(&identity_key(study_id))
            .map_err(EngineError::Identity)?;
        Ok(())
    }

    async fn initialize_participant_session(
        &self,
        session: &mut StudySession,
        search_params: SearchParams,
        config: &StudyConfig,
        metadata: ParticipantMetadata,
        url_participant_id: Option<&ParticipantId>,
    ) -> EngineResult<ParticipantData> {
        let study_id = session.study_id().clone();
        self.require_study(&study_id).await?;

        let participant_id = self.get_current_participant_id(&study_id, url_participant_id)?;
        let modes = self.get_modes(&study_id).await?;
        let collect = modes.data_collection_enabled;

        let key = ObjectKey::participant_data(&study_id, &participant_id);
        if let StoredParticipant::Record(existing) = self.read_participant(&key).await? {
            info!(study_id = %study_id, participant_id = %participant_id, "participant reattached");
            self.attach(session, existing.clone(), collect);
            return Ok(existing);
        }

        let version = self.addresser.hash_config(config)?;
        let allocation = self.allocate_sequence(&study_id, collect).await?;
        let slot = allocation.slot();
        let data = ParticipantData::new(
            participant_id,
            version,
            allocation.assignment,
            allocation.index,
            search_params,
            metadata,
        );

        if !collect {
            debug!(study_id = %study_id, participant_id = %data.participant_id, "preview participant; not persisted");
            self.attach(session, data.clone(), collect);
            return Ok(data);
        }

        let data = match self.create_participant(&key, data).await {
            Ok(Creation::Created(data)) => {
                info!(
                    study_id = %study_id,
                    participant_id = %data.participant_id,
                    index = data.participant_index,
                    "participant created"
                );
                data
            }
            Ok(Creation::Existing(existing)) => {
                self.release_slot(&study_id, slot).await?;
                info!(study_id = %study_id, participant_id = %existing.participant_id, "participant created concurrently; reattached");
                existing
            }
            Err(e) => {
                if let Err(release) = self.release_slot(&study_id, slot).await {
                    warn!(study_id = %study_id, slot, error = %release, "unused sequence slot not released");
                }
                return Err(e);
            }
        };

        self.attach(session, data.clone(), collect);
        Ok(data)
    }

    fn save_answers(&self, session: &mut StudySession, answers: Answers) -> EngineResult<()> {
        session.participant_mut()?.answers = answers;
        session.schedule_write();
        Ok(())
    }

    async fn flush(&self, session: &StudySession) -> EngineResult<bool> {
        session.flush_now().await
    }

    async fn finalize_participant(&self, session: &mut StudySession) -> EngineResult<()> {
        session.participant_mut()?.completed = true;
        session.schedule_write();
        session.flush_now().await?;
        info!(study_id = %session.study_id(), participant_id = ?session.participant_id(), "participant finalized");
        Ok(())
    }

    async fn next_participant(
        &self,
        session: &mut StudySession,
        search_params: SearchParams,
        config: &StudyConfig,
        metadata: ParticipantMetadata,
    ) -> EngineResult<ParticipantData> {
        session.flush_now().await?;
        let study_id = session.study_id().clone();
        self.clear_current_participant_id(&study_id)?;
        session.detach();
        self.initialize_participant_session(session, search_params, config, metadata, None)
            .await
    }

    async fn get_participant_data(
        &self,
        study_id: &StudyId,
        participant_id: &ParticipantId,
    ) -> EngineResult<Option<ParticipantData>> {
        let key = ObjectKey::participant_data(study_id, participant_id);
        match self.read_participant(&key).await {
            Ok(StoredParticipant::Record(data)) => Ok(Some(data)),
            Ok(StoredParticipant::Absent | StoredParticipant::Malformed) => Ok(None),
            Err(e) => {
                warn!(key = %key, error = %e, "participant download failed; treating as absent");
                Ok(None)
            }
        }
    }

    async fn get_modes(&self, study_id: &StudyId) -> EngineResult<StudyModes> {
        self.edit_record(study_id, |record| match record.metadata {
            Some(modes) => Ok(RecordEdit::Keep(modes)),
            None => {
                let modes = StudyModes::default();
                record.metadata = Some(modes);
                Ok(RecordEdit::Write(modes))
            }
        })
        .await
    }

    async fn set_mode(
        &self,
        study_id: &StudyId,
        key: ModeKey,
        enabled: bool,
    ) -> EngineResult<StudyModes> {
        let modes = self
            .edit_record(study_id, |record| {
                let mut modes = record.metadata.unwrap_or_default();
                if record.metadata.is_some() && modes.get(key) == enabled {
                    return Ok(RecordEdit::Keep(modes));
                }
                modes.set(key, enabled);
                record.metadata = Some(modes);
                Ok(RecordEdit::Write(modes))
            })
            .await?;
        info!(study_id = %study_id, mode = %key, enabled, "study mode set");
        Ok(modes)
    }

    async fn get_current_config_hash(
        &self,
        study_id: &StudyId,
    ) -> EngineResult<Option<ConfigVersion>> {
        self.require_study(study_id).await?;
        self.stored_config_hash(study_id).await
    }

    async fn get_config(
        &self,
        study_id: &StudyId,
        version: &ConfigVersion,
    ) -> EngineResult<Option<StudyConfig>> {
        let retrieval = |reason: String| EngineError::ConfigRetrieval {
            study_id: study_id.clone(),
            reason,
        };
        let key = ObjectKey::config(study_id, version);
        let Some(bytes) = self
            .objects
            .download(&key)
            .await
            .map_err(|e| retrieval(e.to_string()))?
        else {
            return Ok(None);
        };
        let text = String::from_utf8(bytes).map_err(|e| retrieval(e.to_string()))?;
        if !self.addresser.verify(&text, version) {
            return Err(retrieval(format!("content of {key} does not match its hash")));
        }
        StudyConfig::from_json(&text)
            .map(Some)
            .map_err(|e| retrieval(e.to_string()))
    }

    async fn set_sequence_array(&self, study_id: &StudyId, pool: &[Sequence]) -> EngineResult<()> {
        self.require_study(study_id).await?;
        let key = ObjectKey::sequence_array(study_id);
        self.objects
            .upload(&key, serde_json::to_vec(pool)?, UploadOptions::MUTABLE)
            .await
            .map_err(|source| EngineError::Upload {
                key: key.path(),
                source,
            })?;
        let fresh = vec![0u64; pool.len()];
        self.edit_record(study_id, |record| {
            if record.sequence_assignments.as_ref() == Some(&fresh) {
                return Ok(RecordEdit::Keep(()));
            }
            record.sequence_assignments = Some(fresh.clone());
            Ok(RecordEdit::Write(()))
        })
        .await?;
        info!(study_id = %study_id, slots = pool.len(), "sequence pool published");
        Ok(())
    }

    async fn get_sequence_array(&self, study_id: &StudyId) -> EngineResult<Option<Vec<Sequence>>> {
        self.require_study(study_id).await?;
        let key = ObjectKey::sequence_array(study_id);
        let bytes = self
            .objects
            .download(&key)
            .await
            .map_err(|source| EngineError::Download {
                key: key.path(),
                source,
            })?;
        bytes
            .map(|bytes| serde_json::from_slice(&bytes))
            .transpose()
            .map_err(Into::into)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cohort_store::{
        AnonymousAuth, InMemoryIdentityStore, InMemoryObjectStore, InMemoryStudyRegistry,
        StoreResult,
    };
    use serde_json::json;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::time::Duration;

    /// Object store that can fail or hide participant records on demand.
    #[derive(Default)]
    struct ParticipantFaults {
        inner: InMemoryObjectStore,
        /// The next participant read reports the record as absent.
        hide_next_read: AtomicBool,
        fail_reads: AtomicBool,
        fail_uploads: AtomicBool,
    }

    impl ParticipantFaults {
        fn applies(key: &ObjectKey) -> bool {
            key.kind() == cohort_types::StorageObjectType::ParticipantData
        }
    }

    #[async_trait]
    impl ObjectStore for ParticipantFaults {
        async fn upload(
            &self,
            key: &ObjectKey,
            data: Vec<u8>,
            options: UploadOptions,
        ) -> StoreResult<()> {
            if Self::applies(key) && self.fail_uploads.load(Ordering::SeqCst) {
                return Err(StoreError::Backend("participant uploads failing".into()));
            }
            self.inner.upload(key, data, options).await
        }

        async fn download(&self, key: &ObjectKey) -> StoreResult<Option<Vec<u8>>> {
            if Self::applies(key) {
                if self.hide_next_read.swap(false, Ordering::SeqCst) {
                    return Ok(None);
                }
                if self.fail_reads.load(Ordering::SeqCst) {
                    return Err(StoreError::Backend("participant reads failing".into()));
                }
            }
            self.inner.download(key).await
        }

        async fn remove(&self, keys: &[ObjectKey]) -> StoreResult<usize> {
            self.inner.remove(keys).await
        }
    }

    struct Harness {
        engine: ObjectStorageEngine,
        faults: Arc<ParticipantFaults>,
        identities: Arc<InMemoryIdentityStore>,
        study: StudyId,
        config: StudyConfig,
    }

    impl Harness {
        fn new() -> Self {
            Self::with(EngineConfig::default(), Arc::new(AnonymousAuth), |r| r)
        }

        fn with(
            config: EngineConfig,
            auth: Arc<dyn AuthProvider>,
            wrap: impl FnOnce(Arc<dyn StudyRegistry>) -> Arc<dyn StudyRegistry>,
        ) -> Self {
            let faults = Arc::new(ParticipantFaults::default());
            let identities = Arc::new(InMemoryIdentityStore::new());
            let backends = Backends {
                objects: faults.clone(),
                registry: wrap(Arc::new(InMemoryStudyRegistry::new())),
                identities: identities.clone(),
                auth,
            };
            Self {
                engine: ObjectStorageEngine::new(backends, config),
                faults,
                identities,
                study: StudyId::new("S1").unwrap(),
                config: study_config(1),
            }
        }

        async fn ready(&self) -> ConfigVersion {
            let version = self
                .engine
                .initialize_study_db(&self.study, &self.config)
                .await
                .unwrap();
            self.engine
                .set_sequence_array(&self.study, &pool())
                .await
                .unwrap();
            version
        }

        fn objects(&self) -> &InMemoryObjectStore {
            &self.faults.inner
        }

        fn session(&self) -> StudySession {
            StudySession::new(self.study.clone())
        }

        async fn join(
            &self,
            session: &mut StudySession,
            url_id: Option<&ParticipantId>,
        ) -> EngineResult<ParticipantData> {
            self.engine
                .initialize_participant_session(
                    session,
                    SearchParams::new(),
                    &self.config,
                    ParticipantMetadata::default(),
                    url_id,
                )
                .await
        }

        async fn stored(&self, id: &ParticipantId) -> Option<ParticipantData> {
            self.engine
                .get_participant_data(&self.study, id)
                .await
                .unwrap()
        }
    }

    fn study_config(revision: u32) -> StudyConfig {
        StudyConfig::new(json!({
            "studyMetadata": {"title": "Demo", "version": revision},
            "components": {"intro": {}, "trial": {}},
        }))
    }

    fn pool() -> Vec<Sequence> {
        vec![
            vec!["intro".into(), "trial".into()],
            vec!["trial".into(), "intro".into()],
        ]
    }

    fn pid(s: &str) -> ParticipantId {
        ParticipantId::new(s).unwrap()
    }

    fn answers(n: u32) -> Answers {
        let mut answers = Answers::new();
        answers.insert("intro".into(), json!({"clicks": n}));
        answers
    }

    struct DenyingAuth;

    #[async_trait]
    impl AuthProvider for DenyingAuth {
        async fn sign_in_anonymously(&self) -> StoreResult<()> {
            Err(StoreError::Auth("anonymous sign-in disabled".into()))
        }
    }

    /// Registry whose compare-and-swap always loses the race.
    struct ContendedRegistry(Arc<dyn StudyRegistry>);

    #[async_trait]
    impl StudyRegistry for ContendedRegistry {
        async fn insert(&self, study_id: &StudyId, data: &StudyRecord) -> StoreResult<RegistryRow> {
            self.0.insert(study_id, data).await
        }

        async fn select(&self, study_id: &StudyId) -> StoreResult<Option<RegistryRow>> {
            self.0.select(study_id).await
        }

        async fn update(&self, study_id: &StudyId, data: &StudyRecord) -> StoreResult<RegistryRow> {
            self.0.update(study_id, data).await
        }

        async fn compare_and_swap(
            &self,
            study_id: &StudyId,
            expected_revision: u64,
            _data: &StudyRecord,
        ) -> StoreResult<RegistryRow> {
            Err(StoreError::Conflict {
                study_id: study_id.clone(),
                expected: expected_revision,
                actual: expected_revision + 1,
            })
        }
    }

    #[tokio::test]
    async fn initialize_study_is_idempotent() {
        let h = Harness::new();
        let first = h.engine.initialize_study_db(&h.study, &h.config).await.unwrap();
        let second = h.engine.initialize_study_db(&h.study, &h.config).await.unwrap();
        assert_eq!(first, second);
        assert_eq!(first, ContentAddresser::CONFIG.hash_config(&h.config).unwrap());
        assert!(h.engine.verify_study_database(&h.study).await.unwrap());
        assert_eq!(
            h.engine.get_current_config_hash(&h.study).await.unwrap(),
            Some(first)
        );
        assert_eq!(
            h.engine.get_config(&h.study, &first).await.unwrap(),
            Some(h.config.clone())
        );
    }

    #[tokio::test]
    async fn unchanged_config_keeps_pool_and_identity() {
        let h = Harness::new();
        h.ready().await;
        let id = h.engine.get_current_participant_id(&h.study, None).unwrap();

        h.engine.initialize_study_db(&h.study, &h.config).await.unwrap();
        assert_eq!(h.engine.get_sequence_array(&h.study).await.unwrap(), Some(pool()));
        assert_eq!(h.engine.get_current_participant_id(&h.study, None).unwrap(), id);
    }

    #[tokio::test]
    async fn config_change_purges_pool_and_identity() {
        let h = Harness::new();
        let old = h.ready().await;
        let id = h.engine.get_current_participant_id(&h.study, None).unwrap();

        let new = h
            .engine
            .initialize_study_db(&h.study, &study_config(2))
            .await
            .unwrap();
        assert_ne!(old, new);
        assert_eq!(h.engine.get_current_config_hash(&h.study).await.unwrap(), Some(new));
        assert_eq!(h.engine.get_sequence_array(&h.study).await.unwrap(), None);
        assert_eq!(
            h.identities.get(&format!("S1/{CURRENT_PARTICIPANT_KEY}")).unwrap(),
            None
        );
        assert_ne!(h.engine.get_current_participant_id(&h.study, None).unwrap(), id);
        // Both versions stay retrievable.
        assert!(h.engine.get_config(&h.study, &old).await.unwrap().is_some());
        assert!(h.engine.get_config(&h.study, &new).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn config_blob_is_immutable_and_cached() {
        let h = Harness::new();
        let version = h.ready().await;
        let key = ObjectKey::config(&h.study, &version);
        assert_eq!(h.objects().is_cached(&key), Some(true));
        assert_eq!(
            h.objects().is_cached(&ObjectKey::sequence_array(&h.study)),
            Some(false)
        );
    }

    #[tokio::test]
    async fn tampered_config_blob_is_rejected() {
        let h = Harness::new();
        let version = h.ready().await;
        let key = ObjectKey::config(&h.study, &version);
        h.objects()
            .upload(&key, br#"{"components":{}}"#.to_vec(), UploadOptions::MUTABLE)
            .await
            .unwrap();
        assert!(matches!(
            h.engine.get_config(&h.study, &version).await,
            Err(EngineError::ConfigRetrieval { .. })
        ));
    }

    #[tokio::test]
    async fn unknown_config_version_is_absent() {
        let h = Harness::new();
        h.ready().await;
        let other = ContentAddresser::CONFIG.hash("{}");
        assert_eq!(h.engine.get_config(&h.study, &other).await.unwrap(), None);
    }

    #[tokio::test]
    async fn strict_init_surfaces_auth_failure() {
        let h = Harness::with(EngineConfig::default(), Arc::new(DenyingAuth), |r| r);
        assert!(matches!(
            h.engine.initialize_study_db(&h.study, &h.config).await,
            Err(EngineError::Auth(_))
        ));
        assert!(!h.engine.verify_study_database(&h.study).await.unwrap());
    }

    #[tokio::test]
    async fn lenient_init_continues_after_auth_failure() {
        let config = EngineConfig {
            strict_init: false,
            ..EngineConfig::default()
        };
        let h = Harness::with(config, Arc::new(DenyingAuth), |r| r);
        h.engine.initialize_study_db(&h.study, &h.config).await.unwrap();
        assert!(h.engine.verify_study_database(&h.study).await.unwrap());
    }

    #[tokio::test]
    async fn operations_on_unknown_study_fail() {
        let h = Harness::new();
        let mut session = h.session();
        assert!(matches!(
            h.join(&mut session, None).await,
            Err(EngineError::StudyNotInitialized(_))
        ));
        assert!(matches!(
            h.engine.get_modes(&h.study).await,
            Err(EngineError::StudyNotInitialized(_))
        ));
        assert!(matches!(
            h.engine.set_sequence_array(&h.study, &pool()).await,
            Err(EngineError::StudyNotInitialized(_))
        ));
        assert!(matches!(
            h.engine.get_current_config_hash(&h.study).await,
            Err(EngineError::StudyNotInitialized(_))
        ));
    }

    #[tokio::test]
    async fn missing_pool_blocks_new_participants() {
        let h = Harness::new();
        h.engine.initialize_study_db(&h.study, &h.config).await.unwrap();
        let mut session = h.session();
        assert!(matches!(
            h.join(&mut session, None).await,
            Err(EngineError::SequencePoolMissing(_))
        ));
        assert!(session.participant().is_none());
    }

    #[tokio::test]
    async fn url_id_overrides_and_is_cached() {
        let h = Harness::new();
        h.ready().await;
        let generated = h.engine.get_current_participant_id(&h.study, None).unwrap();
        let from_url = pid("prolific-42");
        assert_eq!(
            h.engine
                .get_current_participant_id(&h.study, Some(&from_url))
                .unwrap(),
            from_url
        );
        assert_ne!(generated, from_url);
        assert_eq!(
            h.engine.get_current_participant_id(&h.study, None).unwrap(),
            from_url
        );
        h.engine.clear_current_participant_id(&h.study).unwrap();
        assert_ne!(
            h.engine.get_current_participant_id(&h.study, None).unwrap(),
            from_url
        );
    }

    #[tokio::test]
    async fn identities_are_scoped_per_study() {
        let h = Harness::new();
        let other = StudyId::new("S2").unwrap();
        let a = h.engine.get_current_participant_id(&h.study, None).unwrap();
        let b = h.engine.get_current_participant_id(&other, None).unwrap();
        assert_ne!(a, b);
        h.engine.clear_current_participant_id(&other).unwrap();
        assert_eq!(h.engine.get_current_participant_id(&h.study, None).unwrap(), a);
    }

    #[tokio::test]
    async fn new_participant_is_created_once_and_reattached() {
        let h = Harness::new();
        let version = h.ready().await;

        let mut session = h.session();
        let created = h.join(&mut session, Some(&pid("P1"))).await.unwrap();
        assert_eq!(created.participant_config_hash, version);
        assert_eq!(created.participant_index, 1);
        assert_eq!(created.sequence, pool()[0]);
        assert!(created.answers.is_empty());
        assert_eq!(h.stored(&pid("P1")).await, Some(created.clone()));

        let baseline = h.objects().upload_count();
        let mut again = h.session();
        let reattached = h.join(&mut again, Some(&pid("P1"))).await.unwrap();
        assert_eq!(reattached, created);
        assert_eq!(h.objects().upload_count(), baseline);

        // Reattaching did not consume a slot.
        let mut next = h.session();
        let second = h.join(&mut next, Some(&pid("P2"))).await.unwrap();
        assert_eq!(second.participant_index, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn unreadable_record_is_never_overwritten() {
        let h = Harness::new();
        h.ready().await;
        let mut session = h.session();
        h.join(&mut session, Some(&pid("P1"))).await.unwrap();
        h.engine.save_answers(&mut session, answers(1)).unwrap();
        h.engine.flush(&session).await.unwrap();

        h.faults.fail_reads.store(true, Ordering::SeqCst);
        let mut again = h.session();
        assert!(matches!(
            h.join(&mut again, Some(&pid("P1"))).await,
            Err(EngineError::Download { .. })
        ));
        assert!(again.participant().is_none());

        h.faults.fail_reads.store(false, Ordering::SeqCst);
        let stored = h.stored(&pid("P1")).await.unwrap();
        assert_eq!(stored.answers, answers(1));
        assert_eq!(stored.participant_index, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn unreadable_record_after_lost_create_race_is_kept() {
        let h = Harness::new();
        h.ready().await;
        let mut session = h.session();
        h.join(&mut session, Some(&pid("P1"))).await.unwrap();
        h.engine.save_answers(&mut session, answers(2)).unwrap();
        h.engine.flush(&session).await.unwrap();

        // The first read misses the record, the create collides with it,
        // and the read-back fails.
        h.faults.hide_next_read.store(true, Ordering::SeqCst);
        h.faults.fail_reads.store(true, Ordering::SeqCst);
        let mut again = h.session();
        assert!(matches!(
            h.join(&mut again, Some(&pid("P1"))).await,
            Err(EngineError::Download { .. })
        ));

        h.faults.fail_reads.store(false, Ordering::SeqCst);
        let stored = h.stored(&pid("P1")).await.unwrap();
        assert_eq!(stored.answers, answers(2));
        assert_eq!(stored.participant_index, 1);

        // The slot taken for the failed attempt was given back.
        let mut next = h.session();
        assert_eq!(h.join(&mut next, Some(&pid("P2"))).await.unwrap().participant_index, 2);
    }

    #[tokio::test]
    async fn lost_create_race_reattaches_and_releases_the_slot() {
        let h = Harness::new();
        h.ready().await;
        let mut session = h.session();
        let created = h.join(&mut session, Some(&pid("P1"))).await.unwrap();

        h.faults.hide_next_read.store(true, Ordering::SeqCst);
        let mut again = h.session();
        assert_eq!(h.join(&mut again, Some(&pid("P1"))).await.unwrap(), created);

        let mut next = h.session();
        assert_eq!(h.join(&mut next, Some(&pid("P2"))).await.unwrap().participant_index, 2);
    }

    #[tokio::test]
    async fn failed_create_releases_the_slot() {
        let h = Harness::new();
        h.ready().await;

        h.faults.fail_uploads.store(true, Ordering::SeqCst);
        let mut session = h.session();
        assert!(matches!(
            h.join(&mut session, Some(&pid("P1"))).await,
            Err(EngineError::Upload { .. })
        ));
        assert!(session.participant().is_none());

        h.faults.fail_uploads.store(false, Ordering::SeqCst);
        let mut next = h.session();
        assert_eq!(h.join(&mut next, Some(&pid("P2"))).await.unwrap().participant_index, 1);
    }

    #[tokio::test]
    async fn malformed_record_is_replaced_on_join() {
        let h = Harness::new();
        h.ready().await;
        h.objects()
            .upload(
                &ObjectKey::participant_data(&h.study, &pid("P1")),
                b"not json".to_vec(),
                UploadOptions::MUTABLE,
            )
            .await
            .unwrap();

        let mut session = h.session();
        let data = h.join(&mut session, Some(&pid("P1"))).await.unwrap();
        assert_eq!(data.participant_index, 1);
        assert_eq!(h.stored(&pid("P1")).await, Some(data));
    }

    #[tokio::test]
    async fn least_assigned_spreads_participants() {
        let h = Harness::new();
        h.ready().await;
        let mut indexes = Vec::new();
        for n in 0..6 {
            let mut session = h.session();
            let data = h.join(&mut session, Some(&pid(&format!("P{n}")))).await.unwrap();
            indexes.push(data.participant_index);
        }
        assert_eq!(indexes, vec![1, 2, 1, 2, 1, 2]);
    }

    #[tokio::test]
    async fn first_slot_policy_always_picks_the_first_sequence() {
        let config = EngineConfig {
            allocation_policy: crate::allocator::AllocationPolicy::FirstSlot,
            ..EngineConfig::default()
        };
        let h = Harness::with(config, Arc::new(AnonymousAuth), |r| r);
        h.ready().await;
        for n in 0..3 {
            let mut session = h.session();
            let data = h.join(&mut session, Some(&pid(&format!("P{n}")))).await.unwrap();
            assert_eq!(data.participant_index, 1);
        }
    }

    #[tokio::test]
    async fn republishing_the_pool_resets_assignments() {
        let h = Harness::new();
        h.ready().await;
        let mut session = h.session();
        h.join(&mut session, Some(&pid("P1"))).await.unwrap();

        h.engine.set_sequence_array(&h.study, &pool()).await.unwrap();
        let mut session = h.session();
        let data = h.join(&mut session, Some(&pid("P2"))).await.unwrap();
        assert_eq!(data.participant_index, 1);
    }

    #[tokio::test]
    async fn stale_record_in_store_is_reattached() {
        let h = Harness::new();
        h.ready().await;
        let existing = ParticipantData::new(
            pid("P1"),
            ContentAddresser::CONFIG.hash("older"),
            vec!["trial".into()],
            7,
            SearchParams::new(),
            ParticipantMetadata::default(),
        );
        h.objects()
            .upload(
                &ObjectKey::participant_data(&h.study, &pid("P1")),
                serde_json::to_vec(&existing).unwrap(),
                UploadOptions::MUTABLE,
            )
            .await
            .unwrap();

        let mut session = h.session();
        assert_eq!(h.join(&mut session, Some(&pid("P1"))).await.unwrap(), existing);
    }

    #[tokio::test]
    async fn malformed_participant_record_reads_as_absent() {
        let h = Harness::new();
        h.ready().await;
        h.objects()
            .upload(
                &ObjectKey::participant_data(&h.study, &pid("P1")),
                b"not json".to_vec(),
                UploadOptions::MUTABLE,
            )
            .await
            .unwrap();
        assert_eq!(h.stored(&pid("P1")).await, None);
    }

    #[tokio::test]
    async fn save_answers_requires_a_participant() {
        let h = Harness::new();
        h.ready().await;
        let mut session = h.session();
        assert!(matches!(
            h.engine.save_answers(&mut session, answers(1)),
            Err(EngineError::ParticipantNotInitialized)
        ));
        assert!(matches!(
            h.engine.finalize_participant(&mut session).await,
            Err(EngineError::ParticipantNotInitialized)
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn answer_bursts_are_written_once_per_window() {
        let h = Harness::new();
        h.ready().await;
        let mut session = h.session();
        h.join(&mut session, Some(&pid("P1"))).await.unwrap();
        let baseline = h.objects().upload_count();

        for n in 1..=5 {
            h.engine.save_answers(&mut session, answers(n)).unwrap();
            tokio::time::sleep(Duration::from_millis(200)).await;
        }
        assert_eq!(h.objects().upload_count(), baseline);
        assert_eq!(session.participant().unwrap().answers, answers(5));

        tokio::time::sleep(Duration::from_secs(3)).await;
        tokio::task::yield_now().await;
        assert_eq!(h.objects().upload_count(), baseline + 1);
        assert_eq!(h.stored(&pid("P1")).await.unwrap().answers, answers(5));
    }

    #[tokio::test(start_paused = true)]
    async fn flush_writes_pending_answers_immediately() {
        let h = Harness::new();
        h.ready().await;
        let mut session = h.session();
        h.join(&mut session, Some(&pid("P1"))).await.unwrap();

        h.engine.save_answers(&mut session, answers(3)).unwrap();
        assert!(h.engine.flush(&session).await.unwrap());
        assert_eq!(h.stored(&pid("P1")).await.unwrap().answers, answers(3));
        assert!(!h.engine.flush(&session).await.unwrap());
    }

    #[tokio::test(start_paused = true)]
    async fn failed_flush_keeps_answers_for_retry() {
        let h = Harness::new();
        h.ready().await;
        let mut session = h.session();
        h.join(&mut session, Some(&pid("P1"))).await.unwrap();

        h.engine.save_answers(&mut session, answers(2)).unwrap();
        h.objects().set_offline(true);
        assert!(matches!(
            h.engine.flush(&session).await,
            Err(EngineError::Upload { .. })
        ));
        h.objects().set_offline(false);
        assert!(h.engine.flush(&session).await.unwrap());
        assert_eq!(h.stored(&pid("P1")).await.unwrap().answers, answers(2));
    }

    #[tokio::test(start_paused = true)]
    async fn finalize_marks_completed_without_waiting() {
        let h = Harness::new();
        h.ready().await;
        let mut session = h.session();
        h.join(&mut session, Some(&pid("P1"))).await.unwrap();
        h.engine.save_answers(&mut session, answers(1)).unwrap();

        h.engine.finalize_participant(&mut session).await.unwrap();
        let stored = h.stored(&pid("P1")).await.unwrap();
        assert!(stored.completed);
        assert_eq!(stored.answers, answers(1));
    }

    #[tokio::test(start_paused = true)]
    async fn next_participant_starts_fresh() {
        let h = Harness::new();
        h.ready().await;
        let mut session = h.session();
        let first = h.join(&mut session, None).await.unwrap();
        h.engine.save_answers(&mut session, answers(4)).unwrap();

        let second = h
            .engine
            .next_participant(
                &mut session,
                SearchParams::new(),
                &h.config,
                ParticipantMetadata::default(),
            )
            .await
            .unwrap();
        assert_ne!(second.participant_id, first.participant_id);
        assert_eq!(second.participant_index, 2);
        assert_eq!(session.participant_id(), Some(&second.participant_id));
        // The outgoing participant's answers were flushed on the way out.
        assert_eq!(h.stored(&first.participant_id).await.unwrap().answers, answers(4));
        assert_eq!(
            h.engine.get_current_participant_id(&h.study, None).unwrap(),
            second.participant_id
        );
    }

    #[tokio::test]
    async fn modes_default_to_enabled_and_can_be_toggled() {
        let h = Harness::new();
        h.ready().await;
        assert_eq!(h.engine.get_modes(&h.study).await.unwrap(), StudyModes::default());

        let modes = h
            .engine
            .set_mode(&h.study, ModeKey::StudyNavigatorEnabled, false)
            .await
            .unwrap();
        assert!(!modes.study_navigator_enabled);
        assert!(modes.data_collection_enabled);
        assert_eq!(h.engine.get_modes(&h.study).await.unwrap(), modes);
    }

    #[tokio::test(start_paused = true)]
    async fn preview_participants_are_not_persisted() {
        let h = Harness::new();
        h.ready().await;
        h.engine
            .set_mode(&h.study, ModeKey::DataCollectionEnabled, false)
            .await
            .unwrap();
        let baseline = h.objects().upload_count();

        let mut session = h.session();
        let data = h.join(&mut session, Some(&pid("P1"))).await.unwrap();
        assert!(session.is_preview());
        assert_eq!(data.participant_index, 1);
        h.engine.save_answers(&mut session, answers(1)).unwrap();
        h.engine.finalize_participant(&mut session).await.unwrap();
        tokio::time::sleep(Duration::from_secs(5)).await;

        assert_eq!(h.objects().upload_count(), baseline);
        assert_eq!(h.stored(&pid("P1")).await, None);

        // Previews do not consume slots.
        h.engine
            .set_mode(&h.study, ModeKey::DataCollectionEnabled, true)
            .await
            .unwrap();
        let mut session = h.session();
        assert_eq!(h.join(&mut session, Some(&pid("P2"))).await.unwrap().participant_index, 1);
    }

    #[tokio::test]
    async fn sequence_pool_round_trips() {
        let h = Harness::new();
        h.engine.initialize_study_db(&h.study, &h.config).await.unwrap();
        assert_eq!(h.engine.get_sequence_array(&h.study).await.unwrap(), None);
        h.engine.set_sequence_array(&h.study, &pool()).await.unwrap();
        assert_eq!(h.engine.get_sequence_array(&h.study).await.unwrap(), Some(pool()));
    }

    #[tokio::test]
    async fn unreachable_pool_is_a_download_error() {
        let h = Harness::new();
        h.ready().await;
        h.objects().set_offline(true);
        assert!(matches!(
            h.engine.get_sequence_array(&h.study).await,
            Err(EngineError::Download { .. })
        ));
    }

    #[tokio::test]
    async fn lost_races_end_in_contention() {
        let config = EngineConfig {
            max_cas_retries: 3,
            ..EngineConfig::default()
        };
        let h = Harness::with(config, Arc::new(AnonymousAuth), |inner| {
            Arc::new(ContendedRegistry(inner)) as Arc<dyn StudyRegistry>
        });
        assert!(matches!(
            h.engine.initialize_study_db(&h.study, &h.config).await,
            Err(EngineError::Contention { attempts: 3, .. })
        ));
    }
}
