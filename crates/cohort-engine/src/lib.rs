//! Study storage engine for Cohort.
//!
//! The engine composes the storage boundaries from `cohort-store` into the
//! study lifecycle:
//!
//! 1. [`StorageEngine::initialize_study_db`] registers the study, stores
//!    the config blob under its content hash, and purges the sequence pool
//!    and cached identity when the config changed.
//! 2. [`StorageEngine::initialize_participant_session`] resolves the
//!    participant identity, reattaches an existing record or allocates a
//!    sequence and creates one (exactly once).
//! 3. [`StorageEngine::save_answers`] updates the record in memory and
//!    hands it to a [`ThrottledWriter`], which coalesces bursts into at most
//!    one write per window.
//!
//! The store offers no transactions. Registry edits go through
//! revision-checked compare-and-swap loops; blob writes are
//! last-write-wins.

pub mod allocator;
pub mod backend;
pub mod config;
pub mod engine;
pub mod error;
pub mod session;
pub mod throttle;
pub mod traits;

pub use allocator::{Allocation, AllocationError, AllocationPolicy, SequenceAllocator};
pub use backend::{open_engine, Backends};
pub use config::{BackendConfig, EngineConfig};
pub use engine::ObjectStorageEngine;
pub use error::{EngineError, EngineResult};
pub use session::StudySession;
pub use throttle::{FlushSink, ThrottledWriter, WriterStats};
pub use traits::StorageEngine;

// Re-export key types
pub use cohort_types::{
    Answers, ConfigVersion, ModeKey, ParticipantData, ParticipantId, ParticipantMetadata,
    SearchParams, Sequence, StudyConfig, StudyId, StudyModes,
};
