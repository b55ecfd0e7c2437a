//! Foundation types for Cohort.
//!
//! This crate provides the identity, versioning, and record types shared by
//! every other Cohort crate. It performs no I/O.
//!
//! # Key Types
//!
//! - [`StudyId`]: Identifier of a deployed study
//! - [`ParticipantId`]: Persistent participant identifier (UUID v7 or caller-supplied)
//! - [`ConfigVersion`]: Content hash of a study configuration
//! - [`StudyConfig`]: Opaque study configuration document
//! - [`ParticipantData`]: A participant's progress record
//! - [`StudyModes`]: Per-study feature flags
//! - [`StudyRecord`]: Registry row payload for a study
//! - [`StorageObjectType`]: Closed set of stored object kinds

pub mod config;
pub mod error;
pub mod identity;
pub mod modes;
pub mod object;
pub mod participant;
pub mod record;
pub mod version;

pub use config::StudyConfig;
pub use error::TypeError;
pub use identity::{ParticipantId, StudyId};
pub use modes::{ModeKey, StudyModes};
pub use object::StorageObjectType;
pub use participant::{
    Answers, ParticipantData, ParticipantMetadata, Resolution, SearchParams, Sequence, TaskId,
};
pub use record::StudyRecord;
pub use version::ConfigVersion;
