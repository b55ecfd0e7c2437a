//! Storage boundaries for Cohort.
//!
//! The persistence engine talks to four external collaborators. Each is a
//! trait here, with an in-memory backend for tests and embedding and a
//! local-file backend for single-machine deployments:
//!
//! | Boundary | Trait | Backends |
//! |---|---|---|
//! | Remote object store | [`ObjectStore`] | [`InMemoryObjectStore`], [`FileObjectStore`] |
//! | Study metadata table | [`StudyRegistry`] | [`InMemoryStudyRegistry`], [`FileStudyRegistry`] |
//! | Device-local identity cache | [`IdentityStore`] | [`InMemoryIdentityStore`], [`FileIdentityStore`] |
//! | Anonymous auth | [`AuthProvider`] | [`AnonymousAuth`] |
//!
//! # Design Rules
//!
//! 1. Absence is not an error: reads of missing objects or rows return `Ok(None)`.
//! 2. The registry is the only place with a compare-and-swap; blobs are last-write-wins.
//! 3. File backends replace files atomically (temp file + rename).
//! 4. All I/O errors are propagated, never silently ignored.

mod atomic;
pub mod auth;
pub mod error;
pub mod identity;
pub mod object;
pub mod registry;

pub use auth::{AnonymousAuth, AuthProvider};
pub use error::{StoreError, StoreResult};
pub use identity::{FileIdentityStore, IdentityStore, InMemoryIdentityStore};
pub use object::{FileObjectStore, InMemoryObjectStore, ObjectKey, ObjectStore, UploadOptions};
pub use registry::{FileStudyRegistry, InMemoryStudyRegistry, RegistryRow, StudyRegistry};
