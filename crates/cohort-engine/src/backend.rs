//! Backend selection: which stores sit behind an engine.

use std::path::Path;
use std::sync::Arc;

use cohort_store::{
    AnonymousAuth, AuthProvider, FileIdentityStore, FileObjectStore, FileStudyRegistry,
    IdentityStore, InMemoryIdentityStore, InMemoryObjectStore, InMemoryStudyRegistry, ObjectStore,
    StudyRegistry,
};
use tracing::info;

use crate::config::{BackendConfig, EngineConfig};
use crate::engine::ObjectStorageEngine;
use crate::error::EngineResult;
use crate::traits::StorageEngine;

/// The four storage boundaries an engine is built from.
#[derive(Clone)]
pub struct Backends {
    pub objects: Arc<dyn ObjectStore>,
    pub registry: Arc<dyn StudyRegistry>,
    pub identities: Arc<dyn IdentityStore>,
    pub auth: Arc<dyn AuthProvider>,
}

impl Backends {
    /// Process-local backends; nothing survives a restart.
    pub fn in_memory() -> Self {
        Self {
            objects: Arc::new(InMemoryObjectStore::new()),
            registry: Arc::new(InMemoryStudyRegistry::new()),
            identities: Arc::new(InMemoryIdentityStore::new()),
            auth: Arc::new(AnonymousAuth),
        }
    }

    /// Backends rooted at a local directory:
    /// `objects/` for blobs, `registry/` for study rows and
    /// `identity.json` for the participant identity cache.
    pub fn file(root: &Path) -> Self {
        Self {
            objects: Arc::new(FileObjectStore::new(root.join("objects"))),
            registry: Arc::new(FileStudyRegistry::new(root.join("registry"))),
            identities: Arc::new(FileIdentityStore::new(root.join("identity.json"))),
            auth: Arc::new(AnonymousAuth),
        }
    }

    pub fn from_config(config: &BackendConfig) -> Self {
        match config {
            BackendConfig::Memory => Self::in_memory(),
            BackendConfig::File { root } => Self::file(root),
        }
    }
}

/// Build the engine described by `config`.
pub fn open_engine(config: EngineConfig) -> EngineResult<Arc<dyn StorageEngine>> {
    config.validate()?;
    let backends = Backends::from_config(&config.backend);
    info!(
        backend = ?config.backend,
        policy = ?config.allocation_policy,
        window_ms = config.throttle_window_ms,
        "opening storage engine"
    );
    Ok(Arc::new(ObjectStorageEngine::new(backends, config)))
}
