use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::allocator::AllocationPolicy;
use crate::error::{EngineError, EngineResult};

/// Configuration for the storage engine.
///
/// Every field has a default, so an empty TOML document is a valid
/// configuration.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Coalescing window for participant writes, in milliseconds.
    pub throttle_window_ms: u64,
    /// How newly created participants are assigned a slot in the pool.
    pub allocation_policy: AllocationPolicy,
    /// When `true`, sign-in failures and unexpected registry insert errors
    /// abort `initialize_study_db`; when `false` they are only logged.
    pub strict_init: bool,
    /// Compare-and-swap attempts before a registry edit gives up.
    pub max_cas_retries: u32,
    /// Which backends to open at process start.
    pub backend: BackendConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            throttle_window_ms: 3_000,
            allocation_policy: AllocationPolicy::default(),
            strict_init: true,
            max_cas_retries: 8,
            backend: BackendConfig::default(),
        }
    }
}

impl EngineConfig {
    /// Parse a configuration from TOML text.
    pub fn from_toml_str(text: &str) -> EngineResult<Self> {
        let config: Self = toml::from_str(text).map_err(|e| EngineError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Load a configuration file.
    pub fn load(path: &Path) -> EngineResult<Self> {
        let text = std::fs::read_to_string(path)
            .map_err(|e| EngineError::Config(format!("{}: {e}", path.display())))?;
        Self::from_toml_str(&text)
    }

    pub fn validate(&self) -> EngineResult<()> {
        if self.max_cas_retries == 0 {
            return Err(EngineError::Config(
                "max_cas_retries must be at least 1".into(),
            ));
        }
        Ok(())
    }

    pub fn throttle_window(&self) -> Duration {
        Duration::from_millis(self.throttle_window_ms)
    }
}

/// Storage backends selectable at process start.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum BackendConfig {
    /// Everything in process memory; lost on exit.
    #[default]
    Memory,
    /// Objects, registry rows, and the identity cache under one directory.
    File { root: PathBuf },
}
