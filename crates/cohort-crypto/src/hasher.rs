use cohort_types::{ConfigVersion, StudyConfig};

/// Domain-separated BLAKE3 content addresser.
///
/// The domain tag is prepended to every hash computation, so a config hash
/// can never collide with a hash of the same bytes computed for another
/// purpose.
#[derive(Clone, Copy, Debug)]
pub struct ContentAddresser {
    domain: &'static str,
}

impl ContentAddresser {
    /// Addresser for study configuration documents.
    pub const CONFIG: Self = Self {
        domain: "cohort-config-v1",
    };

    /// Create an addresser with a custom domain tag.
    pub const fn new(domain: &'static str) -> Self {
        Self { domain }
    }

    /// Hash an already-serialized configuration.
    pub fn hash(&self, serialized: &str) -> ConfigVersion {
        let mut hasher = blake3::Hasher::new();
        hasher.update(self.domain.as_bytes());
        hasher.update(b":");
        hasher.update(serialized.as_bytes());
        ConfigVersion::from_hash(*hasher.finalize().as_bytes())
    }

    /// Hash a configuration via its canonical serialization.
    pub fn hash_config(&self, config: &StudyConfig) -> Result<ConfigVersion, HasherError> {
        let serialized = config
            .canonical_json()
            .map_err(|e| HasherError::Serialization(e.to_string()))?;
        Ok(self.hash(&serialized))
    }

    /// Verify that serialized content produces the expected version.
    pub fn verify(&self, serialized: &str, expected: &ConfigVersion) -> bool {
        self.hash(serialized) == *expected
    }

    /// The domain tag used by this addresser.
    pub fn domain(&self) -> &str {
        self.domain
    }
}

impl Default for ContentAddresser {
    fn default() -> Self {
        Self::CONFIG
    }
}

/// Errors from hashing operations.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum HasherError {
    #[error("serialization error: {0}")]
    Serialization(String),
}
