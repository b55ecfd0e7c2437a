//! The device-local identity cache.
//!
//! Remembers which participant this device is, so a page reload reattaches
//! to the same participant record. Purely local, no network.

mod file;
mod memory;

pub use file::FileIdentityStore;
pub use memory::InMemoryIdentityStore;

use crate::error::StoreResult;

/// Durable local key-value store.
///
/// Failures (quota, I/O, corrupt files) are returned to the caller and
/// never swallowed: losing the identity silently would fork a participant.
pub trait IdentityStore: Send + Sync {
    /// Returns `Ok(None)` if the key has never been set.
    fn get(&self, key: &str) -> StoreResult<Option<String>>;

    fn set(&self, key: &str, value: &str) -> StoreResult<()>;

    /// Returns `true` if the key existed.
    fn remove(&self, key: &str) -> StoreResult<bool>;
}
