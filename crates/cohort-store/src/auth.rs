use async_trait::async_trait;

use crate::error::StoreResult;

/// Anonymous authentication against the storage backend.
///
/// The engine signs in before touching any store. Backends without access
/// control use [`AnonymousAuth`].
#[async_trait]
pub trait AuthProvider: Send + Sync {
    async fn sign_in_anonymously(&self) -> StoreResult<()>;
}

/// Auth provider for backends that need no session.
#[derive(Clone, Copy, Debug, Default)]
pub struct AnonymousAuth;

#[async_trait]
impl AuthProvider for AnonymousAuth {
    async fn sign_in_anonymously(&self) -> StoreResult<()> {
        Ok(())
    }
}
