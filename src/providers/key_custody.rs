use async_trait::async_trait;

use crate::error::Result;

/// Signer lookup. Keys are only used to build a transient signer and are
/// never written anywhere by the caller.
#[async_trait]
pub trait KeyCustody: Send + Sync {
    async fn retrieve_private_key(&self, address: &str) -> Result<String>;
}
