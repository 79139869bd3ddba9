use async_trait::async_trait;

use crate::error::CompletionError;

/// Something that turns one prompt into one reply.
#[async_trait]
pub trait CompletionProvider: Send + Sync {
    fn has_credential(&self) -> bool;

    async fn generate(&self, prompt: &str) -> Result<String, CompletionError>;
}
