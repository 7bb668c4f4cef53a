//! Chat-completion transport.

use async_trait::async_trait;

use crate::error::Result;
use crate::types::conversation::Turn;

/// Opaque chat-completion capability.
///
/// One call sends a system prompt plus ordered turns and returns the
/// assistant's reply text. Implementations own retries, rate limits and
/// model selection.
#[async_trait]
pub trait LlmClient: Send + Sync {
    async fn send(&self, system_prompt: &str, turns: &[Turn]) -> Result<String>;

    /// Convenience for the common single-user-turn call.
    async fn ask(&self, system_prompt: &str, user: &str) -> Result<String> {
        self.send(system_prompt, &[Turn::user(user)]).await
    }
}
