use async_trait::async_trait;

use crate::errors::DroidClawResult;
use crate::llm::types::{CallConfig, ChatMessage, LlmResponse, ToolDef};

/// Unified chat-completion backend. The agent loop only talks to this trait;
/// new providers implement it and get registered from config.toml.
#[async_trait]
pub trait LlmProvider: Send + Sync {
    /// Returns the provider's identifier (matches the config.toml key).
    fn name(&self) -> &str;

    /// Run one completion with vision content and function calling enabled.
    async fn chat(
        &self,
        messages: Vec<ChatMessage>,
        tools: Vec<ToolDef>,
        cfg: &CallConfig,
    ) -> DroidClawResult<LlmResponse>;
}
