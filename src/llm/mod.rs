//! AI reasoning client module.
//!
//! This module provides a trait-based abstraction over the reasoning service,
//! with the TensorZero gateway as the primary implementation. Every response
//! carries the gateway's episode id so multi-turn conversations can be
//! correlated with the analytics store.

mod error;
mod tensorzero;

pub use error::{classify_http_status, ReasoningError, ReasoningErrorKind, RetryConfig};
pub use tensorzero::TensorZeroClient;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Role in a chat conversation.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

/// A message in a chat conversation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

impl ChatMessage {
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        ChatMessage {
            role,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::new(Role::User, content)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(Role::Assistant, content)
    }
}

/// Token usage information (if provided by the upstream gateway).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TokenUsage {
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
    pub total_tokens: u64,
}

impl TokenUsage {
    /// Create a usage object ensuring `total_tokens` is consistent.
    pub fn new(prompt_tokens: u64, completion_tokens: u64) -> Self {
        Self {
            prompt_tokens,
            completion_tokens,
            total_tokens: prompt_tokens.saturating_add(completion_tokens),
        }
    }
}

/// Response from a reasoning turn.
#[derive(Debug, Clone)]
pub struct ChatResponse {
    /// Text of the first choice
    pub content: String,
    /// Episode id assigned (or echoed) by the gateway
    pub episode_id: Option<String>,
    /// Gateway inference id for this turn
    pub inference_id: Option<String>,
    pub finish_reason: Option<String>,
    pub usage: Option<TokenUsage>,
}

/// Trait for AI reasoning clients.
#[async_trait]
pub trait ReasoningClient: Send + Sync {
    /// Run one conversation turn.
    ///
    /// When `episode_id` is set the turn is attached to that episode instead of
    /// starting a new one.
    async fn chat(
        &self,
        messages: &[ChatMessage],
        episode_id: Option<&str>,
    ) -> Result<ChatResponse, ReasoningError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn messages_serialize_with_lowercase_roles() {
        let json = serde_json::to_value(ChatMessage::assistant("hi")).unwrap();
        assert_eq!(json, serde_json::json!({"role": "assistant", "content": "hi"}));
    }

    #[test]
    fn usage_total_saturates() {
        assert_eq!(TokenUsage::new(u64::MAX, 5).total_tokens, u64::MAX);
        assert_eq!(TokenUsage::new(10, 5).total_tokens, 15);
    }
}
