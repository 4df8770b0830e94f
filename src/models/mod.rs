//! Remote chat-completion abstractions.
//!
//! Defines the [`ChatMessage`] and [`Completion`] types, the tagged
//! [`CompletionError`] taxonomy the scheduler's retry policy dispatches on,
//! the [`CompletionClient`] trait, and the concrete OpenAI-compatible
//! implementation plus the model catalog.

pub mod catalog;
pub mod openai_compat;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

pub use catalog::{ModelCatalog, ModelInfo};
pub use openai_compat::OpenAICompatClient;

// ---------------------------------------------------------------------------
// ChatMessage – shared message representation
// ---------------------------------------------------------------------------

/// A single chat message with a role and content.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

impl ChatMessage {
    pub fn new(role: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            role: role.into(),
            content: content.into(),
        }
    }
}

// ---------------------------------------------------------------------------
// Usage / Completion
// ---------------------------------------------------------------------------

/// Token and cost statistics reported by the provider.
#[derive(Debug, Clone, Copy, Default)]
pub struct Usage {
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
    pub total_tokens: u64,
    /// Dollar cost when the provider reports one (OpenRouter does).
    pub cost: f64,
}

/// One finished chat completion.
#[derive(Debug, Clone)]
pub struct Completion {
    pub content: String,
    pub finish_reason: String,
    pub usage: Usage,
}

/// The two model limits the engine plans around.
#[derive(Debug, Clone, Copy)]
pub struct ModelLimits {
    pub context_length: usize,
    pub max_output_tokens: Option<usize>,
}

impl From<&ModelInfo> for ModelLimits {
    fn from(info: &ModelInfo) -> Self {
        Self {
            context_length: info.context_length,
            max_output_tokens: info.max_output,
        }
    }
}

// ---------------------------------------------------------------------------
// Error taxonomy
// ---------------------------------------------------------------------------

/// Failure kinds surfaced by the remote client.
///
/// Only `RateLimited` is retried; transient network and server errors fail
/// the chunk on first sight to avoid multiplying cost on a persistent
/// outage.
#[derive(Debug, thiserror::Error)]
pub enum CompletionError {
    #[error("rate limited: {0}")]
    RateLimited(String),
    #[error("invalid request: {0}")]
    InvalidRequest(String),
    #[error("server error: {0}")]
    ServerError(String),
    #[error("network error: {0}")]
    Network(String),
}

impl CompletionError {
    /// Whether the scheduler should back off and try again.
    pub fn is_retryable(&self) -> bool {
        matches!(self, CompletionError::RateLimited(_))
    }

    /// Map an HTTP failure status plus response body to an error kind.
    ///
    /// Some gateways surface upstream throttling as a 5xx with a rate-limit
    /// message in the body, so the message is checked too.
    pub fn from_status(status: u16, body: &str) -> Self {
        let lower = body.to_lowercase();
        if status == 429 || lower.contains("rate") || lower.contains("429") {
            return CompletionError::RateLimited(format!("{status}: {body}"));
        }
        if (400..500).contains(&status) {
            return CompletionError::InvalidRequest(format!("{status}: {body}"));
        }
        CompletionError::ServerError(format!("{status}: {body}"))
    }
}

// ---------------------------------------------------------------------------
// CompletionClient trait
// ---------------------------------------------------------------------------

/// One-shot call to a chat-completion provider.
///
/// Implemented by [`OpenAICompatClient`] in production and by stub clients
/// in tests.
#[async_trait]
pub trait CompletionClient: Send + Sync {
    /// Send `messages` to `model` and block until the reply arrives.
    async fn complete(
        &self,
        model: &str,
        messages: &[ChatMessage],
        max_tokens: Option<u32>,
    ) -> Result<Completion, CompletionError>;
}

/// Extract usage statistics from an OpenAI-style response JSON.
pub fn parse_usage(json: &serde_json::Value) -> Usage {
    let usage = &json["usage"];
    Usage {
        prompt_tokens: usage["prompt_tokens"].as_u64().unwrap_or(0),
        completion_tokens: usage["completion_tokens"].as_u64().unwrap_or(0),
        total_tokens: usage["total_tokens"].as_u64().unwrap_or(0),
        cost: usage["cost"].as_f64().unwrap_or(0.0),
    }
}
