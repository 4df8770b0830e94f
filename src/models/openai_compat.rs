//! OpenAI-compatible chat completions client.
//!
//! Works with any API that implements the OpenAI chat completions
//! interface: OpenRouter, Ollama, Groq, Together, vLLM, LM Studio, etc.
//! Requests are always `stream: false`; the engine's own progress stream
//! is driven by the job store, not by provider deltas.

use async_trait::async_trait;
use reqwest::Client;
use serde_json::json;

use super::{parse_usage, ChatMessage, Completion, CompletionClient, CompletionError};

/// Client for any OpenAI-compatible chat completions API.
pub struct OpenAICompatClient {
    base_url: String,
    api_key: String,
    client: Client,
}

impl OpenAICompatClient {
    /// Create a client for `base_url` (e.g. `https://openrouter.ai/api/v1`).
    ///
    /// `api_key` may be empty for local servers that don't require auth.
    pub fn new(base_url: impl Into<String>, api_key: impl Into<String>) -> Self {
        let base_url: String = base_url.into();
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: api_key.into(),
            client: Client::builder()
                .timeout(std::time::Duration::from_secs(300))
                .connect_timeout(std::time::Duration::from_secs(10))
                .build()
                .expect("failed to build HTTP client"),
        }
    }
}

#[async_trait]
impl CompletionClient for OpenAICompatClient {
    async fn complete(
        &self,
        model: &str,
        messages: &[ChatMessage],
        max_tokens: Option<u32>,
    ) -> Result<Completion, CompletionError> {
        let mut body = json!({
            "model": model,
            "messages": messages,
            "stream": false,
        });
        if let Some(max) = max_tokens {
            body["max_tokens"] = json!(max);
        }

        let mut req = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .json(&body);
        if !self.api_key.is_empty() {
            req = req.bearer_auth(&self.api_key);
        }

        let resp = req
            .send()
            .await
            .map_err(|e| CompletionError::Network(e.to_string()))?;

        let status = resp.status();
        if !status.is_success() {
            let text = resp.text().await.unwrap_or_default();
            return Err(CompletionError::from_status(status.as_u16(), &text));
        }

        let json: serde_json::Value = resp
            .json()
            .await
            .map_err(|e| CompletionError::Network(e.to_string()))?;

        let content = json["choices"][0]["message"]["content"]
            .as_str()
            .unwrap_or("")
            .to_string();
        let finish_reason = json["choices"][0]["finish_reason"]
            .as_str()
            .unwrap_or("")
            .to_string();

        Ok(Completion {
            content,
            finish_reason,
            usage: parse_usage(&json),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn trims_trailing_slash() {
        let c = OpenAICompatClient::new("http://localhost:11434/v1/", "");
        assert_eq!(c.base_url, "http://localhost:11434/v1");
    }

    #[test]
    fn stores_key() {
        let c = OpenAICompatClient::new("https://openrouter.ai/api/v1", "sk-or-test");
        assert!(!c.api_key.is_empty());
    }

    #[tokio::test]
    async fn complete_fails_without_server() {
        let c = OpenAICompatClient::new("http://127.0.0.1:1/v1", "");
        let msgs = vec![ChatMessage::new("user", "hi")];
        let result = c.complete("test", &msgs, None).await;
        assert!(matches!(result, Err(CompletionError::Network(_))));
    }
}
