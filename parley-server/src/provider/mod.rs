//! LLM provider abstraction.
//!
//! Provides a unified interface for the upstream chat API with
//! OpenAI-compatible (Groq, OpenAI, custom endpoints) and Anthropic
//! implementations. One provider is selected from configuration per
//! deployment and used for both chat turns and history summarization.

mod anthropic;
mod compatible;

pub use anthropic::AnthropicProvider;
pub use compatible::CompatibleProvider;

use async_trait::async_trait;
use parley_common::config::LlmConfig;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

// ============================================================================
// Provider Trait
// ============================================================================

/// Unified interface for LLM providers.
#[async_trait]
pub trait Provider: Send + Sync {
    /// Get the provider name.
    fn name(&self) -> &str;

    /// Send a chat completion request.
    async fn chat(&self, request: ChatRequest) -> Result<ChatResponse, ProviderError>;
}

/// Error from a provider.
#[derive(Debug, Clone)]
pub struct ProviderError {
    pub provider: String,
    pub model: String,
    pub message: String,
    pub status_code: Option<u16>,
}

impl std::fmt::Display for ProviderError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{}:{}] {}", self.provider, self.model, self.message)
    }
}

impl std::error::Error for ProviderError {}

// ============================================================================
// Request/Response Types
// ============================================================================

/// Unified chat request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatRequest {
    /// Model to use
    pub model: String,
    /// Messages in the conversation
    pub messages: Vec<Message>,
    /// Maximum tokens to generate
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<i64>,
    /// Temperature (0.0 - 1.0)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f64>,
    /// System prompt (if not in messages)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub system: Option<String>,
}

/// A message in the conversation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub role: String,
    pub content: String,
}

/// Unified chat response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatResponse {
    /// Provider name
    pub provider: String,
    /// Model used
    pub model: String,
    /// Response content
    pub content: String,
    /// Token usage
    pub usage: TokenUsage,
    /// Finish reason
    pub finish_reason: Option<String>,
    /// Response latency in milliseconds
    pub latency_ms: u64,
}

/// Token usage information.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TokenUsage {
    pub input_tokens: i64,
    pub output_tokens: i64,
    pub total_tokens: i64,
}

// ============================================================================
// Provider Selection
// ============================================================================

/// Create the configured provider.
pub fn create_provider(
    llm: &LlmConfig,
    api_key: Option<&str>,
) -> anyhow::Result<Arc<dyn Provider>> {
    let provider: Arc<dyn Provider> = match llm.provider.as_str() {
        "groq" => Arc::new(CompatibleProvider::groq(api_key)),
        "openai" => Arc::new(CompatibleProvider::openai(api_key)),
        "anthropic" => {
            let key = api_key
                .ok_or_else(|| anyhow::anyhow!("Anthropic provider requires an API key"))?;
            Arc::new(AnthropicProvider::new(key))
        }
        "custom" => {
            let base_url = llm
                .base_url
                .as_deref()
                .ok_or_else(|| anyhow::anyhow!("Custom provider requires llm.base_url"))?;
            Arc::new(CompatibleProvider::custom("custom", base_url, api_key))
        }
        other => anyhow::bail!("Unknown LLM provider '{}'", other),
    };

    Ok(provider)
}
