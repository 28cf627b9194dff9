//! Chat turn orchestration.
//!
//! A turn relays a user message to the configured provider with the full
//! assembled context (system prompt + summaries + history), persists the
//! exchange, and then runs the memory manager inline. Nothing is persisted
//! for a failed turn, so the client can simply retry.

use crate::history::{HistoryMessage, HistoryStore, MessageRole, Summary};
use crate::memory::MemoryManager;
use crate::provider::{ChatRequest, Message, Provider, TokenUsage};
use parley_common::config::{LlmConfig, MemoryConfig};
use parley_common::Error;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Maximum accepted message size in bytes.
const MAX_MESSAGE_BYTES: usize = 32 * 1024;

/// Result of a completed chat turn.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatReply {
    /// Assistant response content
    pub content: String,
    /// Token usage reported by the provider
    pub usage: TokenUsage,
    /// Provider latency in milliseconds
    pub latency_ms: u64,
}

/// A user's stored conversation state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversationView {
    pub summaries: Vec<Summary>,
    pub messages: Vec<HistoryMessage>,
}

/// Orchestrates chat turns against the configured provider.
pub struct ChatService {
    store: Arc<HistoryStore>,
    provider: Arc<dyn Provider>,
    memory: MemoryManager,
    model: String,
    system_prompt: String,
    temperature: Option<f64>,
    max_tokens: Option<i64>,
}

impl ChatService {
    /// Create a new chat service.
    pub fn new(
        store: Arc<HistoryStore>,
        provider: Arc<dyn Provider>,
        llm: &LlmConfig,
        memory_config: MemoryConfig,
    ) -> Self {
        let memory = MemoryManager::new(
            store.clone(),
            provider.clone(),
            llm.model.clone(),
            memory_config,
        );

        Self {
            store,
            provider,
            memory,
            model: llm.model.clone(),
            system_prompt: llm.system_prompt.clone(),
            temperature: llm.temperature,
            max_tokens: llm.max_tokens,
        }
    }

    /// Run one chat turn for a user.
    ///
    /// On provider failure nothing is persisted and the turn surfaces a
    /// generic upstream error; the next message retries summarization too.
    pub async fn send(&self, user_id: &str, content: &str) -> Result<ChatReply, Error> {
        let content = content.trim();
        if content.is_empty() {
            return Err(Error::InvalidInput("Message cannot be empty".into()));
        }
        if content.len() > MAX_MESSAGE_BYTES {
            return Err(Error::InvalidInput("Message too long".into()));
        }

        let (system, mut messages) = self
            .memory
            .build_context(user_id, &self.system_prompt)
            .map_err(|e| Error::Internal(e.to_string()))?;

        messages.push(Message {
            role: MessageRole::User.as_str().to_string(),
            content: content.to_string(),
        });

        let response = self
            .provider
            .chat(ChatRequest {
                model: self.model.clone(),
                messages,
                max_tokens: self.max_tokens,
                temperature: self.temperature,
                system: Some(system),
            })
            .await
            .map_err(|e| {
                tracing::error!(user_id = %user_id, error = %e, "Upstream chat request failed");
                Error::External("The chat provider is unavailable. Try again in a minute.".into())
            })?;

        self.store
            .add_message(user_id, MessageRole::User, content)
            .map_err(|e| Error::Internal(e.to_string()))?;
        self.store
            .add_message(user_id, MessageRole::Assistant, &response.content)
            .map_err(|e| Error::Internal(e.to_string()))?;

        // Memory compaction never fails the turn; the next message retries.
        if let Err(e) = self.memory.maybe_summarize(user_id).await {
            tracing::warn!(user_id = %user_id, error = %e, "History summarization skipped");
        }

        Ok(ChatReply {
            content: response.content,
            usage: response.usage,
            latency_ms: response.latency_ms,
        })
    }

    /// Get a user's stored conversation (summaries + remaining history).
    pub fn conversation(&self, user_id: &str) -> Result<ConversationView, Error> {
        let summaries = self
            .store
            .summaries(user_id)
            .map_err(|e| Error::Internal(e.to_string()))?;
        let messages = self
            .store
            .get_messages(user_id)
            .map_err(|e| Error::Internal(e.to_string()))?;

        Ok(ConversationView {
            summaries,
            messages,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::{ChatResponse, ProviderError};
    use async_trait::async_trait;
    use std::sync::Mutex;
    use tempfile::TempDir;

    struct MockProvider {
        reply: String,
        fail: bool,
        requests: Mutex<Vec<ChatRequest>>,
    }

    impl MockProvider {
        fn replying(reply: &str) -> Self {
            Self {
                reply: reply.to_string(),
                fail: false,
                requests: Mutex::new(Vec::new()),
            }
        }

        fn failing() -> Self {
            Self {
                reply: String::new(),
                fail: true,
                requests: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl Provider for MockProvider {
        fn name(&self) -> &str {
            "mock"
        }

        async fn chat(&self, request: ChatRequest) -> Result<ChatResponse, ProviderError> {
            self.requests.lock().unwrap().push(request.clone());
            if self.fail {
                return Err(ProviderError {
                    provider: "mock".into(),
                    model: request.model,
                    message: "simulated outage".into(),
                    status_code: Some(503),
                });
            }
            Ok(ChatResponse {
                provider: "mock".into(),
                model: request.model,
                content: self.reply.clone(),
                usage: TokenUsage::default(),
                finish_reason: Some("stop".into()),
                latency_ms: 1,
            })
        }
    }

    fn test_service(provider: Arc<MockProvider>) -> (TempDir, Arc<HistoryStore>, ChatService) {
        let tmp = TempDir::new().unwrap();
        let store = Arc::new(HistoryStore::new(&tmp.path().join("chat.db")).unwrap());
        let service = ChatService::new(
            store.clone(),
            provider,
            &LlmConfig::default(),
            MemoryConfig::default(),
        );
        (tmp, store, service)
    }

    #[tokio::test]
    async fn test_send_persists_exchange() {
        let provider = Arc::new(MockProvider::replying("Hi there!"));
        let (_tmp, store, service) = test_service(provider.clone());

        let reply = service.send("u1", "Hello").await.unwrap();
        assert_eq!(reply.content, "Hi there!");

        let messages = store.get_messages("u1").unwrap();
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0].role, MessageRole::User);
        assert_eq!(messages[0].content, "Hello");
        assert_eq!(messages[1].role, MessageRole::Assistant);
        assert_eq!(messages[1].content, "Hi there!");
    }

    #[tokio::test]
    async fn test_send_includes_prior_history_in_request() {
        let provider = Arc::new(MockProvider::replying("Reply"));
        let (_tmp, _store, service) = test_service(provider.clone());

        service.send("u1", "First").await.unwrap();
        service.send("u1", "Second").await.unwrap();

        let requests = provider.requests.lock().unwrap();
        // Second request carries the first exchange plus the new message
        assert_eq!(requests[1].messages.len(), 3);
        assert_eq!(requests[1].messages[2].content, "Second");
        assert!(requests[1].system.is_some());
    }

    #[tokio::test]
    async fn test_send_empty_message_rejected() {
        let provider = Arc::new(MockProvider::replying("Reply"));
        let (_tmp, store, service) = test_service(provider);

        let result = service.send("u1", "   ").await;
        assert!(matches!(result, Err(Error::InvalidInput(_))));
        assert_eq!(store.message_count("u1").unwrap(), 0);
    }

    #[tokio::test]
    async fn test_send_oversize_message_rejected() {
        let provider = Arc::new(MockProvider::replying("Reply"));
        let (_tmp, _store, service) = test_service(provider);

        let huge = "x".repeat(MAX_MESSAGE_BYTES + 1);
        let result = service.send("u1", &huge).await;
        assert!(matches!(result, Err(Error::InvalidInput(_))));
    }

    #[tokio::test]
    async fn test_provider_failure_persists_nothing() {
        let provider = Arc::new(MockProvider::failing());
        let (_tmp, store, service) = test_service(provider);

        let result = service.send("u1", "Hello").await;
        assert!(matches!(result, Err(Error::External(_))));
        assert_eq!(store.message_count("u1").unwrap(), 0);
        assert_eq!(store.summary_count("u1").unwrap(), 0);
    }

    #[tokio::test]
    async fn test_threshold_crossing_compacts_history() {
        let provider = Arc::new(MockProvider::replying("Canned reply"));
        let (_tmp, store, service) = test_service(provider);

        // Each turn stores two rows; the 21st turn crosses 40 and compacts.
        for i in 0..21 {
            service.send("u1", &format!("Message {i}")).await.unwrap();
        }

        assert_eq!(store.message_count("u1").unwrap(), 12);
        assert_eq!(store.summary_count("u1").unwrap(), 1);
    }

    #[tokio::test]
    async fn test_conversation_view() {
        let provider = Arc::new(MockProvider::replying("Reply"));
        let (_tmp, _store, service) = test_service(provider);

        service.send("u1", "Hello").await.unwrap();

        let view = service.conversation("u1").unwrap();
        assert!(view.summaries.is_empty());
        assert_eq!(view.messages.len(), 2);
    }
}
