//! Conversation memory management.
//!
//! Keeps per-user history bounded: once the stored message count crosses a
//! configured threshold, the oldest batch is condensed into one summary row
//! via an LLM call and the summarized rows are deleted. Summaries are fed
//! back into every subsequent prompt as prior-conversation context.

use crate::history::{HistoryMessage, HistoryStore, MessageRole};
use crate::provider::{ChatRequest, Message, Provider};
use anyhow::{Context, Result};
use parley_common::config::MemoryConfig;
use std::fmt::Write;
use std::sync::Arc;

/// Sampling temperature for summarization calls. Kept low so summaries
/// stay faithful to the transcript.
const SUMMARY_TEMPERATURE: f64 = 0.3;

/// Token cap for summarization calls.
const SUMMARY_MAX_TOKENS: i64 = 512;

/// Manages threshold-triggered summarization and context assembly.
pub struct MemoryManager {
    store: Arc<HistoryStore>,
    provider: Arc<dyn Provider>,
    model: String,
    config: MemoryConfig,
}

impl MemoryManager {
    /// Create a new memory manager.
    pub fn new(
        store: Arc<HistoryStore>,
        provider: Arc<dyn Provider>,
        model: impl Into<String>,
        config: MemoryConfig,
    ) -> Self {
        Self {
            store,
            provider,
            model: model.into(),
            config,
        }
    }

    /// Run one summarization pass if the user's history crossed the threshold.
    ///
    /// Returns the new summary's row ID when a pass ran, `None` when the
    /// threshold was not crossed. A provider failure is an error; the caller
    /// skips the pass and the next message retries it.
    pub async fn maybe_summarize(&self, user_id: &str) -> Result<Option<i64>> {
        if !self.config.enabled {
            return Ok(None);
        }

        let count = self.store.message_count(user_id)?;
        if count <= self.config.summarization_threshold {
            return Ok(None);
        }

        let batch = self
            .store
            .oldest_messages(user_id, self.config.messages_to_summarize)?;
        if batch.is_empty() {
            return Ok(None);
        }

        let summary = self
            .request_summary(&batch)
            .await
            .context("Summarization request failed")?;
        let summary = summary.trim();
        if summary.is_empty() {
            anyhow::bail!("Provider returned an empty summary");
        }

        let ids: Vec<i64> = batch.iter().map(|m| m.id).collect();
        let summary_id = self.store.replace_with_summary(user_id, summary, &ids)?;

        tracing::info!(
            user_id = %user_id,
            summarized = ids.len(),
            remaining = count - ids.len(),
            summary_id,
            "Condensed conversation history"
        );

        Ok(Some(summary_id))
    }

    /// Assemble the prompt context for a user's next turn.
    ///
    /// Returns the system prompt (with stored summaries appended as
    /// prior-conversation context) and the remaining history messages in
    /// order.
    pub fn build_context(
        &self,
        user_id: &str,
        system_prompt: &str,
    ) -> Result<(String, Vec<Message>)> {
        let mut system = String::from(system_prompt);

        let summaries = self.store.summaries(user_id)?;
        if !summaries.is_empty() {
            system.push_str("\n\nSummary of the earlier conversation:");
            for summary in &summaries {
                let _ = write!(system, "\n- {}", summary.content);
            }
        }

        let messages = self
            .store
            .get_messages(user_id)?
            .into_iter()
            .map(|m| Message {
                role: m.role.as_str().to_string(),
                content: m.content,
            })
            .collect();

        Ok((system, messages))
    }

    async fn request_summary(&self, messages: &[HistoryMessage]) -> Result<String> {
        let transcript = format_transcript(messages);

        let prompt = format!(
            "Condense the following conversation history into a concise summary \
             that preserves the key information and context.\n\n\
             {transcript}\n\n\
             Requirements:\n\
             1. Preserve the user's core intents and preferences\n\
             2. Preserve key decisions and conclusions\n\
             3. Drop greetings and filler\n\
             4. Write in the third person\n\
             5. Stay under 200 words\n\n\
             Output the summary directly with no preamble."
        );

        let response = self
            .provider
            .chat(ChatRequest {
                model: self.model.clone(),
                messages: vec![Message {
                    role: "user".to_string(),
                    content: prompt,
                }],
                max_tokens: Some(SUMMARY_MAX_TOKENS),
                temperature: Some(SUMMARY_TEMPERATURE),
                system: None,
            })
            .await
            .map_err(|e| anyhow::anyhow!("{e}"))?;

        Ok(response.content)
    }
}

/// Format messages as a conversation transcript for the LLM.
fn format_transcript(messages: &[HistoryMessage]) -> String {
    messages
        .iter()
        .map(|msg| {
            let role_label = match msg.role {
                MessageRole::User => "User",
                MessageRole::Assistant => "Assistant",
            };
            format!("{role_label}: {}", msg.content)
        })
        .collect::<Vec<_>>()
        .join("\n\n")
}
