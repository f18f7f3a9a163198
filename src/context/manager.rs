//! Conversation context manager
//!
//! Watches the ledger's token total and, once it reaches the configured
//! threshold, replaces the oldest messages with one LLM-written summary while
//! keeping the most recent `keep_last_messages` verbatim.
//!
//! Summarization fires once per session by default. With
//! `resummarize_after_messages` configured, a summarized ledger re-arms after
//! that many new messages.

use super::models::{ConversationState, Message, MessageRole, Metadata};
use super::summarizer::{Summarizer, SummarizerError, SUMMARY_PREFIX};
use super::token_counter::TokenCounter;
use crate::config::ContextConfig;
use crate::metrics::METRICS;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// What `manage_context` did to a ledger
#[derive(Debug)]
pub enum ContextOutcome {
    /// Below threshold, already summarized, or nothing to compress
    Unchanged,
    /// The head was replaced by a summary
    Summarized {
        tokens_before: usize,
        tokens_after: usize,
        messages_summarized: usize,
    },
    /// The summarizer failed; the ledger was left untouched
    Failed(SummarizerError),
}

/// Context manager
pub struct ContextManager {
    config: ContextConfig,
    counter: TokenCounter,
    summarizer: Arc<dyn Summarizer>,
}

impl ContextManager {
    /// Create a new context manager
    pub fn new(
        config: ContextConfig,
        counter: TokenCounter,
        summarizer: Arc<dyn Summarizer>,
    ) -> Self {
        Self {
            config,
            counter,
            summarizer,
        }
    }

    /// Get the configuration
    pub fn config(&self) -> &ContextConfig {
        &self.config
    }

    /// Counter used to cost summary messages
    pub fn counter(&self) -> &TokenCounter {
        &self.counter
    }

    /// Whether the ledger has reached the summary threshold
    pub fn check_context_limit(&self, ledger: &ConversationState) -> bool {
        ledger.total() >= self.config.summary_token_threshold()
    }

    fn is_armed(&self, ledger: &ConversationState) -> bool {
        if !ledger.is_summarized() {
            return true;
        }

        match self.config.resummarize_after_messages() {
            Some(after) => ledger.messages_since_summary() >= after,
            None => false,
        }
    }

    /// Threshold reached, not already summarized (or re-armed), and more
    /// messages than the retained tail
    pub fn should_summarize(&self, ledger: &ConversationState) -> bool {
        self.check_context_limit(ledger)
            && self.is_armed(ledger)
            && ledger.len() > self.config.keep_last_messages()
    }

    /// Summarize the ledger if the trigger predicate holds
    ///
    /// Never fails: a summarizer error is returned as
    /// `ContextOutcome::Failed` with the ledger untouched.
    pub async fn manage_context(&self, ledger: &mut ConversationState) -> ContextOutcome {
        if !self.should_summarize(ledger) {
            debug!(
                "Context within limits: {} tokens (threshold {})",
                ledger.total(),
                self.config.summary_token_threshold()
            );
            return ContextOutcome::Unchanged;
        }

        self.summarize(ledger).await
    }

    /// Replace everything but the last `keep_last_messages` messages with
    /// a summary
    pub async fn summarize(&self, ledger: &mut ConversationState) -> ContextOutcome {
        info!("Context limit approached, summarizing conversation...");

        let split = ledger.len().saturating_sub(self.config.keep_last_messages());
        let (head, tail) = ledger.messages().split_at(split);

        if head.is_empty() {
            warn!("No messages to summarize");
            return ContextOutcome::Unchanged;
        }

        // The only await point. Nothing below can fail, so the ledger is
        // either fully replaced or not touched at all.
        let summary_text = match self.summarizer.summarize(head).await {
            Ok(text) => text,
            Err(e) => {
                error!("Error summarizing context: {}", e);
                METRICS.record_summarization_failure();
                return ContextOutcome::Failed(e);
            }
        };

        let messages_summarized = head.len();
        let tail = tail.to_vec();
        let tokens_before = ledger.total();

        let content = format!("{}{}", SUMMARY_PREFIX, summary_text);
        let mut metadata = Metadata::new();
        metadata.insert("summarized".to_string(), serde_json::Value::Bool(true));
        metadata.insert(
            "summarized_messages".to_string(),
            serde_json::Value::from(messages_summarized),
        );
        let cost = self.counter.count(&content);
        let summary = Message::new(MessageRole::System, content, cost).with_metadata(metadata);

        ledger.replace_with_summary(summary, tail);

        let tokens_after = ledger.total();
        METRICS.record_summarization(tokens_before, tokens_after);
        info!(
            "Context summarized. Token count reduced from {} to {}",
            tokens_before, tokens_after
        );

        ContextOutcome::Summarized {
            tokens_before,
            tokens_after,
            messages_summarized,
        }
    }
}
