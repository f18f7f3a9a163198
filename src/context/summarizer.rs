//! LLM-based summarization of conversation history

use super::models::Message;
use crate::llm::{ChatMessage, LlmClient, LlmError};
use async_trait::async_trait;
use std::sync::Arc;
use thiserror::Error;
use tracing::debug;

/// Prefix of the synthetic system message that replaces summarized history
pub const SUMMARY_PREFIX: &str = "Previous conversation summary: ";

/// Summarizer trait for different summarization strategies
#[async_trait]
pub trait Summarizer: Send + Sync {
    /// Summarize a run of messages into a single text
    async fn summarize(&self, messages: &[Message]) -> Result<String, SummarizerError>;
}

/// Summarizer errors
#[derive(Debug, Error)]
pub enum SummarizerError {
    #[error("Nothing to summarize")]
    NothingToSummarize,

    #[error("Model returned an empty summary")]
    EmptySummary,

    #[error(transparent)]
    Llm(#[from] LlmError),
}

/// Render messages as `"<Role>: <content>"` blocks separated by blank lines
pub fn render_transcript(messages: &[Message]) -> String {
    messages
        .iter()
        .map(|m| format!("{}: {}", m.role.label(), m.content))
        .collect::<Vec<_>>()
        .join("\n\n")
}

/// Wrap a transcript in the summarization instructions
pub fn build_summary_prompt(transcript: &str) -> String {
    format!(
        "Please provide a concise but comprehensive summary of the following conversation \
        about GitHub repository analysis.\n\
        Include:\n\
        1. Key topics discussed\n\
        2. Important findings or insights\n\
        3. Any technical details that should be preserved\n\
        4. Current context and state of the analysis\n\n\
        Keep the summary focused and preserve important technical information.\n\n\
        Conversation to summarize:\n{}\n\nSummary:",
        transcript
    )
}

/// Summarizer that sends one prompt to a language model
pub struct LlmSummarizer {
    llm: Arc<dyn LlmClient>,
}

impl LlmSummarizer {
    pub fn new(llm: Arc<dyn LlmClient>) -> Self {
        Self { llm }
    }
}

#[async_trait]
impl Summarizer for LlmSummarizer {
    async fn summarize(&self, messages: &[Message]) -> Result<String, SummarizerError> {
        if messages.is_empty() {
            return Err(SummarizerError::NothingToSummarize);
        }

        debug!("Summarizing {} messages", messages.len());

        let prompt = build_summary_prompt(&render_transcript(messages));
        let completion = self.llm.complete(&[ChatMessage::user(prompt)]).await?;

        let summary = completion.text.trim();
        if summary.is_empty() {
            return Err(SummarizerError::EmptySummary);
        }

        Ok(summary.to_string())
    }
}
