//! Conversation ledger data models

use super::token_counter::TokenCounter;
use crate::llm::ChatMessage;
use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Free-form per-message metadata, kept in insertion order
pub type Metadata = IndexMap<String, serde_json::Value>;

/// Message roles in conversation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    User,
    Assistant,
    System,
    Tool,
}

impl MessageRole {
    /// Wire name used by chat APIs
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageRole::User => "user",
            MessageRole::Assistant => "assistant",
            MessageRole::System => "system",
            MessageRole::Tool => "tool",
        }
    }

    /// Label used when rendering transcripts
    pub fn label(&self) -> &'static str {
        match self {
            MessageRole::User => "User",
            MessageRole::Assistant => "Assistant",
            MessageRole::System => "System",
            MessageRole::Tool => "Tool",
        }
    }
}

impl fmt::Display for MessageRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MessageRole {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "user" => Ok(MessageRole::User),
            "assistant" => Ok(MessageRole::Assistant),
            "system" => Ok(MessageRole::System),
            "tool" => Ok(MessageRole::Tool),
            other => Err(format!("unknown message role: {}", other)),
        }
    }
}

/// Single message in conversation history
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub role: MessageRole,
    pub content: String,
    pub timestamp: DateTime<Utc>,
    pub token_count: usize,
    #[serde(default, skip_serializing_if = "IndexMap::is_empty")]
    pub metadata: Metadata,
}

impl Message {
    pub fn new(role: MessageRole, content: impl Into<String>, token_count: usize) -> Self {
        Self {
            role,
            content: content.into(),
            timestamp: Utc::now(),
            token_count,
            metadata: Metadata::new(),
        }
    }

    pub fn with_metadata(mut self, metadata: Metadata) -> Self {
        self.metadata = metadata;
        self
    }

    /// Role and content in chat API form
    pub fn to_chat(&self) -> ChatMessage {
        ChatMessage::new(self.role.as_str(), self.content.clone())
    }
}

/// Ordered, append-only record of a conversation and its token cost
///
/// `total_tokens` always equals the sum of the stored messages'
/// `token_count`. Every message is costed before it is stored.
#[derive(Debug, Clone, Serialize)]
pub struct ConversationState {
    messages: Vec<Message>,
    total_tokens: usize,
    context_summarized: bool,
    summarization_count: usize,
    messages_since_summary: usize,
    updated_at: DateTime<Utc>,
}

impl ConversationState {
    pub fn new() -> Self {
        Self {
            messages: Vec::new(),
            total_tokens: 0,
            context_summarized: false,
            summarization_count: 0,
            messages_since_summary: 0,
            updated_at: Utc::now(),
        }
    }

    /// Append a message, computing its cost with `counter` when
    /// `token_count` is not supplied
    pub fn append(
        &mut self,
        counter: &TokenCounter,
        role: MessageRole,
        content: impl Into<String>,
        token_count: Option<usize>,
        metadata: Metadata,
    ) -> &Message {
        let content = content.into();
        let tokens = token_count.unwrap_or_else(|| counter.count(&content));
        let message = Message::new(role, content, tokens).with_metadata(metadata);

        self.total_tokens += message.token_count;
        self.messages_since_summary += 1;
        self.updated_at = Utc::now();
        self.messages.push(message);

        &self.messages[self.messages.len() - 1]
    }

    /// The last `n` messages in their original order
    pub fn recent(&self, n: usize) -> &[Message] {
        let start = self.messages.len().saturating_sub(n);
        &self.messages[start..]
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    /// Running token total
    pub fn total(&self) -> usize {
        self.total_tokens
    }

    /// Token total recomputed from the stored messages
    pub fn recompute_total(&self) -> usize {
        self.messages.iter().map(|m| m.token_count).sum()
    }

    /// Whether the ledger has been replaced by a summary at least once
    pub fn is_summarized(&self) -> bool {
        self.context_summarized
    }

    pub fn summarization_count(&self) -> usize {
        self.summarization_count
    }

    /// Messages appended since the last summary (or since creation)
    pub fn messages_since_summary(&self) -> usize {
        self.messages_since_summary
    }

    pub fn updated_at(&self) -> DateTime<Utc> {
        self.updated_at
    }

    /// The whole ledger in chat API form
    pub fn to_chat_messages(&self) -> Vec<ChatMessage> {
        self.messages.iter().map(Message::to_chat).collect()
    }

    /// Replace the ledger with a summary message followed by `tail`
    pub(crate) fn replace_with_summary(&mut self, summary: Message, tail: Vec<Message>) {
        let mut messages = Vec::with_capacity(tail.len() + 1);
        messages.push(summary);
        messages.extend(tail);

        self.total_tokens = messages.iter().map(|m| m.token_count).sum();
        self.messages = messages;
        self.context_summarized = true;
        self.summarization_count += 1;
        self.messages_since_summary = 0;
        self.updated_at = Utc::now();
    }
}

impl Default for ConversationState {
    fn default() -> Self {
        Self::new()
    }
}
