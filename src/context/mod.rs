//! Conversation context management with token budget enforcement
//!
//! A session's conversation is kept in a [`ConversationState`] ledger whose
//! token total is maintained on every append. Once the total reaches the
//! configured threshold, [`ContextManager`] replaces older history with an
//! LLM-written summary and keeps the most recent messages verbatim.

pub mod manager;
pub mod models;
pub mod summarizer;
pub mod token_budget;
pub mod token_counter;

pub use manager::{ContextManager, ContextOutcome};
pub use models::{ConversationState, Message, MessageRole, Metadata};
pub use summarizer::{LlmSummarizer, Summarizer, SummarizerError, SUMMARY_PREFIX};
pub use token_budget::{ModelLimits, TokenBudget};
pub use token_counter::{approximate_tokens, TokenCounter};
