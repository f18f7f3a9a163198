//! LLM-driven GitHub repository analysis with bounded conversation context
//!
//! A session validates a repository URL, fetches the repository's structure
//! through an MCP server, asks a chat model for an analysis, and keeps the
//! conversation under the model's context window by replacing older history
//! with a summary once a token threshold is reached.

pub mod agent;
pub mod config;
pub mod context;
pub mod error;
pub mod llm;
pub mod logging;
pub mod metrics;
pub mod repository;
pub mod validators;

pub use agent::{AnalysisAgent, AnalysisRequest, AnalysisType, SessionState};
pub use config::{Config, ContextConfig};
pub use context::{ContextManager, ConversationState, TokenCounter};
pub use error::{ContextError, Result};
