//! Repository data collaborator
//!
//! The pipeline only needs "owner and name in, structured data out". The
//! payload is a `serde_json::Value` that is serialized into prompts and never
//! inspected. `McpRepositoryFetcher` implements the contract by talking to
//! the GitHub MCP server over stdio.

pub mod mcp;

pub use mcp::{McpClient, McpRepositoryFetcher, McpSession, ToolInfo};

use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;

/// MCP transport and protocol errors
#[derive(Debug, Error)]
pub enum McpError {
    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error("Server error {code}: {message}")]
    Server { code: i64, message: String },

    #[error("Tool {tool} failed: {message}")]
    Tool { tool: String, message: String },

    #[error("Request timed out: {0}")]
    Timeout(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl McpError {
    /// Whether the connection should be discarded after this error
    pub fn is_connection_error(&self) -> bool {
        matches!(
            self,
            McpError::Transport(_) | McpError::Timeout(_) | McpError::Io(_) | McpError::Protocol(_)
        )
    }
}

/// Source of repository structure
#[async_trait]
pub trait RepositoryFetcher: Send + Sync {
    /// Fetch metadata and the top-level listing of `owner/name`
    async fn fetch_structure(&self, owner: &str, name: &str) -> Result<Value, McpError>;

    /// Release any connection held by the fetcher
    async fn close(&self) {}
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connection_errors() {
        assert!(McpError::Timeout("tools/call".to_string()).is_connection_error());
        assert!(McpError::Transport("closed".to_string()).is_connection_error());
        assert!(!McpError::Tool {
            tool: "get_file_contents".to_string(),
            message: "Not Found".to_string(),
        }
        .is_connection_error());
        assert!(!McpError::Server {
            code: -32602,
            message: "Invalid params".to_string(),
        }
        .is_connection_error());
    }

    #[test]
    fn test_error_display() {
        let err = McpError::Server {
            code: -32601,
            message: "Method not found".to_string(),
        };
        assert_eq!(err.to_string(), "Server error -32601: Method not found");
    }
}
