//! Scripted collaborators shared by the integration tests

#![allow(dead_code)]

use async_trait::async_trait;
use repo_analyst::agent::AnalysisAgent;
use repo_analyst::config::ContextConfig;
use repo_analyst::context::{ContextManager, LlmSummarizer, TokenCounter};
use repo_analyst::llm::{ChatMessage, Completion, LlmClient, LlmError};
use repo_analyst::repository::{McpError, RepositoryFetcher};
use serde_json::{json, Value};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

/// LLM that answers from a queue and records every request
#[derive(Default)]
pub struct ScriptedLlm {
    replies: Mutex<VecDeque<Result<Completion, String>>>,
    requests: Mutex<Vec<Vec<ChatMessage>>>,
}

impl ScriptedLlm {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn reply(&self, completion: Completion) -> &Self {
        self.replies.lock().unwrap().push_back(Ok(completion));
        self
    }

    pub fn reply_text(&self, text: &str) -> &Self {
        self.reply(Completion::new(text))
    }

    pub fn fail(&self, message: &str) -> &Self {
        self.replies.lock().unwrap().push_back(Err(message.to_string()));
        self
    }

    pub fn requests(&self) -> Vec<Vec<ChatMessage>> {
        self.requests.lock().unwrap().clone()
    }

    pub fn calls(&self) -> usize {
        self.requests.lock().unwrap().len()
    }
}

#[async_trait]
impl LlmClient for ScriptedLlm {
    async fn complete(&self, messages: &[ChatMessage]) -> Result<Completion, LlmError> {
        self.requests.lock().unwrap().push(messages.to_vec());
        match self.replies.lock().unwrap().pop_front() {
            Some(Ok(completion)) => Ok(completion),
            Some(Err(message)) => Err(LlmError::Api(message)),
            None => Ok(Completion::new("No further insight.")),
        }
    }
}

/// Fetcher returning a fixed payload or a fixed error
pub struct StaticFetcher {
    payload: Option<Value>,
    calls: AtomicUsize,
}

impl StaticFetcher {
    pub fn ok(payload: Value) -> Arc<Self> {
        Arc::new(Self {
            payload: Some(payload),
            calls: AtomicUsize::new(0),
        })
    }

    pub fn failing() -> Arc<Self> {
        Arc::new(Self {
            payload: None,
            calls: AtomicUsize::new(0),
        })
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl RepositoryFetcher for StaticFetcher {
    async fn fetch_structure(&self, owner: &str, name: &str) -> Result<Value, McpError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        match &self.payload {
            Some(payload) => Ok(json!({
                "repository": { "full_name": format!("{}/{}", owner, name) },
                "structure": payload
            })),
            None => Err(McpError::Transport("server exited".to_string())),
        }
    }
}

pub fn repository_listing() -> Value {
    json!([
        { "name": "Cargo.toml", "type": "file" },
        { "name": "src", "type": "dir" },
        { "name": "README.md", "type": "file" }
    ])
}

/// Agent whose analysis and summaries share `llm`
pub fn agent(
    llm: Arc<ScriptedLlm>,
    fetcher: Arc<StaticFetcher>,
    config: ContextConfig,
) -> AnalysisAgent {
    let summarizer = Arc::new(LlmSummarizer::new(llm.clone()));
    let context = ContextManager::new(config, TokenCounter::approximate(), summarizer);
    AnalysisAgent::new(llm, fetcher, context)
}

pub const ANALYSIS_REPLY: &str = "A small Rust service.\n\n\
    ## Findings\n\
    - Uses tokio for async IO\n\
    - No CI configuration\n\n\
    ## Recommendations\n\
    1. Add a CI workflow\n";
