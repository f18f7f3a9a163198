//! Session and analysis data models

use crate::context::{ConversationState, Metadata, MessageRole, TokenCounter};
use crate::error::{ContextError, Result};
use crate::llm::TokenUsage;
use crate::validators::extract_github_info;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Kind of analysis to perform
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum AnalysisType {
    #[default]
    Summary,
    Security,
    CodeReview,
    Documentation,
    Dependencies,
    Custom,
}

impl AnalysisType {
    pub fn all() -> &'static [AnalysisType] {
        &[
            AnalysisType::Summary,
            AnalysisType::Security,
            AnalysisType::CodeReview,
            AnalysisType::Documentation,
            AnalysisType::Dependencies,
            AnalysisType::Custom,
        ]
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            AnalysisType::Summary => "summary",
            AnalysisType::Security => "security",
            AnalysisType::CodeReview => "code_review",
            AnalysisType::Documentation => "documentation",
            AnalysisType::Dependencies => "dependencies",
            AnalysisType::Custom => "custom",
        }
    }
}

impl fmt::Display for AnalysisType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AnalysisType {
    type Err = ContextError;

    fn from_str(s: &str) -> Result<Self> {
        let normalized = s.trim().to_lowercase();
        AnalysisType::all()
            .iter()
            .copied()
            .find(|t| t.as_str() == normalized)
            .ok_or_else(|| {
                ContextError::InvalidInput(format!("Unknown analysis type '{}'", s.trim()))
            })
    }
}

/// GitHub repository identity
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GitHubRepository {
    pub url: String,
    pub owner: String,
    pub name: String,
    pub branch: String,
    pub full_name: String,
}

impl GitHubRepository {
    /// Parse a repository URL such as `https://github.com/owner/repo`
    pub fn from_url(url: &str) -> Result<Self> {
        let info = extract_github_info(url)
            .ok_or_else(|| ContextError::InvalidInput(format!("Invalid GitHub URL: {}", url)))?;

        Ok(Self {
            url: url.trim().to_string(),
            owner: info.owner,
            name: info.repo,
            branch: info.branch,
            full_name: info.full_name,
        })
    }
}

/// Result of one analysis or follow-up turn
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalysisResult {
    pub repository: GitHubRepository,
    pub analysis_type: AnalysisType,
    pub summary: String,
    /// Fetched repository data, carried opaquely
    #[serde(default)]
    pub details: Value,
    #[serde(default)]
    pub findings: Vec<String>,
    #[serde(default)]
    pub recommendations: Vec<String>,
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub token_usage: TokenUsage,
    #[serde(default)]
    pub metadata: Metadata,
}

impl AnalysisResult {
    pub fn new(repository: GitHubRepository, analysis_type: AnalysisType, details: Value) -> Self {
        Self {
            repository,
            analysis_type,
            summary: "Repository analysis completed".to_string(),
            details,
            findings: Vec::new(),
            recommendations: Vec::new(),
            timestamp: Utc::now(),
            token_usage: TokenUsage::default(),
            metadata: Metadata::new(),
        }
    }
}

/// Pipeline steps, in execution order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PipelineStep {
    ValidateInput,
    AnalyzeRepository,
    GenerateResponse,
    ManageContext,
}

impl PipelineStep {
    pub fn as_str(&self) -> &'static str {
        match self {
            PipelineStep::ValidateInput => "validate_input",
            PipelineStep::AnalyzeRepository => "analyze_repository",
            PipelineStep::GenerateResponse => "generate_response",
            PipelineStep::ManageContext => "manage_context",
        }
    }
}

impl fmt::Display for PipelineStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Category of a recorded session error
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionErrorKind {
    Validation,
    Fetch,
    Generation,
    Summarization,
    /// A step ran without the output of an earlier step
    Skipped,
}

/// Non-fatal error recorded on a session
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionError {
    pub kind: SessionErrorKind,
    pub message: String,
    pub timestamp: DateTime<Utc>,
}

impl fmt::Display for SessionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.timestamp.to_rfc3339(), self.message)
    }
}

/// Raw data returned by a collaborator call
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolResponse {
    pub action: String,
    pub data: Value,
    pub timestamp: DateTime<Utc>,
}

impl ToolResponse {
    pub fn new(action: impl Into<String>, data: Value) -> Self {
        Self {
            action: action.into(),
            data,
            timestamp: Utc::now(),
        }
    }
}

/// Analysis request
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AnalysisRequest {
    pub repository_url: String,
    #[serde(default)]
    pub analysis_type: AnalysisType,
    #[serde(default)]
    pub system_prompt: String,
    #[serde(default)]
    pub user_prompt: String,
}

impl AnalysisRequest {
    pub fn new(repository_url: impl Into<String>, analysis_type: AnalysisType) -> Self {
        Self {
            repository_url: repository_url.into(),
            analysis_type,
            ..Self::default()
        }
    }

    pub fn with_system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.system_prompt = prompt.into();
        self
    }

    pub fn with_user_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.user_prompt = prompt.into();
        self
    }
}

/// State of one analysis session, moved through each pipeline step
#[derive(Debug, Clone, Serialize)]
pub struct SessionState {
    pub session_id: Uuid,
    pub repository_url: String,
    pub analysis_type: AnalysisType,
    pub system_prompt: String,
    pub user_prompt: String,
    pub repository: Option<GitHubRepository>,
    pub tool_responses: Vec<ToolResponse>,
    conversation: ConversationState,
    analysis_history: Vec<AnalysisResult>,
    current_step: Option<PipelineStep>,
    completed_steps: Vec<PipelineStep>,
    errors: Vec<SessionError>,
    pub created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl SessionState {
    pub fn new(request: AnalysisRequest) -> Self {
        let now = Utc::now();
        Self {
            session_id: Uuid::new_v4(),
            repository_url: request.repository_url,
            analysis_type: request.analysis_type,
            system_prompt: request.system_prompt,
            user_prompt: request.user_prompt,
            repository: None,
            tool_responses: Vec::new(),
            conversation: ConversationState::new(),
            analysis_history: Vec::new(),
            current_step: None,
            completed_steps: Vec::new(),
            errors: Vec::new(),
            created_at: now,
            updated_at: now,
        }
    }

    /// Append to the conversation ledger
    pub fn append_message(
        &mut self,
        counter: &TokenCounter,
        role: MessageRole,
        content: impl Into<String>,
        token_count: Option<usize>,
    ) {
        self.conversation
            .append(counter, role, content, token_count, Metadata::new());
        self.updated_at = Utc::now();
    }

    pub fn conversation(&self) -> &ConversationState {
        &self.conversation
    }

    pub fn conversation_mut(&mut self) -> &mut ConversationState {
        self.updated_at = Utc::now();
        &mut self.conversation
    }

    pub fn total_tokens(&self) -> usize {
        self.conversation.total()
    }

    pub fn is_context_summarized(&self) -> bool {
        self.conversation.is_summarized()
    }

    /// Latest analysis result
    pub fn current_analysis(&self) -> Option<&AnalysisResult> {
        self.analysis_history.last()
    }

    pub fn current_analysis_mut(&mut self) -> Option<&mut AnalysisResult> {
        self.updated_at = Utc::now();
        self.analysis_history.last_mut()
    }

    /// Every result produced in this session, oldest first
    pub fn analysis_history(&self) -> &[AnalysisResult] {
        &self.analysis_history
    }

    /// Record a new result; it becomes the current analysis
    pub fn push_analysis(&mut self, result: AnalysisResult) {
        self.analysis_history.push(result);
        self.updated_at = Utc::now();
    }

    pub fn current_step(&self) -> Option<PipelineStep> {
        self.current_step
    }

    pub fn completed_steps(&self) -> &[PipelineStep] {
        &self.completed_steps
    }

    pub fn is_step_completed(&self, step: PipelineStep) -> bool {
        self.completed_steps.contains(&step)
    }

    pub fn mark_step_completed(&mut self, step: PipelineStep) {
        if !self.completed_steps.contains(&step) {
            self.completed_steps.push(step);
        }
        self.current_step = Some(step);
        self.updated_at = Utc::now();
    }

    pub fn add_error(&mut self, kind: SessionErrorKind, message: impl Into<String>) {
        let now = Utc::now();
        self.errors.push(SessionError {
            kind,
            message: message.into(),
            timestamp: now,
        });
        self.updated_at = now;
    }

    pub fn errors(&self) -> &[SessionError] {
        &self.errors
    }

    pub fn has_errors(&self) -> bool {
        !self.errors.is_empty()
    }

    pub fn updated_at(&self) -> DateTime<Utc> {
        self.updated_at
    }
}
