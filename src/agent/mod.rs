//! Repository analysis workflow

pub mod models;
pub mod prompts;
pub mod workflow;

pub use models::{
    AnalysisRequest, AnalysisResult, AnalysisType, GitHubRepository, PipelineStep, SessionError,
    SessionErrorKind, SessionState, ToolResponse,
};
pub use workflow::AnalysisAgent;
