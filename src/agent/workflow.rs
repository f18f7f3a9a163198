//! Analysis pipeline
//!
//! A session runs validate → fetch → generate → manage-context, each step
//! taking the session state by value and handing it back. Collaborator
//! failures are recorded on the session instead of aborting the run, so the
//! caller always gets a state back and decides what to do with its errors.

use super::models::{
    AnalysisRequest, AnalysisResult, GitHubRepository, PipelineStep, SessionErrorKind, SessionState,
    ToolResponse,
};
use super::prompts;
use crate::config::Config;
use crate::context::token_counter::DEFAULT_COMPLETION_RATIO;
use crate::context::{
    ContextManager, ContextOutcome, LlmSummarizer, MessageRole, TokenBudget, TokenCounter,
};
use crate::error::Result;
use crate::llm::{ChatMessage, Completion, LlmClient, LlmError, OpenAiClient, TokenUsage};
use crate::metrics::METRICS;
use crate::repository::{McpRepositoryFetcher, RepositoryFetcher};
use crate::validators::{
    sanitize_input, validate_github_url, validate_system_prompt, MAX_INPUT_LENGTH,
};
use futures::future::join_all;
use std::sync::Arc;
use tracing::{error, info, warn};

const FETCH_ACTION: &str = "get_repository_structure";

/// Runs analysis sessions against shared collaborators
pub struct AnalysisAgent {
    llm: Arc<dyn LlmClient>,
    fetcher: Arc<dyn RepositoryFetcher>,
    context: ContextManager,
    counter: TokenCounter,
    budget: TokenBudget,
}

impl AnalysisAgent {
    pub fn new(
        llm: Arc<dyn LlmClient>,
        fetcher: Arc<dyn RepositoryFetcher>,
        context: ContextManager,
    ) -> Self {
        let counter = context.counter().clone();
        let budget = TokenBudget::new(*context.config());
        Self {
            llm,
            fetcher,
            context,
            counter,
            budget,
        }
    }

    /// Wire up the OpenAI client, the MCP fetcher and the context manager
    pub fn from_config(config: Config) -> Result<Self> {
        let llm: Arc<dyn LlmClient> = Arc::new(OpenAiClient::new(&config.llm)?);
        let summary_llm: Arc<dyn LlmClient> = Arc::new(
            OpenAiClient::new(&config.llm)?.with_temperature(config.llm.summary_temperature),
        );
        let fetcher: Arc<dyn RepositoryFetcher> = Arc::new(McpRepositoryFetcher::new(config.mcp));

        let counter = TokenCounter::for_model(&config.llm.model);
        let limits = TokenBudget::new(config.context).model_limits(&config.llm.model);
        if limits.max_context < limits.configured_max {
            warn!(
                "Configured context of {} tokens exceeds the {} token window of {}",
                limits.configured_max, limits.max_context, config.llm.model
            );
        }

        let summarizer = Arc::new(LlmSummarizer::new(summary_llm));
        let context = ContextManager::new(config.context, counter, summarizer);
        Ok(Self::new(llm, fetcher, context))
    }

    pub fn counter(&self) -> &TokenCounter {
        &self.counter
    }

    fn record_error(
        &self,
        state: &mut SessionState,
        step: PipelineStep,
        kind: SessionErrorKind,
        message: String,
    ) {
        error!("{}: {}", step, message);
        METRICS.record_step_error(step.as_str());
        state.add_error(kind, message);
    }

    /// Run the full pipeline for one request
    pub async fn analyze(&self, request: AnalysisRequest) -> SessionState {
        METRICS.sessions.inc();
        let state = SessionState::new(request);
        info!(
            "Starting analysis session {} for {}",
            state.session_id, state.repository_url
        );
        self.run_pipeline(state).await
    }

    /// Analyze several repositories concurrently, one independent session each
    pub async fn analyze_batch(&self, requests: Vec<AnalysisRequest>) -> Vec<SessionState> {
        info!("Starting batch analysis of {} repositories", requests.len());
        join_all(requests.into_iter().map(|request| self.analyze(request))).await
    }

    pub async fn run_pipeline(&self, state: SessionState) -> SessionState {
        let state = self.validate_input(state).await;
        let state = self.analyze_repository(state).await;
        let state = self.generate_response(state).await;
        self.manage_context(state).await
    }

    /// Check the URL, parse the repository and sanitize the prompts
    pub async fn validate_input(&self, mut state: SessionState) -> SessionState {
        info!("Validating input...");
        let step = PipelineStep::ValidateInput;

        if !validate_github_url(&state.repository_url) {
            self.record_error(
                &mut state,
                step,
                SessionErrorKind::Validation,
                "Invalid GitHub repository URL".to_string(),
            );
            return state;
        }

        let repository = match GitHubRepository::from_url(&state.repository_url) {
            Ok(repository) => repository,
            Err(e) => {
                self.record_error(
                    &mut state,
                    step,
                    SessionErrorKind::Validation,
                    format!("Could not extract repository information from URL: {}", e),
                );
                return state;
            }
        };

        state.user_prompt = sanitize_input(&state.user_prompt, MAX_INPUT_LENGTH);
        state.system_prompt = sanitize_input(&state.system_prompt, MAX_INPUT_LENGTH);
        if !state.system_prompt.is_empty() && !validate_system_prompt(&state.system_prompt) {
            state.system_prompt.clear();
            self.record_error(
                &mut state,
                step,
                SessionErrorKind::Validation,
                "System prompt must be between 10 and 5000 characters; ignoring it".to_string(),
            );
        }

        info!("Input validated successfully for {}", repository.full_name);
        state.repository = Some(repository);
        state.mark_step_completed(step);
        state
    }

    /// Fetch repository structure and start an analysis result
    pub async fn analyze_repository(&self, mut state: SessionState) -> SessionState {
        let step = PipelineStep::AnalyzeRepository;
        let repository = match state.repository.clone() {
            Some(repository) => repository,
            None => {
                self.record_error(
                    &mut state,
                    step,
                    SessionErrorKind::Skipped,
                    "No validated repository to analyze".to_string(),
                );
                return state;
            }
        };

        info!("Analyzing repository: {}", repository.full_name);

        let fetched = self
            .fetcher
            .fetch_structure(&repository.owner, &repository.name)
            .await;
        match fetched {
            Ok(data) => {
                state.tool_responses.push(ToolResponse::new(FETCH_ACTION, data.clone()));
                state.push_analysis(AnalysisResult::new(repository, state.analysis_type, data));
                state.mark_step_completed(step);
                info!("Repository data fetched for {}", state.repository_url);
            }
            Err(e) => {
                self.record_error(
                    &mut state,
                    step,
                    SessionErrorKind::Fetch,
                    format!("Error analyzing repository: {}", e),
                );
            }
        }

        state
    }

    /// Tokens left for serialized repository data in the first prompt
    fn data_budget(&self, state: &SessionState, system: &str) -> usize {
        let used = state.total_tokens()
            + self.counter.count(system)
            + self.counter.count(&state.user_prompt);
        let available = self.budget.available_tokens(used);
        let reserved = self
            .counter
            .estimate_completion(available, DEFAULT_COMPLETION_RATIO);
        available.saturating_sub(reserved)
    }

    async fn complete(
        &self,
        messages: &[ChatMessage],
    ) -> (usize, std::result::Result<Completion, LlmError>) {
        let prompt_tokens = self.counter.count_messages(messages);
        let expected = self
            .counter
            .estimate_completion(prompt_tokens, DEFAULT_COMPLETION_RATIO);
        if self.budget.check_context_limit(prompt_tokens, expected) {
            warn!(
                "Prompt of {} tokens plus {} expected completion tokens hits the context limit",
                prompt_tokens, expected
            );
        }
        (prompt_tokens, self.llm.complete(messages).await)
    }

    fn usage_for(&self, completion: &Completion, prompt_tokens: usize) -> TokenUsage {
        completion.usage.unwrap_or_else(|| {
            TokenUsage::new(prompt_tokens, self.counter.count(&completion.text))
        })
    }

    /// Ask the model for the analysis and record the exchange
    pub async fn generate_response(&self, mut state: SessionState) -> SessionState {
        let step = PipelineStep::GenerateResponse;
        if state.current_analysis().is_none() {
            self.record_error(
                &mut state,
                step,
                SessionErrorKind::Skipped,
                "No repository data to analyze".to_string(),
            );
            return state;
        }

        info!("Generating response...");

        let system = prompts::system_prompt(&state);
        let user = prompts::user_prompt(&state, &self.counter, self.data_budget(&state, &system));

        let mut messages = state.conversation().to_chat_messages();
        messages.push(ChatMessage::system(system.clone()));
        messages.push(ChatMessage::user(user.clone()));

        let (prompt_tokens, result) = self.complete(&messages).await;
        let completion = match result {
            Ok(completion) => completion,
            Err(e) => {
                self.record_error(
                    &mut state,
                    step,
                    SessionErrorKind::Generation,
                    format!("Error generating response: {}", e),
                );
                return state;
            }
        };

        let usage = self.usage_for(&completion, prompt_tokens);
        let reply_tokens = completion.usage.map(|u| u.completion_tokens);

        state.append_message(&self.counter, MessageRole::System, system, None);
        state.append_message(&self.counter, MessageRole::User, user, None);
        state.append_message(
            &self.counter,
            MessageRole::Assistant,
            completion.text.clone(),
            reply_tokens,
        );

        if let Some(analysis) = state.current_analysis_mut() {
            analysis.findings = prompts::extract_section(&completion.text, "findings");
            analysis.recommendations =
                prompts::extract_section(&completion.text, "recommendations");
            analysis.summary = completion.text;
            analysis.token_usage = usage;
        }

        state.mark_step_completed(step);
        info!("Response generated successfully ({} tokens)", usage.total_tokens);
        state
    }

    /// Summarize the conversation if it has grown past the threshold
    ///
    /// A summarization failure is recorded on the session and the ledger is
    /// left as it was.
    pub async fn manage_context(&self, mut state: SessionState) -> SessionState {
        let step = PipelineStep::ManageContext;
        info!("Managing context...");

        let outcome = self.context.manage_context(state.conversation_mut()).await;
        match outcome {
            ContextOutcome::Failed(e) => {
                self.record_error(
                    &mut state,
                    step,
                    SessionErrorKind::Summarization,
                    format!("Error summarizing context: {}", e),
                );
            }
            ContextOutcome::Summarized { messages_summarized, .. } => {
                info!("Summarized {} messages", messages_summarized);
            }
            ContextOutcome::Unchanged => {}
        }

        METRICS.record_ledger_tokens(state.total_tokens());
        state.mark_step_completed(step);
        state
    }

    /// Ask a follow-up question within an analyzed session
    pub async fn follow_up(&self, mut state: SessionState, question: &str) -> SessionState {
        let step = PipelineStep::GenerateResponse;

        let previous = match state.current_analysis() {
            Some(analysis) => analysis.clone(),
            None => {
                self.record_error(
                    &mut state,
                    step,
                    SessionErrorKind::Skipped,
                    "No analysis to follow up on".to_string(),
                );
                return state;
            }
        };

        let question = sanitize_input(question, MAX_INPUT_LENGTH);
        if question.is_empty() {
            self.record_error(
                &mut state,
                step,
                SessionErrorKind::Validation,
                "Follow-up question is empty".to_string(),
            );
            return state;
        }

        info!("Answering follow-up for {}", previous.repository.full_name);

        let mut messages = state.conversation().to_chat_messages();
        messages.push(ChatMessage::user(question.clone()));

        let (prompt_tokens, result) = self.complete(&messages).await;
        let completion = match result {
            Ok(completion) => completion,
            Err(e) => {
                self.record_error(
                    &mut state,
                    step,
                    SessionErrorKind::Generation,
                    format!("Error answering follow-up: {}", e),
                );
                return state;
            }
        };

        let usage = self.usage_for(&completion, prompt_tokens);
        let reply_tokens = completion.usage.map(|u| u.completion_tokens);

        state.append_message(&self.counter, MessageRole::User, question, None);
        state.append_message(
            &self.counter,
            MessageRole::Assistant,
            completion.text.clone(),
            reply_tokens,
        );

        let mut result = AnalysisResult::new(
            previous.repository,
            previous.analysis_type,
            previous.details,
        );
        result.findings = prompts::extract_section(&completion.text, "findings");
        result.recommendations = prompts::extract_section(&completion.text, "recommendations");
        result.summary = completion.text;
        result.token_usage = usage;
        state.push_analysis(result);

        self.manage_context(state).await
    }

    /// Release collaborator resources
    pub async fn close(&self) {
        self.fetcher.close().await;
    }
}
