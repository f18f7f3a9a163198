//! Application configuration
//!
//! Configuration is layered: built-in defaults, an optional TOML file,
//! `REPO_ANALYST__SECTION__KEY` environment variables, and finally the flat
//! variable names used by the `.env` files of earlier deployments
//! (`OPENAI_API_KEY`, `MAX_CONTEXT_TOKENS`, ...). The result is built once at
//! startup and handed to every component constructor.

use crate::error::{ContextError, Result};
use secrecy::SecretString;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::debug;

/// Root configuration
#[derive(Debug, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub llm: LlmConfig,

    #[serde(default)]
    pub context: ContextConfig,

    #[serde(default)]
    pub mcp: McpConfig,

    #[serde(default)]
    pub logging: LoggingConfig,
}

impl Config {
    /// Load configuration from `.env`, an optional file and the environment
    ///
    /// When `path` is `None`, `repo-analyst.toml` in the working directory is
    /// used if present.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        dotenvy::dotenv().ok();

        let mut builder = config::Config::builder();
        builder = match path {
            Some(path) => builder.add_source(config::File::from(path).required(true)),
            None => builder.add_source(config::File::with_name("repo-analyst").required(false)),
        };
        builder = builder.add_source(
            config::Environment::with_prefix("REPO_ANALYST")
                .separator("__")
                .try_parsing(true),
        );

        let mut config: Config = builder.build()?.try_deserialize()?;
        config.apply_overrides(|key| std::env::var(key).ok())?;

        debug!(
            "Loaded configuration: model={}, max_context_tokens={}, threshold={}",
            config.llm.model,
            config.context.max_context_tokens(),
            config.context.summary_token_threshold()
        );

        Ok(config)
    }

    /// Apply the flat legacy variable names on top of the layered config
    ///
    /// `lookup` resolves a variable name to its value; `Config::load` passes
    /// the process environment.
    pub fn apply_overrides<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(val) = lookup("OPENAI_API_KEY") {
            self.llm.api_key = Some(SecretString::new(val));
        }

        if let Some(val) = lookup("OPENAI_MODEL") {
            self.llm.model = val;
        }

        if let Some(val) = lookup("OPENAI_API_URL") {
            self.llm.api_url = val;
        }

        if let Some(val) = lookup("OPENAI_TEMPERATURE") {
            self.llm.temperature = val.trim().parse().map_err(|_| {
                ContextError::Configuration(format!(
                    "OPENAI_TEMPERATURE must be a number, got '{}'",
                    val
                ))
            })?;
        }

        if let Some(val) = lookup("GITHUB_PERSONAL_ACCESS_TOKEN") {
            self.mcp.github_token = Some(SecretString::new(val));
        }

        if let Some(val) = lookup("MCP_SERVER_COMMAND") {
            self.mcp.command = val;
        }

        if let Some(val) = lookup("MCP_SERVER_ARGS") {
            self.mcp.args = split_args(&val);
        }

        if let Some(val) = lookup("LOG_LEVEL") {
            self.logging.level = val.to_lowercase();
        }

        if let Some(val) = lookup("DEBUG") {
            self.logging.debug = val.to_lowercase() == "true" || val == "1";
        }

        // The three context limits are validated together, so collect them
        // before rebuilding.
        let mut max = self.context.max_context_tokens;
        let mut threshold = self.context.summary_token_threshold;
        let mut keep = self.context.keep_last_messages;

        if let Some(val) = lookup("MAX_CONTEXT_TOKENS") {
            max = parse_number("MAX_CONTEXT_TOKENS", &val)?;
        }
        if let Some(val) = lookup("SUMMARY_TOKEN_THRESHOLD") {
            threshold = parse_number("SUMMARY_TOKEN_THRESHOLD", &val)?;
        }
        if let Some(val) = lookup("KEEP_LAST_MESSAGES") {
            keep = parse_number("KEEP_LAST_MESSAGES", &val)?;
        }

        self.context = ContextConfig::new(max, threshold, keep)?
            .with_resummarize_after(self.context.resummarize_after_messages)?;

        Ok(())
    }
}

fn parse_number(key: &str, val: &str) -> Result<usize> {
    val.trim().parse().map_err(|_| {
        ContextError::Configuration(format!(
            "{} must be a non-negative integer, got '{}'",
            key, val
        ))
    })
}

fn split_args(val: &str) -> Vec<String> {
    val.split(',')
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect()
}

/// Context window limits
///
/// Fields are private so that every instance has passed validation:
/// `0 < summary_token_threshold < max_context_tokens`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(try_from = "RawContextConfig")]
pub struct ContextConfig {
    max_context_tokens: usize,
    summary_token_threshold: usize,
    keep_last_messages: usize,
    resummarize_after_messages: Option<usize>,
}

impl ContextConfig {
    /// Create a validated context configuration
    pub fn new(
        max_context_tokens: usize,
        summary_token_threshold: usize,
        keep_last_messages: usize,
    ) -> Result<Self> {
        if max_context_tokens == 0 {
            return Err(ContextError::Configuration(
                "max_context_tokens must be greater than zero".to_string(),
            ));
        }

        if summary_token_threshold == 0 {
            return Err(ContextError::Configuration(
                "summary_token_threshold must be greater than zero".to_string(),
            ));
        }

        if summary_token_threshold >= max_context_tokens {
            return Err(ContextError::Configuration(format!(
                "Summary threshold ({}) must be less than max context tokens ({})",
                summary_token_threshold, max_context_tokens
            )));
        }

        Ok(Self {
            max_context_tokens,
            summary_token_threshold,
            keep_last_messages,
            resummarize_after_messages: None,
        })
    }

    /// Allow summarization to trigger again once `messages` new messages
    /// have been appended after the previous summary
    ///
    /// `None` keeps the single-trigger behaviour.
    pub fn with_resummarize_after(mut self, messages: Option<usize>) -> Result<Self> {
        if messages == Some(0) {
            return Err(ContextError::Configuration(
                "resummarize_after_messages must be at least 1".to_string(),
            ));
        }
        self.resummarize_after_messages = messages;
        Ok(self)
    }

    pub fn max_context_tokens(&self) -> usize {
        self.max_context_tokens
    }

    pub fn summary_token_threshold(&self) -> usize {
        self.summary_token_threshold
    }

    pub fn keep_last_messages(&self) -> usize {
        self.keep_last_messages
    }

    pub fn resummarize_after_messages(&self) -> Option<usize> {
        self.resummarize_after_messages
    }
}

impl Default for ContextConfig {
    fn default() -> Self {
        Self {
            max_context_tokens: default_max_context_tokens(),
            summary_token_threshold: default_summary_token_threshold(),
            keep_last_messages: default_keep_last_messages(),
            resummarize_after_messages: None,
        }
    }
}

#[derive(Deserialize)]
struct RawContextConfig {
    #[serde(default = "default_max_context_tokens")]
    max_context_tokens: usize,
    #[serde(default = "default_summary_token_threshold")]
    summary_token_threshold: usize,
    #[serde(default = "default_keep_last_messages")]
    keep_last_messages: usize,
    #[serde(default)]
    resummarize_after_messages: Option<usize>,
}

impl TryFrom<RawContextConfig> for ContextConfig {
    type Error = ContextError;

    fn try_from(raw: RawContextConfig) -> Result<Self> {
        ContextConfig::new(
            raw.max_context_tokens,
            raw.summary_token_threshold,
            raw.keep_last_messages,
        )?
        .with_resummarize_after(raw.resummarize_after_messages)
    }
}

fn default_max_context_tokens() -> usize {
    200_000
}

fn default_summary_token_threshold() -> usize {
    180_000
}

fn default_keep_last_messages() -> usize {
    5
}

/// LLM configuration (OpenAI-compatible chat completions)
#[derive(Debug, Deserialize)]
pub struct LlmConfig {
    /// Model name, also used to pick the tokenizer
    #[serde(default = "default_llm_model")]
    pub model: String,

    /// Chat completions endpoint
    #[serde(default = "default_api_url")]
    pub api_url: String,

    /// API key
    #[serde(default)]
    pub api_key: Option<SecretString>,

    /// Temperature for analysis responses
    #[serde(default = "default_temperature")]
    pub temperature: f32,

    /// Temperature for conversation summaries
    #[serde(default = "default_summary_temperature")]
    pub summary_temperature: f32,

    /// Optional cap on completion tokens
    #[serde(default)]
    pub max_tokens: Option<u32>,

    /// Request timeout in seconds
    #[serde(default = "default_llm_timeout")]
    pub timeout_secs: u64,

    /// Number of attempts per request
    #[serde(default = "default_max_retries")]
    pub max_retries: usize,
}

fn default_llm_model() -> String {
    "gpt-4o-mini".to_string()
}

fn default_api_url() -> String {
    "https://api.openai.com/v1/chat/completions".to_string()
}

fn default_temperature() -> f32 {
    0.1
}

fn default_summary_temperature() -> f32 {
    0.1
}

fn default_llm_timeout() -> u64 {
    120
}

fn default_max_retries() -> usize {
    3
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            model: default_llm_model(),
            api_url: default_api_url(),
            api_key: None,
            temperature: default_temperature(),
            summary_temperature: default_summary_temperature(),
            max_tokens: None,
            timeout_secs: default_llm_timeout(),
            max_retries: default_max_retries(),
        }
    }
}

impl LlmConfig {
    /// Get timeout as Duration
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

/// MCP server configuration for the GitHub data source
#[derive(Debug, Deserialize)]
pub struct McpConfig {
    /// Command that starts the server
    #[serde(default = "default_mcp_command")]
    pub command: String,

    /// Arguments to the command
    #[serde(default = "default_mcp_args")]
    pub args: Vec<String>,

    /// Token passed to the server as GITHUB_PERSONAL_ACCESS_TOKEN
    #[serde(default)]
    pub github_token: Option<SecretString>,

    /// Per-request timeout in seconds
    #[serde(default = "default_mcp_timeout")]
    pub timeout_secs: u64,

    /// Tool used to look up repository metadata
    #[serde(default = "default_info_tool")]
    pub info_tool: String,

    /// Tool used to list the repository root
    #[serde(default = "default_listing_tool")]
    pub listing_tool: String,
}

fn default_mcp_command() -> String {
    "npx".to_string()
}

fn default_mcp_args() -> Vec<String> {
    vec!["-y".to_string(), "@modelcontextprotocol/server-github".to_string()]
}

fn default_mcp_timeout() -> u64 {
    60
}

fn default_info_tool() -> String {
    "search_repositories".to_string()
}

fn default_listing_tool() -> String {
    "get_file_contents".to_string()
}

impl Default for McpConfig {
    fn default() -> Self {
        Self {
            command: default_mcp_command(),
            args: default_mcp_args(),
            github_token: None,
            timeout_secs: default_mcp_timeout(),
            info_tool: default_info_tool(),
            listing_tool: default_listing_tool(),
        }
    }
}

impl McpConfig {
    /// Get timeout as Duration
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// Default filter level when RUST_LOG is unset
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Emit JSON lines instead of human-readable output
    #[serde(default)]
    pub json: bool,

    /// Optional log file, written in addition to stderr
    #[serde(default)]
    pub file: Option<PathBuf>,

    /// Force debug level
    #[serde(default)]
    pub debug: bool,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
            file: None,
            debug: false,
        }
    }
}

impl LoggingConfig {
    /// Effective filter directive
    pub fn effective_level(&self) -> &str {
        if self.debug {
            "debug"
        } else {
            &self.level
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use secrecy::ExposeSecret;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.llm.model, "gpt-4o-mini");
        assert_eq!(config.context.max_context_tokens(), 200_000);
        assert_eq!(config.context.summary_token_threshold(), 180_000);
        assert_eq!(config.context.keep_last_messages(), 5);
        assert_eq!(config.context.resummarize_after_messages(), None);
        assert_eq!(config.mcp.command, "npx");
        assert_eq!(config.logging.level, "info");
    }

    #[test]
    fn test_threshold_equal_to_max_is_rejected() {
        let result = ContextConfig::new(200_000, 200_000, 5);
        assert!(matches!(result, Err(ContextError::Configuration(_))));
    }

    #[test]
    fn test_threshold_above_max_is_rejected() {
        assert!(ContextConfig::new(1000, 1500, 2).is_err());
    }

    #[test]
    fn test_zero_limits_are_rejected() {
        assert!(ContextConfig::new(0, 0, 2).is_err());
        assert!(ContextConfig::new(1000, 0, 2).is_err());
    }

    #[test]
    fn test_keep_zero_is_allowed() {
        let config = ContextConfig::new(1000, 500, 0).unwrap();
        assert_eq!(config.keep_last_messages(), 0);
    }

    #[test]
    fn test_resummarize_zero_is_rejected() {
        let config = ContextConfig::new(1000, 500, 2).unwrap();
        assert!(config.with_resummarize_after(Some(0)).is_err());
        assert_eq!(
            config
                .with_resummarize_after(Some(3))
                .unwrap()
                .resummarize_after_messages(),
            Some(3)
        );
    }

    #[test]
    fn test_deserialize_validates_context() {
        let ok: ContextConfig = serde_json::from_str(
            r#"{"max_context_tokens": 1000, "summary_token_threshold": 800}"#,
        )
        .unwrap();
        assert_eq!(ok.keep_last_messages(), 5);

        let bad = serde_json::from_str::<ContextConfig>(
            r#"{"max_context_tokens": 1000, "summary_token_threshold": 1000}"#,
        );
        assert!(bad.is_err());
    }

    #[test]
    fn test_overrides_from_legacy_names() {
        let mut config = Config::default();
        config
            .apply_overrides(lookup(&[
                ("OPENAI_API_KEY", "sk-test"),
                ("OPENAI_MODEL", "gpt-4"),
                ("OPENAI_TEMPERATURE", "0.5"),
                ("GITHUB_PERSONAL_ACCESS_TOKEN", "ghp-test"),
                ("MAX_CONTEXT_TOKENS", "8000"),
                ("SUMMARY_TOKEN_THRESHOLD", "6000"),
                ("KEEP_LAST_MESSAGES", "3"),
                ("MCP_SERVER_ARGS", "-y, @modelcontextprotocol/server-github"),
                ("LOG_LEVEL", "DEBUG"),
            ]))
            .unwrap();

        assert_eq!(config.llm.model, "gpt-4");
        assert_eq!(config.llm.temperature, 0.5);
        assert_eq!(
            config.llm.api_key.as_ref().map(|k| k.expose_secret().as_str()),
            Some("sk-test")
        );
        assert_eq!(
            config.mcp.github_token.as_ref().map(|k| k.expose_secret().as_str()),
            Some("ghp-test")
        );
        assert_eq!(config.context.max_context_tokens(), 8000);
        assert_eq!(config.context.summary_token_threshold(), 6000);
        assert_eq!(config.context.keep_last_messages(), 3);
        assert_eq!(config.mcp.args, vec!["-y", "@modelcontextprotocol/server-github"]);
        assert_eq!(config.logging.level, "debug");
    }

    #[test]
    fn test_overrides_reject_invalid_threshold() {
        let mut config = Config::default();
        let result = config.apply_overrides(lookup(&[
            ("MAX_CONTEXT_TOKENS", "1000"),
            ("SUMMARY_TOKEN_THRESHOLD", "1000"),
        ]));
        assert!(result.is_err());
    }

    #[test]
    fn test_overrides_reject_non_numeric_limits() {
        let mut config = Config::default();
        let result = config.apply_overrides(lookup(&[("KEEP_LAST_MESSAGES", "many")]));
        assert!(result.is_err());
    }

    #[test]
    fn test_overrides_reject_non_numeric_temperature() {
        let mut config = Config::default();
        let result = config.apply_overrides(lookup(&[("OPENAI_TEMPERATURE", "warm")]));
        assert!(matches!(result, Err(ContextError::Configuration(_))));
        assert_eq!(config.llm.temperature, 0.1);
    }

    #[test]
    fn test_debug_forces_debug_level() {
        let mut logging = LoggingConfig::default();
        assert_eq!(logging.effective_level(), "info");
        logging.debug = true;
        assert_eq!(logging.effective_level(), "debug");
    }

    #[test]
    fn test_duration_conversions() {
        let config = Config::default();
        assert_eq!(config.llm.timeout(), Duration::from_secs(120));
        assert_eq!(config.mcp.timeout(), Duration::from_secs(60));
    }
}
