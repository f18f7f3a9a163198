//! Hard context-window checks and per-model window sizes

use crate::config::ContextConfig;
use serde::{Deserialize, Serialize};

/// Known context windows, matched by exact model name
const MODEL_CONTEXT_WINDOWS: &[(&str, usize)] = &[
    ("gpt-4o-mini", 128_000),
    ("gpt-4o", 128_000),
    ("gpt-4-turbo", 128_000),
    ("gpt-4", 8_192),
    ("gpt-3.5-turbo", 16_385),
];

/// Token limits that apply to a model under the current configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelLimits {
    /// Model's native window, or the configured maximum for unknown models
    pub max_context: usize,
    pub configured_max: usize,
    pub summary_threshold: usize,
}

/// Token budget checks against the configured maximum context
#[derive(Debug, Clone, Copy)]
pub struct TokenBudget {
    config: ContextConfig,
}

impl TokenBudget {
    pub fn new(config: ContextConfig) -> Self {
        Self { config }
    }

    /// Whether prompt plus completion reaches the hard maximum
    pub fn check_context_limit(&self, prompt_tokens: usize, completion_tokens: usize) -> bool {
        prompt_tokens + completion_tokens >= self.config.max_context_tokens()
    }

    /// Tokens still available under the hard maximum
    pub fn available_tokens(&self, used_tokens: usize) -> usize {
        self.config.max_context_tokens().saturating_sub(used_tokens)
    }

    /// Limits for a model
    pub fn model_limits(&self, model: &str) -> ModelLimits {
        let max_context = MODEL_CONTEXT_WINDOWS
            .iter()
            .find(|(name, _)| *name == model)
            .map(|(_, window)| *window)
            .unwrap_or(self.config.max_context_tokens());

        ModelLimits {
            max_context,
            configured_max: self.config.max_context_tokens(),
            summary_threshold: self.config.summary_token_threshold(),
        }
    }

    /// Get the configuration
    pub fn config(&self) -> &ContextConfig {
        &self.config
    }
}
