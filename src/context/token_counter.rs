//! Token counting using tiktoken
//!
//! Counting never fails: when no tokenizer can be built for a model the
//! counter degrades to a fixed four-characters-per-token approximation.

use crate::llm::ChatMessage;
use dashmap::DashMap;
use once_cell::sync::Lazy;
use std::fmt;
use std::sync::Arc;
use tiktoken_rs::CoreBPE;
use tracing::{debug, warn};

/// Framing overhead charged for every chat message
pub const PER_MESSAGE_OVERHEAD: usize = 4;

/// Framing overhead charged once per chat request
pub const REQUEST_OVERHEAD: usize = 2;

/// Default completion/prompt ratio used by `estimate_completion`
pub const DEFAULT_COMPLETION_RATIO: f64 = 0.5;

/// Characters per token assumed by the approximation
pub const CHARS_PER_TOKEN: usize = 4;

/// Appended to truncated text
pub const TRUNCATION_MARKER: &str = "...";

/// Resolved encodings per model name. `None` records that nothing could be
/// built so the lookup is not retried.
static ENCODINGS: Lazy<DashMap<String, Option<Arc<CoreBPE>>>> = Lazy::new(DashMap::new);

/// Shared fallback encoding for models tiktoken does not know
static FALLBACK_ENCODING: Lazy<Option<Arc<CoreBPE>>> = Lazy::new(|| {
    match tiktoken_rs::cl100k_base() {
        Ok(bpe) => Some(Arc::new(bpe)),
        Err(e) => {
            warn!("Failed to load cl100k_base encoding, using approximate counting: {}", e);
            None
        }
    }
});

fn resolve_encoding(model: &str) -> Option<Arc<CoreBPE>> {
    if let Some(entry) = ENCODINGS.get(model) {
        return entry.value().clone();
    }

    let resolved = match tiktoken_rs::get_bpe_from_model(model) {
        Ok(bpe) => {
            debug!("Resolved tokenizer for model {}", model);
            Some(Arc::new(bpe))
        }
        Err(e) => {
            warn!("Model {} not found ({}), using cl100k_base encoding", model, e);
            FALLBACK_ENCODING.clone()
        }
    };

    ENCODINGS
        .entry(model.to_string())
        .or_insert(resolved)
        .value()
        .clone()
}

/// Approximate token count: `max(1, chars / 4)` for non-empty text
pub fn approximate_tokens(text: &str) -> usize {
    if text.is_empty() {
        return 0;
    }
    (text.chars().count() / CHARS_PER_TOKEN).max(1)
}

/// Token counter bound to one model's tokenizer
#[derive(Clone)]
pub struct TokenCounter {
    model: String,
    encoding: Option<Arc<CoreBPE>>,
}

impl TokenCounter {
    /// Create a counter for the given model
    ///
    /// Falls back to `cl100k_base` for unknown models and to the character
    /// approximation if no encoding can be loaded at all.
    pub fn for_model(model: &str) -> Self {
        Self {
            model: model.to_string(),
            encoding: resolve_encoding(model),
        }
    }

    /// Create a counter that always uses the character approximation
    pub fn approximate() -> Self {
        Self {
            model: "approximate".to_string(),
            encoding: None,
        }
    }

    /// Model this counter was built for
    pub fn model(&self) -> &str {
        &self.model
    }

    /// Whether a real tokenizer backs this counter
    pub fn is_precise(&self) -> bool {
        self.encoding.is_some()
    }

    /// Count tokens in text
    pub fn count(&self, text: &str) -> usize {
        if text.is_empty() {
            return 0;
        }

        match &self.encoding {
            Some(bpe) => bpe.encode_with_special_tokens(text).len(),
            None => approximate_tokens(text),
        }
    }

    /// Count tokens for a chat-formatted request
    ///
    /// Each message costs its role and content plus `PER_MESSAGE_OVERHEAD`;
    /// the request as a whole costs `REQUEST_OVERHEAD`.
    pub fn count_messages(&self, messages: &[ChatMessage]) -> usize {
        if messages.is_empty() {
            return 0;
        }

        let body: usize = messages
            .iter()
            .map(|m| self.count(&m.role) + self.count(&m.content) + PER_MESSAGE_OVERHEAD)
            .sum();

        body + REQUEST_OVERHEAD
    }

    /// Estimate completion tokens as a fraction of prompt tokens
    pub fn estimate_completion(&self, prompt_tokens: usize, ratio: f64) -> usize {
        (prompt_tokens as f64 * ratio).floor() as usize
    }

    /// Truncate text so that it fits in `max_tokens`, appending
    /// `TRUNCATION_MARKER` when anything was cut
    pub fn truncate_to_budget(&self, text: &str, max_tokens: usize) -> String {
        if text.is_empty() {
            return String::new();
        }

        if self.count(text) <= max_tokens {
            return text.to_string();
        }

        let Some(bpe) = &self.encoding else {
            return truncate_chars(text, max_tokens * CHARS_PER_TOKEN);
        };

        let tokens = bpe.encode_with_special_tokens(text);

        // A cut can land inside a multi-byte character; back off a few tokens
        // until the prefix decodes.
        let lowest = max_tokens.saturating_sub(3);
        for cut in (lowest..=max_tokens).rev() {
            let prefix: Vec<_> = tokens.iter().take(cut).copied().collect();
            match bpe.decode(prefix) {
                Ok(decoded) => return format!("{}{}", decoded, TRUNCATION_MARKER),
                Err(e) => debug!("Token prefix of length {} did not decode: {}", cut, e),
            }
        }

        warn!("Falling back to character truncation for {} tokens", max_tokens);
        truncate_chars(text, max_tokens * CHARS_PER_TOKEN)
    }
}

impl fmt::Debug for TokenCounter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokenCounter")
            .field("model", &self.model)
            .field("precise", &self.is_precise())
            .finish()
    }
}

fn truncate_chars(text: &str, max_chars: usize) -> String {
    match text.char_indices().nth(max_chars) {
        Some((idx, _)) => format!("{}{}", &text[..idx], TRUNCATION_MARKER),
        None => text.to_string(),
    }
}
