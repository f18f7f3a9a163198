//! Ledger accounting and summarization through the public API

use async_trait::async_trait;
use repo_analyst::config::{Config, ContextConfig};
use repo_analyst::context::{
    ContextManager, ContextOutcome, ConversationState, Message, MessageRole, Metadata, Summarizer,
    SummarizerError, TokenBudget, TokenCounter, SUMMARY_PREFIX,
};
use repo_analyst::error::ContextError;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

struct CountingSummarizer {
    calls: AtomicUsize,
}

impl CountingSummarizer {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            calls: AtomicUsize::new(0),
        })
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Summarizer for CountingSummarizer {
    async fn summarize(&self, messages: &[Message]) -> Result<String, SummarizerError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(format!("{} earlier messages", messages.len()))
    }
}

fn push(ledger: &mut ConversationState, counter: &TokenCounter, role: MessageRole, tokens: usize) {
    ledger.append(counter, role, format!("{:?} message", role), Some(tokens), Metadata::new());
}

#[tokio::test]
async fn test_threshold_crossing_keeps_recent_tail() {
    let counter = TokenCounter::approximate();
    let summarizer = CountingSummarizer::new();
    let config = ContextConfig::new(1_000, 100, 2).unwrap();
    let manager = ContextManager::new(config, counter.clone(), summarizer.clone());

    let mut ledger = ConversationState::new();
    push(&mut ledger, &counter, MessageRole::System, 50);
    push(&mut ledger, &counter, MessageRole::User, 60);
    push(&mut ledger, &counter, MessageRole::Assistant, 5);
    push(&mut ledger, &counter, MessageRole::User, 5);
    assert_eq!(ledger.total(), 120);

    let tail: Vec<Message> = ledger.recent(2).to_vec();
    let outcome = manager.manage_context(&mut ledger).await;

    let expected_summary = format!("{}2 earlier messages", SUMMARY_PREFIX);
    let summary_cost = counter.count(&expected_summary);
    match outcome {
        ContextOutcome::Summarized {
            tokens_before,
            tokens_after,
            messages_summarized,
        } => {
            assert_eq!(tokens_before, 120);
            assert_eq!(tokens_after, summary_cost + 10);
            assert_eq!(messages_summarized, 2);
        }
        other => panic!("expected a summary, got {:?}", other),
    }

    assert_eq!(ledger.len(), 3);
    assert_eq!(ledger.messages()[0].role, MessageRole::System);
    assert_eq!(ledger.messages()[0].content, expected_summary);
    assert_eq!(ledger.messages()[0].metadata["summarized_messages"], 2);
    assert_eq!(&ledger.messages()[1..], tail.as_slice());
    assert_eq!(ledger.total(), summary_cost + 10);
    assert_eq!(ledger.total(), ledger.recompute_total());
    assert!(ledger.is_summarized());
    assert_eq!(summarizer.calls(), 1);
}

#[tokio::test]
async fn test_summarization_triggers_once() {
    let counter = TokenCounter::approximate();
    let summarizer = CountingSummarizer::new();
    let config = ContextConfig::new(1_000, 20, 1).unwrap();
    let manager = ContextManager::new(config, counter.clone(), summarizer.clone());

    let mut ledger = ConversationState::new();
    for _ in 0..4 {
        push(&mut ledger, &counter, MessageRole::User, 10);
    }
    let outcome = manager.manage_context(&mut ledger).await;
    assert!(matches!(outcome, ContextOutcome::Summarized { .. }));

    for _ in 0..6 {
        push(&mut ledger, &counter, MessageRole::Assistant, 10);
        assert!(matches!(manager.manage_context(&mut ledger).await, ContextOutcome::Unchanged));
    }

    assert!(manager.check_context_limit(&ledger));
    assert_eq!(summarizer.calls(), 1);
    assert_eq!(ledger.summarization_count(), 1);
}

#[tokio::test]
async fn test_rearmed_summarization() {
    let counter = TokenCounter::approximate();
    let summarizer = CountingSummarizer::new();
    let config = ContextConfig::new(1_000, 20, 1)
        .unwrap()
        .with_resummarize_after(Some(2))
        .unwrap();
    let manager = ContextManager::new(config, counter.clone(), summarizer.clone());

    let mut ledger = ConversationState::new();
    for _ in 0..3 {
        push(&mut ledger, &counter, MessageRole::User, 10);
    }
    manager.manage_context(&mut ledger).await;

    push(&mut ledger, &counter, MessageRole::Assistant, 10);
    assert!(matches!(manager.manage_context(&mut ledger).await, ContextOutcome::Unchanged));

    push(&mut ledger, &counter, MessageRole::User, 10);
    let outcome = manager.manage_context(&mut ledger).await;
    assert!(matches!(outcome, ContextOutcome::Summarized { .. }));
    assert_eq!(ledger.summarization_count(), 2);
    assert_eq!(summarizer.calls(), 2);
}

#[test]
fn test_ledger_total_tracks_appends() {
    let counter = TokenCounter::approximate();
    let mut ledger = ConversationState::new();
    assert_eq!(ledger.total(), 0);

    ledger.append(&counter, MessageRole::User, "a".repeat(400), None, Metadata::new());
    ledger.append(&counter, MessageRole::Assistant, "", None, Metadata::new());
    ledger.append(&counter, MessageRole::Tool, "ok", None, Metadata::new());

    let costs: Vec<usize> = ledger.messages().iter().map(|m| m.token_count).collect();
    assert_eq!(costs, vec![100, 0, 1]);
    assert_eq!(ledger.total(), 101);
    assert_eq!(ledger.total(), ledger.recompute_total());
}

#[test]
fn test_approximate_counting_and_truncation() {
    let counter = TokenCounter::approximate();
    assert!(!counter.is_precise());
    assert_eq!(counter.count(""), 0);
    assert_eq!(counter.count("abc"), 1);
    assert_eq!(counter.count(&"x".repeat(40)), 10);

    assert_eq!(counter.truncate_to_budget("0123456789abcdef", 2), "01234567...");
    assert_eq!(counter.truncate_to_budget("0123456789a", 2), "0123456789a");
    assert_eq!(counter.truncate_to_budget("short", 10), "short");
}

#[test]
fn test_precise_counter_for_known_model() {
    let counter = TokenCounter::for_model("gpt-4");
    assert_eq!(counter.model(), "gpt-4");
    if counter.is_precise() {
        assert_eq!(counter.count("hello world"), 2);
        let text = "word ".repeat(200);
        let truncated = counter.truncate_to_budget(&text, 10);
        assert!(truncated.ends_with("..."));
        assert!(truncated.len() < text.len());
    }
}

#[test]
fn test_budget_limits() {
    let budget = TokenBudget::new(ContextConfig::new(1_000, 800, 5).unwrap());
    assert!(!budget.check_context_limit(800, 199));
    assert!(budget.check_context_limit(800, 200));
    assert_eq!(budget.available_tokens(300), 700);
    assert_eq!(budget.available_tokens(5_000), 0);
}

#[test]
fn test_invalid_context_config() {
    assert!(matches!(
        ContextConfig::new(200_000, 200_000, 5),
        Err(ContextError::Configuration(_))
    ));
    assert!(ContextConfig::new(0, 0, 5).is_err());
    tokio_test::assert_ok!(ContextConfig::new(1_000, 999, 0));
    assert!(ContextConfig::default().with_resummarize_after(Some(0)).is_err());
}

#[test]
fn test_config_file_is_validated() {
    let dir = std::env::temp_dir().join(format!("repo-analyst-{}", uuid::Uuid::new_v4()));
    std::fs::create_dir_all(&dir).unwrap();

    let valid = dir.join("valid.toml");
    std::fs::write(
        &valid,
        "[context]\n\
         max_context_tokens = 8000\n\
         summary_token_threshold = 6000\n\
         keep_last_messages = 3\n",
    )
    .unwrap();
    let config = Config::load(Some(&valid)).unwrap();
    assert_eq!(config.context.max_context_tokens(), 8_000);
    assert_eq!(config.context.summary_token_threshold(), 6_000);
    assert_eq!(config.context.keep_last_messages(), 3);

    let invalid = dir.join("invalid.toml");
    std::fs::write(
        &invalid,
        "[context]\nmax_context_tokens = 1000\nsummary_token_threshold = 1000\n",
    )
    .unwrap();
    assert!(matches!(Config::load(Some(&invalid)), Err(ContextError::Configuration(_))));

    std::fs::remove_dir_all(&dir).ok();
}
