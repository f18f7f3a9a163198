//! Metrics collection for observability

use prometheus::{
    Counter, CounterVec, Histogram, Opts, Registry,
    register_counter_vec_with_registry, register_counter_with_registry,
    register_histogram_with_registry,
};
use std::sync::Arc;
use once_cell::sync::Lazy;

/// Global metrics registry
pub static METRICS: Lazy<Arc<Metrics>> = Lazy::new(|| {
    Arc::new(Metrics::new().expect("Failed to initialize metrics"))
});

/// Metrics collector
pub struct Metrics {
    registry: Registry,

    // Context management metrics
    pub ledger_tokens: Histogram,
    pub summarizations: Counter,
    pub summarization_failures: Counter,
    pub tokens_reclaimed: Counter,

    // Pipeline metrics
    pub sessions: Counter,
    pub step_errors: CounterVec,

    // Collaborator metrics
    pub llm_request_duration: Histogram,
    pub fetch_requests: CounterVec,
}

impl Metrics {
    /// Create a new metrics collector
    pub fn new() -> Result<Self, Box<dyn std::error::Error>> {
        let registry = Registry::new();

        let ledger_tokens = register_histogram_with_registry!(
            "ledger_tokens",
            "Conversation ledger size in tokens after context management",
            vec![1_000.0, 5_000.0, 20_000.0, 50_000.0, 100_000.0, 150_000.0, 200_000.0],
            registry
        )?;

        let summarizations = register_counter_with_registry!(
            Opts::new(
                "context_summarizations_total",
                "Total conversation summarizations performed"
            ),
            registry
        )?;

        let summarization_failures = register_counter_with_registry!(
            Opts::new(
                "context_summarization_failures_total",
                "Total failed summarization attempts"
            ),
            registry
        )?;

        let tokens_reclaimed = register_counter_with_registry!(
            Opts::new(
                "context_tokens_reclaimed_total",
                "Tokens removed from ledgers by summarization"
            ),
            registry
        )?;

        let sessions = register_counter_with_registry!(
            Opts::new("analysis_sessions_total", "Total analysis sessions started"),
            registry
        )?;

        let step_errors = register_counter_vec_with_registry!(
            Opts::new("pipeline_step_errors_total", "Errors recorded by pipeline steps"),
            &["step"],
            registry
        )?;

        let llm_request_duration = register_histogram_with_registry!(
            "llm_request_duration_seconds",
            "Chat completion request duration in seconds",
            registry
        )?;

        let fetch_requests = register_counter_vec_with_registry!(
            Opts::new("repository_fetch_requests_total", "Total repository fetch requests"),
            &["status"],
            registry
        )?;

        Ok(Self {
            registry,
            ledger_tokens,
            summarizations,
            summarization_failures,
            tokens_reclaimed,
            sessions,
            step_errors,
            llm_request_duration,
            fetch_requests,
        })
    }

    /// Get the metrics registry for exporting
    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Record a completed summarization
    pub fn record_summarization(&self, tokens_before: usize, tokens_after: usize) {
        self.summarizations.inc();
        self.tokens_reclaimed
            .inc_by(tokens_before.saturating_sub(tokens_after) as f64);
    }

    /// Record a failed summarization
    pub fn record_summarization_failure(&self) {
        self.summarization_failures.inc();
    }

    /// Record ledger size
    pub fn record_ledger_tokens(&self, tokens: usize) {
        self.ledger_tokens.observe(tokens as f64);
    }

    /// Record an error recorded by a pipeline step
    pub fn record_step_error(&self, step: &str) {
        self.step_errors.with_label_values(&[step]).inc();
    }

    /// Record a repository fetch
    pub fn record_fetch(&self, success: bool) {
        let status = if success { "success" } else { "error" };
        self.fetch_requests.with_label_values(&[status]).inc();
    }

    /// Export metrics in Prometheus text format
    pub fn export_prometheus(&self) -> String {
        use prometheus::Encoder;

        let encoder = prometheus::TextEncoder::new();
        let metric_families = self.registry.gather();

        let mut buffer = Vec::new();
        encoder.encode(&metric_families, &mut buffer).unwrap_or_default();

        String::from_utf8(buffer).unwrap_or_default()
    }
}
