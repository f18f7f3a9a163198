//! OpenAI-compatible chat completions client

use super::{ChatMessage, Completion, LlmClient, LlmError, TokenUsage};
use crate::config::LlmConfig;
use crate::metrics::METRICS;
use async_trait::async_trait;
use rand::Rng;
use reqwest::{Client, StatusCode};
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// Backoff stops doubling after this many attempts
const MAX_BACKOFF_EXPONENT: usize = 10;

/// Chat completions client with retry
pub struct OpenAiClient {
    client: Client,
    endpoint: String,
    api_key: Option<SecretString>,
    model: String,
    temperature: f32,
    max_tokens: Option<u32>,
    max_retries: usize,
}

impl OpenAiClient {
    /// Create a client from configuration
    pub fn new(config: &LlmConfig) -> Result<Self, LlmError> {
        let client = Client::builder()
            .timeout(config.timeout())
            .build()
            .map_err(|e| LlmError::Initialization(e.to_string()))?;

        Ok(Self {
            client,
            endpoint: config.api_url.clone(),
            api_key: config
                .api_key
                .as_ref()
                .map(|key| SecretString::new(key.expose_secret().clone())),
            model: config.model.clone(),
            temperature: config.temperature,
            max_tokens: config.max_tokens,
            max_retries: config.max_retries.max(1),
        })
    }

    /// Same endpoint and credentials with a different temperature
    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    fn backoff(attempt: usize) -> Duration {
        let jitter = rand::thread_rng().gen_range(0..50);
        Duration::from_millis(100 * (1u64 << attempt.min(MAX_BACKOFF_EXPONENT)) + jitter)
    }

    async fn send_once(&self, request: &ChatCompletionRequest<'_>) -> Result<Completion, Attempt> {
        let mut req = self.client.post(&self.endpoint).json(request);

        if let Some(ref api_key) = self.api_key {
            req = req.header("Authorization", format!("Bearer {}", api_key.expose_secret()));
        }

        let response = req
            .send()
            .await
            .map_err(|e| Attempt::Retry(LlmError::Network(e.to_string())))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let err = LlmError::Api(format!("HTTP {}: {}", status, body));
            return Err(if is_retryable(status) {
                Attempt::Retry(err)
            } else {
                Attempt::Fatal(err)
            });
        }

        let parsed = response
            .json::<ChatCompletionResponse>()
            .await
            .map_err(|e| {
                Attempt::Fatal(LlmError::InvalidResponse(format!(
                    "Failed to parse response: {}",
                    e
                )))
            })?;

        let choice = parsed
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| {
                Attempt::Fatal(LlmError::InvalidResponse(
                    "No choices in response".to_string(),
                ))
            })?;

        Ok(Completion {
            text: choice.message.content.unwrap_or_default(),
            usage: parsed.usage,
        })
    }
}

fn is_retryable(status: StatusCode) -> bool {
    status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error()
}

enum Attempt {
    Retry(LlmError),
    Fatal(LlmError),
}

#[async_trait]
impl LlmClient for OpenAiClient {
    async fn complete(&self, messages: &[ChatMessage]) -> Result<Completion, LlmError> {
        let request = ChatCompletionRequest {
            model: &self.model,
            messages,
            temperature: Some(self.temperature),
            max_tokens: self.max_tokens,
        };

        debug!("Sending {} messages to {}", messages.len(), self.model);
        let start = Instant::now();

        let mut last_error = None;
        for attempt in 0..self.max_retries {
            if attempt > 0 {
                debug!("Retry attempt {} for chat completion", attempt);
                tokio::time::sleep(Self::backoff(attempt)).await;
            }

            match self.send_once(&request).await {
                Ok(completion) => {
                    METRICS
                        .llm_request_duration
                        .observe(start.elapsed().as_secs_f64());
                    return Ok(completion);
                }
                Err(Attempt::Fatal(e)) => return Err(e),
                Err(Attempt::Retry(e)) => {
                    debug!("Chat completion attempt {} failed: {}", attempt + 1, e);
                    last_error = Some(e);
                }
            }
        }

        warn!("Chat completion failed after {} attempts", self.max_retries);
        Err(last_error.unwrap_or(LlmError::Unknown))
    }
}

// OpenAI-compatible API types
#[derive(Debug, Serialize)]
struct ChatCompletionRequest<'a> {
    model: &'a str,
    messages: &'a [ChatMessage],
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
}

#[derive(Debug, Deserialize)]
struct ChatCompletionResponse {
    choices: Vec<ChatChoice>,
    #[serde(default)]
    usage: Option<TokenUsage>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ResponseMessage,
}

#[derive(Debug, Deserialize)]
struct ResponseMessage {
    #[serde(default)]
    content: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn endpoint(server: &mockito::Server) -> String {
        format!("{}/v1/chat/completions", server.url())
    }

    fn config_for(url: String) -> LlmConfig {
        LlmConfig {
            api_url: url,
            api_key: Some(SecretString::new("sk-test".to_string())),
            max_retries: 2,
            ..LlmConfig::default()
        }
    }

    #[tokio::test]
    async fn test_complete_parses_text_and_usage() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/v1/chat/completions")
            .match_header("authorization", "Bearer sk-test")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(
                r#"{
                    "choices": [{"message": {"role": "assistant", "content": "Looks healthy."}}],
                    "usage": {"prompt_tokens": 12, "completion_tokens": 3, "total_tokens": 15}
                }"#,
            )
            .create_async()
            .await;

        let client = OpenAiClient::new(&config_for(endpoint(&server))).unwrap();
        let completion = client.complete(&[ChatMessage::user("hi")]).await.unwrap();

        assert_eq!(completion.text, "Looks healthy.");
        assert_eq!(completion.usage, Some(TokenUsage::new(12, 3)));
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_client_error_is_not_retried() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/v1/chat/completions")
            .with_status(401)
            .with_body("unauthorized")
            .expect(1)
            .create_async()
            .await;

        let client = OpenAiClient::new(&config_for(endpoint(&server))).unwrap();
        let result = client.complete(&[ChatMessage::user("hi")]).await;

        assert!(matches!(result, Err(LlmError::Api(_))));
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_server_error_is_retried() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/v1/chat/completions")
            .with_status(503)
            .expect(2)
            .create_async()
            .await;

        let client = OpenAiClient::new(&config_for(endpoint(&server))).unwrap();
        let result = client.complete(&[ChatMessage::user("hi")]).await;

        assert!(matches!(result, Err(LlmError::Api(_))));
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_empty_choices_is_invalid() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/v1/chat/completions")
            .with_status(200)
            .with_body(r#"{"choices": []}"#)
            .create_async()
            .await;

        let client = OpenAiClient::new(&config_for(endpoint(&server))).unwrap();
        let result = client.complete(&[ChatMessage::user("hi")]).await;

        assert!(matches!(result, Err(LlmError::InvalidResponse(_))));
    }

    #[test]
    fn test_backoff_is_capped() {
        let first = OpenAiClient::backoff(1);
        assert!(first >= Duration::from_millis(200) && first < Duration::from_millis(250));

        let capped = Duration::from_millis(100 * 1024);
        for attempt in [10, 64, 200] {
            let delay = OpenAiClient::backoff(attempt);
            assert!(delay >= capped && delay < capped + Duration::from_millis(50));
        }
    }

    #[test]
    fn test_retryable_statuses() {
        assert!(is_retryable(StatusCode::TOO_MANY_REQUESTS));
        assert!(is_retryable(StatusCode::BAD_GATEWAY));
        assert!(!is_retryable(StatusCode::BAD_REQUEST));
    }
}
