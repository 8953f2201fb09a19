//! [`RoundExecutor`] backed by the chat completions API.

use super::client::{ChatRequest, Message, OpenRouterClient, ResponseFormat, ResponseFormatType};
use super::retry::{RetryConfig, is_retryable, retry_with_backoff};
use crate::pipeline::{ExecuteError, ExecuteFuture, RoundExecutor, RoundRequest};
use crate::rounds::{RoundResult, TokenUsage};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::debug;

/// Default per-round request timeout.
pub const DEFAULT_ROUND_TIMEOUT: Duration = Duration::from_secs(300);

const SYSTEM_PROMPT: &str = "You are a senior engineer analyzing an unfamiliar codebase. \
                             You answer with a single JSON object and nothing else.";

/// Runs rounds through an [`OpenRouterClient`], retrying transient failures.
pub struct OpenRouterExecutor {
    client: Arc<OpenRouterClient>,
    retry: RetryConfig,
    timeout: Duration,
    temperature: f32,
}

impl OpenRouterExecutor {
    pub fn new(client: Arc<OpenRouterClient>, retry: RetryConfig) -> Self {
        Self {
            client,
            retry,
            timeout: DEFAULT_ROUND_TIMEOUT,
            temperature: 0.2,
        }
    }

    /// Time limit for a single request attempt.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }

    async fn chat_once(&self, body: &ChatRequest) -> Result<super::ChatCompletion, String> {
        match tokio::time::timeout(self.timeout, self.client.chat(body)).await {
            Ok(result) => result,
            Err(_) => Err(format!(
                "request timed out after {}s",
                self.timeout.as_secs()
            )),
        }
    }
}

impl RoundExecutor for OpenRouterExecutor {
    fn execute(&self, request: RoundRequest) -> ExecuteFuture<'_> {
        Box::pin(async move {
            let started = Instant::now();
            let mut user = request.prompt;
            if let Some(schema) = &request.schema {
                let schema = serde_json::to_string_pretty(schema).unwrap_or_default();
                user.push_str("\n\nYour response must be a JSON object matching this schema:\n");
                user.push_str(&schema);
            }

            let body = ChatRequest {
                model: Some(request.model.clone()),
                messages: vec![Message::system(SYSTEM_PROMPT), Message::user(user)],
                max_tokens: request
                    .max_output_tokens
                    .map_or(0, |t| u32::try_from(t).unwrap_or(u32::MAX)),
                temperature: self.temperature,
                response_format: Some(ResponseFormat {
                    fmt_type: ResponseFormatType::JsonObject,
                }),
                ..Default::default()
            };

            let completion = retry_with_backoff(&self.retry, || self.chat_once(&body))
                .await
                .map_err(classify)?;

            let content = completion
                .content
                .filter(|c| !c.trim().is_empty())
                .ok_or_else(|| ExecuteError::fatal("provider returned an empty response"))?;
            let data = parse_json_payload(&content).map_err(ExecuteError::Fatal)?;

            let usage = completion
                .usage
                .map(|u| {
                    TokenUsage::new(
                        u64::from(u.prompt_tokens.unwrap_or(0)),
                        u64::from(u.completion_tokens.unwrap_or(0)),
                    )
                })
                .unwrap_or_default();
            let duration_ms = started.elapsed().as_millis() as u64;
            debug!(
                "[round {}] {} responded in {duration_ms}ms",
                request.round, request.name
            );

            Ok(RoundResult {
                data,
                usage,
                model: completion.model.unwrap_or(request.model),
                duration_ms,
            })
        })
    }
}

/// Map an exhausted-retries error onto the executor's error kinds.
fn classify(error: String) -> ExecuteError {
    if is_retryable(&error) {
        ExecuteError::Transient(error)
    } else {
        ExecuteError::Fatal(error)
    }
}

/// Parse a model response as JSON, tolerating a surrounding markdown fence.
pub fn parse_json_payload(content: &str) -> Result<serde_json::Value, String> {
    let trimmed = content.trim();
    let body = trimmed
        .strip_prefix("```json")
        .or_else(|| trimmed.strip_prefix("```"))
        .and_then(|rest| rest.trim_end().strip_suffix("```"))
        .unwrap_or(trimmed);
    serde_json::from_str(body.trim()).map_err(|e| format!("response is not valid JSON: {e}"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn parses_plain_and_fenced_json() {
        assert_eq!(parse_json_payload(r#"{"a": 1}"#).unwrap(), json!({"a": 1}));
        assert_eq!(
            parse_json_payload("```json\n{\"a\": 1}\n```").unwrap(),
            json!({"a": 1})
        );
        assert_eq!(
            parse_json_payload("  ```\n[1, 2]\n```  ").unwrap(),
            json!([1, 2])
        );
    }

    #[test]
    fn rejects_prose() {
        let err = parse_json_payload("Here is the analysis you asked for").unwrap_err();
        assert!(err.contains("not valid JSON"));
    }

    #[test]
    fn classifies_exhausted_errors() {
        assert!(matches!(
            classify("API HTTP 429 Too Many Requests".into()),
            ExecuteError::Transient(_)
        ));
        assert!(matches!(
            classify("API HTTP 401 Unauthorized".into()),
            ExecuteError::Fatal(_)
        ));
    }
}
