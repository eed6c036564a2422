//! TensorZero gateway client (OpenAI-compatible endpoint) with automatic retry
//! for transient errors.

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};

use super::error::{classify_http_status, ReasoningError, ReasoningErrorKind, RetryConfig};
use super::{ChatMessage, ChatResponse, ReasoningClient, TokenUsage};
use crate::config::TensorZeroConfig;
use crate::util::truncate_chars;

/// TensorZero gateway client.
pub struct TensorZeroClient {
    client: Client,
    base_url: String,
    api_key: Option<String>,
    function_name: String,
    retry_config: RetryConfig,
}

impl TensorZeroClient {
    /// Create a new client with default retry configuration.
    pub fn new(config: &TensorZeroConfig) -> Self {
        Self::with_retry_config(config, RetryConfig::default())
    }

    pub fn with_retry_config(config: &TensorZeroConfig, retry_config: RetryConfig) -> Self {
        Self {
            client: Client::new(),
            base_url: config.base_url.trim_end_matches('/').to_string(),
            api_key: config.api_key.clone(),
            function_name: config.function_name.clone(),
            retry_config,
        }
    }

    fn completions_url(&self) -> String {
        format!("{}/openai/v1/chat/completions", self.base_url)
    }

    fn model_name(&self) -> String {
        format!("tensorzero::function_name::{}", self.function_name)
    }

    fn parse_retry_after(headers: &reqwest::header::HeaderMap) -> Option<Duration> {
        headers
            .get("retry-after")
            .and_then(|v| v.to_str().ok())
            .and_then(|s| s.trim().parse::<u64>().ok())
            .map(Duration::from_secs)
    }

    fn create_error(
        status: reqwest::StatusCode,
        body: &str,
        retry_after: Option<Duration>,
    ) -> ReasoningError {
        let status_code = status.as_u16();
        let message = truncate_chars(body, 500).to_string();
        match classify_http_status(status_code) {
            ReasoningErrorKind::RateLimited => ReasoningError::rate_limited(message, retry_after),
            ReasoningErrorKind::ClientError => ReasoningError::client_error(status_code, message),
            _ => ReasoningError::server_error(status_code, message),
        }
    }

    /// Execute a single request without retry.
    async fn execute_request(
        &self,
        request: &GatewayRequest<'_>,
    ) -> Result<ChatResponse, ReasoningError> {
        let mut builder = self
            .client
            .post(self.completions_url())
            .header("Content-Type", "application/json")
            .json(request);
        if let Some(key) = &self.api_key {
            builder = builder.header("Authorization", format!("Bearer {}", key));
        }

        let response = builder.send().await.map_err(|e| {
            if e.is_timeout() {
                ReasoningError::network_error(format!("Request timeout: {}", e))
            } else if e.is_connect() {
                ReasoningError::network_error(format!("Connection failed: {}", e))
            } else {
                ReasoningError::network_error(format!("Request failed: {}", e))
            }
        })?;

        let status = response.status();
        let retry_after = Self::parse_retry_after(response.headers());
        let body = response.text().await.unwrap_or_default();

        if !status.is_success() {
            return Err(Self::create_error(status, &body, retry_after));
        }

        let parsed: GatewayResponse = serde_json::from_str(&body).map_err(|e| {
            ReasoningError::parse_error(format!(
                "Failed to parse response: {}, body: {}",
                e,
                truncate_chars(&body, 500)
            ))
        })?;

        let choice = parsed
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| ReasoningError::empty_response("No choices in response".to_string()))?;

        let content = choice
            .message
            .content
            .filter(|c| !c.trim().is_empty())
            .ok_or_else(|| {
                ReasoningError::empty_response("First choice has no content".to_string())
            })?;

        Ok(ChatResponse {
            content,
            episode_id: parsed.episode_id,
            inference_id: parsed.id,
            finish_reason: choice.finish_reason,
            usage: parsed
                .usage
                .map(|u| TokenUsage::new(u.prompt_tokens, u.completion_tokens)),
        })
    }

    /// Execute a request with automatic retry for transient errors.
    async fn execute_with_retry(
        &self,
        request: &GatewayRequest<'_>,
    ) -> Result<ChatResponse, ReasoningError> {
        let start = Instant::now();
        let mut attempt = 0;

        loop {
            match self.execute_request(request).await {
                Ok(response) => {
                    if attempt > 0 {
                        tracing::info!(
                            "Reasoning request succeeded after {} retries (total time: {:?})",
                            attempt,
                            start.elapsed()
                        );
                    }
                    return Ok(response);
                }
                Err(error) => {
                    let remaining = self
                        .retry_config
                        .max_retry_duration
                        .saturating_sub(start.elapsed());

                    if !self.retry_config.should_retry(&error, attempt) || remaining.is_zero() {
                        if attempt > 0 {
                            tracing::error!(
                                "Reasoning request failed after {} retries: {}",
                                attempt,
                                error
                            );
                        } else {
                            tracing::error!("Reasoning request failed: {}", error);
                        }
                        return Err(error);
                    }

                    let delay = error.suggested_delay(attempt).min(remaining);
                    tracing::warn!(
                        "Reasoning attempt {} failed with {}, retrying in {:?}: {}",
                        attempt + 1,
                        error.kind,
                        delay,
                        error.message
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
            }
        }
    }
}

#[async_trait]
impl ReasoningClient for TensorZeroClient {
    async fn chat(
        &self,
        messages: &[ChatMessage],
        episode_id: Option<&str>,
    ) -> Result<ChatResponse, ReasoningError> {
        let model = self.model_name();
        let request = GatewayRequest {
            model: &model,
            messages,
            episode_id,
        };

        tracing::debug!(
            "Sending {} messages to reasoning gateway (episode: {:?})",
            messages.len(),
            episode_id
        );

        self.execute_with_retry(&request).await
    }
}

/// Gateway request body.
#[derive(Debug, Serialize)]
struct GatewayRequest<'a> {
    model: &'a str,
    messages: &'a [ChatMessage],
    #[serde(rename = "tensorzero::episode_id", skip_serializing_if = "Option::is_none")]
    episode_id: Option<&'a str>,
}

#[derive(Debug, Deserialize)]
struct GatewayResponse {
    #[serde(default)]
    id: Option<String>,
    #[serde(default)]
    episode_id: Option<String>,
    #[serde(default)]
    choices: Vec<GatewayChoice>,
    #[serde(default)]
    usage: Option<GatewayUsage>,
}

#[derive(Debug, Deserialize)]
struct GatewayChoice {
    message: GatewayMessage,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct GatewayMessage {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct GatewayUsage {
    #[serde(default)]
    prompt_tokens: u64,
    #[serde(default)]
    completion_tokens: u64,
}
