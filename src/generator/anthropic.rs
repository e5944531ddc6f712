//! Anthropic Messages API client.

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, CONTENT_TYPE};
use std::time::Duration;

use crate::config::GenerationConfig;

use super::types::{MessagesRequest, MessagesResponse};
use super::{GeneratorError, LlmClient};

const ANTHROPIC_VERSION: &str = "2023-06-01";

/// HTTP client for `POST {base_url}/messages`.
///
/// Rate limits (429), overload and other 5xx responses, and network
/// failures are retried with exponential backoff (1s, 2s, 4s, ... capped
/// at 32s) up to `max_retries` times. Other 4xx responses fail at once.
#[derive(Clone)]
pub struct AnthropicClient {
    http_client: reqwest::Client,
    api_key: String,
    base_url: String,
    max_retries: u32,
}

impl AnthropicClient {
    pub fn new(api_key: impl Into<String>, config: &GenerationConfig) -> Result<Self, GeneratorError> {
        let mut headers = HeaderMap::new();
        headers.insert("anthropic-version", HeaderValue::from_static(ANTHROPIC_VERSION));
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));

        let http_client = reqwest::Client::builder()
            .default_headers(headers)
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;

        Ok(Self {
            http_client,
            api_key: api_key.into(),
            base_url: config.base_url.trim_end_matches('/').to_string(),
            max_retries: config.max_retries,
        })
    }

    async fn send_once(&self, request: &MessagesRequest) -> Result<MessagesResponse, GeneratorError> {
        let url = format!("{}/messages", self.base_url);
        let response = self
            .http_client
            .post(&url)
            .header("x-api-key", &self.api_key)
            .json(request)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    GeneratorError::Timeout
                } else {
                    GeneratorError::Http(e)
                }
            })?;

        let status = response.status();
        if status.is_success() {
            let body = response.bytes().await.map_err(|e| {
                if e.is_timeout() {
                    GeneratorError::Timeout
                } else {
                    GeneratorError::Http(e)
                }
            })?;
            return serde_json::from_slice(&body).map_err(|e| GeneratorError::Decode(e.to_string()));
        }

        let body = response.text().await.unwrap_or_default();
        let message = api_error_message(&body);
        if status.as_u16() == 429 {
            return Err(GeneratorError::RateLimited(message));
        }
        Err(GeneratorError::Api {
            status: status.as_u16(),
            message,
        })
    }
}

#[async_trait]
impl LlmClient for AnthropicClient {
    async fn create_message(
        &self,
        request: &MessagesRequest,
    ) -> Result<MessagesResponse, GeneratorError> {
        let mut attempt = 0;
        loop {
            if attempt > 0 {
                let delay = Duration::from_secs(1 << (attempt - 1).min(5));
                tracing::warn!(attempt, ?delay, "retrying Messages API request");
                tokio::time::sleep(delay).await;
            }

            match self.send_once(request).await {
                Ok(response) => return Ok(response),
                Err(e) if e.is_retryable() && attempt < self.max_retries => {
                    tracing::debug!(error = %e, "Messages API request failed");
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }
}

/// Pull `error.message` out of an API error body, falling back to the raw text.
fn api_error_message(body: &str) -> String {
    serde_json::from_str::<serde_json::Value>(body)
        .ok()
        .and_then(|v| v["error"]["message"].as_str().map(str::to_string))
        .unwrap_or_else(|| body.to_string())
}
