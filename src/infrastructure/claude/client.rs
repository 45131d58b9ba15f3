use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::{header, Client as ReqwestClient, Response};
use tracing::{debug, info, instrument, warn};

use super::errors::ClaudeApiError;
use super::rate_limiter::TokenBucketRateLimiter;
use super::retry::RetryPolicy;
use super::types::{MessageRequest, MessageResponse};
use crate::domain::error::GenerationError;
use crate::domain::models::{Config, RateLimitConfig, RetryConfig};
use crate::domain::ports::LlmClient;

const ANTHROPIC_VERSION: &str = "2023-06-01";

/// Configuration for the Claude HTTP client
#[derive(Clone)]
pub struct ClaudeClientConfig {
    pub api_key: String,
    pub base_url: String,
    pub model: String,
    pub max_tokens: u32,
    /// Request timeout in seconds
    pub timeout_secs: u64,
    /// Throttle wait used when a 429 carries no usable `retry-after`
    pub default_retry_after_secs: u64,
    pub retry: RetryConfig,
    pub rate_limit: RateLimitConfig,
}

impl ClaudeClientConfig {
    /// Build from application config. Returns `None` when no API key is set.
    pub fn from_config(config: &Config) -> Option<Self> {
        let api_key = config.generation.api_key.clone()?;
        Some(Self {
            api_key,
            base_url: config.generation.base_url.clone(),
            model: config.generation.model.clone(),
            max_tokens: config.generation.max_tokens,
            timeout_secs: config.generation.timeout_secs,
            default_retry_after_secs: config.generation.default_retry_after_secs,
            retry: config.retry.clone(),
            rate_limit: config.rate_limit.clone(),
        })
    }
}

impl std::fmt::Debug for ClaudeClientConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClaudeClientConfig")
            .field("api_key", &"[REDACTED]")
            .field("base_url", &self.base_url)
            .field("model", &self.model)
            .field("max_tokens", &self.max_tokens)
            .field("timeout_secs", &self.timeout_secs)
            .finish_non_exhaustive()
    }
}

/// HTTP client for the Claude Messages API.
///
/// Requests are paced by a token bucket and transient failures retried with
/// exponential backoff. A 429 is never retried here: it surfaces as
/// [`ClaudeApiError::RateLimited`] with the time the backend reopens.
pub struct ClaudeClient {
    http_client: ReqwestClient,
    base_url: String,
    model: String,
    max_tokens: u32,
    default_retry_after: Duration,
    rate_limiter: TokenBucketRateLimiter,
    retry_policy: RetryPolicy,
}

impl ClaudeClient {
    pub fn new(config: ClaudeClientConfig) -> Result<Self, ClaudeApiError> {
        info!(
            base_url = %config.base_url,
            model = %config.model,
            requests_per_minute = config.rate_limit.requests_per_minute,
            timeout_secs = config.timeout_secs,
            "Initializing Claude API client"
        );

        let mut headers = header::HeaderMap::new();
        let mut api_key = header::HeaderValue::from_str(&config.api_key)
            .map_err(|e| ClaudeApiError::InvalidRequest(format!("Invalid API key: {e}")))?;
        api_key.set_sensitive(true);
        headers.insert("x-api-key", api_key);
        headers.insert(
            "anthropic-version",
            header::HeaderValue::from_static(ANTHROPIC_VERSION),
        );
        headers.insert(
            header::CONTENT_TYPE,
            header::HeaderValue::from_static("application/json"),
        );

        let http_client = ReqwestClient::builder()
            .pool_max_idle_per_host(10)
            .timeout(Duration::from_secs(config.timeout_secs))
            .tcp_nodelay(true)
            .default_headers(headers)
            .build()?;

        Ok(Self {
            http_client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            model: config.model,
            max_tokens: config.max_tokens,
            default_retry_after: Duration::from_secs(config.default_retry_after_secs),
            rate_limiter: TokenBucketRateLimiter::from_config(&config.rate_limit),
            retry_policy: RetryPolicy::from_config(&config.retry),
        })
    }

    /// Send a message request, paced and retried.
    #[instrument(skip(self, request), fields(model = %request.model, max_tokens = request.max_tokens))]
    pub async fn send_message(
        &self,
        request: &MessageRequest,
    ) -> Result<MessageResponse, ClaudeApiError> {
        let result = self
            .retry_policy
            .execute(|| async {
                self.rate_limiter.acquire().await;
                self.execute_message_request(request).await
            })
            .await;

        match &result {
            Ok(response) => info!(
                input_tokens = response.usage.input_tokens,
                output_tokens = response.usage.output_tokens,
                "Message request succeeded"
            ),
            Err(err) => warn!(error = %err, "Message request failed"),
        }

        result
    }

    async fn execute_message_request(
        &self,
        request: &MessageRequest,
    ) -> Result<MessageResponse, ClaudeApiError> {
        let url = format!("{}/v1/messages", self.base_url);
        debug!("POST {}", url);

        let response = self.http_client.post(&url).json(request).send().await?;
        self.handle_response(response).await
    }

    async fn handle_response(&self, response: Response) -> Result<MessageResponse, ClaudeApiError> {
        let status = response.status();
        debug!("Response status: {}", status);

        if !status.is_success() {
            let reset_at = reset_time(response.headers(), Utc::now(), self.default_retry_after);
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "Unable to read error body".to_string());
            warn!("API error ({}): {}", status, body);
            return Err(ClaudeApiError::from_status(status, body, reset_at));
        }

        let body = response.text().await?;
        let message: MessageResponse = serde_json::from_str(&body)
            .map_err(|e| ClaudeApiError::MalformedResponse(e.to_string()))?;

        // A reply without text is retried like any other unusable body.
        if message.text().is_none() {
            return Err(ClaudeApiError::MalformedResponse(format!(
                "response {} contained no text content",
                message.id
            )));
        }
        Ok(message)
    }
}

#[async_trait]
impl LlmClient for ClaudeClient {
    async fn complete(&self, prompt: &str) -> Result<String, GenerationError> {
        let request = MessageRequest::user_prompt(&self.model, prompt, self.max_tokens);
        let response = self.send_message(&request).await?;
        response.text().ok_or_else(|| {
            ClaudeApiError::MalformedResponse(format!(
                "response {} contained no text content",
                response.id
            ))
            .into()
        })
    }
}

/// When a throttled backend accepts requests again.
///
/// Reads `retry-after` as delta-seconds or an HTTP date, falling back to
/// `now + default_wait`.
fn reset_time(
    headers: &header::HeaderMap,
    now: DateTime<Utc>,
    default_wait: Duration,
) -> DateTime<Utc> {
    let fallback = || now + chrono::Duration::from_std(default_wait).unwrap_or_default();

    let Some(value) = headers
        .get(header::RETRY_AFTER)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
    else {
        return fallback();
    };

    if let Ok(secs) = value.parse::<i64>() {
        return now + chrono::Duration::seconds(secs.max(0));
    }
    DateTime::parse_from_rfc2822(value)
        .map(|at| at.with_timezone(&Utc))
        .unwrap_or_else(|_| fallback())
}
