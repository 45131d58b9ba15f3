use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tracing::{debug, instrument, warn};

use crate::domain::error::GenerationError;
use crate::domain::models::RetryConfig;
use crate::domain::ports::{GenerationClient, GenerationRequest, LlmClient, RepairRequest};
use crate::services::prompts::{extract_artifact_body, generation_prompt, repair_prompt};

/// [`GenerationClient`] that talks to a language model through prompts.
///
/// A reply whose extracted artifact body is empty is asked again with
/// exponential backoff, up to `retry.max_retries` extra attempts.
pub struct TestGenerator {
    llm: Arc<dyn LlmClient>,
    retry: RetryConfig,
}

impl TestGenerator {
    pub fn new(llm: Arc<dyn LlmClient>) -> Self {
        Self {
            llm,
            retry: RetryConfig::default(),
        }
    }

    #[must_use]
    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    async fn ask(&self, prompt: &str) -> Result<String, GenerationError> {
        let mut attempt = 0;
        loop {
            let response = self.llm.complete(prompt).await?;
            let body = extract_artifact_body(&response);
            if !body.is_empty() {
                debug!(bytes = body.len(), "extracted artifact body");
                return Ok(body);
            }

            if attempt >= self.retry.max_retries {
                warn!(attempts = attempt + 1, "backend kept returning an empty artifact");
                return Err(GenerationError::Transient(
                    "backend returned an empty artifact".to_string(),
                ));
            }

            let backoff = self.backoff(attempt);
            warn!(attempt = attempt + 1, ?backoff, "empty artifact body, asking again");
            tokio::time::sleep(backoff).await;
            attempt += 1;
        }
    }

    fn backoff(&self, attempt: u32) -> Duration {
        let ms = self
            .retry
            .initial_backoff_ms
            .saturating_mul(2_u64.saturating_pow(attempt))
            .min(self.retry.max_backoff_ms);
        Duration::from_millis(ms)
    }
}

#[async_trait]
impl GenerationClient for TestGenerator {
    #[instrument(skip(self, request), fields(unit = %request.unit_id))]
    async fn generate_artifact(
        &self,
        request: &GenerationRequest,
    ) -> Result<String, GenerationError> {
        self.ask(&generation_prompt(request)).await
    }

    #[instrument(skip(self, request), fields(unit = %request.unit_id))]
    async fn repair_artifact(&self, request: &RepairRequest) -> Result<String, GenerationError> {
        self.ask(&repair_prompt(request)).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;
    use std::sync::Mutex;

    struct CannedLlm {
        responses: Mutex<Vec<Result<String, GenerationError>>>,
        prompts: Mutex<Vec<String>>,
    }

    impl CannedLlm {
        /// Replies in order, repeating the last one.
        fn new(responses: Vec<Result<String, GenerationError>>) -> Arc<Self> {
            Arc::new(Self {
                responses: Mutex::new(responses),
                prompts: Mutex::new(Vec::new()),
            })
        }

        fn calls(&self) -> usize {
            self.prompts.lock().unwrap().len()
        }
    }

    #[async_trait]
    impl LlmClient for CannedLlm {
        async fn complete(&self, prompt: &str) -> Result<String, GenerationError> {
            self.prompts.lock().unwrap().push(prompt.to_string());
            let mut responses = self.responses.lock().unwrap();
            if responses.len() > 1 {
                responses.remove(0)
            } else {
                responses[0].clone()
            }
        }
    }

    fn fast_retry() -> RetryConfig {
        RetryConfig {
            max_retries: 2,
            initial_backoff_ms: 1,
            max_backoff_ms: 2,
        }
    }

    fn request() -> GenerationRequest {
        GenerationRequest {
            language: "Go".to_string(),
            unit_id: "calc.go".to_string(),
            unit_source: "package calc".to_string(),
            artifact_path: PathBuf::from("calc_test.go"),
            current_coverage: 0.0,
            uncovered_lines: [3].into_iter().collect(),
        }
    }

    #[tokio::test]
    async fn test_generate_strips_fences() {
        let llm = CannedLlm::new(vec![Ok("```go\npackage calc\n```".to_string())]);
        let generator = TestGenerator::new(llm.clone());

        let body = generator.generate_artifact(&request()).await.unwrap();
        assert_eq!(body, "package calc");
        assert!(llm.prompts.lock().unwrap()[0].contains("calc.go"));
    }

    #[tokio::test]
    async fn test_empty_body_is_asked_again() {
        let llm = CannedLlm::new(vec![
            Ok("```go\n```".to_string()),
            Ok("```go\npackage calc\n```".to_string()),
        ]);
        let generator = TestGenerator::new(llm.clone()).with_retry(fast_retry());

        let body = generator.generate_artifact(&request()).await.unwrap();
        assert_eq!(body, "package calc");
        assert_eq!(llm.calls(), 2);
    }

    #[tokio::test]
    async fn test_empty_body_is_transient_after_retries() {
        let llm = CannedLlm::new(vec![Ok("```go\n```".to_string())]);
        let generator = TestGenerator::new(llm.clone()).with_retry(fast_retry());

        let err = generator.generate_artifact(&request()).await.unwrap_err();
        assert!(matches!(err, GenerationError::Transient(_)));
        assert_eq!(llm.calls(), 3);
    }

    #[tokio::test]
    async fn test_throttle_passes_through() {
        let reset_at = chrono::Utc::now();
        let llm = CannedLlm::new(vec![Err(GenerationError::Throttled { reset_at })]);
        let generator = TestGenerator::new(llm.clone()).with_retry(fast_retry());

        let err = generator.generate_artifact(&request()).await.unwrap_err();
        assert_eq!(err, GenerationError::Throttled { reset_at });
        assert_eq!(llm.calls(), 1);
    }
}
