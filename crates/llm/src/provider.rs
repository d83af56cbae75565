//! Completion provider wrapper
//!
//! Combines a [`CompletionBackend`] with the per-provider [`RateLimiter`]
//! and the retry policy: rate limits and timeouts retry up to
//! `retry_attempts`, everything else surfaces immediately.

use std::sync::Arc;

use futures::future::join_all;

use ragforge_config::constants::rate_limit as limits;

use crate::backend::CompletionBackend;
use crate::rate_limit::{RateLimitStrategy, RateLimiter};
use crate::LlmError;

/// A backend plus its rate-limit state. Clone-cheap via `Arc`s.
#[derive(Clone)]
pub struct CompletionProvider {
    backend: Arc<dyn CompletionBackend>,
    limiter: Arc<RateLimiter>,
    retry_attempts: u32,
}

impl CompletionProvider {
    pub fn new(backend: Arc<dyn CompletionBackend>) -> Self {
        let limiter = Arc::new(RateLimiter::reactive(backend.provider_name()));
        Self {
            backend,
            limiter,
            retry_attempts: limits::RETRY_ATTEMPTS,
        }
    }

    /// Opt in to the proactive sliding-window strategy.
    pub fn with_proactive_limit(mut self, max_per_minute: usize) -> Self {
        self.limiter = Arc::new(RateLimiter::new(
            self.backend.provider_name(),
            RateLimitStrategy::Proactive { max_per_minute },
        ));
        self
    }

    pub fn with_retry_attempts(mut self, retry_attempts: u32) -> Self {
        self.retry_attempts = retry_attempts.max(1);
        self
    }

    pub fn model_name(&self) -> &str {
        self.backend.model_name()
    }

    /// Generate with the full §rate-limit discipline applied.
    pub async fn generate(&self, prompt: &str, request_id: &str) -> Result<String, LlmError> {
        let mut last_delay_ms = 0u64;

        for attempt in 1..=self.retry_attempts {
            self.limiter.before_request().await;

            match self.backend.generate(prompt, request_id).await {
                Ok(text) => {
                    self.limiter.on_success();
                    return Ok(text);
                }
                Err(LlmError::GenRateLimited { .. }) => {
                    if attempt == self.retry_attempts {
                        break;
                    }
                    let delay = self.limiter.on_rate_limit().await;
                    last_delay_ms = delay.as_millis() as u64;
                }
                Err(LlmError::GenTimeout { .. }) => {
                    tracing::warn!(
                        request_id,
                        attempt,
                        provider = self.limiter.provider(),
                        "Completion timed out; retrying"
                    );
                    if attempt == self.retry_attempts {
                        self.limiter.on_final_failure();
                        return Err(LlmError::GenTimeout {
                            provider: self.limiter.provider().to_string(),
                            remaining_attempts: 0,
                        });
                    }
                }
                Err(err) => {
                    // Non-retriable: surface as-is.
                    self.limiter.on_final_failure();
                    return Err(err);
                }
            }
        }

        self.limiter.on_final_failure();
        Err(LlmError::GenRateLimited {
            provider: self.limiter.provider().to_string(),
            delay_ms: last_delay_ms,
            remaining_attempts: 0,
        })
    }

    /// Generate a batch concurrently. Each prompt gets a derived request
    /// id; failures surface per prompt.
    pub async fn generate_batch(
        &self,
        prompts: &[String],
        request_id: &str,
    ) -> Vec<Result<String, LlmError>> {
        let futures = prompts.iter().enumerate().map(|(i, prompt)| {
            let provider = self.clone();
            let request_id = format!("{}-b{}", request_id, i);
            async move { provider.generate(prompt, &request_id).await }
        });
        join_all(futures).await
    }
}
