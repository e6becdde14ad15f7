//! Completion invocation with bounded retry and cooperative cancellation.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use helmsman_core::config::{LlmConfig, RetryConfig};
use helmsman_core::{ProviderError, TurnError};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::llm::{ChatTurn, CompletionProvider, CompletionResponse, CompletionSettings};
use crate::tools::CapabilityRegistry;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub base_delay: Duration,
}

impl RetryPolicy {
    /// Linear backoff: `base_delay * attempt`.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        self.base_delay.saturating_mul(attempt)
    }
}

impl From<RetryConfig> for RetryPolicy {
    fn from(config: RetryConfig) -> Self {
        Self { max_retries: config.max_retries, base_delay: config.base_delay() }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self { max_retries: 3, base_delay: Duration::from_secs(10) }
    }
}

#[derive(Clone)]
pub struct CompletionInvoker {
    provider: Arc<dyn CompletionProvider>,
    policy: RetryPolicy,
    attempt_timeout: Duration,
}

impl CompletionInvoker {
    pub fn new(
        provider: Arc<dyn CompletionProvider>,
        policy: RetryPolicy,
        attempt_timeout: Duration,
    ) -> Self {
        Self { provider, policy, attempt_timeout }
    }

    pub fn from_config(provider: Arc<dyn CompletionProvider>, llm: &LlmConfig) -> Self {
        Self::new(provider, RetryPolicy::from(llm.retry), llm.timeout())
    }

    pub fn policy(&self) -> RetryPolicy {
        self.policy
    }

    pub fn provider_id(&self) -> &str {
        self.provider.provider_id()
    }

    /// Sends the request until it succeeds, fails terminally, or the retry
    /// budget runs out. Cancellation wins over every other outcome.
    pub async fn invoke(
        &self,
        history: &[ChatTurn],
        settings: &CompletionSettings,
        capabilities: &CapabilityRegistry,
        cancel: &CancellationToken,
        correlation_id: &str,
    ) -> Result<CompletionResponse, TurnError> {
        let mut attempt: u32 = 1;
        loop {
            if cancel.is_cancelled() {
                return Err(self.cancelled(correlation_id, attempt));
            }

            let outcome = tokio::select! {
                biased;
                _ = cancel.cancelled() => Err(ProviderError::Cancelled),
                result = self.bounded(self.provider.complete(history, settings, capabilities)) => result,
            };

            let error = match outcome {
                Ok(response) => {
                    tracing::debug!(
                        event_name = "agent.completion.succeeded",
                        correlation_id,
                        provider = self.provider.provider_id(),
                        attempt,
                        "completion succeeded"
                    );
                    return Ok(response);
                }
                Err(error) => error,
            };

            if cancel.is_cancelled() || error == ProviderError::Cancelled {
                return Err(self.cancelled(correlation_id, attempt));
            }

            if !error.is_retryable() {
                tracing::error!(
                    event_name = "agent.completion.failed",
                    correlation_id,
                    provider = self.provider.provider_id(),
                    error_class = error.category(),
                    error = %error,
                    attempt,
                    "completion failed"
                );
                return Err(TurnError::Provider(error));
            }

            if attempt > self.policy.max_retries {
                tracing::error!(
                    event_name = "agent.completion.retries_exhausted",
                    correlation_id,
                    provider = self.provider.provider_id(),
                    error_class = error.category(),
                    attempts = attempt,
                    "completion retries exhausted"
                );
                return Err(TurnError::RetriesExhausted { attempts: attempt, last: error });
            }

            let delay = self.policy.delay_for(attempt);
            tracing::warn!(
                event_name = "agent.completion.retrying",
                correlation_id,
                provider = self.provider.provider_id(),
                error_class = error.category(),
                attempt,
                delay_ms = delay.as_millis() as u64,
                "retrying completion after backoff"
            );

            tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(self.cancelled(correlation_id, attempt)),
                _ = tokio::time::sleep(delay) => {}
            }
            attempt += 1;
        }
    }

    async fn bounded<F>(&self, attempt: F) -> Result<CompletionResponse, ProviderError>
    where
        F: Future<Output = Result<CompletionResponse, ProviderError>>,
    {
        if self.provider.bounds_requests() {
            return attempt.await;
        }

        let started = Instant::now();
        match tokio::time::timeout(self.attempt_timeout, attempt).await {
            Ok(result) => result,
            Err(_) => Err(ProviderError::Timeout { elapsed_ms: started.elapsed().as_millis() as u64 }),
        }
    }

    fn cancelled(&self, correlation_id: &str, attempt: u32) -> TurnError {
        tracing::info!(
            event_name = "agent.completion.cancelled",
            correlation_id,
            provider = self.provider.provider_id(),
            attempt,
            "completion cancelled by caller"
        );
        TurnError::Provider(ProviderError::Cancelled)
    }
}
