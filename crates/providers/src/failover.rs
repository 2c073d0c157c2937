//! Provider failover controller.
//!
//! Per request the controller walks the configured provider chain:
//! `TRY_PRIMARY → TRY_SECONDARY → ... → TEMPLATE_FALLBACK → DONE`.
//!
//! Each network provider gets a bounded retry loop (exponential backoff
//! plus jitter) for transient errors; permanent errors advance the chain
//! immediately. Every attempt runs under a hard timeout, and a semaphore
//! caps simultaneous in-flight calls across the process. The terminal
//! template fallback cannot fail, so [`FailoverController::execute`]
//! always produces a reply.

use crate::retry::RetryPolicy;
use crate::template::TemplateFallback;
use crate::{AnthropicProvider, OpenAiCompatProvider};
use std::sync::Arc;
use std::time::Duration;
use studyloom_config::AppConfig;
use studyloom_core::error::ProviderError;
use studyloom_core::provider::{ChatReply, ChatRequest, Provider};
use tokio::sync::Semaphore;
use tracing::{info, warn};

/// How one provider's engagement ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AttemptOutcome {
    /// This provider produced the reply.
    Answered,
    /// Gave up after transient failures (retries exhausted or timed out).
    TransientFailure(String),
    /// Failed permanently; no retry was attempted.
    PermanentFailure(String),
}

/// Post-hoc record of one provider's engagement in the chain.
#[derive(Debug, Clone)]
pub struct AttemptRecord {
    pub provider: String,
    /// Retries beyond the first try.
    pub retries: u32,
    pub outcome: AttemptOutcome,
}

/// Structured metadata returned alongside every reply — which provider
/// ultimately answered and what happened along the way.
#[derive(Debug, Clone)]
pub struct FailoverReport {
    pub provider_used: String,
    pub attempts: Vec<AttemptRecord>,
}

/// The failover controller.
pub struct FailoverController {
    chain: Vec<Arc<dyn Provider>>,
    template: TemplateFallback,
    policy: RetryPolicy,
    call_timeout: Duration,
    inflight: Arc<Semaphore>,
}

impl FailoverController {
    pub fn new(
        chain: Vec<Arc<dyn Provider>>,
        policy: RetryPolicy,
        call_timeout: Duration,
        max_inflight: usize,
    ) -> Self {
        Self {
            chain,
            template: TemplateFallback::new(),
            policy,
            call_timeout,
            inflight: Arc::new(Semaphore::new(max_inflight.max(1))),
        }
    }

    /// Build the controller from configuration: one adapter per entry in
    /// `provider_priority_order`, in order.
    pub fn from_config(config: &AppConfig) -> Self {
        let mut chain: Vec<Arc<dyn Provider>> = Vec::new();

        for name in &config.provider_priority_order {
            let api_key = config.api_key_for(name).unwrap_or_default();
            let provider_config = config.providers.get(name);
            let api_url = provider_config.and_then(|p| p.api_url.clone());
            let model = provider_config.and_then(|p| p.model.clone());

            let provider: Arc<dyn Provider> = if name == "anthropic" {
                let mut p = AnthropicProvider::new(&api_key);
                if let Some(url) = &api_url {
                    p = p.with_base_url(url);
                }
                if let Some(model) = &model {
                    p = p.with_model(model);
                }
                Arc::new(p)
            } else {
                let base_url = api_url
                    .unwrap_or_else(|| "https://api.openai.com/v1".to_string());
                let mut p = OpenAiCompatProvider::new(name, &base_url, &api_key);
                if let Some(model) = &model {
                    p = p.with_model(model);
                }
                Arc::new(p)
            };

            chain.push(provider);
        }

        Self::new(
            chain,
            RetryPolicy::new(&config.retry),
            Duration::from_secs(config.retry.request_timeout_secs),
            config.max_inflight_calls,
        )
    }

    /// Number of network providers in the chain.
    pub fn chain_len(&self) -> usize {
        self.chain.len()
    }

    /// Walk the full chain including the template fallback. Never fails.
    pub async fn execute(&self, request: ChatRequest) -> (ChatReply, FailoverReport) {
        match self.try_network(&request).await {
            Ok((reply, report)) => (reply, report),
            Err((_, mut attempts)) => {
                info!("All network providers exhausted, using template fallback");
                // The template provider cannot fail.
                let reply = self
                    .template
                    .call(request)
                    .await
                    .unwrap_or_else(|_| ChatReply::full("Your message has been saved."));
                attempts.push(AttemptRecord {
                    provider: self.template.name().to_string(),
                    retries: 0,
                    outcome: AttemptOutcome::Answered,
                });
                (
                    reply,
                    FailoverReport {
                        provider_used: self.template.name().to_string(),
                        attempts,
                    },
                )
            }
        }
    }

    /// Walk only the network providers. Errors on exhaustion — used by
    /// callers that need genuine model output (note synthesis, step
    /// refinement) and treat exhaustion as "skip for now".
    pub async fn execute_network(
        &self,
        request: ChatRequest,
    ) -> Result<(ChatReply, FailoverReport), ProviderError> {
        self.try_network(&request)
            .await
            .map_err(|(last_error, _)| last_error)
    }

    async fn try_network(
        &self,
        request: &ChatRequest,
    ) -> Result<(ChatReply, FailoverReport), (ProviderError, Vec<AttemptRecord>)> {
        let mut attempts: Vec<AttemptRecord> = Vec::new();
        let mut last_error =
            ProviderError::NotConfigured("No providers in failover chain".into());

        for (i, provider) in self.chain.iter().enumerate() {
            let provider_name = provider.name().to_string();
            info!(
                provider = %provider_name,
                position = i + 1,
                total = self.chain.len(),
                "Failover: trying provider"
            );

            match self.attempt_provider(provider.as_ref(), request).await {
                Ok((reply, retries)) => {
                    attempts.push(AttemptRecord {
                        provider: provider_name.clone(),
                        retries,
                        outcome: AttemptOutcome::Answered,
                    });
                    return Ok((
                        reply,
                        FailoverReport {
                            provider_used: provider_name,
                            attempts,
                        },
                    ));
                }
                Err((error, retries)) => {
                    warn!(
                        provider = %provider_name,
                        retries,
                        error = %error,
                        "Failover: provider exhausted, advancing"
                    );
                    let outcome = if error.is_transient() {
                        AttemptOutcome::TransientFailure(error.to_string())
                    } else {
                        AttemptOutcome::PermanentFailure(error.to_string())
                    };
                    attempts.push(AttemptRecord {
                        provider: provider_name,
                        retries,
                        outcome,
                    });
                    last_error = error;
                }
            }
        }

        Err((last_error, attempts))
    }

    /// One provider's bounded retry loop. Returns the reply and how many
    /// retries it took, or the final error and the retry count.
    async fn attempt_provider(
        &self,
        provider: &dyn Provider,
        request: &ChatRequest,
    ) -> Result<(ChatReply, u32), (ProviderError, u32)> {
        let max_attempts = self.policy.max_attempts();
        let mut retries = 0;

        for attempt in 0..max_attempts {
            let result = {
                // The permit bounds simultaneous in-flight calls; it is
                // released before any backoff sleep.
                let _permit = self
                    .inflight
                    .acquire()
                    .await
                    .expect("inflight semaphore closed");
                tokio::time::timeout(self.call_timeout, provider.call(request.clone())).await
            };

            let error = match result {
                Ok(Ok(reply)) => return Ok((reply, retries)),
                Ok(Err(e)) => e,
                Err(_) => ProviderError::Timeout(format!(
                    "Provider '{}' timed out after {}s",
                    provider.name(),
                    self.call_timeout.as_secs()
                )),
            };

            if !error.is_transient() {
                return Err((error, retries));
            }

            if attempt + 1 >= max_attempts {
                return Err((error, retries));
            }

            let suggested = match &error {
                ProviderError::RateLimited { retry_after_secs } => {
                    Some(Duration::from_secs(*retry_after_secs))
                }
                _ => None,
            };
            let delay = self.policy.delay_for(attempt, suggested);
            warn!(
                provider = %provider.name(),
                attempt = attempt + 1,
                max_attempts,
                delay_ms = delay.as_millis() as u64,
                error = %error,
                "Retrying after transient error"
            );
            retries += 1;
            tokio::time::sleep(delay).await;
        }

        unreachable!("retry loop returns before exhausting attempts")
    }
}
