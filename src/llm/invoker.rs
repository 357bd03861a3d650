//! Invocation client — timeout, bounded retry, and cost logging around a
//! provider.
//!
//! Callers hand over final prompt text; the client sends it as the sole user
//! turn and returns the full response text or a typed error. Transient
//! failures retry with exponential backoff; everything else fails fast. The
//! transient/fatal split lives in `LlmError::is_transient`, nowhere else.

use std::sync::Arc;
use std::time::Duration;

use tracing::{info, warn};

use crate::error::LlmError;
use crate::llm::costs;
use crate::llm::provider::{ChatMessage, CompletionRequest, FinishReason, LlmProvider};
use crate::models::TemplateKind;

/// Retries after the first attempt.
const MAX_RETRIES: u32 = 2;

/// First retry delay; doubles per retry (1s, 2s).
const BACKOFF_BASE: Duration = Duration::from_secs(1);

/// Default wall-clock deadline per attempt.
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(60);

/// Per-call knobs.
#[derive(Debug, Clone)]
pub struct InvokeOptions {
    /// Overrides the provider's default model when set.
    pub model: Option<String>,
    pub max_tokens: u32,
    pub temperature: f32,
    /// Deadline for each individual attempt.
    pub timeout: Duration,
}

impl Default for InvokeOptions {
    fn default() -> Self {
        Self {
            model: None,
            max_tokens: 1024,
            temperature: 0.7,
            timeout: DEFAULT_TIMEOUT,
        }
    }
}

impl InvokeOptions {
    /// Tuned defaults per template kind. Deterministic-ish sampling for
    /// classification and extraction, warmer for prose.
    pub fn for_kind(kind: TemplateKind) -> Self {
        let (max_tokens, temperature) = match kind {
            TemplateKind::Categorization => (300, 0.1),
            TemplateKind::ActionItems => (400, 0.2),
            TemplateKind::Summary => (400, 0.3),
            TemplateKind::Reply => (400, 0.3),
            TemplateKind::Chat => (600, 0.5),
            TemplateKind::Custom => (600, 0.5),
        };
        Self {
            model: None,
            max_tokens,
            temperature,
            timeout: DEFAULT_TIMEOUT,
        }
    }

    /// Override the model.
    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }

    /// Set the output token cap.
    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = max_tokens;
        self
    }

    /// Set the sampling temperature.
    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }

    /// Set the per-attempt deadline.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

/// Retry/timeout wrapper around an `LlmProvider`.
pub struct InvocationClient {
    provider: Arc<dyn LlmProvider>,
    backoff_base: Duration,
}

impl InvocationClient {
    pub fn new(provider: Arc<dyn LlmProvider>) -> Self {
        Self {
            provider,
            backoff_base: BACKOFF_BASE,
        }
    }

    /// Shrink the backoff ladder (tests).
    pub fn with_backoff_base(mut self, base: Duration) -> Self {
        self.backoff_base = base;
        self
    }

    /// Send `prompt_text` as the sole user turn; return the full response
    /// text.
    pub async fn invoke(
        &self,
        prompt_text: &str,
        options: &InvokeOptions,
    ) -> Result<String, LlmError> {
        let mut attempt: u32 = 0;
        loop {
            match self.attempt(prompt_text, options).await {
                Ok(text) => return Ok(text),
                Err(err) if err.is_transient() && attempt < MAX_RETRIES => {
                    attempt += 1;
                    let delay = self.backoff_base * 2u32.pow(attempt - 1);
                    warn!(
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %err,
                        "Transient LLM failure, retrying"
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(err) => return Err(err),
            }
        }
    }

    async fn attempt(
        &self,
        prompt_text: &str,
        options: &InvokeOptions,
    ) -> Result<String, LlmError> {
        let mut request = CompletionRequest::new(vec![ChatMessage::user(prompt_text)])
            .with_max_tokens(options.max_tokens)
            .with_temperature(options.temperature);
        if let Some(model) = &options.model {
            request = request.with_model(model.clone());
        }
        let model = options
            .model
            .clone()
            .unwrap_or_else(|| self.provider.model_name().to_string());

        let response = tokio::time::timeout(options.timeout, self.provider.complete(request))
            .await
            .map_err(|_| LlmError::Timeout {
                provider: self.provider.name().to_string(),
                timeout: options.timeout,
            })??;

        if response.finish_reason == FinishReason::Length {
            warn!(model = %model, "Completion hit the output token cap; text is cut off");
        }
        if response.content.trim().is_empty() {
            return Err(LlmError::InvalidResponse {
                provider: self.provider.name().to_string(),
                reason: "empty completion".to_string(),
            });
        }

        let cost = costs::estimate_cost(&model, response.input_tokens, response.output_tokens);
        info!(
            provider = self.provider.name(),
            model = %model,
            input_tokens = response.input_tokens,
            output_tokens = response.output_tokens,
            cost_usd = %cost,
            "LLM invocation complete"
        );

        Ok(response.content)
    }
}
