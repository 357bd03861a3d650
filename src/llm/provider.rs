//! Provider abstraction for LLM backends.

use std::time::Duration;

use async_trait::async_trait;
use rust_decimal::Decimal;

use crate::error::LlmError;

/// Default token cap when a caller doesn't set one.
const DEFAULT_MAX_TOKENS: u32 = 1024;

/// Default sampling temperature.
const DEFAULT_TEMPERATURE: f32 = 0.7;

/// Who said what.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChatRole {
    System,
    User,
    Assistant,
}

/// One turn of conversation sent to the model.
#[derive(Debug, Clone, PartialEq)]
pub struct ChatMessage {
    pub role: ChatRole,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::Assistant,
            content: content.into(),
        }
    }

    /// Wire-format role string.
    pub fn role_str(&self) -> &'static str {
        match self.role {
            ChatRole::System => "system",
            ChatRole::User => "user",
            ChatRole::Assistant => "assistant",
        }
    }
}

/// A completion request.
#[derive(Debug, Clone)]
pub struct CompletionRequest {
    pub messages: Vec<ChatMessage>,
    /// Overrides the provider's default model when set.
    pub model: Option<String>,
    pub max_tokens: u32,
    pub temperature: f32,
}

impl CompletionRequest {
    pub fn new(messages: Vec<ChatMessage>) -> Self {
        Self {
            messages,
            model: None,
            max_tokens: DEFAULT_MAX_TOKENS,
            temperature: DEFAULT_TEMPERATURE,
        }
    }

    /// Override the model for this request.
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
}

/// Why the model stopped generating.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FinishReason {
    /// Natural end of the completion.
    Stop,
    /// Hit the output token cap; the text is cut off.
    Length,
    /// Provider-side content filtering.
    ContentFilter,
    /// Anything else the provider reports.
    Other,
}

/// A completion with usage accounting.
#[derive(Debug, Clone)]
pub struct CompletionResponse {
    pub content: String,
    pub input_tokens: u32,
    pub output_tokens: u32,
    pub finish_reason: FinishReason,
}

/// A text-completion backend.
#[async_trait]
pub trait LlmProvider: Send + Sync {
    /// Short provider name for logs and errors (e.g. "anthropic").
    fn name(&self) -> &str;

    /// Default model identifier for this provider instance.
    fn model_name(&self) -> &str;

    /// (input, output) USD cost per token for the default model.
    fn cost_per_token(&self) -> (Decimal, Decimal);

    /// Run one completion.
    async fn complete(&self, request: CompletionRequest) -> Result<CompletionResponse, LlmError>;
}

// ── HTTP status classification (shared by providers) ────────────────

/// Map a non-success HTTP status onto a typed error. The split here drives
/// the invocation client's retry decision via `LlmError::is_transient`.
pub(crate) fn classify_status(
    provider: &str,
    status: reqwest::StatusCode,
    retry_after: Option<Duration>,
    detail: String,
) -> LlmError {
    use reqwest::StatusCode;

    match status {
        StatusCode::TOO_MANY_REQUESTS => LlmError::RateLimited {
            provider: provider.to_string(),
            retry_after,
        },
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => LlmError::AuthFailed {
            provider: provider.to_string(),
        },
        s if s.is_server_error() => LlmError::ServerError {
            provider: provider.to_string(),
            status: s.as_u16(),
        },
        s => {
            if detail.contains("content_policy") || detail.contains("content_filter") {
                LlmError::ContentRejected {
                    provider: provider.to_string(),
                    reason: detail,
                }
            } else {
                LlmError::InvalidRequest {
                    provider: provider.to_string(),
                    status: s.as_u16(),
                    reason: detail,
                }
            }
        }
    }
}

/// Transport-level failures (connect, TLS, reqwest-side timeout) are all
/// transient `RequestFailed`.
pub(crate) fn classify_transport_error(provider: &str, err: reqwest::Error) -> LlmError {
    LlmError::RequestFailed {
        provider: provider.to_string(),
        reason: err.to_string(),
    }
}

/// `Retry-After` header in whole seconds, when present and sane.
pub(crate) fn parse_retry_after(headers: &reqwest::header::HeaderMap) -> Option<Duration> {
    headers
        .get(reqwest::header::RETRY_AFTER)?
        .to_str()
        .ok()?
        .trim()
        .parse::<u64>()
        .ok()
        .map(Duration::from_secs)
}
