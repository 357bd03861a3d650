//! Error types for Inbox Pilot.

use std::time::Duration;

/// Top-level error type for the engine.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Database error: {0}")]
    Database(#[from] DatabaseError),

    #[error("Render error: {0}")]
    Render(#[from] RenderError),

    #[error("LLM error: {0}")]
    Llm(#[from] LlmError),

    #[error("Parse error: {0}")]
    Parse(#[from] ParseError),

    #[error("Pipeline error: {0}")]
    Pipeline(#[from] PipelineError),
}

/// Configuration-related errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingEnvVar(String),

    #[error("Missing required configuration: {key}. {hint}")]
    MissingRequired { key: String, hint: String },

    #[error("Invalid configuration value for {key}: {message}")]
    InvalidValue { key: String, message: String },

    #[error("No active template for kind {kind}")]
    NoActiveTemplate { kind: String },

    #[error("Found {count} active templates for kind {kind}, expected exactly one")]
    AmbiguousTemplate { kind: String, count: usize },

    #[error("No template named {0}")]
    TemplateNotFound(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Database-related errors.
#[derive(Debug, thiserror::Error)]
pub enum DatabaseError {
    #[error("Connection error: {0}")]
    Connection(String),

    #[error("Query failed: {0}")]
    Query(String),

    #[error("Entity not found: {entity} with id {id}")]
    NotFound { entity: String, id: String },

    #[error("Constraint violation: {0}")]
    Constraint(String),

    #[error("Migration failed: {0}")]
    Migration(String),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

/// Template rendering errors.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RenderError {
    #[error("No value provided for placeholder {name}")]
    MissingPlaceholder { name: String },

    #[error("Rendered template is empty")]
    EmptyTemplate,
}

/// LLM provider errors.
#[derive(Debug, thiserror::Error)]
pub enum LlmError {
    #[error("Provider {provider} timed out after {timeout:?}")]
    Timeout { provider: String, timeout: Duration },

    #[error("Provider {provider} rate limited, retry after {retry_after:?}")]
    RateLimited {
        provider: String,
        retry_after: Option<Duration>,
    },

    #[error("Provider {provider} returned server error {status}")]
    ServerError { provider: String, status: u16 },

    #[error("Provider {provider} request failed: {reason}")]
    RequestFailed { provider: String, reason: String },

    #[error("Provider {provider} rejected the request ({status}): {reason}")]
    InvalidRequest {
        provider: String,
        status: u16,
        reason: String,
    },

    #[error("Authentication failed for provider {provider}")]
    AuthFailed { provider: String },

    #[error("Provider {provider} refused the content: {reason}")]
    ContentRejected { provider: String, reason: String },

    #[error("Invalid response from {provider}: {reason}")]
    InvalidResponse { provider: String, reason: String },

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl LlmError {
    /// Whether the invocation client should retry this failure.
    ///
    /// Timeouts, rate limits, server-side errors and transport failures are
    /// transient. Auth failures, malformed requests, content refusals and
    /// undecodable responses are not: repeating them yields the same outcome.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::Timeout { .. }
                | Self::RateLimited { .. }
                | Self::ServerError { .. }
                | Self::RequestFailed { .. }
        )
    }
}

/// Failure to interpret model output as the expected shape.
///
/// Carries the raw model text so callers can log or surface it. Display
/// shows a capped prefix; the full text stays in `raw`.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{kind}: {raw:.200}")]
pub struct ParseError {
    pub kind: ParseErrorKind,
    pub raw: String,
}

impl ParseError {
    pub fn new(kind: ParseErrorKind, raw: impl Into<String>) -> Self {
        Self {
            kind,
            raw: raw.into(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParseErrorKind {
    /// The model returned nothing usable (empty or whitespace).
    Empty,
    /// Valid JSON, but not the shape the caller asked for.
    InvalidShape,
    /// No parse tier could make sense of the output.
    Unparseable,
}

impl std::fmt::Display for ParseErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Empty => "empty model output",
            Self::InvalidShape => "model output does not match the expected shape",
            Self::Unparseable => "model output could not be parsed",
        };
        f.write_str(s)
    }
}

/// Pipeline-related errors.
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error("Email {id} not found")]
    EmailNotFound { id: i64 },

    #[error("Kind {kind} is not a processing kind")]
    UnsupportedKind { kind: String },

    #[error("Template resolution failed: {0}")]
    Template(#[from] ConfigError),

    #[error("Render failed: {0}")]
    Render(#[from] RenderError),

    #[error("LLM error: {0}")]
    Llm(#[from] LlmError),

    #[error("Parse error: {0}")]
    Parse(#[from] ParseError),

    #[error("Store error: {0}")]
    Store(#[from] DatabaseError),
}

/// Result type alias for the engine.
pub type Result<T> = std::result::Result<T, Error>;
