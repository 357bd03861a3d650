//! Maps engine errors onto HTTP responses.

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use tracing::{error, warn};

use crate::error::{ConfigError, DatabaseError, Error, PipelineError};

/// An engine error on its way out as an HTTP response.
///
/// Handlers bubble errors into this with `?`; the response carries the
/// display message as `{"error": "..."}` under the mapped status code.
#[derive(Debug)]
pub struct ApiError(pub Error);

impl From<Error> for ApiError {
    fn from(error: Error) -> Self {
        Self(error)
    }
}

impl From<DatabaseError> for ApiError {
    fn from(error: DatabaseError) -> Self {
        Self(Error::Database(error))
    }
}

impl From<PipelineError> for ApiError {
    fn from(error: PipelineError) -> Self {
        Self(Error::Pipeline(error))
    }
}

impl From<ConfigError> for ApiError {
    fn from(error: ConfigError) -> Self {
        Self(Error::Config(error))
    }
}

/// Status for an engine error: 404 for missing rows, 422 for configuration
/// and template problems, 502 for upstream model failures, 500 otherwise.
fn status_for(error: &Error) -> StatusCode {
    match error {
        Error::Database(DatabaseError::NotFound { .. }) => StatusCode::NOT_FOUND,
        Error::Config(_) | Error::Render(_) => StatusCode::UNPROCESSABLE_ENTITY,
        Error::Llm(_) => StatusCode::BAD_GATEWAY,
        Error::Pipeline(inner) => pipeline_status(inner),
        Error::Database(_) | Error::Parse(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

fn pipeline_status(error: &PipelineError) -> StatusCode {
    match error {
        PipelineError::EmailNotFound { .. }
        | PipelineError::Store(DatabaseError::NotFound { .. }) => StatusCode::NOT_FOUND,
        PipelineError::Template(_)
        | PipelineError::Render(_)
        | PipelineError::UnsupportedKind { .. } => StatusCode::UNPROCESSABLE_ENTITY,
        PipelineError::Llm(_) => StatusCode::BAD_GATEWAY,
        PipelineError::Parse(_) | PipelineError::Store(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = status_for(&self.0);
        if status.is_server_error() {
            error!(status = %status, error = %self.0, "Request failed");
        } else {
            warn!(status = %status, error = %self.0, "Request rejected");
        }
        (status, Json(serde_json::json!({ "error": self.0.to_string() }))).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use crate::error::{LlmError, ParseError, ParseErrorKind, RenderError};

    fn not_found() -> DatabaseError {
        DatabaseError::NotFound {
            entity: "email".into(),
            id: "7".into(),
        }
    }

    #[test]
    fn missing_rows_map_to_404() {
        assert_eq!(
            status_for(&Error::Database(not_found())),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            status_for(&Error::Pipeline(PipelineError::EmailNotFound { id: 7 })),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            status_for(&Error::Pipeline(PipelineError::Store(not_found()))),
            StatusCode::NOT_FOUND
        );
    }

    #[test]
    fn configuration_problems_map_to_422() {
        assert_eq!(
            status_for(&Error::Config(ConfigError::NoActiveTemplate {
                kind: "summary".into()
            })),
            StatusCode::UNPROCESSABLE_ENTITY
        );
        assert_eq!(
            status_for(&Error::Render(RenderError::MissingPlaceholder {
                name: "subject".into()
            })),
            StatusCode::UNPROCESSABLE_ENTITY
        );
        assert_eq!(
            status_for(&Error::Pipeline(PipelineError::Template(
                ConfigError::AmbiguousTemplate {
                    kind: "summary".into(),
                    count: 2
                }
            ))),
            StatusCode::UNPROCESSABLE_ENTITY
        );
        assert_eq!(
            status_for(&Error::Pipeline(PipelineError::UnsupportedKind {
                kind: "reply".into()
            })),
            StatusCode::UNPROCESSABLE_ENTITY
        );
    }

    #[test]
    fn upstream_model_failures_map_to_502() {
        assert_eq!(
            status_for(&Error::Llm(LlmError::Timeout {
                provider: "anthropic".into(),
                timeout: Duration::from_secs(30)
            })),
            StatusCode::BAD_GATEWAY
        );
        assert_eq!(
            status_for(&Error::Pipeline(PipelineError::Llm(LlmError::RateLimited {
                provider: "openai".into(),
                retry_after: None
            }))),
            StatusCode::BAD_GATEWAY
        );
    }

    #[test]
    fn everything_else_maps_to_500() {
        assert_eq!(
            status_for(&Error::Database(DatabaseError::Query("boom".into()))),
            StatusCode::INTERNAL_SERVER_ERROR
        );
        assert_eq!(
            status_for(&Error::Parse(ParseError::new(
                ParseErrorKind::Unparseable,
                "garbage"
            ))),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }
}
