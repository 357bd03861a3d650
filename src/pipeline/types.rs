//! Shared types for the email processing pipeline.

use serde::Serialize;

use crate::error::PipelineError;
use crate::models::{ProcessingResult, TemplateKind};
use crate::parser::ParsePath;

// ── Per-kind outcomes ───────────────────────────────────────────────

/// Where in the per-kind flow a failure happened.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    /// Resolving the template or filling its placeholders.
    Rendering,
    /// Calling the model.
    Invoking,
    /// Interpreting the model output.
    Parsing,
    /// Writing the derived field back to the store.
    Applying,
}

/// One successfully applied kind.
#[derive(Debug, Clone, Serialize)]
pub struct AppliedResult {
    pub kind: TemplateKind,
    pub result: ProcessingResult,
    /// Which parse tier produced the result.
    pub path: ParsePath,
}

/// One failed kind. Prior values for that kind stay untouched.
#[derive(Debug, Clone, Serialize)]
pub struct KindFailure {
    pub kind: TemplateKind,
    pub stage: Stage,
    pub error: String,
}

impl KindFailure {
    /// Record a per-kind error with the stage that produced it.
    pub fn from_error(kind: TemplateKind, err: &PipelineError) -> Self {
        let stage = match err {
            PipelineError::Template(_) | PipelineError::Render(_) => Stage::Rendering,
            PipelineError::Llm(_) => Stage::Invoking,
            PipelineError::Parse(_) => Stage::Parsing,
            // Store write failures surface at the apply step
            _ => Stage::Applying,
        };
        Self {
            kind,
            stage,
            error: err.to_string(),
        }
    }
}

// ── Run outcomes ────────────────────────────────────────────────────

/// Outcome of running the pipeline over one email.
///
/// Kinds are independent: `applied` and `failures` partition the requested
/// kinds, and one kind failing never rolls back another.
#[derive(Debug, Clone, Serialize)]
pub struct ProcessingOutcome {
    pub email_id: i64,
    pub applied: Vec<AppliedResult>,
    pub failures: Vec<KindFailure>,
}

impl ProcessingOutcome {
    /// True when every requested kind applied.
    pub fn is_fully_processed(&self) -> bool {
        self.failures.is_empty()
    }
}

/// An email that never produced an outcome (unknown id, store failure).
#[derive(Debug, Clone, Serialize)]
pub struct BatchFailure {
    pub email_id: i64,
    pub error: String,
}

/// Outcome of a batch run. One email's fatal failure never aborts the rest.
#[derive(Debug, Clone, Default, Serialize)]
pub struct BatchOutcome {
    pub outcomes: Vec<ProcessingOutcome>,
    pub failed: Vec<BatchFailure>,
}
