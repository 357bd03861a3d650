//! Email processing pipeline.
//!
//! Each email flows through, per requested kind:
//! 1. template resolution — exactly one active template per kind
//! 2. `{{placeholder}}` rendering
//! 3. model invocation (retrying client)
//! 4. output parsing into the kind's expected shape
//! 5. per-kind commit to the store
//!
//! Kinds are independent: one kind failing never blocks or rolls back
//! another. The email's status afterwards reflects the whole run.

pub mod processor;
pub mod types;

pub use processor::{EmailPipeline, resolve_active_template};
pub use types::{
    AppliedResult, BatchFailure, BatchOutcome, KindFailure, ProcessingOutcome, Stage,
};
