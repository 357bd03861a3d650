//! HTTP service layer — a thin REST surface over the engine.
//!
//! Handlers validate and serialize; every decision about emails, templates,
//! drafts and model calls lives below this layer.

pub mod error;
pub mod routes;

pub use error::ApiError;
pub use routes::{AppState, api_router};
