//! Inbox Pilot — prompt-driven email processing engine.
//!
//! Emails flow through configurable prompt templates into an LLM backend
//! and back out as structured records: a category, action items, a summary.
//! A chat resolver answers questions over the stored inbox and produces
//! drafts. Everything persists in libSQL; a thin REST layer sits on top.

pub mod agent;
pub mod config;
pub mod error;
pub mod llm;
pub mod models;
pub mod parser;
pub mod pipeline;
pub mod prompts;
pub mod seed;
pub mod server;
pub mod store;

pub use error::{Error, Result};
