//! Backend-agnostic `Store` trait — single async interface for persistence.
//!
//! The store is the authoritative record: nothing above it caches rows.
//! Handlers and the pipeline read fresh state through it for every
//! operation, so concurrent writers never see stale copies.

use async_trait::async_trait;

use crate::error::DatabaseError;
use crate::models::{
    Draft, Email, EmailUpdate, NewDraft, NewEmail, NewTemplate, PromptTemplate, TemplateKind,
};

/// Persistence interface for emails, prompt templates, and drafts.
#[async_trait]
pub trait Store: Send + Sync {
    // ── Emails ──────────────────────────────────────────────────────

    /// Ingest a new email and return the stored row.
    async fn insert_email(&self, email: NewEmail) -> Result<Email, DatabaseError>;

    /// Get an email by id.
    async fn get_email(&self, id: i64) -> Result<Option<Email>, DatabaseError>;

    /// All emails, newest first.
    async fn list_emails(&self) -> Result<Vec<Email>, DatabaseError>;

    /// Apply a partial update to one email row in a single statement.
    ///
    /// Only `Some` fields of the update are written. `updated_at` is always
    /// refreshed. Fails with `NotFound` if the id does not exist.
    async fn update_email(&self, id: i64, update: EmailUpdate) -> Result<(), DatabaseError>;

    /// Delete every email. Returns the number of rows removed.
    async fn delete_all_emails(&self) -> Result<u64, DatabaseError>;

    // ── Prompt templates ────────────────────────────────────────────

    /// Create or replace a template, keyed by name. Returns the stored row.
    async fn upsert_template(&self, template: NewTemplate)
    -> Result<PromptTemplate, DatabaseError>;

    /// Get a template by name.
    async fn get_template(&self, name: &str) -> Result<Option<PromptTemplate>, DatabaseError>;

    /// All templates, ordered by name.
    async fn list_templates(&self) -> Result<Vec<PromptTemplate>, DatabaseError>;

    /// Active templates of the given kind.
    ///
    /// Callers that need exactly one (the pipeline, the agent) go through
    /// [`resolve_active_template`](crate::pipeline::resolve_active_template).
    async fn list_active_templates(
        &self,
        kind: TemplateKind,
    ) -> Result<Vec<PromptTemplate>, DatabaseError>;

    /// Delete a template by name. Fails with `NotFound` if absent.
    async fn delete_template(&self, name: &str) -> Result<(), DatabaseError>;

    // ── Drafts ──────────────────────────────────────────────────────

    /// Store a new draft and return the stored row.
    async fn create_draft(&self, draft: NewDraft) -> Result<Draft, DatabaseError>;

    /// Get a draft by id.
    async fn get_draft(&self, id: i64) -> Result<Option<Draft>, DatabaseError>;

    /// All drafts, newest first.
    async fn list_drafts(&self) -> Result<Vec<Draft>, DatabaseError>;

    /// Delete a draft by id. Fails with `NotFound` if absent.
    async fn delete_draft(&self, id: i64) -> Result<(), DatabaseError>;
}
