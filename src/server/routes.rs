//! REST endpoints for emails, prompt templates, drafts, and the agent.

use std::sync::Arc;

use axum::extract::{Path, State};
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::json;
use tower_http::cors::CorsLayer;
use tracing::info;

use super::error::ApiError;
use crate::agent::{ChatAnswer, ChatResolver};
use crate::error::{DatabaseError, Error};
use crate::models::{
    ChatScope, ChatTurn, Draft, Email, NewDraft, NewEmail, NewTemplate, PromptTemplate,
    TemplateKind,
};
use crate::pipeline::{BatchOutcome, EmailPipeline};
use crate::seed;
use crate::store::Store;

/// Shared state for all API routes.
#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn Store>,
    pub pipeline: Arc<EmailPipeline>,
    pub resolver: Arc<ChatResolver>,
}

/// Build the API router.
pub fn api_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/emails", get(list_emails).delete(clear_emails))
        .route("/emails/load-mock", post(load_mock))
        .route("/emails/process", post(process_emails))
        .route("/emails/{id}", get(get_email))
        .route("/prompts", get(list_prompts).post(upsert_prompt))
        .route("/prompts/load-defaults", post(load_default_prompts))
        .route("/prompts/{name}", get(get_prompt))
        .route("/drafts", get(list_drafts).post(create_draft))
        .route("/drafts/{id}", get(get_draft).delete(delete_draft))
        .route("/agent/chat", post(chat))
        .route("/agent/chat/history", get(chat_history))
        .route("/agent/draft-reply/{email_id}", post(draft_reply))
        .route("/agent/generate-email", post(generate_email))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

fn not_found(entity: &str, id: impl std::fmt::Display) -> ApiError {
    ApiError(Error::Database(DatabaseError::NotFound {
        entity: entity.to_string(),
        id: id.to_string(),
    }))
}

// ── Health ──────────────────────────────────────────────────────────

async fn health() -> Json<serde_json::Value> {
    Json(json!({ "status": "ok", "service": "inbox-pilot" }))
}

// ── Emails ──────────────────────────────────────────────────────────

async fn list_emails(State(state): State<AppState>) -> Result<Json<Vec<Email>>, ApiError> {
    Ok(Json(state.store.list_emails().await?))
}

async fn get_email(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<Json<Email>, ApiError> {
    let email = state
        .store
        .get_email(id)
        .await?
        .ok_or_else(|| not_found("email", id))?;
    Ok(Json(email))
}

/// Email supplied to the mock loader, `received_at` defaulting to now.
#[derive(Debug, Deserialize)]
struct IngestEmail {
    sender: String,
    subject: String,
    body: String,
    #[serde(default)]
    received_at: Option<DateTime<Utc>>,
}

impl IngestEmail {
    fn into_new_email(self) -> NewEmail {
        let received_at = self.received_at.unwrap_or_else(Utc::now);
        NewEmail::new(self.sender, self.subject, self.body, received_at)
    }
}

/// POST /emails/load-mock
///
/// Ingests emails without processing them. With no body the built-in sample
/// inbox is loaded; a JSON array ingests that array instead.
async fn load_mock(
    State(state): State<AppState>,
    body: Option<Json<Vec<IngestEmail>>>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let new_emails: Vec<NewEmail> = match body {
        Some(Json(list)) => list.into_iter().map(IngestEmail::into_new_email).collect(),
        None => seed::sample_emails(),
    };

    let mut emails = Vec::with_capacity(new_emails.len());
    for new_email in new_emails {
        emails.push(state.store.insert_email(new_email).await?);
    }

    info!(count = emails.len(), "Mock inbox loaded");
    Ok(Json(json!({
        "status": "success",
        "loaded": emails.len(),
        "emails": emails,
    })))
}

/// Body for `POST /emails/process`. Both fields optional: no ids means the
/// whole inbox, no kinds means every processing kind.
#[derive(Debug, Default, Deserialize)]
struct ProcessRequest {
    #[serde(default)]
    email_ids: Option<Vec<i64>>,
    #[serde(default)]
    kinds: Option<Vec<TemplateKind>>,
}

async fn process_emails(
    State(state): State<AppState>,
    body: Option<Json<ProcessRequest>>,
) -> Result<Json<BatchOutcome>, ApiError> {
    let request = body.map(|Json(r)| r).unwrap_or_default();
    let email_ids = match request.email_ids {
        Some(ids) => ids,
        None => state
            .store
            .list_emails()
            .await?
            .iter()
            .map(|email| email.id)
            .collect(),
    };
    let kinds = request
        .kinds
        .unwrap_or_else(|| TemplateKind::processing_kinds().to_vec());

    Ok(Json(state.pipeline.process_many(email_ids, &kinds).await))
}

async fn clear_emails(State(state): State<AppState>) -> Result<Json<serde_json::Value>, ApiError> {
    let deleted = state.store.delete_all_emails().await?;
    Ok(Json(json!({ "status": "success", "deleted": deleted })))
}

// ── Prompt templates ────────────────────────────────────────────────

async fn list_prompts(
    State(state): State<AppState>,
) -> Result<Json<Vec<PromptTemplate>>, ApiError> {
    Ok(Json(state.store.list_templates().await?))
}

async fn get_prompt(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> Result<Json<PromptTemplate>, ApiError> {
    let template = state
        .store
        .get_template(&name)
        .await?
        .ok_or_else(|| not_found("template", &name))?;
    Ok(Json(template))
}

async fn upsert_prompt(
    State(state): State<AppState>,
    Json(template): Json<NewTemplate>,
) -> Result<Json<PromptTemplate>, ApiError> {
    Ok(Json(state.store.upsert_template(template).await?))
}

async fn load_default_prompts(
    State(state): State<AppState>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let loaded = seed::load_default_templates(state.store.as_ref()).await?;
    Ok(Json(json!({ "status": "success", "loaded": loaded })))
}

// ── Drafts ──────────────────────────────────────────────────────────

async fn list_drafts(State(state): State<AppState>) -> Result<Json<Vec<Draft>>, ApiError> {
    Ok(Json(state.store.list_drafts().await?))
}

async fn get_draft(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<Json<Draft>, ApiError> {
    let draft = state
        .store
        .get_draft(id)
        .await?
        .ok_or_else(|| not_found("draft", id))?;
    Ok(Json(draft))
}

/// Body for `POST /drafts`.
#[derive(Debug, Deserialize)]
struct CreateDraftRequest {
    #[serde(default)]
    source_email_id: Option<i64>,
    subject: String,
    body: String,
    #[serde(default)]
    metadata: serde_json::Value,
}

async fn create_draft(
    State(state): State<AppState>,
    Json(request): Json<CreateDraftRequest>,
) -> Result<Json<Draft>, ApiError> {
    let mut new_draft =
        NewDraft::new(request.subject, request.body).with_metadata(request.metadata);
    if let Some(email_id) = request.source_email_id {
        new_draft = new_draft.with_source_email(email_id);
    }
    Ok(Json(state.store.create_draft(new_draft).await?))
}

async fn delete_draft(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<Json<serde_json::Value>, ApiError> {
    state.store.delete_draft(id).await?;
    Ok(Json(json!({ "status": "deleted" })))
}

// ── Agent ───────────────────────────────────────────────────────────

/// Body for `POST /agent/chat`. Without `email_id` the question ranges over
/// the whole inbox.
#[derive(Debug, Deserialize)]
struct ChatRequest {
    question: String,
    #[serde(default)]
    email_id: Option<i64>,
}

async fn chat(
    State(state): State<AppState>,
    Json(request): Json<ChatRequest>,
) -> Result<Json<ChatAnswer>, ApiError> {
    let scope = match request.email_id {
        Some(id) => ChatScope::Email(id),
        None => ChatScope::All,
    };
    Ok(Json(state.resolver.answer(&request.question, scope).await?))
}

async fn chat_history(State(state): State<AppState>) -> Json<Vec<ChatTurn>> {
    Json(state.resolver.history().await)
}

/// Body for `POST /agent/draft-reply/{email_id}`; optional extra guidance.
#[derive(Debug, Default, Deserialize)]
struct DraftReplyRequest {
    #[serde(default)]
    context: Option<String>,
}

async fn draft_reply(
    State(state): State<AppState>,
    Path(email_id): Path<i64>,
    body: Option<Json<DraftReplyRequest>>,
) -> Result<Json<Draft>, ApiError> {
    let request = body.map(|Json(r)| r).unwrap_or_default();
    Ok(Json(
        state
            .resolver
            .draft_reply(email_id, request.context.as_deref())
            .await?,
    ))
}

/// Body for `POST /agent/generate-email`.
#[derive(Debug, Deserialize)]
struct GenerateEmailRequest {
    instruction: String,
    #[serde(default)]
    context: Option<String>,
}

async fn generate_email(
    State(state): State<AppState>,
    Json(request): Json<GenerateEmailRequest>,
) -> Result<Json<Draft>, ApiError> {
    Ok(Json(
        state
            .resolver
            .generate_email(&request.instruction, request.context.as_deref())
            .await?,
    ))
}
