//! libSQL backend — async `Store` implementation.
//!
//! Supports local file and in-memory databases. Migrations run on open.

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use libsql::{Connection, Database as LibSqlDatabase, params};
use tracing::{debug, info};

use crate::error::DatabaseError;
use crate::models::{
    Draft, Email, EmailUpdate, NewDraft, NewEmail, NewTemplate, PromptTemplate, TemplateKind,
};
use crate::store::migrations;
use crate::store::traits::Store;

/// libSQL store backend.
///
/// Holds a single connection that is reused for all operations.
/// `libsql::Connection` is `Send + Sync` and safe for concurrent async use.
pub struct LibSqlStore {
    #[allow(dead_code)]
    db: Arc<LibSqlDatabase>,
    conn: Connection,
}

impl LibSqlStore {
    /// Open (or create) a local database file and run migrations.
    pub async fn new_local(path: &Path) -> Result<Self, DatabaseError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                DatabaseError::Connection(format!("Failed to create database directory: {e}"))
            })?;
        }

        let db = libsql::Builder::new_local(path).build().await.map_err(|e| {
            DatabaseError::Connection(format!("Failed to open libSQL database: {e}"))
        })?;

        let conn = db
            .connect()
            .map_err(|e| DatabaseError::Connection(format!("Failed to create connection: {e}")))?;

        migrations::run_migrations(&conn).await?;
        info!(path = %path.display(), "Database opened");
        Ok(Self {
            db: Arc::new(db),
            conn,
        })
    }

    /// Create an in-memory database (for tests).
    pub async fn new_memory() -> Result<Self, DatabaseError> {
        let db = libsql::Builder::new_local(":memory:")
            .build()
            .await
            .map_err(|e| {
                DatabaseError::Connection(format!("Failed to create in-memory database: {e}"))
            })?;

        let conn = db
            .connect()
            .map_err(|e| DatabaseError::Connection(format!("Failed to create connection: {e}")))?;

        migrations::run_migrations(&conn).await?;
        Ok(Self {
            db: Arc::new(db),
            conn,
        })
    }

    /// Get the connection.
    fn conn(&self) -> &Connection {
        &self.conn
    }
}

// ── Helper functions ────────────────────────────────────────────────

/// Parse an RFC 3339 or SQLite datetime string into DateTime<Utc>.
fn parse_datetime(s: &str) -> DateTime<Utc> {
    // Try RFC 3339 first (our canonical write format)
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return dt.with_timezone(&Utc);
    }
    // Try SQLite datetime() output with fractional seconds
    if let Ok(ndt) = chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S%.f") {
        return ndt.and_utc();
    }
    // Try SQLite datetime() output without fractional seconds
    if let Ok(ndt) = chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S") {
        return ndt.and_utc();
    }
    DateTime::<Utc>::MIN_UTC
}

fn parse_optional_datetime(s: &Option<String>) -> Option<DateTime<Utc>> {
    s.as_ref().map(|s| parse_datetime(s))
}

/// Convert `Option<String>` to libsql Value.
fn opt_text_owned(s: Option<String>) -> libsql::Value {
    match s {
        Some(s) => libsql::Value::Text(s),
        None => libsql::Value::Null,
    }
}

/// Map a libsql Row to an Email.
///
/// Column order matches EMAIL_COLUMNS:
/// 0:id, 1:sender, 2:subject, 3:body, 4:received_at, 5:category,
/// 6:action_items, 7:summary, 8:status, 9:last_processed_at,
/// 10:created_at, 11:updated_at
fn row_to_email(row: &libsql::Row) -> Result<Email, libsql::Error> {
    let received_str: String = row.get(4)?;
    let status_str: String = row.get(8)?;
    let last_processed_str: Option<String> = row.get(9).ok();
    let created_str: String = row.get(10)?;
    let updated_str: String = row.get(11)?;

    // A derived column that fails to decode should not make the row
    // unreadable; drop it and let reprocessing rewrite it.
    let action_items = row
        .get::<String>(6)
        .ok()
        .and_then(|s| match serde_json::from_str(&s) {
            Ok(items) => Some(items),
            Err(e) => {
                tracing::warn!("Skipping unreadable action_items column: {e}");
                None
            }
        });

    Ok(Email {
        id: row.get(0)?,
        sender: row.get(1)?,
        subject: row.get(2)?,
        body: row.get(3)?,
        received_at: parse_datetime(&received_str),
        category: row.get(5).ok(),
        action_items,
        summary: row.get(7).ok(),
        status: status_str.parse().unwrap_or_default(),
        last_processed_at: parse_optional_datetime(&last_processed_str),
        created_at: parse_datetime(&created_str),
        updated_at: parse_datetime(&updated_str),
    })
}

/// Map a libsql Row to a PromptTemplate.
///
/// Column order matches PROMPT_COLUMNS:
/// 0:id, 1:name, 2:kind, 3:content, 4:description, 5:active, 6:updated_at
fn row_to_template(row: &libsql::Row) -> Result<PromptTemplate, libsql::Error> {
    let kind_str: String = row.get(2)?;
    let active: i64 = row.get(5)?;
    let updated_str: String = row.get(6)?;

    Ok(PromptTemplate {
        id: row.get(0)?,
        name: row.get(1)?,
        kind: kind_str.parse().unwrap_or(TemplateKind::Custom),
        content: row.get(3)?,
        description: row.get(4).ok(),
        active: active != 0,
        updated_at: parse_datetime(&updated_str),
    })
}

/// Map a libsql Row to a Draft.
///
/// Column order matches DRAFT_COLUMNS:
/// 0:id, 1:source_email_id, 2:subject, 3:body, 4:status, 5:metadata, 6:created_at
fn row_to_draft(row: &libsql::Row) -> Result<Draft, libsql::Error> {
    let status_str: String = row.get(4)?;
    let metadata_str: String = row.get(5)?;
    let created_str: String = row.get(6)?;

    Ok(Draft {
        id: row.get(0)?,
        source_email_id: row.get(1).ok(),
        subject: row.get(2)?,
        body: row.get(3)?,
        status: status_str.parse().unwrap_or_default(),
        metadata: serde_json::from_str(&metadata_str).unwrap_or(serde_json::Value::Null),
        created_at: parse_datetime(&created_str),
    })
}

// ── Trait implementation ────────────────────────────────────────────

const EMAIL_COLUMNS: &str = "id, sender, subject, body, received_at, category, action_items, summary, status, last_processed_at, created_at, updated_at";

const PROMPT_COLUMNS: &str = "id, name, kind, content, description, active, updated_at";

const DRAFT_COLUMNS: &str = "id, source_email_id, subject, body, status, metadata, created_at";

#[async_trait]
impl Store for LibSqlStore {
    // ── Emails ──────────────────────────────────────────────────────

    async fn insert_email(&self, email: NewEmail) -> Result<Email, DatabaseError> {
        let conn = self.conn();
        let now = Utc::now().to_rfc3339();

        conn.execute(
            "INSERT INTO emails (sender, subject, body, received_at, created_at, updated_at) VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                email.sender,
                email.subject,
                email.body,
                email.received_at.to_rfc3339(),
                now.clone(),
                now,
            ],
        )
        .await
        .map_err(|e| DatabaseError::Query(format!("insert_email: {e}")))?;

        let id = conn.last_insert_rowid();
        let stored = self
            .get_email(id)
            .await?
            .ok_or_else(|| DatabaseError::NotFound {
                entity: "email".into(),
                id: id.to_string(),
            })?;

        debug!(id, sender = %stored.sender, "Email ingested");
        Ok(stored)
    }

    async fn get_email(&self, id: i64) -> Result<Option<Email>, DatabaseError> {
        let conn = self.conn();
        let mut rows = conn
            .query(
                &format!("SELECT {EMAIL_COLUMNS} FROM emails WHERE id = ?1"),
                params![id],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("get_email: {e}")))?;

        match rows.next().await {
            Ok(Some(row)) => {
                let email = row_to_email(&row)
                    .map_err(|e| DatabaseError::Query(format!("get_email row parse: {e}")))?;
                Ok(Some(email))
            }
            Ok(None) => Ok(None),
            Err(e) => Err(DatabaseError::Query(format!("get_email: {e}"))),
        }
    }

    async fn list_emails(&self) -> Result<Vec<Email>, DatabaseError> {
        let conn = self.conn();
        let mut rows = conn
            .query(
                &format!("SELECT {EMAIL_COLUMNS} FROM emails ORDER BY received_at DESC, id DESC"),
                (),
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("list_emails: {e}")))?;

        let mut emails = Vec::new();
        while let Ok(Some(row)) = rows.next().await {
            match row_to_email(&row) {
                Ok(email) => emails.push(email),
                Err(e) => {
                    tracing::warn!("Skipping email row: {e}");
                }
            }
        }
        Ok(emails)
    }

    async fn update_email(&self, id: i64, update: EmailUpdate) -> Result<(), DatabaseError> {
        let conn = self.conn();
        let action_items_json = match &update.action_items {
            Some(items) => Some(serde_json::to_string(items).map_err(|e| {
                DatabaseError::Serialization(format!("action_items for email {id}: {e}"))
            })?),
            None => None,
        };
        let now = Utc::now().to_rfc3339();

        // Unset fields arrive as NULL; COALESCE keeps the stored value.
        let affected = conn
            .execute(
                "UPDATE emails SET
                    category = COALESCE(?1, category),
                    action_items = COALESCE(?2, action_items),
                    summary = COALESCE(?3, summary),
                    status = COALESCE(?4, status),
                    last_processed_at = COALESCE(?5, last_processed_at),
                    updated_at = ?6
                 WHERE id = ?7",
                params![
                    opt_text_owned(update.category),
                    opt_text_owned(action_items_json),
                    opt_text_owned(update.summary),
                    opt_text_owned(update.status.map(|s| s.to_string())),
                    opt_text_owned(update.last_processed_at.map(|t| t.to_rfc3339())),
                    now,
                    id,
                ],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("update_email: {e}")))?;

        if affected == 0 {
            return Err(DatabaseError::NotFound {
                entity: "email".into(),
                id: id.to_string(),
            });
        }

        debug!(id, "Email updated");
        Ok(())
    }

    async fn delete_all_emails(&self) -> Result<u64, DatabaseError> {
        let conn = self.conn();
        let affected = conn
            .execute("DELETE FROM emails", ())
            .await
            .map_err(|e| DatabaseError::Query(format!("delete_all_emails: {e}")))?;

        info!(count = affected, "All emails deleted");
        Ok(affected)
    }

    // ── Prompt templates ────────────────────────────────────────────

    async fn upsert_template(
        &self,
        template: NewTemplate,
    ) -> Result<PromptTemplate, DatabaseError> {
        let conn = self.conn();
        let now = Utc::now().to_rfc3339();

        conn.execute(
            "INSERT INTO prompts (name, kind, content, description, active, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)
             ON CONFLICT(name) DO UPDATE SET
                 kind = excluded.kind,
                 content = excluded.content,
                 description = excluded.description,
                 active = excluded.active,
                 updated_at = excluded.updated_at",
            params![
                template.name.clone(),
                template.kind.to_string(),
                template.content,
                opt_text_owned(template.description),
                template.active as i64,
                now,
            ],
        )
        .await
        .map_err(|e| DatabaseError::Query(format!("upsert_template: {e}")))?;

        let stored = self
            .get_template(&template.name)
            .await?
            .ok_or_else(|| DatabaseError::NotFound {
                entity: "template".into(),
                id: template.name.clone(),
            })?;

        debug!(name = %stored.name, kind = %stored.kind, "Template upserted");
        Ok(stored)
    }

    async fn get_template(&self, name: &str) -> Result<Option<PromptTemplate>, DatabaseError> {
        let conn = self.conn();
        let mut rows = conn
            .query(
                &format!("SELECT {PROMPT_COLUMNS} FROM prompts WHERE name = ?1"),
                params![name],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("get_template: {e}")))?;

        match rows.next().await {
            Ok(Some(row)) => {
                let template = row_to_template(&row)
                    .map_err(|e| DatabaseError::Query(format!("get_template row parse: {e}")))?;
                Ok(Some(template))
            }
            Ok(None) => Ok(None),
            Err(e) => Err(DatabaseError::Query(format!("get_template: {e}"))),
        }
    }

    async fn list_templates(&self) -> Result<Vec<PromptTemplate>, DatabaseError> {
        let conn = self.conn();
        let mut rows = conn
            .query(
                &format!("SELECT {PROMPT_COLUMNS} FROM prompts ORDER BY name ASC"),
                (),
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("list_templates: {e}")))?;

        let mut templates = Vec::new();
        while let Ok(Some(row)) = rows.next().await {
            match row_to_template(&row) {
                Ok(template) => templates.push(template),
                Err(e) => {
                    tracing::warn!("Skipping template row: {e}");
                }
            }
        }
        Ok(templates)
    }

    async fn list_active_templates(
        &self,
        kind: TemplateKind,
    ) -> Result<Vec<PromptTemplate>, DatabaseError> {
        let conn = self.conn();
        let mut rows = conn
            .query(
                &format!(
                    "SELECT {PROMPT_COLUMNS} FROM prompts WHERE kind = ?1 AND active = 1 ORDER BY name ASC"
                ),
                params![kind.to_string()],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("list_active_templates: {e}")))?;

        let mut templates = Vec::new();
        while let Ok(Some(row)) = rows.next().await {
            match row_to_template(&row) {
                Ok(template) => templates.push(template),
                Err(e) => {
                    tracing::warn!("Skipping template row: {e}");
                }
            }
        }
        Ok(templates)
    }

    async fn delete_template(&self, name: &str) -> Result<(), DatabaseError> {
        let conn = self.conn();
        let affected = conn
            .execute("DELETE FROM prompts WHERE name = ?1", params![name])
            .await
            .map_err(|e| DatabaseError::Query(format!("delete_template: {e}")))?;

        if affected == 0 {
            return Err(DatabaseError::NotFound {
                entity: "template".into(),
                id: name.to_string(),
            });
        }

        debug!(name, "Template deleted");
        Ok(())
    }

    // ── Drafts ──────────────────────────────────────────────────────

    async fn create_draft(&self, draft: NewDraft) -> Result<Draft, DatabaseError> {
        let conn = self.conn();
        let metadata = serde_json::to_string(&draft.metadata)
            .map_err(|e| DatabaseError::Serialization(format!("draft metadata: {e}")))?;
        let now = Utc::now().to_rfc3339();

        conn.execute(
            "INSERT INTO drafts (source_email_id, subject, body, metadata, created_at) VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                draft
                    .source_email_id
                    .map_or(libsql::Value::Null, libsql::Value::Integer),
                draft.subject,
                draft.body,
                metadata,
                now,
            ],
        )
        .await
        .map_err(|e| DatabaseError::Query(format!("create_draft: {e}")))?;

        let id = conn.last_insert_rowid();
        let stored = self
            .get_draft(id)
            .await?
            .ok_or_else(|| DatabaseError::NotFound {
                entity: "draft".into(),
                id: id.to_string(),
            })?;

        debug!(id, source_email_id = ?stored.source_email_id, "Draft created");
        Ok(stored)
    }

    async fn get_draft(&self, id: i64) -> Result<Option<Draft>, DatabaseError> {
        let conn = self.conn();
        let mut rows = conn
            .query(
                &format!("SELECT {DRAFT_COLUMNS} FROM drafts WHERE id = ?1"),
                params![id],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("get_draft: {e}")))?;

        match rows.next().await {
            Ok(Some(row)) => {
                let draft = row_to_draft(&row)
                    .map_err(|e| DatabaseError::Query(format!("get_draft row parse: {e}")))?;
                Ok(Some(draft))
            }
            Ok(None) => Ok(None),
            Err(e) => Err(DatabaseError::Query(format!("get_draft: {e}"))),
        }
    }

    async fn list_drafts(&self) -> Result<Vec<Draft>, DatabaseError> {
        let conn = self.conn();
        let mut rows = conn
            .query(
                &format!("SELECT {DRAFT_COLUMNS} FROM drafts ORDER BY created_at DESC, id DESC"),
                (),
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("list_drafts: {e}")))?;

        let mut drafts = Vec::new();
        while let Ok(Some(row)) = rows.next().await {
            match row_to_draft(&row) {
                Ok(draft) => drafts.push(draft),
                Err(e) => {
                    tracing::warn!("Skipping draft row: {e}");
                }
            }
        }
        Ok(drafts)
    }

    async fn delete_draft(&self, id: i64) -> Result<(), DatabaseError> {
        let conn = self.conn();
        let affected = conn
            .execute("DELETE FROM drafts WHERE id = ?1", params![id])
            .await
            .map_err(|e| DatabaseError::Query(format!("delete_draft: {e}")))?;

        if affected == 0 {
            return Err(DatabaseError::NotFound {
                entity: "draft".into(),
                id: id.to_string(),
            });
        }

        debug!(id, "Draft deleted");
        Ok(())
    }
}
