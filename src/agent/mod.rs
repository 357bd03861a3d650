//! Conversational resolver over the stored inbox.
//!
//! Answers free-form questions against one email or a digest of the whole
//! inbox, through the active `chat` template. Questions that ask for a
//! draft additionally persist one. Direct draft production is exposed too:
//! `draft_reply` for a stored email, `generate_email` from an instruction.

use std::collections::VecDeque;
use std::sync::{Arc, LazyLock};

use regex::Regex;
use serde::Serialize;
use tokio::sync::RwLock;
use tracing::info;

use crate::error::{ConfigError, DatabaseError, Error, Result};
use crate::llm::{InvocationClient, InvokeOptions};
use crate::models::{
    ChatScope, ChatTurn, Draft, Email, NewDraft, ProcessingResult, TemplateKind,
};
use crate::parser::{self, ExpectedShape};
use crate::pipeline::resolve_active_template;
use crate::prompts;
use crate::store::Store;

/// Turns kept in the in-memory chat history.
const MAX_HISTORY_TURNS: usize = 50;

/// Most emails an inbox digest covers.
const DIGEST_MAX_EMAILS: usize = 10;

/// Character budget for an inbox digest.
const DIGEST_CHAR_BUDGET: usize = 4000;

/// Name of the seeded compose template (kind `custom`, resolved by name).
const COMPOSE_TEMPLATE: &str = "compose";

/// Questions that ask for a draft to be produced.
static DRAFT_INTENT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b(draft|compose|write\s+(?:me\s+)?(?:a|an)\s+(?:reply|response|email|message))\b")
        .unwrap()
});

/// What a chat exchange produced.
#[derive(Debug, Clone, Serialize)]
pub struct ChatAnswer {
    pub answer: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub draft: Option<Draft>,
}

/// Chat resolver: one shared instance, history in memory only.
pub struct ChatResolver {
    store: Arc<dyn Store>,
    client: Arc<InvocationClient>,
    history: RwLock<VecDeque<ChatTurn>>,
}

impl ChatResolver {
    pub fn new(store: Arc<dyn Store>, client: Arc<InvocationClient>) -> Self {
        Self {
            store,
            client,
            history: RwLock::new(VecDeque::new()),
        }
    }

    /// Answer a question over the given scope.
    ///
    /// Renders the active `chat` template with `{{question}}` and
    /// `{{context}}`. When the question asks for a draft, the model output
    /// is additionally parsed as a reply and persisted; invocation or parse
    /// failures surface as typed errors, never degraded answers.
    pub async fn answer(&self, question: &str, scope: ChatScope) -> Result<ChatAnswer> {
        let scoped_email = match scope {
            ChatScope::Email(id) => Some(self.store.get_email(id).await?.ok_or_else(|| {
                Error::Database(DatabaseError::NotFound {
                    entity: "email".into(),
                    id: id.to_string(),
                })
            })?),
            ChatScope::All => None,
        };
        let context = match &scoped_email {
            Some(email) => email_context(email),
            None => inbox_digest(&self.store.list_emails().await?),
        };

        let template = resolve_active_template(self.store.as_ref(), TemplateKind::Chat).await?;
        let prompt = prompts::render(
            &template.content,
            &prompts::fields([("question", question), ("context", context.as_str())]),
        )?;

        info!(%scope, "Answering chat question");
        let raw = self
            .client
            .invoke(&prompt, &InvokeOptions::for_kind(TemplateKind::Chat))
            .await?;

        let mut turn = ChatTurn::new(scope, question, raw.as_str());
        let draft = if wants_draft(question) {
            let draft = self
                .persist_chat_draft(&raw, scoped_email.as_ref())
                .await?;
            turn = turn.with_draft(draft.id);
            Some(draft)
        } else {
            None
        };

        self.record_turn(turn).await;
        Ok(ChatAnswer {
            answer: raw,
            draft,
        })
    }

    /// The recorded exchanges, oldest first.
    pub async fn history(&self) -> Vec<ChatTurn> {
        self.history.read().await.iter().cloned().collect()
    }

    /// Draft a reply to a stored email through the active `reply` template.
    ///
    /// `user_context` is extra guidance rendered into `{{context}}`. The
    /// draft's subject falls back to `Re: <original subject>` when the
    /// model provides none.
    pub async fn draft_reply(&self, email_id: i64, user_context: Option<&str>) -> Result<Draft> {
        let email = self.store.get_email(email_id).await?.ok_or_else(|| {
            Error::Database(DatabaseError::NotFound {
                entity: "email".into(),
                id: email_id.to_string(),
            })
        })?;

        let template = resolve_active_template(self.store.as_ref(), TemplateKind::Reply).await?;
        let prompt = prompts::render(
            &template.content,
            &prompts::fields([
                ("sender", email.sender.as_str()),
                ("subject", email.subject.as_str()),
                ("body", email.body.as_str()),
                ("context", user_context.unwrap_or("")),
            ]),
        )?;

        let raw = self
            .client
            .invoke(&prompt, &InvokeOptions::for_kind(TemplateKind::Reply))
            .await?;
        let parsed = parser::parse(&raw, ExpectedShape::Reply)?;
        let (subject, body) = reply_parts(parsed.result, &raw);
        let subject = if subject.trim().is_empty() {
            reply_subject(&email.subject)
        } else {
            subject
        };

        let draft = self
            .store
            .create_draft(
                NewDraft::new(subject, body)
                    .with_source_email(email.id)
                    .with_metadata(serde_json::json!({
                        "type": "reply",
                        "original_email_id": email.id,
                    })),
            )
            .await?;

        info!(draft_id = draft.id, email_id, "Reply draft created");
        Ok(draft)
    }

    /// Generate a fresh email draft from an instruction.
    ///
    /// Uses the `compose` template, resolved by name: composing is not tied
    /// to any stored email, so kind-based resolution does not apply.
    pub async fn generate_email(
        &self,
        instruction: &str,
        user_context: Option<&str>,
    ) -> Result<Draft> {
        let template = self
            .store
            .get_template(COMPOSE_TEMPLATE)
            .await?
            .ok_or_else(|| {
                Error::Config(ConfigError::TemplateNotFound(COMPOSE_TEMPLATE.to_string()))
            })?;

        let prompt = prompts::render(
            &template.content,
            &prompts::fields([
                ("instruction", instruction),
                ("context", user_context.unwrap_or("")),
            ]),
        )?;

        let raw = self
            .client
            .invoke(&prompt, &InvokeOptions::for_kind(TemplateKind::Custom))
            .await?;
        let parsed = parser::parse(&raw, ExpectedShape::Reply)?;
        let (subject, body) = reply_parts(parsed.result, &raw);
        let subject = if subject.trim().is_empty() {
            "Draft".to_string()
        } else {
            subject
        };

        let draft = self
            .store
            .create_draft(NewDraft::new(subject, body).with_metadata(serde_json::json!({
                "type": "new",
                "instruction": instruction,
            })))
            .await?;

        info!(draft_id = draft.id, "Email draft generated");
        Ok(draft)
    }

    /// Parse chat output as a reply and persist it as a draft.
    async fn persist_chat_draft(&self, raw: &str, source: Option<&Email>) -> Result<Draft> {
        let parsed = parser::parse(raw, ExpectedShape::Reply)?;
        let (subject, body) = reply_parts(parsed.result, raw);
        let subject = if subject.trim().is_empty() {
            source
                .map(|email| reply_subject(&email.subject))
                .unwrap_or_else(|| "Draft".to_string())
        } else {
            subject
        };

        let mut new_draft = NewDraft::new(subject, body).with_metadata(serde_json::json!({
            "type": "chat",
        }));
        if let Some(email) = source {
            new_draft = new_draft.with_source_email(email.id);
        }

        let draft = self.store.create_draft(new_draft).await?;
        info!(draft_id = draft.id, "Chat question produced a draft");
        Ok(draft)
    }

    async fn record_turn(&self, turn: ChatTurn) {
        let mut history = self.history.write().await;
        history.push_back(turn);
        while history.len() > MAX_HISTORY_TURNS {
            history.pop_front();
        }
    }
}

// ── Context construction ────────────────────────────────────────────

/// Everything the model gets to see about one email.
fn email_context(email: &Email) -> String {
    let mut context = format!(
        "From: {}\nSubject: {}\nReceived: {}\n\n{}",
        email.sender,
        email.subject,
        email.received_at.to_rfc3339(),
        email.body
    );
    if let Some(category) = &email.category {
        context.push_str(&format!("\n\nCategory: {category}"));
    }
    if let Some(summary) = &email.summary {
        context.push_str(&format!("\nSummary: {summary}"));
    }
    if let Some(items) = &email.action_items
        && !items.is_empty()
    {
        context.push_str("\nAction items:");
        for item in items {
            match &item.deadline {
                Some(deadline) => {
                    context.push_str(&format!("\n- {} (due {})", item.task, deadline))
                }
                None => context.push_str(&format!("\n- {}", item.task)),
            }
        }
    }
    context
}

/// Bounded digest of the inbox: newest emails first, one line each.
///
/// Bodies are never included; the digest trades precision for cost.
fn inbox_digest(emails: &[Email]) -> String {
    if emails.is_empty() {
        return "The inbox is empty.".to_string();
    }

    let mut digest = String::new();
    let mut used = 0usize;
    for email in emails.iter().take(DIGEST_MAX_EMAILS) {
        let mut line = format!("[{}] from {} / {}", email.id, email.sender, email.subject);
        if let Some(category) = &email.category {
            line.push_str(&format!(" / {category}"));
        }
        if let Some(summary) = &email.summary {
            line.push_str(&format!(" / {summary}"));
        }
        line.push('\n');

        let line_len = line.chars().count();
        if used + line_len > DIGEST_CHAR_BUDGET && used > 0 {
            break;
        }
        used += line_len;
        digest.push_str(&line);
    }
    digest
}

/// Does the question ask for a draft to be produced?
fn wants_draft(question: &str) -> bool {
    DRAFT_INTENT.is_match(question)
}

/// Destructure a parsed reply. Reply-shape parsing only produces `Reply`.
fn reply_parts(result: ProcessingResult, raw: &str) -> (String, String) {
    match result {
        ProcessingResult::Reply { subject, body } => (subject, body),
        _ => (String::new(), raw.trim().to_string()),
    }
}

/// Subject for a reply draft: `Re: <original>`, without stacking prefixes.
fn reply_subject(original: &str) -> String {
    let original = original.trim();
    if original.is_empty() {
        return "Draft".to_string();
    }
    if original.to_lowercase().starts_with("re:") {
        original.to_string()
    } else {
        format!("Re: {original}")
    }
}
