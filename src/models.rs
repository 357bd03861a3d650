//! Core data model — emails, prompt templates, processing results, and drafts.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Derived-field state of a stored email.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ProcessingStatus {
    /// Never run through the pipeline (or explicitly reset).
    #[default]
    Unprocessed,
    /// Every requested kind applied on the last run.
    Processed,
    /// At least one kind failed on the last run.
    Failed,
}

impl std::fmt::Display for ProcessingStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Unprocessed => write!(f, "unprocessed"),
            Self::Processed => write!(f, "processed"),
            Self::Failed => write!(f, "failed"),
        }
    }
}

impl std::str::FromStr for ProcessingStatus {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "unprocessed" => Ok(Self::Unprocessed),
            "processed" => Ok(Self::Processed),
            "failed" => Ok(Self::Failed),
            _ => Err(format!("Unknown processing status: {}", s)),
        }
    }
}

/// A stored email with its derived fields.
///
/// Source fields (`sender`, `subject`, `body`, `received_at`) are written once
/// at ingestion. Derived fields (`category`, `action_items`, `summary`) are
/// written only by the pipeline, one kind at a time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Email {
    /// Row id assigned by the store.
    pub id: i64,
    /// Who sent the email.
    pub sender: String,
    /// Subject line.
    pub subject: String,
    /// Full body text.
    pub body: String,
    /// When the email was received.
    pub received_at: DateTime<Utc>,
    /// Category label assigned by the pipeline (if any).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
    /// Action items extracted by the pipeline (if any).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub action_items: Option<Vec<ActionItem>>,
    /// Summary produced by the pipeline (if any).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub summary: Option<String>,
    /// Outcome of the most recent pipeline run.
    #[serde(default)]
    pub status: ProcessingStatus,
    /// When the pipeline last touched this email.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_processed_at: Option<DateTime<Utc>>,
    /// When the row was created.
    pub created_at: DateTime<Utc>,
    /// When the row was last updated.
    pub updated_at: DateTime<Utc>,
}

/// Fields needed to ingest a new email. The store assigns the id.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewEmail {
    pub sender: String,
    pub subject: String,
    pub body: String,
    pub received_at: DateTime<Utc>,
}

impl NewEmail {
    pub fn new(
        sender: impl Into<String>,
        subject: impl Into<String>,
        body: impl Into<String>,
        received_at: DateTime<Utc>,
    ) -> Self {
        Self {
            sender: sender.into(),
            subject: subject.into(),
            body: body.into(),
            received_at,
        }
    }
}

/// Partial update applied to a single email row.
///
/// Only `Some` fields are written; everything else is left untouched. The
/// pipeline commits one derived field at a time through this.
#[derive(Debug, Clone, Default)]
pub struct EmailUpdate {
    pub category: Option<String>,
    pub action_items: Option<Vec<ActionItem>>,
    pub summary: Option<String>,
    pub status: Option<ProcessingStatus>,
    pub last_processed_at: Option<DateTime<Utc>>,
}

/// What a prompt template is for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TemplateKind {
    /// Assign a category label to an email.
    Categorization,
    /// Extract action items from an email.
    ActionItems,
    /// Draft a reply to an email.
    Reply,
    /// Summarize an email.
    Summary,
    /// Answer a conversational question over stored emails.
    Chat,
    /// Anything else; resolved by name, never by kind.
    Custom,
}

impl TemplateKind {
    /// Kinds the email pipeline knows how to apply.
    pub fn is_processing_kind(&self) -> bool {
        matches!(self, Self::Categorization | Self::ActionItems | Self::Summary)
    }

    /// The default set a pipeline run covers when none is requested.
    pub fn processing_kinds() -> [TemplateKind; 3] {
        [Self::Categorization, Self::ActionItems, Self::Summary]
    }
}

impl std::fmt::Display for TemplateKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Categorization => write!(f, "categorization"),
            Self::ActionItems => write!(f, "action_items"),
            Self::Reply => write!(f, "reply"),
            Self::Summary => write!(f, "summary"),
            Self::Chat => write!(f, "chat"),
            Self::Custom => write!(f, "custom"),
        }
    }
}

impl std::str::FromStr for TemplateKind {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "categorization" => Ok(Self::Categorization),
            "action_items" => Ok(Self::ActionItems),
            "reply" => Ok(Self::Reply),
            "summary" => Ok(Self::Summary),
            "chat" => Ok(Self::Chat),
            "custom" => Ok(Self::Custom),
            _ => Err(format!("Unknown template kind: {}", s)),
        }
    }
}

/// A stored prompt template.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PromptTemplate {
    /// Row id assigned by the store.
    pub id: i64,
    /// Unique name, the stable handle for lookups.
    pub name: String,
    /// What this template is for.
    pub kind: TemplateKind,
    /// Template text with `{{placeholder}}` slots.
    pub content: String,
    /// Human-facing description.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Whether the template participates in kind resolution.
    pub active: bool,
    /// When the template was last written.
    pub updated_at: DateTime<Utc>,
}

/// Fields for creating or replacing a template (keyed by name).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewTemplate {
    pub name: String,
    pub kind: TemplateKind,
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default = "default_active")]
    pub active: bool,
}

fn default_active() -> bool {
    true
}

impl NewTemplate {
    pub fn new(name: impl Into<String>, kind: TemplateKind, content: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind,
            content: content.into(),
            description: None,
            active: true,
        }
    }

    /// Set the description.
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// Mark the template inactive (excluded from kind resolution).
    pub fn inactive(mut self) -> Self {
        self.active = false;
        self
    }
}

/// Urgency of an extracted action item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    Low,
    #[default]
    Medium,
    High,
}

impl std::fmt::Display for Priority {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Low => write!(f, "low"),
            Self::Medium => write!(f, "medium"),
            Self::High => write!(f, "high"),
        }
    }
}

/// One action item extracted from an email.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActionItem {
    /// What needs doing. Accepts "text" from model output.
    #[serde(alias = "text")]
    pub task: String,
    /// Free-form deadline, as stated in the email ("Friday", "2026-09-01").
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deadline: Option<String>,
    /// Urgency; defaults to medium when the model omits it.
    #[serde(default)]
    pub priority: Priority,
}

impl ActionItem {
    pub fn new(task: impl Into<String>) -> Self {
        Self {
            task: task.into(),
            deadline: None,
            priority: Priority::default(),
        }
    }

    /// Set the deadline.
    pub fn with_deadline(mut self, deadline: impl Into<String>) -> Self {
        self.deadline = Some(deadline.into());
        self
    }

    /// Set the priority.
    pub fn with_priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }
}

/// Structured result of one processing kind.
///
/// All-or-nothing: a value of this type is either fully formed or was never
/// produced. Nothing partially parsed is ever stored.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ProcessingResult {
    /// A category label for the email.
    Category { category: String },
    /// Extracted action items.
    ActionItems { items: Vec<ActionItem> },
    /// A prose summary.
    Summary { summary: String },
    /// A drafted reply.
    Reply { subject: String, body: String },
}

impl ProcessingResult {
    /// The template kind this result satisfies.
    pub fn kind(&self) -> TemplateKind {
        match self {
            Self::Category { .. } => TemplateKind::Categorization,
            Self::ActionItems { .. } => TemplateKind::ActionItems,
            Self::Summary { .. } => TemplateKind::Summary,
            Self::Reply { .. } => TemplateKind::Reply,
        }
    }

    /// Canonical wire form, shaped like well-behaved model output.
    ///
    /// Parsing this back with the matching expected shape reproduces the
    /// value exactly.
    pub fn canonical_json(&self) -> String {
        let value = match self {
            Self::Category { category } => serde_json::json!({ "category": category }),
            Self::ActionItems { items } => {
                serde_json::to_value(items).unwrap_or_else(|_| serde_json::json!([]))
            }
            Self::Summary { summary } => serde_json::json!({ "summary": summary }),
            Self::Reply { subject, body } => {
                serde_json::json!({ "subject": subject, "body": body })
            }
        };
        value.to_string()
    }
}

/// Lifecycle state of a draft.
///
/// There is no sent state and no transition out of `Draft`: nothing in this
/// crate sends email.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum DraftStatus {
    #[default]
    Draft,
}

impl std::fmt::Display for DraftStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Draft => write!(f, "draft"),
        }
    }
}

impl std::str::FromStr for DraftStatus {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "draft" => Ok(Self::Draft),
            _ => Err(format!("Unknown draft status: {}", s)),
        }
    }
}

/// A stored draft email. Never sent by this system.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Draft {
    /// Row id assigned by the store.
    pub id: i64,
    /// The email this draft responds to, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source_email_id: Option<i64>,
    /// Draft subject line.
    pub subject: String,
    /// Draft body text.
    pub body: String,
    /// Always `draft`.
    pub status: DraftStatus,
    /// Provenance (how the draft was produced).
    pub metadata: serde_json::Value,
    /// When the draft was created.
    pub created_at: DateTime<Utc>,
}

/// Fields for creating a draft. The store assigns the id.
#[derive(Debug, Clone)]
pub struct NewDraft {
    pub source_email_id: Option<i64>,
    pub subject: String,
    pub body: String,
    pub metadata: serde_json::Value,
}

impl NewDraft {
    pub fn new(subject: impl Into<String>, body: impl Into<String>) -> Self {
        Self {
            source_email_id: None,
            subject: subject.into(),
            body: body.into(),
            metadata: serde_json::Value::Null,
        }
    }

    /// Link the draft to the email it responds to.
    pub fn with_source_email(mut self, email_id: i64) -> Self {
        self.source_email_id = Some(email_id);
        self
    }

    /// Attach provenance metadata.
    pub fn with_metadata(mut self, metadata: serde_json::Value) -> Self {
        self.metadata = metadata;
        self
    }
}

/// What a chat question ranges over.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "scope", content = "email_id", rename_all = "snake_case")]
pub enum ChatScope {
    /// A single stored email.
    Email(i64),
    /// The whole inbox, seen through a digest.
    All,
}

impl std::fmt::Display for ChatScope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Email(id) => write!(f, "email {}", id),
            Self::All => write!(f, "all"),
        }
    }
}

/// One question/answer exchange with the chat resolver.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatTurn {
    /// Unique turn id.
    pub id: Uuid,
    /// What the question ranged over.
    #[serde(flatten)]
    pub scope: ChatScope,
    /// The user's question.
    pub question: String,
    /// The model's answer.
    pub answer: String,
    /// Draft produced by this turn, if the question asked for one.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub draft_id: Option<i64>,
    /// When the question was asked.
    pub asked_at: DateTime<Utc>,
}

impl ChatTurn {
    pub fn new(scope: ChatScope, question: impl Into<String>, answer: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            scope,
            question: question.into(),
            answer: answer.into(),
            draft_id: None,
            asked_at: Utc::now(),
        }
    }

    /// Record the draft this turn produced.
    pub fn with_draft(mut self, draft_id: i64) -> Self {
        self.draft_id = Some(draft_id);
        self
    }
}
