//! Email pipeline — renders, invokes, parses, and commits per kind.
//!
//! Flow per requested kind:
//! 1. resolve the single active template for the kind
//! 2. render `{{sender}}`/`{{subject}}`/`{{body}}` into it
//! 3. invoke the model through the retrying client
//! 4. parse the output into the kind's expected shape
//! 5. commit that kind's derived field in one store update
//!
//! Kinds run independently: a failure in one is recorded and the rest
//! continue. Concurrent runs on the same email id are serialized.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use futures::StreamExt;
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

use crate::error::{ConfigError, PipelineError};
use crate::llm::{InvocationClient, InvokeOptions};
use crate::models::{
    Email, EmailUpdate, ProcessingResult, ProcessingStatus, PromptTemplate, TemplateKind,
};
use crate::parser::{self, ExpectedShape};
use crate::pipeline::types::{
    AppliedResult, BatchFailure, BatchOutcome, KindFailure, ProcessingOutcome,
};
use crate::prompts;
use crate::store::Store;

/// Max body characters included in a rendered prompt.
const MAX_BODY_CHARS: usize = 2000;

/// How many emails a batch run works on at once.
const BATCH_CONCURRENCY: usize = 4;

/// Resolve the single active template for a kind.
///
/// Fails unless exactly one active template of the kind exists: zero is
/// `NoActiveTemplate`, more than one is `AmbiguousTemplate`.
pub async fn resolve_active_template(
    store: &dyn Store,
    kind: TemplateKind,
) -> Result<PromptTemplate, PipelineError> {
    let mut matches = store.list_active_templates(kind).await?;
    match matches.len() {
        1 => Ok(matches.remove(0)),
        0 => Err(ConfigError::NoActiveTemplate {
            kind: kind.to_string(),
        }
        .into()),
        n => Err(ConfigError::AmbiguousTemplate {
            kind: kind.to_string(),
            count: n,
        }
        .into()),
    }
}

/// The email processing pipeline.
///
/// Stateless between runs apart from the per-email lock registry; every
/// run reads fresh rows from the store.
pub struct EmailPipeline {
    store: Arc<dyn Store>,
    client: Arc<InvocationClient>,
    locks: Mutex<HashMap<i64, Arc<Mutex<()>>>>,
}

impl EmailPipeline {
    pub fn new(store: Arc<dyn Store>, client: Arc<InvocationClient>) -> Self {
        Self {
            store,
            client,
            locks: Mutex::new(HashMap::new()),
        }
    }

    /// Process one email through the requested kinds.
    ///
    /// Fails fast (no model call) when the email does not exist or a
    /// requested kind is not a processing kind. Otherwise every kind runs,
    /// each committing its own derived field; the email's status afterwards
    /// is `processed` only if all of them applied.
    pub async fn process(
        &self,
        email_id: i64,
        kinds: &[TemplateKind],
    ) -> Result<ProcessingOutcome, PipelineError> {
        let gate = self.gate_for(email_id).await;
        let _guard = gate.lock().await;

        let email = self
            .store
            .get_email(email_id)
            .await?
            .ok_or(PipelineError::EmailNotFound { id: email_id })?;

        for kind in kinds {
            if !kind.is_processing_kind() {
                return Err(PipelineError::UnsupportedKind {
                    kind: kind.to_string(),
                });
            }
        }
        if kinds.is_empty() {
            return Ok(ProcessingOutcome {
                email_id,
                applied: Vec::new(),
                failures: Vec::new(),
            });
        }

        info!(id = email_id, sender = %email.sender, ?kinds, "Processing email");

        let mut applied = Vec::new();
        let mut failures = Vec::new();
        for &kind in kinds {
            match self.run_kind(&email, kind).await {
                Ok(result) => applied.push(result),
                Err(e) => {
                    warn!(id = email_id, kind = %kind, error = %e, "Kind failed");
                    failures.push(KindFailure::from_error(kind, &e));
                }
            }
        }

        let status = if failures.is_empty() {
            ProcessingStatus::Processed
        } else {
            ProcessingStatus::Failed
        };
        self.store
            .update_email(
                email_id,
                EmailUpdate {
                    status: Some(status),
                    last_processed_at: Some(Utc::now()),
                    ..Default::default()
                },
            )
            .await?;

        info!(
            id = email_id,
            applied = applied.len(),
            failed = failures.len(),
            status = %status,
            "Email run complete"
        );

        Ok(ProcessingOutcome {
            email_id,
            applied,
            failures,
        })
    }

    /// Process a batch of emails with bounded parallelism.
    ///
    /// Emails are isolated from each other: a fatal failure on one (unknown
    /// id, store error) lands in `BatchOutcome::failed` and the rest keep
    /// going.
    pub async fn process_many(&self, email_ids: Vec<i64>, kinds: &[TemplateKind]) -> BatchOutcome {
        let count = email_ids.len();
        info!(count, "Processing email batch");

        let results: Vec<(i64, Result<ProcessingOutcome, PipelineError>)> =
            futures::stream::iter(
                email_ids
                    .into_iter()
                    .map(|id| async move { (id, self.process(id, kinds).await) }),
            )
            .buffer_unordered(BATCH_CONCURRENCY)
            .collect()
            .await;

        let mut batch = BatchOutcome::default();
        for (id, result) in results {
            match result {
                Ok(outcome) => batch.outcomes.push(outcome),
                Err(e) => {
                    error!(id, error = %e, "Email failed in batch");
                    batch.failed.push(BatchFailure {
                        email_id: id,
                        error: e.to_string(),
                    });
                }
            }
        }

        info!(
            processed = batch.outcomes.len(),
            failed = batch.failed.len(),
            total = count,
            "Batch complete"
        );
        batch
    }

    /// Run one kind end to end and commit its result.
    async fn run_kind(
        &self,
        email: &Email,
        kind: TemplateKind,
    ) -> Result<AppliedResult, PipelineError> {
        let template = resolve_active_template(self.store.as_ref(), kind).await?;
        let prompt = prompts::render(&template.content, &email_fields(email))?;

        let options = InvokeOptions::for_kind(kind);
        let raw = self.client.invoke(&prompt, &options).await?;

        let shape = ExpectedShape::for_kind(kind).ok_or(PipelineError::UnsupportedKind {
            kind: kind.to_string(),
        })?;
        let parsed = parser::parse(&raw, shape)?;

        if let Some(update) = update_for(&parsed.result) {
            self.store.update_email(email.id, update).await?;
        }

        debug!(id = email.id, kind = %kind, path = ?parsed.path, "Derived field committed");

        Ok(AppliedResult {
            kind,
            result: parsed.result,
            path: parsed.path,
        })
    }

    /// Get (or create) the lock that serializes runs on one email id.
    async fn gate_for(&self, email_id: i64) -> Arc<Mutex<()>> {
        let mut locks = self.locks.lock().await;
        locks.entry(email_id).or_default().clone()
    }
}

// ── Helper functions ────────────────────────────────────────────────

/// Placeholder values every processing template can draw on.
fn email_fields(email: &Email) -> HashMap<String, String> {
    let body = truncate_chars(&email.body, MAX_BODY_CHARS);
    prompts::fields([
        ("sender", email.sender.as_str()),
        ("subject", email.subject.as_str()),
        ("body", body.as_str()),
    ])
}

/// The single-field store update a result commits, plus the run timestamp.
///
/// Replies become drafts elsewhere, never email row fields.
fn update_for(result: &ProcessingResult) -> Option<EmailUpdate> {
    let mut update = EmailUpdate {
        last_processed_at: Some(Utc::now()),
        ..Default::default()
    };
    match result {
        ProcessingResult::Category { category } => update.category = Some(category.clone()),
        ProcessingResult::ActionItems { items } => update.action_items = Some(items.clone()),
        ProcessingResult::Summary { summary } => update.summary = Some(summary.clone()),
        ProcessingResult::Reply { .. } => return None,
    }
    Some(update)
}

/// Truncate to `max_chars`, cutting on a char boundary.
fn truncate_chars(s: &str, max_chars: usize) -> String {
    if s.chars().count() <= max_chars {
        return s.to_string();
    }
    // char_indices gives byte offsets at char boundaries, so the slice is
    // always valid UTF-8.
    let byte_offset = s
        .char_indices()
        .nth(max_chars)
        .map(|(i, _)| i)
        .unwrap_or(s.len());
    format!("{}...", &s[..byte_offset])
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Duration;

    use async_trait::async_trait;
    use rust_decimal::Decimal;

    use crate::error::LlmError;
    use crate::llm::provider::{CompletionRequest, CompletionResponse, FinishReason, LlmProvider};
    use crate::models::{NewEmail, NewTemplate, Priority};
    use crate::parser::ParsePath;
    use crate::pipeline::types::Stage;
    use crate::store::LibSqlStore;

    fn ok_response(content: &str) -> CompletionResponse {
        CompletionResponse {
            content: content.to_string(),
            input_tokens: 10,
            output_tokens: 5,
            finish_reason: FinishReason::Stop,
        }
    }

    /// Answers by looking for template markers in the prompt text.
    struct ScriptedLlm;

    #[async_trait]
    impl LlmProvider for ScriptedLlm {
        fn name(&self) -> &str {
            "scripted"
        }
        fn model_name(&self) -> &str {
            "scripted-1"
        }
        fn cost_per_token(&self) -> (Decimal, Decimal) {
            (Decimal::ZERO, Decimal::ZERO)
        }
        async fn complete(
            &self,
            request: CompletionRequest,
        ) -> Result<CompletionResponse, LlmError> {
            let prompt = request.messages.last().map(|m| m.content.as_str()).unwrap_or("");
            // Wrong-shape JSON: parses as JSON, matches no expected shape
            let content = if prompt.contains("POISON") {
                r#"{"unexpected": true}"#
            } else if prompt.contains("CATEGORIZE") {
                r#"{"category": "Work"}"#
            } else if prompt.contains("ACTIONS") {
                r#"[{"task": "Reply to Dana", "deadline": "2026-03-05", "priority": "high"}]"#
            } else if prompt.contains("SUMMARIZE") {
                r#"{"summary": "Budget sign-off is needed by Thursday."}"#
            } else {
                "unexpected prompt"
            };
            Ok(ok_response(content))
        }
    }

    async fn seed_processing_templates(store: &dyn Store) {
        store
            .upsert_template(NewTemplate::new(
                "categorize",
                TemplateKind::Categorization,
                "CATEGORIZE from {{sender}}: {{subject}}\n{{body}}",
            ))
            .await
            .unwrap();
        store
            .upsert_template(NewTemplate::new(
                "actions",
                TemplateKind::ActionItems,
                "ACTIONS {{body}}",
            ))
            .await
            .unwrap();
        store
            .upsert_template(NewTemplate::new(
                "summarize",
                TemplateKind::Summary,
                "SUMMARIZE {{body}}",
            ))
            .await
            .unwrap();
    }

    async fn test_pipeline(llm: Arc<dyn LlmProvider>) -> (Arc<LibSqlStore>, EmailPipeline) {
        let store = Arc::new(LibSqlStore::new_memory().await.unwrap());
        let client =
            Arc::new(InvocationClient::new(llm).with_backoff_base(Duration::from_millis(1)));
        let pipeline = EmailPipeline::new(store.clone(), client);
        (store, pipeline)
    }

    async fn insert_email(store: &LibSqlStore, body: &str) -> i64 {
        store
            .insert_email(NewEmail::new(
                "dana@example.com",
                "Budget review",
                body,
                Utc::now(),
            ))
            .await
            .unwrap()
            .id
    }

    #[tokio::test]
    async fn process_applies_all_kinds() {
        let (store, pipeline) = test_pipeline(Arc::new(ScriptedLlm)).await;
        seed_processing_templates(store.as_ref()).await;
        let id = insert_email(&store, "Please sign off on the budget.").await;

        let outcome = pipeline
            .process(id, &TemplateKind::processing_kinds())
            .await
            .unwrap();

        assert!(outcome.is_fully_processed());
        assert_eq!(outcome.applied.len(), 3);
        assert!(outcome.applied.iter().all(|a| a.path == ParsePath::Strict));

        let email = store.get_email(id).await.unwrap().unwrap();
        assert_eq!(email.category.as_deref(), Some("Work"));
        let items = email.action_items.unwrap();
        assert_eq!(items[0].task, "Reply to Dana");
        assert_eq!(items[0].priority, Priority::High);
        assert_eq!(
            email.summary.as_deref(),
            Some("Budget sign-off is needed by Thursday.")
        );
        assert_eq!(email.status, ProcessingStatus::Processed);
        assert!(email.last_processed_at.is_some());
    }

    #[tokio::test]
    async fn process_missing_email_fails_fast() {
        let (store, pipeline) = test_pipeline(Arc::new(ScriptedLlm)).await;
        seed_processing_templates(store.as_ref()).await;

        let err = pipeline
            .process(404, &[TemplateKind::Summary])
            .await
            .unwrap_err();
        assert!(matches!(err, PipelineError::EmailNotFound { id: 404 }));
    }

    #[tokio::test]
    async fn process_rejects_non_processing_kinds() {
        let (store, pipeline) = test_pipeline(Arc::new(ScriptedLlm)).await;
        seed_processing_templates(store.as_ref()).await;
        let id = insert_email(&store, "hello").await;

        let err = pipeline
            .process(id, &[TemplateKind::Summary, TemplateKind::Reply])
            .await
            .unwrap_err();
        assert!(matches!(err, PipelineError::UnsupportedKind { .. }));

        // Rejected before any kind ran
        let email = store.get_email(id).await.unwrap().unwrap();
        assert_eq!(email.status, ProcessingStatus::Unprocessed);
        assert!(email.summary.is_none());
    }

    #[tokio::test]
    async fn missing_template_fails_only_that_kind() {
        let (store, pipeline) = test_pipeline(Arc::new(ScriptedLlm)).await;
        // Only categorization is configured
        store
            .upsert_template(NewTemplate::new(
                "categorize",
                TemplateKind::Categorization,
                "CATEGORIZE {{body}}",
            ))
            .await
            .unwrap();
        let id = insert_email(&store, "Please sign off.").await;

        let outcome = pipeline
            .process(id, &TemplateKind::processing_kinds())
            .await
            .unwrap();

        assert_eq!(outcome.applied.len(), 1);
        assert_eq!(outcome.failures.len(), 2);
        assert!(outcome.failures.iter().all(|f| f.stage == Stage::Rendering));

        // The kind that worked still committed
        let email = store.get_email(id).await.unwrap().unwrap();
        assert_eq!(email.category.as_deref(), Some("Work"));
        assert_eq!(email.status, ProcessingStatus::Failed);
    }

    #[tokio::test]
    async fn bad_output_fails_only_that_kind() {
        let (store, pipeline) = test_pipeline(Arc::new(ScriptedLlm)).await;
        seed_processing_templates(store.as_ref()).await;
        // Re-seed the actions template with the marker that makes the
        // scripted model return wrong-shape JSON for that kind only
        store
            .upsert_template(NewTemplate::new(
                "actions",
                TemplateKind::ActionItems,
                "ACTIONS POISON {{body}}",
            ))
            .await
            .unwrap();
        let id = insert_email(&store, "Please sign off.").await;

        let outcome = pipeline
            .process(id, &TemplateKind::processing_kinds())
            .await
            .unwrap();

        assert_eq!(outcome.applied.len(), 2);
        assert_eq!(outcome.failures.len(), 1);
        assert_eq!(outcome.failures[0].kind, TemplateKind::ActionItems);
        assert_eq!(outcome.failures[0].stage, Stage::Parsing);

        let email = store.get_email(id).await.unwrap().unwrap();
        assert_eq!(email.category.as_deref(), Some("Work"));
        assert!(email.action_items.is_none());
        assert!(email.summary.is_some());
        assert_eq!(email.status, ProcessingStatus::Failed);
    }

    #[tokio::test]
    async fn batch_isolates_failures() {
        let (store, pipeline) = test_pipeline(Arc::new(ScriptedLlm)).await;
        seed_processing_templates(store.as_ref()).await;
        let good = insert_email(&store, "Please sign off.").await;
        // POISON in the body reaches the rendered prompt and flips the
        // scripted model to wrong-shape JSON for this email only
        let bad = insert_email(&store, "POISON body").await;

        let batch = pipeline
            .process_many(vec![good, bad, 9999], &[TemplateKind::ActionItems])
            .await;

        assert_eq!(batch.outcomes.len(), 2);
        assert_eq!(batch.failed.len(), 1);
        assert_eq!(batch.failed[0].email_id, 9999);

        let good_outcome = batch
            .outcomes
            .iter()
            .find(|o| o.email_id == good)
            .unwrap();
        assert!(good_outcome.is_fully_processed());
        let bad_outcome = batch.outcomes.iter().find(|o| o.email_id == bad).unwrap();
        assert!(!bad_outcome.is_fully_processed());

        assert_eq!(
            store.get_email(good).await.unwrap().unwrap().status,
            ProcessingStatus::Processed
        );
        assert_eq!(
            store.get_email(bad).await.unwrap().unwrap().status,
            ProcessingStatus::Failed
        );
    }

    /// Flips its category answer after the first call.
    struct FlipCategoryLlm {
        calls: AtomicU32,
    }

    #[async_trait]
    impl LlmProvider for FlipCategoryLlm {
        fn name(&self) -> &str {
            "flip"
        }
        fn model_name(&self) -> &str {
            "flip-1"
        }
        fn cost_per_token(&self) -> (Decimal, Decimal) {
            (Decimal::ZERO, Decimal::ZERO)
        }
        async fn complete(
            &self,
            _request: CompletionRequest,
        ) -> Result<CompletionResponse, LlmError> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst);
            let content = if n == 0 {
                r#"{"category": "Work"}"#
            } else {
                r#"{"category": "Personal"}"#
            };
            Ok(ok_response(content))
        }
    }

    #[tokio::test]
    async fn reprocessing_overwrites_derived_fields() {
        let llm = Arc::new(FlipCategoryLlm {
            calls: AtomicU32::new(0),
        });
        let (store, pipeline) = test_pipeline(llm).await;
        seed_processing_templates(store.as_ref()).await;
        let id = insert_email(&store, "hello").await;

        pipeline
            .process(id, &[TemplateKind::Categorization])
            .await
            .unwrap();
        assert_eq!(
            store.get_email(id).await.unwrap().unwrap().category.as_deref(),
            Some("Work")
        );

        pipeline
            .process(id, &[TemplateKind::Categorization])
            .await
            .unwrap();
        let email = store.get_email(id).await.unwrap().unwrap();
        assert_eq!(email.category.as_deref(), Some("Personal"));
        assert_eq!(email.status, ProcessingStatus::Processed);
    }

    /// Tracks how many completions run at the same time.
    struct GateProbeLlm {
        active: AtomicU32,
        max_seen: AtomicU32,
    }

    #[async_trait]
    impl LlmProvider for GateProbeLlm {
        fn name(&self) -> &str {
            "probe"
        }
        fn model_name(&self) -> &str {
            "probe-1"
        }
        fn cost_per_token(&self) -> (Decimal, Decimal) {
            (Decimal::ZERO, Decimal::ZERO)
        }
        async fn complete(
            &self,
            _request: CompletionRequest,
        ) -> Result<CompletionResponse, LlmError> {
            let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_seen.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(10)).await;
            self.active.fetch_sub(1, Ordering::SeqCst);
            Ok(ok_response(r#"{"summary": "ok"}"#))
        }
    }

    #[tokio::test]
    async fn same_email_runs_are_serialized() {
        let llm = Arc::new(GateProbeLlm {
            active: AtomicU32::new(0),
            max_seen: AtomicU32::new(0),
        });
        let (store, pipeline) = test_pipeline(llm.clone()).await;
        seed_processing_templates(store.as_ref()).await;
        let id = insert_email(&store, "hello").await;

        let (a, b) = tokio::join!(
            pipeline.process(id, &[TemplateKind::Summary]),
            pipeline.process(id, &[TemplateKind::Summary]),
        );
        a.unwrap();
        b.unwrap();

        assert_eq!(llm.max_seen.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn truncate_chars_respects_char_boundaries() {
        assert_eq!(truncate_chars("hello", 10), "hello");
        assert_eq!(truncate_chars("hello world", 5), "hello...");
        // Multibyte chars never split
        assert_eq!(truncate_chars("héllo wörld", 6), "héllo ...");
        assert_eq!(truncate_chars("日本語のテキスト", 3), "日本語...");
    }
}
