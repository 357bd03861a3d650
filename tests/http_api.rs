//! Integration tests for the REST API.
//!
//! Each test spins up an Axum server on a random port with an in-memory
//! store and a scripted LLM stub, then exercises the real HTTP contract
//! with reqwest.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use rust_decimal::Decimal;
use serde_json::{Value, json};
use tokio::net::TcpListener;
use tokio::time::timeout;

use inbox_pilot::agent::ChatResolver;
use inbox_pilot::error::LlmError;
use inbox_pilot::llm::provider::{
    CompletionRequest, CompletionResponse, FinishReason, LlmProvider,
};
use inbox_pilot::llm::InvocationClient;
use inbox_pilot::pipeline::EmailPipeline;
use inbox_pilot::server::{AppState, api_router};
use inbox_pilot::store::{LibSqlStore, Store};

/// Maximum time any test is allowed to run before we consider it hung.
const TEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Scripted LLM stub keyed on marker phrases from the default templates.
struct StubLlm;

fn scripted_completion(prompt: &str) -> String {
    if prompt.contains("Categorize the email below") {
        r#"{"category": "Work"}"#.to_string()
    } else if prompt.contains("actionable task") {
        r#"[{"task": "Send agenda items", "deadline": "Thursday", "priority": "high"}]"#
            .to_string()
    } else if prompt.contains("Summarize the email") {
        r#"{"summary": "Planning meeting on Tuesday; agenda items due Thursday."}"#.to_string()
    } else if prompt.contains("questions about the user's inbox") {
        // Chat template: the question line decides between draft JSON and prose
        let question = prompt
            .lines()
            .find_map(|line| line.strip_prefix("Question: "))
            .unwrap_or("");
        if question.to_lowercase().contains("draft") {
            r#"{"subject": "Declining the meeting", "body": "I have to decline, sorry."}"#
                .to_string()
        } else {
            "The disk alert looks most urgent.".to_string()
        }
    } else if prompt.contains("concise reply") || prompt.contains("following the instruction") {
        r#"{"subject": "Re: test", "body": "Sounds good, I will be there."}"#.to_string()
    } else {
        "ok".to_string()
    }
}

#[async_trait]
impl LlmProvider for StubLlm {
    fn name(&self) -> &str {
        "stub"
    }
    fn model_name(&self) -> &str {
        "stub-1"
    }
    fn cost_per_token(&self) -> (Decimal, Decimal) {
        (Decimal::ZERO, Decimal::ZERO)
    }
    async fn complete(&self, request: CompletionRequest) -> Result<CompletionResponse, LlmError> {
        let prompt = request
            .messages
            .last()
            .map(|m| m.content.clone())
            .unwrap_or_default();
        Ok(CompletionResponse {
            content: scripted_completion(&prompt),
            input_tokens: 10,
            output_tokens: 5,
            finish_reason: FinishReason::Stop,
        })
    }
}

/// Start a server on a random port. Returns its base URL.
async fn start_server() -> String {
    let store: Arc<dyn Store> = Arc::new(LibSqlStore::new_memory().await.unwrap());
    let llm: Arc<dyn LlmProvider> = Arc::new(StubLlm);
    let client = Arc::new(
        InvocationClient::new(llm).with_backoff_base(Duration::from_millis(1)),
    );
    let pipeline = Arc::new(EmailPipeline::new(Arc::clone(&store), Arc::clone(&client)));
    let resolver = Arc::new(ChatResolver::new(Arc::clone(&store), client));
    let app = api_router(AppState {
        store,
        pipeline,
        resolver,
    });

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    // Give the server a moment to start accepting connections.
    tokio::time::sleep(Duration::from_millis(50)).await;

    format!("http://127.0.0.1:{port}")
}

async fn get_json(client: &reqwest::Client, url: &str) -> (u16, Value) {
    let resp = client.get(url).send().await.unwrap();
    let status = resp.status().as_u16();
    (status, resp.json().await.unwrap())
}

async fn post_json(client: &reqwest::Client, url: &str, body: &Value) -> (u16, Value) {
    let resp = client.post(url).json(body).send().await.unwrap();
    let status = resp.status().as_u16();
    (status, resp.json().await.unwrap())
}

/// POST with no body at all (exercises the optional-body handlers).
async fn post_empty(client: &reqwest::Client, url: &str) -> (u16, Value) {
    let resp = client.post(url).send().await.unwrap();
    let status = resp.status().as_u16();
    (status, resp.json().await.unwrap())
}

// ── Health ──────────────────────────────────────────────────────────

#[tokio::test]
async fn health_responds() {
    timeout(TEST_TIMEOUT, async {
        let base = start_server().await;
        let client = reqwest::Client::new();

        let (status, body) = get_json(&client, &format!("{base}/health")).await;
        assert_eq!(status, 200);
        assert_eq!(body["status"], "ok");
        assert_eq!(body["service"], "inbox-pilot");
    })
    .await
    .unwrap();
}

// ── Emails ──────────────────────────────────────────────────────────

#[tokio::test]
async fn mock_inbox_loads_and_reads_back() {
    timeout(TEST_TIMEOUT, async {
        let base = start_server().await;
        let client = reqwest::Client::new();

        let (status, body) = post_empty(&client, &format!("{base}/emails/load-mock")).await;
        assert_eq!(status, 200);
        assert_eq!(body["status"], "success");
        let loaded = body["loaded"].as_u64().unwrap();
        assert!(loaded >= 5);

        // Newest first
        let (status, emails) = get_json(&client, &format!("{base}/emails")).await;
        assert_eq!(status, 200);
        let emails = emails.as_array().unwrap().clone();
        assert_eq!(emails.len() as u64, loaded);
        assert_eq!(emails[0]["subject"], "Q3 planning meeting, agenda needed");
        assert_eq!(emails[0]["status"], "unprocessed");

        let id = emails[0]["id"].as_i64().unwrap();
        let (status, email) = get_json(&client, &format!("{base}/emails/{id}")).await;
        assert_eq!(status, 200);
        assert_eq!(email["subject"], emails[0]["subject"]);

        let (status, body) = get_json(&client, &format!("{base}/emails/999999")).await;
        assert_eq!(status, 404);
        assert!(body["error"].as_str().unwrap().contains("not found"));

        let resp = client
            .delete(format!("{base}/emails"))
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status().as_u16(), 200);
        let body: Value = resp.json().await.unwrap();
        assert_eq!(body["deleted"].as_u64().unwrap(), loaded);

        let (_, emails) = get_json(&client, &format!("{base}/emails")).await;
        assert!(emails.as_array().unwrap().is_empty());
    })
    .await
    .unwrap();
}

#[tokio::test]
async fn custom_mock_payload_is_ingested() {
    timeout(TEST_TIMEOUT, async {
        let base = start_server().await;
        let client = reqwest::Client::new();

        let payload = json!([
            {"sender": "pat@example.com", "subject": "Custom email", "body": "Hand-made."}
        ]);
        let (status, body) =
            post_json(&client, &format!("{base}/emails/load-mock"), &payload).await;
        assert_eq!(status, 200);
        assert_eq!(body["loaded"], 1);
        assert_eq!(body["emails"][0]["subject"], "Custom email");

        let (_, emails) = get_json(&client, &format!("{base}/emails")).await;
        assert_eq!(emails.as_array().unwrap().len(), 1);
    })
    .await
    .unwrap();
}

// ── Processing ──────────────────────────────────────────────────────

#[tokio::test]
async fn process_applies_every_kind_via_http() {
    timeout(TEST_TIMEOUT, async {
        let base = start_server().await;
        let client = reqwest::Client::new();

        post_empty(&client, &format!("{base}/prompts/load-defaults")).await;
        post_empty(&client, &format!("{base}/emails/load-mock")).await;

        let (status, outcome) =
            post_json(&client, &format!("{base}/emails/process"), &json!({})).await;
        assert_eq!(status, 200);
        let outcomes = outcome["outcomes"].as_array().unwrap();
        assert_eq!(outcomes.len(), 5);
        assert!(outcome["failed"].as_array().unwrap().is_empty());
        for item in outcomes {
            assert_eq!(item["applied"].as_array().unwrap().len(), 3);
            assert!(item["failures"].as_array().unwrap().is_empty());
        }

        let (_, emails) = get_json(&client, &format!("{base}/emails")).await;
        for email in emails.as_array().unwrap() {
            assert_eq!(email["status"], "processed");
            assert_eq!(email["category"], "Work");
            assert_eq!(email["action_items"][0]["task"], "Send agenda items");
            assert!(email["summary"].as_str().unwrap().contains("Planning meeting"));
            assert!(email["last_processed_at"].is_string());
        }
    })
    .await
    .unwrap();
}

#[tokio::test]
async fn process_reports_unknown_ids_per_item() {
    timeout(TEST_TIMEOUT, async {
        let base = start_server().await;
        let client = reqwest::Client::new();

        post_empty(&client, &format!("{base}/prompts/load-defaults")).await;

        let (status, outcome) = post_json(
            &client,
            &format!("{base}/emails/process"),
            &json!({"email_ids": [424242]}),
        )
        .await;
        assert_eq!(status, 200);
        assert!(outcome["outcomes"].as_array().unwrap().is_empty());
        let failed = outcome["failed"].as_array().unwrap();
        assert_eq!(failed.len(), 1);
        assert_eq!(failed[0]["email_id"], 424242);
    })
    .await
    .unwrap();
}

#[tokio::test]
async fn process_without_templates_reports_kind_failures() {
    timeout(TEST_TIMEOUT, async {
        let base = start_server().await;
        let client = reqwest::Client::new();

        post_empty(&client, &format!("{base}/emails/load-mock")).await;
        let (status, outcome) = post_json(
            &client,
            &format!("{base}/emails/process"),
            &json!({"kinds": ["summary"]}),
        )
        .await;
        assert_eq!(status, 200);

        let outcomes = outcome["outcomes"].as_array().unwrap();
        assert_eq!(outcomes.len(), 5);
        for item in outcomes {
            let failures = item["failures"].as_array().unwrap();
            assert_eq!(failures.len(), 1);
            assert_eq!(failures[0]["kind"], "summary");
            assert_eq!(failures[0]["stage"], "rendering");
            assert!(failures[0]["error"].as_str().unwrap().contains("No active template"));
        }

        let (_, emails) = get_json(&client, &format!("{base}/emails")).await;
        for email in emails.as_array().unwrap() {
            assert_eq!(email["status"], "failed");
        }
    })
    .await
    .unwrap();
}

// ── Prompt templates ────────────────────────────────────────────────

#[tokio::test]
async fn prompt_endpoints_round_trip() {
    timeout(TEST_TIMEOUT, async {
        let base = start_server().await;
        let client = reqwest::Client::new();

        let (status, body) = get_json(&client, &format!("{base}/prompts/summary")).await;
        assert_eq!(status, 404);
        assert!(body["error"].is_string());

        let (status, stored) = post_json(
            &client,
            &format!("{base}/prompts"),
            &json!({
                "name": "summary",
                "kind": "summary",
                "content": "My summary prompt: {{body}}",
                "description": "hand-written"
            }),
        )
        .await;
        assert_eq!(status, 200);
        assert!(stored["id"].as_i64().unwrap() > 0);
        assert_eq!(stored["active"], true);

        let (status, fetched) = get_json(&client, &format!("{base}/prompts/summary")).await;
        assert_eq!(status, 200);
        assert_eq!(fetched["content"], "My summary prompt: {{body}}");

        // Defaults overwrite the edit and fill in the rest of the set
        let (status, body) =
            post_empty(&client, &format!("{base}/prompts/load-defaults")).await;
        assert_eq!(status, 200);
        assert_eq!(body["loaded"], 6);

        let (_, prompts) = get_json(&client, &format!("{base}/prompts")).await;
        let names: Vec<&str> = prompts
            .as_array()
            .unwrap()
            .iter()
            .map(|p| p["name"].as_str().unwrap())
            .collect();
        assert_eq!(
            names,
            vec!["action_items", "categorization", "chat", "compose", "reply", "summary"]
        );
    })
    .await
    .unwrap();
}

// ── Drafts ──────────────────────────────────────────────────────────

#[tokio::test]
async fn draft_endpoints_round_trip() {
    timeout(TEST_TIMEOUT, async {
        let base = start_server().await;
        let client = reqwest::Client::new();

        let (status, draft) = post_json(
            &client,
            &format!("{base}/drafts"),
            &json!({
                "subject": "Meeting notes",
                "body": "Here are the notes.",
                "metadata": {"type": "manual"}
            }),
        )
        .await;
        assert_eq!(status, 200);
        let id = draft["id"].as_i64().unwrap();
        assert_eq!(draft["status"], "draft");
        assert_eq!(draft["metadata"]["type"], "manual");

        let (status, fetched) = get_json(&client, &format!("{base}/drafts/{id}")).await;
        assert_eq!(status, 200);
        assert_eq!(fetched["subject"], "Meeting notes");

        let (_, drafts) = get_json(&client, &format!("{base}/drafts")).await;
        assert_eq!(drafts.as_array().unwrap().len(), 1);

        let resp = client
            .delete(format!("{base}/drafts/{id}"))
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status().as_u16(), 200);

        let (status, _) = get_json(&client, &format!("{base}/drafts/{id}")).await;
        assert_eq!(status, 404);

        let resp = client
            .delete(format!("{base}/drafts/{id}"))
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status().as_u16(), 404);
    })
    .await
    .unwrap();
}

// ── Agent ───────────────────────────────────────────────────────────

#[tokio::test]
async fn chat_answers_and_records_history() {
    timeout(TEST_TIMEOUT, async {
        let base = start_server().await;
        let client = reqwest::Client::new();

        post_empty(&client, &format!("{base}/prompts/load-defaults")).await;
        post_empty(&client, &format!("{base}/emails/load-mock")).await;

        let (status, answer) = post_json(
            &client,
            &format!("{base}/agent/chat"),
            &json!({"question": "Which email is most urgent?"}),
        )
        .await;
        assert_eq!(status, 200);
        assert_eq!(answer["answer"], "The disk alert looks most urgent.");
        assert!(answer.get("draft").is_none());

        let (status, history) =
            get_json(&client, &format!("{base}/agent/chat/history")).await;
        assert_eq!(status, 200);
        let history = history.as_array().unwrap().clone();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0]["question"], "Which email is most urgent?");
        assert_eq!(history[0]["scope"], "all");
    })
    .await
    .unwrap();
}

#[tokio::test]
async fn chat_draft_request_persists_a_draft() {
    timeout(TEST_TIMEOUT, async {
        let base = start_server().await;
        let client = reqwest::Client::new();

        post_empty(&client, &format!("{base}/prompts/load-defaults")).await;
        post_empty(&client, &format!("{base}/emails/load-mock")).await;
        let (_, emails) = get_json(&client, &format!("{base}/emails")).await;
        let email_id = emails[0]["id"].as_i64().unwrap();

        let (status, answer) = post_json(
            &client,
            &format!("{base}/agent/chat"),
            &json!({
                "question": "Draft a reply declining this meeting",
                "email_id": email_id
            }),
        )
        .await;
        assert_eq!(status, 200);
        let draft = &answer["draft"];
        assert_eq!(draft["subject"], "Declining the meeting");
        assert_eq!(draft["source_email_id"], email_id);
        assert_eq!(draft["metadata"]["type"], "chat");

        let (_, drafts) = get_json(&client, &format!("{base}/drafts")).await;
        assert_eq!(drafts.as_array().unwrap().len(), 1);

        let (_, history) = get_json(&client, &format!("{base}/agent/chat/history")).await;
        assert_eq!(history[0]["draft_id"], draft["id"]);
    })
    .await
    .unwrap();
}

#[tokio::test]
async fn draft_reply_endpoint_creates_a_draft() {
    timeout(TEST_TIMEOUT, async {
        let base = start_server().await;
        let client = reqwest::Client::new();

        post_empty(&client, &format!("{base}/emails/load-mock")).await;
        let (_, emails) = get_json(&client, &format!("{base}/emails")).await;
        let email_id = emails[0]["id"].as_i64().unwrap();

        // No reply template yet: configuration error, not a crash
        let (status, body) =
            post_empty(&client, &format!("{base}/agent/draft-reply/{email_id}")).await;
        assert_eq!(status, 422);
        assert!(body["error"].as_str().unwrap().contains("No active template"));

        post_empty(&client, &format!("{base}/prompts/load-defaults")).await;

        let (status, draft) = post_json(
            &client,
            &format!("{base}/agent/draft-reply/{email_id}"),
            &json!({"context": "keep it short"}),
        )
        .await;
        assert_eq!(status, 200);
        assert_eq!(draft["subject"], "Re: test");
        assert_eq!(draft["body"], "Sounds good, I will be there.");
        assert_eq!(draft["source_email_id"], email_id);
        assert_eq!(draft["metadata"]["type"], "reply");
        assert_eq!(draft["metadata"]["original_email_id"], email_id);

        let (status, _) =
            post_empty(&client, &format!("{base}/agent/draft-reply/999999")).await;
        assert_eq!(status, 404);
    })
    .await
    .unwrap();
}

#[tokio::test]
async fn generate_email_endpoint_creates_a_draft() {
    timeout(TEST_TIMEOUT, async {
        let base = start_server().await;
        let client = reqwest::Client::new();

        // Without the compose template the request is rejected as config
        let (status, _) = post_json(
            &client,
            &format!("{base}/agent/generate-email"),
            &json!({"instruction": "introduce the team"}),
        )
        .await;
        assert_eq!(status, 422);

        post_empty(&client, &format!("{base}/prompts/load-defaults")).await;

        let (status, draft) = post_json(
            &client,
            &format!("{base}/agent/generate-email"),
            &json!({"instruction": "introduce the team"}),
        )
        .await;
        assert_eq!(status, 200);
        assert_eq!(draft["subject"], "Re: test");
        assert_eq!(draft["metadata"]["type"], "new");
        assert_eq!(draft["metadata"]["instruction"], "introduce the team");
        assert!(draft["source_email_id"].is_null());
    })
    .await
    .unwrap();
}
