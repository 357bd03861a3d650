//! Seed data: the default prompt templates and a sample inbox.
//!
//! The engine embeds no template text of its own. Everything here is plain
//! data written through the store, editable afterwards like any other row.

use chrono::{Duration, Utc};
use tracing::info;

use crate::error::DatabaseError;
use crate::models::{NewEmail, NewTemplate, TemplateKind};
use crate::store::Store;

const CATEGORIZATION_PROMPT: &str = "\
You are an email triage assistant. Categorize the email below into exactly
one of these categories: Work, Personal, Marketing, Urgent, Important,
Newsletter, Trash.

From: {{sender}}
Subject: {{subject}}

{{body}}

Respond with JSON only: {\"category\": \"<one of the categories>\"}";

const ACTION_ITEMS_PROMPT: &str = "\
Extract every actionable task from the email below.

From: {{sender}}
Subject: {{subject}}

{{body}}

Respond with a JSON array only. Each element is
{\"task\": \"...\", \"deadline\": \"... or null\", \"priority\": \"low|medium|high\"}.
Use [] when there is nothing to do.";

const SUMMARY_PROMPT: &str = "\
Summarize the email below in at most two sentences.

From: {{sender}}
Subject: {{subject}}

{{body}}

Respond with JSON only: {\"summary\": \"...\"}";

const REPLY_PROMPT: &str = "\
Write a professional, concise reply to the email below. Keep it under 150
words.

From: {{sender}}
Subject: {{subject}}

{{body}}

Extra guidance from the user (may be empty): {{context}}

Respond with JSON only: {\"subject\": \"...\", \"body\": \"...\"}";

const CHAT_PROMPT: &str = "\
You are an email assistant answering questions about the user's inbox.

Inbox context:
{{context}}

Question: {{question}}

Answer concisely, using only the context above. If the user asks you to
draft or compose an email, respond with JSON only:
{\"subject\": \"...\", \"body\": \"...\"}. Otherwise answer in plain text.";

const COMPOSE_PROMPT: &str = "\
Write a new email following the instruction below.

Instruction: {{instruction}}
Extra guidance (may be empty): {{context}}

Respond with JSON only: {\"subject\": \"...\", \"body\": \"...\"}";

/// The default template set: one per kind plus the named `compose` template.
pub fn default_templates() -> Vec<NewTemplate> {
    vec![
        NewTemplate::new(
            "categorization",
            TemplateKind::Categorization,
            CATEGORIZATION_PROMPT,
        )
        .with_description("Assign one category label to an email"),
        NewTemplate::new("action_items", TemplateKind::ActionItems, ACTION_ITEMS_PROMPT)
            .with_description("Extract actionable tasks from an email"),
        NewTemplate::new("summary", TemplateKind::Summary, SUMMARY_PROMPT)
            .with_description("Summarize an email in a sentence or two"),
        NewTemplate::new("reply", TemplateKind::Reply, REPLY_PROMPT)
            .with_description("Draft a reply to an email"),
        NewTemplate::new("chat", TemplateKind::Chat, CHAT_PROMPT)
            .with_description("Answer questions about the inbox"),
        NewTemplate::new("compose", TemplateKind::Custom, COMPOSE_PROMPT)
            .with_description("Write a new email from an instruction"),
    ]
}

/// Upsert the full default set, replacing any edits. Returns the count.
pub async fn load_default_templates(store: &dyn Store) -> Result<usize, DatabaseError> {
    let templates = default_templates();
    let count = templates.len();
    for template in templates {
        store.upsert_template(template).await?;
    }
    info!(count, "Default templates loaded");
    Ok(count)
}

/// Insert whichever defaults are missing, leaving existing rows untouched.
/// Returns how many were inserted.
pub async fn ensure_default_templates(store: &dyn Store) -> Result<usize, DatabaseError> {
    let mut inserted = 0;
    for template in default_templates() {
        if store.get_template(&template.name).await?.is_none() {
            store.upsert_template(template).await?;
            inserted += 1;
        }
    }
    if inserted > 0 {
        info!(inserted, "Missing default templates seeded");
    }
    Ok(inserted)
}

/// The built-in sample inbox, newest first once stored.
pub fn sample_emails() -> Vec<NewEmail> {
    let now = Utc::now();
    vec![
        NewEmail::new(
            "sarah.chen@acmecorp.com",
            "Q3 planning meeting, agenda needed",
            "Hi,\n\nWe're locking the Q3 planning meeting for next Tuesday at 10am. \
             Could you review the attached deck and send me your agenda items by \
             Thursday? Also let me know if the budget numbers from finance look \
             right to you.\n\nThanks,\nSarah",
            now - Duration::hours(1),
        ),
        NewEmail::new(
            "alerts@monitoring.acmecorp.com",
            "Disk usage above 90% on db-prod-2",
            "Automated alert: /var/lib/data on db-prod-2 reached 92% capacity at \
             03:14 UTC. Growth rate suggests the volume will be full within 48 \
             hours. Acknowledge this alert and schedule cleanup or expansion.",
            now - Duration::hours(3),
        ),
        NewEmail::new(
            "mike.torres@gmail.com",
            "Lunch on Friday?",
            "Hey! It's been a while. Want to grab lunch this Friday? There's a new \
             ramen place near the office that I've been meaning to try. Let me \
             know what time works.\n\nMike",
            now - Duration::hours(8),
        ),
        NewEmail::new(
            "digest@rustweekly.dev",
            "This week in systems programming",
            "Welcome to this week's digest. In this issue: profiling allocator \
             churn in long-running services, a deep dive on io_uring backends, \
             and five crates worth watching. Read the full issue on our site. \
             You are receiving this because you subscribed to the weekly digest.",
            now - Duration::hours(26),
        ),
        NewEmail::new(
            "deals@cloudmart.io",
            "Last chance: 40% off annual plans",
            "Our biggest sale of the year ends tonight! Upgrade to an annual plan \
             and save 40%. Offer valid until midnight. Click here to claim your \
             discount before it expires. Unsubscribe at any time.",
            now - Duration::hours(50),
        ),
    ]
}
