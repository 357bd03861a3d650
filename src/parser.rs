//! Structured output parsing for model responses.
//!
//! Models return clean JSON, fenced JSON, JSON buried in prose, or plain
//! text. Parsing is total: every input string lands in a typed result or a
//! `ParseError` carrying the raw text. Tiers, tried in order:
//!
//! 1. Strict — the trimmed text is exactly the expected JSON shape.
//! 2. Extracted — the first balanced `{...}` or `[...]` span parses to the
//!    expected shape. Brackets inside string literals don't count.
//! 3. Recovered — a shape-specific heuristic over the raw text.

use serde::{Deserialize, Serialize};

use crate::error::{ParseError, ParseErrorKind};
use crate::models::{ActionItem, Priority, ProcessingResult, TemplateKind};

/// Category labels the recovery tier scans for, in canonical form.
pub const KNOWN_CATEGORIES: &[&str] = &[
    "Work",
    "Personal",
    "Marketing",
    "Urgent",
    "Important",
    "Newsletter",
    "Trash",
];

/// Which structured shape the caller expects back.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExpectedShape {
    Category,
    ActionItems,
    Summary,
    Reply,
}

impl ExpectedShape {
    /// The shape a template kind's output parses into, if it has one.
    pub fn for_kind(kind: TemplateKind) -> Option<Self> {
        match kind {
            TemplateKind::Categorization => Some(Self::Category),
            TemplateKind::ActionItems => Some(Self::ActionItems),
            TemplateKind::Summary => Some(Self::Summary),
            TemplateKind::Reply => Some(Self::Reply),
            TemplateKind::Chat | TemplateKind::Custom => None,
        }
    }
}

/// How far down the tier ladder the parse had to go.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ParsePath {
    Strict,
    Extracted,
    Recovered,
}

/// A successful parse and the tier that produced it.
#[derive(Debug, Clone, PartialEq)]
pub struct Parsed {
    pub result: ProcessingResult,
    pub path: ParsePath,
}

/// Parse model output into the expected shape.
///
/// Never panics. Line-based action-item recovery is skipped when the text is
/// itself valid JSON of the wrong shape: splitting a JSON document into
/// per-line "tasks" would store garbage, so that case fails typed instead.
pub fn parse(raw: &str, shape: ExpectedShape) -> Result<Parsed, ParseError> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(ParseError::new(ParseErrorKind::Empty, raw));
    }

    let mut saw_json = false;

    // Strict: the whole text is one JSON document.
    if let Ok(value) = serde_json::from_str::<serde_json::Value>(trimmed) {
        saw_json = true;
        if let Some(result) = result_from_value(&value, shape) {
            return Ok(Parsed {
                result,
                path: ParsePath::Strict,
            });
        }
    }

    // Extracted: first balanced span (covers markdown fences and prose
    // wrapping in one pass).
    if !saw_json
        && let Some(span) = balanced_json_span(trimmed)
        && let Ok(value) = serde_json::from_str::<serde_json::Value>(span)
    {
        saw_json = true;
        if let Some(result) = result_from_value(&value, shape) {
            return Ok(Parsed {
                result,
                path: ParsePath::Extracted,
            });
        }
    }

    // Recovered: shape-specific heuristics.
    let recovered = match shape {
        ExpectedShape::Category => recover_category(trimmed),
        ExpectedShape::ActionItems if !saw_json => recover_action_items(trimmed),
        ExpectedShape::ActionItems => None,
        ExpectedShape::Summary => Some(ProcessingResult::Summary {
            summary: trimmed.to_string(),
        }),
        ExpectedShape::Reply => Some(ProcessingResult::Reply {
            subject: String::new(),
            body: trimmed.to_string(),
        }),
    };
    if let Some(result) = recovered {
        return Ok(Parsed {
            result,
            path: ParsePath::Recovered,
        });
    }

    let kind = if saw_json {
        ParseErrorKind::InvalidShape
    } else {
        ParseErrorKind::Unparseable
    };
    Err(ParseError::new(kind, raw))
}

// ── Shape matching ──────────────────────────────────────────────────

/// Interpret a JSON value as the expected shape. Values are kept verbatim
/// here; only the recovery tier canonicalizes.
fn result_from_value(value: &serde_json::Value, shape: ExpectedShape) -> Option<ProcessingResult> {
    use serde_json::Value;

    match shape {
        ExpectedShape::Category => {
            let label = match value {
                Value::String(s) => s.as_str(),
                Value::Object(map) => map.get("category")?.as_str()?,
                _ => return None,
            };
            let label = label.trim();
            if label.is_empty() {
                return None;
            }
            Some(ProcessingResult::Category {
                category: label.to_string(),
            })
        }
        ExpectedShape::ActionItems => {
            let array = match value {
                Value::Array(_) => value.clone(),
                Value::Object(map) => map
                    .get("action_items")
                    .or_else(|| map.get("items"))
                    .or_else(|| map.get("tasks"))?
                    .clone(),
                _ => return None,
            };
            let raw_items: Vec<RawItem> = serde_json::from_value(array).ok()?;
            let items: Vec<ActionItem> = raw_items.into_iter().filter_map(RawItem::normalize).collect();
            Some(ProcessingResult::ActionItems { items })
        }
        ExpectedShape::Summary => {
            let text = match value {
                Value::String(s) => s.as_str(),
                Value::Object(map) => map.get("summary")?.as_str()?,
                _ => return None,
            };
            let text = text.trim();
            if text.is_empty() {
                return None;
            }
            Some(ProcessingResult::Summary {
                summary: text.to_string(),
            })
        }
        ExpectedShape::Reply => match value {
            Value::String(s) => {
                let body = s.trim();
                if body.is_empty() {
                    return None;
                }
                Some(ProcessingResult::Reply {
                    subject: String::new(),
                    body: body.to_string(),
                })
            }
            Value::Object(map) => {
                let body = map
                    .get("body")
                    .or_else(|| map.get("reply"))?
                    .as_str()?
                    .trim();
                if body.is_empty() {
                    return None;
                }
                let subject = map
                    .get("subject")
                    .and_then(Value::as_str)
                    .unwrap_or("")
                    .trim()
                    .to_string();
                Some(ProcessingResult::Reply {
                    subject,
                    body: body.to_string(),
                })
            }
            _ => None,
        },
    }
}

/// One action item as models actually emit it: a bare string, or an object
/// with loosely-typed fields.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum RawItem {
    Text(String),
    Structured {
        #[serde(alias = "text", alias = "item")]
        task: String,
        #[serde(default)]
        deadline: Option<String>,
        #[serde(default)]
        priority: Option<String>,
    },
}

impl RawItem {
    fn normalize(self) -> Option<ActionItem> {
        match self {
            RawItem::Text(s) => {
                let s = s.trim();
                if s.is_empty() { None } else { Some(ActionItem::new(s)) }
            }
            RawItem::Structured {
                task,
                deadline,
                priority,
            } => {
                let task = task.trim().to_string();
                if task.is_empty() {
                    return None;
                }
                let deadline = deadline
                    .map(|d| d.trim().to_string())
                    .filter(|d| !d.is_empty());
                let priority = priority
                    .map(|p| match p.trim().to_lowercase().as_str() {
                        "low" => Priority::Low,
                        "high" | "urgent" => Priority::High,
                        _ => Priority::Medium,
                    })
                    .unwrap_or_default();
                Some(ActionItem {
                    task,
                    deadline,
                    priority,
                })
            }
        }
    }
}

// ── Span extraction ─────────────────────────────────────────────────

/// First balanced `{...}` or `[...]` span in `text`.
///
/// Walks a bracket stack, skipping anything inside JSON string literals
/// (including escaped quotes). Returns `None` on unbalanced or mismatched
/// nesting. Indexing is byte-based; brackets and quotes are ASCII, so every
/// boundary is a char boundary.
fn balanced_json_span(text: &str) -> Option<&str> {
    let start = text.find(['{', '['])?;
    let mut stack: Vec<u8> = Vec::new();
    let mut in_string = false;
    let mut escaped = false;

    for (i, &b) in text.as_bytes().iter().enumerate().skip(start) {
        if in_string {
            if escaped {
                escaped = false;
            } else if b == b'\\' {
                escaped = true;
            } else if b == b'"' {
                in_string = false;
            }
            continue;
        }
        match b {
            b'"' => in_string = true,
            b'{' => stack.push(b'}'),
            b'[' => stack.push(b']'),
            b'}' | b']' => match stack.pop() {
                Some(expected) if expected == b => {
                    if stack.is_empty() {
                        return Some(&text[start..=i]);
                    }
                }
                _ => return None,
            },
            _ => {}
        }
    }
    None
}

// ── Recovery ────────────────────────────────────────────────────────

/// Earliest case-insensitive occurrence of a known label wins; the canonical
/// capitalization is returned.
fn recover_category(raw: &str) -> Option<ProcessingResult> {
    let lower = raw.to_lowercase();
    let mut best: Option<(usize, &str)> = None;
    for label in KNOWN_CATEGORIES {
        if let Some(pos) = lower.find(&label.to_lowercase()) {
            let better = match best {
                None => true,
                Some((best_pos, _)) => pos < best_pos,
            };
            if better {
                best = Some((pos, label));
            }
        }
    }
    best.map(|(_, label)| ProcessingResult::Category {
        category: label.to_string(),
    })
}

/// One item per non-empty line, leading bullets and numbering stripped.
fn recover_action_items(raw: &str) -> Option<ProcessingResult> {
    let items: Vec<ActionItem> = raw
        .lines()
        .map(strip_bullet)
        .filter(|line| !line.is_empty())
        .map(ActionItem::new)
        .collect();
    if items.is_empty() {
        None
    } else {
        Some(ProcessingResult::ActionItems { items })
    }
}

fn strip_bullet(line: &str) -> &str {
    let line = line.trim();
    let rest = line
        .strip_prefix(['-', '*', '•'])
        .or_else(|| {
            let digits = line.chars().take_while(|c| c.is_ascii_digit()).count();
            if digits > 0 {
                line[digits..].strip_prefix(['.', ')'])
            } else {
                None
            }
        })
        .unwrap_or(line);
    rest.trim()
}
