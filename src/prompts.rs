//! Prompt template rendering.
//!
//! Templates carry `{{placeholder}}` slots filled from a field map at render
//! time. Single braces pass through untouched, so template text can include
//! literal JSON examples for the model.

use std::collections::HashMap;
use std::sync::LazyLock;

use regex::Regex;

use crate::error::RenderError;

/// `{{name}}`, with optional whitespace inside the braces.
static PLACEHOLDER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\{\{\s*([A-Za-z0-9_]+)\s*\}\}").unwrap());

/// Substitute every `{{placeholder}}` in `template` from `fields`.
///
/// A placeholder with no entry in `fields` is `MissingPlaceholder`; an entry
/// holding an empty string is a legal substitution. `EmptyTemplate` when the
/// rendered text trims to nothing.
pub fn render(template: &str, fields: &HashMap<String, String>) -> Result<String, RenderError> {
    let mut missing: Option<String> = None;
    let rendered = PLACEHOLDER.replace_all(template, |caps: &regex::Captures<'_>| {
        let name = &caps[1];
        match fields.get(name) {
            Some(value) => value.clone(),
            None => {
                if missing.is_none() {
                    missing = Some(name.to_string());
                }
                String::new()
            }
        }
    });
    if let Some(name) = missing {
        return Err(RenderError::MissingPlaceholder { name });
    }
    if rendered.trim().is_empty() {
        return Err(RenderError::EmptyTemplate);
    }
    Ok(rendered.into_owned())
}

/// Placeholder names referenced by `template`, in first-use order, deduplicated.
pub fn placeholders(template: &str) -> Vec<String> {
    let mut seen = Vec::new();
    for caps in PLACEHOLDER.captures_iter(template) {
        let name = caps[1].to_string();
        if !seen.contains(&name) {
            seen.push(name);
        }
    }
    seen
}

/// Build a field map from string pairs.
pub fn fields<const N: usize>(pairs: [(&str, &str); N]) -> HashMap<String, String> {
    pairs
        .into_iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
}
