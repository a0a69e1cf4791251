//! Input validation and sanitization
//!
//! Invoked on every input crossing the engine boundary: memory content,
//! queries, tags, project names, and metadata. Enforces byte bounds, strips
//! control characters, and scans against the injection catalog in
//! [`patterns`].
//!
//! Every rejection is logged on the `security` target with the class, the
//! operation, and a bounded excerpt of the offending input, so operators can
//! audit what was thrown at the engine without trusting the caller.

pub mod patterns;

use crate::domain::error::{Error, InjectionClass, InvalidInputKind, Result};
use std::borrow::Cow;
use std::collections::HashMap;
use tracing::warn;

/// Maximum memory content size in bytes.
pub const MAX_CONTENT_BYTES: usize = 50_000;
/// Maximum query size in bytes.
pub const MAX_QUERY_BYTES: usize = 1_000;
/// Maximum tag size in bytes.
pub const MAX_TAG_BYTES: usize = 50;
/// Maximum project identifier size in bytes.
pub const MAX_PROJECT_BYTES: usize = 100;
/// Maximum metadata key size in bytes.
pub const MAX_METADATA_KEY_BYTES: usize = 100;
/// Maximum metadata value size in bytes (serialized).
pub const MAX_METADATA_VALUE_BYTES: usize = 1_000;
/// Bound on the excerpt captured in errors and security logs.
pub const MAX_EXCERPT_BYTES: usize = 256;

/// A bounded excerpt of the input, safe to log and embed in errors.
fn excerpt(text: &str) -> String {
    let mut end = text.len().min(MAX_EXCERPT_BYTES);
    while end > 0 && !text.is_char_boundary(end) {
        end -= 1;
    }
    text[..end].to_string()
}

fn log_rejection(field: &str, kind: &InvalidInputKind, text: &str) {
    warn!(
        target: "security",
        field,
        kind = ?kind,
        excerpt = %excerpt(text),
        "input rejected by validation"
    );
}

fn reject(field: &str, kind: InvalidInputKind, text: &str) -> Error {
    log_rejection(field, &kind, text);
    Error::InvalidInput {
        field: field.to_string(),
        kind,
        excerpt: Some(excerpt(text)),
    }
}

/// Strip NUL and C0 control characters, keeping `\n` and `\t`.
///
/// Returns a borrowed slice when nothing needed stripping, which is the
/// overwhelmingly common case.
pub fn strip_controls(text: &str) -> Cow<'_, str> {
    if text
        .chars()
        .any(|c| c.is_control() && c != '\n' && c != '\t')
    {
        Cow::Owned(
            text.chars()
                .filter(|&c| !c.is_control() || c == '\n' || c == '\t')
                .collect(),
        )
    } else {
        Cow::Borrowed(text)
    }
}

fn check_text(field: &str, text: &str, max_bytes: usize) -> Result<String> {
    if text.is_empty() {
        return Err(reject(field, InvalidInputKind::Empty, text));
    }
    if text.len() > max_bytes {
        return Err(reject(field, InvalidInputKind::TooLarge, text));
    }
    let cleaned = strip_controls(text);
    if cleaned.trim().is_empty() {
        return Err(reject(field, InvalidInputKind::Empty, text));
    }
    if let Some(class) = patterns::scan(&cleaned) {
        return Err(reject(field, InvalidInputKind::Injection(class), text));
    }
    Ok(cleaned.into_owned())
}

/// Validate and sanitize memory content (≤50,000 bytes).
pub fn validate_content(text: &str) -> Result<String> {
    check_text("content", text, MAX_CONTENT_BYTES)
}

/// Validate and sanitize a search query (≤1,000 bytes).
pub fn validate_query(text: &str) -> Result<String> {
    check_text("query", text, MAX_QUERY_BYTES)
}

/// Validate a tag (≤50 bytes).
pub fn validate_tag(tag: &str) -> Result<String> {
    check_text("tag", tag, MAX_TAG_BYTES)
}

/// Validate a project identifier (≤100 bytes).
pub fn validate_project(project: &str) -> Result<String> {
    check_text("project", project, MAX_PROJECT_BYTES)
}

/// Validate a metadata key (≤100 bytes).
pub fn validate_metadata_key(key: &str) -> Result<String> {
    check_text("metadata_key", key, MAX_METADATA_KEY_BYTES)
}

/// Validate a metadata value. Only scalars are accepted; the serialized
/// form is bounded at 1,000 bytes and string values are injection-scanned.
pub fn validate_metadata_value(key: &str, value: &serde_json::Value) -> Result<()> {
    let field = format!("metadata[{key}]");
    match value {
        serde_json::Value::Null
        | serde_json::Value::Bool(_)
        | serde_json::Value::Number(_) => Ok(()),
        serde_json::Value::String(s) => {
            if s.len() > MAX_METADATA_VALUE_BYTES {
                return Err(reject(&field, InvalidInputKind::TooLarge, s));
            }
            if let Some(class) = patterns::scan(s) {
                return Err(reject(&field, InvalidInputKind::Injection(class), s));
            }
            Ok(())
        }
        other => {
            let rendered = other.to_string();
            Err(reject(&field, InvalidInputKind::Malformed, &rendered))
        }
    }
}

/// Validate a whole metadata map.
pub fn validate_metadata(
    metadata: &HashMap<String, serde_json::Value>,
) -> Result<()> {
    for (key, value) in metadata {
        validate_metadata_key(key)?;
        validate_metadata_value(key, value)?;
    }
    Ok(())
}

/// Expose the matched class for callers that only need a scan.
pub fn scan_for_injection(text: &str) -> Option<InjectionClass> {
    patterns::scan(text)
}
