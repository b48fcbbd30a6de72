//! Extraction and repair of JSON objects from partial text.
//!
//! Streamed structured output rarely arrives as one clean document: the
//! object is split across deltas, may be wrapped in prose or markdown
//! fences, and the stream can end mid-value. This module provides the
//! two recovery operations the streaming reassembler relies on:
//!
//! - [`extract_object`] scans a growing buffer for balanced `{…}`
//!   candidates and consumes the first one that parses (and, when a
//!   target schema is given, validates). Failed candidates leave the
//!   buffer untouched so future deltas can complete them.
//! - [`repair_object`] applies trivial end-of-stream repairs — a
//!   missing closing or opening brace — and accepts a repair only if
//!   the result is valid JSON. Irreparable leftovers are dropped with a
//!   warning; that is never fatal.
//!
//! Brace counting is string-aware: braces inside JSON string literals
//! (including escaped quotes) do not affect nesting depth.

use serde_json::Value;
use tracing::warn;

use crate::transport::JsonSchema;

/// A balanced `{…}` span inside a buffer, as byte offsets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Span {
    /// Offset of the opening brace.
    pub start: usize,
    /// Offset one past the closing brace.
    pub end: usize,
}

/// Finds every balanced `{…}` span in `text`, ordered by start offset.
///
/// Each `{` opens a candidate; when the nesting depth returns to that
/// candidate's level, the span from its `{` to the matching `}` closes.
/// Nested objects therefore produce their own (shorter) candidates
/// after their enclosing one.
pub fn candidate_spans(text: &str) -> Vec<Span> {
    let mut spans = Vec::new();
    let mut open_stack: Vec<usize> = Vec::new();
    let mut in_string = false;
    let mut escaped = false;

    for (offset, ch) in text.char_indices() {
        if in_string {
            if escaped {
                escaped = false;
            } else if ch == '\\' {
                escaped = true;
            } else if ch == '"' {
                in_string = false;
            }
            continue;
        }
        match ch {
            '"' => in_string = true,
            '{' => open_stack.push(offset),
            '}' => {
                if let Some(start) = open_stack.pop() {
                    spans.push(Span {
                        start,
                        end: offset + 1,
                    });
                }
            }
            _ => {}
        }
    }

    spans.sort_by_key(|span| span.start);
    spans
}

/// Attempts to extract one complete JSON object from `buffer`.
///
/// Candidates are tried in order of increasing start offset. The first
/// one that parses — and validates, when `schema` is given — is
/// removed from the buffer (everything up to and including its closing
/// brace is drained) and returned. If no candidate succeeds the buffer
/// is left untouched so that future deltas can complete a partial
/// object.
pub fn extract_object(buffer: &mut String, schema: Option<&JsonSchema>) -> Option<Value> {
    for span in candidate_spans(buffer) {
        let candidate = &buffer[span.start..span.end];
        let Ok(value) = serde_json::from_str::<Value>(candidate) else {
            continue;
        };
        if !passes_schema(&value, schema) {
            continue;
        }
        buffer.drain(..span.end);
        return Some(value);
    }
    None
}

/// Attempts trivial repairs on leftover text at end of stream.
///
/// - trimmed text starts with `{` but does not end with `}` → append `}`
/// - trimmed text ends with `}` but does not start with `{` → prepend `{`
///
/// A repair is accepted only if the repaired text parses as valid JSON;
/// among parseable repairs, one that also passes the schema is
/// preferred. Returns `None` (after logging a warning) when nothing
/// works — the caller drops the leftover and continues.
pub fn repair_object(text: &str, schema: Option<&JsonSchema>) -> Option<Value> {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return None;
    }

    let repaired = match (trimmed.starts_with('{'), trimmed.ends_with('}')) {
        (true, false) => format!("{trimmed}}}"),
        (false, true) => format!("{{{trimmed}"),
        _ => trimmed.to_string(),
    };

    match serde_json::from_str::<Value>(&repaired) {
        Ok(value) if passes_schema(&value, schema) => Some(value),
        Ok(value) => {
            // Parseable but off-schema: better than dropping the data.
            warn!(
                leftover_len = text.len(),
                "repaired JSON does not match target schema; accepting anyway"
            );
            Some(value)
        }
        Err(_) => {
            warn!(
                leftover_len = text.len(),
                "dropping unrecoverable JSON leftover at end of stream"
            );
            None
        }
    }
}

#[cfg(feature = "schema")]
fn passes_schema(value: &Value, schema: Option<&JsonSchema>) -> bool {
    schema.is_none_or(|s| s.validate(value).is_ok())
}

#[cfg(not(feature = "schema"))]
fn passes_schema(_value: &Value, _schema: Option<&JsonSchema>) -> bool {
    true
}
