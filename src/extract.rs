//! Best-effort JSON extraction from free-form model output.
//!
//! Models often wrap the requested JSON in prose or markdown fences. The
//! extractor tries, in order:
//!
//! 1. a strict parse of the whole text,
//! 2. the span from the first opening delimiter to the last closing one,
//! 3. each balanced top-level span found by a string-aware scan.
//!
//! Step 2 can mis-locate the span when a string value contains a stray
//! delimiter; step 3 covers most of those cases.

use serde_json::Value;

use crate::error::{Result, SomaError};

/// Which top-level JSON value the caller expects.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JsonShape {
    Object,
    Array,
}

impl JsonShape {
    fn delimiters(self) -> (char, char) {
        match self {
            JsonShape::Object => ('{', '}'),
            JsonShape::Array => ('[', ']'),
        }
    }
}

/// Extract a JSON value from `text`.
///
/// Fails with [`SomaError::NoJsonFound`] when the text is empty or holds no
/// delimiter pair, and with [`SomaError::MalformedJson`] when a candidate
/// span exists but none of the candidates parse.
pub fn extract(text: &str, shape: JsonShape) -> Result<Value> {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return Err(SomaError::NoJsonFound);
    }

    if let Ok(value) = serde_json::from_str::<Value>(trimmed) {
        return Ok(value);
    }

    let (open, close) = shape.delimiters();
    let (Some(first), Some(last)) = (trimmed.find(open), trimmed.rfind(close)) else {
        return Err(SomaError::NoJsonFound);
    };
    if first >= last {
        return Err(SomaError::NoJsonFound);
    }

    let span = &trimmed[first..=last];
    let heuristic_err = match serde_json::from_str::<Value>(span) {
        Ok(value) => return Ok(value),
        Err(e) => e,
    };

    for candidate in balanced_candidates(trimmed, open, close) {
        if let Ok(value) = serde_json::from_str::<Value>(candidate) {
            return Ok(value);
        }
    }

    Err(SomaError::MalformedJson {
        message: heuristic_err.to_string(),
    })
}

/// Convenience wrapper for the common object-shaped case.
pub fn extract_object(text: &str) -> Result<Value> {
    extract(text, JsonShape::Object)
}

/// Top-level balanced `open ... close` spans, skipping delimiters inside
/// string literals.
fn balanced_candidates(text: &str, open: char, close: char) -> Vec<&str> {
    let mut candidates = Vec::new();
    let mut depth: u32 = 0;
    let mut start: Option<usize> = None;
    let mut in_string = false;
    let mut escape = false;

    for (idx, ch) in text.char_indices() {
        if in_string {
            if escape {
                escape = false;
                continue;
            }
            match ch {
                '\\' => escape = true,
                '"' => in_string = false,
                _ => {}
            }
            continue;
        }

        if ch == '"' {
            // Only strings inside a candidate matter; prose quotes outside
            // a span must not swallow the following JSON.
            if depth > 0 {
                in_string = true;
            }
        } else if ch == open {
            if depth == 0 {
                start = Some(idx);
            }
            depth += 1;
        } else if ch == close && depth > 0 {
            depth -= 1;
            if depth == 0
                && let Some(s) = start.take()
            {
                candidates.push(&text[s..idx + ch.len_utf8()]);
            }
        }
    }

    candidates
}
