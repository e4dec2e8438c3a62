//! Redaction helpers for anything that ends up in logs.

use axum::http::HeaderMap;
use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::{Map, Value};

const MAX_UPSTREAM_BODY_CHARS: usize = 256;
const MAX_LOGGED_STRING_CHARS: usize = 50;

static SECRET_PATTERNS: Lazy<Vec<Regex>> = Lazy::new(|| {
    [
        r"(?i)\bbearer\s+[A-Za-z0-9._\-]{16,}",
        r"sk-or-v1-[A-Za-z0-9]{16,}",
        r"sk-[A-Za-z0-9_\-]{16,}",
        r#"(?i)\b(api[_-]?key|token|secret|password)\b\s*[:=]\s*"?[^"\s,}]{8,}"?"#,
    ]
    .iter()
    .filter_map(|p| Regex::new(p).ok())
    .collect()
});

/// Collapse whitespace, mask secrets, and bound the length of an upstream
/// error body before it is logged or stored in an error.
pub fn sanitize_upstream_body(raw: &str) -> String {
    let collapsed = raw.split_whitespace().collect::<Vec<_>>().join(" ");
    let masked = mask_secrets(&collapsed);
    truncate_chars(&masked, MAX_UPSTREAM_BODY_CHARS)
}

pub fn mask_secrets(input: &str) -> String {
    let mut out = input.to_string();
    for re in SECRET_PATTERNS.iter() {
        out = re.replace_all(&out, "[REDACTED]").into_owned();
    }
    out
}

fn is_sensitive_key(key: &str) -> bool {
    let key = key.to_ascii_lowercase();
    ["auth", "token", "cookie", "secret", "key"]
        .iter()
        .any(|needle| key.contains(needle))
}

/// Header map as a log-safe JSON object.
pub fn redact_headers(headers: &HeaderMap) -> Value {
    let mut out = Map::new();
    for (name, value) in headers {
        let shown = if is_sensitive_key(name.as_str()) {
            "[REDACTED]".to_string()
        } else {
            truncate_chars(value.to_str().unwrap_or("<binary>"), MAX_LOGGED_STRING_CHARS)
        };
        out.insert(name.as_str().to_string(), Value::String(shown));
    }
    Value::Object(out)
}

/// Request body as a log-safe JSON value: sensitive keys masked, strings
/// shortened. Nested objects are handled recursively.
pub fn redact_body(value: &Value) -> Value {
    match value {
        Value::Object(obj) => Value::Object(
            obj.iter()
                .map(|(k, v)| {
                    let shown = if is_sensitive_key(k) {
                        Value::String("[REDACTED]".into())
                    } else {
                        redact_body(v)
                    };
                    (k.clone(), shown)
                })
                .collect(),
        ),
        Value::Array(items) => Value::Array(items.iter().map(redact_body).collect()),
        Value::String(s) => Value::String(truncate_chars(s, MAX_LOGGED_STRING_CHARS)),
        other => other.clone(),
    }
}

pub fn truncate_chars(input: &str, max: usize) -> String {
    if input.chars().count() <= max {
        return input.to_string();
    }
    let mut out: String = input.chars().take(max).collect();
    out.push_str("...");
    out
}
