//! PII redaction for transcript payloads.
//!
//! Applied exactly once, at write time; stored payloads are already
//! redacted. Substitution is deterministic and idempotent (the replacement
//! tokens match neither pattern), so re-running the redactor over a stored
//! payload is the identity.

use std::sync::LazyLock;

use regex::Regex;
use serde_json::Value;

use crate::config::RedactionMode;

static EMAIL_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\b[A-Za-z0-9._%+-]+@[A-Za-z0-9.-]+\.[A-Za-z]{2,}\b").expect("email pattern")
});

// Covers "(DDD) DDD-DDDD" and "DDD[-. ]DDD[-. ]DDDD".
static PHONE_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\b(?:\(\d{3}\)\s?\d{3}-\d{4}|\d{3}[-.\s]\d{3}[-.\s]\d{4})\b")
        .expect("phone pattern")
});

pub fn redact_text(text: &str, mode: RedactionMode) -> String {
    if mode == RedactionMode::Off {
        return text.to_owned();
    }
    let redacted = EMAIL_REGEX.replace_all(text, "[EMAIL]");
    PHONE_REGEX.replace_all(&redacted, "[PHONE]").into_owned()
}

/// Walk a payload and redact every string leaf, preserving structure and
/// key order. Non-string leaves are untouched.
pub fn redact_value(value: &Value, mode: RedactionMode) -> Value {
    if mode == RedactionMode::Off {
        return value.clone();
    }
    match value {
        Value::String(s) => Value::String(redact_text(s, mode)),
        Value::Array(items) => {
            Value::Array(items.iter().map(|item| redact_value(item, mode)).collect())
        }
        Value::Object(map) => Value::Object(
            map.iter()
                .map(|(key, item)| (key.clone(), redact_value(item, mode)))
                .collect(),
        ),
        other => other.clone(),
    }
}
