//! Rule evaluation over transcript text.
//!
//! Stateless: every call loads the active rules for the session scope and
//! scans the text. Patterns are case-insensitive regexes checked in config
//! order; the first match per rule wins and the rest of that rule's
//! patterns are skipped. A pattern that fails to compile is skipped and
//! scanning continues. Deduplication across a session (e.g. emitting a
//! required-question satisfaction only once) is left to consumers.

use ca_protocol::{EventEnvelope, EventType, RequiredQuestionPayload, RuleAlertPayload};
use regex::RegexBuilder;
use serde_json::Value;
use sqlx::PgPool;
use uuid::Uuid;

use crate::repo::rules::{load_active_rules, RuleRow};

pub async fn evaluate_segment(
    pool: &PgPool,
    session_id: Uuid,
    tenant_id: Option<&str>,
    text: &str,
) -> Result<Vec<EventEnvelope>, sqlx::Error> {
    let rules = load_active_rules(pool, tenant_id).await?;
    Ok(match_rules(session_id, &rules, text))
}

pub fn match_rules(session_id: Uuid, rules: &[RuleRow], text: &str) -> Vec<EventEnvelope> {
    let mut events = Vec::new();

    for rule in rules {
        let config = &rule.config.0;
        let rule_id = config
            .get("id")
            .and_then(Value::as_str)
            .map(ToOwned::to_owned)
            .unwrap_or_else(|| rule.id.to_string());

        match rule.kind.as_str() {
            "keyword_alert" | "prohibited_claim" => {
                if let Some(pattern) = first_match(config.get("patterns"), text) {
                    let payload = RuleAlertPayload {
                        rule_id,
                        kind: rule.kind.clone(),
                        severity: str_field(config, "severity", "info"),
                        message: str_field(config, "message", ""),
                        matched_pattern: pattern,
                    };
                    events.push(EventEnvelope::server(
                        session_id,
                        EventType::RuleAlert,
                        serde_json::to_value(payload).unwrap_or_default(),
                    ));
                }
            }
            "required_question" => {
                if first_match(config.get("satisfy_patterns"), text).is_some() {
                    let payload = RequiredQuestionPayload {
                        question: str_field(config, "question", &rule_id),
                        rule_id,
                        satisfied: true,
                    };
                    events.push(EventEnvelope::server(
                        session_id,
                        EventType::RequiredQuestionStatus,
                        serde_json::to_value(payload).unwrap_or_default(),
                    ));
                }
            }
            other => {
                tracing::debug!(kind = other, "skipping rule of unknown kind");
            }
        }
    }

    events
}

/// Scan patterns in config order; return the first one that matches.
fn first_match(patterns: Option<&Value>, text: &str) -> Option<String> {
    for pattern in patterns?.as_array()?.iter().filter_map(Value::as_str) {
        let Ok(regex) = RegexBuilder::new(pattern).case_insensitive(true).build() else {
            continue;
        };
        if regex.is_match(text) {
            return Some(pattern.to_owned());
        }
    }
    None
}

fn str_field(config: &Value, key: &str, default: &str) -> String {
    config
        .get(key)
        .and_then(Value::as_str)
        .unwrap_or(default)
        .to_owned()
}
