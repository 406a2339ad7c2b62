//! Structured-JSON chat-completion client.
//!
//! Every call requests a JSON object at temperature 0 and validates the
//! content against the caller's schema. Failures surface as `LlmError` and
//! are contained by the callers (guidance swallows, the session API maps to
//! an HTTP error); they never reach a client connection as an uncaught
//! failure.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

use crate::config::Settings;

#[derive(Debug, thiserror::Error)]
pub enum LlmError {
    #[error("no LLM model configured")]
    NotConfigured,
    #[error("LLM API request failed: {0}")]
    Transport(String),
    #[error("LLM returned empty or non-string content")]
    EmptyContent,
    #[error("LLM output failed schema validation: {0}")]
    InvalidOutput(String),
}

/// A schema the model's JSON output is validated against.
///
/// `FIELDS` drives the injected instruction message: each entry is a
/// required field name and its scalar type as presented to the model.
pub trait LlmSchema: DeserializeOwned {
    const FIELDS: &'static [(&'static str, &'static str)];

    /// Value-level constraints serde cannot express.
    fn validate(&self) -> Result<(), String> {
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ChatMessage {
    pub role: &'static str,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: "system",
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: "user",
            content: content.into(),
        }
    }
}

pub struct LlmClient {
    http: reqwest::Client,
    base_url: String,
    api_key: String,
    primary_model: String,
    fallback_model: Option<String>,
}

impl LlmClient {
    pub fn new(settings: &Settings) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: settings.openrouter_base_url.trim_end_matches('/').to_owned(),
            api_key: settings.openrouter_api_key.clone(),
            primary_model: settings.llm_primary_model.clone(),
            fallback_model: (!settings.llm_fallback_model.is_empty())
                .then(|| settings.llm_fallback_model.clone()),
        }
    }

    /// Run a completion and validate the response against `T`.
    ///
    /// A transport-level failure of the primary model is retried once
    /// against the fallback model when one is configured; schema failures
    /// are not retried (a model that answered with the wrong shape will
    /// answer with the wrong shape again at temperature 0).
    pub async fn complete<T: LlmSchema>(&self, messages: &[ChatMessage]) -> Result<T, LlmError> {
        let messages = ensure_json_instruction::<T>(messages);
        let content = match self.request_content(&self.primary_model, &messages).await {
            Ok(content) => content,
            Err(err @ (LlmError::Transport(_) | LlmError::NotConfigured)) => {
                let Some(fallback) = &self.fallback_model else {
                    return Err(err);
                };
                tracing::warn!(error = %err, model = %fallback, "primary model failed, retrying with fallback");
                self.request_content(fallback, &messages).await?
            }
            Err(err) => return Err(err),
        };

        let parsed: T =
            serde_json::from_str(&content).map_err(|e| LlmError::InvalidOutput(e.to_string()))?;
        parsed.validate().map_err(LlmError::InvalidOutput)?;
        Ok(parsed)
    }

    async fn request_content(
        &self,
        model: &str,
        messages: &[ChatMessage],
    ) -> Result<String, LlmError> {
        if model.is_empty() {
            return Err(LlmError::NotConfigured);
        }
        let body = serde_json::json!({
            "model": model,
            "messages": messages,
            "response_format": { "type": "json_object" },
            "temperature": 0,
        });
        let response = self
            .http
            .post(format!("{}/chat/completions", self.base_url))
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| LlmError::Transport(e.to_string()))?;
        if !response.status().is_success() {
            return Err(LlmError::Transport(format!(
                "unexpected status {}",
                response.status()
            )));
        }
        let completion: CompletionResponse = response
            .json()
            .await
            .map_err(|e| LlmError::Transport(e.to_string()))?;

        let content = completion
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content);
        match content {
            Some(Value::String(text)) if !text.trim().is_empty() => Ok(text),
            _ => Err(LlmError::EmptyContent),
        }
    }
}

#[derive(Debug, Deserialize)]
struct CompletionResponse {
    #[serde(default)]
    choices: Vec<CompletionChoice>,
}

#[derive(Debug, Deserialize)]
struct CompletionChoice {
    message: CompletionMessage,
}

#[derive(Debug, Deserialize)]
struct CompletionMessage {
    #[serde(default)]
    content: Option<Value>,
}

/// Prepend the strict-JSON instruction unless some supplied message already
/// talks about JSON (the caller is assumed to have its own contract then).
fn ensure_json_instruction<T: LlmSchema>(messages: &[ChatMessage]) -> Vec<ChatMessage> {
    let has_json_hint = messages
        .iter()
        .any(|message| message.content.to_lowercase().contains("json"));
    if has_json_hint {
        return messages.to_vec();
    }

    let required: Vec<&str> = T::FIELDS.iter().map(|(name, _)| *name).collect();
    let field_lines: Vec<String> = T::FIELDS
        .iter()
        .map(|(name, scalar_type)| format!("- \"{name}\" ({scalar_type})"))
        .collect();
    let instruction = format!(
        "Return output as valid JSON only. Do not include markdown, code fences, or extra commentary.\n\
         Match this exact JSON schema shape. Required fields: {}.\n\
         Expected fields:\n{}",
        required.join(", "),
        field_lines.join("\n"),
    );

    let mut normalized = Vec::with_capacity(messages.len() + 1);
    normalized.push(ChatMessage::system(instruction));
    normalized.extend(messages.iter().cloned());
    normalized
}

// ---------------------------------------------------------------------------
// Schemas
// ---------------------------------------------------------------------------

/// Realtime agent guidance, the payload of `server.guidance_update`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Guidance {
    pub suggested_reply: String,
    pub rationale: String,
    pub confidence: f64,
}

impl LlmSchema for Guidance {
    const FIELDS: &'static [(&'static str, &'static str)] = &[
        ("suggested_reply", "string"),
        ("rationale", "string"),
        ("confidence", "number"),
    ];

    fn validate(&self) -> Result<(), String> {
        if (0.0..=1.0).contains(&self.confidence) {
            Ok(())
        } else {
            Err(format!("confidence {} outside [0, 1]", self.confidence))
        }
    }
}

/// Terminal classification of a completed call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Disposition {
    Booked,
    Lead,
    Spam,
}

impl Disposition {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Booked => "Booked",
            Self::Lead => "Lead",
            Self::Spam => "Spam",
        }
    }
}

/// End-of-call summary. Models frequently return the summary as a list of
/// bullet strings; that form is normalized to newline-joined `- <line>`
/// text at deserialization.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CallSummary {
    #[serde(deserialize_with = "summary_text")]
    pub summary: String,
    pub disposition: Disposition,
}

impl LlmSchema for CallSummary {
    const FIELDS: &'static [(&'static str, &'static str)] =
        &[("summary", "string"), ("disposition", "string")];
}

fn summary_text<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum SummaryValue {
        Text(String),
        Bullets(Vec<Value>),
    }

    match SummaryValue::deserialize(deserializer)? {
        SummaryValue::Text(text) => Ok(text),
        SummaryValue::Bullets(items) => {
            let lines: Vec<String> = items
                .iter()
                .map(|item| match item {
                    Value::String(s) => s.trim().to_owned(),
                    other => other.to_string(),
                })
                .filter(|line| !line.is_empty())
                .map(|line| format!("- {line}"))
                .collect();
            Ok(lines.join("\n"))
        }
    }
}
