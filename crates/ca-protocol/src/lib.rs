// ca-protocol: Call-assistant wire protocol types and serialization.
//
// Every frame on the session WebSocket is an `EventEnvelope` carrying a
// dotted `type` string for discriminated dispatch. The envelope is
// schema-free at the payload level; per-type payload views are provided
// for the kinds the server interprets, with unknown keys passed through.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// Envelope schema version stamped on every frame.
pub const SCHEMA_VERSION: &str = "1.0";

// ---------------------------------------------------------------------------
// Event types
// ---------------------------------------------------------------------------

/// The closed set of event types carried on a session stream.
///
/// Only the transcript and resume kinds are accepted from clients; the
/// server logs and ignores any other inbound kind without closing the
/// connection. A frame whose `type` is outside this set fails envelope
/// parsing and is dropped the same way.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EventType {
    #[serde(rename = "client.transcript_segment")]
    TranscriptSegment,
    #[serde(rename = "client.transcript_final")]
    TranscriptFinal,
    #[serde(rename = "client.resume")]
    Resume,
    #[serde(rename = "server.ack")]
    Ack,
    #[serde(rename = "server.rule_alert")]
    RuleAlert,
    #[serde(rename = "server.required_question_status")]
    RequiredQuestionStatus,
    #[serde(rename = "server.guidance_update")]
    GuidanceUpdate,
    #[serde(rename = "system.ping")]
    Ping,
    #[serde(rename = "system.pong")]
    Pong,
}

impl EventType {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::TranscriptSegment => "client.transcript_segment",
            Self::TranscriptFinal => "client.transcript_final",
            Self::Resume => "client.resume",
            Self::Ack => "server.ack",
            Self::RuleAlert => "server.rule_alert",
            Self::RequiredQuestionStatus => "server.required_question_status",
            Self::GuidanceUpdate => "server.guidance_update",
            Self::Ping => "system.ping",
            Self::Pong => "system.pong",
        }
    }

    /// Transcript kinds are the only ones persisted PII-redacted.
    pub fn is_transcript(self) -> bool {
        matches!(self, Self::TranscriptSegment | Self::TranscriptFinal)
    }
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EventType {
    type Err = UnknownEventType;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "client.transcript_segment" => Ok(Self::TranscriptSegment),
            "client.transcript_final" => Ok(Self::TranscriptFinal),
            "client.resume" => Ok(Self::Resume),
            "server.ack" => Ok(Self::Ack),
            "server.rule_alert" => Ok(Self::RuleAlert),
            "server.required_question_status" => Ok(Self::RequiredQuestionStatus),
            "server.guidance_update" => Ok(Self::GuidanceUpdate),
            "system.ping" => Ok(Self::Ping),
            "system.pong" => Ok(Self::Pong),
            _ => Err(UnknownEventType(s.to_owned())),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnknownEventType(pub String);

impl fmt::Display for UnknownEventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unknown event type: {}", self.0)
    }
}

impl std::error::Error for UnknownEventType {}

// ---------------------------------------------------------------------------
// Envelope
// ---------------------------------------------------------------------------

/// The frame exchanged in both directions on `/ws/session/{session_id}`.
///
/// `server_seq` is assigned at persistence and is the canonical total order
/// within a session; `client_seq` is a sender-side counter echoed in acks.
/// Both serialize as explicit nulls when absent, matching the frozen wire
/// shape.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventEnvelope {
    /// Client- or server-minted idempotency key; minted here when omitted.
    #[serde(default = "Uuid::new_v4")]
    pub event_id: Uuid,
    pub session_id: Uuid,
    #[serde(rename = "type")]
    pub event_type: EventType,
    pub ts_created: DateTime<Utc>,
    #[serde(default = "default_schema_version")]
    pub schema_version: String,
    #[serde(default = "empty_payload")]
    pub payload: Value,
    #[serde(default)]
    pub client_seq: Option<i64>,
    #[serde(default)]
    pub server_seq: Option<i64>,
}

fn default_schema_version() -> String {
    SCHEMA_VERSION.to_owned()
}

/// An empty JSON object, the payload of control frames like `system.ping`.
pub fn empty_payload() -> Value {
    Value::Object(serde_json::Map::new())
}

impl EventEnvelope {
    /// A server-minted envelope stamped with a fresh event_id and the
    /// current UTC time. `server_seq` is attached once persistence assigns
    /// it.
    pub fn server(session_id: Uuid, event_type: EventType, payload: Value) -> Self {
        Self {
            event_id: Uuid::new_v4(),
            session_id,
            event_type,
            ts_created: Utc::now(),
            schema_version: default_schema_version(),
            payload,
            client_seq: None,
            server_seq: None,
        }
    }

    pub fn with_server_seq(mut self, server_seq: i64) -> Self {
        self.server_seq = Some(server_seq);
        self
    }
}

// ---------------------------------------------------------------------------
// Payload views
// ---------------------------------------------------------------------------

/// Transcript payload as interpreted by the server.
///
/// The envelope stores the payload as free-form JSON; this view extracts the
/// fields the pipeline reads while `extra` carries any unknown keys through
/// redaction and fanout untouched. Scalar `speaker`/`text` values of the
/// wrong JSON type are stringified rather than rejected.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TranscriptPayload {
    #[serde(default, deserialize_with = "lenient_string")]
    pub speaker: Option<String>,
    #[serde(default, deserialize_with = "lenient_string")]
    pub text: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp_ms: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub is_final: Option<bool>,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, Value>,
}

impl TranscriptPayload {
    pub fn from_value(payload: &Value) -> Self {
        serde_json::from_value(payload.clone()).unwrap_or_default()
    }
}

fn lenient_string<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Value::deserialize(deserializer)?;
    Ok(match value {
        Value::Null => None,
        Value::String(s) => Some(s),
        other => Some(other.to_string()),
    })
}

/// Payload of a `server.rule_alert` synthesized by the rule engine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuleAlertPayload {
    pub rule_id: String,
    pub kind: String,
    pub severity: String,
    pub message: String,
    pub matched_pattern: String,
}

/// Payload of a `server.required_question_status`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequiredQuestionPayload {
    pub rule_id: String,
    pub satisfied: bool,
    pub question: String,
}

/// Payload of a `server.ack`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AckPayload {
    pub acknowledged: bool,
}

// ---------------------------------------------------------------------------
// Close codes & HTTP error envelope
// ---------------------------------------------------------------------------

/// WebSocket close semantics for the session endpoint.
pub mod close {
    /// RFC 6455 policy-violation code, sent when the referenced session is
    /// unknown or no longer active.
    pub const POLICY_VIOLATION: u16 = 1008;
    pub const SESSION_NOT_FOUND: &str = "Session not found or inactive";
}

/// JSON body of every non-2xx HTTP response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HttpErrorEnvelope {
    pub code: String,
    pub message: String,
    #[serde(default)]
    pub details: Option<Value>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn envelope_round_trips_with_explicit_nulls() {
        let envelope = EventEnvelope::server(
            Uuid::new_v4(),
            EventType::TranscriptSegment,
            serde_json::json!({"speaker": "customer", "text": "hello"}),
        );
        let json = serde_json::to_string(&envelope).unwrap();
        assert!(json.contains("\"client_seq\":null"));
        assert!(json.contains("\"type\":\"client.transcript_segment\""));

        let parsed: EventEnvelope = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, envelope);
    }

    #[test]
    fn envelope_defaults_fill_missing_fields() {
        let session_id = Uuid::new_v4();
        let json = format!(
            r#"{{"session_id":"{session_id}","type":"system.pong","ts_created":"2026-02-17T10:00:00Z"}}"#
        );
        let parsed: EventEnvelope = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed.event_type, EventType::Pong);
        assert_eq!(parsed.schema_version, SCHEMA_VERSION);
        assert_eq!(parsed.payload, empty_payload());
        assert_eq!(parsed.client_seq, None);
        assert_eq!(parsed.server_seq, None);
    }

    #[test]
    fn unknown_type_fails_envelope_parsing() {
        let session_id = Uuid::new_v4();
        let json = format!(
            r#"{{"session_id":"{session_id}","type":"system.resync","ts_created":"2026-02-17T10:00:00Z"}}"#
        );
        assert!(serde_json::from_str::<EventEnvelope>(&json).is_err());
    }

    #[test]
    fn event_type_string_round_trip() {
        for event_type in [
            EventType::TranscriptSegment,
            EventType::TranscriptFinal,
            EventType::Resume,
            EventType::Ack,
            EventType::RuleAlert,
            EventType::RequiredQuestionStatus,
            EventType::GuidanceUpdate,
            EventType::Ping,
            EventType::Pong,
        ] {
            assert_eq!(event_type.as_str().parse::<EventType>().unwrap(), event_type);
        }
        assert!("server.reboot".parse::<EventType>().is_err());
    }

    #[test]
    fn transcript_view_stringifies_scalars_and_keeps_unknown_keys() {
        let payload = serde_json::json!({
            "speaker": "agent",
            "text": 42,
            "sentiment": "neutral"
        });
        let view = TranscriptPayload::from_value(&payload);
        assert_eq!(view.speaker.as_deref(), Some("agent"));
        assert_eq!(view.text.as_deref(), Some("42"));
        assert_eq!(
            view.extra.get("sentiment"),
            Some(&Value::String("neutral".to_owned()))
        );

        let back = serde_json::to_value(&view).unwrap();
        assert_eq!(back.get("sentiment"), payload.get("sentiment"));
    }
}
