//! Debounced guidance generation.
//!
//! Each accepted transcript frame re-arms a per-session 1.5 s timer; when
//! the timer fires without being re-armed, one guidance job runs: it reads
//! the recent transcript window, asks the LLM for a suggestion, persists a
//! `server.guidance_update` event and fans it out. Guidance is best-effort:
//! every failure is logged and swallowed, and nothing here can affect the
//! session pipeline.

use std::time::Duration;

use ca_protocol::{EventEnvelope, EventType, TranscriptPayload};
use tracing::{error, warn};
use uuid::Uuid;

use crate::llm::{ChatMessage, Guidance};
use crate::repo::events::{append_event, fetch_recent_transcript_segments, EventRow};
use crate::state::AppState;

pub const GUIDANCE_DEBOUNCE: Duration = Duration::from_millis(1500);

/// How many trailing transcript segments feed the guidance prompt.
const CONTEXT_SEGMENTS: i64 = 20;

const GUIDANCE_SYSTEM_PROMPT: &str =
    "You are a helpful CSR assistant. Provide a short, direct suggested reply for the agent.";

/// Re-arm the session's debounce timer with a fresh guidance job.
pub async fn schedule(state: &AppState, session_id: Uuid) {
    let job_state = state.clone();
    state
        .hub
        .schedule_debounced(session_id, GUIDANCE_DEBOUNCE, async move {
            run_guidance_job(job_state, session_id).await;
        })
        .await;
}

async fn run_guidance_job(state: AppState, session_id: Uuid) {
    let segments =
        match fetch_recent_transcript_segments(&state.pool, session_id, CONTEXT_SEGMENTS).await {
            Ok(rows) => rows,
            Err(e) => {
                error!(session_id = %session_id, error = %e, "guidance transcript fetch failed");
                return;
            }
        };
    let lines = conversation_lines(&segments);
    if lines.is_empty() {
        return;
    }

    let messages = [
        ChatMessage::system(GUIDANCE_SYSTEM_PROMPT),
        ChatMessage::user(lines.join("\n")),
    ];
    let guidance: Guidance = match state.llm.complete(&messages).await {
        Ok(guidance) => guidance,
        Err(e) => {
            error!(session_id = %session_id, error = %e, "guidance generation failed");
            return;
        }
    };
    let payload = match serde_json::to_value(&guidance) {
        Ok(payload) => payload,
        Err(e) => {
            error!(session_id = %session_id, error = %e, "guidance payload serialization failed");
            return;
        }
    };

    let envelope = EventEnvelope::server(session_id, EventType::GuidanceUpdate, payload);
    let lock = state.hub.publish_lock(session_id).await;
    let _publish = lock.lock().await;
    match append_event(
        &state.pool,
        session_id,
        envelope.event_id,
        envelope.event_type.as_str(),
        &envelope.payload,
    )
    .await
    {
        Ok(outcome) => {
            let outbound = envelope.with_server_seq(outcome.server_seq());
            state.hub.fanout(session_id, &outbound).await;
        }
        Err(e) => {
            warn!(session_id = %session_id, error = %e, "guidance event append rejected");
        }
    }
}

/// `Speaker: text` lines for the LLM prompt, in server_seq order. Events
/// with empty text are skipped; a missing speaker defaults to the customer.
pub fn conversation_lines(rows: &[EventRow]) -> Vec<String> {
    rows.iter()
        .filter_map(|row| {
            let payload = TranscriptPayload::from_value(&row.payload.0);
            let text = payload.text.unwrap_or_default();
            let text = text.trim();
            if text.is_empty() {
                return None;
            }
            let speaker = payload
                .speaker
                .filter(|speaker| !speaker.trim().is_empty())
                .unwrap_or_else(|| "Customer".to_owned());
            Some(format!("{}: {}", title_case(&speaker), text))
        })
        .collect()
}

fn title_case(s: &str) -> String {
    s.split_whitespace()
        .map(|word| {
            let mut chars = word.chars();
            match chars.next() {
                Some(first) => {
                    first.to_uppercase().collect::<String>() + &chars.as_str().to_lowercase()
                }
                None => String::new(),
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}
