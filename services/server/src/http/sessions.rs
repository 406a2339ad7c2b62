//! Session lifecycle API: create, fetch, and the end-of-call transition.

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use tracing::{error, info};
use uuid::Uuid;

use crate::guidance::conversation_lines;
use crate::http::response::{bad_request, internal_error, not_found};
use crate::llm::{CallSummary, ChatMessage};
use crate::repo::events::fetch_transcript_events;
use crate::repo::sessions as repo;
use crate::repo::sessions::SessionScope;
use crate::state::AppState;

const SUMMARY_SYSTEM_PROMPT: &str = "Summarize this call in 3 bullet points and provide a \
                                     disposition. Disposition must be one of: Booked, Lead, Spam.";

pub async fn create_session(
    State(state): State<AppState>,
    Json(scope): Json<SessionScope>,
) -> Response {
    match repo::create_session(&state.pool, &scope).await {
        Ok(session) => {
            info!(session_id = %session.id, "session created");
            (StatusCode::CREATED, Json(session)).into_response()
        }
        Err(e) => internal_error(e),
    }
}

pub async fn get_session(State(state): State<AppState>, Path(session_id): Path<Uuid>) -> Response {
    match repo::fetch_session(&state.pool, session_id).await {
        Ok(Some(session)) => Json(session).into_response(),
        Ok(None) => not_found("Session not found"),
        Err(e) => internal_error(e),
    }
}

/// End-of-call: summarize the transcript, classify the call, and complete
/// the session atomically. Idempotent: once a summary and disposition are
/// stored they are returned as-is without another model call.
pub async fn end_session(State(state): State<AppState>, Path(session_id): Path<Uuid>) -> Response {
    let session = match repo::fetch_session(&state.pool, session_id).await {
        Ok(Some(session)) => session,
        Ok(None) => return not_found("Session not found"),
        Err(e) => return internal_error(e),
    };
    if let (Some(summary), Some(disposition)) = (&session.summary, &session.disposition) {
        return call_output(session_id, summary, disposition);
    }

    let transcript = match fetch_transcript_events(&state.pool, session_id).await {
        Ok(rows) => rows,
        Err(e) => return internal_error(e),
    };
    let lines = conversation_lines(&transcript);
    if lines.is_empty() {
        return bad_request("No transcript data available for summary generation");
    }

    let messages = [
        ChatMessage::system(SUMMARY_SYSTEM_PROMPT),
        ChatMessage::user(lines.join("\n")),
    ];
    let summary: CallSummary = match state.llm.complete(&messages).await {
        Ok(summary) => summary,
        Err(e) => {
            error!(session_id = %session_id, error = %e, "end-of-call summary failed");
            return internal_error(format!("Failed to end session: {e}"));
        }
    };

    match repo::complete_session(
        &state.pool,
        session_id,
        &summary.summary,
        summary.disposition.as_str(),
    )
    .await
    {
        Ok(Some(completed)) => {
            info!(
                session_id = %session_id,
                disposition = %summary.disposition.as_str(),
                "session completed"
            );
            call_output(
                session_id,
                completed.summary.as_deref().unwrap_or_default(),
                completed.disposition.as_deref().unwrap_or_default(),
            )
        }
        // Lost the completion race; return the winner's stored values.
        Ok(None) => match repo::fetch_session(&state.pool, session_id).await {
            Ok(Some(session)) => call_output(
                session_id,
                session.summary.as_deref().unwrap_or_default(),
                session.disposition.as_deref().unwrap_or_default(),
            ),
            Ok(None) => not_found("Session not found"),
            Err(e) => internal_error(e),
        },
        Err(e) => internal_error(e),
    }
}

fn call_output(session_id: Uuid, summary: &str, disposition: &str) -> Response {
    Json(serde_json::json!({
        "session_id": session_id,
        "summary": summary,
        "disposition": disposition,
    }))
    .into_response()
}
