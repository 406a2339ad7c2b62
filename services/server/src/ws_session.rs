//! The per-connection session pipeline.
//!
//! Each connection splits into a reader loop (this module) and a writer
//! task draining a single per-connection queue, so acks, fanout, replays
//! and heartbeats reach the socket in one well-defined order. The reader
//! handles frames serially: decode, dispatch, and for transcript frames
//! run redact → append → fanout → rules → debounce → ack. Append and
//! fanout run under the session's publish lock so every subscriber
//! observes events in server_seq order.

use axum::extract::ws::{CloseFrame, Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Path, State};
use axum::response::IntoResponse;
use ca_protocol::{close, AckPayload, EventEnvelope, EventType, TranscriptPayload};
use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::guidance;
use crate::redact::redact_value;
use crate::repo::events::{append_event, fetch_events_after, AppendError, AppendOutcome};
use crate::repo::sessions::fetch_session;
use crate::rules::evaluate_segment;
use crate::state::AppState;

pub async fn ws_session_handler(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
    Path(session_id): Path<Uuid>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_session_socket(socket, state, session_id))
}

/// The connection aborts when the peer is gone or persistence failed; the
/// client is expected to reconnect and resume.
#[derive(Debug, thiserror::Error)]
enum PipelineError {
    #[error("connection closed")]
    ConnectionClosed,
    #[error(transparent)]
    Persistence(#[from] AppendError),
    #[error(transparent)]
    Db(#[from] sqlx::Error),
}

async fn handle_session_socket(socket: WebSocket, state: AppState, session_id: Uuid) {
    let session = match fetch_session(&state.pool, session_id).await {
        Ok(Some(session)) if session.status == "active" => session,
        Ok(_) => {
            close_policy_violation(socket).await;
            return;
        }
        Err(e) => {
            error!(session_id = %session_id, error = %e, "session lookup failed");
            close_policy_violation(socket).await;
            return;
        }
    };
    let tenant_id = session.tenant_id;

    let (mut sink, mut stream) = socket.split();
    let (tx, mut rx) = mpsc::unbounded_channel::<EventEnvelope>();
    // Writer task: the only place this socket is written. Dies on send
    // failure, which closes the channel and surfaces on the next enqueue.
    let writer = tokio::spawn(async move {
        while let Some(envelope) = rx.recv().await {
            let Ok(json) = serde_json::to_string(&envelope) else {
                continue;
            };
            if sink.send(Message::Text(json)).await.is_err() {
                break;
            }
        }
    });

    let conn_id = state.hub.register(session_id, tx.clone()).await;
    info!(session_id = %session_id, "ws connected");

    while let Some(frame) = stream.next().await {
        let text = match frame {
            Ok(Message::Text(text)) => text,
            Ok(Message::Close(_)) => {
                info!(session_id = %session_id, "ws disconnected");
                break;
            }
            // Transport ping/pong is answered by the protocol layer; the
            // application-level liveness signal is `system.pong`.
            Ok(_) => continue,
            Err(e) => {
                warn!(session_id = %session_id, error = %e, "ws read error");
                break;
            }
        };

        let envelope = match serde_json::from_str::<EventEnvelope>(&text) {
            Ok(envelope) => envelope,
            Err(e) => {
                warn!(session_id = %session_id, error = %e, "invalid event envelope");
                continue;
            }
        };

        let result = match envelope.event_type {
            EventType::Pong => {
                state.hub.touch(session_id, conn_id).await;
                Ok(())
            }
            EventType::Resume => handle_resume(&state, session_id, &tx, &envelope).await,
            EventType::TranscriptSegment | EventType::TranscriptFinal => {
                handle_transcript(&state, session_id, tenant_id.as_deref(), &tx, envelope).await
            }
            other => {
                warn!(session_id = %session_id, event_type = %other, "unsupported event type");
                Ok(())
            }
        };
        if let Err(e) = result {
            match e {
                PipelineError::ConnectionClosed => {}
                other => error!(session_id = %session_id, error = %other, "pipeline error"),
            }
            break;
        }
    }

    state.hub.unregister(session_id, conn_id).await;
    writer.abort();
    info!(session_id = %session_id, "ws session ended");
}

async fn close_policy_violation(mut socket: WebSocket) {
    let _ = socket
        .send(Message::Close(Some(CloseFrame {
            code: close::POLICY_VIOLATION,
            reason: close::SESSION_NOT_FOUND.into(),
        })))
        .await;
}

/// The transcript ingress path: redact, append, fan out, synthesize rule
/// events, arm the guidance debounce, ack the originator.
async fn handle_transcript(
    state: &AppState,
    session_id: Uuid,
    tenant_id: Option<&str>,
    tx: &mpsc::UnboundedSender<EventEnvelope>,
    envelope: EventEnvelope,
) -> Result<(), PipelineError> {
    // Rules match against the plain text as spoken; only the stored and
    // fanned-out payload is redacted.
    let plain_text = TranscriptPayload::from_value(&envelope.payload)
        .text
        .unwrap_or_default();
    let redacted = redact_value(&envelope.payload, state.settings.pii_redaction_mode);

    let lock = state.hub.publish_lock(session_id).await;
    let publish = lock.lock().await;

    let outcome = match append_event(
        &state.pool,
        session_id,
        envelope.event_id,
        envelope.event_type.as_str(),
        &redacted,
    )
    .await
    {
        Ok(outcome) => outcome,
        Err(AppendError::SessionCompleted | AppendError::SessionNotFound) => {
            warn!(
                session_id = %session_id,
                event_id = %envelope.event_id,
                "append rejected: session no longer accepts events"
            );
            return Ok(());
        }
        Err(fatal) => return Err(fatal.into()),
    };
    let assigned_seq = outcome.server_seq();

    if let AppendOutcome::Inserted(seq) = outcome {
        let outbound = EventEnvelope {
            session_id,
            payload: redacted.clone(),
            server_seq: Some(seq),
            ..envelope.clone()
        };
        state.hub.fanout(session_id, &outbound).await;

        let rule_events =
            evaluate_segment(&state.pool, session_id, tenant_id, &plain_text).await?;
        info!(session_id = %session_id, count = rule_events.len(), "rules evaluated");
        for rule_event in rule_events {
            match append_event(
                &state.pool,
                session_id,
                rule_event.event_id,
                rule_event.event_type.as_str(),
                &rule_event.payload,
            )
            .await
            {
                Ok(outcome) => {
                    let outbound = rule_event.with_server_seq(outcome.server_seq());
                    state.hub.fanout(session_id, &outbound).await;
                }
                Err(AppendError::SessionCompleted | AppendError::SessionNotFound) => {
                    warn!(session_id = %session_id, "rule event append rejected");
                    break;
                }
                Err(fatal) => return Err(fatal.into()),
            }
        }
    }
    drop(publish);

    if matches!(outcome, AppendOutcome::Inserted(_)) {
        guidance::schedule(state, session_id).await;
    }

    let ack = EventEnvelope {
        event_id: envelope.event_id,
        session_id,
        event_type: EventType::Ack,
        ts_created: chrono::Utc::now(),
        schema_version: ca_protocol::SCHEMA_VERSION.to_owned(),
        payload: serde_json::to_value(AckPayload { acknowledged: true }).unwrap_or_default(),
        client_seq: envelope.client_seq,
        server_seq: Some(assigned_seq),
    };
    tx.send(ack).map_err(|_| PipelineError::ConnectionClosed)
}

/// Replay stored events above the client's cursor to this connection only.
async fn handle_resume(
    state: &AppState,
    session_id: Uuid,
    tx: &mpsc::UnboundedSender<EventEnvelope>,
    envelope: &EventEnvelope,
) -> Result<(), PipelineError> {
    let Some(cursor) = envelope
        .payload
        .get("last_server_seq")
        .and_then(serde_json::Value::as_i64)
    else {
        warn!(
            session_id = %session_id,
            payload = %envelope.payload,
            "resume payload missing integer last_server_seq"
        );
        return Ok(());
    };

    let rows = fetch_events_after(&state.pool, session_id, cursor).await?;
    for row in rows {
        let event_type = match row.event_type.parse::<EventType>() {
            Ok(event_type) => event_type,
            Err(e) => {
                warn!(session_id = %session_id, error = %e, "skipping stored event of unknown type");
                continue;
            }
        };
        let replay = EventEnvelope {
            event_id: row.event_id,
            session_id,
            event_type,
            ts_created: row.created_at,
            schema_version: ca_protocol::SCHEMA_VERSION.to_owned(),
            payload: row.payload.0,
            client_seq: None,
            server_seq: Some(row.server_seq),
        };
        // Mid-replay send failure: abort without retrying; the client
        // reissues resume on reconnect.
        if tx.send(replay).is_err() {
            return Err(PipelineError::ConnectionClosed);
        }
    }
    Ok(())
}
