//! The per-session event log.
//!
//! Appends run inside one transaction under `pg_advisory_xact_lock` keyed
//! by the session id, so the max-read + insert + commit sequence is
//! serialized per session and the lock can never outlive a cancelled task.
//! `server_seq` starts at 1 and is dense; it is always computed under the
//! lock, never pre-assigned.

use chrono::{DateTime, Utc};
use serde_json::Value;
use sqlx::types::Json;
use sqlx::PgPool;
use uuid::Uuid;

/// Result of an append: either a fresh row or a replay of an event_id the
/// session has already stored. Both carry the authoritative `server_seq`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppendOutcome {
    Inserted(i64),
    Duplicate(i64),
}

impl AppendOutcome {
    pub fn server_seq(self) -> i64 {
        match self {
            Self::Inserted(seq) | Self::Duplicate(seq) => seq,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum AppendError {
    #[error("session not found")]
    SessionNotFound,
    #[error("session is completed")]
    SessionCompleted,
    #[error(transparent)]
    Db(#[from] sqlx::Error),
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct EventRow {
    pub event_id: Uuid,
    pub server_seq: i64,
    #[sqlx(rename = "type")]
    pub event_type: String,
    pub payload: Json<Value>,
    pub created_at: DateTime<Utc>,
}

/// Derive a signed 63-bit advisory-lock key from the session UUID.
fn advisory_lock_key(session_id: Uuid) -> i64 {
    let (hi, lo) = session_id.as_u64_pair();
    ((hi ^ lo) & 0x7fff_ffff_ffff_ffff) as i64
}

fn is_duplicate_event(err: &sqlx::Error) -> bool {
    err.as_database_error().and_then(|db| db.constraint()) == Some("uq_session_event")
}

/// Append an event and return its `server_seq`.
///
/// A retry bearing an event_id the session already stored returns the
/// previously assigned sequence without inserting a second row. Appends to
/// unknown or completed sessions are rejected.
pub async fn append_event(
    pool: &PgPool,
    session_id: Uuid,
    event_id: Uuid,
    event_type: &str,
    payload: &Value,
) -> Result<AppendOutcome, AppendError> {
    let mut tx = pool.begin().await?;
    sqlx::query("SELECT pg_advisory_xact_lock($1)")
        .bind(advisory_lock_key(session_id))
        .execute(&mut *tx)
        .await?;

    let status: Option<String> = sqlx::query_scalar("SELECT status FROM call_sessions WHERE id = $1")
        .bind(session_id)
        .fetch_optional(&mut *tx)
        .await?;
    match status.as_deref() {
        Some("active") => {}
        Some(_) => return Err(AppendError::SessionCompleted),
        None => return Err(AppendError::SessionNotFound),
    }

    let max_seq: Option<i64> =
        sqlx::query_scalar("SELECT MAX(server_seq) FROM call_events WHERE session_id = $1")
            .bind(session_id)
            .fetch_one(&mut *tx)
            .await?;
    let next_seq = max_seq.unwrap_or(0) + 1;

    let inserted = sqlx::query(
        r#"INSERT INTO call_events (id, session_id, event_id, server_seq, type, payload)
           VALUES ($1, $2, $3, $4, $5, $6)"#,
    )
    .bind(Uuid::new_v4())
    .bind(session_id)
    .bind(event_id)
    .bind(next_seq)
    .bind(event_type)
    .bind(Json(payload))
    .execute(&mut *tx)
    .await;

    match inserted {
        Ok(_) => {
            tx.commit().await?;
            Ok(AppendOutcome::Inserted(next_seq))
        }
        Err(err) if is_duplicate_event(&err) => {
            // A concurrent retry won the race; surface its sequence.
            tx.rollback().await?;
            let existing: Option<i64> = sqlx::query_scalar(
                "SELECT server_seq FROM call_events WHERE session_id = $1 AND event_id = $2",
            )
            .bind(session_id)
            .bind(event_id)
            .fetch_optional(pool)
            .await?;
            match existing {
                Some(seq) => Ok(AppendOutcome::Duplicate(seq)),
                None => Err(err.into()),
            }
        }
        Err(err) => Err(err.into()),
    }
}

/// Events with `server_seq > cursor`, ascending. The replay source for
/// `client.resume`.
pub async fn fetch_events_after(
    pool: &PgPool,
    session_id: Uuid,
    cursor: i64,
) -> Result<Vec<EventRow>, sqlx::Error> {
    sqlx::query_as::<_, EventRow>(
        r#"SELECT event_id, server_seq, type, payload, created_at
           FROM call_events
           WHERE session_id = $1 AND server_seq > $2
           ORDER BY server_seq ASC"#,
    )
    .bind(session_id)
    .bind(cursor)
    .fetch_all(pool)
    .await
}

/// The most recent `limit` transcript segments, returned in ascending
/// server_seq order. The guidance context window.
pub async fn fetch_recent_transcript_segments(
    pool: &PgPool,
    session_id: Uuid,
    limit: i64,
) -> Result<Vec<EventRow>, sqlx::Error> {
    let mut rows = sqlx::query_as::<_, EventRow>(
        r#"SELECT event_id, server_seq, type, payload, created_at
           FROM call_events
           WHERE session_id = $1 AND type = 'client.transcript_segment'
           ORDER BY server_seq DESC
           LIMIT $2"#,
    )
    .bind(session_id)
    .bind(limit)
    .fetch_all(pool)
    .await?;
    rows.reverse();
    Ok(rows)
}

/// Every transcript event (segments and finals) ascending. The end-of-call
/// summary source.
pub async fn fetch_transcript_events(
    pool: &PgPool,
    session_id: Uuid,
) -> Result<Vec<EventRow>, sqlx::Error> {
    sqlx::query_as::<_, EventRow>(
        r#"SELECT event_id, server_seq, type, payload, created_at
           FROM call_events
           WHERE session_id = $1
             AND type IN ('client.transcript_segment', 'client.transcript_final')
           ORDER BY server_seq ASC"#,
    )
    .bind(session_id)
    .fetch_all(pool)
    .await
}
