use chrono::{DateTime, Utc};
use sqlx::PgPool;
use uuid::Uuid;

/// Scope tags supplied at session creation; all optional.
#[derive(Debug, Clone, Default, serde::Deserialize)]
pub struct SessionScope {
    pub tenant_id: Option<String>,
    pub org_id: Option<String>,
    pub location_id: Option<String>,
    pub campaign_id: Option<String>,
}

#[derive(Debug, Clone, serde::Serialize, sqlx::FromRow)]
pub struct SessionRow {
    pub id: Uuid,
    pub created_at: DateTime<Utc>,
    pub status: String,
    pub tenant_id: Option<String>,
    pub org_id: Option<String>,
    pub location_id: Option<String>,
    pub campaign_id: Option<String>,
    pub ended_at: Option<DateTime<Utc>>,
    pub summary: Option<String>,
    pub disposition: Option<String>,
}

const SESSION_COLUMNS: &str = "id, created_at, status, tenant_id, org_id, location_id, \
                               campaign_id, ended_at, summary, disposition";

pub async fn create_session(pool: &PgPool, scope: &SessionScope) -> Result<SessionRow, sqlx::Error> {
    sqlx::query_as::<_, SessionRow>(&format!(
        r#"INSERT INTO call_sessions (id, tenant_id, org_id, location_id, campaign_id)
           VALUES ($1, $2, $3, $4, $5)
           RETURNING {SESSION_COLUMNS}"#
    ))
    .bind(Uuid::new_v4())
    .bind(scope.tenant_id.as_deref())
    .bind(scope.org_id.as_deref())
    .bind(scope.location_id.as_deref())
    .bind(scope.campaign_id.as_deref())
    .fetch_one(pool)
    .await
}

pub async fn fetch_session(pool: &PgPool, session_id: Uuid) -> Result<Option<SessionRow>, sqlx::Error> {
    sqlx::query_as::<_, SessionRow>(&format!(
        "SELECT {SESSION_COLUMNS} FROM call_sessions WHERE id = $1"
    ))
    .bind(session_id)
    .fetch_optional(pool)
    .await
}

/// The active → completed transition. The `status = 'active'` guard makes
/// the transition (and the summary/disposition write) happen exactly once;
/// a lost race returns `None` and the caller re-reads the winner's values.
pub async fn complete_session(
    pool: &PgPool,
    session_id: Uuid,
    summary: &str,
    disposition: &str,
) -> Result<Option<SessionRow>, sqlx::Error> {
    sqlx::query_as::<_, SessionRow>(&format!(
        r#"UPDATE call_sessions
           SET status = 'completed', ended_at = now(), summary = $2, disposition = $3
           WHERE id = $1 AND status = 'active'
           RETURNING {SESSION_COLUMNS}"#
    ))
    .bind(session_id)
    .bind(summary)
    .bind(disposition)
    .fetch_optional(pool)
    .await
}
