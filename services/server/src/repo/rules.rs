use serde_json::Value;
use sqlx::types::Json;
use sqlx::PgPool;
use uuid::Uuid;

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct RuleRow {
    pub id: Uuid,
    pub kind: String,
    pub config: Json<Value>,
}

/// Enabled rules of active rulesets whose scope is global (no tenant tag)
/// or matches the session's tenant. Sessions without a tenant tag only see
/// global rulesets. Matching on the remaining scope tags is reserved.
pub async fn load_active_rules(
    pool: &PgPool,
    tenant_id: Option<&str>,
) -> Result<Vec<RuleRow>, sqlx::Error> {
    sqlx::query_as::<_, RuleRow>(
        r#"SELECT r.id, r.kind, r.config
           FROM rules r
           JOIN rulesets rs ON rs.id = r.ruleset_id
           WHERE r.enabled
             AND rs.status = 'active'
             AND (rs.tenant_id IS NULL OR rs.tenant_id = $1)
           ORDER BY r.id"#,
    )
    .bind(tenant_id)
    .fetch_all(pool)
    .await
}
