use axum::extract::State;
use axum::response::IntoResponse;
use axum::Json;

use crate::state::AppState;

pub async fn health(State(state): State<AppState>) -> impl IntoResponse {
    let db = match sqlx::query_scalar::<_, i32>("SELECT 1")
        .fetch_one(&state.pool)
        .await
    {
        Ok(_) => "connected",
        Err(_) => "disconnected",
    };
    let status = if db == "connected" { "ok" } else { "degraded" };
    Json(serde_json::json!({ "status": status, "db": db }))
}
