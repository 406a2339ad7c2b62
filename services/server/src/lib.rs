pub mod config;
pub mod db;
pub mod guidance;
pub mod http;
pub mod hub;
pub mod llm;
pub mod redact;
pub mod repo;
pub mod rules;
pub mod state;
pub mod twilio;
pub mod ws_session;

pub use state::AppState;

use axum::http::HeaderValue;
use axum::routing::{get, post};
use axum::Router;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

pub fn build_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(HeaderValue::from_static("http://localhost:3000"))
        .allow_methods(tower_http::cors::AllowMethods::mirror_request())
        .allow_headers(tower_http::cors::AllowHeaders::mirror_request())
        .allow_credentials(true);

    Router::new()
        .route("/health", get(http::health::health))
        .route("/sessions", post(http::sessions::create_session))
        .route("/sessions/:session_id", get(http::sessions::get_session))
        .route("/sessions/:session_id/end", post(http::sessions::end_session))
        .route("/twilio/voice/inbound", post(http::twilio::voice_inbound))
        .route("/twilio/voice/status", post(http::twilio::voice_status))
        .route(
            "/twilio/session/:session_id",
            get(http::twilio::get_twilio_session),
        )
        .route("/ws/session/:session_id", get(ws_session::ws_session_handler))
        .layer(axum::middleware::from_fn(http::trace::propagate_trace_id))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}
