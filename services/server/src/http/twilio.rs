//! Carrier webhook endpoints.

use std::collections::BTreeMap;

use axum::extract::{Path, State};
use axum::http::{header, HeaderMap, StatusCode, Uri};
use axum::response::{IntoResponse, Response};
use axum::{Form, Json};
use tracing::info;
use uuid::Uuid;

use crate::http::response::{forbidden, internal_error, not_found};
use crate::repo::sessions::{create_session, fetch_session, SessionScope};
use crate::state::AppState;
use crate::twilio::{build_stream_twiml, SignatureValidator};

const SIGNATURE_HEADER: &str = "x-twilio-signature";

/// Inbound-call webhook: verify the carrier signature, allocate a session,
/// and answer with markup pointing the media stream at the session socket.
pub async fn voice_inbound(
    State(state): State<AppState>,
    headers: HeaderMap,
    uri: Uri,
    Form(form): Form<BTreeMap<String, String>>,
) -> Response {
    let signature = headers
        .get(SIGNATURE_HEADER)
        .and_then(|value| value.to_str().ok());
    let validator = SignatureValidator::new(&state.settings.twilio_auth_token);
    if !validator.validate(&request_url(&headers, &uri), &form, signature) {
        return forbidden("Invalid Twilio signature");
    }

    let session = match create_session(&state.pool, &SessionScope::default()).await {
        Ok(session) => session,
        Err(e) => return internal_error(e),
    };

    let base = state.settings.twilio_stream_ws_base_url.trim_end_matches('/');
    let stream_url = format!(
        "{base}/ws/session/{id}?source=twilio&session_id={id}",
        id = session.id
    );
    let twiml = build_stream_twiml(&stream_url, &session.id.to_string());

    info!(
        session_id = %session.id,
        call_sid = form.get("CallSid").map_or("", String::as_str),
        from_number = form.get("From").map_or("", String::as_str),
        "twilio inbound call connected"
    );
    (
        StatusCode::OK,
        [(header::CONTENT_TYPE, "application/xml")],
        twiml,
    )
        .into_response()
}

/// Status callback: acknowledged with 200, logged for operations.
pub async fn voice_status(Form(form): Form<BTreeMap<String, String>>) -> Response {
    info!(
        call_sid = form.get("CallSid").map_or("", String::as_str),
        call_status = form.get("CallStatus").map_or("", String::as_str),
        "twilio voice status"
    );
    Json(serde_json::json!({ "ok": true })).into_response()
}

pub async fn get_twilio_session(
    State(state): State<AppState>,
    Path(session_id): Path<Uuid>,
) -> Response {
    match fetch_session(&state.pool, session_id).await {
        Ok(Some(session)) => Json(session).into_response(),
        Ok(None) => not_found("Session not found"),
        Err(e) => internal_error(e),
    }
}

/// Reconstruct the externally visible request URL, the string the carrier
/// signed. Honors `X-Forwarded-Proto` when the service sits behind a proxy.
fn request_url(headers: &HeaderMap, uri: &Uri) -> String {
    let proto = headers
        .get("x-forwarded-proto")
        .and_then(|value| value.to_str().ok())
        .unwrap_or("http");
    let host = headers
        .get(header::HOST)
        .and_then(|value| value.to_str().ok())
        .unwrap_or("localhost");
    format!("{proto}://{host}{uri}")
}
