//! Debounced guidance: rapid segments coalesce into one LLM call whose
//! output lands in the log and reaches every subscriber.

mod common;

use std::time::{Duration, Instant};

use ca_protocol::EventType;
use ca_test_utils::{MockLlmServer, MockWsClient};
use common::{spawn_app_with, transcript_segment};
use serde_json::json;

#[tokio::test]
async fn rapid_segments_produce_exactly_one_guidance_update() {
    let guidance = json!({
        "suggested_reply": "Offer the next available appointment.",
        "rationale": "Customer asked about scheduling.",
        "confidence": 0.9,
    });
    let llm = MockLlmServer::start(MockLlmServer::completion(&guidance))
        .await
        .unwrap();
    let base_url = llm.base_url();
    let app = spawn_app_with(|settings| {
        settings.openrouter_base_url = base_url;
        settings.llm_primary_model = "test-model".to_owned();
    })
    .await;
    let session_id = app.insert_session().await;

    let mut speaker = MockWsClient::connect(&app.ws_url(session_id)).await.unwrap();
    let mut observer = MockWsClient::connect(&app.ws_url(session_id)).await.unwrap();

    for (i, text) in ["when can you come", "tomorrow works", "morning preferred"]
        .iter()
        .enumerate()
    {
        let i = i as i64 + 1;
        speaker
            .send_envelope(&transcript_segment(session_id, text, i))
            .await
            .unwrap();
        // fanout + ack
        speaker.recv_envelope().await.unwrap();
        speaker.recv_envelope().await.unwrap();
        // drain the observer's copy
        let fanned = observer.recv_envelope().await.unwrap();
        assert_eq!(fanned.server_seq, Some(i));
        tokio::time::sleep(Duration::from_millis(100)).await;
    }
    let last_segment_at = Instant::now();

    let update = tokio::time::timeout(Duration::from_secs(10), observer.recv_envelope())
        .await
        .expect("guidance update should arrive")
        .unwrap();
    assert!(
        last_segment_at.elapsed() >= Duration::from_millis(1400),
        "guidance fired before the debounce window elapsed"
    );
    assert_eq!(update.event_type, EventType::GuidanceUpdate);
    assert_eq!(update.server_seq, Some(4));
    assert_eq!(
        update.payload["suggested_reply"],
        "Offer the next available appointment."
    );
    assert_eq!(update.payload["confidence"], 0.9);

    // Three debounced triggers, one model call.
    assert_eq!(llm.calls(), 1);
    assert_eq!(app.event_count(session_id).await, 4);

    // Nothing else follows.
    let extra = tokio::time::timeout(Duration::from_secs(2), observer.recv_envelope()).await;
    assert!(extra.is_err(), "exactly one guidance update expected");
}

#[tokio::test]
async fn llm_failure_leaves_the_session_pipeline_untouched() {
    // A mock that answers garbage: schema validation fails, guidance is
    // dropped, and the transcript path keeps working.
    let llm = MockLlmServer::start(json!({ "choices": [] })).await.unwrap();
    let base_url = llm.base_url();
    let app = spawn_app_with(|settings| {
        settings.openrouter_base_url = base_url;
        settings.llm_primary_model = "test-model".to_owned();
    })
    .await;
    let session_id = app.insert_session().await;

    let mut client = MockWsClient::connect(&app.ws_url(session_id)).await.unwrap();
    client
        .send_envelope(&transcript_segment(session_id, "hello?", 1))
        .await
        .unwrap();
    client.recv_envelope().await.unwrap();
    client.recv_envelope().await.unwrap();

    tokio::time::sleep(Duration::from_millis(2000)).await;
    assert!(llm.calls() >= 1, "guidance job should have fired");
    assert_eq!(app.event_count(session_id).await, 1);

    // Still ingesting fine afterwards.
    let segment = transcript_segment(session_id, "are you there?", 2);
    client.send_envelope(&segment).await.unwrap();
    let fanned = client.recv_envelope().await.unwrap();
    assert_eq!(fanned.server_seq, Some(2));
}
