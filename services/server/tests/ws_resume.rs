//! Cursor-based replay after reconnect.

mod common;

use std::time::Duration;

use ca_protocol::EventType;
use ca_test_utils::MockWsClient;
use common::{resume_request, spawn_app, transcript_segment};
use serde_json::json;

#[tokio::test]
async fn resume_replays_everything_after_the_cursor_in_order() {
    let app = spawn_app().await;
    let session_id = app.insert_session().await;

    // Client A observes through seq 5, then drops.
    let mut client_a = MockWsClient::connect(&app.ws_url(session_id)).await.unwrap();
    for i in 1..=5 {
        client_a
            .send_envelope(&transcript_segment(session_id, &format!("line {i}"), i))
            .await
            .unwrap();
        let fanned = client_a.recv_envelope().await.unwrap();
        assert_eq!(fanned.server_seq, Some(i));
        let ack = client_a.recv_envelope().await.unwrap();
        assert_eq!(ack.event_type, EventType::Ack);
    }
    client_a.close().await.unwrap();

    // During the gap, another connection stores events 6..=9.
    let mut client_b = MockWsClient::connect(&app.ws_url(session_id)).await.unwrap();
    for i in 6..=9 {
        client_b
            .send_envelope(&transcript_segment(session_id, &format!("line {i}"), i))
            .await
            .unwrap();
        client_b.recv_envelope().await.unwrap();
        client_b.recv_envelope().await.unwrap();
    }

    // A reconnects and resumes from its cursor.
    let mut client_a = MockWsClient::connect(&app.ws_url(session_id)).await.unwrap();
    client_a
        .send_envelope(&resume_request(session_id, json!(5)))
        .await
        .unwrap();
    for expected_seq in 6..=9 {
        let replayed = tokio::time::timeout(Duration::from_secs(5), client_a.recv_envelope())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(replayed.event_type, EventType::TranscriptSegment);
        assert_eq!(replayed.server_seq, Some(expected_seq));
        assert_eq!(replayed.payload["text"], format!("line {expected_seq}"));
    }

    // No ack is emitted for the resume; the next inbound transcript picks
    // up the sequence at 10.
    let segment = transcript_segment(session_id, "line 10", 10);
    client_a.send_envelope(&segment).await.unwrap();
    let fanned = client_a.recv_envelope().await.unwrap();
    assert_eq!(fanned.event_id, segment.event_id);
    assert_eq!(fanned.server_seq, Some(10));
    let ack = client_a.recv_envelope().await.unwrap();
    assert_eq!(ack.event_type, EventType::Ack);
    assert_eq!(ack.server_seq, Some(10));
}

#[tokio::test]
async fn resume_with_non_integer_cursor_is_ignored() {
    let app = spawn_app().await;
    let session_id = app.insert_session().await;

    let mut client = MockWsClient::connect(&app.ws_url(session_id)).await.unwrap();
    client
        .send_envelope(&resume_request(session_id, json!("five")))
        .await
        .unwrap();

    // No replay and no ack, but the connection is preserved.
    let segment = transcript_segment(session_id, "after bad resume", 1);
    client.send_envelope(&segment).await.unwrap();
    let fanned = tokio::time::timeout(Duration::from_secs(5), client.recv_envelope())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(fanned.event_id, segment.event_id);
    assert_eq!(fanned.server_seq, Some(1));
}

#[tokio::test]
async fn resume_from_zero_replays_the_full_log() {
    let app = spawn_app().await;
    let session_id = app.insert_session().await;

    let mut writer = MockWsClient::connect(&app.ws_url(session_id)).await.unwrap();
    for i in 1..=3 {
        writer
            .send_envelope(&transcript_segment(session_id, &format!("line {i}"), i))
            .await
            .unwrap();
        writer.recv_envelope().await.unwrap();
        writer.recv_envelope().await.unwrap();
    }

    let mut reader = MockWsClient::connect(&app.ws_url(session_id)).await.unwrap();
    reader
        .send_envelope(&resume_request(session_id, json!(0)))
        .await
        .unwrap();
    for expected_seq in 1..=3 {
        let replayed = reader.recv_envelope().await.unwrap();
        assert_eq!(replayed.server_seq, Some(expected_seq));
    }
}
