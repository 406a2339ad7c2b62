//! Session CRUD surface, health probe, and trace-id propagation.

mod common;

use common::spawn_app;
use serde_json::{json, Value};

#[tokio::test]
async fn create_and_fetch_session_round_trip() {
    let app = spawn_app().await;
    let http = reqwest::Client::new();

    let created = http
        .post(app.http_url("/sessions"))
        .json(&json!({ "tenant_id": "tenant-a", "campaign_id": "spring-tuneup" }))
        .send()
        .await
        .unwrap();
    assert_eq!(created.status(), 201);
    let created: Value = created.json().await.unwrap();
    assert_eq!(created["status"], "active");
    assert_eq!(created["tenant_id"], "tenant-a");
    assert_eq!(created["campaign_id"], "spring-tuneup");
    assert!(created["summary"].is_null());

    let session_id = created["id"].as_str().unwrap();
    let fetched: Value = http
        .get(app.http_url(&format!("/sessions/{session_id}")))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(fetched["id"], created["id"]);
    assert_eq!(fetched["tenant_id"], "tenant-a");
}

#[tokio::test]
async fn create_session_accepts_an_empty_scope() {
    let app = spawn_app().await;
    let created = reqwest::Client::new()
        .post(app.http_url("/sessions"))
        .json(&json!({}))
        .send()
        .await
        .unwrap();
    assert_eq!(created.status(), 201);
    let created: Value = created.json().await.unwrap();
    assert!(created["tenant_id"].is_null());
}

#[tokio::test]
async fn unknown_session_is_not_found() {
    let app = spawn_app().await;
    let response = reqwest::Client::new()
        .get(app.http_url(&format!("/sessions/{}", uuid::Uuid::new_v4())))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 404);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["code"], "NOT_FOUND");
}

#[tokio::test]
async fn health_reports_db_connectivity() {
    let app = spawn_app().await;
    let body: Value = reqwest::Client::new()
        .get(app.http_url("/health"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(body["status"], "ok");
    assert_eq!(body["db"], "connected");
}

#[tokio::test]
async fn trace_id_is_echoed_or_minted() {
    let app = spawn_app().await;
    let http = reqwest::Client::new();

    let echoed = http
        .get(app.http_url("/health"))
        .header("X-Trace-Id", "trace-123")
        .send()
        .await
        .unwrap();
    assert_eq!(
        echoed.headers().get("x-trace-id").unwrap().to_str().unwrap(),
        "trace-123"
    );

    let minted = http.get(app.http_url("/health")).send().await.unwrap();
    let minted_id = minted.headers().get("x-trace-id").unwrap().to_str().unwrap();
    assert!(minted_id.parse::<uuid::Uuid>().is_ok());
}
