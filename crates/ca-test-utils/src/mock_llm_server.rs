// mock_llm_server: A canned chat-completions endpoint for integration tests.
//
// Binds to a random port and answers POST /api/v1/chat/completions with a
// fixed response body, counting invocations so tests can assert that a code
// path did (or did not) reach the LLM.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use axum::extract::State;
use axum::routing::post;
use axum::{Json, Router};
use serde_json::Value;
use tokio::net::TcpListener;

#[derive(Clone)]
struct MockState {
    response: Value,
    calls: Arc<AtomicUsize>,
}

pub struct MockLlmServer {
    addr: SocketAddr,
    calls: Arc<AtomicUsize>,
    /// Handle to the background serve loop; dropped when the server is dropped.
    _task: tokio::task::JoinHandle<()>,
}

impl MockLlmServer {
    /// Start the mock server answering every completion request with
    /// `response` (a full chat-completions response body).
    pub async fn start(response: Value) -> Result<Self, Box<dyn std::error::Error>> {
        let calls = Arc::new(AtomicUsize::new(0));
        let state = MockState {
            response,
            calls: calls.clone(),
        };
        let app = Router::new()
            .route("/api/v1/chat/completions", post(completions))
            .with_state(state);
        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let addr = listener.local_addr()?;
        let task = tokio::spawn(async move {
            let _ = axum::serve(listener, app).await;
        });
        Ok(Self {
            addr,
            calls,
            _task: task,
        })
    }

    /// Base URL to point the LLM client at (stands in for the OpenRouter
    /// `/api/v1` prefix).
    pub fn base_url(&self) -> String {
        format!("http://{}/api/v1", self.addr)
    }

    /// Number of completion requests served so far.
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Build a chat-completions response whose message content is the JSON
    /// serialization of `content`, the shape a structured-output model call
    /// returns.
    pub fn completion(content: &Value) -> Value {
        serde_json::json!({
            "id": "cmpl-mock",
            "choices": [
                { "index": 0, "message": { "role": "assistant", "content": content.to_string() } }
            ]
        })
    }
}

async fn completions(State(state): State<MockState>) -> Json<Value> {
    state.calls.fetch_add(1, Ordering::SeqCst);
    Json(state.response.clone())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    // Minimal raw-socket POST so the crate does not pull in an HTTP client
    // just for this test.
    async fn post_empty_json(addr: SocketAddr) -> Value {
        let mut stream = tokio::net::TcpStream::connect(addr).await.unwrap();
        let request = format!(
            "POST /api/v1/chat/completions HTTP/1.1\r\nHost: {addr}\r\nContent-Length: 2\r\nContent-Type: application/json\r\nConnection: close\r\n\r\n{{}}"
        );
        stream.write_all(request.as_bytes()).await.unwrap();
        let mut response = Vec::new();
        stream.read_to_end(&mut response).await.unwrap();
        let response = String::from_utf8(response).unwrap();
        let body = response.split("\r\n\r\n").nth(1).unwrap();
        serde_json::from_str(body).unwrap()
    }

    #[tokio::test]
    async fn mock_server_counts_calls_and_serves_canned_body() {
        let content = serde_json::json!({"summary": "- ok", "disposition": "Lead"});
        let server = MockLlmServer::start(MockLlmServer::completion(&content))
            .await
            .unwrap();
        assert_eq!(server.calls(), 0);

        let body = post_empty_json(server.addr).await;
        assert_eq!(server.calls(), 1);
        let text = body["choices"][0]["message"]["content"].as_str().unwrap();
        let parsed: Value = serde_json::from_str(text).unwrap();
        assert_eq!(parsed["disposition"], "Lead");
    }
}
