// ca-test-utils: Shared test utilities for the call-assistant suite.
//
// Provides a WebSocket client for driving the session endpoint and a mock
// chat-completions server so guidance/summary paths can run without the
// real LLM transport.

pub mod mock_llm_server;
pub mod mock_ws_client;

pub use mock_llm_server::MockLlmServer;
pub use mock_ws_client::MockWsClient;
