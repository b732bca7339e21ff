//! Mock backends and courier wiring for integration tests.

use std::sync::Arc;
use std::time::Duration;

use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use courier::core::provider::ProviderId;
use courier::core::service::{Courier, CourierSettings};
use courier::storage::kv::{KvStore, MemoryKvStore};

pub const GROQ_KEY: &str = "gsk_test_0123456789";
pub const OPENAI_KEY: &str = "sk-test-0123456789";
pub const ANTHROPIC_KEY: &str = "sk-ant-test-0123456789";

pub const SHARED_CHAT_PATH: &str = "/api/chat";
pub const SHARED_HEALTH_PATH: &str = "/api/health";

// =============================================================================
// Provider bodies
// =============================================================================

/// OpenAI-compatible SSE body streaming `parts`.
#[must_use]
pub fn openai_sse(parts: &[&str]) -> String {
    let mut body = String::new();
    for part in parts {
        let chunk = serde_json::json!({ "choices": [{ "delta": { "content": part } }] });
        body.push_str(&format!("data: {chunk}\n\n"));
    }
    body.push_str("data: [DONE]\n\n");
    body
}

/// Anthropic SSE body streaming `parts`.
#[must_use]
pub fn anthropic_sse(parts: &[&str]) -> String {
    let mut body = String::from("event: message_start\ndata: {\"type\":\"message_start\"}\n\n");
    for part in parts {
        let chunk = serde_json::json!({
            "type": "content_block_delta",
            "delta": { "type": "text_delta", "text": part },
        });
        body.push_str(&format!("event: content_block_delta\ndata: {chunk}\n\n"));
    }
    body.push_str("event: message_stop\ndata: {\"type\":\"message_stop\"}\n\n");
    body
}

#[must_use]
pub fn sse_response(body: String) -> ResponseTemplate {
    ResponseTemplate::new(200)
        .insert_header("content-type", "text/event-stream")
        .set_body_string(body)
}

// =============================================================================
// Mock mounting
// =============================================================================

/// Health endpoint answering `status`.
pub async fn mount_health(server: &MockServer, status: u16) {
    Mock::given(method("GET"))
        .and(path(SHARED_HEALTH_PATH))
        .respond_with(ResponseTemplate::new(status))
        .mount(server)
        .await;
}

/// Shared chat endpoint answering `status` with `body`.
pub async fn mount_shared_chat(server: &MockServer, status: u16, body: &str) {
    Mock::given(method("POST"))
        .and(path(SHARED_CHAT_PATH))
        .respond_with(ResponseTemplate::new(status).set_body_string(body))
        .mount(server)
        .await;
}

/// OpenAI-compatible completion endpoint streaming `parts`.
pub async fn mount_openai_stream(server: &MockServer, parts: &[&str]) {
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(sse_response(openai_sse(parts)))
        .mount(server)
        .await;
}

// =============================================================================
// Courier wiring
// =============================================================================

/// Settings with short timeouts pointed at `shared_url`.
#[must_use]
pub fn test_settings(shared_url: &str) -> CourierSettings {
    CourierSettings {
        probe_timeout: Duration::from_millis(500),
        shared_timeout: Duration::from_secs(2),
        direct_timeout: Duration::from_secs(2),
        ..CourierSettings::default().with_shared_url(shared_url)
    }
}

/// An address nothing listens on.
#[must_use]
pub fn dead_url() -> String {
    "http://127.0.0.1:9".to_string()
}

/// Courier over a fresh in-memory store.
#[must_use]
pub fn build_courier(settings: &CourierSettings) -> Arc<Courier> {
    courier_with_kv(Arc::new(MemoryKvStore::new()), settings)
}

/// Courier over an existing store.
#[must_use]
pub fn courier_with_kv(kv: Arc<dyn KvStore>, settings: &CourierSettings) -> Arc<Courier> {
    Arc::new(Courier::open(kv, settings).expect("courier should build"))
}

/// Settings that route `provider` direct calls to `server`.
#[must_use]
pub fn with_provider_mock(
    settings: CourierSettings,
    provider: ProviderId,
    server: &MockServer,
) -> CourierSettings {
    settings.with_api_base(provider, server.uri())
}
