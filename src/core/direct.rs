//! Direct provider calls.
//!
//! One streaming chat-completion request straight to a provider, using the
//! user's credential. Two wire shapes cover every built-in provider:
//! OpenAI-compatible (`/chat/completions`, bearer auth) and Anthropic
//! (`/messages`, `x-api-key`).

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde_json::{Value, json};

use super::dispatch::{AttemptError, FailureKind, ResponseBody};
use super::http::{build_client, classify_status, classify_transport, retry_after};
use super::models::{ChatMessage, Role};
use super::provider::{ProviderDescriptor, WireFormat};
use crate::error::Result;

/// Anthropic API version header value.
pub const ANTHROPIC_VERSION: &str = "2023-06-01";

const ANTHROPIC_MAX_TOKENS: u32 = 4096;

/// Everything needed for one direct call.
#[derive(Clone, Copy)]
pub struct DirectCall<'a> {
    pub descriptor: &'a ProviderDescriptor,
    pub credential: &'a str,
    pub model: &'a str,
    pub messages: &'a [ChatMessage],
}

impl std::fmt::Debug for DirectCall<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DirectCall")
            .field("provider", &self.descriptor.id)
            .field("model", &self.model)
            .field("messages", &self.messages.len())
            .finish_non_exhaustive()
    }
}

/// Issues a single streaming chat call to a provider.
#[async_trait]
pub trait DirectClient: Send + Sync {
    async fn stream_chat(
        &self,
        call: DirectCall<'_>,
    ) -> std::result::Result<ResponseBody, AttemptError>;
}

/// HTTPS implementation of [`DirectClient`].
pub struct HttpDirectClient {
    client: Client,
}

impl HttpDirectClient {
    /// Create a client with a custom timeout.
    ///
    /// # Errors
    /// Returns an error if the HTTP client cannot be built.
    pub fn with_timeout(timeout: Duration) -> Result<Self> {
        Ok(Self {
            client: build_client(timeout)?,
        })
    }

    fn build_request(&self, call: &DirectCall<'_>) -> reqwest::RequestBuilder {
        let base = &call.descriptor.api_base;
        match call.descriptor.wire {
            WireFormat::OpenAiCompatible => self
                .client
                .post(format!("{base}/chat/completions"))
                .bearer_auth(call.credential)
                .json(&openai_body(call.model, call.messages)),
            WireFormat::Anthropic => self
                .client
                .post(format!("{base}/messages"))
                .header("x-api-key", call.credential)
                .header("anthropic-version", ANTHROPIC_VERSION)
                .json(&anthropic_body(call.model, call.messages)),
        }
    }
}

#[async_trait]
impl DirectClient for HttpDirectClient {
    async fn stream_chat(
        &self,
        call: DirectCall<'_>,
    ) -> std::result::Result<ResponseBody, AttemptError> {
        let provider = call.descriptor.id;
        tracing::debug!(%provider, model = call.model, "Calling provider directly");

        let response = self
            .build_request(&call)
            .send()
            .await
            .map_err(|e| AttemptError::new(classify_transport(&e), format!("{provider}: {e}")))?;

        let status = response.status();
        if status.is_success() {
            return Ok(ResponseBody::from_response(response));
        }

        let kind = classify_status(status);
        let wait = if kind == FailureKind::RateLimited {
            retry_after(response.headers())
        } else {
            None
        };
        Err(
            AttemptError::new(kind, format!("{provider} returned HTTP {status}"))
                .with_status(status.as_u16())
                .with_retry_after(wait),
        )
    }
}

fn role_name(role: Role) -> &'static str {
    match role {
        Role::System => "system",
        Role::User => "user",
        Role::Assistant => "assistant",
    }
}

fn openai_body(model: &str, messages: &[ChatMessage]) -> Value {
    let messages: Vec<Value> = messages
        .iter()
        .map(|m| json!({ "role": role_name(m.role), "content": m.content }))
        .collect();
    json!({
        "model": model,
        "messages": messages,
        "stream": true,
    })
}

fn anthropic_body(model: &str, messages: &[ChatMessage]) -> Value {
    let system = messages
        .iter()
        .filter(|m| m.role == Role::System)
        .map(|m| m.content.as_str())
        .collect::<Vec<_>>()
        .join("\n\n");

    let conversation: Vec<Value> = messages
        .iter()
        .filter(|m| m.role != Role::System)
        .map(|m| json!({ "role": role_name(m.role), "content": m.content }))
        .collect();

    let mut body = json!({
        "model": model,
        "messages": conversation,
        "max_tokens": ANTHROPIC_MAX_TOKENS,
        "stream": true,
    });
    if !system.is_empty() {
        body["system"] = Value::String(system);
    }
    body
}

/// Pull the assistant text out of a streamed body.
///
/// Understands OpenAI-style and Anthropic-style server-sent events. Bodies
/// that are not SSE are returned unchanged.
#[must_use]
pub fn stream_text(raw: &str) -> String {
    let mut saw_events = false;
    let mut text = String::new();

    for line in raw.lines() {
        let Some(data) = line.trim().strip_prefix("data:") else {
            continue;
        };
        saw_events = true;
        let data = data.trim();
        if data.is_empty() || data == "[DONE]" {
            continue;
        }
        let Ok(event) = serde_json::from_str::<Value>(data) else {
            continue;
        };

        let openai = event
            .pointer("/choices/0/delta/content")
            .and_then(Value::as_str);
        let anthropic = (event.get("type").and_then(Value::as_str) == Some("content_block_delta"))
            .then(|| event.pointer("/delta/text").and_then(Value::as_str))
            .flatten();
        if let Some(piece) = openai.or(anthropic) {
            text.push_str(piece);
        }
    }

    if saw_events { text } else { raw.to_string() }
}
