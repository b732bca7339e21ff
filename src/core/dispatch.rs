//! Request dispatch.
//!
//! A [`Dispatcher`] asks the mode resolver which path to start on, then makes
//! at most one attempt per path: the shared backend when it passed its
//! health check, then a direct provider call when the preference allows it.
//! Expected failures come back as a [`DispatchOutcome`] value with the full
//! attempt history; retrying is the offline queue's job.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::stream::{self, BoxStream};
use futures::{StreamExt, TryStreamExt};
use reqwest::Client;
use serde::Serialize;

use super::direct::{DirectCall, DirectClient};
use super::http::{SHARED_TIMEOUT, build_client, classify_shared_status, join_url, retry_after};
use super::mode::{
    DispatchPath, ModeStore, ResolveInput, RouteHints, choose_model, resolve, select_direct,
};
use super::models::ChatRequest;
use super::network::NetworkStatus;
use super::provider::{ProviderDescriptor, ProviderDirectory, ProviderId};
use super::reachability::ReachabilityProber;
use crate::error::{CourierError, Result};
use crate::storage::credentials::{CredentialStatus, CredentialStore};

/// Chat endpoint path on the shared backend.
pub const CHAT_PATH: &str = "/api/chat";

// =============================================================================
// Failure classification
// =============================================================================

/// Stable classification of a failed attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// Shared backend down or answering non-2xx.
    Unreachable,
    /// No credential stored for the provider.
    NoCredential,
    /// Stored credential fails the provider's prefix rule.
    InvalidCredentialFormat,
    /// HTTP 429.
    RateLimited,
    /// HTTP 401/403.
    AuthRejected,
    /// Connect failure or timeout.
    NetworkError,
    /// Provider answered 5xx.
    Unavailable,
    Unknown,
}

impl FailureKind {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Unreachable => "unreachable",
            Self::NoCredential => "no_credential",
            Self::InvalidCredentialFormat => "invalid_credential_format",
            Self::RateLimited => "rate_limited",
            Self::AuthRejected => "auth_rejected",
            Self::NetworkError => "network_error",
            Self::Unavailable => "unavailable",
            Self::Unknown => "unknown",
        }
    }

    /// Needs user action; replaying later will not help.
    #[must_use]
    pub const fn is_configuration(self) -> bool {
        matches!(
            self,
            Self::NoCredential | Self::InvalidCredentialFormat | Self::AuthRejected
        )
    }
}

impl std::fmt::Display for FailureKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A failed attempt as seen at the call site.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttemptError {
    pub kind: FailureKind,
    pub status: Option<u16>,
    pub retry_after: Option<Duration>,
    pub message: String,
}

impl AttemptError {
    #[must_use]
    pub fn new(kind: FailureKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            status: None,
            retry_after: None,
            message: message.into(),
        }
    }

    #[must_use]
    pub const fn with_status(mut self, status: u16) -> Self {
        self.status = Some(status);
        self
    }

    #[must_use]
    pub const fn with_retry_after(mut self, retry_after: Option<Duration>) -> Self {
        self.retry_after = retry_after;
        self
    }
}

// =============================================================================
// Response body
// =============================================================================

/// Streamed response body handed to the caller on delivery.
pub struct ResponseBody {
    stream: BoxStream<'static, Result<Vec<u8>>>,
}

impl ResponseBody {
    /// Wrap a live HTTP response.
    #[must_use]
    pub fn from_response(response: reqwest::Response) -> Self {
        let stream = response
            .bytes_stream()
            .map_ok(|chunk| chunk.to_vec())
            .map_err(|e| CourierError::Network(format!("response stream: {e}")));
        Self {
            stream: stream.boxed(),
        }
    }

    /// Body already held in memory.
    #[must_use]
    pub fn from_bytes(bytes: impl Into<Vec<u8>>) -> Self {
        let bytes: Vec<u8> = bytes.into();
        Self {
            stream: stream::iter(vec![Ok::<_, CourierError>(bytes)]).boxed(),
        }
    }

    /// Chunks as they arrive.
    #[must_use]
    pub fn into_stream(self) -> BoxStream<'static, Result<Vec<u8>>> {
        self.stream
    }

    /// Read the whole body.
    ///
    /// # Errors
    /// Returns an error if the stream breaks before completion.
    pub async fn collect(self) -> Result<Vec<u8>> {
        self.stream
            .try_fold(Vec::new(), |mut acc, chunk| async move {
                acc.extend_from_slice(&chunk);
                Ok(acc)
            })
            .await
    }

    /// Read the whole body as (lossy) UTF-8.
    ///
    /// # Errors
    /// Returns an error if the stream breaks before completion.
    pub async fn collect_text(self) -> Result<String> {
        let bytes = self.collect().await?;
        Ok(String::from_utf8_lossy(&bytes).into_owned())
    }
}

impl std::fmt::Debug for ResponseBody {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResponseBody").finish_non_exhaustive()
    }
}

// =============================================================================
// Attempts and outcomes
// =============================================================================

/// Record of a single path attempt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DispatchAttempt {
    pub path: DispatchPath,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub provider: Option<ProviderId>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    pub started_at: DateTime<Utc>,
    pub duration_ms: u64,
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<u16>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub kind: Option<FailureKind>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retry_after_secs: Option<u64>,
}

impl DispatchAttempt {
    fn record(
        target: AttemptTarget,
        started_at: DateTime<Utc>,
        timer: Instant,
        error: Option<&AttemptError>,
    ) -> Self {
        Self {
            path: target.path,
            provider: target.provider,
            model: target.model,
            started_at,
            duration_ms: elapsed_ms(timer),
            success: error.is_none(),
            status: error.and_then(|e| e.status),
            kind: error.map(|e| e.kind),
            error: error.map(|e| e.message.clone()),
            retry_after_secs: error.and_then(|e| e.retry_after).map(|d| d.as_secs()),
        }
    }
}

struct AttemptTarget {
    path: DispatchPath,
    provider: Option<ProviderId>,
    model: Option<String>,
}

/// Metadata of a successful dispatch.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DeliveryReceipt {
    pub path: DispatchPath,
    pub provider: Option<ProviderId>,
    pub model: Option<String>,
    pub started_at: DateTime<Utc>,
    pub elapsed_ms: u64,
    /// Every attempt made, the successful one last.
    pub attempts: Vec<DispatchAttempt>,
}

/// A successful dispatch: receipt plus the streamed body.
#[derive(Debug)]
pub struct Delivery {
    pub receipt: DeliveryReceipt,
    pub body: ResponseBody,
}

/// Every path that was tried failed.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DispatchFailure {
    pub started_at: DateTime<Utc>,
    pub elapsed_ms: u64,
    pub attempts: Vec<DispatchAttempt>,
}

impl DispatchFailure {
    /// Kinds of the failed attempts, in order.
    #[must_use]
    pub fn kinds(&self) -> Vec<FailureKind> {
        self.attempts.iter().filter_map(|a| a.kind).collect()
    }

    /// Kind of the last attempt; this is what the user should act on.
    #[must_use]
    pub fn primary_kind(&self) -> FailureKind {
        self.attempts
            .iter()
            .rev()
            .find_map(|a| a.kind)
            .unwrap_or(FailureKind::Unknown)
    }

    /// Whether replaying later could succeed.
    ///
    /// False only when every attempt failed for a configuration reason.
    #[must_use]
    pub fn is_recoverable(&self) -> bool {
        let kinds = self.kinds();
        kinds.is_empty() || !kinds.iter().all(|k| k.is_configuration())
    }

    /// Largest server-requested back-off among the attempts.
    #[must_use]
    pub fn retry_after(&self) -> Option<Duration> {
        self.attempts
            .iter()
            .filter_map(|a| a.retry_after_secs)
            .max()
            .map(Duration::from_secs)
    }

    /// One-line description for logs and queue entries.
    #[must_use]
    pub fn summary(&self) -> String {
        self.attempts
            .iter()
            .map(|a| {
                format!(
                    "{}: {}",
                    a.path,
                    a.error.as_deref().unwrap_or(FailureKind::Unknown.as_str())
                )
            })
            .collect::<Vec<_>>()
            .join("; ")
    }

    /// Convert to a library error for callers that need one.
    #[must_use]
    pub fn to_error(&self, directory: &ProviderDirectory) -> CourierError {
        let last = self.attempts.iter().rev().find(|a| a.kind.is_some());
        let provider = last
            .and_then(|a| a.provider)
            .map_or_else(|| "shared".to_string(), |p| p.to_string());
        match self.primary_kind() {
            FailureKind::NoCredential => CourierError::NoCredential { provider },
            FailureKind::InvalidCredentialFormat => CourierError::InvalidCredentialFormat {
                expected_prefix: last
                    .and_then(|a| a.provider)
                    .and_then(|p| directory.get(p).map(|d| d.credential_prefix))
                    .unwrap_or_default()
                    .to_string(),
                provider,
            },
            FailureKind::AuthRejected => CourierError::AuthRejected {
                provider,
                status: last.and_then(|a| a.status).unwrap_or(401),
            },
            FailureKind::RateLimited => CourierError::RateLimited {
                provider,
                retry_after: self.retry_after(),
            },
            _ => CourierError::NotDelivered(self.summary()),
        }
    }
}

/// Result of one `send`.
#[derive(Debug)]
pub enum DispatchOutcome {
    Delivered(Delivery),
    /// Device offline; nothing was attempted.
    MustQueue,
    Failed(DispatchFailure),
}

impl DispatchOutcome {
    #[must_use]
    pub const fn is_delivered(&self) -> bool {
        matches!(self, Self::Delivered(_))
    }

    /// Path that delivered, if any.
    #[must_use]
    pub const fn path(&self) -> Option<DispatchPath> {
        match self {
            Self::Delivered(d) => Some(d.receipt.path),
            _ => None,
        }
    }
}

// =============================================================================
// Dispatcher
// =============================================================================

/// Anything that can attempt a send. The offline queue replays through this.
#[async_trait]
pub trait Dispatch: Send + Sync {
    async fn send(&self, request: &ChatRequest) -> DispatchOutcome;
}

/// Shared backend chat endpoint settings.
#[derive(Debug, Clone)]
pub struct SharedEndpoint {
    pub base_url: String,
    pub chat_path: String,
    pub timeout: Duration,
}

impl SharedEndpoint {
    #[must_use]
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            chat_path: CHAT_PATH.to_string(),
            timeout: SHARED_TIMEOUT,
        }
    }

    #[must_use]
    pub fn chat_url(&self) -> String {
        join_url(&self.base_url, &self.chat_path)
    }
}

/// Shared-first, direct-fallback dispatcher.
pub struct Dispatcher {
    directory: ProviderDirectory,
    credentials: Arc<CredentialStore>,
    mode: Arc<ModeStore>,
    network: NetworkStatus,
    prober: Arc<ReachabilityProber>,
    shared_client: Client,
    shared_chat_url: String,
    direct: Arc<dyn DirectClient>,
}

impl Dispatcher {
    /// Create a dispatcher.
    ///
    /// # Errors
    /// Returns an error if the shared HTTP client cannot be built.
    pub fn new(
        directory: ProviderDirectory,
        credentials: Arc<CredentialStore>,
        mode: Arc<ModeStore>,
        network: NetworkStatus,
        prober: Arc<ReachabilityProber>,
        shared: &SharedEndpoint,
        direct: Arc<dyn DirectClient>,
    ) -> Result<Self> {
        Ok(Self {
            directory,
            credentials,
            mode,
            network,
            prober,
            shared_client: build_client(shared.timeout)?,
            shared_chat_url: shared.chat_url(),
            direct,
        })
    }

    async fn call_shared(&self, request: &ChatRequest) -> std::result::Result<ResponseBody, AttemptError> {
        let response = self
            .shared_client
            .post(&self.shared_chat_url)
            .json(request)
            .send()
            .await
            .map_err(|e| AttemptError::new(FailureKind::Unreachable, e.to_string()))?;

        let status = response.status();
        if status.is_success() {
            return Ok(ResponseBody::from_response(response));
        }
        Err(
            AttemptError::new(classify_shared_status(status), format!("shared backend returned HTTP {status}"))
                .with_status(status.as_u16())
                .with_retry_after(retry_after(response.headers())),
        )
    }

    /// Pick the direct provider: hint, else best valid, else first present.
    fn direct_target(
        &self,
        request: &ChatRequest,
    ) -> std::result::Result<(&ProviderDescriptor, String, String), (Option<ProviderId>, AttemptError)> {
        let statuses: BTreeMap<ProviderId, CredentialStatus> = self.credentials.statuses();

        if let Some(id) = select_direct(&self.directory, &statuses, request.provider) {
            let descriptor = self.directory.get(id);
            let credential = self.credentials.get(id);
            let model = choose_model(&self.directory, id, request.model.as_deref());
            if let (Some(descriptor), Some(credential), Some(model)) = (descriptor, credential, model) {
                return Ok((descriptor, credential, model));
            }
        }

        let present = request
            .provider
            .filter(|id| self.credentials.is_present(*id))
            .or_else(|| {
                self.directory
                    .all()
                    .into_iter()
                    .map(|d| d.id)
                    .find(|id| self.credentials.is_present(*id))
            });

        match present {
            Some(id) => {
                let prefix = self.directory.get(id).map_or("", |d| d.credential_prefix);
                Err((
                    Some(id),
                    AttemptError::new(
                        FailureKind::InvalidCredentialFormat,
                        format!("{id} credential does not start with '{prefix}'"),
                    ),
                ))
            }
            None => Err((
                request.provider,
                AttemptError::new(FailureKind::NoCredential, "no provider credential configured"),
            )),
        }
    }
}

#[async_trait]
impl Dispatch for Dispatcher {
    async fn send(&self, request: &ChatRequest) -> DispatchOutcome {
        if !self.network.is_online() {
            tracing::debug!("Device offline; message must be queued");
            return DispatchOutcome::MustQueue;
        }

        let preference = self.mode.get();
        let started_at = Utc::now();
        let timer = Instant::now();
        let mut attempts = Vec::new();

        let shared_reachable = preference.admits_shared() && self.prober.check().await;
        let statuses = self.credentials.statuses();
        let hints = RouteHints {
            provider: request.provider,
            model: request.model.clone(),
        };
        let decision = resolve(ResolveInput {
            preference,
            shared_reachable,
            directory: &self.directory,
            credentials: &statuses,
            hints: &hints,
        });

        if preference.admits_shared() {
            let attempt_at = Utc::now();
            let attempt_timer = Instant::now();
            let target = AttemptTarget {
                path: DispatchPath::Shared,
                provider: request.provider,
                model: request.model.clone(),
            };
            let result = if decision.path == Some(DispatchPath::Shared) {
                self.call_shared(request).await
            } else {
                // Health check already failed; no chat request is made.
                Err(AttemptError::new(
                    FailureKind::Unreachable,
                    "shared backend failed its health check",
                ))
            };
            match result {
                Ok(body) => {
                    attempts.push(DispatchAttempt::record(target, attempt_at, attempt_timer, None));
                    return delivered(started_at, timer, attempts, body);
                }
                Err(err) => {
                    tracing::info!(kind = %err.kind, status = ?err.status, "Shared path failed");
                    attempts.push(DispatchAttempt::record(target, attempt_at, attempt_timer, Some(&err)));
                }
            }
        }

        if preference.admits_direct() {
            let attempt_at = Utc::now();
            let attempt_timer = Instant::now();
            match self.direct_target(request) {
                Err((provider, err)) => {
                    tracing::info!(kind = %err.kind, provider = ?provider, "Direct path not attempted");
                    let target = AttemptTarget {
                        path: DispatchPath::Direct,
                        provider,
                        model: None,
                    };
                    attempts.push(DispatchAttempt::record(target, attempt_at, attempt_timer, Some(&err)));
                }
                Ok((descriptor, credential, model)) => {
                    let call = DirectCall {
                        descriptor,
                        credential: &credential,
                        model: &model,
                        messages: &request.messages,
                    };
                    let result = self.direct.stream_chat(call).await;
                    let target = AttemptTarget {
                        path: DispatchPath::Direct,
                        provider: Some(descriptor.id),
                        model: Some(model.clone()),
                    };
                    match result {
                        Ok(body) => {
                            attempts.push(DispatchAttempt::record(target, attempt_at, attempt_timer, None));
                            return delivered(started_at, timer, attempts, body);
                        }
                        Err(err) => {
                            tracing::info!(
                                kind = %err.kind,
                                status = ?err.status,
                                provider = %descriptor.id,
                                "Direct path failed"
                            );
                            attempts.push(DispatchAttempt::record(target, attempt_at, attempt_timer, Some(&err)));
                        }
                    }
                }
            }
        }

        let failure = DispatchFailure {
            started_at,
            elapsed_ms: elapsed_ms(timer),
            attempts,
        };
        tracing::warn!(
            mode = %preference,
            kinds = ?failure.kinds(),
            elapsed_ms = failure.elapsed_ms,
            "Dispatch failed on every path"
        );
        DispatchOutcome::Failed(failure)
    }
}

fn delivered(
    started_at: DateTime<Utc>,
    timer: Instant,
    attempts: Vec<DispatchAttempt>,
    body: ResponseBody,
) -> DispatchOutcome {
    let (path, provider, model) = attempts
        .last()
        .map_or((DispatchPath::Shared, None, None), |a| {
            (a.path, a.provider, a.model.clone())
        });
    let receipt = DeliveryReceipt {
        path,
        provider,
        model,
        started_at,
        elapsed_ms: elapsed_ms(timer),
        attempts,
    };
    tracing::info!(
        path = %receipt.path,
        provider = ?receipt.provider,
        attempts = receipt.attempts.len(),
        elapsed_ms = receipt.elapsed_ms,
        "Message delivered"
    );
    DispatchOutcome::Delivered(Delivery { receipt, body })
}

fn elapsed_ms(timer: Instant) -> u64 {
    u64::try_from(timer.elapsed().as_millis()).unwrap_or(u64::MAX)
}
