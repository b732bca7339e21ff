//! HTTP client utilities.
//!
//! Builds the clients used by the prober, the shared path, and the direct
//! path, and maps transport outcomes onto [`FailureKind`] using the real
//! status code available at the call site.

use std::time::Duration;

use reqwest::header::{HeaderMap, RETRY_AFTER};
use reqwest::{Client, ClientBuilder, StatusCode};

use super::dispatch::FailureKind;
use crate::error::{CourierError, Result};

/// Default timeout for direct provider calls.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(60);

/// Timeout for reachability probes.
pub const PROBE_TIMEOUT: Duration = Duration::from_secs(3);

/// Timeout for the shared chat call.
pub const SHARED_TIMEOUT: Duration = Duration::from_secs(15);

/// Build a configured HTTP client.
///
/// # Errors
///
/// Returns error if client construction fails.
pub fn build_client(timeout: Duration) -> Result<Client> {
    ClientBuilder::new()
        .timeout(timeout)
        .connect_timeout(timeout.min(PROBE_TIMEOUT))
        .user_agent(format!("courier/{}", env!("CARGO_PKG_VERSION")))
        .build()
        .map_err(|e| CourierError::Network(e.to_string()))
}

/// Classify a non-success status from a direct provider call.
#[must_use]
pub fn classify_status(status: StatusCode) -> FailureKind {
    match status.as_u16() {
        401 | 403 => FailureKind::AuthRejected,
        429 => FailureKind::RateLimited,
        500..=599 => FailureKind::Unavailable,
        _ => FailureKind::Unknown,
    }
}

/// Classify a non-success status from the shared backend.
///
/// Everything except throttling means the shared path is not usable now.
#[must_use]
pub fn classify_shared_status(status: StatusCode) -> FailureKind {
    if status == StatusCode::TOO_MANY_REQUESTS {
        FailureKind::RateLimited
    } else {
        FailureKind::Unreachable
    }
}

/// Classify a transport-level error (no response received, or body failure).
#[must_use]
pub fn classify_transport(err: &reqwest::Error) -> FailureKind {
    if let Some(status) = err.status() {
        return classify_status(status);
    }
    if err.is_timeout() || err.is_connect() || err.is_request() {
        FailureKind::NetworkError
    } else {
        FailureKind::Unknown
    }
}

/// Parse a `Retry-After` header given in seconds.
#[must_use]
pub fn retry_after(headers: &HeaderMap) -> Option<Duration> {
    headers
        .get(RETRY_AFTER)?
        .to_str()
        .ok()?
        .trim()
        .parse::<u64>()
        .ok()
        .map(Duration::from_secs)
}

/// Join a base URL and a path without doubling slashes.
#[must_use]
pub fn join_url(base: &str, path: &str) -> String {
    format!(
        "{}/{}",
        base.trim_end_matches('/'),
        path.trim_start_matches('/')
    )
}
