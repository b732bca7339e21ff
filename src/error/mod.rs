//! Error types for courier.
//!
//! Uses `thiserror` for structured error types that map to exit codes.
//!
//! ## Error Taxonomy
//!
//! Errors are categorized into five main categories:
//! - **Credential**: Missing, malformed, or rejected provider credentials
//! - **Network**: Connection, timeout, or reachability issues
//! - **Configuration**: Config file parsing, validation, or unknown names
//! - **Delivery**: Rate limits and messages that could not be delivered
//! - **Internal**: Storage, I/O, serialization, or unclassified issues
//!
//! Each error has a stable error code (e.g., `COURIER-A001`) for programmatic handling.
//!
//! Expected dispatch failures are *not* errors: the dispatcher reports them as
//! [`crate::core::dispatch::DispatchOutcome`] values. This type covers the
//! operations that genuinely fail (validation, persistence, configuration).

use std::time::Duration;
use thiserror::Error;

// =============================================================================
// Error Categories
// =============================================================================

/// High-level error categories for classification and routing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCategory {
    /// Credential issues (missing, malformed, rejected).
    Credential,
    /// Network issues (timeout, unreachable backend, connection refused).
    Network,
    /// Configuration issues (parse errors, invalid values, unknown names).
    Configuration,
    /// Delivery issues (rate limits, exhausted retries).
    Delivery,
    /// Internal errors (storage, I/O, bugs).
    Internal,
}

impl ErrorCategory {
    /// Returns a human-readable description of the category.
    #[must_use]
    pub const fn description(&self) -> &'static str {
        match self {
            Self::Credential => "Credential error",
            Self::Network => "Network error",
            Self::Configuration => "Configuration error",
            Self::Delivery => "Delivery error",
            Self::Internal => "Internal error",
        }
    }

    /// Returns a short code prefix for this category.
    #[must_use]
    pub const fn code_prefix(&self) -> &'static str {
        match self {
            Self::Credential => "A",
            Self::Network => "N",
            Self::Configuration => "C",
            Self::Delivery => "D",
            Self::Internal => "X",
        }
    }
}

impl std::fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.description())
    }
}

// =============================================================================
// Exit Codes
// =============================================================================

/// Process exit codes for the CLI.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ExitCode {
    /// Success
    Success = 0,
    /// Unexpected failure
    GeneralError = 1,
    /// Bad configuration or credential input
    ConfigError = 2,
    /// Message could not be delivered now (queued or rejected)
    NotDelivered = 3,
}

impl From<ExitCode> for i32 {
    fn from(code: ExitCode) -> Self {
        code as Self
    }
}

/// Main error type for courier operations.
#[derive(Error, Debug)]
pub enum CourierError {
    // ==========================================================================
    // Credential errors (Category: Credential)
    // ==========================================================================
    /// Credential does not match the provider's prefix rule.
    #[error("invalid credential format for {provider}: expected prefix '{expected_prefix}'")]
    InvalidCredentialFormat {
        provider: String,
        expected_prefix: String,
    },

    /// No credential stored for the provider.
    #[error("no credential configured for {provider}")]
    NoCredential { provider: String },

    /// Provider refused the credential (HTTP 401/403).
    #[error("credential rejected by {provider} (HTTP {status})")]
    AuthRejected { provider: String, status: u16 },

    // ==========================================================================
    // Network errors (Category: Network)
    // ==========================================================================
    /// Generic network error.
    #[error("network error: {0}")]
    Network(String),

    // ==========================================================================
    // Configuration errors (Category: Configuration)
    // ==========================================================================
    /// Unknown provider id.
    #[error("unknown provider: {0}")]
    UnknownProvider(String),

    /// Unknown mode preference.
    #[error("unknown mode '{0}' (expected auto, shared, or direct)")]
    UnknownMode(String),

    /// Error parsing configuration file.
    #[error("config parse error at {path}: {message}")]
    ConfigParse { path: String, message: String },

    /// Generic configuration error.
    #[error("configuration error: {0}")]
    Config(String),

    /// The built-in provider directory is inconsistent (programmer error).
    #[error("provider directory is invalid: {0}")]
    InvalidDirectory(String),

    // ==========================================================================
    // Delivery errors (Category: Delivery)
    // ==========================================================================
    /// Rate limited by the provider.
    #[error("rate limited by {provider}")]
    RateLimited {
        provider: String,
        retry_after: Option<Duration>,
    },

    /// A queued message ran out of retries.
    #[error("message {message_id} was not delivered after {attempts} attempts")]
    PermanentQueueFailure { message_id: String, attempts: u32 },

    /// Queued message not found.
    #[error("queued message not found: {0}")]
    QueuedMessageNotFound(String),

    /// Message could not be sent right now.
    #[error("message not delivered: {0}")]
    NotDelivered(String),

    // ==========================================================================
    // Internal errors (Category: Internal)
    // ==========================================================================
    /// Persistent store failure.
    #[error("storage error: {0}")]
    Storage(String),

    /// I/O operation failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization failed.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Catch-all for other errors.
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl CourierError {
    /// Map error to a CLI exit code.
    #[must_use]
    pub const fn exit_code(&self) -> ExitCode {
        match self {
            Self::InvalidCredentialFormat { .. }
            | Self::NoCredential { .. }
            | Self::UnknownProvider(_)
            | Self::UnknownMode(_)
            | Self::ConfigParse { .. }
            | Self::Config(_)
            | Self::QueuedMessageNotFound(_) => ExitCode::ConfigError,

            Self::NotDelivered(_)
            | Self::PermanentQueueFailure { .. }
            | Self::RateLimited { .. }
            | Self::AuthRejected { .. } => ExitCode::NotDelivered,

            Self::Network(_)
            | Self::InvalidDirectory(_)
            | Self::Storage(_)
            | Self::Io(_)
            | Self::Json(_)
            | Self::Other(_) => ExitCode::GeneralError,
        }
    }

    /// Returns the error category for classification and routing.
    #[must_use]
    pub const fn category(&self) -> ErrorCategory {
        match self {
            Self::InvalidCredentialFormat { .. }
            | Self::NoCredential { .. }
            | Self::AuthRejected { .. } => ErrorCategory::Credential,

            Self::Network(_) => ErrorCategory::Network,

            Self::UnknownProvider(_)
            | Self::UnknownMode(_)
            | Self::ConfigParse { .. }
            | Self::Config(_) => ErrorCategory::Configuration,

            Self::RateLimited { .. }
            | Self::PermanentQueueFailure { .. }
            | Self::QueuedMessageNotFound(_)
            | Self::NotDelivered(_) => ErrorCategory::Delivery,

            Self::InvalidDirectory(_)
            | Self::Storage(_)
            | Self::Io(_)
            | Self::Json(_)
            | Self::Other(_) => ErrorCategory::Internal,
        }
    }

    /// Returns a stable error code for programmatic handling.
    ///
    /// Format: `COURIER-{category}{number}`.
    #[must_use]
    pub const fn error_code(&self) -> &'static str {
        match self {
            Self::InvalidCredentialFormat { .. } => "COURIER-A001",
            Self::NoCredential { .. } => "COURIER-A002",
            Self::AuthRejected { .. } => "COURIER-A003",

            Self::Network(_) => "COURIER-N099",

            Self::UnknownProvider(_) => "COURIER-C001",
            Self::UnknownMode(_) => "COURIER-C002",
            Self::ConfigParse { .. } => "COURIER-C003",
            Self::Config(_) => "COURIER-C004",

            Self::RateLimited { .. } => "COURIER-D001",
            Self::PermanentQueueFailure { .. } => "COURIER-D002",
            Self::QueuedMessageNotFound(_) => "COURIER-D003",
            Self::NotDelivered(_) => "COURIER-D004",

            Self::InvalidDirectory(_) => "COURIER-X001",
            Self::Storage(_) => "COURIER-X002",
            Self::Io(_) => "COURIER-X003",
            Self::Json(_) => "COURIER-X004",
            Self::Other(_) => "COURIER-X099",
        }
    }

    /// Returns whether replaying the operation later may succeed.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Network(_)
                | Self::RateLimited { .. }
                | Self::NotDelivered(_)
        )
    }

    /// Returns the retry-after duration if this error specifies one.
    #[must_use]
    pub const fn retry_after(&self) -> Option<Duration> {
        match self {
            Self::RateLimited { retry_after, .. } => *retry_after,
            _ => None,
        }
    }

    /// Returns the provider id if this error is provider-specific.
    #[must_use]
    pub fn provider(&self) -> Option<&str> {
        match self {
            Self::InvalidCredentialFormat { provider, .. }
            | Self::NoCredential { provider }
            | Self::AuthRejected { provider, .. }
            | Self::RateLimited { provider, .. } => Some(provider),
            Self::UnknownProvider(p) => Some(p),
            _ => None,
        }
    }

    /// One-line hint shown under the error in human output.
    #[must_use]
    pub fn hint(&self) -> Option<String> {
        match self {
            Self::InvalidCredentialFormat {
                provider,
                expected_prefix,
            } => Some(format!(
                "{provider} keys start with '{expected_prefix}'. Run: courier credentials set {provider} <key>"
            )),
            Self::NoCredential { provider } => Some(format!(
                "Run: courier credentials set {provider} <key>"
            )),
            Self::AuthRejected { provider, .. } => Some(format!(
                "The {provider} key was refused. Replace it with: courier credentials set {provider} <key>"
            )),
            Self::NotDelivered(_) => {
                Some("Add a provider key to send directly: courier credentials set <provider> <key>".to_string())
            }
            Self::UnknownProvider(_) => Some("List providers with: courier providers".to_string()),
            Self::QueuedMessageNotFound(_) => Some("List queued messages with: courier queue list".to_string()),
            Self::ConfigParse { path, .. } => Some(format!("Fix or remove {path}")),
            _ => None,
        }
    }
}

/// Result type alias for courier operations.
pub type Result<T> = std::result::Result<T, CourierError>;
