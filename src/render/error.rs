//! Error rendering for courier.
//!
//! Human output is a single line plus an optional hint; JSON output is a
//! structured object for scripts.

use colored::Colorize;
use serde::Serialize;

use crate::cli::args::OutputFormat;
use crate::error::CourierError;

/// Structured error for machine consumption.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorJson {
    pub error: bool,
    pub code: &'static str,
    pub category: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hint: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub provider: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retry_after_secs: Option<u64>,
    pub retryable: bool,
    pub exit_code: i32,
}

impl ErrorJson {
    #[must_use]
    pub fn from_error(error: &CourierError) -> Self {
        Self {
            error: true,
            code: error.error_code(),
            category: error.category().to_string(),
            message: error.to_string(),
            hint: error.hint(),
            provider: error.provider().map(str::to_string),
            retry_after_secs: error.retry_after().map(|d| d.as_secs()),
            retryable: error.is_retryable(),
            exit_code: error.exit_code().into(),
        }
    }
}

/// Render an error for stderr.
#[must_use]
pub fn render_error(error: &CourierError, format: OutputFormat, no_color: bool, pretty: bool) -> String {
    match format {
        OutputFormat::Json => render_error_json(error, pretty),
        OutputFormat::Human => render_simple(error, no_color),
    }
}

/// Render an error as JSON, falling back to plain text.
#[must_use]
pub fn render_error_json(error: &CourierError, pretty: bool) -> String {
    let json = ErrorJson::from_error(error);
    let rendered = if pretty {
        serde_json::to_string_pretty(&json)
    } else {
        serde_json::to_string(&json)
    };
    rendered.unwrap_or_else(|_| render_simple(error, true))
}

fn render_simple(error: &CourierError, no_color: bool) -> String {
    let code = format!("[{}]", error.error_code());
    let mut out = if no_color {
        format!("Error {code}: {error}")
    } else {
        format!("{} {}: {error}", "Error".red().bold(), code.dimmed())
    };
    if let Some(hint) = error.hint() {
        out.push('\n');
        if no_color {
            out.push_str(&format!("  hint: {hint}"));
        } else {
            out.push_str(&format!("  {} {hint}", "hint:".cyan()));
        }
    }
    out
}
