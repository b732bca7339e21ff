//! Human-readable output using `colored`.

use colored::{ColoredString, Colorize};

use crate::core::dispatch::DeliveryReceipt;
use crate::core::mode::{DispatchDecision, ModePreference};
use crate::core::provider::ProviderDirectory;
use crate::core::queue::{DrainReport, QueuedMessage};
use crate::core::service::{CourierEvent, CourierStatus, QueueReason};
use crate::storage::credentials::{CredentialStatus, CredentialSummary};

const PREVIEW_CHARS: usize = 48;

fn paint(text: &str, no_color: bool, style: fn(&str) -> ColoredString) -> String {
    if no_color {
        text.to_string()
    } else {
        style(text).to_string()
    }
}

fn ok(text: &str, no_color: bool) -> String {
    paint(text, no_color, |s| s.green())
}

fn warn(text: &str, no_color: bool) -> String {
    paint(text, no_color, |s| s.yellow())
}

fn bad(text: &str, no_color: bool) -> String {
    paint(text, no_color, |s| s.red())
}

fn muted(text: &str, no_color: bool) -> String {
    paint(text, no_color, |s| s.dimmed())
}

fn heading(text: &str, no_color: bool) -> String {
    paint(text, no_color, |s| s.bold())
}

/// Get status icon for pass/fail.
fn status_icon(is_ok: bool, no_color: bool) -> &'static str {
    match (no_color, is_ok) {
        (true, true) => "[OK]",
        (true, false) => "[!!]",
        (false, true) => "\u{2713}",
        (false, false) => "\u{2717}",
    }
}

fn credential_label(status: CredentialStatus, no_color: bool) -> String {
    match status {
        CredentialStatus::Valid => ok("valid", no_color),
        CredentialStatus::Invalid => bad("invalid format", no_color),
        CredentialStatus::Missing => muted("missing", no_color),
    }
}

/// First line of `text`, cut to a preview width.
fn preview(text: &str) -> String {
    let line = text.lines().next().unwrap_or_default();
    if line.chars().count() > PREVIEW_CHARS {
        let cut: String = line.chars().take(PREVIEW_CHARS - 3).collect();
        format!("{cut}...")
    } else {
        line.to_string()
    }
}

fn last_user_text(message: &QueuedMessage) -> &str {
    message
        .message
        .messages
        .iter()
        .rev()
        .find(|m| m.role == crate::core::models::Role::User)
        .map_or("", |m| m.content.as_str())
}

// =============================================================================
// Status
// =============================================================================

fn describe_decision(decision: &DispatchDecision, no_color: bool) -> String {
    if !decision.can_send {
        let reason = decision
            .reason
            .map_or_else(|| "cannot send".to_string(), |r| r.message().to_string());
        return format!("{} {}", status_icon(false, no_color), bad(&reason, no_color));
    }
    let mut line = format!(
        "{} via {}",
        status_icon(true, no_color),
        ok(decision.path.map_or("?", |p| p.as_str()), no_color)
    );
    if let Some(provider) = decision.provider {
        line.push_str(&format!(" ({}", provider.cli_name()));
        if let Some(model) = &decision.model {
            line.push_str(&format!(" / {model}"));
        }
        line.push(')');
    }
    line
}

/// Render the status overview.
#[must_use]
pub fn render_status(status: &CourierStatus, shared_url: &str, no_color: bool) -> String {
    let mut out = String::new();
    out.push_str(&heading("courier status", no_color));
    out.push('\n');

    let network = if status.online {
        ok("online", no_color)
    } else {
        warn("offline", no_color)
    };
    out.push_str(&format!("  Network:   {network}\n"));

    let shared = if status.shared_reachable {
        ok("reachable", no_color)
    } else {
        bad("unreachable", no_color)
    };
    out.push_str(&format!(
        "  Shared:    {shared} {}\n",
        muted(&format!("({shared_url})"), no_color)
    ));

    let mut mode = status.mode.to_string();
    if status.mode != status.stored_mode {
        mode.push_str(&format!(" (this run; stored: {})", status.stored_mode));
    }
    out.push_str(&format!("  Mode:      {mode}\n"));
    out.push_str(&format!(
        "  Route:     {}\n",
        describe_decision(&status.decision, no_color)
    ));

    let queue = match status.queue_len {
        0 => muted("empty", no_color),
        1 => warn("1 message waiting", no_color),
        n => warn(&format!("{n} messages waiting"), no_color),
    };
    out.push_str(&format!("  Queue:     {queue}"));
    if status.draining {
        out.push_str(" (draining)");
    }
    out.push('\n');

    out.push_str("  Keys:      ");
    if status.credentials.is_empty() {
        out.push_str(&muted("none", no_color));
    } else {
        let keys: Vec<String> = status
            .credentials
            .iter()
            .map(|c| format!("{} {}", c.provider.cli_name(), credential_label(c.status, no_color)))
            .collect();
        out.push_str(&keys.join(", "));
    }
    out.push('\n');
    out
}

// =============================================================================
// Send
// =============================================================================

/// One-line receipt for a delivered message.
#[must_use]
pub fn render_receipt(receipt: &DeliveryReceipt, no_color: bool) -> String {
    let mut line = format!(
        "{} delivered via {}",
        status_icon(true, no_color),
        ok(receipt.path.as_str(), no_color)
    );
    if let Some(provider) = receipt.provider {
        line.push_str(&format!(" ({}", provider.cli_name()));
        if let Some(model) = &receipt.model {
            line.push_str(&format!(" / {model}"));
        }
        line.push(')');
    }
    line.push_str(&muted(&format!(" in {}ms", receipt.elapsed_ms), no_color));
    if receipt.attempts.len() > 1 {
        let failed: Vec<String> = receipt
            .attempts
            .iter()
            .filter(|a| !a.success)
            .map(|a| format!("{} {}", a.path, a.kind.map_or("failed", |k| k.as_str())))
            .collect();
        line.push_str(&muted(&format!(" after {}", failed.join(", ")), no_color));
    }
    line
}

/// Notice for a message moved to the queue.
#[must_use]
pub fn render_queued(entry: &QueuedMessage, reason: &QueueReason, no_color: bool) -> String {
    format!(
        "{} queued {} {}\n  {}",
        warn("\u{2192}", no_color),
        entry.id,
        muted(&format!("(chat {})", entry.chat_id), no_color),
        warn(&format!("reason: {reason}"), no_color)
    )
}

/// Notice for a message that needs configuration before it can go out.
#[must_use]
pub fn render_rejected(message: &str, no_color: bool) -> String {
    format!("{} not sent: {}", status_icon(false, no_color), bad(message, no_color))
}

// =============================================================================
// Queue
// =============================================================================

/// Table of waiting messages.
#[must_use]
pub fn render_queue(entries: &[QueuedMessage], no_color: bool) -> String {
    if entries.is_empty() {
        return format!("{}\n", muted("Offline queue is empty.", no_color));
    }

    let mut out = format!(
        "{}\n",
        heading(&format!("{:<36}  {:<12}  {:<7}  {:<16}  Message", "ID", "Chat", "Retries", "Queued"), no_color)
    );
    for entry in entries {
        let retries = format!("{}/{}", entry.retry_count, entry.max_retries);
        let retries = if entry.retry_count > 0 {
            warn(&format!("{retries:<7}"), no_color)
        } else {
            format!("{retries:<7}")
        };
        out.push_str(&format!(
            "{:<36}  {:<12}  {retries}  {:<16}  {}\n",
            entry.id,
            entry.chat_id,
            entry.enqueued_at.format("%Y-%m-%d %H:%M"),
            preview(last_user_text(entry)),
        ));
        if let Some(err) = &entry.last_error {
            out.push_str(&format!("    {}\n", muted(&format!("last error: {err}"), no_color)));
        }
    }
    out
}

/// Summary of a drain pass.
#[must_use]
pub fn render_drain(report: &DrainReport, remaining: usize, no_color: bool) -> String {
    if report.skipped {
        return format!("{}\n", warn("A drain is already running; nothing attempted.", no_color));
    }

    let mut out = format!(
        "Drained: {} sent, {} failed ({} kept for retry, {} dropped). {} remaining.\n",
        ok(&report.sent.to_string(), no_color),
        report.failed,
        report.retried,
        report.permanent_failures.len(),
        remaining
    );
    if report.interrupted {
        out.push_str(&format!(
            "{}\n",
            warn("Stopped early: device went offline.", no_color)
        ));
    }
    if !report.storage_errors.is_empty() {
        out.push_str(&format!(
            "{}\n",
            bad(
                &format!(
                    "Queue could not be saved {} time(s); see the log.",
                    report.storage_errors.len()
                ),
                no_color
            )
        ));
    }
    for failure in &report.permanent_failures {
        out.push_str(&format!(
            "  {} {} dropped after {} attempts{}\n",
            status_icon(false, no_color),
            failure.id,
            failure.attempts,
            failure
                .last_error
                .as_ref()
                .map(|e| format!(": {e}"))
                .unwrap_or_default()
        ));
    }
    out
}

/// One line per service event, timestamped.
#[must_use]
pub fn render_event(event: &CourierEvent, no_color: bool) -> String {
    let body = match event {
        CourierEvent::NetworkChanged { online: true } => ok("network: online", no_color),
        CourierEvent::NetworkChanged { online: false } => warn("network: offline", no_color),
        CourierEvent::QueueChanged { len } => format!("queue: {len} waiting"),
        CourierEvent::Drained(summary) => {
            let mut line = format!(
                "drained: {} sent, {} failed, {} dropped",
                summary.sent, summary.failed, summary.permanent
            );
            if summary.interrupted {
                line.push_str(" (interrupted)");
            }
            line
        }
        CourierEvent::PermanentFailure(failure) => bad(
            &format!("dropped {} after {} attempts", failure.id, failure.attempts),
            no_color,
        ),
        CourierEvent::ModeChanged { mode } => format!("mode: {mode}"),
        CourierEvent::CredentialsChanged { provider } => format!(
            "credentials changed: {}",
            provider.map_or("all", |p| p.cli_name())
        ),
    };
    format!(
        "{} {body}",
        muted(&chrono::Local::now().format("%H:%M:%S").to_string(), no_color)
    )
}

// =============================================================================
// Providers, credentials, mode
// =============================================================================

/// Provider and model listing with credential state.
#[must_use]
pub fn render_providers(
    directory: &ProviderDirectory,
    status_of: impl Fn(crate::core::provider::ProviderId) -> CredentialStatus,
    no_color: bool,
) -> String {
    let mut out = String::new();
    for descriptor in directory.all() {
        out.push_str(&format!(
            "{} {} {}  key: {}\n",
            heading(descriptor.display_name, no_color),
            muted(&format!("[{}]", descriptor.id.cli_name()), no_color),
            muted(&descriptor.api_base, no_color),
            credential_label(status_of(descriptor.id), no_color),
        ));
        for model in &descriptor.models {
            let marker = if model.id == descriptor.default_model { "*" } else { " " };
            let price = if model.is_free() {
                ok("free", no_color)
            } else {
                format!(
                    "${:.5}/${:.5} per 1k",
                    model.input_cost_per_1k, model.output_cost_per_1k
                )
            };
            out.push_str(&format!("  {marker} {:<40} {price}\n", model.id));
        }
    }
    out
}

/// Stored credentials by fingerprint.
#[must_use]
pub fn render_credentials(summaries: &[CredentialSummary], no_color: bool) -> String {
    if summaries.is_empty() {
        return format!(
            "{}\n",
            muted("No API keys stored. Add one with: courier credentials set <provider> <key>", no_color)
        );
    }
    let mut out = String::new();
    for summary in summaries {
        out.push_str(&format!(
            "{} {:<12} {:<16} {}\n",
            status_icon(summary.status == CredentialStatus::Valid, no_color),
            summary.provider.cli_name(),
            summary.fingerprint,
            credential_label(summary.status, no_color)
        ));
    }
    out
}

/// Current mode, noting a session override.
#[must_use]
pub fn render_mode(effective: ModePreference, stored: ModePreference, no_color: bool) -> String {
    if effective == stored {
        format!("Mode: {}\n", heading(effective.as_str(), no_color))
    } else {
        format!(
            "Mode: {} {}\n",
            heading(effective.as_str(), no_color),
            muted(&format!("(this run; stored: {stored})"), no_color)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::mode::{BlockReason, DispatchPath};
    use crate::core::provider::ProviderId;
    use crate::test_utils::make_test_request;
    use chrono::Utc;

    fn status(decision: DispatchDecision) -> CourierStatus {
        CourierStatus {
            online: true,
            shared_reachable: false,
            mode: ModePreference::Auto,
            stored_mode: ModePreference::Auto,
            decision,
            credentials: vec![CredentialSummary {
                provider: ProviderId::Groq,
                status: CredentialStatus::Valid,
                fingerprint: "abc123".to_string(),
            }],
            queue_len: 2,
            draining: false,
        }
    }

    fn queued(text: &str, retry_count: u32) -> QueuedMessage {
        QueuedMessage {
            id: "m-1".to_string(),
            chat_id: "c1".to_string(),
            message: make_test_request(text),
            enqueued_at: Utc::now(),
            retry_count,
            max_retries: 3,
            last_error: (retry_count > 0).then(|| "unreachable".to_string()),
        }
    }

    #[test]
    fn status_shows_route_and_queue() {
        let decision = DispatchDecision {
            can_send: true,
            path: Some(DispatchPath::Direct),
            provider: Some(ProviderId::Groq),
            model: Some("llama-3.1-8b-instant".to_string()),
            reason: None,
        };
        let out = render_status(&status(decision), "http://localhost:3000", true);
        assert!(out.contains("Network:   online"));
        assert!(out.contains("Shared:    unreachable (http://localhost:3000)"));
        assert!(out.contains("[OK] via direct (groq / llama-3.1-8b-instant)"));
        assert!(out.contains("2 messages waiting"));
        assert!(out.contains("groq valid"));
    }

    #[test]
    fn blocked_status_shows_reason() {
        let decision = DispatchDecision {
            can_send: false,
            path: None,
            provider: None,
            model: None,
            reason: Some(BlockReason::NoCredentialConfigured),
        };
        let out = render_status(&status(decision), "http://x", true);
        assert!(out.contains(BlockReason::NoCredentialConfigured.message()));
        assert!(out.contains("[!!]"));
    }

    #[test]
    fn queue_table_and_preview() {
        let long = "x".repeat(100);
        let out = render_queue(&[queued(&long, 1)], true);
        assert!(out.contains("m-1"));
        assert!(out.contains("1/3"));
        assert!(out.contains("last error: unreachable"));
        assert!(out.contains(&format!("{}...", "x".repeat(PREVIEW_CHARS - 3))));
        assert!(render_queue(&[], true).contains("empty"));
    }

    #[test]
    fn drain_summary() {
        let report = DrainReport {
            sent: 2,
            failed: 1,
            retried: 1,
            interrupted: true,
            ..DrainReport::default()
        };
        let out = render_drain(&report, 1, true);
        assert!(out.starts_with("Drained: 2 sent, 1 failed (1 kept for retry, 0 dropped). 1 remaining."));
        assert!(out.contains("Stopped early"));
    }

    #[test]
    fn events_render_one_line() {
        let line = render_event(&CourierEvent::NetworkChanged { online: false }, true);
        assert!(line.ends_with("network: offline"));
        let line = render_event(&CourierEvent::CredentialsChanged { provider: None }, true);
        assert!(line.ends_with("credentials changed: all"));
        assert!(!line.contains('\n'));
    }

    #[test]
    fn mode_notes_session_override() {
        assert_eq!(render_mode(ModePreference::Auto, ModePreference::Auto, true), "Mode: auto\n");
        assert!(
            render_mode(ModePreference::ForceDirect, ModePreference::Auto, true)
                .contains("stored: auto")
        );
    }

    #[test]
    fn providers_mark_default_model() {
        let directory = ProviderDirectory::new();
        let out = render_providers(&directory, |_| CredentialStatus::Missing, true);
        for id in ProviderId::ALL {
            assert!(out.contains(&format!("[{}]", id.cli_name())));
        }
        assert!(out.contains("  * "));
    }
}
