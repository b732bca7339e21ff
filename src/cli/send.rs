//! Send command implementation.

use serde::Serialize;

use crate::cli::args::SendArgs;
use crate::cli::{OutputOptions, parse_hints};
use crate::core::direct::stream_text;
use crate::core::dispatch::{DeliveryReceipt, FailureKind};
use crate::core::models::{ChatMessage, ChatRequest};
use crate::core::queue::QueuedMessage;
use crate::core::service::{Courier, QueueReason, SendReport};
use crate::error::{CourierError, ExitCode, Result};
use crate::render::human;

#[derive(Debug, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
enum SendOutput<'a> {
    Delivered {
        receipt: &'a DeliveryReceipt,
        text: String,
    },
    Queued {
        entry: &'a QueuedMessage,
        reason: &'a QueueReason,
    },
    Rejected {
        kind: FailureKind,
        message: &'a str,
    },
}

/// Build the request from CLI arguments.
///
/// # Errors
/// Returns an error for an empty message or an unknown provider.
pub fn build_request(args: &SendArgs) -> Result<ChatRequest> {
    let text = args.text.join(" ");
    if text.trim().is_empty() {
        return Err(CourierError::Config("message text is empty".to_string()));
    }

    let mut messages = Vec::with_capacity(2);
    if let Some(system) = args.system.as_deref().filter(|s| !s.trim().is_empty()) {
        messages.push(ChatMessage::system(system));
    }
    messages.push(ChatMessage::user(text));

    let hints = parse_hints(args.provider.as_deref(), args.model.as_deref())?;
    Ok(ChatRequest {
        messages,
        provider: hints.provider,
        model: hints.model,
    })
}

/// Execute the send command.
///
/// # Errors
/// Returns an error for invalid arguments, a body that fails mid-stream, or a
/// queue that cannot be persisted.
pub async fn execute(courier: &Courier, args: &SendArgs, out: OutputOptions) -> Result<ExitCode> {
    let request = build_request(args)?;
    tracing::debug!(chat = %args.chat, provider = ?request.provider, model = ?request.model, "Sending message");

    match courier.send(&args.chat, request).await? {
        SendReport::Delivered(delivery) => {
            let raw = delivery.body.collect_text().await?;
            let text = if args.raw { raw } else { stream_text(&raw) };
            if out.is_json() {
                out.print_json(
                    "send",
                    SendOutput::Delivered {
                        receipt: &delivery.receipt,
                        text,
                    },
                )?;
            } else {
                println!("{text}");
                eprintln!("{}", human::render_receipt(&delivery.receipt, out.no_color));
            }
            Ok(ExitCode::Success)
        }
        SendReport::Queued { entry, reason } => {
            if out.is_json() {
                out.print_json(
                    "send",
                    SendOutput::Queued {
                        entry: &entry,
                        reason: &reason,
                    },
                )?;
            } else {
                eprintln!("{}", human::render_queued(&entry, &reason, out.no_color));
            }
            Ok(ExitCode::NotDelivered)
        }
        SendReport::Rejected { kind, message } => {
            if out.is_json() {
                out.print_json(
                    "send",
                    SendOutput::Rejected {
                        kind,
                        message: &message,
                    },
                )?;
            } else {
                eprintln!("{}", human::render_rejected(&message, out.no_color));
            }
            Ok(ExitCode::ConfigError)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::models::Role;
    use crate::core::provider::ProviderId;

    fn args(text: &[&str]) -> SendArgs {
        SendArgs {
            text: text.iter().map(|s| (*s).to_string()).collect(),
            chat: "default".to_string(),
            ..SendArgs::default()
        }
    }

    #[test]
    fn joins_words_and_prepends_system() {
        let mut a = args(&["hello", "world"]);
        a.system = Some("be brief".to_string());
        a.provider = Some("anthropic".to_string());
        let request = build_request(&a).unwrap();
        assert_eq!(request.messages.len(), 2);
        assert_eq!(request.messages[0].role, Role::System);
        assert_eq!(request.messages[1].content, "hello world");
        assert_eq!(request.provider, Some(ProviderId::Anthropic));
    }

    #[test]
    fn rejects_blank_text_and_unknown_provider() {
        assert!(build_request(&args(&["  "])).is_err());
        let mut a = args(&["hi"]);
        a.provider = Some("skynet".to_string());
        assert!(matches!(
            build_request(&a),
            Err(CourierError::UnknownProvider(_))
        ));
    }
}
