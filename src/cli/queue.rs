//! Queue command implementation.

use serde::Serialize;

use crate::cli::OutputOptions;
use crate::cli::args::QueueCommand;
use crate::core::dispatch::DeliveryReceipt;
use crate::core::queue::{DrainReport, DrainSummary, PermanentFailure, QueuedMessage};
use crate::core::service::Courier;
use crate::error::{ExitCode, Result};
use crate::render::human;

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct DrainOutput<'a> {
    #[serde(flatten)]
    summary: DrainSummary,
    delivered: Vec<DeliveredEntry<'a>>,
    permanent_failures: &'a [PermanentFailure],
    remaining: usize,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct DeliveredEntry<'a> {
    id: &'a str,
    chat_id: &'a str,
    receipt: &'a DeliveryReceipt,
}

fn drain_output(report: &DrainReport, remaining: usize) -> DrainOutput<'_> {
    DrainOutput {
        summary: report.summary(),
        delivered: report
            .deliveries
            .iter()
            .map(|d| DeliveredEntry {
                id: &d.message.id,
                chat_id: &d.message.chat_id,
                receipt: &d.delivery.receipt,
            })
            .collect(),
        permanent_failures: &report.permanent_failures,
        remaining,
    }
}

/// Execute a queue subcommand.
///
/// A drain that leaves messages behind exits with
/// [`ExitCode::NotDelivered`].
///
/// # Errors
/// Returns an error for an unknown message id or a queue that cannot be
/// persisted.
pub async fn execute(courier: &Courier, cmd: &QueueCommand, out: OutputOptions) -> Result<ExitCode> {
    match cmd {
        QueueCommand::List => {
            let entries = courier.queue().list();
            if out.is_json() {
                out.print_json("queue list", entries)?;
            } else {
                print!("{}", human::render_queue(&entries, out.no_color));
            }
            Ok(ExitCode::Success)
        }
        QueueCommand::Drain => {
            let report = courier.drain().await;
            let remaining = courier.queue().len();
            if out.is_json() {
                out.print_json("queue drain", drain_output(&report, remaining))?;
            } else {
                print!("{}", human::render_drain(&report, remaining, out.no_color));
            }
            if remaining == 0 && report.permanent_failures.is_empty() {
                Ok(ExitCode::Success)
            } else {
                Ok(ExitCode::NotDelivered)
            }
        }
        QueueCommand::Remove { id } => {
            let removed: QueuedMessage = courier.remove_queued(id)?;
            if out.is_json() {
                out.print_json("queue remove", removed)?;
            } else {
                println!("Removed {} (chat {})", removed.id, removed.chat_id);
            }
            Ok(ExitCode::Success)
        }
    }
}
