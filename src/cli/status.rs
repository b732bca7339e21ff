//! Status and providers commands.

use serde::Serialize;

use crate::cli::args::StatusArgs;
use crate::cli::{OutputOptions, parse_hints};
use crate::core::provider::ProviderDescriptor;
use crate::core::service::{Courier, CourierStatus};
use crate::error::Result;
use crate::render::human;
use crate::storage::credentials::CredentialStatus;

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct StatusOutput<'a> {
    shared_url: &'a str,
    #[serde(flatten)]
    status: &'a CourierStatus,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ProviderOutput<'a> {
    #[serde(flatten)]
    descriptor: &'a ProviderDescriptor,
    credential: CredentialStatus,
}

/// Execute the status command.
///
/// # Errors
/// Returns an error for an unknown provider hint or a serialization failure.
pub async fn execute(
    courier: &Courier,
    args: &StatusArgs,
    shared_url: &str,
    out: OutputOptions,
) -> Result<()> {
    let hints = parse_hints(args.provider.as_deref(), args.model.as_deref())?;
    let status = courier.status(&hints).await;

    if out.is_json() {
        out.print_json(
            "status",
            StatusOutput {
                shared_url,
                status: &status,
            },
        )
    } else {
        print!("{}", human::render_status(&status, shared_url, out.no_color));
        Ok(())
    }
}

/// Execute the providers command.
///
/// # Errors
/// Returns an error if serialization fails.
pub fn execute_providers(courier: &Courier, out: OutputOptions) -> Result<()> {
    let credentials = courier.credentials();
    if out.is_json() {
        let rows: Vec<ProviderOutput<'_>> = courier
            .directory()
            .all()
            .into_iter()
            .map(|descriptor| ProviderOutput {
                descriptor,
                credential: credentials.status(descriptor.id),
            })
            .collect();
        out.print_json("providers", rows)
    } else {
        print!(
            "{}",
            human::render_providers(courier.directory(), |id| credentials.status(id), out.no_color)
        );
        Ok(())
    }
}
