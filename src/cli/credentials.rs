//! Credentials command implementation.

use std::io::{self, BufRead};

use serde::Serialize;

use crate::cli::OutputOptions;
use crate::cli::args::CredentialsCommand;
use crate::core::provider::ProviderId;
use crate::core::service::Courier;
use crate::error::{CourierError, Result};
use crate::render::human;
use crate::storage::credentials::{CredentialStatus, fingerprint};

#[derive(Debug, Serialize)]
struct CredentialChange {
    provider: Option<ProviderId>,
    action: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    fingerprint: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    status: Option<CredentialStatus>,
}

fn read_secret(input: &mut impl BufRead) -> Result<String> {
    let mut line = String::new();
    input.read_line(&mut line)?;
    let value = line.trim().to_string();
    if value.is_empty() {
        return Err(CourierError::Config(
            "no API key given on the command line or stdin".to_string(),
        ));
    }
    Ok(value)
}

/// Execute a credentials subcommand.
///
/// # Errors
/// Returns an error for an unknown provider, a malformed key, or a store
/// that cannot be written.
pub fn execute(courier: &Courier, cmd: &CredentialsCommand, out: OutputOptions) -> Result<()> {
    match cmd {
        CredentialsCommand::Set { provider, value } => {
            let provider = ProviderId::from_cli_name(provider)?;
            let value = match value {
                Some(v) => v.trim().to_string(),
                None => read_secret(&mut io::stdin().lock())?,
            };
            courier.set_credential(provider, &value)?;
            let change = CredentialChange {
                provider: Some(provider),
                action: "set",
                fingerprint: Some(fingerprint(&value)),
                status: Some(courier.credentials().status(provider)),
            };
            if out.is_json() {
                out.print_json("credentials set", change)
            } else {
                println!(
                    "Stored {} key {}",
                    provider.display_name(),
                    change.fingerprint.unwrap_or_default()
                );
                Ok(())
            }
        }
        CredentialsCommand::List => {
            let summaries = courier.credentials().configured();
            if out.is_json() {
                out.print_json("credentials list", summaries)
            } else {
                print!("{}", human::render_credentials(&summaries, out.no_color));
                Ok(())
            }
        }
        CredentialsCommand::Clear { provider, all } => {
            let provider = if *all {
                None
            } else {
                provider.as_deref().map(ProviderId::from_cli_name).transpose()?
            };
            courier.clear_credentials(provider)?;
            if out.is_json() {
                out.print_json(
                    "credentials clear",
                    CredentialChange {
                        provider,
                        action: "clear",
                        fingerprint: None,
                        status: None,
                    },
                )
            } else {
                match provider {
                    Some(p) => println!("Removed {} key", p.display_name()),
                    None => println!("Removed all stored keys"),
                }
                Ok(())
            }
        }
    }
}
