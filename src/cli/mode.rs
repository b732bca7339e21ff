//! Mode command implementation.

use serde::Serialize;

use crate::cli::OutputOptions;
use crate::cli::args::ModeCommand;
use crate::core::mode::ModePreference;
use crate::core::service::Courier;
use crate::error::Result;
use crate::render::human;

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ModeOutput {
    mode: ModePreference,
    stored: ModePreference,
    #[serde(skip_serializing_if = "Option::is_none")]
    changed: Option<bool>,
}

/// Execute a mode subcommand.
///
/// # Errors
/// Returns an error for an unknown mode name or a failed write.
pub fn execute(courier: &Courier, cmd: &ModeCommand, out: OutputOptions) -> Result<()> {
    let changed = match cmd {
        ModeCommand::Show => None,
        ModeCommand::Set { mode } => {
            let mode = ModePreference::from_cli_name(mode)?;
            let before = courier.stored_mode();
            courier.set_mode(mode)?;
            Some(before != mode)
        }
    };

    let output = ModeOutput {
        mode: courier.mode(),
        stored: courier.stored_mode(),
        changed,
    };
    if out.is_json() {
        return out.print_json("mode", output);
    }

    if changed == Some(false) {
        println!("Mode already {}", output.stored);
    } else {
        print!("{}", human::render_mode(output.mode, output.stored, out.no_color));
    }
    Ok(())
}
