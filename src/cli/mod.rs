//! CLI argument parsing and command dispatch.

pub mod args;
pub mod credentials;
pub mod mode;
pub mod queue;
pub mod send;
pub mod status;
pub mod watch;

use serde::Serialize;

pub use args::{Cli, Commands, OutputFormat};

use crate::core::mode::RouteHints;
use crate::core::provider::ProviderId;
use crate::error::Result;
use crate::render::{RobotOutput, render_json};

/// Output options shared by every command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OutputOptions {
    pub format: OutputFormat,
    pub pretty: bool,
    pub no_color: bool,
}

impl OutputOptions {
    #[must_use]
    pub const fn is_json(&self) -> bool {
        matches!(self.format, OutputFormat::Json)
    }

    /// Print `data` inside the robot envelope.
    ///
    /// # Errors
    /// Returns an error if serialization fails.
    pub fn print_json<T: Serialize>(&self, command: &str, data: T) -> Result<()> {
        println!("{}", render_json(&RobotOutput::new(command, data), self.pretty)?);
        Ok(())
    }
}

/// Parse optional provider/model flags into routing hints.
///
/// # Errors
/// Returns [`crate::CourierError::UnknownProvider`] for an unknown name.
pub fn parse_hints(provider: Option<&str>, model: Option<&str>) -> Result<RouteHints> {
    Ok(RouteHints {
        provider: provider.map(ProviderId::from_cli_name).transpose()?,
        model: model.map(str::to_string),
    })
}
