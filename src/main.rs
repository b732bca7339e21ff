//! courier - chat request dispatch and delivery resilience
//!
//! CLI entry point.

#![forbid(unsafe_code)]
#![warn(clippy::pedantic, clippy::nursery)]
#![allow(clippy::module_name_repetitions)]

use std::process::ExitCode;
use std::sync::Arc;

use clap::Parser;

use courier::cli::args::StatusArgs;
use courier::cli::{Cli, Commands, OutputOptions, credentials, mode, queue, send, status, watch};
use courier::core::logging::{self, LogLevel, LogSettings};
use courier::core::service::Courier;
use courier::error::{CourierError, ExitCode as CourierExit};
use courier::render::error::render_error;
use courier::storage::config::ResolvedConfig;
use courier::storage::kv::{KvStore, SqliteKvStore};

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let fallback = OutputOptions {
        format: cli.effective_format(),
        pretty: cli.pretty,
        no_color: cli.no_color,
    };

    let config = match ResolvedConfig::resolve(&cli) {
        Ok(config) => config,
        Err(e) => {
            init_logging(&cli, None);
            return report_error(&e, fallback);
        }
    };
    init_logging(&cli, config.log_level);
    tracing::debug!(
        config = %config.config_path.display(),
        shared_url = %config.settings.shared_url,
        shared_url_source = %config.sources.shared_url,
        "Configuration resolved"
    );

    let out = OutputOptions {
        format: config.format,
        pretty: config.pretty,
        no_color: config.no_color,
    };
    if out.no_color {
        colored::control::set_override(false);
    }

    match run(cli, &config, out).await {
        Ok(code) => ExitCode::from(code as u8),
        Err(e) => report_error(&e, out),
    }
}

fn init_logging(cli: &Cli, config_level: Option<LogLevel>) {
    let settings = LogSettings::resolve(
        cli.log_level.as_deref().and_then(LogLevel::from_arg),
        cli.json_output,
        cli.verbose,
        config_level,
    );
    logging::init(&settings);
}

fn report_error(e: &CourierError, out: OutputOptions) -> ExitCode {
    tracing::error!("{}", e);
    eprintln!("{}", render_error(e, out.format, out.no_color, out.pretty));
    ExitCode::from(e.exit_code() as u8)
}

fn open_courier(config: &ResolvedConfig) -> courier::Result<Arc<Courier>> {
    let kv: Arc<dyn KvStore> = Arc::new(SqliteKvStore::open(&config.database_file())?);
    let courier = Courier::open(kv, &config.settings)?;
    courier.override_mode_for_session(config.mode_override);
    Ok(Arc::new(courier))
}

async fn run(cli: Cli, config: &ResolvedConfig, out: OutputOptions) -> courier::Result<CourierExit> {
    let courier = open_courier(config)?;

    match cli.command {
        // Default to status
        None => {
            status::execute(&courier, &StatusArgs::default(), &config.settings.shared_url, out).await?;
        }
        Some(Commands::Status(args)) => {
            status::execute(&courier, &args, &config.settings.shared_url, out).await?;
        }
        Some(Commands::Send(args)) => return send::execute(&courier, &args, out).await,
        Some(Commands::Providers) => status::execute_providers(&courier, out)?,
        Some(Commands::Credentials(cmd)) => credentials::execute(&courier, &cmd, out)?,
        Some(Commands::Mode(cmd)) => mode::execute(&courier, &cmd, out)?,
        Some(Commands::Queue(cmd)) => return queue::execute(&courier, &cmd, out).await,
        Some(Commands::Watch(args)) => watch::run_watch(Arc::clone(&courier), &args, out).await?,
    }
    Ok(CourierExit::Success)
}
